// Copyright 2025 coScene
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::channel::{Channel, RawChannel};
use crate::context::Context;
use crate::encode::Encode;
use crate::{Error, Schema};

/// Builder for channels
///
/// ```no_run
/// use vizlog::{ChannelBuilder, Context};
///
/// fn main() -> Result<(), vizlog::Error> {
///     let ctx = Context::new();
///     let channel = ChannelBuilder::new("/imu")
///         .message_encoding("json")
///         .context(&ctx)
///         .build_raw()?;
///     channel.log(br#"{"x": 1.0}"#);
///     Ok(())
/// }
/// ```
#[must_use]
#[derive(Debug)]
pub struct ChannelBuilder {
    topic: String,
    message_encoding: Option<String>,
    schema: Option<Schema>,
    metadata: BTreeMap<String, String>,
    context: Arc<Context>,
}

impl ChannelBuilder {
    /// Starts a channel on the default context.
    pub fn new(topic: impl Into<String>) -> Self {
        Self {
            topic: topic.into(),
            message_encoding: None,
            schema: None,
            metadata: BTreeMap::new(),
            context: Context::get_default(),
        }
    }

    pub fn message_encoding(mut self, encoding: impl Into<String>) -> Self {
        self.message_encoding = Some(encoding.into());
        self
    }

    pub fn schema(mut self, schema: impl Into<Option<Schema>>) -> Self {
        self.schema = schema.into();
        self
    }

    pub fn metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn add_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Creates the channel on `context` instead of the default context.
    pub fn context(mut self, context: &Arc<Context>) -> Self {
        self.context = context.clone();
        self
    }

    /// Creates the channel, or returns the existing one with the same topic and encoding.
    ///
    /// When the channel already exists, the schema and metadata given here are ignored.
    pub fn build_raw(self) -> Result<Arc<RawChannel>, Error> {
        let message_encoding = self
            .message_encoding
            .ok_or(Error::MessageEncodingRequired)?;
        self.context
            .create_channel(self.topic, message_encoding, self.schema, self.metadata)
    }

    /// Creates a typed channel. The encoding and schema default to those of `T`.
    pub fn build<T: Encode>(mut self) -> Result<Channel<T>, Error> {
        if self.message_encoding.is_none() {
            self.message_encoding = Some(T::get_message_encoding());
        }
        if self.schema.is_none() {
            self.schema = T::get_schema();
        }
        self.build_raw().map(Channel::from_raw)
    }
}

/// Schema given as raw bytes, as received from a language binding
#[derive(Debug, Clone, Copy)]
pub struct SchemaBytes<'a> {
    pub name: &'a [u8],
    pub encoding: &'a [u8],
    pub data: &'a [u8],
}

/// Creates a channel from raw bytes, validating that every string is UTF-8.
///
/// Used at language-binding boundaries. Nothing is created when any field is invalid.
/// The schema bytes are copied, so the caller may reuse its buffers afterwards.
pub fn create_channel(
    topic: &[u8],
    message_encoding: &[u8],
    schema: Option<SchemaBytes<'_>>,
    context: Option<&Arc<Context>>,
    metadata: &[(&[u8], &[u8])],
) -> Result<Arc<RawChannel>, Error> {
    let topic = utf8_field("topic", topic)?;
    let message_encoding = utf8_field("message encoding", message_encoding)?;
    let schema = match schema {
        Some(schema) => Some(Schema::new(
            utf8_field("schema name", schema.name)?,
            utf8_field("schema encoding", schema.encoding)?,
            schema.data.to_vec(),
        )),
        None => None,
    };
    let metadata = metadata
        .iter()
        .map(|(key, value)| {
            Ok((
                utf8_field("metadata key", key)?.to_string(),
                utf8_field("metadata value", value)?.to_string(),
            ))
        })
        .collect::<Result<BTreeMap<_, _>, Error>>()?;

    let mut builder = ChannelBuilder::new(topic)
        .message_encoding(message_encoding)
        .schema(schema)
        .metadata(metadata);
    if let Some(context) = context {
        builder = builder.context(context);
    }
    builder.build_raw()
}

fn utf8_field<'a>(field: &str, bytes: &'a [u8]) -> Result<&'a str, Error> {
    std::str::from_utf8(bytes).map_err(|e| Error::Utf8Error(format!("{field}: {e}")))
}
