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

// Channels declared in statics and created on first use

use std::sync::{Arc, OnceLock};

use tracing::warn;

use super::{Channel, RawChannel};
use crate::context::LazyContext;
use crate::encode::Encode;
use crate::metadata::PartialMetadata;
use crate::{ChannelBuilder, Error, Schema};

/// A typed channel created the first time it is used
///
/// ```no_run
/// use serde_json::{json, Value};
/// use vizlog::LazyChannel;
///
/// static POSE: LazyChannel<Value> = LazyChannel::new("/pose");
///
/// POSE.log(&json!({"x": 1.0}));
/// ```
pub struct LazyChannel<T: Encode> {
    topic: &'static str,
    context: &'static LazyContext,
    inner: OnceLock<Channel<T>>,
}

impl<T: Encode> LazyChannel<T> {
    /// Declares a channel on the default context.
    pub const fn new(topic: &'static str) -> Self {
        Self {
            topic,
            context: LazyContext::get_default(),
            inner: OnceLock::new(),
        }
    }

    /// Binds the channel to another context.
    #[must_use]
    pub const fn context(mut self, context: &'static LazyContext) -> Self {
        self.context = context;
        self
    }

    pub fn topic(&self) -> &'static str {
        self.topic
    }

    /// Creates the channel now, so that sinks see it before the first message.
    pub fn init(&self) -> Result<(), Error> {
        self.get().map(|_| ())
    }

    /// Returns the channel, creating it if needed.
    pub fn get(&self) -> Result<&Channel<T>, Error> {
        if let Some(channel) = self.inner.get() {
            return Ok(channel);
        }
        // Racing initializers get the same channel back from the context.
        let channel = ChannelBuilder::new(self.topic)
            .context(self.context)
            .build()?;
        Ok(self.inner.get_or_init(|| channel))
    }

    pub fn log(&self, msg: &T) {
        self.log_with_meta(msg, PartialMetadata::default());
    }

    pub fn log_with_meta(&self, msg: &T, metadata: PartialMetadata) {
        match self.get() {
            Ok(channel) => channel.log_with_meta(msg, metadata),
            Err(e) => warn!("Cannot create channel '{}': {}", self.topic, e),
        }
    }
}

/// A raw channel created the first time it is used
pub struct LazyRawChannel {
    topic: &'static str,
    message_encoding: &'static str,
    schema: Option<(&'static str, &'static str, &'static [u8])>,
    context: &'static LazyContext,
    inner: OnceLock<Arc<RawChannel>>,
}

impl LazyRawChannel {
    /// Declares a channel on the default context.
    pub const fn new(topic: &'static str, message_encoding: &'static str) -> Self {
        Self {
            topic,
            message_encoding,
            schema: None,
            context: LazyContext::get_default(),
            inner: OnceLock::new(),
        }
    }

    #[must_use]
    pub const fn context(mut self, context: &'static LazyContext) -> Self {
        self.context = context;
        self
    }

    #[must_use]
    pub const fn schema(
        mut self,
        name: &'static str,
        encoding: &'static str,
        data: &'static [u8],
    ) -> Self {
        self.schema = Some((name, encoding, data));
        self
    }

    pub fn topic(&self) -> &'static str {
        self.topic
    }

    pub fn init(&self) -> Result<(), Error> {
        self.get().map(|_| ())
    }

    /// Returns the channel, creating it if needed.
    pub fn get(&self) -> Result<&Arc<RawChannel>, Error> {
        if let Some(channel) = self.inner.get() {
            return Ok(channel);
        }
        let schema = self
            .schema
            .map(|(name, encoding, data)| Schema::new(name, encoding, data));
        let channel = ChannelBuilder::new(self.topic)
            .message_encoding(self.message_encoding)
            .schema(schema)
            .context(self.context)
            .build_raw()?;
        Ok(self.inner.get_or_init(|| channel))
    }

    pub fn log(&self, msg: &[u8]) {
        self.log_with_meta(msg, PartialMetadata::default());
    }

    pub fn log_with_meta(&self, msg: &[u8], metadata: PartialMetadata) {
        match self.get() {
            Ok(channel) => channel.log_with_meta(msg, metadata),
            Err(e) => warn!("Cannot create channel '{}': {}", self.topic, e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testutil::RecordingSink;
    use crate::Context;
    use serde_json::{json, Value};
    use tracing_test::traced_test;

    static CTX: LazyContext = LazyContext::new();

    #[test]
    fn test_lazy_channel_created_on_first_use() {
        static POSE: LazyChannel<Value> = CTX.channel("/lazy/pose");

        assert!(CTX.get_channel_by_topic("/lazy/pose").is_none());
        let sink = Arc::new(RecordingSink::new());
        CTX.add_sink(sink.clone());
        POSE.log(&json!({"x": 1}));
        POSE.log(&json!({"x": 2}));

        let channel = CTX.get_channel_by_topic("/lazy/pose").unwrap();
        assert_eq!(channel.message_encoding(), "json");
        assert_eq!(POSE.get().unwrap().id(), channel.id());
        let messages: Vec<_> = sink
            .take_messages()
            .into_iter()
            .filter(|m| m.topic == "/lazy/pose")
            .collect();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[1].msg, br#"{"x":2}"#);
    }

    #[test]
    fn test_lazy_raw_channel_schema() {
        static SCAN: LazyRawChannel = CTX
            .raw_channel("/lazy/scan", "protobuf")
            .schema("pkg.Scan", "protobuf", &[1, 2, 3]);

        SCAN.init().unwrap();
        let channel = CTX.get_channel_by_topic("/lazy/scan").unwrap();
        let schema = channel.schema().unwrap();
        assert_eq!(schema.name, "pkg.Scan");
        assert_eq!(&schema.data[..], &[1, 2, 3]);
        assert!(Arc::ptr_eq(SCAN.get().unwrap(), &channel));
    }

    #[test]
    fn test_lazy_default_context() {
        static STATUS: LazyRawChannel = LazyRawChannel::new("/lazy/default/status", "json");
        STATUS.init().unwrap();
        assert!(Context::get_default()
            .get_channel_by_topic("/lazy/default/status")
            .is_some());
    }

    #[traced_test]
    #[test]
    fn test_invalid_channel_warns() {
        static EMPTY: LazyRawChannel = CTX.raw_channel("", "json");
        assert!(matches!(EMPTY.get(), Err(Error::ValueError(_))));
        EMPTY.log(b"{}");
        assert!(logs_contain("Cannot create channel"));
    }
}
