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

// Channels: logical streams of messages identified by topic and encoding

mod descriptor;
mod lazy_channel;
mod raw_channel;

pub use descriptor::ChannelDescriptor;
pub use lazy_channel::{LazyChannel, LazyRawChannel};
pub use raw_channel::RawChannel;

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::warn;

use crate::encode::Encode;
use crate::metadata::PartialMetadata;
use crate::sink::SinkId;
use crate::{ChannelBuilder, Error, Schema};

/// Identifier of a channel, unique within its context and never reused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChannelId(u64);

impl ChannelId {
    pub const fn new(id: u64) -> Self {
        Self(id)
    }
}

impl From<ChannelId> for u64 {
    fn from(id: ChannelId) -> Self {
        id.0
    }
}

impl From<u64> for ChannelId {
    fn from(id: u64) -> Self {
        Self(id)
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Channel carrying messages of a single [`Encode`] type
///
/// The schema and message encoding come from `T`. Messages are encoded once and
/// only when at least one sink is subscribed.
pub struct Channel<T: Encode> {
    inner: Arc<RawChannel>,
    _phantom: PhantomData<fn(&T)>,
}

impl<T: Encode> Channel<T> {
    /// Creates a channel on the default context.
    pub fn new(topic: impl Into<String>) -> Result<Self, Error> {
        ChannelBuilder::new(topic).build()
    }

    pub(crate) fn from_raw(inner: Arc<RawChannel>) -> Self {
        Self {
            inner,
            _phantom: PhantomData,
        }
    }

    pub fn id(&self) -> ChannelId {
        self.inner.id()
    }

    pub fn topic(&self) -> &str {
        self.inner.topic()
    }

    pub fn message_encoding(&self) -> &str {
        self.inner.message_encoding()
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.inner.schema()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        self.inner.metadata()
    }

    /// Returns true if at least one sink is subscribed to this channel.
    pub fn has_sinks(&self) -> bool {
        self.inner.has_sinks()
    }

    /// The untyped channel underneath.
    pub fn raw(&self) -> &Arc<RawChannel> {
        &self.inner
    }

    /// Closes the channel. See [`RawChannel::close`].
    pub fn close(&self) {
        self.inner.close();
    }

    /// Logs a message stamped with the current time.
    pub fn log(&self, msg: &T) {
        self.log_with_meta(msg, PartialMetadata::default());
    }

    /// Logs a message with explicit metadata.
    pub fn log_with_meta(&self, msg: &T, metadata: PartialMetadata) {
        self.log_inner(msg, metadata, None);
    }

    /// Logs a message to a single sink.
    pub fn log_to_sink(&self, msg: &T, metadata: PartialMetadata, sink_id: SinkId) {
        self.log_inner(msg, metadata, Some(sink_id));
    }

    fn log_inner(&self, msg: &T, metadata: PartialMetadata, target: Option<SinkId>) {
        if !self.inner.has_sinks() {
            return;
        }
        let mut buf = Vec::with_capacity(msg.encoded_len().unwrap_or(256));
        if let Err(e) = msg.encode(&mut buf) {
            warn!("Failed to encode message on '{}': {}", self.topic(), e);
            return;
        }
        self.inner.log_inner(&buf, metadata, target);
    }
}

impl<T: Encode> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self::from_raw(self.inner.clone())
    }
}

impl<T: Encode> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id())
            .field("topic", &self.topic())
            .field("message_encoding", &self.message_encoding())
            .finish()
    }
}
