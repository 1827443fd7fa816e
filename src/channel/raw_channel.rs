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
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Weak;
use std::time::Duration;

use parking_lot::Mutex;
use tracing::warn;

use crate::channel::{ChannelDescriptor, ChannelId};
use crate::context::Context;
use crate::log_sink_set::{LogSinkSet, SmallSinkVec};
use crate::metadata::PartialMetadata;
use crate::sink::SinkId;
use crate::throttler::Throttler;
use crate::Schema;

const CLOSED_WARNING_INTERVAL: Duration = Duration::from_secs(10);

/// Untyped channel that logs pre-encoded messages
///
/// Raw channels are created through [`ChannelBuilder`](crate::ChannelBuilder) or
/// [`create_channel`](crate::create_channel) and are shared as `Arc<RawChannel>`.
pub struct RawChannel {
    id: ChannelId,
    context: Weak<Context>,
    topic: String,
    message_encoding: String,
    schema: Option<Schema>,
    metadata: BTreeMap<String, String>,
    sinks: LogSinkSet,
    closed: AtomicBool,
    closed_warning: Mutex<Throttler>,
}

impl RawChannel {
    pub(crate) fn new(
        id: ChannelId,
        context: Weak<Context>,
        topic: String,
        message_encoding: String,
        schema: Option<Schema>,
        metadata: BTreeMap<String, String>,
    ) -> Self {
        Self {
            id,
            context,
            topic,
            message_encoding,
            schema,
            metadata,
            sinks: LogSinkSet::default(),
            closed: AtomicBool::new(false),
            closed_warning: Mutex::new(Throttler::new(CLOSED_WARNING_INTERVAL)),
        }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn message_encoding(&self) -> &str {
        &self.message_encoding
    }

    pub fn schema(&self) -> Option<&Schema> {
        self.schema.as_ref()
    }

    pub fn metadata(&self) -> &BTreeMap<String, String> {
        &self.metadata
    }

    /// Borrowed description of this channel, as seen by sink filters.
    pub fn descriptor(&self) -> ChannelDescriptor<'_> {
        ChannelDescriptor::new(self)
    }

    /// Returns true if at least one sink is subscribed to this channel.
    pub fn has_sinks(&self) -> bool {
        !self.sinks.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Closes the channel.
    ///
    /// The channel is removed from its context and unadvertised from every sink.
    /// Later log calls are dropped with a throttled warning. The ID is not reused.
    pub fn close(&self) {
        if self.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(context) = self.context.upgrade() {
            context.remove_channel(self.id);
        }
        self.sinks.clear();
    }

    /// Logs a pre-encoded message stamped with the current time.
    pub fn log(&self, msg: &[u8]) {
        self.log_inner(msg, PartialMetadata::default(), None);
    }

    /// Logs a pre-encoded message with explicit metadata.
    pub fn log_with_meta(&self, msg: &[u8], metadata: PartialMetadata) {
        self.log_inner(msg, metadata, None);
    }

    /// Logs a pre-encoded message to a single sink.
    pub fn log_to_sink(&self, msg: &[u8], metadata: PartialMetadata, sink_id: SinkId) {
        self.log_inner(msg, metadata, Some(sink_id));
    }

    pub(crate) fn log_inner(&self, msg: &[u8], metadata: PartialMetadata, target: Option<SinkId>) {
        if self.is_closed() {
            if self.closed_warning.lock().try_acquire() {
                warn!("Cannot log on closed channel '{}' ({})", self.topic, self.id);
            }
            return;
        }
        let metadata = metadata.resolve();
        self.sinks.log(self, msg, &metadata, target);
    }

    pub(crate) fn update_sinks(&self, sinks: SmallSinkVec) {
        if self.is_closed() {
            return;
        }
        self.sinks.store(sinks);
    }

    pub(crate) fn clear_sinks(&self) {
        self.sinks.clear();
    }

    #[cfg(test)]
    pub(crate) fn num_sinks(&self) -> usize {
        self.sinks.len()
    }
}

impl fmt::Debug for RawChannel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RawChannel")
            .field("id", &self.id)
            .field("topic", &self.topic)
            .field("message_encoding", &self.message_encoding)
            .field("schema", &self.schema)
            .field("metadata", &self.metadata)
            .finish()
    }
}
