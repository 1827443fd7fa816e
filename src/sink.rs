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

// Sink trait implemented by every consumer of logged messages

use std::fmt;
use std::num::NonZeroU64;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tracing::debug;

use crate::channel::{ChannelId, RawChannel};
use crate::metadata::Metadata;
use crate::sink_channel_filter::SinkChannelFilter;
use crate::Error;

/// Unique identifier of a sink, shared by all contexts in the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SinkId(NonZeroU64);

impl SinkId {
    pub const fn new(id: NonZeroU64) -> Self {
        Self(id)
    }

    /// Allocates the next sink ID.
    pub fn next() -> Self {
        static NEXT_ID: AtomicU64 = AtomicU64::new(0);
        let id = NEXT_ID.fetch_add(1, Ordering::Relaxed);
        Self(NonZeroU64::MIN.saturating_add(id))
    }
}

impl From<SinkId> for u64 {
    fn from(id: SinkId) -> Self {
        id.0.get()
    }
}

impl fmt::Display for SinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Consumer of logged messages
///
/// A sink is attached to a [`Context`](crate::Context). The context advertises
/// channels to the sink, tracks which channels the sink is subscribed to, and
/// calls [`Sink::log`] for every message on those channels.
///
/// # Thread Safety
///
/// `log` is called directly on the thread that logged the message, possibly from
/// many threads at once. It should never block on slow I/O. Sinks must not call
/// back into the context from `add_channels`.
pub trait Sink: Send + Sync {
    /// Unique ID of this sink.
    fn id(&self) -> SinkId;

    /// Writes one message.
    ///
    /// Errors are reported by the context and do not affect delivery to other sinks.
    fn log(&self, channel: &RawChannel, msg: &[u8], metadata: &Metadata) -> Result<(), Error>;

    /// Called when channels are advertised to this sink, either because they already
    /// existed when the sink was attached, or because they were created afterwards.
    ///
    /// Sinks that do not auto-subscribe return the channel IDs they want to subscribe
    /// to right away. Most sinks subscribe later through the context, or not at all.
    ///
    /// Runs while the context holds its registry lock and must not call back into the
    /// context.
    fn add_channels(&self, _channels: &[&Arc<RawChannel>]) -> Option<Vec<ChannelId>> {
        None
    }

    /// Called when a previously advertised channel is closed. The context lock is not
    /// held, so implementations may query the context.
    fn remove_channel(&self, _channel: &RawChannel) {}

    /// Whether this sink is subscribed to every channel it accepts.
    fn auto_subscribe(&self) -> bool {
        true
    }

    /// Filter deciding which channels this sink receives.
    fn channel_filter(&self) -> Option<&dyn SinkChannelFilter> {
        None
    }

    /// Message encodings this sink can consume. Channels with other encodings are
    /// treated as rejected by the filter.
    fn supported_encodings(&self) -> Option<&[String]> {
        None
    }
}

/// Evaluates the sink's encoding allowlist and channel filter for one channel.
pub(crate) fn sink_accepts_channel(sink: &dyn Sink, channel: &RawChannel) -> bool {
    if let Some(encodings) = sink.supported_encodings() {
        if !encodings
            .iter()
            .any(|encoding| encoding == channel.message_encoding())
        {
            debug!(
                "Sink {} does not support encoding '{}' of channel '{}'",
                sink.id(),
                channel.message_encoding(),
                channel.topic()
            );
            return false;
        }
    }
    match sink.channel_filter() {
        Some(filter) => filter.should_subscribe(&channel.descriptor()),
        None => true,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sink_ids_are_unique() {
        let a = SinkId::next();
        let b = SinkId::next();
        assert_ne!(a, b);
        assert!(u64::from(b) > u64::from(a));
    }
}
