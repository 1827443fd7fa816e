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

use std::sync::Arc;

use arc_swap::ArcSwap;
use smallvec::SmallVec;
use tracing::warn;

use crate::channel::RawChannel;
use crate::metadata::Metadata;
use crate::sink::{Sink, SinkId};

pub(crate) type SmallSinkVec = SmallVec<[Arc<dyn Sink>; 6]>;

/// Snapshot of the sinks subscribed to one channel
///
/// The context replaces the snapshot whenever subscriptions change. Logging only
/// loads the current snapshot, so it never waits on the context lock.
pub(crate) struct LogSinkSet(ArcSwap<SmallSinkVec>);

impl Default for LogSinkSet {
    fn default() -> Self {
        Self(ArcSwap::from_pointee(SmallSinkVec::new()))
    }
}

impl LogSinkSet {
    pub(crate) fn store(&self, sinks: SmallSinkVec) {
        self.0.store(Arc::new(sinks));
    }

    pub(crate) fn clear(&self) {
        self.store(SmallSinkVec::new());
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.0.load().is_empty()
    }

    #[cfg(test)]
    pub(crate) fn len(&self) -> usize {
        self.0.load().len()
    }

    /// Delivers a message to every sink in the snapshot, or only to `target` if given.
    pub(crate) fn log(
        &self,
        channel: &RawChannel,
        msg: &[u8],
        metadata: &Metadata,
        target: Option<SinkId>,
    ) {
        let sinks = self.0.load();
        for sink in sinks.iter() {
            if target.is_some_and(|id| id != sink.id()) {
                continue;
            }
            if let Err(e) = sink.log(channel, msg, metadata) {
                warn!(
                    "Error logging message on '{}' to sink {}: {}",
                    channel.topic(),
                    sink.id(),
                    e
                );
            }
        }
    }
}
