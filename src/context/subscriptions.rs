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

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::channel::ChannelId;
use crate::sink::SinkId;

/// Which channels each sink accepted, and which sinks are subscribed to each channel
///
/// A sink can only be subscribed to a channel that was advertised to it.
#[derive(Default)]
pub(super) struct Subscriptions {
    advertised: HashMap<SinkId, HashSet<ChannelId>>,
    subscribers: HashMap<ChannelId, BTreeSet<SinkId>>,
}

impl Subscriptions {
    pub(super) fn advertise(&mut self, sink_id: SinkId, channel_id: ChannelId) {
        self.advertised
            .entry(sink_id)
            .or_default()
            .insert(channel_id);
    }

    pub(super) fn is_advertised(&self, sink_id: SinkId, channel_id: ChannelId) -> bool {
        self.advertised
            .get(&sink_id)
            .is_some_and(|channels| channels.contains(&channel_id))
    }

    /// Returns true if the subscription is new.
    pub(super) fn subscribe(&mut self, sink_id: SinkId, channel_id: ChannelId) -> bool {
        if !self.is_advertised(sink_id, channel_id) {
            return false;
        }
        self.subscribers
            .entry(channel_id)
            .or_default()
            .insert(sink_id)
    }

    /// Returns true if the sink was subscribed.
    pub(super) fn unsubscribe(&mut self, sink_id: SinkId, channel_id: ChannelId) -> bool {
        let Some(sinks) = self.subscribers.get_mut(&channel_id) else {
            return false;
        };
        let removed = sinks.remove(&sink_id);
        if sinks.is_empty() {
            self.subscribers.remove(&channel_id);
        }
        removed
    }

    /// Subscribed sinks in ID order.
    pub(super) fn subscribers(&self, channel_id: ChannelId) -> impl Iterator<Item = SinkId> + '_ {
        self.subscribers
            .get(&channel_id)
            .into_iter()
            .flat_map(|sinks| sinks.iter().copied())
    }

    /// Forgets a channel. Returns the sinks it had been advertised to.
    pub(super) fn remove_channel(&mut self, channel_id: ChannelId) -> Vec<SinkId> {
        self.subscribers.remove(&channel_id);
        let mut sinks: Vec<SinkId> = self
            .advertised
            .iter_mut()
            .filter_map(|(sink_id, channels)| channels.remove(&channel_id).then_some(*sink_id))
            .collect();
        sinks.sort();
        sinks
    }

    /// Forgets a sink. Returns the channels it had been subscribed to.
    pub(super) fn remove_sink(&mut self, sink_id: SinkId) -> Vec<ChannelId> {
        self.advertised.remove(&sink_id);
        let mut changed = Vec::new();
        self.subscribers.retain(|channel_id, sinks| {
            if sinks.remove(&sink_id) {
                changed.push(*channel_id);
            }
            !sinks.is_empty()
        });
        changed
    }

    pub(super) fn clear(&mut self) {
        self.advertised.clear();
        self.subscribers.clear();
    }
}
