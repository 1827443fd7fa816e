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

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Weak};

use smallvec::SmallVec;

use crate::channel::{ChannelId, RawChannel};
use crate::context::Context;
use crate::Schema;

/// Open channels of a context, indexed by ID and by topic
pub(super) struct ChannelRegistry {
    next_id: u64,
    channels: BTreeMap<ChannelId, Arc<RawChannel>>,
    // IDs in creation order, so the first entry is the oldest channel on the topic
    by_topic: HashMap<String, SmallVec<[ChannelId; 2]>>,
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self {
            next_id: 1,
            channels: BTreeMap::new(),
            by_topic: HashMap::new(),
        }
    }
}

impl ChannelRegistry {
    pub(super) fn find(&self, topic: &str, message_encoding: &str) -> Option<&Arc<RawChannel>> {
        self.by_topic
            .get(topic)?
            .iter()
            .filter_map(|id| self.channels.get(id))
            .find(|channel| channel.message_encoding() == message_encoding)
    }

    pub(super) fn insert(
        &mut self,
        context: Weak<Context>,
        topic: String,
        message_encoding: String,
        schema: Option<Schema>,
        metadata: BTreeMap<String, String>,
    ) -> Arc<RawChannel> {
        let id = ChannelId::new(self.next_id);
        self.next_id += 1;
        self.by_topic.entry(topic.clone()).or_default().push(id);
        let channel = Arc::new(RawChannel::new(
            id,
            context,
            topic,
            message_encoding,
            schema,
            metadata,
        ));
        self.channels.insert(id, channel.clone());
        channel
    }

    pub(super) fn get(&self, id: ChannelId) -> Option<&Arc<RawChannel>> {
        self.channels.get(&id)
    }

    pub(super) fn first_by_topic(&self, topic: &str) -> Option<&Arc<RawChannel>> {
        self.by_topic
            .get(topic)?
            .first()
            .and_then(|id| self.channels.get(id))
    }

    pub(super) fn remove(&mut self, id: ChannelId) -> Option<Arc<RawChannel>> {
        let channel = self.channels.remove(&id)?;
        if let Some(ids) = self.by_topic.get_mut(channel.topic()) {
            ids.retain(|other| *other != id);
            if ids.is_empty() {
                self.by_topic.remove(channel.topic());
            }
        }
        Some(channel)
    }

    pub(super) fn iter(&self) -> impl Iterator<Item = &Arc<RawChannel>> {
        self.channels.values()
    }

    pub(super) fn len(&self) -> usize {
        self.channels.len()
    }

    /// Forgets every channel. IDs keep increasing.
    pub(super) fn clear(&mut self) {
        self.channels.clear();
        self.by_topic.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn insert(registry: &mut ChannelRegistry, topic: &str, encoding: &str) -> Arc<RawChannel> {
        registry.insert(
            Weak::new(),
            topic.to_string(),
            encoding.to_string(),
            None,
            BTreeMap::new(),
        )
    }

    #[test]
    fn test_ids_increase_and_are_not_reused() {
        let mut registry = ChannelRegistry::default();
        let a = insert(&mut registry, "/a", "json");
        assert_eq!(a.id(), ChannelId::new(1));
        registry.remove(a.id());
        let b = insert(&mut registry, "/a", "json");
        assert_eq!(b.id(), ChannelId::new(2));
    }

    #[test]
    fn test_first_by_topic_is_oldest() {
        let mut registry = ChannelRegistry::default();
        let json = insert(&mut registry, "/a", "json");
        let cbor = insert(&mut registry, "/a", "cbor");
        assert_eq!(registry.first_by_topic("/a").unwrap().id(), json.id());
        registry.remove(json.id());
        assert_eq!(registry.first_by_topic("/a").unwrap().id(), cbor.id());
        registry.remove(cbor.id());
        assert!(registry.first_by_topic("/a").is_none());
    }

    #[test]
    fn test_find_matches_encoding() {
        let mut registry = ChannelRegistry::default();
        insert(&mut registry, "/a", "json");
        assert!(registry.find("/a", "json").is_some());
        assert!(registry.find("/a", "protobuf").is_none());
        assert!(registry.find("/b", "json").is_none());
    }
}
