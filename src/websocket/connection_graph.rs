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

// Published topics, subscribed topics and advertised services, as shown to clients

use std::collections::{BTreeMap, BTreeSet};

use super::protocol::{
    AdvertisedServiceProviders, ConnectionGraphUpdate, PublishedTopic, SubscribedTopic,
};

type MapOfSets = BTreeMap<String, BTreeSet<String>>;

/// Snapshot of the connection graph
///
/// Build a complete snapshot and pass it to
/// [`WebSocketServerHandle::publish_connection_graph`](crate::WebSocketServerHandle::publish_connection_graph);
/// subscribers receive only what changed since the previous snapshot.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ConnectionGraph {
    published_topics: MapOfSets,
    subscribed_topics: MapOfSets,
    advertised_services: MapOfSets,
}

impl ConnectionGraph {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_published_topic(
        &mut self,
        topic: impl Into<String>,
        publisher_ids: impl IntoIterator<Item = impl Into<String>>,
    ) {
        self.published_topics
            .insert(topic.into(), publisher_ids.into_iter().map(Into::into).collect());
    }

    pub fn set_subscribed_topic(
        &mut self,
        topic: impl Into<String>,
        subscriber_ids: impl IntoIterator<Item = impl Into<String>>,
    ) {
        self.subscribed_topics
            .insert(topic.into(), subscriber_ids.into_iter().map(Into::into).collect());
    }

    pub fn set_advertised_service(
        &mut self,
        service: impl Into<String>,
        provider_ids: impl IntoIterator<Item = impl Into<String>>,
    ) {
        self.advertised_services
            .insert(service.into(), provider_ids.into_iter().map(Into::into).collect());
    }

    /// Changes needed to go from `self` to `next`.
    pub(crate) fn diff(&self, next: &ConnectionGraph) -> ConnectionGraphUpdate {
        let published_topics = changed(&self.published_topics, &next.published_topics)
            .map(|(name, ids)| PublishedTopic {
                name,
                publisher_ids: ids,
            })
            .collect();
        let subscribed_topics = changed(&self.subscribed_topics, &next.subscribed_topics)
            .map(|(name, ids)| SubscribedTopic {
                name,
                subscriber_ids: ids,
            })
            .collect();
        let advertised_services = changed(&self.advertised_services, &next.advertised_services)
            .map(|(name, ids)| AdvertisedServiceProviders {
                name,
                provider_ids: ids,
            })
            .collect();

        // A topic is removed only when it is neither published nor subscribed anymore.
        let removed_topics: BTreeSet<String> = self
            .published_topics
            .keys()
            .chain(self.subscribed_topics.keys())
            .filter(|name| {
                !next.published_topics.contains_key(*name)
                    && !next.subscribed_topics.contains_key(*name)
            })
            .cloned()
            .collect();
        let removed_services = self
            .advertised_services
            .keys()
            .filter(|name| !next.advertised_services.contains_key(*name))
            .cloned()
            .collect();

        ConnectionGraphUpdate {
            published_topics,
            subscribed_topics,
            advertised_services,
            removed_topics: removed_topics.into_iter().collect(),
            removed_services,
        }
    }

    /// Full graph, sent to a new subscriber.
    pub(crate) fn as_initial_update(&self) -> ConnectionGraphUpdate {
        ConnectionGraph::default().diff(self)
    }
}

fn changed<'a>(
    previous: &'a MapOfSets,
    next: &'a MapOfSets,
) -> impl Iterator<Item = (String, Vec<String>)> + 'a {
    next.iter()
        .filter(move |(name, ids)| previous.get(*name) != Some(*ids))
        .map(|(name, ids)| (name.clone(), ids.iter().cloned().collect()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_initial_update() {
        let mut graph = ConnectionGraph::new();
        graph.set_published_topic("/a", ["n1", "n2"]);
        graph.set_advertised_service("/srv", ["n1"]);
        let update = graph.as_initial_update();
        assert_eq!(
            update.published_topics,
            vec![PublishedTopic {
                name: "/a".into(),
                publisher_ids: vec!["n1".into(), "n2".into()]
            }]
        );
        assert_eq!(update.advertised_services.len(), 1);
        assert!(update.removed_topics.is_empty());
    }

    #[test]
    fn test_diff() {
        let mut before = ConnectionGraph::new();
        before.set_published_topic("/a", ["n1"]);
        before.set_published_topic("/b", ["n1"]);
        before.set_subscribed_topic("/c", ["n2"]);
        before.set_advertised_service("/srv1", ["n1"]);
        before.set_advertised_service("/srv2", ["n1"]);

        let mut after = ConnectionGraph::new();
        after.set_published_topic("/a", ["n1"]);
        after.set_published_topic("/b", ["n1", "n3"]);
        after.set_subscribed_topic("/a", ["n2"]);
        after.set_advertised_service("/srv1", ["n1"]);

        let update = before.diff(&after);
        assert_eq!(
            update.published_topics,
            vec![PublishedTopic {
                name: "/b".into(),
                publisher_ids: vec!["n1".into(), "n3".into()]
            }]
        );
        assert_eq!(
            update.subscribed_topics,
            vec![SubscribedTopic {
                name: "/a".into(),
                subscriber_ids: vec!["n2".into()]
            }]
        );
        assert!(update.advertised_services.is_empty());
        assert_eq!(update.removed_topics, vec!["/c".to_string()]);
        assert_eq!(update.removed_services, vec!["/srv2".to_string()]);

        assert!(after.diff(&after).is_empty());
    }
}
