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

// Regex allowlists and the server's channel filter

use std::sync::Arc;

use regex::Regex;

use crate::channel::ChannelDescriptor;
use crate::sink_channel_filter::SinkChannelFilter;
use crate::Error;

/// List of anchored regular expressions. An empty list allows everything.
#[derive(Debug, Clone, Default)]
pub(crate) struct Allowlist(Vec<Regex>);

impl Allowlist {
    pub(crate) fn new(patterns: &[String]) -> Result<Self, Error> {
        patterns
            .iter()
            .map(|pattern| {
                Regex::new(&format!("^(?:{pattern})$")).map_err(|e| {
                    Error::ConfigurationError(format!("invalid allowlist pattern '{pattern}': {e}"))
                })
            })
            .collect::<Result<_, _>>()
            .map(Self)
    }

    pub(crate) fn allows(&self, value: &str) -> bool {
        self.0.is_empty() || self.0.iter().any(|re| re.is_match(value))
    }
}

/// True if any path segment of the topic starts with an underscore.
pub(crate) fn is_hidden_topic(topic: &str) -> bool {
    topic.split('/').any(|segment| segment.starts_with('_'))
}

/// Path traversal is never allowed, whatever the allowlist says.
pub(crate) fn is_asset_uri_allowed(allowlist: &Allowlist, uri: &str) -> bool {
    !uri.contains("..") && allowlist.allows(uri)
}

/// Channel filter applied to every client of a server
pub(crate) struct ServerChannelFilter {
    topics: Allowlist,
    include_hidden: bool,
    user_filter: Option<Arc<dyn SinkChannelFilter>>,
}

impl ServerChannelFilter {
    pub(crate) fn new(
        topics: Allowlist,
        include_hidden: bool,
        user_filter: Option<Arc<dyn SinkChannelFilter>>,
    ) -> Self {
        Self {
            topics,
            include_hidden,
            user_filter,
        }
    }
}

impl SinkChannelFilter for ServerChannelFilter {
    fn should_subscribe(&self, channel: &ChannelDescriptor<'_>) -> bool {
        if !self.include_hidden && is_hidden_topic(channel.topic()) {
            return false;
        }
        if !self.topics.allows(channel.topic()) {
            return false;
        }
        self.user_filter
            .as_ref()
            .map_or(true, |filter| filter.should_subscribe(channel))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{Context, SinkChannelFilterFn};

    fn patterns(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_allowlist_is_anchored() {
        let allowlist = Allowlist::new(&patterns(&["/camera/.*", "/tf"])).unwrap();
        assert!(allowlist.allows("/camera/front"));
        assert!(allowlist.allows("/tf"));
        assert!(!allowlist.allows("/tf_static"));
        assert!(!allowlist.allows("/robot/camera/front"));
        assert!(Allowlist::default().allows("anything"));
    }

    #[test]
    fn test_invalid_pattern() {
        let err = Allowlist::new(&patterns(&["("])).unwrap_err();
        assert!(matches!(err, Error::ConfigurationError(_)));
    }

    #[test]
    fn test_hidden_topics() {
        assert!(is_hidden_topic("/_internal/state"));
        assert!(is_hidden_topic("_private"));
        assert!(!is_hidden_topic("/robot/state_"));
    }

    #[test]
    fn test_asset_uri() {
        let allowlist = Allowlist::new(&patterns(&["package://.*"])).unwrap();
        assert!(is_asset_uri_allowed(&allowlist, "package://robot/mesh.stl"));
        assert!(!is_asset_uri_allowed(&allowlist, "package://robot/../secret"));
        assert!(!is_asset_uri_allowed(&allowlist, "file:///etc/passwd"));
        assert!(!is_asset_uri_allowed(&Allowlist::default(), "../x"));
    }

    #[test]
    fn test_server_channel_filter() {
        let ctx = Context::new();
        let visible = ctx.channel_builder("/a").message_encoding("json").build_raw().unwrap();
        let hidden = ctx.channel_builder("/_a").message_encoding("json").build_raw().unwrap();
        let other = ctx.channel_builder("/b").message_encoding("json").build_raw().unwrap();

        let filter = ServerChannelFilter::new(
            Allowlist::new(&patterns(&["/_?a"])).unwrap(),
            false,
            None,
        );
        assert!(filter.should_subscribe(&visible.descriptor()));
        assert!(!filter.should_subscribe(&hidden.descriptor()));
        assert!(!filter.should_subscribe(&other.descriptor()));

        let user = Arc::new(SinkChannelFilterFn::new(|c: &ChannelDescriptor<'_>| {
            c.topic() != "/a"
        }));
        let filter = ServerChannelFilter::new(Allowlist::default(), true, Some(user));
        assert!(!filter.should_subscribe(&visible.descriptor()));
        assert!(filter.should_subscribe(&hidden.descriptor()));
    }
}
