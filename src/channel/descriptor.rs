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

use crate::channel::{ChannelId, RawChannel};
use crate::Schema;

/// Read-only view of a channel, handed to [`SinkChannelFilter`](crate::SinkChannelFilter)
///
/// The view borrows the channel and cannot outlive the filter call.
#[derive(Debug, Clone, Copy)]
pub struct ChannelDescriptor<'a> {
    channel: &'a RawChannel,
}

impl<'a> ChannelDescriptor<'a> {
    pub(crate) fn new(channel: &'a RawChannel) -> Self {
        Self { channel }
    }

    pub fn id(&self) -> ChannelId {
        self.channel.id()
    }

    pub fn topic(&self) -> &'a str {
        self.channel.topic()
    }

    pub fn message_encoding(&self) -> &'a str {
        self.channel.message_encoding()
    }

    pub fn schema(&self) -> Option<&'a Schema> {
        self.channel.schema()
    }

    pub fn metadata(&self) -> &'a BTreeMap<String, String> {
        self.channel.metadata()
    }
}
