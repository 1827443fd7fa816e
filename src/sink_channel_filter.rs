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

use crate::channel::ChannelDescriptor;

/// Decides which channels a sink receives
///
/// The filter is evaluated once per channel, when the channel is advertised to the
/// sink: either the channel exists when the sink attaches, or it is created while the
/// sink is attached. It is never re-evaluated per message, so it must depend only on
/// the channel description.
pub trait SinkChannelFilter: Send + Sync {
    /// Returns true if the sink should receive messages on this channel.
    fn should_subscribe(&self, channel: &ChannelDescriptor<'_>) -> bool;
}

/// Adapter turning a closure into a [`SinkChannelFilter`]
pub struct SinkChannelFilterFn<F>(F);

impl<F> SinkChannelFilterFn<F>
where
    F: Fn(&ChannelDescriptor<'_>) -> bool + Send + Sync,
{
    pub fn new(filter: F) -> Self {
        Self(filter)
    }
}

impl<F> SinkChannelFilter for SinkChannelFilterFn<F>
where
    F: Fn(&ChannelDescriptor<'_>) -> bool + Send + Sync,
{
    fn should_subscribe(&self, channel: &ChannelDescriptor<'_>) -> bool {
        (self.0)(channel)
    }
}
