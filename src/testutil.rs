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

// Sinks for tests

use std::sync::Arc;

use parking_lot::Mutex;

use crate::channel::{ChannelId, RawChannel};
use crate::metadata::Metadata;
use crate::sink::{Sink, SinkId};
use crate::sink_channel_filter::SinkChannelFilter;
use crate::Error;

/// A message received by a [`RecordingSink`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoggedMessage {
    pub channel_id: ChannelId,
    pub topic: String,
    pub msg: Vec<u8>,
    pub log_time: u64,
}

/// Sink that records every message, advertisement and removal
pub struct RecordingSink {
    id: SinkId,
    auto_subscribe: bool,
    filter: Option<Arc<dyn SinkChannelFilter>>,
    supported_encodings: Option<Vec<String>>,
    messages: Mutex<Vec<LoggedMessage>>,
    advertised: Mutex<Vec<ChannelId>>,
    removed: Mutex<Vec<ChannelId>>,
}

impl Default for RecordingSink {
    fn default() -> Self {
        Self::new()
    }
}

impl RecordingSink {
    pub fn new() -> Self {
        Self {
            id: SinkId::next(),
            auto_subscribe: true,
            filter: None,
            supported_encodings: None,
            messages: Mutex::new(Vec::new()),
            advertised: Mutex::new(Vec::new()),
            removed: Mutex::new(Vec::new()),
        }
    }

    pub fn auto_subscribe(mut self, auto_subscribe: bool) -> Self {
        self.auto_subscribe = auto_subscribe;
        self
    }

    pub fn with_filter(mut self, filter: Arc<dyn SinkChannelFilter>) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_supported_encodings(mut self, encodings: &[&str]) -> Self {
        self.supported_encodings = Some(encodings.iter().map(|e| e.to_string()).collect());
        self
    }

    pub fn take_messages(&self) -> Vec<LoggedMessage> {
        std::mem::take(&mut *self.messages.lock())
    }

    pub fn advertised(&self) -> Vec<ChannelId> {
        self.advertised.lock().clone()
    }

    pub fn removed(&self) -> Vec<ChannelId> {
        self.removed.lock().clone()
    }
}

impl Sink for RecordingSink {
    fn id(&self) -> SinkId {
        self.id
    }

    fn log(&self, channel: &RawChannel, msg: &[u8], metadata: &Metadata) -> Result<(), Error> {
        self.messages.lock().push(LoggedMessage {
            channel_id: channel.id(),
            topic: channel.topic().to_string(),
            msg: msg.to_vec(),
            log_time: metadata.log_time,
        });
        Ok(())
    }

    fn add_channels(&self, channels: &[&Arc<RawChannel>]) -> Option<Vec<ChannelId>> {
        self.advertised
            .lock()
            .extend(channels.iter().map(|channel| channel.id()));
        None
    }

    fn remove_channel(&self, channel: &RawChannel) {
        self.removed.lock().push(channel.id());
    }

    fn auto_subscribe(&self) -> bool {
        self.auto_subscribe
    }

    fn channel_filter(&self) -> Option<&dyn SinkChannelFilter> {
        self.filter.as_deref()
    }

    fn supported_encodings(&self) -> Option<&[String]> {
        self.supported_encodings.as_deref()
    }
}

/// Sink that accepts everything and records nothing
pub struct MockSink(SinkId);

impl Default for MockSink {
    fn default() -> Self {
        Self(SinkId::next())
    }
}

impl Sink for MockSink {
    fn id(&self) -> SinkId {
        self.0
    }

    fn log(&self, _channel: &RawChannel, _msg: &[u8], _metadata: &Metadata) -> Result<(), Error> {
        Ok(())
    }
}

/// Sink that fails every write
pub struct ErrorSink(SinkId);

impl Default for ErrorSink {
    fn default() -> Self {
        Self::new()
    }
}

impl ErrorSink {
    pub fn new() -> Self {
        Self(SinkId::next())
    }
}

impl Sink for ErrorSink {
    fn id(&self) -> SinkId {
        self.0
    }

    fn log(&self, _channel: &RawChannel, _msg: &[u8], _metadata: &Metadata) -> Result<(), Error> {
        Err(Error::Unspecified("ErrorSink always fails".to_string()))
    }
}
