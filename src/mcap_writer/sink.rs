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

// Sink adapter that records messages into an MCAP file

use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};
use std::io::{Seek, Write};
use std::sync::Arc;

use parking_lot::Mutex;

use super::options::McapWriteOptions;
use super::Attachment;
use crate::channel::{ChannelId, RawChannel};
use crate::metadata::Metadata;
use crate::sink::{Sink, SinkId};
use crate::sink_channel_filter::SinkChannelFilter;
use crate::Error;

struct WriterState<W: Write + Seek> {
    writer: mcap::Writer<W>,
    /// Context channel ID to file channel ID. The writer may map several context
    /// channels with identical descriptors onto one file channel.
    channels: HashMap<ChannelId, u16>,
    /// Last sequence number per file channel
    sequences: HashMap<u16, u32>,
}

impl<W: Write + Seek> WriterState<W> {
    fn file_channel(&mut self, channel: &RawChannel) -> Result<u16, Error> {
        if let Some(id) = self.channels.get(&channel.id()) {
            return Ok(*id);
        }
        let schema_id = match channel.schema() {
            Some(schema) => self
                .writer
                .add_schema(&schema.name, &schema.encoding, &schema.data)?,
            None => 0,
        };
        let id = self.writer.add_channel(
            schema_id,
            channel.topic(),
            channel.message_encoding(),
            channel.metadata(),
        )?;
        self.channels.insert(channel.id(), id);
        Ok(id)
    }

    fn next_sequence(&mut self, channel_id: u16) -> u32 {
        let sequence = self.sequences.entry(channel_id).or_insert(0);
        *sequence = sequence.wrapping_add(1);
        *sequence
    }
}

/// Sink writing every subscribed channel into one MCAP file
pub(crate) struct McapSink<W: Write + Seek + Send + 'static> {
    id: SinkId,
    state: Mutex<Option<WriterState<W>>>,
    filter: Option<Arc<dyn SinkChannelFilter>>,
    supported_encodings: Option<Vec<String>>,
}

impl<W: Write + Seek + Send + 'static> McapSink<W> {
    pub(crate) fn new(
        writer: W,
        options: &McapWriteOptions,
        filter: Option<Arc<dyn SinkChannelFilter>>,
        supported_encodings: Option<Vec<String>>,
    ) -> Result<Self, Error> {
        let writer = options.to_write_options().create(writer)?;
        Ok(Self {
            id: SinkId::next(),
            state: Mutex::new(Some(WriterState {
                writer,
                channels: HashMap::new(),
                sequences: HashMap::new(),
            })),
            filter,
            supported_encodings,
        })
    }

    pub(crate) fn write_metadata(
        &self,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), Error> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(Error::SinkClosed)?;
        state.writer.write_metadata(&mcap::records::Metadata {
            name: name.to_string(),
            metadata,
        })?;
        Ok(())
    }

    pub(crate) fn write_attachment(&self, attachment: &Attachment) -> Result<(), Error> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(Error::SinkClosed)?;
        state.writer.attach(&mcap::Attachment {
            log_time: attachment.log_time,
            create_time: attachment.create_time,
            name: attachment.name.clone(),
            media_type: attachment.media_type.clone(),
            data: Cow::Borrowed(attachment.data.as_slice()),
        })?;
        Ok(())
    }

    /// Finishes the file. Returns `None` if it was already finished.
    pub(crate) fn finish(&self) -> Result<Option<W>, Error> {
        let Some(mut state) = self.state.lock().take() else {
            return Ok(None);
        };
        state.writer.finish()?;
        Ok(Some(state.writer.into_inner()))
    }
}

impl<W: Write + Seek + Send + 'static> Sink for McapSink<W> {
    fn id(&self) -> SinkId {
        self.id
    }

    fn log(&self, channel: &RawChannel, msg: &[u8], metadata: &Metadata) -> Result<(), Error> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(Error::SinkClosed)?;
        let channel_id = state.file_channel(channel)?;
        let sequence = state.next_sequence(channel_id);
        state.writer.write_to_known_channel(
            &mcap::records::MessageHeader {
                channel_id,
                sequence,
                log_time: metadata.log_time,
                publish_time: metadata.log_time,
            },
            msg,
        )?;
        Ok(())
    }

    fn channel_filter(&self) -> Option<&dyn SinkChannelFilter> {
        self.filter.as_deref()
    }

    fn supported_encodings(&self) -> Option<&[String]> {
        self.supported_encodings.as_deref()
    }
}
