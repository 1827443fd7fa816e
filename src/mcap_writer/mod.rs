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

// MCAP file sink
//
// `McapWriter` configures a recording and attaches it to a context. The returned
// handle owns the file until `close` is called or the handle is dropped.

mod options;
mod sink;

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufWriter, Seek, Write};
use std::path::Path;
use std::sync::{Arc, Weak};

use tracing::{info, warn};

pub use options::{CompressionLevel, CompressionType, McapWriteOptions, DEFAULT_CHUNK_SIZE};

use crate::channel::ChannelDescriptor;
use crate::sink::{Sink, SinkId};
use crate::sink_channel_filter::{SinkChannelFilter, SinkChannelFilterFn};
use crate::{Context, Error};
use sink::McapSink;

/// A file attached to a recording
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Attachment {
    pub log_time: u64,
    pub create_time: u64,
    pub name: String,
    pub media_type: String,
    pub data: Vec<u8>,
}

/// Builder for MCAP recordings
#[must_use]
pub struct McapWriter {
    options: McapWriteOptions,
    context: Arc<Context>,
    channel_filter: Option<Arc<dyn SinkChannelFilter>>,
    supported_encodings: Option<Vec<String>>,
}

impl Default for McapWriter {
    fn default() -> Self {
        Self::with_options(McapWriteOptions::default())
    }
}

impl McapWriter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: McapWriteOptions) -> Self {
        Self {
            options,
            context: Context::get_default(),
            channel_filter: None,
            supported_encodings: None,
        }
    }

    /// Records channels from this context instead of the default one.
    pub fn context(mut self, context: &Arc<Context>) -> Self {
        self.context = context.clone();
        self
    }

    pub fn channel_filter(mut self, filter: Arc<dyn SinkChannelFilter>) -> Self {
        self.channel_filter = Some(filter);
        self
    }

    pub fn channel_filter_fn(
        self,
        filter: impl Fn(&ChannelDescriptor<'_>) -> bool + Send + Sync + 'static,
    ) -> Self {
        self.channel_filter(Arc::new(SinkChannelFilterFn::new(filter)))
    }

    /// Only records channels with one of these message encodings.
    pub fn supported_encodings(
        mut self,
        encodings: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        self.supported_encodings = Some(encodings.into_iter().map(Into::into).collect());
        self
    }

    /// Creates a new file at `path` and starts recording into it.
    ///
    /// Fails with `AlreadyExists` if the file exists, unless `truncate` is set.
    pub fn create_new_buffered_file(
        self,
        path: impl AsRef<Path>,
    ) -> Result<McapWriterHandle<BufWriter<File>>, Error> {
        let path = path.as_ref();
        let path_str = path.to_str().ok_or_else(|| {
            Error::Utf8Error(format!("path is not valid UTF-8: {}", path.display()))
        })?;
        let file = if self.options.truncate {
            File::create(path)?
        } else {
            File::options().write(true).create_new(true).open(path)?
        };
        info!("Recording to MCAP file {}", path_str);
        self.create(BufWriter::new(file))
    }

    /// Starts recording into `writer`.
    pub fn create<W: Write + Seek + Send + 'static>(
        self,
        writer: W,
    ) -> Result<McapWriterHandle<W>, Error> {
        let sink = Arc::new(McapSink::new(
            writer,
            &self.options,
            self.channel_filter,
            self.supported_encodings,
        )?);
        self.context.add_sink(sink.clone());
        Ok(McapWriterHandle {
            sink,
            context: Arc::downgrade(&self.context),
        })
    }
}

/// Handle to an active MCAP recording
///
/// Dropping the handle finishes the file. Call [`McapWriterHandle::close`] to observe
/// errors and get the underlying writer back.
#[must_use]
pub struct McapWriterHandle<W: Write + Seek + Send + 'static> {
    sink: Arc<McapSink<W>>,
    context: Weak<Context>,
}

impl<W: Write + Seek + Send + 'static> McapWriterHandle<W> {
    pub fn sink_id(&self) -> SinkId {
        self.sink.id()
    }

    /// Writes a metadata record. An empty map writes nothing.
    pub fn write_metadata(
        &self,
        name: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<(), Error> {
        if metadata.is_empty() {
            return Ok(());
        }
        self.sink.write_metadata(name, metadata)
    }

    pub fn write_attachment(&self, attachment: Attachment) -> Result<(), Error> {
        self.sink.write_attachment(&attachment)
    }

    /// Detaches the sink, finishes the file and returns the underlying writer.
    pub fn close(self) -> Result<W, Error> {
        self.finish()?.ok_or(Error::SinkClosed)
    }

    fn finish(&self) -> Result<Option<W>, Error> {
        if let Some(context) = self.context.upgrade() {
            context.remove_sink(self.sink.id());
        }
        self.sink.finish()
    }
}

impl<W: Write + Seek + Send + 'static> Drop for McapWriterHandle<W> {
    fn drop(&mut self) {
        if let Err(e) = self.finish() {
            warn!("Failed to finish MCAP file: {}", e);
        }
    }
}
