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

use serde::{Deserialize, Serialize};

/// Compression level (0-4)
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq, Eq)]
pub enum CompressionLevel {
    Fastest = 0,
    Fast = 1,
    #[default]
    Default = 2,
    Slow = 3,
    Slowest = 4,
}

impl CompressionLevel {
    /// Maps a numeric level (0-4) to a compression level.
    pub fn from_level(level: u8) -> Option<Self> {
        match level {
            0 => Some(CompressionLevel::Fastest),
            1 => Some(CompressionLevel::Fast),
            2 => Some(CompressionLevel::Default),
            3 => Some(CompressionLevel::Slow),
            4 => Some(CompressionLevel::Slowest),
            _ => None,
        }
    }

    /// Encoder level for the given algorithm.
    pub fn for_compression(self, compression: CompressionType) -> u32 {
        match compression {
            CompressionType::None => 0,
            CompressionType::Zstd => match self {
                CompressionLevel::Fastest => 1,
                CompressionLevel::Fast => 3,
                CompressionLevel::Default => 5,
                CompressionLevel::Slow => 10,
                CompressionLevel::Slowest => 19,
            },
            CompressionType::Lz4 => match self {
                CompressionLevel::Fastest => 1,
                CompressionLevel::Fast => 3,
                CompressionLevel::Default => 5,
                CompressionLevel::Slow => 9,
                CompressionLevel::Slowest => 12,
            },
        }
    }
}

/// Chunk compression
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionType {
    None,
    Lz4,
    #[default]
    Zstd,
}

impl From<CompressionType> for Option<mcap::Compression> {
    fn from(compression: CompressionType) -> Self {
        match compression {
            CompressionType::None => None,
            CompressionType::Lz4 => Some(mcap::Compression::Lz4),
            CompressionType::Zstd => Some(mcap::Compression::Zstd),
        }
    }
}

/// Options for MCAP files
///
/// The `emit_*` and `repeat_*` toggles trade seek performance for smaller files.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct McapWriteOptions {
    /// Profile recorded in the header, for example `ros2`.
    pub profile: String,
    /// Library name recorded in the header.
    pub library: String,
    /// Uncompressed chunk size that triggers a flush.
    pub chunk_size: u64,
    pub compression: CompressionType,
    pub compression_level: CompressionLevel,
    /// Group messages into chunks. Without chunks no message or chunk indexes are written.
    pub use_chunks: bool,
    pub emit_statistics: bool,
    pub emit_summary_offsets: bool,
    pub emit_message_indexes: bool,
    pub emit_chunk_indexes: bool,
    pub emit_attachment_indexes: bool,
    pub emit_metadata_indexes: bool,
    /// Repeat channel records in the summary section.
    pub repeat_channels: bool,
    /// Repeat schema records in the summary section.
    pub repeat_schemas: bool,
    /// Overwrite an existing file instead of failing.
    pub truncate: bool,
}

pub const DEFAULT_CHUNK_SIZE: u64 = 768 * 1024;

impl Default for McapWriteOptions {
    fn default() -> Self {
        Self {
            profile: String::new(),
            library: format!("vizlog-{}", env!("CARGO_PKG_VERSION")),
            chunk_size: DEFAULT_CHUNK_SIZE,
            compression: CompressionType::default(),
            compression_level: CompressionLevel::default(),
            use_chunks: true,
            emit_statistics: true,
            emit_summary_offsets: true,
            emit_message_indexes: true,
            emit_chunk_indexes: true,
            emit_attachment_indexes: true,
            emit_metadata_indexes: true,
            repeat_channels: true,
            repeat_schemas: true,
            truncate: false,
        }
    }
}

impl McapWriteOptions {
    /// Writer options understood by the `mcap` crate. `truncate` only affects file creation.
    pub(crate) fn to_write_options(&self) -> mcap::WriteOptions {
        mcap::WriteOptions::new()
            .profile(self.profile.clone())
            .library(self.library.clone())
            .compression(self.compression.into())
            .compression_level(self.compression_level.for_compression(self.compression))
            .chunk_size(Some(self.chunk_size))
            .use_chunks(self.use_chunks)
            .emit_statistics(self.emit_statistics)
            .emit_summary_offsets(self.emit_summary_offsets)
            .emit_message_indexes(self.emit_message_indexes)
            .emit_chunk_indexes(self.emit_chunk_indexes)
            .emit_attachment_indexes(self.emit_attachment_indexes)
            .emit_metadata_indexes(self.emit_metadata_indexes)
            .repeat_channels(self.repeat_channels)
            .repeat_schemas(self.repeat_schemas)
    }
}
