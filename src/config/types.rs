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

// Configuration types for vizlog

use serde::{Deserialize, Serialize};

use crate::mcap_writer::{CompressionLevel, CompressionType, McapWriteOptions, DEFAULT_CHUNK_SIZE};
use crate::websocket::Capability;
use crate::websocket_server::{
    DEFAULT_CONTROL_BACKLOG, DEFAULT_HOST, DEFAULT_MESSAGE_BACKLOG_BYTES, DEFAULT_PORT,
};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct VizlogConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub bridge: BridgeConfig,
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Live streaming server settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_server_name")]
    pub name: String,

    #[serde(default = "default_host")]
    pub host: String,

    /// 0 picks a free port.
    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_capabilities")]
    pub capabilities: Vec<Capability>,

    #[serde(default = "default_supported_encodings")]
    pub supported_encodings: Vec<String>,

    /// Random when unset.
    #[serde(default)]
    pub session_id: Option<String>,

    /// PEM certificate chain; requires `tls_key`.
    #[serde(default)]
    pub tls_cert: Option<String>,

    /// PEM private key; requires `tls_cert`.
    #[serde(default)]
    pub tls_key: Option<String>,

    #[serde(default)]
    pub topic_allowlist: Vec<String>,

    #[serde(default)]
    pub client_topic_allowlist: Vec<String>,

    #[serde(default)]
    pub parameter_allowlist: Vec<String>,

    #[serde(default)]
    pub service_allowlist: Vec<String>,

    #[serde(default)]
    pub asset_uri_allowlist: Vec<String>,

    #[serde(default = "default_message_backlog_bytes")]
    pub message_backlog_bytes: usize,

    #[serde(default = "default_control_backlog")]
    pub control_backlog: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            name: default_server_name(),
            host: default_host(),
            port: default_port(),
            capabilities: default_capabilities(),
            supported_encodings: default_supported_encodings(),
            session_id: None,
            tls_cert: None,
            tls_key: None,
            topic_allowlist: Vec::new(),
            client_topic_allowlist: Vec::new(),
            parameter_allowlist: Vec::new(),
            service_allowlist: Vec::new(),
            asset_uri_allowlist: Vec::new(),
            message_backlog_bytes: default_message_backlog_bytes(),
            control_backlog: default_control_backlog(),
        }
    }
}

impl ServerConfig {
    /// Every allowlist, with the option name it came from.
    pub fn allowlists(&self) -> [(&'static str, &[String]); 5] {
        [
            ("topic_allowlist", &self.topic_allowlist),
            ("client_topic_allowlist", &self.client_topic_allowlist),
            ("parameter_allowlist", &self.parameter_allowlist),
            ("service_allowlist", &self.service_allowlist),
            ("asset_uri_allowlist", &self.asset_uri_allowlist),
        ]
    }
}

/// Settings shared with bridge nodes feeding the server
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default = "default_min_qos_depth")]
    pub min_qos_depth: usize,

    #[serde(default = "default_max_qos_depth")]
    pub max_qos_depth: usize,

    /// Worker threads of the shared runtime; 0 is one per core.
    #[serde(default)]
    pub num_threads: usize,

    #[serde(default)]
    pub include_hidden: bool,

    #[serde(default)]
    pub ignore_unresponsive_param_nodes: bool,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            min_qos_depth: default_min_qos_depth(),
            max_qos_depth: default_max_qos_depth(),
            num_threads: 0,
            include_hidden: false,
            ignore_unresponsive_param_nodes: false,
        }
    }
}

impl BridgeConfig {
    /// Clamps a subscription queue depth to the configured bounds.
    pub fn clamp_qos_depth(&self, depth: usize) -> usize {
        depth.clamp(self.min_qos_depth, self.max_qos_depth)
    }
}

/// MCAP recording settings
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecordingConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_output")]
    pub output: String,

    #[serde(default)]
    pub truncate: bool,

    #[serde(default)]
    pub profile: String,

    #[serde(default = "default_chunk_size")]
    pub chunk_size: u64,

    #[serde(default)]
    pub compression: CompressionType,

    /// 0 (fastest) to 4 (smallest).
    #[serde(default = "default_compression_level")]
    pub compression_level: u8,

    #[serde(default = "default_true")]
    pub use_chunks: bool,

    #[serde(default = "default_true")]
    pub emit_statistics: bool,

    #[serde(default = "default_true")]
    pub emit_summary_offsets: bool,

    #[serde(default = "default_true")]
    pub emit_message_indexes: bool,

    #[serde(default = "default_true")]
    pub emit_chunk_indexes: bool,

    #[serde(default = "default_true")]
    pub emit_attachment_indexes: bool,

    #[serde(default = "default_true")]
    pub emit_metadata_indexes: bool,
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            output: default_output(),
            truncate: false,
            profile: String::new(),
            chunk_size: default_chunk_size(),
            compression: CompressionType::default(),
            compression_level: default_compression_level(),
            use_chunks: true,
            emit_statistics: true,
            emit_summary_offsets: true,
            emit_message_indexes: true,
            emit_chunk_indexes: true,
            emit_attachment_indexes: true,
            emit_metadata_indexes: true,
        }
    }
}

impl RecordingConfig {
    pub fn write_options(&self) -> McapWriteOptions {
        McapWriteOptions {
            profile: self.profile.clone(),
            chunk_size: self.chunk_size,
            compression: self.compression,
            compression_level: CompressionLevel::from_level(self.compression_level)
                .unwrap_or_default(),
            use_chunks: self.use_chunks,
            emit_statistics: self.emit_statistics,
            emit_summary_offsets: self.emit_summary_offsets,
            emit_message_indexes: self.emit_message_indexes,
            emit_chunk_indexes: self.emit_chunk_indexes,
            emit_attachment_indexes: self.emit_attachment_indexes,
            emit_metadata_indexes: self.emit_metadata_indexes,
            truncate: self.truncate,
            ..McapWriteOptions::default()
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String, // "trace", "debug", "info", "warn", "error"

    #[serde(default = "default_log_format")]
    pub format: String, // "text", "json"
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

// Default value functions
fn default_server_name() -> String { "vizlog".to_string() }
fn default_host() -> String { DEFAULT_HOST.to_string() }
fn default_port() -> u16 { DEFAULT_PORT }
fn default_capabilities() -> Vec<Capability> { vec![Capability::Time] }
fn default_supported_encodings() -> Vec<String> { vec!["json".to_string()] }
fn default_message_backlog_bytes() -> usize { DEFAULT_MESSAGE_BACKLOG_BYTES }
fn default_control_backlog() -> usize { DEFAULT_CONTROL_BACKLOG }
fn default_min_qos_depth() -> usize { 1 }
fn default_max_qos_depth() -> usize { 25 }
fn default_output() -> String { "vizlog.mcap".to_string() }
fn default_chunk_size() -> u64 { DEFAULT_CHUNK_SIZE }
fn default_compression_level() -> u8 { 2 }
fn default_true() -> bool { true }
fn default_log_level() -> String { "info".to_string() }
fn default_log_format() -> String { "text".to_string() }
