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

// Configuration module for vizlog
//
// Provides:
// - YAML configuration file loading
// - Environment variable substitution
// - Configuration validation
// - Default values

mod loader;
pub mod types;

pub use loader::ConfigLoader;
pub use types::*;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context as _, Result};

use crate::websocket::TlsIdentity;
use crate::{Context, WebSocketServer};

/// Load configuration from a YAML file
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<VizlogConfig> {
    ConfigLoader::load(path).context("Failed to load configuration")
}

/// Load configuration with environment variable overrides
pub fn load_config_with_env<P: AsRef<Path>>(path: P) -> Result<VizlogConfig> {
    let mut config = load_config(path)?;

    // Allow environment variables to override config values
    if let Ok(host) = std::env::var("VIZLOG_HOST") {
        config.server.host = host;
    }

    if let Ok(port) = std::env::var("VIZLOG_PORT") {
        config.server.port = port
            .parse()
            .with_context(|| format!("VIZLOG_PORT is not a valid port: {port}"))?;
    }

    if let Ok(output) = std::env::var("VIZLOG_OUTPUT") {
        config.recording.output = output;
    }

    Ok(config)
}

impl VizlogConfig {
    /// Server builder for the configured server, serving `context`.
    pub fn server_builder(&self, context: &Arc<Context>) -> Result<WebSocketServer> {
        let server = &self.server;
        let mut builder = WebSocketServer::new()
            .name(&server.name)
            .bind(&server.host, server.port)
            .capabilities(server.capabilities.iter().copied())
            .supported_encodings(&server.supported_encodings)
            .topic_allowlist(&server.topic_allowlist)
            .client_topic_allowlist(&server.client_topic_allowlist)
            .parameter_allowlist(&server.parameter_allowlist)
            .service_allowlist(&server.service_allowlist)
            .asset_uri_allowlist(&server.asset_uri_allowlist)
            .message_backlog_bytes(server.message_backlog_bytes)
            .control_backlog(server.control_backlog)
            .include_hidden(self.bridge.include_hidden)
            .ignore_unresponsive_param_nodes(self.bridge.ignore_unresponsive_param_nodes)
            .context(context);
        if let Some(session_id) = &server.session_id {
            builder = builder.session_id(session_id);
        }
        if let (Some(cert), Some(key)) = (&server.tls_cert, &server.tls_key) {
            let identity = TlsIdentity::from_files(cert, key).context("Failed to load TLS identity")?;
            builder = builder.tls(identity);
        }
        Ok(builder)
    }
}
