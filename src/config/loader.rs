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

// Configuration loader with environment variable substitution

use std::path::Path;

use anyhow::{bail, Context, Result};
use regex::Regex;

use super::types::*;

pub struct ConfigLoader;

impl ConfigLoader {
    /// Load configuration from file with environment variable substitution
    pub fn load<P: AsRef<Path>>(path: P) -> Result<VizlogConfig> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file {}", path.as_ref().display()))?;
        Self::parse(&content)
    }

    /// Parse configuration from a YAML string
    pub fn parse(content: &str) -> Result<VizlogConfig> {
        let content = Self::substitute_env_vars(content)?;

        let config: VizlogConfig =
            serde_yaml::from_str(&content).context("Failed to parse YAML configuration")?;

        Self::validate(&config)?;

        Ok(config)
    }

    /// Substitute ${VAR} and ${VAR:-default} patterns with environment variables
    ///
    /// Examples:
    /// - ${HOME} -> /home/user
    /// - ${VIZLOG_NAME:-robot} -> robot (if VIZLOG_NAME not set)
    fn substitute_env_vars(content: &str) -> Result<String> {
        let re = Regex::new(r"\$\{([^}:]+)(?::-([^}]*))?\}")?;

        let substituted = re.replace_all(content, |caps: &regex::Captures| {
            let var_name = &caps[1];
            match std::env::var(var_name) {
                Ok(value) => value,
                Err(_) => match caps.get(2) {
                    Some(default) => default.as_str().to_string(),
                    // Keep original if no default and var not found
                    None => format!("${{{}}}", var_name),
                },
            }
        });
        Ok(substituted.into_owned())
    }

    /// Validate configuration
    fn validate(config: &VizlogConfig) -> Result<()> {
        let server = &config.server;
        if server.tls_cert.is_some() != server.tls_key.is_some() {
            bail!("server.tls_cert and server.tls_key must be set together");
        }

        for (name, patterns) in server.allowlists() {
            for pattern in patterns {
                Regex::new(&format!("^(?:{pattern})$"))
                    .with_context(|| format!("server.{name} has an invalid pattern '{pattern}'"))?;
            }
        }

        if server.control_backlog == 0 {
            bail!("server.control_backlog must be > 0");
        }

        let bridge = &config.bridge;
        if bridge.min_qos_depth < 1 {
            bail!("bridge.min_qos_depth must be >= 1");
        }
        if bridge.min_qos_depth > bridge.max_qos_depth {
            bail!(
                "bridge.min_qos_depth ({}) must not exceed bridge.max_qos_depth ({})",
                bridge.min_qos_depth,
                bridge.max_qos_depth
            );
        }

        let recording = &config.recording;
        if recording.chunk_size == 0 {
            bail!("recording.chunk_size must be > 0");
        }

        if recording.compression_level > 4 {
            bail!("recording.compression_level must be 0-4");
        }

        if recording.enabled && recording.output.is_empty() {
            bail!("recording.output cannot be empty");
        }

        Ok(())
    }
}
