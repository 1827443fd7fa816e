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
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use anyhow::{Context as _, Result};
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use vizlog::config::{load_config_with_env, LoggingConfig, VizlogConfig};
use vizlog::runtime::build_runtime;
use vizlog::websocket::Capability;
use vizlog::{nanoseconds_since_epoch, Channel, Context, JsonMessage, McapWriter};

const HEARTBEAT_TOPIC: &str = "/vizlog/heartbeat";
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(1);

/// vizlog - Structured logging to MCAP files and live visualization clients
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run a WebSocket server, optionally recording to an MCAP file
    Serve {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/default.yaml")]
        config: PathBuf,

        /// Port to listen on (overrides config file)
        #[arg(short, long)]
        port: Option<u16>,
    },
    /// Print a summary of an MCAP file
    Info {
        /// MCAP file to inspect
        file: PathBuf,
    },
}

#[derive(Serialize)]
struct Heartbeat {
    seq: u64,
    uptime_ms: u64,
}

fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Command::Serve { config, port } => {
            let mut vizlog_config = load_config_with_env(&config)?;
            if let Some(port) = port {
                vizlog_config.server.port = port;
            }
            init_tracing(&vizlog_config.logging)?;
            info!("Loaded configuration from: {:?}", config);

            let runtime = build_runtime(vizlog_config.bridge.num_threads)?;
            runtime.block_on(serve(vizlog_config))
        }
        Command::Info { file } => print_info(&file),
    }
}

/// Installs the global subscriber. `RUST_LOG` takes precedence over the configured level.
fn init_tracing(logging: &LoggingConfig) -> Result<()> {
    let filter = match std::env::var("RUST_LOG") {
        Ok(directives) => EnvFilter::try_new(directives).context("Invalid RUST_LOG")?,
        Err(_) => EnvFilter::try_new(logging.level.to_lowercase())
            .with_context(|| format!("Invalid log level '{}'", logging.level))?,
    };
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to install tracing subscriber: {e}"))
}

async fn serve(config: VizlogConfig) -> Result<()> {
    let context = Context::get_default();

    let recording = if config.recording.enabled {
        let handle = McapWriter::with_options(config.recording.write_options())
            .context(&context)
            .create_new_buffered_file(&config.recording.output)
            .with_context(|| format!("Failed to create {}", config.recording.output))?;
        Some(handle)
    } else {
        None
    };

    let server = config
        .server_builder(&context)?
        .start()
        .await
        .context("Failed to start WebSocket server")?;
    info!("Server listening on port {}", server.port());
    info!("Open in Foxglove: {}", server.app_url());

    let heartbeat: Channel<JsonMessage<Heartbeat>> = context
        .channel_builder(HEARTBEAT_TOPIC)
        .build()
        .context("Failed to create heartbeat channel")?;
    let broadcast_time = config.server.capabilities.contains(&Capability::Time);

    let started = Instant::now();
    let mut ticker = tokio::time::interval(HEARTBEAT_INTERVAL);
    let mut seq = 0;
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                heartbeat.log(&JsonMessage(Heartbeat {
                    seq,
                    uptime_ms: started.elapsed().as_millis() as u64,
                }));
                seq += 1;
                if broadcast_time {
                    server.broadcast_time(nanoseconds_since_epoch());
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Received Ctrl+C, shutting down");
                break;
            }
        }
    }

    heartbeat.close();
    server.stop().wait().await;
    if let Some(recording) = recording {
        if let Err(e) = recording.close() {
            warn!("Failed to finish recording: {}", e);
        } else {
            info!("Recording written to {}", config.recording.output);
        }
    }
    info!("vizlog shut down successfully");
    Ok(())
}

fn format_time(nanos: u64) -> String {
    let secs = (nanos / 1_000_000_000) as i64;
    let subsec = (nanos % 1_000_000_000) as u32;
    match DateTime::<Utc>::from_timestamp(secs, subsec) {
        Some(time) => format!("{} ({nanos})", time.to_rfc3339()),
        None => nanos.to_string(),
    }
}

fn print_info(path: &Path) -> Result<()> {
    let data = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
    let summary = mcap::Summary::read(&data)
        .context("Failed to read MCAP summary")?
        .context("File has no summary section")?;

    println!("file:        {}", path.display());
    if let Some(stats) = &summary.stats {
        println!("messages:    {}", stats.message_count);
        println!("chunks:      {}", stats.chunk_count);
        println!("attachments: {}", stats.attachment_count);
        println!("metadata:    {}", stats.metadata_count);
        if stats.message_count > 0 {
            println!("start:       {}", format_time(stats.message_start_time));
            println!("end:         {}", format_time(stats.message_end_time));
            let duration = stats.message_end_time - stats.message_start_time;
            println!("duration:    {:.3}s", duration as f64 / 1e9);
        }
    }

    let counts: BTreeMap<u16, u64> = summary
        .stats
        .as_ref()
        .map(|stats| stats.channel_message_counts.clone())
        .unwrap_or_default();
    let mut channels: Vec<_> = summary.channels.values().collect();
    channels.sort_by_key(|channel| channel.id);
    println!("channels:");
    for channel in channels {
        let schema = channel
            .schema
            .as_ref()
            .map(|schema| format!("{} [{}]", schema.name, schema.encoding))
            .unwrap_or_else(|| "no schema".to_string());
        println!(
            "  ({}) {:<32} {:>8} msgs  {:<10} {}",
            channel.id,
            channel.topic,
            counts.get(&channel.id).copied().unwrap_or(0),
            channel.message_encoding,
            schema
        );
    }

    let mut schemas: Vec<_> = summary.schemas.values().collect();
    schemas.sort_by_key(|schema| schema.id);
    println!("schemas:");
    for schema in schemas {
        println!(
            "  ({}) {} [{}] {} bytes",
            schema.id,
            schema.name,
            schema.encoding,
            schema.data.len()
        );
    }

    if !summary.metadata_indexes.is_empty() {
        println!("metadata records:");
        for index in &summary.metadata_indexes {
            println!("  {} ({} bytes)", index.name, index.length);
        }
    }
    if !summary.attachment_indexes.is_empty() {
        println!("attachments:");
        for index in &summary.attachment_indexes {
            println!("  {} [{}] {} bytes", index.name, index.media_type, index.data_size);
        }
    }
    Ok(())
}
