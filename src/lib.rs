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

// vizlog: structured, time-stamped logging with multiple sinks
//
// Messages are logged to channels, which belong to a context. The context
// fans each message out to every attached sink:
// - MCAP files, written in compressed, indexed chunks
// - a live WebSocket server for visualization clients
// - a cloud sink that serves a co-located agent process
//
// Sinks can filter channels, and slow consumers never block the caller.

pub mod channel;
mod channel_builder;
pub mod cloud_sink;
pub mod config;
mod context;
mod encode;
#[doc(hidden)]
pub mod log_macro;
mod log_sink_set;
pub mod mcap_writer;
mod metadata;
pub mod runtime;
mod schema;
mod sink;
mod sink_channel_filter;
#[doc(hidden)]
pub mod testutil;
mod throttler;
pub mod websocket;
mod websocket_server;

// Re-export main types
pub use channel::{
    Channel, ChannelDescriptor, ChannelId, LazyChannel, LazyRawChannel, RawChannel,
};
pub use channel_builder::{create_channel, ChannelBuilder, SchemaBytes};
pub use cloud_sink::{CloudSink, CloudSinkHandle};
pub use config::{load_config, load_config_with_env, VizlogConfig};
pub use context::{Context, LazyContext};
pub use encode::{Encode, JsonMessage};
pub use mcap_writer::{McapWriteOptions, McapWriter, McapWriterHandle};
pub use metadata::{nanoseconds_since_epoch, Metadata, PartialMetadata, ToUnixNanos};
pub use schema::Schema;
pub use sink::{Sink, SinkId};
pub use sink_channel_filter::{SinkChannelFilter, SinkChannelFilterFn};
pub use websocket_server::{ShutdownHandle, WebSocketServer, WebSocketServerHandle};

/// Errors returned by the logging core, the sinks and the servers
#[derive(thiserror::Error, Debug)]
#[non_exhaustive]
pub enum Error {
    /// An unspecified error.
    #[error("{0}")]
    Unspecified(String),
    /// A value was out of range or otherwise invalid.
    #[error("Value error: {0}")]
    ValueError(String),
    /// An input was not valid UTF-8.
    #[error("Invalid UTF-8: {0}")]
    Utf8Error(String),
    /// The sink was closed and no longer accepts writes.
    #[error("Sink closed")]
    SinkClosed,
    /// A schema must be provided for this operation.
    #[error("Schema is required")]
    SchemaRequired,
    /// A message encoding must be provided for the channel.
    #[error("Message encoding is required")]
    MessageEncodingRequired,
    /// The server was already started.
    #[error("Server already started")]
    ServerAlreadyStarted,
    /// Failed to bind the listening socket.
    #[error("Failed to bind port: {0}")]
    Bind(std::io::Error),
    /// A service with the same name is already registered.
    #[error("Service {0} has already been registered")]
    DuplicateService(String),
    /// Neither the service nor the server declares a request encoding.
    #[error("Neither service {0} nor the server declared a supported request encoding")]
    MissingRequestEncoding(String),
    /// The server was not started with the services capability.
    #[error("Services are not supported on server with this configuration")]
    ServicesNotSupported,
    /// The server was not started with the connection graph capability.
    #[error("Connection graph is not supported on server with this configuration")]
    ConnectionGraphNotSupported,
    /// An I/O error.
    #[error(transparent)]
    IoError(#[from] std::io::Error),
    /// The MCAP writer failed.
    #[error(transparent)]
    McapError(#[from] mcap::McapError),
    /// A message could not be encoded.
    #[error("Encoding error: {0}")]
    EncodeError(String),
    /// The caller-provided buffer cannot hold the encoded message.
    #[error("Buffer too short: {required} bytes required")]
    BufferTooShort { required: usize },
    /// A base64 payload could not be decoded.
    #[error("Base64 decoding error: {0}")]
    Base64DecodeError(#[from] base64::DecodeError),
    /// Invalid server or writer configuration.
    #[error("Configuration error: {0}")]
    ConfigurationError(String),
}

impl From<std::str::Utf8Error> for Error {
    fn from(err: std::str::Utf8Error) -> Self {
        Error::Utf8Error(err.to_string())
    }
}

impl From<std::string::FromUtf8Error> for Error {
    fn from(err: std::string::FromUtf8Error) -> Self {
        Error::Utf8Error(err.to_string())
    }
}
