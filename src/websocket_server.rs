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

// WebSocket server builder and handle

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::net::{SocketAddr, ToSocketAddrs};
use std::sync::Arc;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::channel::ChannelDescriptor;
use crate::runtime::get_runtime_handle;
use crate::sink_channel_filter::{SinkChannelFilter, SinkChannelFilterFn};
use crate::websocket::server::{Server, ServerOptions};
use crate::websocket::{
    AssetHandler, Capability, Client, ClientLimits, ConnectionGraph, Parameter, ServerListener,
    Service, Status, TlsIdentity,
};
use crate::{Context, Error};

pub const DEFAULT_HOST: &str = "127.0.0.1";
pub const DEFAULT_PORT: u16 = 8765;
/// Per-client byte ceiling of queued data messages.
pub const DEFAULT_MESSAGE_BACKLOG_BYTES: usize = 10 * 1024 * 1024;
/// Per-client limit of queued control messages.
pub const DEFAULT_CONTROL_BACKLOG: usize = 1024;
/// Per-client limit of concurrent service calls.
pub const DEFAULT_SERVICE_CALL_LIMIT: usize = 32;

const APP_URL: &str = "https://app.foxglove.dev/";

/// Builder for a live visualization server
///
/// ```no_run
/// # async fn run() -> Result<(), vizlog::Error> {
/// let server = vizlog::WebSocketServer::new()
///     .name("robot")
///     .bind("0.0.0.0", 8765)
///     .start()
///     .await?;
/// println!("open {}", server.app_url());
/// server.stop().wait().await;
/// # Ok(())
/// # }
/// ```
#[must_use]
pub struct WebSocketServer {
    host: String,
    port: u16,
    options: ServerOptions,
    context: Arc<Context>,
    runtime: Option<Handle>,
}

impl Default for WebSocketServer {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            options: ServerOptions {
                name: String::new(),
                session_id: Some(uuid::Uuid::new_v4().to_string()),
                capabilities: Vec::new(),
                supported_encodings: Vec::new(),
                metadata: BTreeMap::new(),
                listener: None,
                fetch_asset_handler: None,
                services: Vec::new(),
                tls: None,
                limits: ClientLimits {
                    message_backlog_bytes: DEFAULT_MESSAGE_BACKLOG_BYTES,
                    control_backlog: DEFAULT_CONTROL_BACKLOG,
                    service_call_limit: DEFAULT_SERVICE_CALL_LIMIT,
                },
                include_hidden: false,
                ignore_unresponsive_param_nodes: false,
                topic_allowlist: Vec::new(),
                client_topic_allowlist: Vec::new(),
                parameter_allowlist: Vec::new(),
                service_allowlist: Vec::new(),
                asset_uri_allowlist: Vec::new(),
                channel_filter: None,
            },
            context: Context::get_default(),
            runtime: None,
        }
    }
}

fn strings<I, S>(values: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    values.into_iter().map(Into::into).collect()
}

impl WebSocketServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Name reported to clients.
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.options.name = name.into();
        self
    }

    /// Host and port to listen on. Port 0 picks a free port.
    pub fn bind(mut self, host: impl Into<String>, port: u16) -> Self {
        self.host = host.into();
        self.port = port;
        self
    }

    pub fn capabilities(mut self, capabilities: impl IntoIterator<Item = Capability>) -> Self {
        for capability in capabilities {
            if !self.options.capabilities.contains(&capability) {
                self.options.capabilities.push(capability);
            }
        }
        self
    }

    /// Encodings accepted from publishing clients and for service requests.
    pub fn supported_encodings<I, S>(mut self, encodings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.supported_encodings = strings(encodings);
        self
    }

    /// Session ID reported to clients. Defaults to a random UUID.
    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.options.session_id = Some(session_id.into());
        self
    }

    /// Free-form metadata reported to clients in the server info.
    pub fn server_metadata(mut self, metadata: BTreeMap<String, String>) -> Self {
        self.options.metadata = metadata;
        self
    }

    pub fn tls(mut self, identity: TlsIdentity) -> Self {
        self.options.tls = Some(identity);
        self
    }

    pub fn listener(mut self, listener: Arc<dyn ServerListener>) -> Self {
        self.options.listener = Some(listener);
        self
    }

    /// Services available at startup. Adds the services capability.
    pub fn services(mut self, services: impl IntoIterator<Item = Service>) -> Self {
        self.options.services.extend(services);
        self.capabilities([Capability::Services])
    }

    /// Handler for `fetchAsset` requests. Adds the assets capability.
    pub fn fetch_asset_handler(mut self, handler: impl AssetHandler) -> Self {
        self.options.fetch_asset_handler = Some(Arc::new(handler));
        self.capabilities([Capability::Assets])
    }

    /// Regexes of the topics advertised to clients.
    pub fn topic_allowlist<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.topic_allowlist = strings(patterns);
        self
    }

    /// Regexes of the topics clients may publish on.
    pub fn client_topic_allowlist<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.client_topic_allowlist = strings(patterns);
        self
    }

    pub fn parameter_allowlist<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.parameter_allowlist = strings(patterns);
        self
    }

    pub fn service_allowlist<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.service_allowlist = strings(patterns);
        self
    }

    pub fn asset_uri_allowlist<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.asset_uri_allowlist = strings(patterns);
        self
    }

    /// Filter applied to every client on top of the topic allowlist.
    pub fn channel_filter(mut self, filter: Arc<dyn SinkChannelFilter>) -> Self {
        self.options.channel_filter = Some(filter);
        self
    }

    pub fn channel_filter_fn<F>(self, filter: F) -> Self
    where
        F: Fn(&ChannelDescriptor<'_>) -> bool + Send + Sync + 'static,
    {
        self.channel_filter(Arc::new(SinkChannelFilterFn::new(filter)))
    }

    /// Bytes of data messages queued per client before new ones are dropped.
    pub fn message_backlog_bytes(mut self, bytes: usize) -> Self {
        self.options.limits.message_backlog_bytes = bytes;
        self
    }

    /// Control messages queued per client before it is disconnected.
    pub fn control_backlog(mut self, messages: usize) -> Self {
        self.options.limits.control_backlog = messages;
        self
    }

    pub fn service_call_limit(mut self, calls: usize) -> Self {
        self.options.limits.service_call_limit = calls;
        self
    }

    /// Advertise hidden topics, those with a path segment starting with `_`.
    pub fn include_hidden(mut self, include: bool) -> Self {
        self.options.include_hidden = include;
        self
    }

    /// Only log, rather than report to the client, parameter callbacks that fail.
    pub fn ignore_unresponsive_param_nodes(mut self, ignore: bool) -> Self {
        self.options.ignore_unresponsive_param_nodes = ignore;
        self
    }

    /// Context whose channels are served. Defaults to the global context.
    pub fn context(mut self, context: &Arc<Context>) -> Self {
        self.context = context.clone();
        self
    }

    /// Runtime the server tasks are spawned on.
    pub fn runtime(mut self, handle: &Handle) -> Self {
        self.runtime = Some(handle.clone());
        self
    }

    /// Starts the server on the current runtime, unless one was configured.
    pub async fn start(self) -> Result<WebSocketServerHandle, Error> {
        self.start_inner()
    }

    /// Starts the server from synchronous code.
    pub fn start_blocking(self) -> Result<WebSocketServerHandle, Error> {
        self.start_inner()
    }

    fn start_inner(self) -> Result<WebSocketServerHandle, Error> {
        let runtime = match self.runtime {
            Some(handle) => handle,
            None => get_runtime_handle()?,
        };
        let addr = resolve(&self.host, self.port)?;
        let tls = self.options.tls.is_some();
        let server = Server::new(self.options, &self.context, runtime)?;
        let local_addr = server.start(addr)?;
        Ok(WebSocketServerHandle {
            server,
            local_addr,
            tls,
        })
    }
}

fn resolve(host: &str, port: u16) -> Result<SocketAddr, Error> {
    (host, port)
        .to_socket_addrs()
        .map_err(Error::Bind)?
        .next()
        .ok_or_else(|| Error::ConfigurationError(format!("cannot resolve host {host}")))
}

/// Handle to a running server
pub struct WebSocketServerHandle {
    server: Arc<Server>,
    local_addr: SocketAddr,
    tls: bool,
}

impl WebSocketServerHandle {
    /// Port the server is listening on.
    pub fn port(&self) -> u16 {
        self.local_addr.port()
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL opening this server in the Foxglove web app.
    pub fn app_url(&self) -> String {
        let scheme = if self.tls { "wss" } else { "ws" };
        let host = if self.local_addr.ip().is_unspecified() {
            "localhost".to_string()
        } else {
            self.local_addr.ip().to_string()
        };
        let host = if self.local_addr.is_ipv6() && host != "localhost" {
            format!("[{host}]")
        } else {
            host
        };
        let ws_url = format!("{scheme}://{host}:{}", self.port());
        format!(
            "{APP_URL}?ds=foxglove-websocket&ds.url={}",
            percent_encode(&ws_url)
        )
    }

    /// Sends parameter values to the clients subscribed to them.
    pub fn publish_parameter_values(&self, parameters: Vec<Parameter>) {
        if !self.server.has_capability(Capability::Parameters) {
            warn!("Server does not support parameters capability");
            return;
        }
        self.server.broadcast_parameter_values(&parameters);
    }

    /// Sends a status message to every client.
    pub fn publish_status(&self, status: Status) {
        self.server.publish_status(status);
    }

    /// Removes status messages by ID from every client.
    pub fn remove_status(&self, status_ids: Vec<String>) {
        self.server.remove_status(status_ids);
    }

    pub fn add_services(&self, services: impl IntoIterator<Item = Service>) -> Result<(), Error> {
        self.server.add_services(services.into_iter().collect())
    }

    pub fn remove_services<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.server.remove_services(names);
    }

    /// Replaces the connection graph, sending the changes to subscribed clients.
    pub fn publish_connection_graph(&self, graph: ConnectionGraph) -> Result<(), Error> {
        self.server.publish_connection_graph(graph)
    }

    /// Broadcasts the server time, in nanoseconds.
    pub fn broadcast_time(&self, timestamp_nanos: u64) {
        self.server.broadcast_time(timestamp_nanos);
    }

    /// Snapshot of the connected clients.
    pub fn clients(&self) -> Vec<Client> {
        self.server.clients()
    }

    /// Stops the server, closing every client without flushing queued messages.
    pub fn stop(self) -> ShutdownHandle {
        self.shutdown(false)
    }

    /// Stops the server after flushing each client's queued messages.
    pub(crate) fn drain(self) -> ShutdownHandle {
        self.shutdown(true)
    }

    fn shutdown(self, drain: bool) -> ShutdownHandle {
        let task = self.server.stop(drain);
        ShutdownHandle {
            task,
            runtime: self.server.runtime().clone(),
        }
    }
}

/// Completes when every connection of a stopped server has closed
#[must_use]
pub struct ShutdownHandle {
    task: Option<JoinHandle<()>>,
    runtime: Handle,
}

impl ShutdownHandle {
    pub async fn wait(self) {
        if let Some(task) = self.task {
            if let Err(e) = task.await {
                warn!("Server task failed: {}", e);
            }
        }
    }

    /// Blocks until shutdown completes. Panics if called from async code.
    pub fn wait_blocking(self) {
        let runtime = self.runtime.clone();
        runtime.block_on(self.wait());
    }
}

fn percent_encode(value: &str) -> String {
    let mut out = String::with_capacity(value.len() * 3);
    for byte in value.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(byte as char)
            }
            _ => {
                let _ = write!(out, "%{byte:02X}");
            }
        }
    }
    out
}
