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

// Server state shared by all connections

use std::collections::{BTreeMap, HashMap, HashSet};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpListener, TcpStream};
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::{JoinHandle, JoinSet};
use tokio_rustls::TlsAcceptor;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, error, info, warn};

use super::allowlist::{Allowlist, ServerChannelFilter};
use super::client::{Client, ClientId};
use super::connected_client::{ClientLimits, ConnectedClient, ShutdownReason};
use super::connection_graph::ConnectionGraph;
use super::fetch_asset::AssetHandler;
use super::handshake::do_handshake;
use super::listener::ServerListener;
use super::protocol::{
    self, AdvertiseServices, AdvertisedService, Parameter, ServerBinaryMessage, ServerInfo,
    ServerMessage, Status,
};
use super::service::{Service, ServiceId};
use super::tls::{build_acceptor, TlsIdentity};
use super::Capability;
use crate::sink::Sink;
use crate::sink_channel_filter::SinkChannelFilter;
use crate::{Context, Error};

/// Everything a server is configured with before it starts
pub(crate) struct ServerOptions {
    pub name: String,
    pub session_id: Option<String>,
    pub capabilities: Vec<Capability>,
    pub supported_encodings: Vec<String>,
    pub metadata: BTreeMap<String, String>,
    pub listener: Option<Arc<dyn ServerListener>>,
    pub fetch_asset_handler: Option<Arc<dyn AssetHandler>>,
    pub services: Vec<Service>,
    pub tls: Option<TlsIdentity>,
    pub limits: ClientLimits,
    pub include_hidden: bool,
    pub ignore_unresponsive_param_nodes: bool,
    pub topic_allowlist: Vec<String>,
    pub client_topic_allowlist: Vec<String>,
    pub parameter_allowlist: Vec<String>,
    pub service_allowlist: Vec<String>,
    pub asset_uri_allowlist: Vec<String>,
    pub channel_filter: Option<Arc<dyn SinkChannelFilter>>,
}

struct Allowlists {
    client_topics: Allowlist,
    parameters: Allowlist,
    services: Allowlist,
    asset_uris: Allowlist,
}

#[derive(Default)]
struct ConnectionGraphState {
    graph: ConnectionGraph,
    subscribers: HashSet<ClientId>,
}

pub(crate) struct Server {
    weak_self: Weak<Self>,
    started: AtomicBool,
    context: Weak<Context>,
    runtime: Handle,
    name: String,
    session_id: Option<String>,
    capabilities: Vec<Capability>,
    supported_encodings: Vec<String>,
    metadata: BTreeMap<String, String>,
    listener: Option<Arc<dyn ServerListener>>,
    fetch_asset_handler: Option<Arc<dyn AssetHandler>>,
    tls: Option<TlsIdentity>,
    limits: ClientLimits,
    ignore_unresponsive_param_nodes: bool,
    allowlists: Allowlists,
    channel_filter: Arc<ServerChannelFilter>,
    clients: DashMap<ClientId, Arc<ConnectedClient>>,
    services: RwLock<HashMap<ServiceId, Arc<Service>>>,
    connection_graph: Mutex<ConnectionGraphState>,
    /// Number of clients subscribed to each parameter
    parameter_subscribers: Mutex<HashMap<String, usize>>,
    shutdown: watch::Sender<Option<ShutdownReason>>,
    accept_task: Mutex<Option<JoinHandle<()>>>,
}

impl Server {
    pub(crate) fn new(
        options: ServerOptions,
        context: &Arc<Context>,
        runtime: Handle,
    ) -> Result<Arc<Self>, Error> {
        let allowlists = Allowlists {
            client_topics: Allowlist::new(&options.client_topic_allowlist)?,
            parameters: Allowlist::new(&options.parameter_allowlist)?,
            services: Allowlist::new(&options.service_allowlist)?,
            asset_uris: Allowlist::new(&options.asset_uri_allowlist)?,
        };
        let channel_filter = Arc::new(ServerChannelFilter::new(
            Allowlist::new(&options.topic_allowlist)?,
            options.include_hidden,
            options.channel_filter,
        ));
        let (shutdown, _) = watch::channel(None);
        let server = Arc::new_cyclic(|weak_self| Self {
            weak_self: weak_self.clone(),
            started: AtomicBool::new(false),
            context: Arc::downgrade(context),
            runtime,
            name: options.name,
            session_id: options.session_id,
            capabilities: options.capabilities,
            supported_encodings: options.supported_encodings,
            metadata: options.metadata,
            listener: options.listener,
            fetch_asset_handler: options.fetch_asset_handler,
            tls: options.tls,
            limits: options.limits,
            ignore_unresponsive_param_nodes: options.ignore_unresponsive_param_nodes,
            allowlists,
            channel_filter,
            clients: DashMap::new(),
            services: RwLock::default(),
            connection_graph: Mutex::default(),
            parameter_subscribers: Mutex::default(),
            shutdown,
            accept_task: Mutex::new(None),
        });
        if !options.services.is_empty() {
            server.register_services(options.services)?;
        }
        Ok(server)
    }

    /// Binds the listening socket and starts accepting connections.
    pub(crate) fn start(&self, addr: SocketAddr) -> Result<SocketAddr, Error> {
        if self.started.swap(true, Ordering::AcqRel) {
            return Err(Error::ServerAlreadyStarted);
        }
        let tls = self.tls.as_ref().map(build_acceptor).transpose()?;

        let std_listener = std::net::TcpListener::bind(addr).map_err(Error::Bind)?;
        std_listener.set_nonblocking(true).map_err(Error::Bind)?;
        let local_addr = std_listener.local_addr().map_err(Error::Bind)?;
        let listener = {
            let _guard = self.runtime.enter();
            TcpListener::from_std(std_listener).map_err(Error::Bind)?
        };

        let Some(server) = self.weak_self.upgrade() else {
            return Err(Error::Unspecified("server dropped".to_string()));
        };
        let task = self.runtime.spawn(server.accept_loop(listener, tls));
        *self.accept_task.lock() = Some(task);
        info!(
            "Started server '{}' on {}{}",
            self.name,
            local_addr,
            if self.tls.is_some() { " (TLS)" } else { "" }
        );
        Ok(local_addr)
    }

    async fn accept_loop(self: Arc<Self>, listener: TcpListener, tls: Option<TlsAcceptor>) {
        let mut shutdown = self.shutdown.subscribe();
        let mut connections = JoinSet::new();
        loop {
            if shutdown.borrow_and_update().is_some() {
                break;
            }
            tokio::select! {
                _ = shutdown.changed() => {}
                accepted = listener.accept() => match accepted {
                    Ok((stream, addr)) => {
                        connections.spawn(self.clone().handle_connection(stream, addr, tls.clone()));
                    }
                    Err(e) => warn!("Failed to accept connection: {}", e),
                },
                Some(_) = connections.join_next(), if !connections.is_empty() => {}
            }
        }
        drop(listener);
        while connections.join_next().await.is_some() {}
        info!("Server '{}' stopped", self.name);
    }

    async fn handle_connection(
        self: Arc<Self>,
        stream: TcpStream,
        addr: SocketAddr,
        tls: Option<TlsAcceptor>,
    ) {
        stream.set_nodelay(true).ok();
        match tls {
            Some(acceptor) => match acceptor.accept(stream).await {
                Ok(stream) => self.serve_client(stream, addr).await,
                Err(e) => debug!("TLS handshake with {} failed: {}", addr, e),
            },
            None => self.serve_client(stream, addr).await,
        }
    }

    async fn serve_client<S>(self: Arc<Self>, stream: S, addr: SocketAddr)
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let websocket = match do_handshake(stream).await {
            Ok(websocket) => websocket,
            Err(e) => {
                debug!("WebSocket handshake with {} failed: {}", addr, e);
                return;
            }
        };
        let Some(context) = self.context.upgrade() else {
            return;
        };

        let (client, queues) = ConnectedClient::new(
            &self,
            &context,
            self.channel_filter.clone(),
            addr,
            self.limits,
        );
        info!("Client {} connected", addr);

        // Server info goes first, then the channels the context advertises.
        client.send_control_message(&ServerMessage::ServerInfo(self.server_info()));
        self.clients.insert(client.client_id(), client.clone());
        context.add_sink(client.clone());
        drop(context);

        let services = self.service_advertisements(self.services.read().values());
        if !services.is_empty() {
            client.send_control_message(&ServerMessage::AdvertiseServices(AdvertiseServices {
                services,
            }));
        }
        // The server may have stopped while this client was connecting.
        if let Some(reason) = *self.shutdown.borrow() {
            client.shutdown(reason);
        }

        let reason = client.run(websocket, queues).await;
        debug!("Connection to {} closed: {:?}", addr, reason);
        self.remove_client(&client);
    }

    fn remove_client(&self, client: &Arc<ConnectedClient>) {
        self.clients.remove(&client.client_id());
        if let Some(context) = self.context.upgrade() {
            context.remove_sink(Sink::id(client.as_ref()));
        }
        client.on_disconnect(self);
    }

    fn server_info(&self) -> ServerInfo {
        ServerInfo {
            name: self.name.clone(),
            capabilities: self.capabilities.clone(),
            supported_encodings: self.supported_encodings.clone(),
            metadata: self.metadata.clone(),
            session_id: self.session_id.clone(),
        }
    }

    /// Stops accepting connections and closes every client.
    ///
    /// With `drain`, queued messages are flushed to each client before it is closed.
    pub(crate) fn stop(&self, drain: bool) -> Option<JoinHandle<()>> {
        let reason = if drain {
            ShutdownReason::Drain
        } else {
            ShutdownReason::ServerStopped
        };
        let first = self.shutdown.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
        if first {
            info!("Stopping server '{}'", self.name);
            for client in self.clients.iter() {
                client.shutdown(reason);
            }
        }
        self.accept_task.lock().take()
    }

    pub(crate) fn is_stopped(&self) -> bool {
        self.shutdown.borrow().is_some()
    }

    pub(crate) fn runtime(&self) -> &Handle {
        &self.runtime
    }

    pub(crate) fn has_capability(&self, capability: Capability) -> bool {
        self.capabilities.contains(&capability)
    }

    pub(crate) fn listener(&self) -> Option<&Arc<dyn ServerListener>> {
        self.listener.as_ref()
    }

    pub(crate) fn fetch_asset_handler(&self) -> Option<Arc<dyn AssetHandler>> {
        self.fetch_asset_handler.clone()
    }

    pub(crate) fn supported_encodings(&self) -> &[String] {
        &self.supported_encodings
    }

    pub(crate) fn ignore_unresponsive_param_nodes(&self) -> bool {
        self.ignore_unresponsive_param_nodes
    }

    pub(crate) fn client_topic_allowlist(&self) -> &Allowlist {
        &self.allowlists.client_topics
    }

    pub(crate) fn parameter_allowlist(&self) -> &Allowlist {
        &self.allowlists.parameters
    }

    pub(crate) fn asset_uri_allowlist(&self) -> &Allowlist {
        &self.allowlists.asset_uris
    }

    pub(crate) fn clients(&self) -> Vec<Client> {
        self.clients.iter().map(|c| c.client()).collect()
    }

    /// Sends a status message to every client.
    pub(crate) fn publish_status(&self, status: Status) {
        let message = protocol::json_message(&ServerMessage::Status(status));
        for client in self.clients.iter() {
            client.send_control(message.clone());
        }
    }

    /// Removes previously published status messages from every client.
    pub(crate) fn remove_status(&self, status_ids: Vec<String>) {
        if status_ids.is_empty() {
            return;
        }
        let message = protocol::json_message(&ServerMessage::RemoveStatus { status_ids });
        for client in self.clients.iter() {
            client.send_control(message.clone());
        }
    }

    /// Sends parameter values to the clients subscribed to them.
    pub(crate) fn broadcast_parameter_values(&self, parameters: &[Parameter]) {
        let parameters: Vec<Parameter> = parameters
            .iter()
            .filter(|p| self.allowlists.parameters.allows(&p.name))
            .cloned()
            .collect();
        if parameters.is_empty() {
            return;
        }
        for client in self.clients.iter() {
            client.send_parameter_values(&parameters);
        }
    }

    /// Counts new parameter subscriptions and returns the names that gained their
    /// first subscriber.
    pub(crate) fn subscribe_parameters(&self, names: Vec<String>) -> Vec<String> {
        let mut counts = self.parameter_subscribers.lock();
        names
            .into_iter()
            .filter(|name| {
                let count = counts.entry(name.clone()).or_insert(0);
                *count += 1;
                *count == 1
            })
            .collect()
    }

    /// Returns the names that lost their last subscriber.
    pub(crate) fn unsubscribe_parameters(&self, names: Vec<String>) -> Vec<String> {
        let mut counts = self.parameter_subscribers.lock();
        names
            .into_iter()
            .filter(|name| match counts.get_mut(name) {
                Some(count) if *count > 1 => {
                    *count -= 1;
                    false
                }
                Some(_) => {
                    counts.remove(name);
                    true
                }
                None => false,
            })
            .collect()
    }

    /// Registers a client for connection graph updates and sends it the current graph.
    ///
    /// Returns `None` if it was already subscribed, or whether it is the first subscriber.
    pub(crate) fn subscribe_connection_graph(&self, client: &ConnectedClient) -> Option<bool> {
        let mut state = self.connection_graph.lock();
        if !state.subscribers.insert(client.client_id()) {
            return None;
        }
        let update = state.graph.as_initial_update();
        if !update.is_empty() {
            client.send_control_message(&ServerMessage::ConnectionGraphUpdate(update));
        }
        Some(state.subscribers.len() == 1)
    }

    /// Returns `None` if the client was not subscribed, or whether it was the last subscriber.
    pub(crate) fn unsubscribe_connection_graph(&self, client_id: ClientId) -> Option<bool> {
        let mut state = self.connection_graph.lock();
        if !state.subscribers.remove(&client_id) {
            return None;
        }
        Some(state.subscribers.is_empty())
    }

    /// Replaces the connection graph and sends the difference to subscribed clients.
    pub(crate) fn publish_connection_graph(&self, graph: ConnectionGraph) -> Result<(), Error> {
        if !self.has_capability(Capability::ConnectionGraph) {
            return Err(Error::ConnectionGraphNotSupported);
        }
        let mut state = self.connection_graph.lock();
        let update = state.graph.diff(&graph);
        state.graph = graph;
        if update.is_empty() {
            return Ok(());
        }
        let message = protocol::json_message(&ServerMessage::ConnectionGraphUpdate(update));
        for client_id in &state.subscribers {
            if let Some(client) = self.clients.get(client_id) {
                client.send_control(message.clone());
            }
        }
        Ok(())
    }

    /// Sends the server's current time to every client.
    pub(crate) fn broadcast_time(&self, timestamp: u64) {
        if !self.has_capability(Capability::Time) {
            debug!("Ignoring time broadcast without time capability");
            return;
        }
        let message = Message::binary(ServerBinaryMessage::Time { timestamp }.encode());
        for client in self.clients.iter() {
            client.send_data(message.clone());
        }
    }

    pub(crate) fn get_service(&self, id: ServiceId) -> Option<Arc<Service>> {
        self.services.read().get(&id).cloned()
    }

    /// Adds services and advertises them to every client.
    ///
    /// Services excluded by the service allowlist are skipped. Fails without adding
    /// anything if a name is already taken or no request encoding can be determined.
    pub(crate) fn add_services(&self, services: Vec<Service>) -> Result<(), Error> {
        let added = self.register_services(services)?;
        let advertised = self.service_advertisements(added.iter());
        if advertised.is_empty() {
            return Ok(());
        }
        let message = protocol::json_message(&ServerMessage::AdvertiseServices(AdvertiseServices {
            services: advertised,
        }));
        for client in self.clients.iter() {
            client.send_control(message.clone());
        }
        Ok(())
    }

    fn register_services(&self, services: Vec<Service>) -> Result<Vec<Arc<Service>>, Error> {
        if !self.has_capability(Capability::Services) {
            return Err(Error::ServicesNotSupported);
        }
        let services: Vec<Service> = services
            .into_iter()
            .filter(|service| {
                let allowed = self.allowlists.services.allows(service.name());
                if !allowed {
                    warn!("Service '{}' is not in the service allowlist", service.name());
                }
                allowed
            })
            .collect();

        let mut table = self.services.write();
        let mut names: HashSet<&str> = table.values().map(|s| s.name()).collect();
        for service in &services {
            if !names.insert(service.name()) || table.contains_key(&service.id()) {
                return Err(Error::DuplicateService(service.name().to_string()));
            }
            if service.request_encoding().is_none() && self.supported_encodings.is_empty() {
                return Err(Error::MissingRequestEncoding(service.name().to_string()));
            }
        }
        drop(names);

        let added: Vec<Arc<Service>> = services.into_iter().map(Arc::new).collect();
        for service in &added {
            debug!("Registered service '{}' ({})", service.name(), service.id());
            table.insert(service.id(), service.clone());
        }
        Ok(added)
    }

    /// Removes services by name and unadvertises them from every client.
    pub(crate) fn remove_services<I, S>(&self, names: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names: HashSet<String> = names.into_iter().map(|n| n.as_ref().to_string()).collect();
        let service_ids: Vec<u32> = {
            let mut table = self.services.write();
            let ids: Vec<ServiceId> = table
                .values()
                .filter(|s| names.contains(s.name()))
                .map(|s| s.id())
                .collect();
            for id in &ids {
                table.remove(id);
            }
            ids.into_iter().map(u32::from).collect()
        };
        if service_ids.is_empty() {
            return;
        }
        let message = protocol::json_message(&ServerMessage::UnadvertiseServices { service_ids });
        for client in self.clients.iter() {
            client.send_control(message.clone());
        }
    }

    fn service_advertisements<'a>(
        &self,
        services: impl Iterator<Item = &'a Arc<Service>>,
    ) -> Vec<AdvertisedService> {
        services
            .filter_map(|service| match service.advertisement() {
                Ok(ad) => Some(ad),
                Err(e) => {
                    error!("Cannot advertise service '{}': {}", service.name(), e);
                    None
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::websocket::service::ServiceSchema;
    use crate::Schema;

    fn options() -> ServerOptions {
        ServerOptions {
            name: "test".to_string(),
            session_id: None,
            capabilities: vec![Capability::Services, Capability::ConnectionGraph],
            supported_encodings: vec![],
            metadata: BTreeMap::new(),
            listener: None,
            fetch_asset_handler: None,
            services: vec![],
            tls: None,
            limits: ClientLimits {
                message_backlog_bytes: 1024,
                control_backlog: 16,
                service_call_limit: 4,
            },
            include_hidden: false,
            ignore_unresponsive_param_nodes: false,
            topic_allowlist: vec![],
            client_topic_allowlist: vec![],
            parameter_allowlist: vec![],
            service_allowlist: vec![],
            asset_uri_allowlist: vec![],
            channel_filter: None,
        }
    }

    fn echo(name: &str) -> Service {
        let schema = ServiceSchema::new("echo")
            .with_request("json", Schema::new("Req", "jsonschema", b"{}".to_vec()));
        Service::builder(name, schema).handler_fn(|req| Ok::<_, String>(req.into_payload()))
    }

    #[tokio::test]
    async fn test_register_services() {
        let ctx = Context::new();
        let server = Server::new(options(), &ctx, Handle::current()).unwrap();
        server.add_services(vec![echo("/a"), echo("/b")]).unwrap();
        let err = server.add_services(vec![echo("/a")]).unwrap_err();
        assert!(matches!(err, Error::DuplicateService(name) if name == "/a"));

        let bare = Service::builder("/bare", ServiceSchema::new("bare"))
            .handler_fn(|_| Ok::<_, String>(Vec::<u8>::new()));
        let err = server.add_services(vec![bare]).unwrap_err();
        assert!(matches!(err, Error::MissingRequestEncoding(_)));

        server.remove_services(["/a"]);
        server.add_services(vec![echo("/a")]).unwrap();
        assert_eq!(server.services.read().len(), 2);
    }

    #[tokio::test]
    async fn test_services_require_capability() {
        let ctx = Context::new();
        let mut opts = options();
        opts.capabilities.clear();
        opts.services = vec![echo("/a")];
        assert!(matches!(
            Server::new(opts, &ctx, Handle::current()),
            Err(Error::ServicesNotSupported)
        ));
    }

    #[tokio::test]
    async fn test_parameter_subscription_counts() {
        let ctx = Context::new();
        let server = Server::new(options(), &ctx, Handle::current()).unwrap();
        let names = |list: &[&str]| list.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        assert_eq!(server.subscribe_parameters(names(&["a", "b"])), names(&["a", "b"]));
        assert_eq!(server.subscribe_parameters(names(&["a"])), Vec::<String>::new());
        assert_eq!(server.unsubscribe_parameters(names(&["a"])), Vec::<String>::new());
        assert_eq!(server.unsubscribe_parameters(names(&["a", "b", "c"])), names(&["a", "b"]));
    }

    #[tokio::test]
    async fn test_start_twice() {
        let ctx = Context::new();
        let server = Server::new(options(), &ctx, Handle::current()).unwrap();
        let addr = server.start("127.0.0.1:0".parse().unwrap()).unwrap();
        assert_ne!(addr.port(), 0);
        assert!(matches!(
            server.start("127.0.0.1:0".parse().unwrap()),
            Err(Error::ServerAlreadyStarted)
        ));
        let task = server.stop(false).unwrap();
        task.await.unwrap();
    }
}
