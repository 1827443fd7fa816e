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

// A connected WebSocket client
//
// Each client is a sink of its own in the server's context. Channels are advertised
// to it as they appear; it subscribes only to what the client asks for. Outgoing
// messages use two queues: a bounded control plane for protocol replies, and a
// lossy data plane for logged messages.

use std::collections::{BTreeSet, HashMap};
use std::net::SocketAddr;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use futures_util::{SinkExt, StreamExt};
use parking_lot::{Mutex, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;
use tracing::{debug, error, info, warn};

use super::allowlist::is_asset_uri_allowed;
use super::client::{ChannelView, Client, ClientChannel, ClientId};
use super::outbox::{outbox, Outbox, OutboxReceiver};
use super::protocol::{
    self, encode_message_data, AdvertisedChannel, ClientAdvertisedChannel, ClientBinaryMessage,
    ClientMessage, FetchAssetResponse, Parameter, ServerBinaryMessage, ServerMessage,
    ServiceCallRequest, Status, SubscribeRequest,
};
use super::server::Server;
use super::service::{CallId, Responder, ServiceId};
use super::{allowlist::ServerChannelFilter, Capability};
use crate::channel::{ChannelId, RawChannel};
use crate::metadata::Metadata;
use crate::sink::{Sink, SinkId};
use crate::sink_channel_filter::SinkChannelFilter;
use crate::{Context, Error};

/// Why a client connection is being closed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ShutdownReason {
    /// The client closed the connection or the socket failed.
    ClientDisconnected,
    /// The client stopped reading and its control queue overflowed.
    ControlPlaneFull,
    /// The server is stopping; pending data is discarded.
    ServerStopped,
    /// The server is stopping; pending data is flushed first.
    Drain,
}

/// Per-connection queue sizes
#[derive(Debug, Clone, Copy)]
pub(crate) struct ClientLimits {
    pub message_backlog_bytes: usize,
    pub control_backlog: usize,
    pub service_call_limit: usize,
}

/// Receiving ends of a client's queues, owned by its connection task
pub(crate) struct ClientQueues {
    control: mpsc::Receiver<Message>,
    data: OutboxReceiver,
    shutdown: watch::Receiver<Option<ShutdownReason>>,
}

#[derive(Default)]
struct SubscriptionTable {
    by_channel: HashMap<ChannelId, u32>,
    by_id: HashMap<u32, ChannelId>,
}

impl SubscriptionTable {
    fn remove_channel(&mut self, channel_id: ChannelId) -> bool {
        match self.by_channel.remove(&channel_id) {
            Some(subscription_id) => {
                self.by_id.remove(&subscription_id);
                true
            }
            None => false,
        }
    }
}

pub(crate) struct ConnectedClient {
    id: ClientId,
    addr: SocketAddr,
    sink_id: SinkId,
    weak_self: Weak<Self>,
    server: Weak<Server>,
    context: Weak<Context>,
    channel_filter: Arc<ServerChannelFilter>,
    data_plane: Outbox,
    control_plane: mpsc::Sender<Message>,
    shutdown: watch::Sender<Option<ShutdownReason>>,
    /// Server channels advertised to this client
    advertised: RwLock<HashMap<ChannelId, Arc<RawChannel>>>,
    subscriptions: Mutex<SubscriptionTable>,
    /// Channels advertised by this client
    client_channels: RwLock<HashMap<u32, Arc<ClientChannel>>>,
    parameter_subscriptions: Mutex<BTreeSet<String>>,
    service_calls: Arc<Semaphore>,
}

impl ConnectedClient {
    pub(crate) fn new(
        server: &Arc<Server>,
        context: &Arc<Context>,
        channel_filter: Arc<ServerChannelFilter>,
        addr: SocketAddr,
        limits: ClientLimits,
    ) -> (Arc<Self>, ClientQueues) {
        let (data_plane, data_rx) = outbox(limits.message_backlog_bytes);
        let (control_plane, control_rx) = mpsc::channel(limits.control_backlog.max(1));
        let (shutdown, shutdown_rx) = watch::channel(None);
        let client = Arc::new_cyclic(|weak_self| Self {
            id: ClientId::next(),
            addr,
            sink_id: SinkId::next(),
            weak_self: weak_self.clone(),
            server: Arc::downgrade(server),
            context: Arc::downgrade(context),
            channel_filter,
            data_plane,
            control_plane,
            shutdown,
            advertised: RwLock::default(),
            subscriptions: Mutex::default(),
            client_channels: RwLock::default(),
            parameter_subscriptions: Mutex::default(),
            service_calls: Arc::new(Semaphore::new(limits.service_call_limit)),
        });
        let queues = ClientQueues {
            control: control_rx,
            data: data_rx,
            shutdown: shutdown_rx,
        };
        (client, queues)
    }

    pub(crate) fn client_id(&self) -> ClientId {
        self.id
    }

    pub(crate) fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub(crate) fn client(&self) -> Client {
        Client::new(self.id, self.addr, self.weak_self.clone())
    }

    /// Queues a protocol message. A full control queue disconnects the client.
    pub(crate) fn send_control(&self, message: Message) {
        match self.control_plane.try_send(message) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                warn!("Control queue for client {} full, disconnecting", self.addr);
                self.shutdown(ShutdownReason::ControlPlaneFull);
            }
            Err(TrySendError::Closed(_)) => {}
        }
    }

    /// Queues a message on the lossy data plane.
    pub(crate) fn send_data(&self, message: Message) {
        self.data_plane.send_lossy(message, self.addr);
    }

    pub(crate) fn send_control_message(&self, message: &ServerMessage) {
        self.send_control(protocol::json_message(message));
    }

    pub(crate) fn send_status(&self, status: Status) {
        self.send_control_message(&ServerMessage::Status(status));
    }

    fn send_error(&self, message: impl Into<String>) {
        let message = message.into();
        debug!("Error for client {}: {}", self.addr, message);
        self.send_status(Status::error(message));
    }

    fn send_warning(&self, message: impl Into<String>) {
        self.send_status(Status::warning(message));
    }

    /// Requests the connection to close. The first reason wins.
    pub(crate) fn shutdown(&self, reason: ShutdownReason) {
        self.shutdown.send_if_modified(|current| {
            if current.is_none() {
                *current = Some(reason);
                true
            } else {
                false
            }
        });
    }

    /// Sends the parameters this client subscribed to, if any.
    pub(crate) fn send_parameter_values(&self, parameters: &[Parameter]) {
        let subscribed: Vec<Parameter> = {
            let names = self.parameter_subscriptions.lock();
            parameters
                .iter()
                .filter(|p| names.contains(&p.name))
                .cloned()
                .collect()
        };
        if !subscribed.is_empty() {
            self.send_control_message(&ServerMessage::ParameterValues {
                parameters: subscribed,
                id: None,
            });
        }
    }

    /// Runs the connection until the client disconnects or the server shuts it down.
    ///
    /// Incoming messages are handled on this task, in order. Outgoing control messages
    /// take priority over data.
    pub(crate) async fn run<S>(&self, websocket: WebSocketStream<S>, queues: ClientQueues) -> ShutdownReason
    where
        S: AsyncRead + AsyncWrite + Unpin,
    {
        let ClientQueues {
            mut control,
            mut data,
            mut shutdown,
        } = queues;
        let (mut ws_tx, mut ws_rx) = websocket.split();

        let read_loop = async {
            while let Some(msg) = ws_rx.next().await {
                match msg {
                    Ok(Message::Close(_)) => break,
                    Ok(msg) => self.handle_message(msg),
                    Err(e) => {
                        debug!("Error reading from client {}: {}", self.addr, e);
                        break;
                    }
                }
            }
            ShutdownReason::ClientDisconnected
        };
        tokio::pin!(read_loop);

        let reason = loop {
            tokio::select! {
                biased;
                reason = &mut read_loop => break reason,
                changed = shutdown.changed() => {
                    let reason = match changed {
                        Ok(()) => *shutdown.borrow_and_update(),
                        Err(_) => Some(ShutdownReason::ServerStopped),
                    };
                    if let Some(reason) = reason {
                        break reason;
                    }
                }
                Some(msg) = control.recv() => {
                    if let Err(e) = ws_tx.send(msg).await {
                        debug!("Error sending to client {}: {}", self.addr, e);
                        break ShutdownReason::ClientDisconnected;
                    }
                }
                Some(msg) = data.recv() => {
                    if let Err(e) = ws_tx.send(msg).await {
                        debug!("Error sending to client {}: {}", self.addr, e);
                        break ShutdownReason::ClientDisconnected;
                    }
                }
            }
        };

        match reason {
            ShutdownReason::ClientDisconnected => {
                info!("Client {} disconnected", self.addr);
            }
            ShutdownReason::ControlPlaneFull => {
                let status = Status::error(
                    "Disconnected because the message backlog on the server is full. \
                     The backlog size is configurable in the server setup.",
                );
                ws_tx
                    .send(protocol::json_message(&ServerMessage::Status(status)))
                    .await
                    .ok();
                ws_tx.send(Message::Close(None)).await.ok();
            }
            ShutdownReason::ServerStopped | ShutdownReason::Drain => {
                while let Ok(msg) = control.try_recv() {
                    if ws_tx.send(msg).await.is_err() {
                        break;
                    }
                }
                if reason == ShutdownReason::Drain {
                    while let Some(msg) = data.try_recv() {
                        if ws_tx.send(msg).await.is_err() {
                            break;
                        }
                    }
                }
                ws_tx.send(Message::Close(None)).await.ok();
            }
        }
        reason
    }

    fn handle_message(&self, msg: Message) {
        let Some(server) = self.server.upgrade() else {
            return;
        };
        match msg {
            Message::Text(text) => match ClientMessage::parse_json(&text) {
                Ok(msg) => self.handle_json(&server, msg),
                Err(e) => self.send_error(format!("Invalid message: {e}")),
            },
            Message::Binary(bytes) => match ClientBinaryMessage::parse(&bytes) {
                Ok(ClientBinaryMessage::MessageData { channel_id, data }) => {
                    self.on_message_data(&server, channel_id, &data)
                }
                Ok(ClientBinaryMessage::ServiceCallRequest(request)) => {
                    self.on_service_call(&server, request)
                }
                Err(e) => self.send_error(format!("Invalid binary message: {e}")),
            },
            _ => {}
        }
    }

    fn handle_json(&self, server: &Server, msg: ClientMessage) {
        match msg {
            ClientMessage::Subscribe { subscriptions } => self.on_subscribe(server, subscriptions),
            ClientMessage::Unsubscribe { subscription_ids } => {
                self.on_unsubscribe(server, subscription_ids)
            }
            ClientMessage::Advertise { channels } => self.on_client_advertise(server, channels),
            ClientMessage::Unadvertise { channel_ids } => {
                self.on_client_unadvertise(server, channel_ids)
            }
            ClientMessage::GetParameters {
                parameter_names,
                id,
            } => self.on_get_parameters(server, parameter_names, id),
            ClientMessage::SetParameters { parameters, id } => {
                self.on_set_parameters(server, parameters, id)
            }
            ClientMessage::SubscribeParameterUpdates { parameter_names } => {
                self.on_subscribe_parameters(server, parameter_names)
            }
            ClientMessage::UnsubscribeParameterUpdates { parameter_names } => {
                self.on_unsubscribe_parameters(server, parameter_names)
            }
            ClientMessage::SubscribeConnectionGraph => self.on_subscribe_connection_graph(server),
            ClientMessage::UnsubscribeConnectionGraph => {
                self.on_unsubscribe_connection_graph(server)
            }
            ClientMessage::FetchAsset { uri, request_id } => {
                self.on_fetch_asset(server, uri, request_id)
            }
        }
    }

    /// Runs a listener callback, turning a panic into a log line.
    fn guarded<T>(&self, callback: &str, f: impl FnOnce() -> T) -> Option<T> {
        match panic::catch_unwind(AssertUnwindSafe(f)) {
            Ok(value) => Some(value),
            Err(_) => {
                error!("Listener callback {} panicked for client {}", callback, self.addr);
                None
            }
        }
    }

    /// Like `guarded`, but also reports the failure to the client unless the server
    /// ignores unresponsive parameter nodes.
    fn guarded_param<T>(&self, server: &Server, callback: &str, f: impl FnOnce() -> T) -> Option<T> {
        let result = self.guarded(callback, f);
        if result.is_none() && !server.ignore_unresponsive_param_nodes() {
            self.send_error(format!("Parameter request failed: {callback} did not complete"));
        }
        result
    }

    fn on_subscribe(&self, server: &Server, requests: Vec<SubscribeRequest>) {
        let mut subscribed = Vec::new();
        for request in requests {
            let channel_id = ChannelId::new(request.channel_id);
            let Some(channel) = self.advertised.read().get(&channel_id).cloned() else {
                self.send_error(format!(
                    "Unknown channel ID: {}; ignoring subscription",
                    request.channel_id
                ));
                continue;
            };
            let mut table = self.subscriptions.lock();
            if table.by_id.contains_key(&request.id) {
                drop(table);
                self.send_error(format!(
                    "Client subscription ID {} was already used; ignoring subscription",
                    request.id
                ));
                continue;
            }
            if table.by_channel.contains_key(&channel_id) {
                drop(table);
                self.send_warning(format!(
                    "Client is already subscribed to channel {}; ignoring subscription",
                    request.channel_id
                ));
                continue;
            }
            table.by_channel.insert(channel_id, request.id);
            table.by_id.insert(request.id, channel_id);
            drop(table);
            subscribed.push(channel);
        }
        if subscribed.is_empty() {
            return;
        }

        let ids: Vec<ChannelId> = subscribed.iter().map(|c| c.id()).collect();
        if let Some(context) = self.context.upgrade() {
            context.subscribe_channels(self.sink_id, &ids);
        }
        if let Some(listener) = server.listener() {
            for channel in &subscribed {
                debug!("Client {} subscribed to '{}'", self.addr, channel.topic());
                self.guarded("on_subscribe", || {
                    listener.on_subscribe(self.client(), ChannelView::new(channel.id(), channel.topic()))
                });
            }
        }
    }

    fn on_unsubscribe(&self, server: &Server, subscription_ids: Vec<u32>) {
        let mut unsubscribed = Vec::new();
        for subscription_id in subscription_ids {
            let channel_id = {
                let mut table = self.subscriptions.lock();
                let channel_id = table.by_id.remove(&subscription_id);
                if let Some(channel_id) = channel_id {
                    table.by_channel.remove(&channel_id);
                }
                channel_id
            };
            match channel_id {
                Some(channel_id) => unsubscribed.push(channel_id),
                None => self.send_warning(format!(
                    "Client subscription ID {subscription_id} did not exist; ignoring unsubscription"
                )),
            }
        }
        if unsubscribed.is_empty() {
            return;
        }

        if let Some(context) = self.context.upgrade() {
            context.unsubscribe_channels(self.sink_id, &unsubscribed);
        }
        for channel_id in unsubscribed {
            let channel = self.advertised.read().get(&channel_id).cloned();
            if let Some(channel) = channel {
                self.notify_unsubscribe(server, &channel);
            }
        }
    }

    fn notify_unsubscribe(&self, server: &Server, channel: &RawChannel) {
        if let Some(listener) = server.listener() {
            debug!("Client {} unsubscribed from '{}'", self.addr, channel.topic());
            self.guarded("on_unsubscribe", || {
                listener.on_unsubscribe(self.client(), ChannelView::new(channel.id(), channel.topic()))
            });
        }
    }

    fn on_client_advertise(&self, server: &Server, channels: Vec<ClientAdvertisedChannel>) {
        if !server.has_capability(Capability::ClientPublish) {
            self.send_error("Server does not support clientPublish capability");
            return;
        }
        for channel in channels {
            if !server.client_topic_allowlist().allows(&channel.topic) {
                self.send_error(format!(
                    "Topic {} is not allowed for client publishing",
                    channel.topic
                ));
                continue;
            }
            let encodings = server.supported_encodings();
            if !encodings.is_empty() && !encodings.iter().any(|e| *e == channel.encoding) {
                self.send_error(format!(
                    "Unsupported encoding {} for channel {}",
                    channel.encoding, channel.topic
                ));
                continue;
            }
            let schema = match (&channel.schema, &channel.schema_encoding) {
                (Some(schema), Some(encoding)) => match protocol::decode_schema_data(encoding, schema) {
                    Ok(schema) => Some(schema),
                    Err(e) => {
                        self.send_error(format!(
                            "Invalid schema for channel {}: {e}",
                            channel.topic
                        ));
                        continue;
                    }
                },
                (Some(schema), None) => Some(schema.as_bytes().to_vec()),
                (None, _) => None,
            };
            let client_channel = Arc::new(ClientChannel {
                id: channel.id,
                topic: channel.topic,
                encoding: channel.encoding,
                schema_name: channel.schema_name,
                schema_encoding: channel.schema_encoding,
                schema,
            });
            {
                let mut table = self.client_channels.write();
                if table.contains_key(&client_channel.id) {
                    drop(table);
                    self.send_warning(format!(
                        "Client is already advertising channel {}; ignoring advertisement",
                        client_channel.id
                    ));
                    continue;
                }
                table.insert(client_channel.id, client_channel.clone());
            }
            debug!(
                "Client {} advertised channel {} on '{}'",
                self.addr, client_channel.id, client_channel.topic
            );
            if let Some(listener) = server.listener() {
                self.guarded("on_client_advertise", || {
                    listener.on_client_advertise(self.client(), &client_channel)
                });
            }
        }
    }

    fn on_client_unadvertise(&self, server: &Server, channel_ids: Vec<u32>) {
        for channel_id in channel_ids {
            let Some(channel) = self.client_channels.write().remove(&channel_id) else {
                self.send_warning(format!(
                    "Client is not advertising channel {channel_id}; ignoring unadvertisement"
                ));
                continue;
            };
            if let Some(listener) = server.listener() {
                self.guarded("on_client_unadvertise", || {
                    listener.on_client_unadvertise(self.client(), &channel)
                });
            }
        }
    }

    fn on_message_data(&self, server: &Server, channel_id: u32, payload: &[u8]) {
        if !server.has_capability(Capability::ClientPublish) {
            self.send_error("Server does not support clientPublish capability");
            return;
        }
        let Some(channel) = self.client_channels.read().get(&channel_id).cloned() else {
            self.send_error(format!(
                "Client has not advertised channel {channel_id}; ignoring message"
            ));
            return;
        };
        if let Some(listener) = server.listener() {
            self.guarded("on_message_data", || {
                listener.on_message_data(self.client(), &channel, payload)
            });
        }
    }

    fn allowed_parameters(server: &Server, parameters: Vec<Parameter>) -> Vec<Parameter> {
        parameters
            .into_iter()
            .filter(|p| server.parameter_allowlist().allows(&p.name))
            .collect()
    }

    fn on_get_parameters(&self, server: &Server, names: Vec<String>, id: Option<String>) {
        if !server.has_capability(Capability::Parameters) {
            self.send_error("Server does not support parameters capability");
            return;
        }
        let requested_any = !names.is_empty();
        let names: Vec<String> = names
            .into_iter()
            .filter(|name| server.parameter_allowlist().allows(name))
            .collect();
        let parameters = match server.listener() {
            // Every requested name was filtered out; do not turn this into "get all".
            Some(_) if requested_any && names.is_empty() => Vec::new(),
            Some(listener) => {
                let result = self.guarded_param(server, "on_get_parameters", || {
                    listener.on_get_parameters(self.client(), names, id.as_deref())
                });
                match result {
                    Some(parameters) => Self::allowed_parameters(server, parameters),
                    None => return,
                }
            }
            None => Vec::new(),
        };
        self.send_control_message(&ServerMessage::ParameterValues { parameters, id });
    }

    fn on_set_parameters(&self, server: &Server, parameters: Vec<Parameter>, id: Option<String>) {
        if !server.has_capability(Capability::Parameters) {
            self.send_error("Server does not support parameters capability");
            return;
        }
        let parameters = Self::allowed_parameters(server, parameters);
        let updated = match server.listener() {
            Some(listener) => {
                let result = self.guarded_param(server, "on_set_parameters", || {
                    listener.on_set_parameters(self.client(), parameters, id.as_deref())
                });
                match result {
                    Some(updated) => Self::allowed_parameters(server, updated),
                    None => return,
                }
            }
            None => parameters,
        };
        if id.is_some() {
            self.send_control_message(&ServerMessage::ParameterValues {
                parameters: updated.clone(),
                id,
            });
        }
        server.broadcast_parameter_values(&updated);
    }

    fn on_subscribe_parameters(&self, server: &Server, names: Vec<String>) {
        if !server.has_capability(Capability::ParametersSubscribe) {
            self.send_error("Server does not support parametersSubscribe capability");
            return;
        }
        let added: Vec<String> = {
            let mut subscribed = self.parameter_subscriptions.lock();
            names
                .into_iter()
                .filter(|name| server.parameter_allowlist().allows(name))
                .filter(|name| subscribed.insert(name.clone()))
                .collect()
        };
        let first = server.subscribe_parameters(added);
        if first.is_empty() {
            return;
        }
        if let Some(listener) = server.listener() {
            self.guarded_param(server, "on_parameters_subscribe", || {
                listener.on_parameters_subscribe(first)
            });
        }
    }

    fn on_unsubscribe_parameters(&self, server: &Server, names: Vec<String>) {
        if !server.has_capability(Capability::ParametersSubscribe) {
            self.send_error("Server does not support parametersSubscribe capability");
            return;
        }
        let removed: Vec<String> = {
            let mut subscribed = self.parameter_subscriptions.lock();
            names
                .into_iter()
                .filter(|name| subscribed.remove(name))
                .collect()
        };
        self.release_parameters(server, removed);
    }

    fn release_parameters(&self, server: &Server, names: Vec<String>) {
        let last = server.unsubscribe_parameters(names);
        if last.is_empty() {
            return;
        }
        if let Some(listener) = server.listener() {
            self.guarded_param(server, "on_parameters_unsubscribe", || {
                listener.on_parameters_unsubscribe(last)
            });
        }
    }

    fn on_subscribe_connection_graph(&self, server: &Server) {
        if !server.has_capability(Capability::ConnectionGraph) {
            self.send_error("Server does not support connectionGraph capability");
            return;
        }
        match server.subscribe_connection_graph(self) {
            None => self.send_warning("Client is already subscribed to connection graph updates"),
            Some(true) => {
                if let Some(listener) = server.listener() {
                    self.guarded("on_connection_graph_subscribe", || {
                        listener.on_connection_graph_subscribe()
                    });
                }
            }
            Some(false) => {}
        }
    }

    fn on_unsubscribe_connection_graph(&self, server: &Server) {
        if !server.has_capability(Capability::ConnectionGraph) {
            self.send_error("Server does not support connectionGraph capability");
            return;
        }
        match server.unsubscribe_connection_graph(self.id) {
            None => self.send_warning("Client is not subscribed to connection graph updates"),
            Some(last) => {
                if last {
                    self.notify_connection_graph_unsubscribe(server);
                }
            }
        }
    }

    fn notify_connection_graph_unsubscribe(&self, server: &Server) {
        if let Some(listener) = server.listener() {
            self.guarded("on_connection_graph_unsubscribe", || {
                listener.on_connection_graph_unsubscribe()
            });
        }
    }

    fn on_fetch_asset(&self, server: &Server, uri: String, request_id: u32) {
        let handler = match server.fetch_asset_handler() {
            Some(handler) if server.has_capability(Capability::Assets) => handler,
            _ => {
                self.send_error("Server does not support assets capability");
                return;
            }
        };
        if !is_asset_uri_allowed(server.asset_uri_allowlist(), &uri) {
            self.send_asset_response(request_id, Err(format!("Asset URI not allowed: {uri}")));
            return;
        }
        let client = self.weak_self.clone();
        tokio::spawn(async move {
            let result = handler.fetch(uri).await;
            if let Some(client) = client.upgrade() {
                client.send_asset_response(request_id, result);
            }
        });
    }

    fn send_asset_response(&self, request_id: u32, result: Result<Vec<u8>, String>) {
        let response = ServerBinaryMessage::FetchAssetResponse(FetchAssetResponse {
            request_id,
            result,
        });
        self.send_control(Message::binary(response.encode()));
    }

    fn on_service_call(&self, server: &Server, request: ServiceCallRequest) {
        if !server.has_capability(Capability::Services) {
            self.send_error("Server does not support services capability");
            return;
        }
        let (raw_service_id, raw_call_id) = (request.service_id, request.call_id);
        let failure = |message: String| {
            self.send_control_message(&ServerMessage::ServiceCallFailure {
                service_id: raw_service_id,
                call_id: raw_call_id,
                message,
            })
        };

        let service_id = ServiceId::from(raw_service_id);
        let Some(service) = server.get_service(service_id) else {
            failure(format!("Unknown service {raw_service_id}"));
            return;
        };
        let encoding_supported = match service.request_encoding() {
            Some(encoding) => encoding == request.encoding,
            None => server
                .supported_encodings()
                .iter()
                .any(|e| *e == request.encoding),
        };
        if !encoding_supported {
            failure(format!(
                "Unsupported encoding {} for service {}",
                request.encoding,
                service.name()
            ));
            return;
        }
        let Ok(permit) = self.service_calls.clone().try_acquire_owned() else {
            failure("Too many concurrent service calls; try again later".to_string());
            return;
        };

        let call_id = CallId::from(raw_call_id);
        let response_encoding = service.response_encoding(&request.encoding).to_string();
        let request = service.request(
            self.id,
            call_id,
            request.encoding,
            Bytes::from(request.payload),
        );
        let responder = Responder::new(
            self.weak_self.clone(),
            service_id,
            call_id,
            response_encoding,
            permit,
        );
        // A panicking handler drops its responder, which reports the failure.
        if panic::catch_unwind(AssertUnwindSafe(|| service.call(request, responder))).is_err() {
            error!("Handler for service '{}' panicked", service.name());
        }
    }

    /// Releases everything the client held and fires the matching callbacks.
    pub(crate) fn on_disconnect(&self, server: &Server) {
        let subscribed: Vec<ChannelId> = {
            let mut table = self.subscriptions.lock();
            table.by_id.clear();
            table.by_channel.drain().map(|(channel_id, _)| channel_id).collect()
        };
        let advertised = std::mem::take(&mut *self.advertised.write());
        for channel_id in subscribed {
            if let Some(channel) = advertised.get(&channel_id) {
                self.notify_unsubscribe(server, channel);
            }
        }

        let client_channels = std::mem::take(&mut *self.client_channels.write());
        if let Some(listener) = server.listener() {
            for channel in client_channels.values() {
                self.guarded("on_client_unadvertise", || {
                    listener.on_client_unadvertise(self.client(), channel)
                });
            }
        }

        let parameters: Vec<String> =
            std::mem::take(&mut *self.parameter_subscriptions.lock()).into_iter().collect();
        self.release_parameters(server, parameters);

        if server.unsubscribe_connection_graph(self.id) == Some(true) {
            self.notify_connection_graph_unsubscribe(server);
        }

        let dropped = self.data_plane.dropped();
        if dropped > 0 {
            info!("Dropped {} messages for client {}", dropped, self.addr);
        }
    }
}

/// Advertisement of a server channel. Channels without a schema can only be
/// advertised with a self-describing encoding.
fn advertisement(channel: &RawChannel) -> Result<AdvertisedChannel, Error> {
    let (schema_name, schema, schema_encoding) = match channel.schema() {
        Some(schema) => (
            schema.name.clone(),
            protocol::encode_schema_data(&schema.encoding, &schema.data)
                .map_err(|e| Error::EncodeError(e.to_string()))?,
            Some(schema.encoding.clone()),
        ),
        None if channel.message_encoding() == "json" => (String::new(), String::new(), None),
        None => return Err(Error::SchemaRequired),
    };
    Ok(AdvertisedChannel {
        id: channel.id().into(),
        topic: channel.topic().to_string(),
        encoding: channel.message_encoding().to_string(),
        schema_name,
        schema,
        schema_encoding,
    })
}

impl Sink for ConnectedClient {
    fn id(&self) -> SinkId {
        self.sink_id
    }

    fn log(&self, channel: &RawChannel, msg: &[u8], metadata: &Metadata) -> Result<(), Error> {
        let subscription_id = self
            .subscriptions
            .lock()
            .by_channel
            .get(&channel.id())
            .copied();
        if let Some(subscription_id) = subscription_id {
            let frame = encode_message_data(subscription_id, metadata.log_time, msg);
            self.data_plane.send_lossy(Message::binary(frame), self.addr);
        }
        Ok(())
    }

    fn add_channels(&self, channels: &[&Arc<RawChannel>]) -> Option<Vec<ChannelId>> {
        let mut advertisements = Vec::with_capacity(channels.len());
        {
            let mut advertised = self.advertised.write();
            for channel in channels {
                match advertisement(channel) {
                    Ok(ad) => {
                        advertised.insert(channel.id(), Arc::clone(channel));
                        advertisements.push(ad);
                    }
                    Err(e) => warn!(
                        "Cannot advertise channel '{}' to client {}: {}",
                        channel.topic(),
                        self.addr,
                        e
                    ),
                }
            }
        }
        if !advertisements.is_empty() {
            self.send_control_message(&ServerMessage::Advertise {
                channels: advertisements,
            });
        }
        None
    }

    fn remove_channel(&self, channel: &RawChannel) {
        if self.advertised.write().remove(&channel.id()).is_none() {
            return;
        }
        let was_subscribed = self.subscriptions.lock().remove_channel(channel.id());
        self.send_control_message(&ServerMessage::Unadvertise {
            channel_ids: vec![channel.id().into()],
        });
        if was_subscribed {
            if let Some(server) = self.server.upgrade() {
                self.notify_unsubscribe(&server, channel);
            }
        }
    }

    fn auto_subscribe(&self) -> bool {
        false
    }

    fn channel_filter(&self) -> Option<&dyn SinkChannelFilter> {
        Some(self.channel_filter.as_ref())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Schema;

    #[test]
    fn test_advertisement() {
        let ctx = Context::new();
        let json = ctx.channel_builder("/json").message_encoding("json").build_raw().unwrap();
        let ad = advertisement(&json).unwrap();
        assert_eq!(ad.topic, "/json");
        assert_eq!(ad.schema_name, "");
        assert_eq!(ad.schema_encoding, None);

        let proto = ctx
            .channel_builder("/proto")
            .message_encoding("protobuf")
            .schema(Schema::new("pkg.Msg", "protobuf", vec![0x0a, 0x01]))
            .build_raw()
            .unwrap();
        let ad = advertisement(&proto).unwrap();
        assert_eq!(ad.schema, "CgE=");
        assert_eq!(ad.schema_encoding.as_deref(), Some("protobuf"));

        let bare = ctx.channel_builder("/cdr").message_encoding("cdr").build_raw().unwrap();
        assert!(matches!(advertisement(&bare), Err(Error::SchemaRequired)));
    }

    #[test]
    fn test_subscription_table() {
        let mut table = SubscriptionTable::default();
        table.by_channel.insert(ChannelId::new(1), 10);
        table.by_id.insert(10, ChannelId::new(1));
        assert!(table.remove_channel(ChannelId::new(1)));
        assert!(table.by_id.is_empty());
        assert!(!table.remove_channel(ChannelId::new(1)));
    }
}
