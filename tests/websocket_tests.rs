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

mod common;

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::{wait_for, with_timeout, Received, TestClient};
use parking_lot::Mutex;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Error as WsError;
use tokio_tungstenite::tungstenite::Message;
use vizlog::websocket::protocol::{
    ClientAdvertisedChannel, ClientBinaryMessage, ClientMessage, FetchAssetResponse,
    ServerBinaryMessage, ServerMessage, ServiceCallRequest, ServiceCallResponse, SubscribeRequest,
};
use vizlog::websocket::{
    AssetHandlerFn, Capability, ChannelView, Client, ClientChannel, ConnectionGraph, Parameter,
    ServerListener, Service, ServiceSchema, StatusLevel,
};
use vizlog::{Context, PartialMetadata, RawChannel, WebSocketServer, WebSocketServerHandle};

#[derive(Default)]
struct RecordingListener {
    parameters: Mutex<BTreeMap<String, Parameter>>,
    subscribed: Mutex<Vec<String>>,
    unsubscribed: Mutex<Vec<String>>,
    advertised: Mutex<Vec<String>>,
    published: Mutex<Vec<(String, Vec<u8>)>>,
    parameter_subscriptions: Mutex<Vec<String>>,
    graph_subscribed: AtomicBool,
}

impl ServerListener for RecordingListener {
    fn on_message_data(&self, _client: Client, channel: &ClientChannel, payload: &[u8]) {
        self.published
            .lock()
            .push((channel.topic.clone(), payload.to_vec()));
    }

    fn on_subscribe(&self, _client: Client, channel: ChannelView<'_>) {
        self.subscribed.lock().push(channel.topic().to_string());
    }

    fn on_unsubscribe(&self, _client: Client, channel: ChannelView<'_>) {
        self.unsubscribed.lock().push(channel.topic().to_string());
    }

    fn on_client_advertise(&self, _client: Client, channel: &ClientChannel) {
        self.advertised.lock().push(channel.topic.clone());
    }

    fn on_get_parameters(
        &self,
        _client: Client,
        param_names: Vec<String>,
        _request_id: Option<&str>,
    ) -> Vec<Parameter> {
        let parameters = self.parameters.lock();
        if param_names.is_empty() {
            return parameters.values().cloned().collect();
        }
        param_names
            .iter()
            .filter_map(|name| parameters.get(name).cloned())
            .collect()
    }

    fn on_set_parameters(
        &self,
        _client: Client,
        parameters: Vec<Parameter>,
        _request_id: Option<&str>,
    ) -> Vec<Parameter> {
        let mut stored = self.parameters.lock();
        parameters
            .into_iter()
            .map(|param| {
                if param.name.starts_with("read_only.") {
                    return stored
                        .get(&param.name)
                        .cloned()
                        .unwrap_or_else(|| Parameter::empty(param.name.clone()));
                }
                stored.insert(param.name.clone(), param.clone());
                param
            })
            .collect()
    }

    fn on_parameters_subscribe(&self, param_names: Vec<String>) {
        self.parameter_subscriptions.lock().extend(param_names);
    }

    fn on_connection_graph_subscribe(&self) {
        self.graph_subscribed.store(true, Ordering::SeqCst);
    }
}

fn json_channel(ctx: &Arc<Context>, topic: &str) -> Arc<RawChannel> {
    ctx.channel_builder(topic)
        .message_encoding("json")
        .build_raw()
        .unwrap()
}

async fn start(builder: WebSocketServer, ctx: &Arc<Context>) -> WebSocketServerHandle {
    builder.bind("127.0.0.1", 0).context(ctx).start().await.unwrap()
}

/// Connects and consumes the server info, plus the initial advertisement when the
/// context has channels.
async fn connect(
    handle: &WebSocketServerHandle,
    ctx: &Arc<Context>,
) -> (TestClient, Vec<(u64, String)>) {
    let mut client = TestClient::connect(handle.port()).await;
    assert!(matches!(
        client.recv_json().await,
        ServerMessage::ServerInfo(_)
    ));
    if ctx.channels().is_empty() {
        return (client, Vec::new());
    }
    let channels = match client.recv_json().await {
        ServerMessage::Advertise { channels } => {
            channels.into_iter().map(|c| (c.id, c.topic)).collect()
        }
        other => panic!("expected advertise, got {other:?}"),
    };
    (client, channels)
}

async fn subscribe(client: &mut TestClient, channel: &RawChannel, subscription_id: u32) {
    client
        .send(&ClientMessage::Subscribe {
            subscriptions: vec![SubscribeRequest {
                id: subscription_id,
                channel_id: channel.id().into(),
            }],
        })
        .await;
    wait_for(|| channel.has_sinks()).await;
}

async fn recv_status(client: &mut TestClient) -> (StatusLevel, String) {
    client
        .recv_until(|received| match received {
            Received::Json(ServerMessage::Status(status)) => Some((status.level, status.message)),
            _ => None,
        })
        .await
}

#[tokio::test]
async fn test_handshake_requires_subprotocol() {
    let ctx = Context::new();
    let handle = start(WebSocketServer::new(), &ctx).await;

    let err = connect_async(format!("ws://127.0.0.1:{}", handle.port()))
        .await
        .unwrap_err();
    match err {
        WsError::Http(response) => assert_eq!(response.status(), 400),
        other => panic!("unexpected error: {other:?}"),
    }
    handle.stop().wait().await;
}

#[tokio::test]
async fn test_server_info_then_advertise() {
    let ctx = Context::new();
    let _imu = json_channel(&ctx, "/imu");
    let _hidden = json_channel(&ctx, "/_hidden");
    let handle = start(
        WebSocketServer::new()
            .name("test-server")
            .session_id("session-1")
            .capabilities([Capability::Time]),
        &ctx,
    )
    .await;

    let mut client = TestClient::connect(handle.port()).await;
    match client.recv_json().await {
        ServerMessage::ServerInfo(info) => {
            assert_eq!(info.name, "test-server");
            assert_eq!(info.session_id.as_deref(), Some("session-1"));
            assert_eq!(info.capabilities, vec![Capability::Time]);
        }
        other => panic!("expected server info, got {other:?}"),
    }
    match client.recv_json().await {
        ServerMessage::Advertise { channels } => {
            let topics: Vec<&str> = channels.iter().map(|c| c.topic.as_str()).collect();
            assert_eq!(topics, vec!["/imu"]);
            assert_eq!(channels[0].encoding, "json");
            assert_eq!(channels[0].schema, "");
        }
        other => panic!("expected advertise, got {other:?}"),
    }

    // Channels created later are advertised to connected clients.
    let late = json_channel(&ctx, "/late");
    match client.recv_json().await {
        ServerMessage::Advertise { channels } => {
            assert_eq!(channels.len(), 1);
            assert_eq!(channels[0].id, u64::from(late.id()));
        }
        other => panic!("expected advertise, got {other:?}"),
    }
    handle.stop().wait().await;
}

#[tokio::test]
async fn test_subscribe_delivers_messages() {
    let ctx = Context::new();
    let channel = json_channel(&ctx, "/imu");
    let listener = Arc::new(RecordingListener::default());
    let handle = start(WebSocketServer::new().listener(listener.clone()), &ctx).await;
    let (mut client, _) = connect(&handle, &ctx).await;

    subscribe(&mut client, &channel, 7).await;
    assert_eq!(*listener.subscribed.lock(), vec!["/imu".to_string()]);

    channel.log_with_meta(br#"{"x":1}"#, PartialMetadata { log_time: Some(42) });
    match client.recv_binary().await {
        ServerBinaryMessage::MessageData {
            subscription_id,
            log_time,
            data,
        } => {
            assert_eq!(subscription_id, 7);
            assert_eq!(log_time, 42);
            assert_eq!(data, br#"{"x":1}"#);
        }
        other => panic!("unexpected message: {other:?}"),
    }

    client
        .send(&ClientMessage::Unsubscribe {
            subscription_ids: vec![7],
        })
        .await;
    wait_for(|| !channel.has_sinks()).await;
    assert_eq!(*listener.unsubscribed.lock(), vec!["/imu".to_string()]);
    handle.stop().wait().await;
}

#[tokio::test]
async fn test_subscription_errors() {
    let ctx = Context::new();
    let channel = json_channel(&ctx, "/imu");
    let handle = start(WebSocketServer::new(), &ctx).await;
    let (mut client, _) = connect(&handle, &ctx).await;

    client
        .send(&ClientMessage::Subscribe {
            subscriptions: vec![SubscribeRequest {
                id: 1,
                channel_id: 999,
            }],
        })
        .await;
    let (level, message) = recv_status(&mut client).await;
    assert_eq!(level, StatusLevel::Error);
    assert!(message.contains("999"));

    subscribe(&mut client, &channel, 1).await;
    client
        .send(&ClientMessage::Subscribe {
            subscriptions: vec![SubscribeRequest {
                id: 2,
                channel_id: channel.id().into(),
            }],
        })
        .await;
    let (level, _) = recv_status(&mut client).await;
    assert_eq!(level, StatusLevel::Warning);

    client.send_raw(Message::text("not json")).await;
    let (level, _) = recv_status(&mut client).await;
    assert_eq!(level, StatusLevel::Error);
    handle.stop().wait().await;
}

#[tokio::test]
async fn test_slow_client_drops_newest_messages() {
    let ctx = Context::new();
    let channel = json_channel(&ctx, "/fast");
    let handle = start(WebSocketServer::new().message_backlog_bytes(64), &ctx).await;
    let (mut client, _) = connect(&handle, &ctx).await;
    subscribe(&mut client, &channel, 1).await;

    // Nothing is flushed until this task yields, so only the first message fits.
    for i in 0..20u64 {
        let payload = format!(r#"{{"seq":{i},"pad":"................"}}"#);
        channel.log_with_meta(payload.as_bytes(), PartialMetadata { log_time: Some(i) });
    }
    match client.recv_binary().await {
        ServerBinaryMessage::MessageData { log_time, .. } => assert_eq!(log_time, 0),
        other => panic!("unexpected message: {other:?}"),
    }
    client.expect_silence(Duration::from_millis(100)).await;

    // The client stays connected and keeps receiving.
    channel.log_with_meta(br#"{"seq":99}"#, PartialMetadata { log_time: Some(99) });
    match client.recv_binary().await {
        ServerBinaryMessage::MessageData { log_time, .. } => assert_eq!(log_time, 99),
        other => panic!("unexpected message: {other:?}"),
    }
    assert_eq!(handle.clients().len(), 1);
    handle.stop().wait().await;
}

#[tokio::test]
async fn test_parameters() {
    let ctx = Context::new();
    let listener = Arc::new(RecordingListener::default());
    listener.parameters.lock().insert(
        "read_only.version".to_string(),
        Parameter::string("read_only.version", "1.0"),
    );
    let handle = start(
        WebSocketServer::new()
            .capabilities([Capability::Parameters, Capability::ParametersSubscribe])
            .listener(listener.clone()),
        &ctx,
    )
    .await;
    let (mut client, _) = connect(&handle, &ctx).await;

    client
        .send(&ClientMessage::SetParameters {
            parameters: vec![
                Parameter::integer("rate", 10),
                Parameter::string("read_only.version", "2.0"),
            ],
            id: Some("set-1".to_string()),
        })
        .await;
    match client.recv_json().await {
        ServerMessage::ParameterValues { parameters, id } => {
            assert_eq!(id.as_deref(), Some("set-1"));
            assert_eq!(
                parameters,
                vec![
                    Parameter::integer("rate", 10),
                    Parameter::string("read_only.version", "1.0"),
                ]
            );
        }
        other => panic!("unexpected message: {other:?}"),
    }

    client
        .send(&ClientMessage::GetParameters {
            parameter_names: vec!["rate".to_string()],
            id: Some("get-1".to_string()),
        })
        .await;
    match client.recv_json().await {
        ServerMessage::ParameterValues { parameters, id } => {
            assert_eq!(id.as_deref(), Some("get-1"));
            assert_eq!(parameters, vec![Parameter::integer("rate", 10)]);
        }
        other => panic!("unexpected message: {other:?}"),
    }

    client
        .send(&ClientMessage::SubscribeParameterUpdates {
            parameter_names: vec!["rate".to_string()],
        })
        .await;
    wait_for(|| !listener.parameter_subscriptions.lock().is_empty()).await;
    assert_eq!(*listener.parameter_subscriptions.lock(), vec!["rate".to_string()]);

    handle.publish_parameter_values(vec![
        Parameter::integer("rate", 20),
        Parameter::bool("other", true),
    ]);
    match client.recv_json().await {
        ServerMessage::ParameterValues { parameters, id } => {
            assert_eq!(id, None);
            assert_eq!(parameters, vec![Parameter::integer("rate", 20)]);
        }
        other => panic!("unexpected message: {other:?}"),
    }
    handle.stop().wait().await;
}

#[tokio::test]
async fn test_parameters_require_capability() {
    let ctx = Context::new();
    let handle = start(WebSocketServer::new(), &ctx).await;
    let (mut client, _) = connect(&handle, &ctx).await;

    client
        .send(&ClientMessage::GetParameters {
            parameter_names: vec![],
            id: None,
        })
        .await;
    let (level, message) = recv_status(&mut client).await;
    assert_eq!(level, StatusLevel::Error);
    assert!(message.contains("parameters"));
    handle.stop().wait().await;
}

#[tokio::test]
async fn test_service_calls() {
    let ctx = Context::new();
    let echo = Service::builder("/echo", ServiceSchema::new("echo"))
        .handler_fn(|request| Ok::<_, String>(request.into_payload()));
    let deferred = Service::builder("/deferred", ServiceSchema::new("deferred")).async_handler_fn(
        |request| async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok::<_, String>(request.payload().iter().rev().copied().collect::<Vec<u8>>())
        },
    );
    let failing = Service::builder("/failing", ServiceSchema::new("failing"))
        .handler_fn(|_| Err::<Vec<u8>, _>("no can do"));
    let panicking = Service::builder("/panicking", ServiceSchema::new("panicking"))
        .handler_fn(|_| -> Result<Vec<u8>, String> { panic!("boom") });
    let handle = start(
        WebSocketServer::new()
            .supported_encodings(["json"])
            .services([echo, deferred, failing, panicking]),
        &ctx,
    )
    .await;

    let mut client = TestClient::connect(handle.port()).await;
    let services: BTreeMap<String, u32> = client
        .recv_until(|received| match received {
            Received::Json(ServerMessage::AdvertiseServices(advertise)) => Some(
                advertise
                    .services
                    .into_iter()
                    .map(|s| (s.name, s.id))
                    .collect(),
            ),
            _ => None,
        })
        .await;
    assert_eq!(services.len(), 4);

    let call = |service: &str, call_id: u32, encoding: &str| {
        ClientBinaryMessage::ServiceCallRequest(ServiceCallRequest {
            service_id: services[service],
            call_id,
            encoding: encoding.to_string(),
            payload: b"abc".to_vec(),
        })
    };

    client.send_binary(&call("/echo", 1, "json")).await;
    assert_eq!(
        client.recv_binary().await,
        ServerBinaryMessage::ServiceCallResponse(ServiceCallResponse {
            service_id: services["/echo"],
            call_id: 1,
            encoding: "json".to_string(),
            payload: b"abc".to_vec(),
        })
    );

    client.send_binary(&call("/deferred", 2, "json")).await;
    match client.recv_binary().await {
        ServerBinaryMessage::ServiceCallResponse(response) => {
            assert_eq!(response.call_id, 2);
            assert_eq!(response.payload, b"cba");
        }
        other => panic!("unexpected message: {other:?}"),
    }

    for (name, call_id) in [("/failing", 3), ("/panicking", 4)] {
        client.send_binary(&call(name, call_id, "json")).await;
        match client.recv_json().await {
            ServerMessage::ServiceCallFailure {
                service_id,
                call_id: failed_call,
                message,
            } => {
                assert_eq!(service_id, services[name]);
                assert_eq!(failed_call, call_id);
                assert!(!message.is_empty());
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    client.send_binary(&call("/echo", 5, "cbor")).await;
    assert!(matches!(
        client.recv_json().await,
        ServerMessage::ServiceCallFailure { call_id: 5, .. }
    ));

    client
        .send_binary(&ClientBinaryMessage::ServiceCallRequest(ServiceCallRequest {
            service_id: 9999,
            call_id: 6,
            encoding: "json".to_string(),
            payload: vec![],
        }))
        .await;
    assert!(matches!(
        client.recv_json().await,
        ServerMessage::ServiceCallFailure {
            service_id: 9999,
            call_id: 6,
            ..
        }
    ));

    // Removing a service is announced to connected clients.
    handle.remove_services(["/echo"]);
    let removed = client
        .recv_until(|received| match received {
            Received::Json(ServerMessage::UnadvertiseServices { service_ids }) => Some(service_ids),
            _ => None,
        })
        .await;
    assert_eq!(removed, vec![services["/echo"]]);
    handle.stop().wait().await;
}

#[tokio::test]
async fn test_client_publish() {
    let ctx = Context::new();
    let listener = Arc::new(RecordingListener::default());
    let handle = start(
        WebSocketServer::new()
            .capabilities([Capability::ClientPublish])
            .supported_encodings(["json"])
            .listener(listener.clone()),
        &ctx,
    )
    .await;
    let (mut client, _) = connect(&handle, &ctx).await;

    client
        .send(&ClientMessage::Advertise {
            channels: vec![ClientAdvertisedChannel {
                id: 3,
                topic: "/cmd".to_string(),
                encoding: "json".to_string(),
                schema_name: "Cmd".to_string(),
                schema: None,
                schema_encoding: None,
            }],
        })
        .await;
    client
        .send_binary(&ClientBinaryMessage::MessageData {
            channel_id: 3,
            data: br#"{"go":true}"#.to_vec(),
        })
        .await;
    wait_for(|| !listener.published.lock().is_empty()).await;
    assert_eq!(*listener.advertised.lock(), vec!["/cmd".to_string()]);
    assert_eq!(
        *listener.published.lock(),
        vec![("/cmd".to_string(), br#"{"go":true}"#.to_vec())]
    );

    // Data on a channel that was never advertised is rejected.
    client
        .send_binary(&ClientBinaryMessage::MessageData {
            channel_id: 4,
            data: vec![1],
        })
        .await;
    let (level, _) = recv_status(&mut client).await;
    assert_eq!(level, StatusLevel::Error);
    handle.stop().wait().await;
}

#[tokio::test]
async fn test_connection_graph_updates() {
    let ctx = Context::new();
    let listener = Arc::new(RecordingListener::default());
    let handle = start(
        WebSocketServer::new()
            .capabilities([Capability::ConnectionGraph])
            .listener(listener.clone()),
        &ctx,
    )
    .await;

    let mut graph = ConnectionGraph::new();
    graph.set_published_topic("/a", ["node1"]);
    graph.set_subscribed_topic("/a", ["node2"]);
    handle.publish_connection_graph(graph).unwrap();

    let (mut client, _) = connect(&handle, &ctx).await;
    client.send(&ClientMessage::SubscribeConnectionGraph).await;
    match client.recv_json().await {
        ServerMessage::ConnectionGraphUpdate(update) => {
            assert_eq!(update.published_topics.len(), 1);
            assert_eq!(update.published_topics[0].name, "/a");
            assert_eq!(update.subscribed_topics.len(), 1);
            assert!(update.removed_topics.is_empty());
        }
        other => panic!("unexpected message: {other:?}"),
    }
    assert!(listener.graph_subscribed.load(Ordering::SeqCst));

    let mut next = ConnectionGraph::new();
    next.set_published_topic("/b", ["node1"]);
    next.set_subscribed_topic("/a", ["node2"]);
    handle.publish_connection_graph(next).unwrap();
    match client.recv_json().await {
        ServerMessage::ConnectionGraphUpdate(update) => {
            assert_eq!(update.published_topics.len(), 1);
            assert_eq!(update.published_topics[0].name, "/b");
            assert!(update.subscribed_topics.is_empty());
            assert_eq!(update.removed_topics, vec!["/a".to_string()]);
        }
        other => panic!("unexpected message: {other:?}"),
    }
    handle.stop().wait().await;
}

#[tokio::test]
async fn test_fetch_asset() {
    let ctx = Context::new();
    let handle = start(
        WebSocketServer::new().fetch_asset_handler(AssetHandlerFn(|uri: String| async move {
            if uri == "package://robot/mesh.stl" {
                Ok(b"solid".to_vec())
            } else {
                Err(format!("not found: {uri}"))
            }
        })),
        &ctx,
    )
    .await;
    let (mut client, _) = connect(&handle, &ctx).await;

    let fetch = |uri: &str, request_id: u32| ClientMessage::FetchAsset {
        uri: uri.to_string(),
        request_id,
    };
    client.send(&fetch("package://robot/mesh.stl", 1)).await;
    assert_eq!(
        client.recv_binary().await,
        ServerBinaryMessage::FetchAssetResponse(FetchAssetResponse {
            request_id: 1,
            result: Ok(b"solid".to_vec()),
        })
    );

    client.send(&fetch("package://robot/missing", 2)).await;
    match client.recv_binary().await {
        ServerBinaryMessage::FetchAssetResponse(response) => {
            assert_eq!(response.request_id, 2);
            assert!(response.result.unwrap_err().contains("missing"));
        }
        other => panic!("unexpected message: {other:?}"),
    }

    client.send(&fetch("package://robot/../secret", 3)).await;
    match client.recv_binary().await {
        ServerBinaryMessage::FetchAssetResponse(response) => {
            assert_eq!(response.request_id, 3);
            assert!(response.result.is_err());
        }
        other => panic!("unexpected message: {other:?}"),
    }
    handle.stop().wait().await;
}

#[tokio::test]
async fn test_time_broadcast() {
    let ctx = Context::new();
    let handle = start(WebSocketServer::new().capabilities([Capability::Time]), &ctx).await;
    let (mut client, _) = connect(&handle, &ctx).await;

    handle.broadcast_time(1_700_000_000_000_000_000);
    assert_eq!(
        client.recv_binary().await,
        ServerBinaryMessage::Time {
            timestamp: 1_700_000_000_000_000_000
        }
    );
    handle.stop().wait().await;
}

#[tokio::test]
async fn test_channel_close_unadvertises() {
    let ctx = Context::new();
    let channel = json_channel(&ctx, "/imu");
    let listener = Arc::new(RecordingListener::default());
    let handle = start(WebSocketServer::new().listener(listener.clone()), &ctx).await;
    let (mut client, channels) = connect(&handle, &ctx).await;
    assert_eq!(channels, vec![(u64::from(channel.id()), "/imu".to_string())]);
    subscribe(&mut client, &channel, 1).await;

    channel.close();
    match client.recv_json().await {
        ServerMessage::Unadvertise { channel_ids } => {
            assert_eq!(channel_ids, vec![u64::from(channel.id())]);
        }
        other => panic!("unexpected message: {other:?}"),
    }
    wait_for(|| !listener.unsubscribed.lock().is_empty()).await;
    handle.stop().wait().await;
}

/// Listener that reads the context from its unsubscribe callback.
struct ContextReadingListener {
    ctx: std::sync::Weak<Context>,
    remaining: Mutex<Option<Vec<String>>>,
}

impl ServerListener for ContextReadingListener {
    fn on_unsubscribe(&self, _client: Client, _channel: ChannelView<'_>) {
        if let Some(ctx) = self.ctx.upgrade() {
            let topics = ctx.channels().iter().map(|c| c.topic().to_string()).collect();
            *self.remaining.lock() = Some(topics);
        }
    }
}

#[tokio::test]
async fn test_channel_close_with_listener_reading_context() {
    let ctx = Context::new();
    let channel = json_channel(&ctx, "/imu");
    let _gps = json_channel(&ctx, "/gps");
    let listener = Arc::new(ContextReadingListener {
        ctx: Arc::downgrade(&ctx),
        remaining: Mutex::new(None),
    });
    let handle = start(WebSocketServer::new().listener(listener.clone()), &ctx).await;
    let (mut client, _) = connect(&handle, &ctx).await;
    subscribe(&mut client, &channel, 1).await;

    let (tx, rx) = tokio::sync::oneshot::channel();
    let closing = channel.clone();
    std::thread::spawn(move || {
        closing.close();
        let _ = tx.send(());
    });
    with_timeout(rx).await.unwrap();

    assert_eq!(*listener.remaining.lock(), Some(vec!["/gps".to_string()]));
    let unadvertised = client
        .recv_until(|received| match received {
            Received::Json(ServerMessage::Unadvertise { channel_ids }) => Some(channel_ids),
            _ => None,
        })
        .await;
    assert_eq!(unadvertised, vec![u64::from(channel.id())]);
    handle.stop().wait().await;
}

#[tokio::test]
async fn test_disconnect_releases_subscriptions() {
    let ctx = Context::new();
    let channel = json_channel(&ctx, "/imu");
    let listener = Arc::new(RecordingListener::default());
    let handle = start(WebSocketServer::new().listener(listener.clone()), &ctx).await;
    let (mut client, _) = connect(&handle, &ctx).await;
    subscribe(&mut client, &channel, 1).await;

    drop(client);
    wait_for(|| !channel.has_sinks()).await;
    wait_for(|| handle.clients().is_empty()).await;
    assert_eq!(*listener.unsubscribed.lock(), vec!["/imu".to_string()]);
    handle.stop().wait().await;
}

#[tokio::test]
async fn test_stop_closes_connections() {
    let ctx = Context::new();
    let channel = json_channel(&ctx, "/imu");
    let handle = start(WebSocketServer::new(), &ctx).await;
    let port = handle.port();
    let (mut client, _) = connect(&handle, &ctx).await;
    subscribe(&mut client, &channel, 1).await;

    with_timeout(handle.stop().wait()).await;
    client
        .recv_until(|received| matches!(received, Received::Closed).then_some(()))
        .await;
    assert!(!channel.has_sinks());

    // New connections are refused once the server has stopped.
    assert!(connect_async(format!("ws://127.0.0.1:{port}")).await.is_err());
}
