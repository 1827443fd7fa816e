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

// Cloud sink integration tests

mod common;

use common::{wait_for, Received, TestClient};
use vizlog::websocket::protocol::{
    ClientMessage, ServerBinaryMessage, ServerMessage, SubscribeRequest,
};
use vizlog::{CloudSink, Context};

#[tokio::test]
async fn test_stop_delivers_queued_messages() {
    let ctx = Context::new();
    let channel = ctx
        .channel_builder("/telemetry")
        .message_encoding("json")
        .build_raw()
        .unwrap();
    let sink = CloudSink::new().context(&ctx).port(0).start().await.unwrap();

    let mut client = TestClient::connect(sink.port()).await;
    match client.recv_json().await {
        ServerMessage::ServerInfo(info) => assert_eq!(info.name, "vizlog-cloud-sink"),
        other => panic!("expected server info, got {other:?}"),
    }
    assert!(matches!(
        client.recv_json().await,
        ServerMessage::Advertise { .. }
    ));
    client
        .send(&ClientMessage::Subscribe {
            subscriptions: vec![SubscribeRequest {
                id: 7,
                channel_id: channel.id().into(),
            }],
        })
        .await;
    wait_for(|| channel.has_sinks()).await;

    const COUNT: usize = 50;
    for i in 0..COUNT {
        channel.log(format!("{{\"seq\":{i}}}").as_bytes());
    }
    let shutdown = sink.stop();

    let mut payloads = Vec::new();
    loop {
        match client.recv().await {
            Received::Binary(ServerBinaryMessage::MessageData {
                subscription_id,
                data,
                ..
            }) => {
                assert_eq!(subscription_id, 7);
                payloads.push(data);
            }
            Received::Closed => break,
            _ => {}
        }
    }
    shutdown.wait().await;

    assert_eq!(payloads.len(), COUNT);
    for (i, data) in payloads.iter().enumerate() {
        assert_eq!(data, format!("{{\"seq\":{i}}}").as_bytes());
    }
    wait_for(|| !channel.has_sinks()).await;
}
