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

// Helpers shared by the WebSocket integration tests

#![allow(dead_code)]

use std::future::Future;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use vizlog::websocket::protocol::{
    ClientBinaryMessage, ClientMessage, ServerBinaryMessage, ServerMessage,
};

pub const SUBPROTOCOL: &str = "foxglove.sdk.v1";
pub const TIMEOUT: Duration = Duration::from_secs(5);

/// Anything a test client can receive
#[derive(Debug)]
pub enum Received {
    Json(ServerMessage),
    Binary(ServerBinaryMessage),
    Closed,
}

/// Minimal protocol client driving a server under test
pub struct TestClient {
    ws: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

impl TestClient {
    pub async fn connect(port: u16) -> Self {
        let mut request = format!("ws://127.0.0.1:{port}")
            .into_client_request()
            .unwrap();
        request
            .headers_mut()
            .insert("sec-websocket-protocol", HeaderValue::from_static(SUBPROTOCOL));
        let (ws, response) = connect_async(request).await.unwrap();
        assert_eq!(
            response.headers().get("sec-websocket-protocol").unwrap(),
            SUBPROTOCOL
        );
        Self { ws }
    }

    pub async fn send(&mut self, message: &ClientMessage) {
        let json = serde_json::to_string(message).unwrap();
        self.ws.send(Message::text(json)).await.unwrap();
    }

    pub async fn send_binary(&mut self, message: &ClientBinaryMessage) {
        self.ws.send(Message::binary(message.encode())).await.unwrap();
    }

    pub async fn send_raw(&mut self, message: Message) {
        self.ws.send(message).await.unwrap();
    }

    pub async fn recv(&mut self) -> Received {
        loop {
            let next = tokio::time::timeout(TIMEOUT, self.ws.next())
                .await
                .expect("timed out waiting for a server message");
            match next {
                None | Some(Err(_)) | Some(Ok(Message::Close(_))) => return Received::Closed,
                Some(Ok(Message::Text(text))) => {
                    return Received::Json(ServerMessage::parse_json(text.as_str()).unwrap())
                }
                Some(Ok(Message::Binary(data))) => {
                    return Received::Binary(ServerBinaryMessage::parse(&data).unwrap())
                }
                Some(Ok(_)) => continue,
            }
        }
    }

    pub async fn recv_json(&mut self) -> ServerMessage {
        match self.recv().await {
            Received::Json(message) => message,
            other => panic!("expected a JSON message, got {other:?}"),
        }
    }

    pub async fn recv_binary(&mut self) -> ServerBinaryMessage {
        match self.recv().await {
            Received::Binary(message) => message,
            other => panic!("expected a binary message, got {other:?}"),
        }
    }

    /// Receives messages until one matches, discarding the rest.
    pub async fn recv_until<T>(&mut self, mut select: impl FnMut(Received) -> Option<T>) -> T {
        loop {
            let received = self.recv().await;
            if matches!(received, Received::Closed) {
                if let Some(value) = select(Received::Closed) {
                    return value;
                }
                panic!("connection closed while waiting for a message");
            }
            if let Some(value) = select(received) {
                return value;
            }
        }
    }

    /// Asserts that nothing arrives within `wait`.
    pub async fn expect_silence(&mut self, wait: Duration) {
        if let Ok(Some(Ok(message))) = tokio::time::timeout(wait, self.ws.next()).await {
            panic!("unexpected message: {message:?}");
        }
    }
}

/// Polls `condition` until it holds or the timeout expires.
pub async fn wait_for(mut condition: impl FnMut() -> bool) {
    let poll = async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    };
    tokio::time::timeout(TIMEOUT, poll)
        .await
        .expect("condition not reached in time");
}

pub async fn with_timeout<F: Future>(future: F) -> F::Output {
    tokio::time::timeout(TIMEOUT, future)
        .await
        .expect("timed out")
}
