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

// WebSocket upgrade with subprotocol negotiation

use tokio::io::{AsyncRead, AsyncWrite};
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode};
use tokio_tungstenite::{tungstenite, WebSocketStream};

pub(crate) const SUBPROTOCOL: &str = "foxglove.sdk.v1";
pub(crate) const LEGACY_SUBPROTOCOL: &str = "foxglove.websocket.v1";

const SUBPROTOCOL_HEADER: &str = "sec-websocket-protocol";

/// Picks the first supported subprotocol offered by the client.
fn negotiate(request: &Request) -> Option<&'static str> {
    let offered: Vec<&str> = request
        .headers()
        .get_all(SUBPROTOCOL_HEADER)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(','))
        .map(str::trim)
        .collect();
    [SUBPROTOCOL, LEGACY_SUBPROTOCOL]
        .into_iter()
        .find(|supported| offered.contains(supported))
}

/// Upgrades the stream, echoing back the negotiated subprotocol. Clients that offer
/// no supported subprotocol get a 400.
pub(crate) async fn do_handshake<S: AsyncRead + AsyncWrite + Unpin>(
    stream: S,
) -> Result<WebSocketStream<S>, tungstenite::Error> {
    tokio_tungstenite::accept_hdr_async(stream, |request: &Request, mut response: Response| {
        match negotiate(request) {
            Some(protocol) => {
                response
                    .headers_mut()
                    .insert(SUBPROTOCOL_HEADER, HeaderValue::from_static(protocol));
                Ok(response)
            }
            None => {
                let mut error = ErrorResponse::new(Some(
                    "Missing expected sec-websocket-protocol header".to_string(),
                ));
                *error.status_mut() = StatusCode::BAD_REQUEST;
                Err(error)
            }
        }
    })
    .await
}
