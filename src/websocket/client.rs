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

// Client-facing views handed to server callbacks

use std::fmt;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Weak;

use super::connected_client::ConnectedClient;
use super::protocol::Status;
use crate::channel::ChannelId;

/// Identifier of a connected client, unique within the process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClientId(u32);

impl ClientId {
    pub(crate) fn next() -> Self {
        static NEXT_ID: AtomicU32 = AtomicU32::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl From<ClientId> for u32 {
    fn from(id: ClientId) -> Self {
        id.0
    }
}

impl fmt::Display for ClientId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Handle to a connected client
///
/// Holds a weak reference, so it stays valid (but inert) after the client
/// disconnects.
#[derive(Debug, Clone)]
pub struct Client {
    id: ClientId,
    addr: SocketAddr,
    client: Weak<ConnectedClient>,
}

impl Client {
    pub(crate) fn new(id: ClientId, addr: SocketAddr, client: Weak<ConnectedClient>) -> Self {
        Self { id, addr, client }
    }

    pub fn id(&self) -> ClientId {
        self.id
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn is_connected(&self) -> bool {
        self.client.strong_count() > 0
    }

    /// Sends a status message to this client only.
    pub fn send_status(&self, status: Status) {
        if let Some(client) = self.client.upgrade() {
            client.send_status(status);
        }
    }
}

/// Server channel a client subscribed to or unsubscribed from
#[derive(Debug, Clone, Copy)]
pub struct ChannelView<'a> {
    id: ChannelId,
    topic: &'a str,
}

impl<'a> ChannelView<'a> {
    pub(crate) fn new(id: ChannelId, topic: &'a str) -> Self {
        Self { id, topic }
    }

    pub fn id(&self) -> ChannelId {
        self.id
    }

    pub fn topic(&self) -> &'a str {
        self.topic
    }
}

/// Channel advertised by a publishing client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientChannel {
    pub id: u32,
    pub topic: String,
    pub encoding: String,
    pub schema_name: String,
    pub schema_encoding: Option<String>,
    /// Decoded schema bytes.
    pub schema: Option<Vec<u8>>,
}
