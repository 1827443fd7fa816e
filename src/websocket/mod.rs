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

// Live streaming to visualization clients over WebSocket

mod allowlist;
mod capability;
mod client;
mod connected_client;
mod connection_graph;
mod fetch_asset;
mod handshake;
mod listener;
mod outbox;
pub mod protocol;
pub(crate) mod server;
pub mod service;
mod tls;

pub use capability::Capability;
pub use client::{ChannelView, Client, ClientChannel, ClientId};
pub use connection_graph::ConnectionGraph;
pub use fetch_asset::{AssetHandler, AssetHandlerFn};
pub use listener::ServerListener;
pub use protocol::{Parameter, ParameterType, ParameterValue, Status, StatusLevel};
pub use service::{Service, ServiceSchema};
pub use tls::TlsIdentity;

pub(crate) use connected_client::ClientLimits;
