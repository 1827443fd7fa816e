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

use super::client::{ChannelView, Client, ClientChannel};
use super::protocol::Parameter;

/// Callbacks for client activity on a streaming server
///
/// Every method has a no-op default. Callbacks run on the connection's task, so
/// they are ordered per client, and must not block for long. They must not call
/// back into the context that owns the server's channels.
pub trait ServerListener: Send + Sync {
    /// A client published a message on one of its advertised channels.
    fn on_message_data(&self, _client: Client, _channel: &ClientChannel, _payload: &[u8]) {}

    /// A client subscribed to a server channel.
    fn on_subscribe(&self, _client: Client, _channel: ChannelView<'_>) {}

    /// A client unsubscribed from a server channel, or the channel was closed.
    fn on_unsubscribe(&self, _client: Client, _channel: ChannelView<'_>) {}

    fn on_client_advertise(&self, _client: Client, _channel: &ClientChannel) {}

    fn on_client_unadvertise(&self, _client: Client, _channel: &ClientChannel) {}

    /// Returns the current values of the requested parameters. An empty list of
    /// names requests all parameters.
    fn on_get_parameters(
        &self,
        _client: Client,
        _param_names: Vec<String>,
        _request_id: Option<&str>,
    ) -> Vec<Parameter> {
        Vec::new()
    }

    /// Applies parameter changes and returns the resulting values.
    fn on_set_parameters(
        &self,
        _client: Client,
        parameters: Vec<Parameter>,
        _request_id: Option<&str>,
    ) -> Vec<Parameter> {
        parameters
    }

    /// Called with the names that gained their first subscriber.
    fn on_parameters_subscribe(&self, _param_names: Vec<String>) {}

    /// Called with the names that lost their last subscriber.
    fn on_parameters_unsubscribe(&self, _param_names: Vec<String>) {}

    fn on_connection_graph_subscribe(&self) {}

    fn on_connection_graph_unsubscribe(&self) {}
}
