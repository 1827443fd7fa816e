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

// Sink serving a co-located agent that forwards data to the cloud

use std::sync::Arc;

use tokio::runtime::Handle;

use crate::websocket::{Capability, ServerListener};
use crate::websocket_server::{ShutdownHandle, WebSocketServer, WebSocketServerHandle};
use crate::{Context, Error};

const CLOUD_SINK_NAME: &str = "vizlog-cloud-sink";

/// Builder for a cloud sink
///
/// The cloud sink is a streaming server on the loopback interface with a fixed set of
/// capabilities. The agent connecting to it subscribes to channels, publishes on its
/// own and calls services, like any other client.
#[must_use]
pub struct CloudSink {
    server: WebSocketServer,
}

impl Default for CloudSink {
    fn default() -> Self {
        let server = WebSocketServer::new()
            .name(CLOUD_SINK_NAME)
            .bind("127.0.0.1", 8765)
            .capabilities([
                Capability::ClientPublish,
                Capability::Time,
                Capability::Services,
                Capability::ConnectionGraph,
            ]);
        Self { server }
    }
}

impl CloudSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn listener(mut self, listener: Arc<dyn ServerListener>) -> Self {
        self.server = self.server.listener(listener);
        self
    }

    pub fn supported_encodings<I, S>(mut self, encodings: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.server = self.server.supported_encodings(encodings);
        self
    }

    pub fn session_id(mut self, session_id: impl Into<String>) -> Self {
        self.server = self.server.session_id(session_id);
        self
    }

    pub fn context(mut self, context: &Arc<Context>) -> Self {
        self.server = self.server.context(context);
        self
    }

    pub fn runtime(mut self, handle: &Handle) -> Self {
        self.server = self.server.runtime(handle);
        self
    }

    #[doc(hidden)]
    pub fn port(mut self, port: u16) -> Self {
        self.server = self.server.bind("127.0.0.1", port);
        self
    }

    pub async fn start(self) -> Result<CloudSinkHandle, Error> {
        let server = self.server.start().await?;
        Ok(CloudSinkHandle { server })
    }

    pub fn start_blocking(self) -> Result<CloudSinkHandle, Error> {
        let server = self.server.start_blocking()?;
        Ok(CloudSinkHandle { server })
    }
}

/// Handle to a running cloud sink
pub struct CloudSinkHandle {
    server: WebSocketServerHandle,
}

impl CloudSinkHandle {
    pub fn port(&self) -> u16 {
        self.server.port()
    }

    /// The underlying server, to publish services or the connection graph.
    pub fn server(&self) -> &WebSocketServerHandle {
        &self.server
    }

    /// Stops the sink. Messages already queued for the agent are delivered first.
    pub fn stop(self) -> ShutdownHandle {
        self.server.drain()
    }

    pub fn stop_blocking(self) {
        self.stop().wait_blocking();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_start_and_stop() {
        let ctx = Context::new();
        let sink = CloudSink::new().context(&ctx).port(0).start().await.unwrap();
        assert_ne!(sink.port(), 0);
        assert!(sink.server().clients().is_empty());
        sink.stop().wait().await;
    }
}
