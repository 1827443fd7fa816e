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

// Services: request/response calls from clients to the server

use std::fmt::{self, Display};
use std::future::Future;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Weak};

use bytes::Bytes;
use tokio::sync::OwnedSemaphorePermit;

use super::client::ClientId;
use super::connected_client::ConnectedClient;
use super::protocol::{
    self, AdvertisedService, ServerBinaryMessage, ServerMessage, ServiceCallResponse,
};
use crate::Schema;

/// Server-assigned service identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ServiceId(u32);

impl ServiceId {
    fn next() -> Self {
        static NEXT_ID: AtomicU32 = AtomicU32::new(1);
        Self(NEXT_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl From<ServiceId> for u32 {
    fn from(id: ServiceId) -> Self {
        id.0
    }
}

impl From<u32> for ServiceId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl Display for ServiceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Client-assigned call identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CallId(u32);

impl From<CallId> for u32 {
    fn from(id: CallId) -> Self {
        id.0
    }
}

impl From<u32> for CallId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Encoding and schema of a request or response message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MessageSchema {
    pub encoding: String,
    pub schema: Schema,
}

impl MessageSchema {
    pub fn new(encoding: impl Into<String>, schema: Schema) -> Self {
        Self {
            encoding: encoding.into(),
            schema,
        }
    }
}

/// Service type name with optional request and response schemas
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSchema {
    name: String,
    request: Option<MessageSchema>,
    response: Option<MessageSchema>,
}

impl ServiceSchema {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            request: None,
            response: None,
        }
    }

    #[must_use]
    pub fn with_request(mut self, encoding: impl Into<String>, schema: Schema) -> Self {
        self.request = Some(MessageSchema::new(encoding, schema));
        self
    }

    #[must_use]
    pub fn with_response(mut self, encoding: impl Into<String>, schema: Schema) -> Self {
        self.response = Some(MessageSchema::new(encoding, schema));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn request(&self) -> Option<&MessageSchema> {
        self.request.as_ref()
    }

    pub fn response(&self) -> Option<&MessageSchema> {
        self.response.as_ref()
    }
}

/// A service call
#[derive(Debug, Clone)]
pub struct Request {
    service_id: ServiceId,
    service_name: Arc<str>,
    client_id: ClientId,
    call_id: CallId,
    encoding: String,
    payload: Bytes,
}

impl Request {
    pub fn service_id(&self) -> ServiceId {
        self.service_id
    }

    /// Name of the called service, to tell apart services sharing one handler.
    pub fn service_name(&self) -> &str {
        &self.service_name
    }

    pub fn client_id(&self) -> ClientId {
        self.client_id
    }

    pub fn call_id(&self) -> CallId {
        self.call_id
    }

    pub fn encoding(&self) -> &str {
        &self.encoding
    }

    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    pub fn into_payload(self) -> Bytes {
        self.payload
    }
}

/// Single-use handle for answering a service call
///
/// It may be moved to another thread or task. Dropping it without responding sends
/// a failure to the client. Responding after the client disconnected does nothing.
#[must_use]
#[derive(Debug)]
pub struct Responder(Option<ResponderInner>);

#[derive(Debug)]
struct ResponderInner {
    client: Weak<ConnectedClient>,
    service_id: ServiceId,
    call_id: CallId,
    encoding: String,
    _permit: OwnedSemaphorePermit,
}

impl Responder {
    pub(crate) fn new(
        client: Weak<ConnectedClient>,
        service_id: ServiceId,
        call_id: CallId,
        encoding: impl Into<String>,
        permit: OwnedSemaphorePermit,
    ) -> Self {
        Self(Some(ResponderInner {
            client,
            service_id,
            call_id,
            encoding: encoding.into(),
            _permit: permit,
        }))
    }

    /// Overrides the response encoding.
    pub fn set_encoding(&mut self, encoding: impl Into<String>) {
        if let Some(inner) = self.0.as_mut() {
            inner.encoding = encoding.into();
        }
    }

    pub fn respond<T, E>(self, result: Result<T, E>)
    where
        T: AsRef<[u8]>,
        E: Display,
    {
        match result {
            Ok(data) => self.respond_ok(data),
            Err(e) => self.respond_err(e.to_string()),
        }
    }

    pub fn respond_ok(mut self, data: impl AsRef<[u8]>) {
        if let Some(inner) = self.0.take() {
            inner.send(Ok(data.as_ref()));
        }
    }

    pub fn respond_err(mut self, message: impl Into<String>) {
        if let Some(inner) = self.0.take() {
            inner.send(Err(message.into()));
        }
    }
}

impl Drop for Responder {
    fn drop(&mut self) {
        if let Some(inner) = self.0.take() {
            inner.send(Err(
                "Internal server error: service failed to send a response".to_string()
            ));
        }
    }
}

impl ResponderInner {
    fn send(self, result: Result<&[u8], String>) {
        let Some(client) = self.client.upgrade() else {
            return;
        };
        let message = match result {
            Ok(payload) => tokio_tungstenite::tungstenite::Message::binary(
                ServerBinaryMessage::ServiceCallResponse(ServiceCallResponse {
                    service_id: self.service_id.into(),
                    call_id: self.call_id.into(),
                    encoding: self.encoding,
                    payload: payload.to_vec(),
                })
                .encode(),
            ),
            Err(message) => protocol::json_message(&ServerMessage::ServiceCallFailure {
                service_id: self.service_id.into(),
                call_id: self.call_id.into(),
                message,
            }),
        };
        client.send_control(message);
    }
}

/// Handles calls to one or more services
pub trait Handler: Send + Sync {
    /// Called on the connection's task. Long-running work should be moved elsewhere,
    /// taking the responder with it.
    fn call(&self, request: Request, responder: Responder);
}

struct SyncHandlerFn<F>(F);

impl<F, T, E> Handler for SyncHandlerFn<F>
where
    F: Fn(Request) -> Result<T, E> + Send + Sync,
    T: AsRef<[u8]>,
    E: Display,
{
    fn call(&self, request: Request, responder: Responder) {
        responder.respond((self.0)(request));
    }
}

struct BlockingHandlerFn<F>(Arc<F>);

impl<F, T, E> Handler for BlockingHandlerFn<F>
where
    F: Fn(Request) -> Result<T, E> + Send + Sync + 'static,
    T: AsRef<[u8]>,
    E: Display,
{
    fn call(&self, request: Request, responder: Responder) {
        let f = self.0.clone();
        tokio::task::spawn_blocking(move || responder.respond(f(request)));
    }
}

struct AsyncHandlerFn<F>(F);

impl<F, Fut, T, E> Handler for AsyncHandlerFn<F>
where
    F: Fn(Request) -> Fut + Send + Sync,
    Fut: Future<Output = Result<T, E>> + Send + 'static,
    T: AsRef<[u8]>,
    E: Display,
{
    fn call(&self, request: Request, responder: Responder) {
        let fut = (self.0)(request);
        tokio::spawn(async move { responder.respond(fut.await) });
    }
}

/// A named service with its handler
pub struct Service {
    id: ServiceId,
    name: Arc<str>,
    schema: ServiceSchema,
    handler: Arc<dyn Handler>,
}

impl fmt::Debug for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Service")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("schema", &self.schema)
            .finish_non_exhaustive()
    }
}

impl Service {
    pub fn builder(name: impl Into<String>, schema: ServiceSchema) -> ServiceBuilder {
        ServiceBuilder {
            id: ServiceId::next(),
            name: name.into(),
            schema,
        }
    }

    pub fn id(&self) -> ServiceId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn schema(&self) -> &ServiceSchema {
        &self.schema
    }

    /// Encoding requests must use, if the service declares one.
    pub(crate) fn request_encoding(&self) -> Option<&str> {
        self.schema.request.as_ref().map(|r| r.encoding.as_str())
    }

    /// Encoding of responses, defaulting to the request's encoding.
    pub(crate) fn response_encoding<'a>(&'a self, request_encoding: &'a str) -> &'a str {
        self.schema
            .response
            .as_ref()
            .map_or(request_encoding, |r| r.encoding.as_str())
    }

    pub(crate) fn request(
        &self,
        client_id: ClientId,
        call_id: CallId,
        encoding: String,
        payload: Bytes,
    ) -> Request {
        Request {
            service_id: self.id,
            service_name: self.name.clone(),
            client_id,
            call_id,
            encoding,
            payload,
        }
    }

    pub(crate) fn call(&self, request: Request, responder: Responder) {
        self.handler.call(request, responder);
    }

    /// Advertisement sent to clients. Fails if a schema cannot be represented as text.
    pub(crate) fn advertisement(&self) -> Result<AdvertisedService, protocol::ProtocolError> {
        let message_schema = |schema: &MessageSchema| -> Result<_, protocol::ProtocolError> {
            Ok(protocol::MessageSchema {
                encoding: schema.encoding.clone(),
                schema_name: schema.schema.name.clone(),
                schema_encoding: schema.schema.encoding.clone(),
                schema: protocol::encode_schema_data(&schema.schema.encoding, &schema.schema.data)?,
            })
        };
        let request = self.schema.request.as_ref().map(message_schema).transpose()?;
        let response = self.schema.response.as_ref().map(message_schema).transpose()?;
        Ok(AdvertisedService {
            id: self.id.into(),
            name: self.name.to_string(),
            r#type: self.schema.name.clone(),
            request_schema: request.is_none().then(String::new),
            request,
            response_schema: response.is_none().then(String::new),
            response,
        })
    }
}

/// Builder for a [`Service`], completed by choosing a handler
#[must_use]
pub struct ServiceBuilder {
    id: ServiceId,
    name: String,
    schema: ServiceSchema,
}

impl ServiceBuilder {
    /// Uses an explicit service ID instead of an automatically assigned one.
    pub fn with_id(mut self, id: ServiceId) -> Self {
        self.id = id;
        self
    }

    pub fn handler(self, handler: impl Handler + 'static) -> Service {
        self.handler_arc(Arc::new(handler))
    }

    /// Uses a shared handler. Several services may share one.
    pub fn handler_arc(self, handler: Arc<dyn Handler>) -> Service {
        Service {
            id: self.id,
            name: self.name.into(),
            schema: self.schema,
            handler,
        }
    }

    /// Synchronous handler, run on the connection's task. Panics are caught and
    /// reported to the client.
    pub fn handler_fn<F, T, E>(self, f: F) -> Service
    where
        F: Fn(Request) -> Result<T, E> + Send + Sync + 'static,
        T: AsRef<[u8]> + 'static,
        E: Display + 'static,
    {
        self.handler(SyncHandlerFn(f))
    }

    /// Handler run on the blocking thread pool.
    pub fn blocking_handler_fn<F, T, E>(self, f: F) -> Service
    where
        F: Fn(Request) -> Result<T, E> + Send + Sync + 'static,
        T: AsRef<[u8]> + 'static,
        E: Display + 'static,
    {
        self.handler(BlockingHandlerFn(Arc::new(f)))
    }

    /// Async handler, spawned as a task.
    pub fn async_handler_fn<F, Fut, T, E>(self, f: F) -> Service
    where
        F: Fn(Request) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: AsRef<[u8]> + 'static,
        E: Display + 'static,
    {
        self.handler(AsyncHandlerFn(f))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn schema() -> ServiceSchema {
        ServiceSchema::new("std_srvs/Empty")
            .with_request("json", Schema::new("Req", "jsonschema", b"{}".to_vec()))
    }

    #[test]
    fn test_advertisement() {
        let service = Service::builder("/reset", schema()).handler_fn(|_| Ok::<_, String>(b""));
        let ad = service.advertisement().unwrap();
        assert_eq!(ad.name, "/reset");
        assert_eq!(ad.r#type, "std_srvs/Empty");
        let request = ad.request.unwrap();
        assert_eq!(request.encoding, "json");
        assert_eq!(request.schema, "{}");
        assert_eq!(ad.request_schema, None);
        assert!(ad.response.is_none());
        assert_eq!(ad.response_schema, Some(String::new()));
    }

    #[test]
    fn test_response_encoding_defaults_to_request() {
        let service = Service::builder("/a", ServiceSchema::new("A")).handler_fn(|_| Ok::<_, String>(b""));
        assert_eq!(service.request_encoding(), None);
        assert_eq!(service.response_encoding("cbor"), "cbor");

        let service = Service::builder(
            "/b",
            ServiceSchema::new("B").with_response("json", Schema::new("R", "jsonschema", b"{}".to_vec())),
        )
        .handler_fn(|_| Ok::<_, String>(b""));
        assert_eq!(service.response_encoding("cbor"), "json");
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Service::builder("/a", ServiceSchema::new("A")).handler_fn(|_| Ok::<_, String>(b""));
        let b = Service::builder("/b", ServiceSchema::new("B")).handler_fn(|_| Ok::<_, String>(b""));
        assert_ne!(a.id(), b.id());
    }
}
