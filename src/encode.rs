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

// Message encoding boundary between typed messages and the logging core

use bytes::BufMut;
use serde::Serialize;

use crate::{Error, Schema};

/// A message type that can be logged on a typed [`Channel`](crate::Channel)
///
/// The core never inspects messages. Anything that can describe its schema and
/// message encoding and write itself into a buffer can be logged.
pub trait Encode {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Schema describing the message, if any.
    fn get_schema() -> Option<Schema>;

    /// Message encoding, for example `json` or `protobuf`.
    fn get_message_encoding() -> String;

    /// Encodes the message into `buf`.
    fn encode(&self, buf: &mut impl BufMut) -> Result<(), Self::Error>;

    /// Size hint for the encoded message.
    fn encoded_len(&self) -> Option<usize> {
        None
    }

    /// Encodes into a caller-provided buffer and returns the number of bytes written.
    ///
    /// Fails with [`Error::BufferTooShort`] carrying the required size when `buf`
    /// cannot hold the message, so the caller can grow the buffer and retry.
    fn encode_to_slice(&self, buf: &mut [u8]) -> Result<usize, Error> {
        if let Some(required) = self.encoded_len() {
            if required > buf.len() {
                return Err(Error::BufferTooShort { required });
            }
        }
        let mut encoded = Vec::with_capacity(self.encoded_len().unwrap_or(buf.len()));
        self.encode(&mut encoded)
            .map_err(|e| Error::EncodeError(e.to_string()))?;
        if encoded.len() > buf.len() {
            return Err(Error::BufferTooShort {
                required: encoded.len(),
            });
        }
        buf[..encoded.len()].copy_from_slice(&encoded);
        Ok(encoded.len())
    }
}

impl Encode for serde_json::Value {
    type Error = serde_json::Error;

    fn get_schema() -> Option<Schema> {
        None
    }

    fn get_message_encoding() -> String {
        "json".to_string()
    }

    fn encode(&self, buf: &mut impl BufMut) -> Result<(), Self::Error> {
        serde_json::to_writer(buf.writer(), self)
    }
}

/// Wrapper that logs any serializable value as a schemaless `json` message
#[derive(Debug, Clone, PartialEq)]
pub struct JsonMessage<T>(pub T);

impl<T: Serialize> Encode for JsonMessage<T> {
    type Error = serde_json::Error;

    fn get_schema() -> Option<Schema> {
        None
    }

    fn get_message_encoding() -> String {
        "json".to_string()
    }

    fn encode(&self, buf: &mut impl BufMut) -> Result<(), Self::Error> {
        serde_json::to_writer(buf.writer(), &self.0)
    }
}
