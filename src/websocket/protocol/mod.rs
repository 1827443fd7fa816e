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

// Wire protocol spoken with visualization clients
//
// Text frames carry JSON objects tagged by an `op` field. Binary frames start with a
// one-byte opcode followed by little-endian fields.

mod client;
mod parameter;
mod server;

use base64::prelude::*;
use tokio_tungstenite::tungstenite::Message;

pub use client::{
    ClientAdvertisedChannel, ClientBinaryMessage, ClientMessage, ServiceCallRequest,
    SubscribeRequest,
};
pub use parameter::{Parameter, ParameterType, ParameterValue};
pub use server::{
    AdvertiseServices, AdvertisedChannel, AdvertisedService, ConnectionGraphUpdate, FetchAssetResponse,
    MessageSchema, PublishedTopic, ServerBinaryMessage, ServerInfo, ServerMessage, ServiceCallResponse,
    Status, StatusLevel, SubscribedTopic, AdvertisedServiceProviders,
};
pub(crate) use server::encode_message_data;

/// Errors parsing a protocol message
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("empty binary message")]
    EmptyBinaryMessage,
    #[error("invalid opcode {0:#04x}")]
    InvalidOpcode(u8),
    #[error("buffer too short")]
    BufferTooShort,
    #[error("invalid fetch asset status {0}")]
    InvalidFetchAssetStatus(u8),
    #[error(transparent)]
    Utf8(#[from] std::str::Utf8Error),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
    #[error(transparent)]
    Base64(#[from] base64::DecodeError),
}

/// Serializes a JSON protocol message into a text frame.
pub(crate) fn json_message<T: serde::Serialize>(msg: &T) -> Message {
    // Protocol types contain only strings, numbers and maps with string keys.
    Message::text(serde_json::to_string(msg).unwrap_or_default())
}

/// Schema data is sent as-is for text encodings and as base64 for binary ones.
pub(crate) fn encode_schema_data(schema_encoding: &str, data: &[u8]) -> Result<String, ProtocolError> {
    if crate::schema::is_binary_schema_encoding(schema_encoding) {
        Ok(BASE64_STANDARD.encode(data))
    } else {
        Ok(std::str::from_utf8(data)?.to_string())
    }
}

pub(crate) fn decode_schema_data(schema_encoding: &str, data: &str) -> Result<Vec<u8>, ProtocolError> {
    if crate::schema::is_binary_schema_encoding(schema_encoding) {
        Ok(BASE64_STANDARD.decode(data)?)
    } else {
        Ok(data.as_bytes().to_vec())
    }
}

/// Reads a little-endian u32 length prefix followed by that many bytes.
fn take_prefixed<'a>(data: &mut &'a [u8]) -> Result<&'a [u8], ProtocolError> {
    let len = take_u32(data)? as usize;
    if data.len() < len {
        return Err(ProtocolError::BufferTooShort);
    }
    let (head, tail) = data.split_at(len);
    *data = tail;
    Ok(head)
}

fn take_u32(data: &mut &[u8]) -> Result<u32, ProtocolError> {
    let (head, tail) = data
        .split_first_chunk::<4>()
        .ok_or(ProtocolError::BufferTooShort)?;
    *data = tail;
    Ok(u32::from_le_bytes(*head))
}

fn take_u64(data: &mut &[u8]) -> Result<u64, ProtocolError> {
    let (head, tail) = data
        .split_first_chunk::<8>()
        .ok_or(ProtocolError::BufferTooShort)?;
    *data = tail;
    Ok(u64::from_le_bytes(*head))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_data_encoding() {
        assert_eq!(encode_schema_data("jsonschema", b"{}").unwrap(), "{}");
        let encoded = encode_schema_data("protobuf", &[0xff, 0x00]).unwrap();
        assert_eq!(encoded, "/wA=");
        assert_eq!(decode_schema_data("protobuf", &encoded).unwrap(), vec![0xff, 0x00]);
        assert!(encode_schema_data("ros2msg", &[0xff]).is_err());
    }

    #[test]
    fn test_take_prefixed() {
        let mut data: &[u8] = &[2, 0, 0, 0, b'h', b'i', 7];
        assert_eq!(take_prefixed(&mut data).unwrap(), b"hi");
        assert_eq!(data, &[7]);
        let mut short: &[u8] = &[9, 0, 0, 0, 1];
        assert!(matches!(take_prefixed(&mut short), Err(ProtocolError::BufferTooShort)));
    }
}
