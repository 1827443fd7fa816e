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

// Messages sent by the server

use std::collections::BTreeMap;

use bytes::BufMut;
use serde::{de, Deserialize, Deserializer, Serialize, Serializer};

use super::{take_prefixed, take_u32, take_u64, Parameter, ProtocolError};
use crate::websocket::Capability;

/// JSON messages sent by the server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ServerMessage {
    ServerInfo(ServerInfo),
    Status(Status),
    #[serde(rename_all = "camelCase")]
    RemoveStatus {
        status_ids: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    Advertise {
        channels: Vec<AdvertisedChannel>,
    },
    #[serde(rename_all = "camelCase")]
    Unadvertise {
        channel_ids: Vec<u64>,
    },
    #[serde(rename_all = "camelCase")]
    ParameterValues {
        parameters: Vec<Parameter>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    AdvertiseServices(AdvertiseServices),
    #[serde(rename_all = "camelCase")]
    UnadvertiseServices {
        service_ids: Vec<u32>,
    },
    ConnectionGraphUpdate(ConnectionGraphUpdate),
    #[serde(rename_all = "camelCase")]
    ServiceCallFailure {
        service_id: u32,
        call_id: u32,
        message: String,
    },
}

impl ServerMessage {
    pub fn parse_json(json: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerInfo {
    pub name: String,
    pub capabilities: Vec<Capability>,
    #[serde(default)]
    pub supported_encodings: Vec<String>,
    #[serde(default)]
    pub metadata: BTreeMap<String, String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Severity of a [`Status`] message, sent as a number
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum StatusLevel {
    Info = 0,
    Warning = 1,
    Error = 2,
}

impl Serialize for StatusLevel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for StatusLevel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        match u8::deserialize(deserializer)? {
            0 => Ok(StatusLevel::Info),
            1 => Ok(StatusLevel::Warning),
            2 => Ok(StatusLevel::Error),
            other => Err(de::Error::custom(format!("invalid status level {other}"))),
        }
    }
}

/// Status message shown to the user by the client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Status {
    pub level: StatusLevel,
    pub message: String,
    /// Identifier used to replace or remove the status later.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
}

impl Status {
    pub fn new(level: StatusLevel, message: impl Into<String>) -> Self {
        Self {
            level,
            message: message.into(),
            id: None,
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Info, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Warning, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(StatusLevel::Error, message)
    }

    #[must_use]
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisedChannel {
    pub id: u64,
    pub topic: String,
    pub encoding: String,
    pub schema_name: String,
    pub schema: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_encoding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertiseServices {
    pub services: Vec<AdvertisedService>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisedService {
    pub id: u32,
    pub name: String,
    pub r#type: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request: Option<MessageSchema>,
    /// Set to an empty string when the service declares no request schema.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response: Option<MessageSchema>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_schema: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageSchema {
    pub encoding: String,
    pub schema_name: String,
    pub schema_encoding: String,
    pub schema: String,
}

#[derive(Debug, Default, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionGraphUpdate {
    pub published_topics: Vec<PublishedTopic>,
    pub subscribed_topics: Vec<SubscribedTopic>,
    pub advertised_services: Vec<AdvertisedServiceProviders>,
    pub removed_topics: Vec<String>,
    pub removed_services: Vec<String>,
}

impl ConnectionGraphUpdate {
    pub fn is_empty(&self) -> bool {
        self.published_topics.is_empty()
            && self.subscribed_topics.is_empty()
            && self.advertised_services.is_empty()
            && self.removed_topics.is_empty()
            && self.removed_services.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PublishedTopic {
    pub name: String,
    pub publisher_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribedTopic {
    pub name: String,
    pub subscriber_ids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AdvertisedServiceProviders {
    pub name: String,
    pub provider_ids: Vec<String>,
}

mod opcode {
    pub const MESSAGE_DATA: u8 = 1;
    pub const TIME: u8 = 2;
    pub const SERVICE_CALL_RESPONSE: u8 = 3;
    pub const FETCH_ASSET_RESPONSE: u8 = 4;
}

/// Encodes a binary MessageData frame without copying the payload twice.
pub(crate) fn encode_message_data(subscription_id: u32, log_time: u64, data: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(1 + 4 + 8 + data.len());
    buf.put_u8(opcode::MESSAGE_DATA);
    buf.put_u32_le(subscription_id);
    buf.put_u64_le(log_time);
    buf.put_slice(data);
    buf
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCallResponse {
    pub service_id: u32,
    pub call_id: u32,
    pub encoding: String,
    pub payload: Vec<u8>,
}

/// Result of an asset fetch: the asset bytes or an error message
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchAssetResponse {
    pub request_id: u32,
    pub result: Result<Vec<u8>, String>,
}

/// Binary messages sent by the server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServerBinaryMessage {
    MessageData {
        subscription_id: u32,
        log_time: u64,
        data: Vec<u8>,
    },
    Time {
        timestamp: u64,
    },
    ServiceCallResponse(ServiceCallResponse),
    FetchAssetResponse(FetchAssetResponse),
}

impl ServerBinaryMessage {
    pub fn encode(&self) -> Vec<u8> {
        match self {
            ServerBinaryMessage::MessageData {
                subscription_id,
                log_time,
                data,
            } => encode_message_data(*subscription_id, *log_time, data),
            ServerBinaryMessage::Time { timestamp } => {
                let mut buf = Vec::with_capacity(9);
                buf.put_u8(opcode::TIME);
                buf.put_u64_le(*timestamp);
                buf
            }
            ServerBinaryMessage::ServiceCallResponse(response) => {
                let mut buf = Vec::with_capacity(13 + response.encoding.len() + response.payload.len());
                buf.put_u8(opcode::SERVICE_CALL_RESPONSE);
                buf.put_u32_le(response.service_id);
                buf.put_u32_le(response.call_id);
                buf.put_u32_le(response.encoding.len() as u32);
                buf.put_slice(response.encoding.as_bytes());
                buf.put_slice(&response.payload);
                buf
            }
            ServerBinaryMessage::FetchAssetResponse(response) => {
                let (status, error, data): (u8, &[u8], &[u8]) = match &response.result {
                    Ok(data) => (0, &[], data.as_slice()),
                    Err(message) => (1, message.as_bytes(), &[]),
                };
                let mut buf = Vec::with_capacity(10 + error.len() + data.len());
                buf.put_u8(opcode::FETCH_ASSET_RESPONSE);
                buf.put_u32_le(response.request_id);
                buf.put_u8(status);
                buf.put_u32_le(error.len() as u32);
                buf.put_slice(error);
                buf.put_slice(data);
                buf
            }
        }
    }

    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let (&op, mut data) = data.split_first().ok_or(ProtocolError::EmptyBinaryMessage)?;
        match op {
            opcode::MESSAGE_DATA => {
                let subscription_id = take_u32(&mut data)?;
                let log_time = take_u64(&mut data)?;
                Ok(ServerBinaryMessage::MessageData {
                    subscription_id,
                    log_time,
                    data: data.to_vec(),
                })
            }
            opcode::TIME => Ok(ServerBinaryMessage::Time {
                timestamp: take_u64(&mut data)?,
            }),
            opcode::SERVICE_CALL_RESPONSE => {
                let service_id = take_u32(&mut data)?;
                let call_id = take_u32(&mut data)?;
                let encoding = std::str::from_utf8(take_prefixed(&mut data)?)?.to_string();
                Ok(ServerBinaryMessage::ServiceCallResponse(ServiceCallResponse {
                    service_id,
                    call_id,
                    encoding,
                    payload: data.to_vec(),
                }))
            }
            opcode::FETCH_ASSET_RESPONSE => {
                let request_id = take_u32(&mut data)?;
                let (&status, mut rest) =
                    data.split_first().ok_or(ProtocolError::BufferTooShort)?;
                let error = take_prefixed(&mut rest)?;
                let result = match status {
                    0 => Ok(rest.to_vec()),
                    1 => Err(std::str::from_utf8(error)?.to_string()),
                    other => return Err(ProtocolError::InvalidFetchAssetStatus(other)),
                };
                Ok(ServerBinaryMessage::FetchAssetResponse(FetchAssetResponse {
                    request_id,
                    result,
                }))
            }
            other => Err(ProtocolError::InvalidOpcode(other)),
        }
    }
}
