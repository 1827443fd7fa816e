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

// Messages sent by clients

use bytes::BufMut;
use serde::{Deserialize, Serialize};

use super::{take_prefixed, take_u32, Parameter, ProtocolError};

/// JSON messages sent by clients
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "camelCase")]
pub enum ClientMessage {
    Subscribe {
        subscriptions: Vec<SubscribeRequest>,
    },
    #[serde(rename_all = "camelCase")]
    Unsubscribe {
        subscription_ids: Vec<u32>,
    },
    Advertise {
        channels: Vec<ClientAdvertisedChannel>,
    },
    #[serde(rename_all = "camelCase")]
    Unadvertise {
        channel_ids: Vec<u32>,
    },
    #[serde(rename_all = "camelCase")]
    GetParameters {
        parameter_names: Vec<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    SetParameters {
        parameters: Vec<Parameter>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },
    #[serde(rename_all = "camelCase")]
    SubscribeParameterUpdates {
        parameter_names: Vec<String>,
    },
    #[serde(rename_all = "camelCase")]
    UnsubscribeParameterUpdates {
        parameter_names: Vec<String>,
    },
    SubscribeConnectionGraph,
    UnsubscribeConnectionGraph,
    #[serde(rename_all = "camelCase")]
    FetchAsset {
        uri: String,
        request_id: u32,
    },
}

impl ClientMessage {
    pub fn parse_json(json: &str) -> Result<Self, ProtocolError> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubscribeRequest {
    pub id: u32,
    pub channel_id: u64,
}

/// Channel advertised by a publishing client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClientAdvertisedChannel {
    pub id: u32,
    pub topic: String,
    pub encoding: String,
    pub schema_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schema_encoding: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceCallRequest {
    pub service_id: u32,
    pub call_id: u32,
    pub encoding: String,
    pub payload: Vec<u8>,
}

mod opcode {
    pub const MESSAGE_DATA: u8 = 1;
    pub const SERVICE_CALL_REQUEST: u8 = 2;
}

/// Binary messages sent by clients
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientBinaryMessage {
    MessageData { channel_id: u32, data: Vec<u8> },
    ServiceCallRequest(ServiceCallRequest),
}

impl ClientBinaryMessage {
    pub fn parse(data: &[u8]) -> Result<Self, ProtocolError> {
        let (&op, mut data) = data.split_first().ok_or(ProtocolError::EmptyBinaryMessage)?;
        match op {
            opcode::MESSAGE_DATA => {
                let channel_id = take_u32(&mut data)?;
                Ok(ClientBinaryMessage::MessageData {
                    channel_id,
                    data: data.to_vec(),
                })
            }
            opcode::SERVICE_CALL_REQUEST => {
                let service_id = take_u32(&mut data)?;
                let call_id = take_u32(&mut data)?;
                let encoding = std::str::from_utf8(take_prefixed(&mut data)?)?.to_string();
                Ok(ClientBinaryMessage::ServiceCallRequest(ServiceCallRequest {
                    service_id,
                    call_id,
                    encoding,
                    payload: data.to_vec(),
                }))
            }
            other => Err(ProtocolError::InvalidOpcode(other)),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        match self {
            ClientBinaryMessage::MessageData { channel_id, data } => {
                let mut buf = Vec::with_capacity(5 + data.len());
                buf.put_u8(opcode::MESSAGE_DATA);
                buf.put_u32_le(*channel_id);
                buf.put_slice(data);
                buf
            }
            ClientBinaryMessage::ServiceCallRequest(request) => {
                let mut buf =
                    Vec::with_capacity(13 + request.encoding.len() + request.payload.len());
                buf.put_u8(opcode::SERVICE_CALL_REQUEST);
                buf.put_u32_le(request.service_id);
                buf.put_u32_le(request.call_id);
                buf.put_u32_le(request.encoding.len() as u32);
                buf.put_slice(request.encoding.as_bytes());
                buf.put_slice(&request.payload);
                buf
            }
        }
    }
}
