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

use std::borrow::Cow;

/// Description of the format of the messages on a channel
///
/// Schemas are immutable once attached to a channel. The channel owns its copy of the
/// schema bytes, so the buffer used to build a schema may be dropped or reused afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Schema {
    /// Name, for example `foxglove.Log` or `sensor_msgs/Image`.
    pub name: String,
    /// Encoding of the schema data, for example `protobuf`, `jsonschema` or `ros2msg`.
    pub encoding: String,
    /// Schema payload.
    pub data: Cow<'static, [u8]>,
}

impl Schema {
    pub fn new(
        name: impl Into<String>,
        encoding: impl Into<String>,
        data: impl Into<Cow<'static, [u8]>>,
    ) -> Self {
        Self {
            name: name.into(),
            encoding: encoding.into(),
            data: data.into(),
        }
    }

    /// Builds a `jsonschema` schema from a JSON schema document.
    pub fn json_schema(name: impl Into<String>, schema: &serde_json::Value) -> Self {
        Self::new(name, "jsonschema", schema.to_string().into_bytes())
    }

    /// Returns true if the schema data is binary and must be base64-encoded in text protocols.
    pub(crate) fn is_binary(&self) -> bool {
        is_binary_schema_encoding(&self.encoding)
    }
}

pub(crate) fn is_binary_schema_encoding(encoding: &str) -> bool {
    matches!(encoding, "protobuf" | "flatbuffer")
}
