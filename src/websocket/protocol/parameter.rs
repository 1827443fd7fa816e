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

// Parameter types

use std::collections::BTreeMap;

use base64::prelude::*;
use serde::{Deserialize, Serialize};

/// Type hint for values that JSON cannot represent on its own
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ParameterType {
    /// A base64 string holding raw bytes.
    ByteArray,
    /// A number that must be treated as a float even if it has no fraction.
    Float64,
    /// An array of float64 numbers.
    Float64Array,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ParameterValue {
    Integer(i64),
    Float64(f64),
    Bool(bool),
    String(String),
    Array(Vec<ParameterValue>),
    Dict(BTreeMap<String, ParameterValue>),
}

/// Named parameter. A parameter without a value is unset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "RawParameter")]
pub struct Parameter {
    pub name: String,
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub r#type: Option<ParameterType>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub value: Option<ParameterValue>,
}

#[derive(Deserialize)]
struct RawParameter {
    name: String,
    #[serde(rename = "type", default)]
    r#type: Option<ParameterType>,
    #[serde(default)]
    value: Option<ParameterValue>,
}

impl TryFrom<RawParameter> for Parameter {
    type Error = String;

    /// Applies the type hint, so that `{"type": "float64", "value": 1}` is a float.
    fn try_from(raw: RawParameter) -> Result<Self, Self::Error> {
        let value = match (raw.r#type, raw.value) {
            (Some(ParameterType::Float64), Some(value)) => Some(as_float(value)?),
            (Some(ParameterType::Float64Array), Some(ParameterValue::Array(values))) => Some(
                ParameterValue::Array(values.into_iter().map(as_float).collect::<Result<_, _>>()?),
            ),
            (Some(ParameterType::Float64Array), Some(_)) => {
                return Err("value with type float64_array is not an array".to_string())
            }
            (Some(ParameterType::ByteArray), Some(ParameterValue::String(s))) => {
                BASE64_STANDARD.decode(&s).map_err(|e| e.to_string())?;
                Some(ParameterValue::String(s))
            }
            (Some(ParameterType::ByteArray), Some(_)) => {
                return Err("value with type byte_array is not a string".to_string())
            }
            (_, value) => value,
        };
        Ok(Parameter {
            name: raw.name,
            r#type: raw.r#type,
            value,
        })
    }
}

fn as_float(value: ParameterValue) -> Result<ParameterValue, String> {
    match value {
        ParameterValue::Integer(i) => Ok(ParameterValue::Float64(i as f64)),
        ParameterValue::Float64(f) => Ok(ParameterValue::Float64(f)),
        _ => Err("non-numeric value with type float64".to_string()),
    }
}

impl Parameter {
    /// A parameter with no value.
    pub fn empty(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            r#type: None,
            value: None,
        }
    }

    pub fn integer(name: impl Into<String>, value: i64) -> Self {
        Self::with_value(name, None, ParameterValue::Integer(value))
    }

    pub fn float64(name: impl Into<String>, value: f64) -> Self {
        Self::with_value(
            name,
            Some(ParameterType::Float64),
            ParameterValue::Float64(value),
        )
    }

    pub fn float64_array(name: impl Into<String>, values: impl IntoIterator<Item = f64>) -> Self {
        Self::with_value(
            name,
            Some(ParameterType::Float64Array),
            ParameterValue::Array(values.into_iter().map(ParameterValue::Float64).collect()),
        )
    }

    pub fn bool(name: impl Into<String>, value: bool) -> Self {
        Self::with_value(name, None, ParameterValue::Bool(value))
    }

    pub fn string(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self::with_value(name, None, ParameterValue::String(value.into()))
    }

    pub fn byte_array(name: impl Into<String>, data: &[u8]) -> Self {
        Self::with_value(
            name,
            Some(ParameterType::ByteArray),
            ParameterValue::String(BASE64_STANDARD.encode(data)),
        )
    }

    pub fn dict(name: impl Into<String>, value: BTreeMap<String, ParameterValue>) -> Self {
        Self::with_value(name, None, ParameterValue::Dict(value))
    }

    fn with_value(
        name: impl Into<String>,
        r#type: Option<ParameterType>,
        value: ParameterValue,
    ) -> Self {
        Self {
            name: name.into(),
            r#type,
            value: Some(value),
        }
    }

    /// Decodes the value of a byte array parameter. Other parameters have no bytes.
    pub fn get_byte_array(&self) -> Option<Vec<u8>> {
        match (&self.r#type, &self.value) {
            (Some(ParameterType::ByteArray), Some(value)) => value.as_bytes().ok(),
            _ => None,
        }
    }
}

impl ParameterValue {
    /// Decodes a base64 string value.
    pub fn as_bytes(&self) -> Result<Vec<u8>, crate::Error> {
        match self {
            ParameterValue::String(s) => Ok(BASE64_STANDARD.decode(s)?),
            other => Err(crate::Error::ValueError(format!(
                "expected a base64 string, got {other:?}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_float_hint_applied() {
        let param: Parameter =
            serde_json::from_value(json!({"name": "f", "type": "float64", "value": 2})).unwrap();
        assert_eq!(param.value, Some(ParameterValue::Float64(2.0)));

        let param: Parameter = serde_json::from_value(
            json!({"name": "fa", "type": "float64_array", "value": [1, 2.5]}),
        )
        .unwrap();
        assert_eq!(
            param.value,
            Some(ParameterValue::Array(vec![
                ParameterValue::Float64(1.0),
                ParameterValue::Float64(2.5)
            ]))
        );
    }

    #[test]
    fn test_untyped_values() {
        let param: Parameter =
            serde_json::from_value(json!({"name": "i", "value": 3})).unwrap();
        assert_eq!(param.value, Some(ParameterValue::Integer(3)));
        let param: Parameter =
            serde_json::from_value(json!({"name": "d", "value": {"a": true}})).unwrap();
        assert_eq!(
            param.value,
            Some(ParameterValue::Dict(BTreeMap::from([(
                "a".to_string(),
                ParameterValue::Bool(true)
            )])))
        );
        let param: Parameter = serde_json::from_value(json!({"name": "unset"})).unwrap();
        assert_eq!(param, Parameter::empty("unset"));
    }

    #[test]
    fn test_byte_array() {
        let param = Parameter::byte_array("bytes", &[1, 2, 3]);
        let value = serde_json::to_value(&param).unwrap();
        assert_eq!(value, json!({"name": "bytes", "type": "byte_array", "value": "AQID"}));
        let parsed: Parameter = serde_json::from_value(value).unwrap();
        assert_eq!(parsed.get_byte_array(), Some(vec![1, 2, 3]));
        assert!(matches!(
            ParameterValue::String("!!".to_string()).as_bytes(),
            Err(crate::Error::Base64DecodeError(_))
        ));
        assert!(ParameterValue::Bool(true).as_bytes().is_err());

        let invalid = json!({"name": "bytes", "type": "byte_array", "value": "!!"});
        assert!(serde_json::from_value::<Parameter>(invalid).is_err());
    }

    #[test]
    fn test_float_serializes_with_type() {
        let value = serde_json::to_value(Parameter::float64("f", 1.0)).unwrap();
        assert_eq!(value, json!({"name": "f", "type": "float64", "value": 1.0}));
    }
}
