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

use std::time::{SystemTime, UNIX_EPOCH};

/// Metadata attached to every logged message
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Metadata {
    /// Time the message was logged, in nanoseconds since the Unix epoch.
    pub log_time: u64,
}

/// Caller-provided metadata; missing fields are filled in when the message is logged
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PartialMetadata {
    pub log_time: Option<u64>,
}

impl PartialMetadata {
    pub fn with_log_time(log_time: impl ToUnixNanos) -> Self {
        Self {
            log_time: Some(log_time.to_unix_nanos()),
        }
    }

    pub(crate) fn resolve(self) -> Metadata {
        Metadata {
            log_time: self.log_time.unwrap_or_else(nanoseconds_since_epoch),
        }
    }
}

/// Current wall-clock time in nanoseconds since the Unix epoch.
///
/// Clocks set before the epoch report zero.
pub fn nanoseconds_since_epoch() -> u64 {
    SystemTime::now().to_unix_nanos()
}

/// Conversion of a timestamp to nanoseconds since the Unix epoch
pub trait ToUnixNanos {
    fn to_unix_nanos(&self) -> u64;
}

impl ToUnixNanos for u64 {
    fn to_unix_nanos(&self) -> u64 {
        *self
    }
}

impl ToUnixNanos for SystemTime {
    fn to_unix_nanos(&self) -> u64 {
        self.duration_since(UNIX_EPOCH)
            .map(|d| u64::try_from(d.as_nanos()).unwrap_or(u64::MAX))
            .unwrap_or(0)
    }
}

impl<Tz: chrono::TimeZone> ToUnixNanos for chrono::DateTime<Tz> {
    fn to_unix_nanos(&self) -> u64 {
        self.timestamp_nanos_opt()
            .and_then(|nanos| u64::try_from(nanos).ok())
            .unwrap_or(0)
    }
}
