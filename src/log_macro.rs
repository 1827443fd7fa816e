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

// Support for the `log!` macro

use std::sync::Arc;

use tracing::warn;

use crate::channel::{Channel, RawChannel};
use crate::encode::Encode;
use crate::metadata::PartialMetadata;
use crate::ChannelBuilder;

/// Finds or creates the default-context channel for a `log!` call site.
#[cold]
pub fn channel_for<T: Encode>(topic: &str, _msg: &T) -> Option<Arc<RawChannel>> {
    match ChannelBuilder::new(topic).build::<T>() {
        Ok(channel) => Some(channel.raw().clone()),
        Err(e) => {
            warn!("Cannot create channel '{}' for log!: {}", topic, e);
            None
        }
    }
}

pub fn log_message<T: Encode>(channel: &Arc<RawChannel>, msg: &T, metadata: PartialMetadata) {
    if channel.has_sinks() {
        Channel::<T>::from_raw(channel.clone()).log_with_meta(msg, metadata);
    }
}

/// Logs a message on a topic of the default context.
///
/// The channel is created by the first call at each call site, taking its schema and
/// message encoding from the message type. An open channel with the same topic and
/// encoding is reused. Channels created this way are never closed.
///
/// An optional `log_time` sets the timestamp; it accepts anything implementing
/// [`ToUnixNanos`](crate::ToUnixNanos).
///
/// ```no_run
/// use serde_json::json;
///
/// vizlog::log!("/battery", json!({"voltage": 12.1}));
/// vizlog::log!("/battery", json!({"voltage": 12.0}), log_time = 1_700_000_000_000_000_000u64);
/// ```
///
/// Each call site should always log the same type. Messages of another type would be
/// recorded under the schema the channel was created with.
#[macro_export]
macro_rules! log {
    ($topic:literal, $msg:expr $(,)?) => {{
        $crate::__log_with_meta!($topic, $msg, $crate::PartialMetadata::default())
    }};
    ($topic:literal, $msg:expr, log_time = $log_time:expr $(,)?) => {{
        $crate::__log_with_meta!(
            $topic,
            $msg,
            $crate::PartialMetadata::with_log_time($log_time)
        )
    }};
}

#[doc(hidden)]
#[macro_export]
macro_rules! __log_with_meta {
    ($topic:literal, $msg:expr, $metadata:expr) => {{
        static CHANNEL: ::std::sync::OnceLock<
            ::std::option::Option<::std::sync::Arc<$crate::RawChannel>>,
        > = ::std::sync::OnceLock::new();
        let msg = &$msg;
        if let ::std::option::Option::Some(channel) =
            CHANNEL.get_or_init(|| $crate::log_macro::channel_for($topic, msg))
        {
            $crate::log_macro::log_message(channel, msg, $metadata);
        }
    }};
}
