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

use std::ops::Deref;
use std::sync::{Arc, LazyLock};

use super::Context;
use crate::channel::{LazyChannel, LazyRawChannel};
use crate::encode::Encode;

static DEFAULT_CONTEXT: LazyContext = LazyContext::new();

/// A context created on first use
///
/// Lets contexts and the channels bound to them live in `static` items.
///
/// ```no_run
/// use serde_json::{json, Value};
/// use vizlog::{LazyChannel, LazyContext, LazyRawChannel};
///
/// static ROBOT: LazyContext = LazyContext::new();
/// static STATUS: LazyRawChannel = ROBOT.raw_channel("/status", "json");
/// static ODOM: LazyChannel<Value> = ROBOT.channel("/odom");
///
/// STATUS.log(br#"{"ok": true}"#);
/// ODOM.log(&json!({"x": 0.5}));
/// ```
pub struct LazyContext(LazyLock<Arc<Context>>);

impl LazyContext {
    #[allow(clippy::new_without_default)]
    pub const fn new() -> Self {
        Self(LazyLock::new(Context::new))
    }

    /// The process-wide default context. [`Context::get_default`] returns the same one.
    pub const fn get_default() -> &'static Self {
        &DEFAULT_CONTEXT
    }

    /// Declares a typed channel on this context.
    pub const fn channel<T: Encode>(&'static self, topic: &'static str) -> LazyChannel<T> {
        LazyChannel::new(topic).context(self)
    }

    /// Declares a raw channel on this context.
    pub const fn raw_channel(
        &'static self,
        topic: &'static str,
        message_encoding: &'static str,
    ) -> LazyRawChannel {
        LazyRawChannel::new(topic, message_encoding).context(self)
    }
}

impl Deref for LazyContext {
    type Target = Arc<Context>;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
