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

// Tokio runtime used by the servers when the caller has none

use std::sync::OnceLock;

use tokio::runtime::{Builder, Handle, Runtime};
use tracing::debug;

use crate::Error;

static RUNTIME: OnceLock<Runtime> = OnceLock::new();

/// Builds a multi-thread runtime. `num_threads == 0` uses one worker per core.
pub fn build_runtime(num_threads: usize) -> Result<Runtime, Error> {
    let mut builder = Builder::new_multi_thread();
    builder.enable_all().thread_name("vizlog-worker");
    if num_threads > 0 {
        builder.worker_threads(num_threads);
    }
    Ok(builder.build()?)
}

/// Starts the shared runtime with the given worker count, if it is not running yet.
pub fn init_runtime(num_threads: usize) -> Result<Handle, Error> {
    if let Some(runtime) = RUNTIME.get() {
        return Ok(runtime.handle().clone());
    }
    let runtime = build_runtime(num_threads)?;
    debug!("Started shared runtime");
    // Another thread may have won the race; its runtime is kept and ours dropped.
    if let Err(runtime) = RUNTIME.set(runtime) {
        runtime.shutdown_background();
    }
    RUNTIME
        .get()
        .map(|runtime| runtime.handle().clone())
        .ok_or_else(|| Error::Unspecified("shared runtime unavailable".to_string()))
}

/// Returns the handle of the current runtime, or of the shared one started on demand.
pub fn get_runtime_handle() -> Result<Handle, Error> {
    match Handle::try_current() {
        Ok(handle) => Ok(handle),
        Err(_) => init_runtime(0),
    }
}
