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

use serde::{Deserialize, Serialize};

/// Optional server features announced to clients
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Capability {
    /// Clients may advertise channels and publish messages.
    ClientPublish,
    /// Clients may get and set parameters.
    Parameters,
    /// Clients may subscribe to parameter updates.
    ParametersSubscribe,
    /// The server broadcasts its clock.
    Time,
    /// The server exposes callable services.
    Services,
    /// Clients may subscribe to connection graph updates.
    ConnectionGraph,
    /// Clients may fetch assets by URI.
    Assets,
}
