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

use std::future::Future;

use async_trait::async_trait;

/// Produces asset bytes for `fetchAsset` requests
///
/// URIs have already passed the asset allowlist and the path traversal check. An
/// error is sent back to the client as the failure message.
#[async_trait]
pub trait AssetHandler: Send + Sync + 'static {
    async fn fetch(&self, uri: String) -> Result<Vec<u8>, String>;
}

/// Adapter turning an async closure into an [`AssetHandler`]
pub struct AssetHandlerFn<F>(pub F);

#[async_trait]
impl<F, Fut> AssetHandler for AssetHandlerFn<F>
where
    F: Fn(String) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Vec<u8>, String>> + Send + 'static,
{
    async fn fetch(&self, uri: String) -> Result<Vec<u8>, String> {
        (self.0)(uri).await
    }
}
