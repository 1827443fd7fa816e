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

// TLS for the streaming server

use std::path::Path;
use std::sync::Arc;

use tokio_rustls::rustls::pki_types::pem::PemObject;
use tokio_rustls::rustls::pki_types::{CertificateDer, PrivateKeyDer};
use tokio_rustls::rustls::ServerConfig;
use tokio_rustls::TlsAcceptor;

use crate::Error;

/// PEM encoded certificate chain and private key
#[derive(Clone)]
pub struct TlsIdentity {
    pub cert: Vec<u8>,
    pub key: Vec<u8>,
}

impl TlsIdentity {
    pub fn from_files(cert: impl AsRef<Path>, key: impl AsRef<Path>) -> Result<Self, Error> {
        Ok(Self {
            cert: std::fs::read(cert)?,
            key: std::fs::read(key)?,
        })
    }
}

impl std::fmt::Debug for TlsIdentity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TlsIdentity").finish_non_exhaustive()
    }
}

pub(crate) fn build_acceptor(identity: &TlsIdentity) -> Result<TlsAcceptor, Error> {
    let certs = CertificateDer::pem_slice_iter(&identity.cert)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| Error::ConfigurationError(format!("invalid TLS certificate: {e:?}")))?;
    if certs.is_empty() {
        return Err(Error::ConfigurationError(
            "no certificates found in TLS certificate file".to_string(),
        ));
    }
    let key = PrivateKeyDer::from_pem_slice(&identity.key)
        .map_err(|e| Error::ConfigurationError(format!("invalid TLS private key: {e:?}")))?;
    let config = ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)
        .map_err(|e| Error::ConfigurationError(format!("invalid TLS configuration: {e}")))?;
    Ok(TlsAcceptor::from(Arc::new(config)))
}
