//! Secure channel adapters
//!
//! A link uses at most one mechanism: mutual TLS around the stream
//! ([`tls`]) or a symmetric payload cipher ([`cipher`]). Configuration
//! validation rejects links that name both.

pub mod cipher;
pub mod tls;

pub use cipher::PayloadCipher;

use crate::config::TlsConfig;
use crate::error::Result;
use rustls::ClientConfig;
use std::sync::Arc;

/// Resolved client-side TLS for one outbound link
#[derive(Clone)]
pub struct ClientTls {
    pub config: Arc<ClientConfig>,
    /// Name checked against the server certificate
    pub server_name: String,
}

impl ClientTls {
    /// Load certificates for a link dialling `address`
    pub fn from_config(tls: &TlsConfig, address: &str) -> Result<Self> {
        let server_name = tls
            .server_name
            .clone()
            .unwrap_or_else(|| tls::host_of(address).to_string());
        Ok(Self {
            config: tls::client_config(tls)?,
            server_name,
        })
    }
}

impl std::fmt::Debug for ClientTls {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientTls")
            .field("server_name", &self.server_name)
            .finish_non_exhaustive()
    }
}
