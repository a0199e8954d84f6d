//! HTTP server composition settings.

use std::net::SocketAddr;

use serde::Deserialize;

/// Settings for the HTTP listener and shutdown behavior.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerConfig {
    /// The socket address the gateway binds to.
    ///
    /// Defaults to `127.0.0.1:8787` when unset.
    pub listen_address: Option<SocketAddr>,

    /// How long in-flight transactions may drain on shutdown before being
    /// cancelled.
    pub shutdown_grace_ms: u64,
}

impl ServerConfig {
    /// The address to bind, falling back to the default when unset.
    pub fn listen_address_or_default(&self) -> SocketAddr {
        self.listen_address
            .unwrap_or_else(|| SocketAddr::from(([127, 0, 0, 1], 8787)))
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_address: None,
            shutdown_grace_ms: 30_000,
        }
    }
}
