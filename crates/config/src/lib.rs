//! Luthien configuration structures to map the luthien.toml configuration.

#![deny(missing_docs)]

mod auth;
mod limits;
mod loader;
mod policy;
mod server;
mod upstream;

use std::path::Path;

pub use auth::AuthConfig;
pub use limits::{ActivityConfig, LimitsConfig, QueueConfig};
pub use policy::PolicyDefinition;
use serde::Deserialize;
pub use server::ServerConfig;
pub use upstream::{Dialect, ModelPattern, ProviderConfig, UpstreamConfig};

/// Main configuration structure for the Luthien gateway.
///
/// Unknown keys anywhere in the file are a startup error: every section
/// deserializes with `deny_unknown_fields`.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// HTTP server composition settings.
    pub server: ServerConfig,
    /// Gateway authentication settings.
    pub auth: AuthConfig,
    /// Request size and timing limits.
    pub limits: LimitsConfig,
    /// Orchestrator queue sizing.
    pub queues: QueueConfig,
    /// Activity stream settings.
    pub activity: ActivityConfig,
    /// Ordered policy chain, applied left to right.
    pub policy: Vec<PolicyDefinition>,
    /// Upstream provider routing.
    pub upstream: UpstreamConfig,
}

impl Config {
    /// Load configuration from a file path.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Config> {
        loader::load(path)
    }

    /// Validates that the configuration can actually serve traffic.
    pub fn validate(&self) -> anyhow::Result<()> {
        loader::validate(self)
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_debug_snapshot;

    use crate::Config;

    #[test]
    fn defaults() {
        let config: Config = toml::from_str("").unwrap();

        assert_debug_snapshot!(&config, @r#"
        Config {
            server: ServerConfig {
                listen_address: None,
                shutdown_grace_ms: 30000,
            },
            auth: AuthConfig {
                proxy_api_key: None,
            },
            limits: LimitsConfig {
                max_request_bytes: 10485760,
                stall_threshold_ms: 30000,
                overall_deadline_ms: 600000,
            },
            queues: QueueConfig {
                capacity: 64,
            },
            activity: ActivityConfig {
                rate_per_sec: 50,
            },
            policy: [],
            upstream: UpstreamConfig {
                providers: {},
                retries: 2,
            },
        }
        "#);
    }

    #[test]
    fn unknown_top_level_key_is_rejected() {
        let error = toml::from_str::<Config>("[telemetry]\nenabled = true\n").unwrap_err();
        assert!(error.to_string().contains("unknown field `telemetry`"));
    }

    #[test]
    fn unknown_nested_key_is_rejected() {
        let error = toml::from_str::<Config>("[limits]\nmax_request_mb = 10\n").unwrap_err();
        assert!(error.to_string().contains("unknown field `max_request_mb`"));
    }
}
