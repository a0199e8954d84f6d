//! Gateway authentication settings.

use secrecy::SecretString;
use serde::Deserialize;

/// Credentials clients must present to the gateway.
///
/// The key is accepted either as `Authorization: Bearer <key>` or as an
/// `x-api-key` header, and is compared in constant time.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(default, deny_unknown_fields)]
pub struct AuthConfig {
    /// The proxy API key. Required for serving; `None` only fails at
    /// validation so that partial configs can still be inspected.
    pub proxy_api_key: Option<SecretString>,
}
