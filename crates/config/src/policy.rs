//! Policy chain configuration.

use serde::Deserialize;

/// One policy in the configured chain.
///
/// ```toml
/// [[policy]]
/// class_ref = "noop"
///
/// [policy.config]
/// verbose = true
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PolicyDefinition {
    /// Registry key of the policy implementation. Unknown refs fail startup.
    pub class_ref: String,

    /// Opaque policy settings, handed to the policy factory as-is.
    #[serde(default)]
    pub config: serde_json::Value,
}
