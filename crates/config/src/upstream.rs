//! Upstream provider routing configuration.

use std::{collections::BTreeMap, fmt};

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Deserializer};

/// Routing table from model patterns to upstream providers.
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Named providers, matched against the request model in declaration
    /// order (BTreeMap keys, so order is by provider name).
    pub providers: BTreeMap<String, ProviderConfig>,

    /// Maximum retry attempts for retryable upstream failures.
    pub retries: u32,
}

impl UpstreamConfig {
    /// Find the first provider whose pattern matches the requested model.
    pub fn provider_for_model(&self, model: &str) -> Option<(&str, &ProviderConfig)> {
        self.providers
            .iter()
            .find(|(_, provider)| provider.model_pattern.is_match(model))
            .map(|(name, provider)| (name.as_str(), provider))
    }
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            providers: BTreeMap::new(),
            retries: 2,
        }
    }
}

/// One upstream provider endpoint.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    /// Requests whose model matches this pattern are routed here.
    pub model_pattern: ModelPattern,

    /// Base URL of the provider API, e.g. `https://api.openai.com/v1`.
    pub base_url: String,

    /// Name of the environment variable holding the provider credential.
    #[serde(default)]
    pub credentials_ref: Option<String>,

    /// Wire dialect the provider speaks.
    pub dialect: Dialect,
}

/// The wire protocol of an upstream provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// OpenAI chat completions API.
    Openai,
    /// Anthropic messages API.
    Anthropic,
}

/// A compiled, case-insensitive model matching pattern.
#[derive(Clone)]
pub struct ModelPattern {
    regex: Regex,
}

impl ModelPattern {
    /// Compile a pattern. The pattern must be non-empty and a valid regex.
    pub fn new(pattern: &str) -> anyhow::Result<Self> {
        let trimmed = pattern.trim();

        if trimmed.is_empty() {
            anyhow::bail!("model_pattern must not be empty");
        }

        let regex = RegexBuilder::new(trimmed)
            .case_insensitive(true)
            .build()
            .map_err(|e| anyhow::anyhow!("invalid model_pattern '{trimmed}': {e}"))?;

        Ok(Self { regex })
    }

    /// Whether the given model name matches.
    pub fn is_match(&self, model: &str) -> bool {
        self.regex.is_match(model)
    }

    /// The original pattern string.
    pub fn pattern(&self) -> &str {
        self.regex.as_str()
    }
}

impl fmt::Debug for ModelPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModelPattern").field("pattern", &self.pattern()).finish()
    }
}

impl<'de> Deserialize<'de> for ModelPattern {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let pattern = String::deserialize(deserializer)?;
        ModelPattern::new(&pattern).map_err(serde::de::Error::custom)
    }
}
