//! Typed policy registry.
//!
//! Policies are constructed at startup from configuration by `class_ref`.
//! Unknown refs fail startup; there is no dynamic code loading.

use std::{collections::BTreeMap, sync::Arc};

use config::PolicyDefinition;

use crate::policy::{NoopPolicy, Policy, PolicyChain};

type PolicyFactory = Box<dyn Fn(serde_json::Value) -> anyhow::Result<Arc<dyn Policy>> + Send + Sync>;

/// Maps `class_ref` strings to policy constructors.
pub struct PolicyRegistry {
    factories: BTreeMap<String, PolicyFactory>,
}

impl PolicyRegistry {
    /// A registry with the built-in policies registered.
    pub fn new() -> Self {
        let mut registry = Self {
            factories: BTreeMap::new(),
        };

        registry.register("noop", |_config| Ok(Arc::new(NoopPolicy)));

        registry
    }

    /// Register a policy constructor under a `class_ref`.
    pub fn register<F>(&mut self, class_ref: impl Into<String>, factory: F)
    where
        F: Fn(serde_json::Value) -> anyhow::Result<Arc<dyn Policy>> + Send + Sync + 'static,
    {
        self.factories.insert(class_ref.into(), Box::new(factory));
    }

    /// The registered `class_ref`s, for error messages.
    pub fn known_refs(&self) -> Vec<&str> {
        self.factories.keys().map(String::as_str).collect()
    }

    /// Build the configured chain. Any unknown `class_ref` is a startup
    /// error.
    pub fn build_chain(&self, definitions: &[PolicyDefinition]) -> anyhow::Result<PolicyChain> {
        let mut policies = Vec::with_capacity(definitions.len());

        for definition in definitions {
            let Some(factory) = self.factories.get(&definition.class_ref) else {
                anyhow::bail!(
                    "unknown policy class_ref '{}'; known: [{}]",
                    definition.class_ref,
                    self.known_refs().join(", ")
                );
            };

            let policy = factory(definition.config.clone())
                .map_err(|e| anyhow::anyhow!("failed to construct policy '{}': {e}", definition.class_ref))?;

            policies.push(policy);
        }

        Ok(PolicyChain::new(policies))
    }
}

impl Default for PolicyRegistry {
    fn default() -> Self {
        Self::new()
    }
}
