//! Configuration: the declared ability map the policy registry is built from.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::StaticPolicyRegistry;

/// Path to a JSON configuration file.
pub const CONFIG_PATH_ENV: &str = "ROLEGATE_CONFIG";

/// Comma-separated list of enabled abilities, used when no file is configured.
pub const POLICIES_ENV: &str = "ROLEGATE_POLICIES";

/// Access-control configuration.
///
/// ```json
/// { "policies": { "posts.read": true, "posts.delete": false } }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RbacConfig {
    /// Declared abilities; only enabled ones are grantable.
    pub policies: BTreeMap<String, bool>,
}

impl RbacConfig {
    pub fn from_json(text: &str) -> anyhow::Result<Self> {
        serde_json::from_str(text).context("failed to parse access-control config")
    }

    pub fn from_path(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read access-control config at {path:?}"))?;
        Self::from_json(&text).with_context(|| format!("invalid config file {path:?}"))
    }

    /// Parse a comma-separated ability list; every listed ability is enabled.
    pub fn from_list(list: &str) -> Self {
        let policies = list
            .split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| (s.to_string(), true))
            .collect();
        Self { policies }
    }

    /// Load from `ROLEGATE_CONFIG`, else `ROLEGATE_POLICIES`, else an empty registry.
    pub fn from_env() -> anyhow::Result<Self> {
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            return Self::from_path(path);
        }

        if let Ok(list) = std::env::var(POLICIES_ENV) {
            return Ok(Self::from_list(&list));
        }

        tracing::warn!(
            "neither {CONFIG_PATH_ENV} nor {POLICIES_ENV} set; no permission will be grantable"
        );
        Ok(Self::default())
    }

    pub fn registry(&self) -> StaticPolicyRegistry {
        StaticPolicyRegistry::from_abilities(
            self.policies
                .iter()
                .map(|(name, enabled)| (name.clone(), *enabled)),
        )
    }
}
