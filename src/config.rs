//! Runtime configuration for the contacts manager
//!
//! Defaults suit an embedding host; `from_env` lets the CLI (and `.env`
//! files loaded through dotenvy) override each flag.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use crate::error::{ReconError, Result};
use crate::source::ListScope;

pub const ENV_MERGE_LINKED: &str = "CONTACT_RECON_MERGE_LINKED";
pub const ENV_FIND_DUPLICATES: &str = "CONTACT_RECON_FIND_DUPLICATES";
pub const ENV_USE_DEFAULT_SOURCE: &str = "CONTACT_RECON_USE_DEFAULT_SOURCE";
pub const ENV_INFLIGHT_POLICY: &str = "CONTACT_RECON_INFLIGHT_POLICY";
pub const ENV_CHECKPOINT_PATH: &str = "CONTACT_RECON_CHECKPOINT_PATH";

/// What to do with a check requested while another is in flight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InflightPolicy {
    /// Wait for the running check and share its result.
    #[default]
    Coalesce,
    /// Fail fast with `CheckAlreadyInProgress`.
    Reject,
}

impl std::str::FromStr for InflightPolicy {
    type Err = ReconError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "coalesce" => Ok(InflightPolicy::Coalesce),
            "reject" => Ok(InflightPolicy::Reject),
            other => Err(ReconError::Config(format!(
                "unknown inflight policy '{}' (expected coalesce or reject)",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReconConfig {
    /// Collapse link groups into one person before exposing `all_contacts`.
    #[serde(default = "default_true")]
    pub merge_linked: bool,

    /// Run duplicate detection on every check.
    #[serde(default = "default_true")]
    pub find_duplicates: bool,

    /// Only read the source's default container.
    #[serde(default)]
    pub use_default_source: bool,

    #[serde(default)]
    pub inflight_policy: InflightPolicy,

    /// Durable checkpoint file, for hosts that persist to disk.
    #[serde(default)]
    pub checkpoint_path: Option<PathBuf>,
}

fn default_true() -> bool {
    true
}

impl Default for ReconConfig {
    fn default() -> Self {
        Self {
            merge_linked: true,
            find_duplicates: true,
            use_default_source: false,
            inflight_policy: InflightPolicy::Coalesce,
            checkpoint_path: None,
        }
    }
}

impl ReconConfig {
    /// Defaults overridden by `CONTACT_RECON_*` environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Defaults overridden by whatever `lookup` returns for each variable.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(value) = lookup(ENV_MERGE_LINKED) {
            config.merge_linked = parse_flag(ENV_MERGE_LINKED, &value)?;
        }
        if let Some(value) = lookup(ENV_FIND_DUPLICATES) {
            config.find_duplicates = parse_flag(ENV_FIND_DUPLICATES, &value)?;
        }
        if let Some(value) = lookup(ENV_USE_DEFAULT_SOURCE) {
            config.use_default_source = parse_flag(ENV_USE_DEFAULT_SOURCE, &value)?;
        }
        if let Some(value) = lookup(ENV_INFLIGHT_POLICY) {
            config.inflight_policy = value.parse()?;
        }
        if let Some(value) = lookup(ENV_CHECKPOINT_PATH) {
            if !value.trim().is_empty() {
                config.checkpoint_path = Some(PathBuf::from(value));
            }
        }

        Ok(config)
    }

    pub fn list_scope(&self) -> ListScope {
        if self.use_default_source {
            ListScope::DefaultContainer
        } else {
            ListScope::AllContainers
        }
    }
}

fn parse_flag(key: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        other => Err(ReconError::Config(format!(
            "{} must be a boolean, got '{}'",
            key, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_without_overrides() {
        let config = ReconConfig::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config, ReconConfig::default());
        assert_eq!(config.list_scope(), ListScope::AllContainers);
    }

    #[test]
    fn test_overrides_are_applied() {
        let config = ReconConfig::from_lookup(lookup(&[
            (ENV_MERGE_LINKED, "false"),
            (ENV_USE_DEFAULT_SOURCE, "YES"),
            (ENV_INFLIGHT_POLICY, "reject"),
            (ENV_CHECKPOINT_PATH, "/tmp/cp.json"),
        ]))
        .unwrap();

        assert!(!config.merge_linked);
        assert!(config.find_duplicates);
        assert_eq!(config.list_scope(), ListScope::DefaultContainer);
        assert_eq!(config.inflight_policy, InflightPolicy::Reject);
        assert_eq!(config.checkpoint_path, Some(PathBuf::from("/tmp/cp.json")));
    }

    #[test]
    fn test_bad_values_are_config_errors() {
        let err = ReconConfig::from_lookup(lookup(&[(ENV_FIND_DUPLICATES, "maybe")])).unwrap_err();
        assert!(matches!(err, ReconError::Config(_)));

        let err = ReconConfig::from_lookup(lookup(&[(ENV_INFLIGHT_POLICY, "queue")])).unwrap_err();
        assert!(matches!(err, ReconError::Config(_)));
    }

    #[test]
    fn test_deserialize_partial_config() {
        let config: ReconConfig = serde_json::from_str(r#"{"find_duplicates": false}"#).unwrap();
        assert!(config.merge_linked);
        assert!(!config.find_duplicates);
        assert_eq!(config.inflight_policy, InflightPolicy::Coalesce);
    }
}
