//! Runtime configuration, sourced entirely from environment variables.
//!
//! Heimdall carries no sidecar ConfigMap/Secret store to watch: its only
//! persisted state is the annotations it writes back to workloads (see
//! `models::workload`). A bad value logs and falls back to the default
//! rather than failing startup.

use serde::{Deserialize, Serialize};
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeimdallConfig {
    /// Minimum interval between checks of the same workload. Source:
    /// `HEIMDALL_RECHECK_MINS`.
    pub recheck_minutes: u64,
    /// Bearer token overriding the imagePullSecrets credential chain.
    /// Source: `REGISTRY_TOKEN`.
    pub registry_token: Option<String>,
    /// Comma-separated namespace allow-list. Source: `HEIMDALL_NAMESPACES`.
    pub namespace_filter: Option<Vec<String>>,
    /// Regex restricting which namespaces are eligible. Source:
    /// `HEIMDALL_NAMESPACE_PATTERN`.
    pub namespace_pattern: Option<String>,
    /// Restrict reconciliation to a single named component, or `*` for all.
    /// Source: `HEIMDALL_COMPONENT`.
    pub component_filter: String,
    /// Whether pod labelling writeback is enabled. Source:
    /// `HEIMDALL_LABEL_PODS`.
    pub label_pods: bool,
    /// Keep only images whose full path contains `"redhat"`. Source:
    /// `HEIMDALL_REDHAT_ONLY` (the historical vendor behavior, made
    /// overridable).
    pub redhat_only_filter: bool,
    pub metrics_addr: String,
    pub health_addr: String,
}

impl Default for HeimdallConfig {
    fn default() -> Self {
        Self {
            recheck_minutes: 30,
            registry_token: None,
            namespace_filter: None,
            namespace_pattern: None,
            component_filter: "*".to_string(),
            label_pods: true,
            redhat_only_filter: true,
            metrics_addr: "0.0.0.0:9090".to_string(),
            health_addr: "0.0.0.0:9090".to_string(),
        }
    }
}

impl HeimdallConfig {
    /// Build configuration from the process environment. Unparseable
    /// numeric/bool values are logged and replaced with the default rather
    /// than failing startup, mirroring the `ParseError` recovery rule applied
    /// to persisted annotations (`recheck::should_check`).
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let recheck_minutes = parse_env_or_default("HEIMDALL_RECHECK_MINS", defaults.recheck_minutes);
        let registry_token = non_empty_env("REGISTRY_TOKEN");
        let namespace_filter = std::env::var("HEIMDALL_NAMESPACES").ok().map(|v| {
            v.split(',')
                .map(|s| s.trim().to_string())
                .filter(|s| !s.is_empty())
                .collect()
        });
        let namespace_pattern = non_empty_env("HEIMDALL_NAMESPACE_PATTERN");
        let component_filter =
            std::env::var("HEIMDALL_COMPONENT").unwrap_or(defaults.component_filter);
        let label_pods = parse_env_or_default("HEIMDALL_LABEL_PODS", defaults.label_pods);
        let redhat_only_filter =
            parse_env_or_default("HEIMDALL_REDHAT_ONLY", defaults.redhat_only_filter);

        Self {
            recheck_minutes,
            registry_token,
            namespace_filter,
            namespace_pattern,
            component_filter,
            label_pods,
            redhat_only_filter,
            ..defaults
        }
    }
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parse_env_or_default<T>(key: &str, default: T) -> T
where
    T: std::str::FromStr,
{
    match std::env::var(key) {
        Ok(raw) => raw.parse().unwrap_or_else(|_| {
            warn!("{} has an unparseable value {:?}, using default", key, raw);
            default
        }),
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn defaults_when_env_unset() {
        unsafe {
            std::env::remove_var("HEIMDALL_RECHECK_MINS");
            std::env::remove_var("HEIMDALL_REDHAT_ONLY");
        }
        let cfg = HeimdallConfig::from_env();
        assert_eq!(cfg.recheck_minutes, 30);
        assert!(cfg.redhat_only_filter);
    }

    #[test]
    #[serial]
    fn malformed_recheck_mins_falls_back_to_default() {
        unsafe {
            std::env::set_var("HEIMDALL_RECHECK_MINS", "not-a-number");
        }
        let cfg = HeimdallConfig::from_env();
        assert_eq!(cfg.recheck_minutes, 30);
        unsafe {
            std::env::remove_var("HEIMDALL_RECHECK_MINS");
        }
    }

    #[test]
    #[serial]
    fn namespace_filter_splits_and_trims() {
        unsafe {
            std::env::set_var("HEIMDALL_NAMESPACES", "team-a, team-b,team-c");
        }
        let cfg = HeimdallConfig::from_env();
        assert_eq!(
            cfg.namespace_filter,
            Some(vec!["team-a".to_string(), "team-b".to_string(), "team-c".to_string()])
        );
        unsafe {
            std::env::remove_var("HEIMDALL_NAMESPACES");
        }
    }
}
