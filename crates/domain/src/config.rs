//! Client configuration.
//!
//! Loadable from TOML, overridable from `DADP_*` environment variables.
//! Every knob has a serde default so a partial document (or none at all)
//! yields a working configuration.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use crate::model::Shape;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub sync: SyncConfig,
    #[serde(default)]
    pub intercept: InterceptConfig,
    /// Override for the per-deployment state directory (`~/.dadp-<shape>/`
    /// when unset).
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Hub connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubConfig {
    /// Hub base URL, e.g. `https://hub.example.com`.
    #[serde(default)]
    pub base_url: String,
    /// Caller-chosen stable deployment label (`instanceId` on the wire).
    #[serde(default)]
    pub alias: String,
    #[serde(default = "d_shape")]
    pub shape: Shape,
    /// When true, continue without a tenant when the Hub is unreachable;
    /// data-plane calls that require the tenant are skipped.
    #[serde(default = "d_true")]
    pub fail_open: bool,
    #[serde(default = "d_2")]
    pub max_retries: u32,
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            alias: String::new(),
            shape: Shape::Aop,
            fail_open: true,
            max_retries: 2,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Engine connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Static crypto base URL.  Usually left unset and discovered from the
    /// Hub's endpoint block instead.
    #[serde(default)]
    pub crypto_url: Option<String>,
    #[serde(default = "d_api_base_path")]
    pub api_base_path: String,
    /// When set, the HTTP client trusts only this PEM bundle.
    #[serde(default)]
    pub ca_cert_path: Option<PathBuf>,
    #[serde(default = "d_5000")]
    pub timeout_ms: u64,
    #[serde(default)]
    pub max_retries: u32,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            crypto_url: None,
            api_base_path: d_api_base_path(),
            ca_cert_path: None,
            timeout_ms: 5000,
            max_retries: 0,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Batching
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Groups smaller than this go through the individual endpoints.
    #[serde(default = "d_100")]
    pub min_size: usize,
    /// Batches larger than this are split into chunks; order is preserved
    /// across chunks.
    #[serde(default = "d_10000")]
    pub max_size: usize,
    #[serde(default)]
    pub disabled: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            min_size: 100,
            max_size: 10_000,
            disabled: false,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sync loop
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "d_30")]
    pub interval_secs: u64,
    /// Bounded wait for the local schema enumeration before bootstrap
    /// continues with whatever is available.
    #[serde(default = "d_30")]
    pub schema_gate_timeout_secs: u64,
    #[serde(default = "d_5000")]
    pub http_timeout_ms: u64,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            interval_secs: 30,
            schema_gate_timeout_secs: 30,
            http_timeout_ms: 5000,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Interception
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct InterceptConfig {
    /// On an Engine fault, return the untransformed original instead of
    /// surfacing the error.
    #[serde(default = "d_true")]
    pub fallback_to_original: bool,
}

impl Default for InterceptConfig {
    fn default() -> Self {
        Self {
            fallback_to_original: true,
        }
    }
}

// ── serde default helpers ────────────────────────────────────────────

fn d_shape() -> Shape {
    Shape::Aop
}
fn d_true() -> bool {
    true
}
fn d_2() -> u32 {
    2
}
fn d_30() -> u64 {
    30
}
fn d_100() -> usize {
    100
}
fn d_10000() -> usize {
    10_000
}
fn d_5000() -> u64 {
    5000
}
fn d_api_base_path() -> String {
    "/api/v1/crypto".into()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Environment overrides
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

impl Config {
    /// Defaults plus `DADP_*` environment overrides.
    pub fn from_env() -> Self {
        let mut cfg = Config::default();
        cfg.apply_env();
        cfg
    }

    /// Apply `DADP_*` environment overrides on top of the current values.
    /// Unset variables leave the corresponding field untouched; unparsable
    /// numeric values are ignored.
    pub fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("DADP_HUB_URL") {
            self.hub.base_url = url;
        }
        if let Ok(alias) = std::env::var("DADP_INSTANCE_ID") {
            self.hub.alias = alias;
        }
        if let Some(fail_open) = env_bool("DADP_FAIL_OPEN") {
            self.hub.fail_open = fail_open;
        }
        if let Ok(url) = std::env::var("DADP_CRYPTO_URL") {
            self.engine.crypto_url = Some(url);
        }
        if let Ok(path) = std::env::var("DADP_CA_CERT") {
            self.engine.ca_cert_path = Some(PathBuf::from(path));
        }
        if let Some(ms) = env_parse::<u64>("DADP_HTTP_TIMEOUT_MS") {
            self.engine.timeout_ms = ms;
            self.sync.http_timeout_ms = ms;
        }
        if let Some(min) = env_parse::<usize>("DADP_BATCH_MIN") {
            self.batch.min_size = min;
        }
        if let Some(max) = env_parse::<usize>("DADP_BATCH_MAX") {
            self.batch.max_size = max;
        }
        if let Some(disabled) = env_bool("DADP_BATCH_DISABLED") {
            self.batch.disabled = disabled;
        }
        if let Some(secs) = env_parse::<u64>("DADP_SYNC_INTERVAL_SECS") {
            self.sync.interval_secs = secs;
        }
        if let Ok(dir) = std::env::var("DADP_HOME") {
            self.state_dir = Some(PathBuf::from(dir));
        }
    }
}

fn env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    std::env::var(name).ok().and_then(|v| v.parse().ok())
}

fn env_bool(name: &str) -> Option<bool> {
    let raw = std::env::var(name).ok()?;
    match raw.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Severity level for a configuration issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "ERROR",
            ConfigSeverity::Warning => "WARN",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

impl Config {
    /// Validate the configuration and return a list of issues.
    ///
    /// Returns an empty vec when everything looks good.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.hub.base_url.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "hub.base_url".into(),
                message: "base_url must not be empty".into(),
            });
        } else if !is_http_url(&self.hub.base_url) {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "hub.base_url".into(),
                message: format!(
                    "base_url must start with http:// or https:// (got \"{}\")",
                    self.hub.base_url
                ),
            });
        }

        if self.hub.alias.is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "hub.alias".into(),
                message: "an instance alias is required for registration".into(),
            });
        }

        if let Some(url) = &self.engine.crypto_url {
            if !is_http_url(url) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "engine.crypto_url".into(),
                    message: format!(
                        "crypto_url must start with http:// or https:// (got \"{url}\")"
                    ),
                });
            } else if crate::model::is_hub_control_url(url) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: "engine.crypto_url".into(),
                    message: "crypto_url must not point at the Hub control plane".into(),
                });
            }
        }

        if self.batch.min_size == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "batch.min_size".into(),
                message: "min_size must be greater than 0".into(),
            });
        }
        if self.batch.max_size < self.batch.min_size {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "batch.max_size".into(),
                message: format!(
                    "max_size ({}) must be at least min_size ({})",
                    self.batch.max_size, self.batch.min_size
                ),
            });
        }

        if self.sync.interval_secs == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "sync.interval_secs".into(),
                message: "interval_secs must be greater than 0".into(),
            });
        }

        if self.engine.timeout_ms == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "engine.timeout_ms".into(),
                message: "a zero timeout disables the request deadline".into(),
            });
        }

        issues
    }
}

fn is_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config {
            hub: HubConfig {
                base_url: "https://hub.example.com".into(),
                alias: "orders-svc".into(),
                ..HubConfig::default()
            },
            ..Config::default()
        }
    }

    fn find_issue<'a>(issues: &'a [ConfigIssue], field_prefix: &str) -> Option<&'a ConfigIssue> {
        issues.iter().find(|i| i.field.starts_with(field_prefix))
    }

    #[test]
    fn valid_config_passes() {
        let issues = valid_config().validate();
        let errors: Vec<_> = issues
            .iter()
            .filter(|i| i.severity == ConfigSeverity::Error)
            .collect();
        assert!(errors.is_empty(), "expected no errors, got: {errors:?}");
    }

    #[test]
    fn knob_defaults_match_contract() {
        let cfg = Config::default();
        assert_eq!(cfg.batch.min_size, 100);
        assert_eq!(cfg.batch.max_size, 10_000);
        assert!(!cfg.batch.disabled);
        assert_eq!(cfg.sync.interval_secs, 30);
        assert_eq!(cfg.sync.schema_gate_timeout_secs, 30);
        assert_eq!(cfg.engine.timeout_ms, 5000);
        assert!(cfg.hub.fail_open);
        assert!(cfg.intercept.fallback_to_original);
    }

    #[test]
    fn empty_hub_url_is_error() {
        let mut cfg = valid_config();
        cfg.hub.base_url = String::new();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "hub.base_url").expect("expected hub.base_url error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn non_http_hub_url_is_error() {
        let mut cfg = valid_config();
        cfg.hub.base_url = "ftp://hub".into();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "hub.base_url").expect("expected hub.base_url error");
        assert!(issue.message.contains("http://"));
    }

    #[test]
    fn empty_alias_is_error() {
        let mut cfg = valid_config();
        cfg.hub.alias = String::new();
        assert!(find_issue(&cfg.validate(), "hub.alias").is_some());
    }

    #[test]
    fn hub_control_crypto_url_is_error() {
        let mut cfg = valid_config();
        cfg.engine.crypto_url = Some("https://hub.example.com/hub/api/v1/crypto".into());
        let issues = cfg.validate();
        let issue =
            find_issue(&issues, "engine.crypto_url").expect("expected crypto_url error");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn batch_min_zero_is_error() {
        let mut cfg = valid_config();
        cfg.batch.min_size = 0;
        assert!(find_issue(&cfg.validate(), "batch.min_size").is_some());
    }

    #[test]
    fn batch_max_below_min_is_error() {
        let mut cfg = valid_config();
        cfg.batch.min_size = 100;
        cfg.batch.max_size = 50;
        assert!(find_issue(&cfg.validate(), "batch.max_size").is_some());
    }

    #[test]
    fn issue_display_format() {
        let issue = ConfigIssue {
            severity: ConfigSeverity::Error,
            field: "hub.base_url".into(),
            message: "base_url must not be empty".into(),
        };
        assert_eq!(
            format!("{issue}"),
            "[ERROR] hub.base_url: base_url must not be empty"
        );
    }
}
