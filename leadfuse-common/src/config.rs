//! Bootstrap configuration loading
//!
//! Configuration is a single TOML file. Resolution order for the file itself:
//! 1. Command-line argument (highest priority)
//! 2. `LEADFUSE_CONFIG` environment variable
//! 3. Platform config directory (`~/.config/leadfuse/leadfuse.toml` on Linux)
//! 4. Compiled defaults (no file at all)
//!
//! A missing or unreadable file is never fatal: a warning is logged and the
//! compiled defaults are used.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming an explicit config file
pub const CONFIG_ENV_VAR: &str = "LEADFUSE_CONFIG";
/// Environment variable overriding the SQLite database path
pub const DATABASE_ENV_VAR: &str = "LEADFUSE_DATABASE";
/// Environment variable overriding the enrichment provider API key
pub const ENRICHMENT_KEY_ENV_VAR: &str = "LEADFUSE_ENRICHMENT_API_KEY";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// SQLite database file; falls back to the platform data directory
    #[serde(default)]
    pub database_path: Option<PathBuf>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub ingest: IngestConfig,

    #[serde(default)]
    pub enrichment: EnrichmentConfig,

    #[serde(default)]
    pub normalizer: NormalizerConfig,

    /// Conflict-resolution policy override; built-in policy when absent
    #[serde(default)]
    pub policy: Option<PolicyConfig>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error) or a full filter directive
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log file path (logs to stderr if not specified)
    #[serde(default)]
    pub file: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

/// Batch ingestion tuning
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestConfig {
    /// Upper bound on identity groups processed concurrently within one batch
    #[serde(default = "default_max_concurrent_groups")]
    pub max_concurrent_groups: usize,

    /// Change reports retained per identity key
    #[serde(default = "default_change_history_limit")]
    pub change_history_limit: usize,

    /// Maximum total time spent retrying a locked database write
    #[serde(default = "default_max_lock_wait_ms")]
    pub max_lock_wait_ms: u64,
}

impl Default for IngestConfig {
    fn default() -> Self {
        Self {
            max_concurrent_groups: default_max_concurrent_groups(),
            change_history_limit: default_change_history_limit(),
            max_lock_wait_ms: default_max_lock_wait_ms(),
        }
    }
}

/// Third-party enrichment provider settings
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EnrichmentConfig {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub base_url: Option<String>,

    #[serde(default)]
    pub api_key: Option<String>,

    /// Total request timeout
    #[serde(default = "default_enrichment_timeout_ms")]
    pub timeout_ms: u64,

    #[serde(default = "default_enrichment_connect_timeout_ms")]
    pub connect_timeout_ms: u64,

    /// Provider quota; requests beyond it wait for the limiter
    #[serde(default = "default_requests_per_second")]
    pub requests_per_second: u32,
}

impl Default for EnrichmentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            base_url: None,
            api_key: None,
            timeout_ms: default_enrichment_timeout_ms(),
            connect_timeout_ms: default_enrichment_connect_timeout_ms(),
            requests_per_second: default_requests_per_second(),
        }
    }
}

/// Address normalizer table additions
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct NormalizerConfig {
    /// Extra street-type spellings mapped to their canonical form,
    /// e.g. `"crossing" = "xing"`. Merged over the built-in table.
    #[serde(default)]
    pub street_suffixes: BTreeMap<String, String>,
}

/// Serialized conflict-resolution policy
///
/// Source names use the wire spelling (`record-feed`, `listing-site`, ...).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PolicyConfig {
    pub version: String,

    /// Highest priority first
    pub source_ranking: Vec<String>,

    /// Per-field ranking overrides, keyed by field name
    #[serde(default)]
    pub field_overrides: BTreeMap<String, Vec<String>>,

    /// Candidate/current ratio beyond which a numeric value is implausible
    #[serde(default = "default_magnitude_ratio")]
    pub max_magnitude_ratio: f64,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_max_concurrent_groups() -> usize {
    4
}

fn default_change_history_limit() -> usize {
    20
}

fn default_max_lock_wait_ms() -> u64 {
    5000
}

fn default_enrichment_timeout_ms() -> u64 {
    15_000
}

fn default_enrichment_connect_timeout_ms() -> u64 {
    5_000
}

fn default_requests_per_second() -> u32 {
    5
}

fn default_magnitude_ratio() -> f64 {
    10.0
}

/// Compiled defaults for the current platform
#[derive(Debug, Clone)]
pub struct CompiledDefaults {
    pub database_path: PathBuf,
    pub config_path: Option<PathBuf>,
    pub log_level: String,
}

impl CompiledDefaults {
    pub fn for_current_platform() -> Self {
        let database_path = dirs::data_local_dir()
            .map(|d| d.join("leadfuse").join("leadfuse.db"))
            .unwrap_or_else(|| PathBuf::from("./leadfuse_data/leadfuse.db"));

        let config_path = dirs::config_dir().map(|d| d.join("leadfuse").join("leadfuse.toml"));

        Self {
            database_path,
            config_path,
            log_level: default_log_level(),
        }
    }
}

impl TomlConfig {
    /// Effective database path: env override, then TOML, then platform default
    pub fn database_path(&self) -> PathBuf {
        if let Ok(path) = std::env::var(DATABASE_ENV_VAR) {
            if !path.trim().is_empty() {
                return PathBuf::from(path);
            }
        }
        self.database_path
            .clone()
            .unwrap_or_else(|| CompiledDefaults::for_current_platform().database_path)
    }

    /// Apply environment overrides for secrets that should not live in TOML
    pub fn apply_env_overrides(&mut self) {
        if let Ok(key) = std::env::var(ENRICHMENT_KEY_ENV_VAR) {
            if !key.trim().is_empty() {
                info!("Enrichment API key loaded from environment variable");
                self.enrichment.api_key = Some(key);
            }
        }
    }

    /// Reject settings that would make ingestion misbehave
    pub fn validate(&self) -> Result<()> {
        if self.ingest.max_concurrent_groups == 0 {
            return Err(Error::Config(
                "ingest.max_concurrent_groups must be at least 1".to_string(),
            ));
        }
        if self.enrichment.enabled && self.enrichment.base_url.is_none() {
            return Err(Error::Config(
                "enrichment.enabled requires enrichment.base_url".to_string(),
            ));
        }
        if self.enrichment.requests_per_second == 0 {
            return Err(Error::Config(
                "enrichment.requests_per_second must be at least 1".to_string(),
            ));
        }
        if let Some(policy) = &self.policy {
            if policy.source_ranking.is_empty() {
                return Err(Error::Config("policy.source_ranking is empty".to_string()));
            }
            if policy.max_magnitude_ratio <= 1.0 {
                return Err(Error::Config(
                    "policy.max_magnitude_ratio must be greater than 1".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Locate the config file following the documented priority order
///
/// Returns `None` when no file is named and the platform default does not exist.
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.trim().is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    CompiledDefaults::for_current_platform()
        .config_path
        .filter(|p| p.exists())
}

/// Read and parse a TOML config file
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))
}

/// Where the effective configuration came from
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigSource {
    File(PathBuf),
    /// No file named or found
    Defaults,
    /// A file was named but could not be used
    DefaultsAfterError { path: PathBuf, error: String },
}

impl ConfigSource {
    /// Log how configuration was resolved
    ///
    /// Separate from loading so the binary can report it once tracing is up.
    pub fn log(&self) {
        match self {
            Self::File(path) => info!("Loaded configuration from {}", path.display()),
            Self::Defaults => info!("No configuration file found; using compiled defaults"),
            Self::DefaultsAfterError { error, .. } => {
                warn!("{}; using compiled defaults", error)
            }
        }
    }

    pub fn is_fallback(&self) -> bool {
        matches!(self, Self::DefaultsAfterError { .. })
    }
}

/// Load configuration and report where it came from
///
/// Missing or malformed files fall back to defaults. Environment overrides are
/// applied last. Nothing is logged; see [`ConfigSource::log`].
pub fn load_with_source(cli_arg: Option<&Path>) -> (TomlConfig, ConfigSource) {
    let (mut config, source) = match resolve_config_path(cli_arg) {
        Some(path) => match load_toml_config(&path) {
            Ok(config) => (config, ConfigSource::File(path)),
            Err(e) => (
                TomlConfig::default(),
                ConfigSource::DefaultsAfterError {
                    path,
                    error: e.to_string(),
                },
            ),
        },
        None => (TomlConfig::default(), ConfigSource::Defaults),
    };

    config.apply_env_overrides();
    (config, source)
}

/// Load configuration with graceful degradation, logging the outcome
pub fn load_or_default(cli_arg: Option<&Path>) -> TomlConfig {
    let (config, source) = load_with_source(cli_arg);
    source.log();
    config
}

/// Write config atomically: temp file in the same directory, then rename
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// User-Agent sent by outbound HTTP clients
pub fn get_user_agent() -> String {
    format!(
        "leadfuse/{} (property identity resolution)",
        env!("CARGO_PKG_VERSION")
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = TomlConfig::default();
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.ingest.max_concurrent_groups, 4);
        assert_eq!(config.ingest.change_history_limit, 20);
        assert!(!config.enrichment.enabled);
        assert!(config.policy.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_toml_fills_defaults() {
        let config: TomlConfig = toml::from_str(
            r#"
            database_path = "/tmp/leads.db"

            [ingest]
            max_concurrent_groups = 8
            "#,
        )
        .unwrap();

        assert_eq!(config.database_path, Some(PathBuf::from("/tmp/leads.db")));
        assert_eq!(config.ingest.max_concurrent_groups, 8);
        assert_eq!(config.ingest.change_history_limit, 20);
        assert_eq!(config.enrichment.timeout_ms, 15_000);
    }

    #[test]
    fn test_validate_rejects_zero_concurrency() {
        let mut config = TomlConfig::default();
        config.ingest.max_concurrent_groups = 0;
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_validate_requires_base_url_when_enrichment_enabled() {
        let mut config = TomlConfig::default();
        config.enrichment.enabled = true;
        assert!(config.validate().is_err());

        config.enrichment.base_url = Some("https://enrich.example.com".to_string());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_policy_section_parses() {
        let config: TomlConfig = toml::from_str(
            r#"
            [policy]
            version = "2025-01"
            source_ranking = ["record-feed", "enrichment-provider", "auction-site", "listing-site", "manual"]

            [policy.field_overrides]
            price_hint = ["listing-site", "auction-site"]
            "#,
        )
        .unwrap();

        let policy = config.policy.unwrap();
        assert_eq!(policy.version, "2025-01");
        assert_eq!(policy.source_ranking[0], "record-feed");
        assert_eq!(policy.field_overrides["price_hint"].len(), 2);
        assert_eq!(policy.max_magnitude_ratio, 10.0);
    }

    #[test]
    fn test_user_agent_has_version() {
        assert!(get_user_agent().starts_with("leadfuse/"));
    }
}
