use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::logging::LogFormat;
use crate::reconciliation::{DuplicatePolicy, ReconciliationEngine};
use crate::source::{ExternalSource, FileSource, HttpSource, SourceError, DEFAULT_TIMEOUT_SECS};

pub const ENV_DATABASE: &str = "REGIONAL_SYNC_DATABASE";
pub const ENV_SOURCE_URL: &str = "REGIONAL_SYNC_SOURCE_URL";
pub const ENV_SOURCE_FILE: &str = "REGIONAL_SYNC_SOURCE_FILE";
pub const ENV_TIMEOUT_SECS: &str = "REGIONAL_SYNC_TIMEOUT_SECS";
pub const ENV_DUPLICATE_POLICY: &str = "REGIONAL_SYNC_DUPLICATE_POLICY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        source: toml::de::Error,
    },

    #[error("invalid value for {key}: {reason}")]
    Invalid { key: &'static str, reason: String },

    #[error("source.url and source.file are mutually exclusive")]
    ConflictingSources,

    #[error("no external source configured (set source.url or source.file)")]
    NoSource,

    #[error(transparent)]
    Source(#[from] SourceError),
}

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub database_path: PathBuf,
    pub source: SourceConfig,
    pub sync: SyncConfig,
    pub logging: LoggingConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database_path: PathBuf::from("regional.db"),
            source: SourceConfig::default(),
            sync: SyncConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SourceConfig {
    pub url: Option<String>,
    pub file: Option<PathBuf>,
    pub timeout_secs: u64,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            url: None,
            file: None,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SyncConfig {
    pub duplicate_policy: DuplicatePolicy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: LogFormat::Pretty,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading
// ---------------------------------------------------------------------------

impl AppConfig {
    pub fn from_toml_str(text: &str, path: &Path) -> Result<Self, ConfigError> {
        toml::from_str(text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Defaults, then the file (if given), then `REGIONAL_SYNC_*` variables.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
                    path: path.to_path_buf(),
                    source,
                })?;
                Self::from_toml_str(&text, path)?
            }
            None => Self::default(),
        };

        config.apply_env(|key| std::env::var(key).ok())?;
        config.validate()?;
        Ok(config)
    }

    /// Apply environment overrides through `lookup` (normally `std::env::var`).
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        let lookup = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(path) = lookup(ENV_DATABASE) {
            self.database_path = PathBuf::from(path);
        }
        if let Some(url) = lookup(ENV_SOURCE_URL) {
            self.source.url = Some(url);
            self.source.file = None;
        }
        if let Some(file) = lookup(ENV_SOURCE_FILE) {
            self.source.file = Some(PathBuf::from(file));
            self.source.url = None;
        }
        if let Some(secs) = lookup(ENV_TIMEOUT_SECS) {
            self.source.timeout_secs = secs.trim().parse().map_err(|e| ConfigError::Invalid {
                key: ENV_TIMEOUT_SECS,
                reason: format!("'{secs}': {e}"),
            })?;
        }
        if let Some(policy) = lookup(ENV_DUPLICATE_POLICY) {
            self.sync.duplicate_policy =
                policy.parse().map_err(|reason| ConfigError::Invalid {
                    key: ENV_DUPLICATE_POLICY,
                    reason,
                })?;
        }

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source.url.is_some() && self.source.file.is_some() {
            return Err(ConfigError::ConflictingSources);
        }
        if self.source.timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                key: "source.timeout_secs",
                reason: "must be greater than zero".to_string(),
            });
        }
        Ok(())
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.source.timeout_secs)
    }

    pub fn engine(&self) -> ReconciliationEngine {
        ReconciliationEngine::with_policy(self.sync.duplicate_policy)
    }

    /// Build the configured external source. Only needed by commands that fetch.
    pub fn build_source(&self) -> Result<Box<dyn ExternalSource>, ConfigError> {
        self.validate()?;
        match (&self.source.url, &self.source.file) {
            (Some(url), None) => Ok(Box::new(HttpSource::new(url.clone(), self.timeout())?)),
            (None, Some(file)) => Ok(Box::new(FileSource::new(file.clone()))),
            (None, None) => Err(ConfigError::NoSource),
            (Some(_), Some(_)) => Err(ConfigError::ConflictingSources),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn test_defaults_when_file_is_empty() {
        let config = AppConfig::from_toml_str("", Path::new("empty.toml")).unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.database_path, PathBuf::from("regional.db"));
        assert_eq!(config.source.timeout_secs, 30);
        assert_eq!(config.sync.duplicate_policy, DuplicatePolicy::LastWins);
        assert_eq!(config.logging.format, LogFormat::Pretty);
    }

    #[test]
    fn test_parses_full_file() {
        let text = r#"
            database_path = "/var/lib/regional/mirror.db"

            [source]
            url = "https://authority.example/v1/regionais"
            timeout_secs = 10

            [sync]
            duplicate_policy = "reject"

            [logging]
            level = "debug"
            format = "json"
        "#;

        let config = AppConfig::from_toml_str(text, Path::new("full.toml")).unwrap();

        assert_eq!(config.database_path, PathBuf::from("/var/lib/regional/mirror.db"));
        assert_eq!(
            config.source.url.as_deref(),
            Some("https://authority.example/v1/regionais")
        );
        assert_eq!(config.timeout(), Duration::from_secs(10));
        assert_eq!(config.sync.duplicate_policy, DuplicatePolicy::Reject);
        assert_eq!(config.logging.level, "debug");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_unknown_keys_are_rejected() {
        let err = AppConfig::from_toml_str("databse_path = \"x.db\"", Path::new("typo.toml"))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }

    #[test]
    fn test_load_reads_file_from_disk() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[source]").unwrap();
        writeln!(file, "file = \"snapshot.csv\"").unwrap();

        let text = std::fs::read_to_string(file.path()).unwrap();
        let config = AppConfig::from_toml_str(&text, file.path()).unwrap();

        assert_eq!(config.source.file, Some(PathBuf::from("snapshot.csv")));
    }

    #[test]
    fn test_load_missing_file_is_io_error() {
        let err = AppConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_env_overrides_file_values() {
        let mut config = AppConfig::default();
        config.source.file = Some(PathBuf::from("old.json"));

        config
            .apply_env(env(&[
                (ENV_DATABASE, "other.db"),
                (ENV_SOURCE_URL, "http://localhost:9000/regionais"),
                (ENV_TIMEOUT_SECS, "5"),
                (ENV_DUPLICATE_POLICY, "reject"),
            ]))
            .unwrap();

        assert_eq!(config.database_path, PathBuf::from("other.db"));
        assert_eq!(config.source.url.as_deref(), Some("http://localhost:9000/regionais"));
        assert_eq!(config.source.file, None);
        assert_eq!(config.source.timeout_secs, 5);
        assert_eq!(config.sync.duplicate_policy, DuplicatePolicy::Reject);
        config.validate().unwrap();
    }

    #[test]
    fn test_blank_env_values_are_ignored() {
        let mut config = AppConfig::default();
        config.apply_env(env(&[(ENV_DATABASE, "  ")])).unwrap();
        assert_eq!(config.database_path, PathBuf::from("regional.db"));
    }

    #[test]
    fn test_bad_env_values_are_invalid() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env(env(&[(ENV_TIMEOUT_SECS, "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_TIMEOUT_SECS, .. }));

        let err = config
            .apply_env(env(&[(ENV_DUPLICATE_POLICY, "first-wins")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { key: ENV_DUPLICATE_POLICY, .. }));
    }

    #[test]
    fn test_url_and_file_conflict() {
        let mut config = AppConfig::default();
        config.source.url = Some("http://localhost/regionais".to_string());
        config.source.file = Some(PathBuf::from("snapshot.json"));

        assert!(matches!(config.validate(), Err(ConfigError::ConflictingSources)));
        assert!(matches!(config.build_source(), Err(ConfigError::ConflictingSources)));
    }

    #[test]
    fn test_zero_timeout_is_invalid() {
        let mut config = AppConfig::default();
        config.source.timeout_secs = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { .. })));
    }

    #[test]
    fn test_build_source_requires_a_source() {
        let config = AppConfig::default();
        assert!(matches!(config.build_source(), Err(ConfigError::NoSource)));
    }

    #[test]
    fn test_build_source_picks_configured_kind() {
        let mut config = AppConfig::default();
        config.source.file = Some(PathBuf::from("snapshot.csv"));
        let source = config.build_source().unwrap();
        assert_eq!(source.describe(), "file://snapshot.csv");

        let mut config = AppConfig::default();
        config.source.url = Some("http://localhost:9000/regionais".to_string());
        let source = config.build_source().unwrap();
        assert_eq!(source.describe(), "http://localhost:9000/regionais");
    }

    #[test]
    fn test_engine_uses_configured_policy() {
        let mut config = AppConfig::default();
        config.sync.duplicate_policy = DuplicatePolicy::Reject;
        assert_eq!(config.engine().duplicate_policy, DuplicatePolicy::Reject);
    }
}
