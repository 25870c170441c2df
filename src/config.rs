//! Configuration System
//!
//! Handles loading configuration from files and environment variables.
//! Supports TOML config files and environment variable overrides.

use crate::index::FingerprintMode;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Main configuration structure
#[derive(Debug, Clone, Default, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub bank: BankSection,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Bank configuration
#[derive(Debug, Clone, Deserialize)]
pub struct BankSection {
    /// Bank root directory
    #[serde(default = "default_root")]
    pub root: String,

    /// Index file, relative to the root
    #[serde(default = "default_index_file")]
    pub index_file: String,

    #[serde(default = "default_lock_timeout")]
    pub lock_timeout_ms: u64,

    #[serde(default = "default_read_lock_timeout")]
    pub read_lock_timeout_ms: u64,

    #[serde(default = "default_read_retries")]
    pub read_retries: u32,

    #[serde(default = "default_retry_backoff")]
    pub retry_backoff_ms: u64,

    #[serde(default)]
    pub fingerprint: FingerprintMode,

    /// Data file extensions to index; empty means every file
    #[serde(default)]
    pub extensions: Vec<String>,

    #[serde(default)]
    pub follow_links: bool,

    #[serde(default = "default_progress_min_files")]
    pub progress_min_files: usize,

    #[serde(default = "default_block_samples")]
    pub block_samples: usize,
}

fn default_root() -> String {
    ".".to_string()
}

fn default_index_file() -> String {
    ".wavebank.db".to_string()
}

fn default_lock_timeout() -> u64 {
    10_000 // 10 seconds
}

fn default_read_lock_timeout() -> u64 {
    2_000
}

fn default_read_retries() -> u32 {
    3
}

fn default_retry_backoff() -> u64 {
    25
}

fn default_progress_min_files() -> usize {
    100
}

fn default_block_samples() -> usize {
    4096
}

impl Default for BankSection {
    fn default() -> Self {
        Self {
            root: default_root(),
            index_file: default_index_file(),
            lock_timeout_ms: default_lock_timeout(),
            read_lock_timeout_ms: default_read_lock_timeout(),
            read_retries: default_read_retries(),
            retry_backoff_ms: default_retry_backoff(),
            fingerprint: FingerprintMode::default(),
            extensions: Vec::new(),
            follow_links: false,
            progress_min_files: default_progress_min_files(),
            block_samples: default_block_samples(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,

    #[serde(default = "default_log_format")]
    pub format: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

impl Config {
    /// Load configuration from a file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        Self::parse(&content).map_err(|error| ConfigError::Parse {
            path: path.to_path_buf(),
            error,
        })
    }

    fn parse(content: &str) -> Result<Self, String> {
        toml::from_str(content).map_err(|e| e.to_string())
    }

    /// Load configuration from environment variables only
    pub fn from_env() -> Self {
        let mut config = Config::default();
        config.apply_env_overrides();
        config
    }

    /// Load configuration with environment variable overrides
    pub fn load_with_env(path: &Path) -> Result<Self, ConfigError> {
        let mut config = Self::load(path)?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Load from default locations or environment
    pub fn load_default() -> Self {
        let config_paths = [
            dirs::config_dir().map(|p| p.join("wavebank").join("config.toml")),
            Some(PathBuf::from("/etc/wavebank/config.toml")),
            Some(PathBuf::from("./wavebank.toml")),
        ];

        for path_opt in config_paths.iter().flatten() {
            if path_opt.exists() {
                match Self::load_with_env(path_opt) {
                    Ok(config) => {
                        tracing::info!("Loaded config from {:?}", path_opt);
                        return config;
                    }
                    Err(e) => {
                        tracing::warn!("Failed to load config from {:?}: {}", path_opt, e);
                    }
                }
            }
        }

        tracing::info!("Using default config with environment overrides");
        Self::from_env()
    }

    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply `WAVEBANK_*` overrides read through `lookup`
    fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(root) = lookup("WAVEBANK_ROOT") {
            self.bank.root = root;
        }
        if let Some(timeout) = lookup("WAVEBANK_LOCK_TIMEOUT_MS") {
            match timeout.parse() {
                Ok(ms) => self.bank.lock_timeout_ms = ms,
                Err(_) => tracing::warn!("Ignoring WAVEBANK_LOCK_TIMEOUT_MS={:?}", timeout),
            }
        }
        if let Some(mode) = lookup("WAVEBANK_FINGERPRINT") {
            match mode.parse() {
                Ok(mode) => self.bank.fingerprint = mode,
                Err(e) => tracing::warn!("Ignoring WAVEBANK_FINGERPRINT: {}", e),
            }
        }

        if let Some(level) = lookup("WAVEBANK_LOG_LEVEL") {
            self.logging.level = level;
        }
        if let Some(format) = lookup("WAVEBANK_LOG_FORMAT") {
            self.logging.format = format;
        }
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path:?}: {error}")]
    Io { path: PathBuf, error: String },

    #[error("Failed to parse config file {path:?}: {error}")]
    Parse { path: PathBuf, error: String },
}

/// Generate a default config file content
pub fn generate_default_config() -> String {
    r#"# Wavebank Configuration
#
# Environment variables override these settings:
# - WAVEBANK_ROOT
# - WAVEBANK_LOCK_TIMEOUT_MS
# - WAVEBANK_FINGERPRINT
# - WAVEBANK_LOG_LEVEL
# - WAVEBANK_LOG_FORMAT

[bank]
# Root directory of the bank
root = "."

# Index file, relative to the root
index_file = ".wavebank.db"

# How long an index update waits for the exclusive lock (ms)
lock_timeout_ms = 10000

# How long a query waits for the shared lock (ms)
read_lock_timeout_ms = 2000

# Attempts per file read before giving up on a file replaced mid-read
read_retries = 3

# First retry delay (ms), doubled per attempt
retry_backoff_ms = 25

# Change detection: "mtime_size" (fast) or "content_hash" (reads every file)
fingerprint = "mtime_size"

# Only index files with these extensions (empty = every non-hidden file)
extensions = []

# Follow symbolic links while scanning
follow_links = false

# Log indexing progress when at least this many files changed
progress_min_files = 100

# Samples per block in files written by `put`
block_samples = 4096

[logging]
# Log level: trace, debug, info, warn, error
level = "info"

# Log format: pretty (for development) or json (for production)
format = "pretty"
"#
    .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::tempdir;

    #[test]
    fn test_default_template_parses_to_defaults() {
        let config = Config::parse(&generate_default_config()).unwrap();
        let defaults = BankSection::default();
        assert_eq!(config.bank.index_file, defaults.index_file);
        assert_eq!(config.bank.lock_timeout_ms, defaults.lock_timeout_ms);
        assert_eq!(config.bank.fingerprint, FingerprintMode::MtimeSize);
        assert_eq!(config.bank.block_samples, 4096);
        assert_eq!(config.logging.format, "pretty");
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let config = Config::parse(
            r#"
            [bank]
            root = "/data/bank"
            fingerprint = "content_hash"
            extensions = ["wbk"]
            "#,
        )
        .unwrap();
        assert_eq!(config.bank.root, "/data/bank");
        assert_eq!(config.bank.fingerprint, FingerprintMode::ContentHash);
        assert_eq!(config.bank.extensions, vec!["wbk".to_string()]);
        assert_eq!(config.bank.read_retries, 3);
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_load_errors() {
        let dir = tempdir().unwrap();
        let missing = Config::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(missing, ConfigError::Io { .. }));

        let bad = dir.path().join("bad.toml");
        std::fs::write(&bad, "[bank]\nlock_timeout_ms = \"soon\"\n").unwrap();
        assert!(matches!(Config::load(&bad).unwrap_err(), ConfigError::Parse { .. }));
    }

    #[test]
    fn test_overrides() {
        let vars: HashMap<&str, &str> = [
            ("WAVEBANK_ROOT", "/srv/bank"),
            ("WAVEBANK_LOCK_TIMEOUT_MS", "250"),
            ("WAVEBANK_FINGERPRINT", "hash"),
            ("WAVEBANK_LOG_FORMAT", "json"),
        ]
        .into_iter()
        .collect();

        let mut config = Config::default();
        config.apply_overrides(|key| vars.get(key).map(|v| v.to_string()));
        assert_eq!(config.bank.root, "/srv/bank");
        assert_eq!(config.bank.lock_timeout_ms, 250);
        assert_eq!(config.bank.fingerprint, FingerprintMode::ContentHash);
        assert_eq!(config.logging.format, "json");
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_bad_override_ignored() {
        let mut config = Config::default();
        config.apply_overrides(|key| match key {
            "WAVEBANK_LOCK_TIMEOUT_MS" => Some("later".to_string()),
            "WAVEBANK_FINGERPRINT" => Some("md5".to_string()),
            _ => None,
        });
        assert_eq!(config.bank.lock_timeout_ms, 10_000);
        assert_eq!(config.bank.fingerprint, FingerprintMode::MtimeSize);
    }
}
