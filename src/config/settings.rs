//! TOML-based configuration for clusterproxy.
//!
//! Supports a config file (clusterproxy.toml) with environment variable expansion.
//!
//! Example configuration:
//! ```toml
//! [cluster]
//! url = "${CLUSTER_URL}"
//! api_version = 3
//! timeout_secs = 120
//!
//! [staging]
//! temp_prefix = "tmp_stage"
//!
//! [logging]
//! filter = "clusterproxy=debug"
//! json = false
//! ```

use serde::{Deserialize, Serialize};
use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use crate::key::DEFAULT_TEMP_PREFIX;

/// Error type for settings.
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Config file not found: {0}")]
    FileNotFound(PathBuf),

    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config file: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Root configuration structure.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct Settings {
    /// Cluster connection.
    pub cluster: ClusterSettings,

    /// Temporary artifact staging.
    pub staging: StagingSettings,

    /// Log output.
    pub logging: LoggingSettings,
}

/// Cluster connection settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClusterSettings {
    /// Base URL of a cluster node (supports ${ENV_VAR} expansion).
    pub url: String,

    /// REST API version path segment.
    pub api_version: u32,

    /// Per-request timeout in seconds.
    pub timeout_secs: u64,
}

impl Default for ClusterSettings {
    fn default() -> Self {
        Self {
            url: "http://localhost:54321".to_string(),
            api_version: 3,
            timeout_secs: 60,
        }
    }
}

/// Staging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StagingSettings {
    /// Prefix for generated temporary keys.
    pub temp_prefix: String,
}

impl Default for StagingSettings {
    fn default() -> Self {
        Self {
            temp_prefix: DEFAULT_TEMP_PREFIX.to_string(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LoggingSettings {
    /// Filter directive, overridden by `RUST_LOG`.
    pub filter: String,

    /// Emit JSON lines instead of compact text.
    pub json: bool,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "clusterproxy=info".to_string(),
            json: false,
        }
    }
}

impl Settings {
    /// Load settings from a TOML file.
    ///
    /// Environment variables in the cluster URL are expanded and the result
    /// is validated.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, SettingsError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(SettingsError::FileNotFound(path.to_path_buf()));
        }

        let content = fs::read_to_string(path)?;
        Self::from_toml(&content)
    }

    /// Parse settings from TOML text.
    pub fn from_toml(content: &str) -> Result<Self, SettingsError> {
        let mut settings: Settings = toml::from_str(content)?;
        settings.cluster.url = expand_env_vars(&settings.cluster.url)?;
        settings.validate()?;
        Ok(settings)
    }

    /// Load settings from the default config file locations.
    ///
    /// Searches in order:
    /// 1. Environment variable `CLUSTERPROXY_CONFIG`
    /// 2. `./clusterproxy.toml`
    /// 3. `~/.config/clusterproxy/config.toml`
    pub fn load() -> Result<Self, SettingsError> {
        if let Ok(path) = env::var("CLUSTERPROXY_CONFIG") {
            return Self::from_file(&path);
        }

        let local_config = PathBuf::from("clusterproxy.toml");
        if local_config.exists() {
            return Self::from_file(&local_config);
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("clusterproxy").join("config.toml");
            if user_config.exists() {
                return Self::from_file(&user_config);
            }
        }

        Ok(Settings::default())
    }

    /// Check values that would make every request fail.
    pub fn validate(&self) -> Result<(), SettingsError> {
        if self.cluster.url.trim().is_empty() {
            return Err(SettingsError::InvalidConfig("cluster.url is empty".into()));
        }
        if self.cluster.timeout_secs == 0 {
            return Err(SettingsError::InvalidConfig(
                "cluster.timeout_secs must be positive".into(),
            ));
        }
        if self.staging.temp_prefix.trim().is_empty() {
            return Err(SettingsError::InvalidConfig(
                "staging.temp_prefix is empty".into(),
            ));
        }
        Ok(())
    }
}

/// Expand environment variables in a string.
///
/// Supports `${VAR}` and `$VAR` syntax.
pub fn expand_env_vars(s: &str) -> Result<String, SettingsError> {
    let mut result = String::with_capacity(s.len());
    let mut chars = s.chars().peekable();

    while let Some(c) = chars.next() {
        if c != '$' {
            result.push(c);
            continue;
        }

        let mut var_name = String::new();
        if chars.peek() == Some(&'{') {
            chars.next();
            for ch in chars.by_ref() {
                if ch == '}' {
                    break;
                }
                var_name.push(ch);
            }
        } else {
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    var_name.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            if var_name.is_empty() {
                // Lone $
                result.push('$');
                continue;
            }
        }

        let value = env::var(&var_name).map_err(|_| SettingsError::MissingEnvVar(var_name))?;
        result.push_str(&value);
    }

    Ok(result)
}
