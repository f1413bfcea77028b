//! Gateway configuration
//!
//! Loaded from a JSON file, from `DLT_`-prefixed environment variables, or a
//! file overlaid with the environment. Call [`GatewayConfig::validate`]
//! before building the issuer and stores from it.

use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const ENV_ISSUER_URL: &str = "DLT_KEY_ISSUER_URL";
pub const ENV_ISSUE_PATH: &str = "DLT_KEY_ISSUE_PATH";
pub const ENV_RESOLVE_PATH: &str = "DLT_KEY_RESOLVE_PATH";
pub const ENV_ISSUER_TIMEOUT: &str = "DLT_KEY_ISSUER_TIMEOUT_SECS";
pub const ENV_METADATA_PATH: &str = "DLT_KEY_METADATA_PATH";
pub const ENV_SECRETS_DIR: &str = "DLT_KEY_SECRETS_DIR";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Cannot read config file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Cannot parse config file {path}: {source}")]
    Parse {
        path: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },

    #[error("Missing required setting: {0}")]
    Missing(&'static str),
}

/// Key issuer endpoint settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct KeyIssuerConfig {
    /// Base URL of the key issuer
    pub base_url: String,
    /// Path (or absolute URL) for minting a new key
    pub issue_path: String,
    /// Path (or absolute URL) for resolving a historical key
    pub resolve_path: String,
    /// Request timeout in seconds
    pub timeout_secs: u64,
}

impl Default for KeyIssuerConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            issue_path: "/dlt/encryptDataKey".to_string(),
            resolve_path: "/dlt/decryptDataKey".to_string(),
            timeout_secs: 30,
        }
    }
}

impl KeyIssuerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Local key store locations
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// JSON collection of key metadata documents
    pub metadata_path: PathBuf,
    /// Directory holding one secret document per counterparty
    pub secrets_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            metadata_path: PathBuf::from("data/key-metadata.json"),
            secrets_dir: PathBuf::from("data/secrets"),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GatewayConfig {
    pub key_issuer: KeyIssuerConfig,
    pub storage: StorageConfig,
}

impl GatewayConfig {
    /// Load configuration from a JSON file. Missing fields take defaults.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.display().to_string(),
            source,
        })
    }

    /// Load configuration from environment variables
    ///
    /// Environment variables:
    /// - DLT_KEY_ISSUER_URL: key issuer base URL
    /// - DLT_KEY_ISSUE_PATH: path for minting keys
    /// - DLT_KEY_RESOLVE_PATH: path for resolving historical keys
    /// - DLT_KEY_ISSUER_TIMEOUT_SECS: request timeout in seconds
    /// - DLT_KEY_METADATA_PATH: metadata collection file
    /// - DLT_KEY_SECRETS_DIR: secrets directory
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::default().with_env_overrides()
    }

    /// Overlay any set environment variables onto this configuration.
    pub fn with_env_overrides(self) -> Result<Self, ConfigError> {
        self.with_overrides(|name| env::var(name).ok())
    }

    fn with_overrides(
        mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ConfigError> {
        let lookup = |name: &str| lookup(name).filter(|value| !value.trim().is_empty());

        if let Some(value) = lookup(ENV_ISSUER_URL) {
            self.key_issuer.base_url = value;
        }
        if let Some(value) = lookup(ENV_ISSUE_PATH) {
            self.key_issuer.issue_path = value;
        }
        if let Some(value) = lookup(ENV_RESOLVE_PATH) {
            self.key_issuer.resolve_path = value;
        }
        if let Some(value) = lookup(ENV_ISSUER_TIMEOUT) {
            self.key_issuer.timeout_secs =
                value
                    .trim()
                    .parse()
                    .map_err(|_| ConfigError::InvalidValue {
                        name: ENV_ISSUER_TIMEOUT,
                        value,
                    })?;
        }
        if let Some(value) = lookup(ENV_METADATA_PATH) {
            self.storage.metadata_path = PathBuf::from(value);
        }
        if let Some(value) = lookup(ENV_SECRETS_DIR) {
            self.storage.secrets_dir = PathBuf::from(value);
        }
        Ok(self)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let url = self.key_issuer.base_url.trim();
        if url.is_empty() {
            return Err(ConfigError::Missing("key_issuer.base_url"));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ConfigError::InvalidValue {
                name: "key_issuer.base_url",
                value: url.to_string(),
            });
        }
        if self.key_issuer.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                name: "key_issuer.timeout_secs",
                value: "0".to_string(),
            });
        }
        if self.storage.metadata_path.as_os_str().is_empty() {
            return Err(ConfigError::Missing("storage.metadata_path"));
        }
        if self.storage.secrets_dir.as_os_str().is_empty() {
            return Err(ConfigError::Missing("storage.secrets_dir"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_need_an_issuer_url() {
        let config = GatewayConfig::default();
        assert_eq!(config.key_issuer.timeout(), Duration::from_secs(30));
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Missing("key_issuer.base_url"))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let config = GatewayConfig::default()
            .with_overrides(lookup_from(&[
                (ENV_ISSUER_URL, "https://keys.example.test"),
                (ENV_ISSUER_TIMEOUT, "5"),
                (ENV_SECRETS_DIR, "/var/lib/dlt/secrets"),
                (ENV_ISSUE_PATH, ""),
            ]))
            .unwrap();
        assert_eq!(config.key_issuer.base_url, "https://keys.example.test");
        assert_eq!(config.key_issuer.timeout_secs, 5);
        assert_eq!(config.storage.secrets_dir, PathBuf::from("/var/lib/dlt/secrets"));
        // Blank values leave the default in place.
        assert_eq!(config.key_issuer.issue_path, "/dlt/encryptDataKey");
        config.validate().unwrap();
    }

    #[test]
    fn test_bad_timeout() {
        let err = GatewayConfig::default()
            .with_overrides(lookup_from(&[(ENV_ISSUER_TIMEOUT, "soon")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));

        let mut config = GatewayConfig::default();
        config.key_issuer.base_url = "http://localhost:9000".to_string();
        config.key_issuer.timeout_secs = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_from_file_partial() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("gateway.json");
        std::fs::write(
            &path,
            r#"{"key_issuer":{"base_url":"http://localhost:9000"},"storage":{"secrets_dir":"/tmp/s"}}"#,
        )
        .unwrap();
        let config = GatewayConfig::from_file(&path).unwrap();
        assert_eq!(config.key_issuer.base_url, "http://localhost:9000");
        assert_eq!(config.key_issuer.resolve_path, "/dlt/decryptDataKey");
        assert_eq!(config.storage.secrets_dir, PathBuf::from("/tmp/s"));
        assert_eq!(
            config.storage.metadata_path,
            PathBuf::from("data/key-metadata.json")
        );
    }
}
