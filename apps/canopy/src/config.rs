//! # Configuration
//!
//! Settings come from three places, later ones winning:
//! 1. Built-in defaults
//! 2. An optional TOML file (`--config`)
//! 3. Environment variables (`CANOPY_RATE_LIMIT`, `CANOPY_CORS_ORIGINS`,
//!    `CANOPY_API_KEY`)
//!
//! CLI flags override the resolved file values where both exist.
//!
//! ```toml
//! [server]
//! host = "0.0.0.0"
//! port = 8080
//! body_limit_bytes = 4194304
//!
//! [storage]
//! backend = "redb"
//! database = "canopy.redb"
//!
//! [security]
//! rate_limit = 200
//! cors_origins = "http://localhost:3000"
//!
//! [[repositories]]
//! name = "legacy"
//! format_version = "2023.1"
//! ```

use canopy_core::{CanopyError, FormatVersion, RepositoryConfiguration};
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Default request body limit: 2 MiB.
pub const DEFAULT_BODY_LIMIT: usize = 2 * 1024 * 1024;

/// Default rate limit in requests per second.
pub const DEFAULT_RATE_LIMIT: u32 = 100;

/// Default database path for the redb backend.
pub const DEFAULT_DATABASE: &str = "canopy.redb";

/// Maximum accepted size of a configuration file (1 MiB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

// =============================================================================
// FILE SECTIONS
// =============================================================================

/// `[server]` section.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSection {
    pub host: String,
    pub port: u16,
    pub body_limit_bytes: usize,
}

impl Default for ServerSection {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            body_limit_bytes: DEFAULT_BODY_LIMIT,
        }
    }
}

/// `[storage]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StorageSection {
    pub backend: Option<Backend>,
    pub database: Option<PathBuf>,
}

/// `[security]` section.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SecuritySection {
    /// Requests per second; 0 disables rate limiting.
    pub rate_limit: Option<u32>,
    /// Comma-separated origins, or "*".
    pub cors_origins: Option<String>,
    /// Bearer key required on every route but `/health`.
    pub api_key: Option<String>,
}

/// One `[[repositories]]` entry, created at startup if missing.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RepositorySection {
    pub name: String,
    #[serde(default)]
    pub format_version: FormatVersion,
}

/// Storage backend selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// Volatile, in-process only.
    Memory,
    /// Durable redb database file.
    #[default]
    Redb,
}

impl std::str::FromStr for Backend {
    type Err = CanopyError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "memory" => Ok(Self::Memory),
            "redb" => Ok(Self::Redb),
            other => Err(CanopyError::InvalidRequest(format!(
                "Unknown backend: {}. Use: memory, redb",
                other
            ))),
        }
    }
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => f.write_str("memory"),
            Self::Redb => f.write_str("redb"),
        }
    }
}

// =============================================================================
// CONFIG FILE
// =============================================================================

/// The parsed configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CanopyConfig {
    pub server: ServerSection,
    pub storage: StorageSection,
    pub security: SecuritySection,
    pub repositories: Vec<RepositorySection>,
}

impl CanopyConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, CanopyError> {
        toml::from_str(text)
            .map_err(|e| CanopyError::DeserializationError(format!("Invalid config: {}", e)))
    }

    /// Read and parse a configuration file.
    pub fn load(path: &Path) -> Result<Self, CanopyError> {
        let metadata = std::fs::metadata(path).map_err(|e| {
            CanopyError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(CanopyError::InvalidRequest(format!(
                "Config file size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }
        let text = std::fs::read_to_string(path).map_err(|e| {
            CanopyError::IoError(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        Self::from_toml(&text)
    }

    /// Load `path` if given, otherwise use the defaults.
    pub fn load_optional(path: Option<&Path>) -> Result<Self, CanopyError> {
        match path {
            Some(p) => Self::load(p),
            None => Ok(Self::default()),
        }
    }

    /// Repositories declared in the file, as engine configurations.
    #[must_use]
    pub fn repository_configurations(&self) -> Vec<RepositoryConfiguration> {
        self.repositories
            .iter()
            .map(|r| RepositoryConfiguration::new(&r.name).with_format_version(r.format_version))
            .collect()
    }

    /// HTTP settings with environment overrides applied.
    #[must_use]
    pub fn api_settings(&self) -> ApiSettings {
        ApiSettings {
            rate_limit: rate_limit_from_env()
                .or(self.security.rate_limit)
                .unwrap_or(DEFAULT_RATE_LIMIT),
            cors_origins: cors_origins_from_env().or_else(|| self.security.cors_origins.clone()),
            body_limit_bytes: self.server.body_limit_bytes,
            api_key: api_key_from_env().or_else(|| {
                self.security
                    .api_key
                    .clone()
                    .filter(|k| !k.is_empty())
            }),
        }
    }
}

// =============================================================================
// HTTP SETTINGS
// =============================================================================

/// Resolved settings for the HTTP layer.
#[derive(Clone, PartialEq, Eq)]
pub struct ApiSettings {
    /// Requests per second; 0 disables rate limiting.
    pub rate_limit: u32,
    /// Allowed CORS origins; `None` means localhost only.
    pub cors_origins: Option<String>,
    pub body_limit_bytes: usize,
    /// `None` disables authentication.
    pub api_key: Option<String>,
}

impl std::fmt::Debug for ApiSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiSettings")
            .field("rate_limit", &self.rate_limit)
            .field("cors_origins", &self.cors_origins)
            .field("body_limit_bytes", &self.body_limit_bytes)
            .field("api_key", &self.api_key.as_ref().map(|_| "<set>"))
            .finish()
    }
}

/// `CANOPY_RATE_LIMIT`, if set to a valid number.
pub fn rate_limit_from_env() -> Option<u32> {
    std::env::var("CANOPY_RATE_LIMIT")
        .ok()
        .and_then(|s| s.parse().ok())
}

/// `CANOPY_API_KEY`, if set and non-empty.
pub fn api_key_from_env() -> Option<String> {
    std::env::var("CANOPY_API_KEY")
        .ok()
        .filter(|k| !k.is_empty())
}

/// `CANOPY_CORS_ORIGINS`, if set and non-empty.
pub fn cors_origins_from_env() -> Option<String> {
    std::env::var("CANOPY_CORS_ORIGINS")
        .ok()
        .filter(|s| !s.trim().is_empty())
}

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        let config = CanopyConfig::from_toml("").expect("parse");
        assert_eq!(config, CanopyConfig::default());
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.server.body_limit_bytes, DEFAULT_BODY_LIMIT);
        assert!(config.repositories.is_empty());
    }

    #[test]
    fn full_file_parses() {
        let text = r#"
            [server]
            host = "0.0.0.0"
            port = 9000
            body_limit_bytes = 1024

            [storage]
            backend = "memory"
            database = "data/canopy.redb"

            [security]
            rate_limit = 0
            cors_origins = "*"
            api_key = "from-file"

            [[repositories]]
            name = "legacy"
            format_version = "2023.1"

            [[repositories]]
            name = "current"
        "#;
        let config = CanopyConfig::from_toml(text).expect("parse");

        assert_eq!(config.server.host, "0.0.0.0");
        assert_eq!(config.server.port, 9000);
        assert_eq!(config.storage.backend, Some(Backend::Memory));
        assert_eq!(config.security.rate_limit, Some(0));
        assert_eq!(config.security.api_key.as_deref(), Some("from-file"));

        let repositories = config.repository_configurations();
        assert_eq!(repositories.len(), 2);
        assert_eq!(repositories[0].format_version, FormatVersion::V2023_1);
        assert_eq!(repositories[1].format_version, FormatVersion::V2024_1);
    }

    #[test]
    fn unknown_keys_rejected() {
        let result = CanopyConfig::from_toml("[server]\nprot = 1\n");
        assert!(matches!(result, Err(CanopyError::DeserializationError(_))));
    }

    #[test]
    fn unknown_format_version_rejected() {
        let result = CanopyConfig::from_toml("[[repositories]]\nname = \"x\"\nformat_version = \"1.0\"\n");
        assert!(result.is_err());
    }

    #[test]
    fn api_settings_debug_redacts_key() {
        let settings = ApiSettings {
            rate_limit: 0,
            cors_origins: None,
            body_limit_bytes: DEFAULT_BODY_LIMIT,
            api_key: Some("hunter2".to_string()),
        };
        let printed = format!("{:?}", settings);
        assert!(!printed.contains("hunter2"));
        assert!(printed.contains("<set>"));
    }

    #[test]
    fn backend_parsing() {
        assert_eq!("memory".parse::<Backend>().expect("memory"), Backend::Memory);
        assert_eq!("redb".parse::<Backend>().expect("redb"), Backend::Redb);
        assert!("file".parse::<Backend>().is_err());
    }
}
