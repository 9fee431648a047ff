//! Configuration management for session-guard.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::csrf::CsrfConfig;
use crate::error::{GuardError, Result};
use crate::session::config::MAX_DURATION_SECS;
use crate::session::SessionConfig;
use crate::throttle::ThrottleConfig;

/// Prefix for environment overrides, e.g.
/// `SESSION_GUARD__SESSION__IDLE_TIMEOUT_SECS=600`.
pub const ENV_PREFIX: &str = "SESSION_GUARD";

/// Main configuration.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct GuardConfig {
    /// Persistence of session records
    #[serde(default)]
    pub storage: StorageConfig,

    /// CSRF token rotation
    #[serde(default)]
    pub csrf: CsrfConfig,

    /// Client-side quotas
    #[serde(default)]
    pub throttle: ThrottleConfig,

    /// Idle and absolute timeouts
    #[serde(default)]
    pub session: SessionConfig,
}

/// Storage configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageConfig {
    /// File backing durable storage; in memory when unset
    #[serde(default)]
    pub path: Option<PathBuf>,

    /// Lifetime of stored login records in minutes; no expiry when unset
    #[serde(default)]
    pub session_ttl_minutes: Option<u64>,
}

impl GuardConfig {
    /// Load configuration from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: GuardConfig = serde_yaml::from_str(yaml)
            .map_err(|e| GuardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load defaults, then an optional YAML file, then `SESSION_GUARD__*`
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            info!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(
                config::File::from(path).format(config::FileFormat::Yaml),
            );
        }
        builder = builder.add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: GuardConfig = builder
            .build()
            .and_then(|c| c.try_deserialize())
            .map_err(|e| GuardError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Check every section.
    pub fn validate(&self) -> Result<()> {
        if self.csrf.rotation_interval_secs == 0 {
            return Err(GuardError::Config(
                "csrf rotation interval must be greater than zero".to_string(),
            ));
        }
        if self.csrf.rotation_interval_secs > MAX_DURATION_SECS {
            return Err(GuardError::Config(format!(
                "csrf rotation interval must be at most {} seconds",
                MAX_DURATION_SECS
            )));
        }
        if self.storage.session_ttl_minutes == Some(0) {
            return Err(GuardError::Config(
                "storage session_ttl_minutes must be greater than zero when set".to_string(),
            ));
        }
        self.throttle.validate()?;
        self.session.validate()
    }
}
