//! Per-class quota configuration.
//!
//! Every [`EndpointClass`] has a built-in quota. Configuration only needs to
//! name the classes it overrides:
//!
//! ```yaml
//! limits:
//!   upload:
//!     max_requests: 20
//!     window_secs: 60
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use super::classify::EndpointClass;
use crate::error::{GuardError, Result};

/// A quota: at most `max_requests` within any trailing `window_secs`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassLimit {
    /// Requests admitted per window
    pub max_requests: u32,
    /// Window length in seconds
    pub window_secs: u64,
}

impl ClassLimit {
    pub const fn new(max_requests: u32, window_secs: u64) -> Self {
        Self {
            max_requests,
            window_secs,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// The built-in quota for a class.
    pub const fn default_for(class: EndpointClass) -> Self {
        match class {
            EndpointClass::Login => Self::new(5, 15 * 60),
            EndpointClass::Registration => Self::new(3, 60 * 60),
            EndpointClass::Upload => Self::new(10, 60),
            EndpointClass::Download => Self::new(50, 60),
            EndpointClass::Search => Self::new(30, 60),
            EndpointClass::General => Self::new(100, 60),
        }
    }
}

/// Throttle configuration: quota overrides keyed by class.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    /// Overrides; classes not listed keep their built-in quota
    #[serde(default)]
    pub limits: HashMap<EndpointClass, ClassLimit>,
}

impl ThrottleConfig {
    /// Configuration with only built-in quotas.
    pub fn new() -> Self {
        Self::default()
    }

    /// Load overrides from a YAML file.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        info!(path = %path.display(), "Loading throttle configuration");

        let contents = std::fs::read_to_string(path)?;
        Self::from_yaml(&contents)
    }

    /// Load overrides from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: Self = serde_yaml::from_str(yaml)
            .map_err(|e| GuardError::Config(format!("Failed to parse throttle config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Override one class.
    pub fn with_limit(mut self, class: EndpointClass, limit: ClassLimit) -> Self {
        self.limits.insert(class, limit);
        self
    }

    /// The effective quota for `class`.
    pub fn limit_for(&self, class: EndpointClass) -> ClassLimit {
        self.limits
            .get(&class)
            .copied()
            .unwrap_or_else(|| ClassLimit::default_for(class))
    }

    /// Reject quotas that could never admit anything or never slide.
    pub fn validate(&self) -> Result<()> {
        for (class, limit) in &self.limits {
            if limit.window_secs == 0 {
                return Err(GuardError::Config(format!(
                    "throttle window for '{}' must be greater than zero",
                    class
                )));
            }
            if limit.max_requests == 0 {
                return Err(GuardError::Config(format!(
                    "throttle quota for '{}' must admit at least one request",
                    class
                )));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_quotas() {
        let config = ThrottleConfig::new();
        assert_eq!(config.limit_for(EndpointClass::Login), ClassLimit::new(5, 900));
        assert_eq!(config.limit_for(EndpointClass::Registration), ClassLimit::new(3, 3600));
        assert_eq!(config.limit_for(EndpointClass::Upload), ClassLimit::new(10, 60));
        assert_eq!(config.limit_for(EndpointClass::Download), ClassLimit::new(50, 60));
        assert_eq!(config.limit_for(EndpointClass::Search), ClassLimit::new(30, 60));
        assert_eq!(config.limit_for(EndpointClass::General), ClassLimit::new(100, 60));
    }

    #[test]
    fn test_parse_overrides() {
        let yaml = r#"
limits:
  upload:
    max_requests: 20
    window_secs: 120
  login:
    max_requests: 3
    window_secs: 600
"#;
        let config = ThrottleConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.limit_for(EndpointClass::Upload), ClassLimit::new(20, 120));
        assert_eq!(config.limit_for(EndpointClass::Login), ClassLimit::new(3, 600));
        // Untouched classes keep defaults
        assert_eq!(config.limit_for(EndpointClass::Search), ClassLimit::new(30, 60));
    }

    #[test]
    fn test_empty_yaml_is_defaults() {
        let config = ThrottleConfig::from_yaml("{}").unwrap();
        assert!(config.limits.is_empty());
    }

    #[test]
    fn test_unknown_class_is_rejected() {
        let yaml = r#"
limits:
  telemetry:
    max_requests: 1
    window_secs: 1
"#;
        assert!(ThrottleConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_zero_window_is_rejected() {
        let yaml = r#"
limits:
  search:
    max_requests: 10
    window_secs: 0
"#;
        let err = ThrottleConfig::from_yaml(yaml).unwrap_err();
        assert!(matches!(err, GuardError::Config(_)));
    }

    #[test]
    fn test_with_limit() {
        let config = ThrottleConfig::new().with_limit(EndpointClass::General, ClassLimit::new(1, 1));
        assert_eq!(config.limit_for(EndpointClass::General), ClassLimit::new(1, 1));
    }
}
