//! Session timing configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{GuardError, Result};

/// Longest accepted session, idle or warning duration: one year.
pub const MAX_DURATION_SECS: u64 = 366 * 24 * 60 * 60;

/// Session, idle and warning durations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Absolute session lifetime in seconds
    #[serde(default = "default_session_timeout")]
    pub session_timeout_secs: u64,

    /// Inactivity before the idle warning, in seconds
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// Length of the idle-warning countdown, in seconds
    #[serde(default = "default_warning_time")]
    pub warning_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_timeout_secs: default_session_timeout(),
            idle_timeout_secs: default_idle_timeout(),
            warning_secs: default_warning_time(),
        }
    }
}

fn default_session_timeout() -> u64 {
    30 * 60
}

fn default_idle_timeout() -> u64 {
    15 * 60
}

fn default_warning_time() -> u64 {
    5 * 60
}

impl SessionConfig {
    pub fn session_timeout(&self) -> Duration {
        Duration::from_secs(self.session_timeout_secs)
    }

    pub fn idle_timeout(&self) -> Duration {
        Duration::from_secs(self.idle_timeout_secs)
    }

    pub fn warning_time(&self) -> Duration {
        Duration::from_secs(self.warning_secs)
    }

    pub(crate) fn session_timeout_ms(&self) -> u64 {
        self.session_timeout_secs.saturating_mul(1000)
    }

    pub(crate) fn idle_timeout_ms(&self) -> u64 {
        self.idle_timeout_secs.saturating_mul(1000)
    }

    pub(crate) fn warning_ms(&self) -> u64 {
        self.warning_secs.saturating_mul(1000)
    }

    /// All durations must be positive and at most [`MAX_DURATION_SECS`].
    pub fn validate(&self) -> Result<()> {
        let durations = [
            self.session_timeout_secs,
            self.idle_timeout_secs,
            self.warning_secs,
        ];
        if durations.contains(&0) {
            return Err(GuardError::Config(
                "session, idle and warning durations must be greater than zero".to_string(),
            ));
        }
        if durations.iter().any(|secs| *secs > MAX_DURATION_SECS) {
            return Err(GuardError::Config(format!(
                "session, idle and warning durations must not exceed {} seconds",
                MAX_DURATION_SECS
            )));
        }
        Ok(())
    }

    /// Apply a partial update. Missing and zero fields leave the current
    /// value in place.
    pub fn apply(&mut self, update: &SessionConfigUpdate) {
        if let Some(secs) = update.session_timeout_secs.filter(|s| *s > 0) {
            self.session_timeout_secs = secs;
        }
        if let Some(secs) = update.idle_timeout_secs.filter(|s| *s > 0) {
            self.idle_timeout_secs = secs;
        }
        if let Some(secs) = update.warning_secs.filter(|s| *s > 0) {
            self.warning_secs = secs;
        }
    }
}

/// A runtime adjustment to [`SessionConfig`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfigUpdate {
    #[serde(default)]
    pub session_timeout_secs: Option<u64>,
    #[serde(default)]
    pub idle_timeout_secs: Option<u64>,
    #[serde(default)]
    pub warning_secs: Option<u64>,
}
