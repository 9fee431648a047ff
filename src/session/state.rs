//! Session states and the signals that move between them.

use serde::{Deserialize, Serialize};

/// Lifecycle state of a monitored session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// The user is considered present
    Active,
    /// Idle deadline passed; the logout countdown is running
    IdleWarning,
    /// Terminal
    LoggedOut,
}

impl SessionState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, SessionState::LoggedOut)
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExpiryReason {
    /// The absolute session deadline passed
    SessionTimeout,
    /// The idle-warning countdown elapsed unanswered
    IdleTimeout,
    /// The user chose to log out
    UserLogout,
    /// The server rejected the session and the user declined to rejoin
    Unauthorized,
}

impl ExpiryReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExpiryReason::SessionTimeout => "session_timeout",
            ExpiryReason::IdleTimeout => "idle_timeout",
            ExpiryReason::UserLogout => "user_logout",
            ExpiryReason::Unauthorized => "unauthorized",
        }
    }
}

impl std::fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A recognized user-interaction signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Pointer,
    Keyboard,
    Scroll,
    Touch,
}

impl ActivityKind {
    /// Map a DOM event name to an activity kind. Unrecognized events
    /// return `None` and must not reset the idle timer.
    pub fn from_event_name(name: &str) -> Option<Self> {
        match name {
            "mousedown" | "mousemove" | "click" | "pointerdown" | "pointermove" | "wheel" => {
                Some(ActivityKind::Pointer)
            }
            "keypress" | "keydown" | "keyup" => Some(ActivityKind::Keyboard),
            "scroll" => Some(ActivityKind::Scroll),
            "touchstart" | "touchmove" => Some(ActivityKind::Touch),
            _ => None,
        }
    }
}

/// The user's answer to the idle-warning prompt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningDecision {
    StayLoggedIn,
    LogOut,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_name_mapping() {
        assert_eq!(ActivityKind::from_event_name("mousemove"), Some(ActivityKind::Pointer));
        assert_eq!(ActivityKind::from_event_name("keyup"), Some(ActivityKind::Keyboard));
        assert_eq!(ActivityKind::from_event_name("scroll"), Some(ActivityKind::Scroll));
        assert_eq!(ActivityKind::from_event_name("touchstart"), Some(ActivityKind::Touch));
        assert_eq!(ActivityKind::from_event_name("resize"), None);
    }

    #[test]
    fn test_expiry_reason_serialization() {
        assert_eq!(ExpiryReason::SessionTimeout.to_string(), "session_timeout");
        assert_eq!(
            serde_json::to_string(&ExpiryReason::IdleTimeout).unwrap(),
            "\"idle_timeout\""
        );
    }
}
