//! Redaction of server-provided error text before it reaches the user.
//!
//! Backend messages can carry stack frames, filesystem paths, internal
//! addresses and credential names. Everything matching a known pattern is
//! replaced with [`REDACTED`]; the result is capped at
//! [`MAX_MESSAGE_CHARS`] characters.

use std::sync::OnceLock;

use regex::Regex;

use crate::error::GuardError;

pub const REDACTED: &str = "[REDACTED]";

/// Messages longer than this are cut and suffixed with `...`.
pub const MAX_MESSAGE_CHARS: usize = 200;

pub const FALLBACK_MESSAGE: &str = "An unexpected error occurred";

const SENSITIVE_PATTERNS: &[&str] = &[
    // Database driver prefixes
    r"(?i)SQLITE_.*:",
    r"(?i)mysql.*:",
    r"(?i)postgresql.*:",
    r"(?i)mongodb.*:",
    // Filesystem paths
    r"(?i)/home/.*/",
    r"(?i)/var/.*/",
    r"(?i)/usr/.*/",
    r"(?i)/etc/.*/",
    r"(?i)C:\\.*\\",
    r"(?i)D:\\.*\\",
    // Internal addresses
    r"192\.168\.\d+\.\d+",
    r"10\.\d+\.\d+\.\d+",
    r"172\.(1[6-9]|2[0-9]|3[0-1])\.\d+\.\d+",
    r"127\.\d+\.\d+\.\d+",
    r"localhost",
    r"0\.0\.0\.0",
    // Credential names
    r"(?i)api[_-]?key",
    r"(?i)secret",
    r"(?i)token",
    r"(?i)password",
    r"(?i)credential",
    // Stack traces
    r"at\s+\w+\.\w+\(",
    r"Error:\s+",
    r"(?i)stack.*trace",
    // Server banners
    r"(?i)nginx",
    r"(?i)apache",
    r"(?i)iis",
    r"(?i)server.*error",
];

fn patterns() -> &'static [Regex] {
    static PATTERNS: OnceLock<Vec<Regex>> = OnceLock::new();
    PATTERNS.get_or_init(|| {
        SENSITIVE_PATTERNS
            .iter()
            .filter_map(|p| Regex::new(p).ok())
            .collect()
    })
}

/// Redact sensitive substrings from `message` for display.
pub fn sanitize_message(message: &str) -> String {
    let mut sanitized = message.to_string();
    for pattern in patterns() {
        if pattern.is_match(&sanitized) {
            sanitized = pattern.replace_all(&sanitized, REDACTED).into_owned();
        }
    }

    if sanitized.chars().count() > MAX_MESSAGE_CHARS {
        sanitized = sanitized.chars().take(MAX_MESSAGE_CHARS).collect();
        sanitized.push_str("...");
    }

    if sanitized.trim().is_empty() {
        return FALLBACK_MESSAGE.to_string();
    }
    sanitized
}

/// Friendly text for an error, suitable for showing to the user.
pub fn user_message(error: &GuardError) -> String {
    match error {
        GuardError::Transport(detail) if detail.to_lowercase().contains("timeout") => {
            "The request timed out. Please try again.".to_string()
        }
        GuardError::Transport(_) => {
            "Unable to connect to the server. Please check your internet connection.".to_string()
        }
        GuardError::RateLimited { retry_after_secs }
        | GuardError::ServerRateLimited {
            retry_after_secs: Some(retry_after_secs),
        } => format!("Too many requests. Please try again in {retry_after_secs} seconds."),
        GuardError::ServerRateLimited {
            retry_after_secs: None,
        } => "Too many requests. Please try again later.".to_string(),
        GuardError::SessionExpired(_) => "Your session has expired. Please log in again.".to_string(),
        GuardError::CsrfRejected => "You do not have permission to perform this action.".to_string(),
        GuardError::Http { status, message } => match *status {
            401 => "Your session has expired. Please log in again.".to_string(),
            403 => "You do not have permission to perform this action.".to_string(),
            404 => "The requested resource was not found.".to_string(),
            500..=u16::MAX => "A server error occurred. Please try again later.".to_string(),
            400..=499 => {
                "There was a problem with your request. Please check your input and try again."
                    .to_string()
            }
            _ => sanitize_message(message),
        },
        other => sanitize_message(&other.to_string()),
    }
}

/// Whether an error indicates an incident worth reporting, as opposed to
/// expected flow such as 400/401/403.
pub fn should_report(error: &GuardError) -> bool {
    match error {
        GuardError::Transport(_) => true,
        GuardError::Http { status, .. } => *status >= 500,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::ExpiryReason;

    #[test]
    fn test_all_patterns_compile() {
        assert_eq!(patterns().len(), SENSITIVE_PATTERNS.len());
    }

    #[test]
    fn test_redacts_paths_and_addresses() {
        let out = sanitize_message("failed to open /home/deploy/app/config.yml on 10.0.3.7");
        assert!(!out.contains("deploy"));
        assert!(!out.contains("10.0.3.7"));
        assert!(out.contains(REDACTED));
    }

    #[test]
    fn test_redacts_credentials_and_banners() {
        let out = sanitize_message("invalid api_key for nginx upstream");
        assert_eq!(out, "invalid [REDACTED] for [REDACTED] upstream");

        let out = sanitize_message("Password mismatch");
        assert_eq!(out, "[REDACTED] mismatch");
    }

    #[test]
    fn test_redacts_stack_frames() {
        let out = sanitize_message("TypeError: boom at Object.handler(");
        assert!(!out.contains("Object.handler("));
        assert!(!out.contains("Error: "));
    }

    #[test]
    fn test_public_address_kept() {
        assert_eq!(sanitize_message("Name is required"), "Name is required");
        assert_eq!(sanitize_message("8.8.8.8 unreachable"), "8.8.8.8 unreachable");
    }

    #[test]
    fn test_truncation_and_fallback() {
        let long = "a".repeat(500);
        let out = sanitize_message(&long);
        assert_eq!(out.chars().count(), MAX_MESSAGE_CHARS + 3);
        assert!(out.ends_with("..."));

        assert_eq!(sanitize_message(""), FALLBACK_MESSAGE);
    }

    #[test]
    fn test_user_messages() {
        assert_eq!(
            user_message(&GuardError::RateLimited { retry_after_secs: 42 }),
            "Too many requests. Please try again in 42 seconds."
        );
        assert_eq!(
            user_message(&GuardError::ServerRateLimited { retry_after_secs: None }),
            "Too many requests. Please try again later."
        );
        assert_eq!(
            user_message(&GuardError::Http { status: 404, message: String::new() }),
            "The requested resource was not found."
        );
        assert_eq!(
            user_message(&GuardError::SessionExpired(ExpiryReason::IdleTimeout)),
            "Your session has expired. Please log in again."
        );
        assert!(user_message(&GuardError::Transport("connect timeout".into())).contains("timed out"));
    }

    #[test]
    fn test_reporting_policy() {
        assert!(should_report(&GuardError::Http { status: 502, message: String::new() }));
        assert!(should_report(&GuardError::Transport("reset".into())));
        assert!(!should_report(&GuardError::Http { status: 400, message: String::new() }));
        assert!(!should_report(&GuardError::Http { status: 401, message: String::new() }));
        assert!(!should_report(&GuardError::CsrfRejected));
        assert!(!should_report(&GuardError::RateLimited { retry_after_secs: 1 }));
    }
}
