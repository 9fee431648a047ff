//! Endpoint classification.

use serde::{Deserialize, Serialize};

/// The class a request path is throttled under.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    Login,
    Registration,
    Upload,
    Download,
    Search,
    General,
}

impl EndpointClass {
    /// Every class, in classification priority order.
    pub const ALL: [EndpointClass; 6] = [
        EndpointClass::Login,
        EndpointClass::Registration,
        EndpointClass::Upload,
        EndpointClass::Download,
        EndpointClass::Search,
        EndpointClass::General,
    ];

    /// Map a request path to its class.
    ///
    /// Matching is by substring, first match wins; paths matching nothing
    /// are [`EndpointClass::General`].
    pub fn classify(path: &str) -> Self {
        let path = path.to_ascii_lowercase();
        Self::ALL
            .into_iter()
            .find(|class| {
                class
                    .marker()
                    .is_some_and(|marker| path.contains(marker))
            })
            .unwrap_or(EndpointClass::General)
    }

    /// Stable name used in logs and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            EndpointClass::Login => "login",
            EndpointClass::Registration => "registration",
            EndpointClass::Upload => "upload",
            EndpointClass::Download => "download",
            EndpointClass::Search => "search",
            EndpointClass::General => "general",
        }
    }

    fn marker(&self) -> Option<&'static str> {
        match self {
            EndpointClass::Login => Some("/login"),
            EndpointClass::Registration => Some("/register"),
            EndpointClass::Upload => Some("/upload"),
            EndpointClass::Download => Some("/download"),
            EndpointClass::Search => Some("/search"),
            EndpointClass::General => None,
        }
    }
}

impl std::fmt::Display for EndpointClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Shorthand for [`EndpointClass::classify`].
pub fn classify(path: &str) -> EndpointClass {
    EndpointClass::classify(path)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_known_paths() {
        assert_eq!(classify("/login"), EndpointClass::Login);
        assert_eq!(classify("/auth/login"), EndpointClass::Login);
        assert_eq!(classify("/auth/register"), EndpointClass::Registration);
        assert_eq!(classify("/files/upload"), EndpointClass::Upload);
        assert_eq!(classify("/files/42/download"), EndpointClass::Download);
        assert_eq!(classify("/files/search?q=report"), EndpointClass::Search);
    }

    #[test]
    fn test_unmatched_paths_are_general() {
        assert_eq!(classify("/files"), EndpointClass::General);
        assert_eq!(classify(""), EndpointClass::General);
        assert_eq!(classify("/auth/me"), EndpointClass::General);
    }

    #[test]
    fn test_first_match_wins() {
        // Contains both markers; login is checked first
        assert_eq!(classify("/login/search"), EndpointClass::Login);
        assert_eq!(classify("/upload/download"), EndpointClass::Upload);
    }

    #[test]
    fn test_classification_is_case_insensitive() {
        assert_eq!(classify("/Files/UPLOAD"), EndpointClass::Upload);
    }

    #[test]
    fn test_display() {
        assert_eq!(EndpointClass::Registration.to_string(), "registration");
    }
}
