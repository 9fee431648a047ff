//! Outbound request and inbound response shapes seen by the interceptor.

use http::header::{HeaderName, HeaderValue, RETRY_AFTER};
use http::{HeaderMap, Method, StatusCode};

/// Methods that change server state and therefore carry a CSRF token.
const STATE_CHANGING: [Method; 4] = [Method::POST, Method::PUT, Method::DELETE, Method::PATCH];

/// Whether `method` changes server state.
pub fn is_state_changing(method: &Method) -> bool {
    STATE_CHANGING.contains(method)
}

/// A request about to be handed to the transport.
#[derive(Debug, Clone)]
pub struct OutboundRequest {
    pub method: Method,
    /// Path relative to the API base, e.g. `/files/upload`
    pub path: String,
    pub headers: HeaderMap,
    pub body: Option<serde_json::Value>,
}

impl OutboundRequest {
    pub fn new(method: Method, path: impl Into<String>) -> Self {
        Self {
            method,
            path: path.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }

    pub fn get(path: impl Into<String>) -> Self {
        Self::new(Method::GET, path)
    }

    pub fn post(path: impl Into<String>, body: serde_json::Value) -> Self {
        Self::new(Method::POST, path).with_body(body)
    }

    pub fn with_body(mut self, body: serde_json::Value) -> Self {
        self.body = Some(body);
        self
    }

    /// Set a header, ignoring values that are not valid header text.
    pub fn set_header(&mut self, name: HeaderName, value: &str) {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
    }

    /// Read a header as text.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name).and_then(|v| v.to_str().ok())
    }

    pub fn is_state_changing(&self) -> bool {
        is_state_changing(&self.method)
    }
}

/// A response returned by the transport.
#[derive(Debug, Clone)]
pub struct InboundResponse {
    pub status: StatusCode,
    pub headers: HeaderMap,
    pub body: String,
}

impl InboundResponse {
    pub fn new(status: StatusCode, body: impl Into<String>) -> Self {
        Self {
            status,
            headers: HeaderMap::new(),
            body: body.into(),
        }
    }

    pub fn with_header(mut self, name: HeaderName, value: &str) -> Self {
        if let Ok(value) = HeaderValue::from_str(value) {
            self.headers.insert(name, value);
        }
        self
    }

    /// `Retry-After` in whole seconds, when present as a number.
    pub fn retry_after_secs(&self) -> Option<u64> {
        self.headers
            .get(RETRY_AFTER)
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.trim().parse().ok())
    }

    /// The server-provided error message, if the body is JSON with a
    /// `message` or `error` field; otherwise the raw body.
    pub fn message(&self) -> String {
        if let Ok(json) = serde_json::from_str::<serde_json::Value>(&self.body) {
            for field in ["message", "error"] {
                if let Some(text) = json.get(field).and_then(|v| v.as_str()) {
                    return text.to_string();
                }
            }
        }
        self.body.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_changing_methods() {
        assert!(is_state_changing(&Method::POST));
        assert!(is_state_changing(&Method::PUT));
        assert!(is_state_changing(&Method::DELETE));
        assert!(is_state_changing(&Method::PATCH));
        assert!(!is_state_changing(&Method::GET));
        assert!(!is_state_changing(&Method::HEAD));
        assert!(!is_state_changing(&Method::OPTIONS));
    }

    #[test]
    fn test_retry_after_parsing() {
        let response = InboundResponse::new(StatusCode::TOO_MANY_REQUESTS, "")
            .with_header(RETRY_AFTER, "120");
        assert_eq!(response.retry_after_secs(), Some(120));

        let response = InboundResponse::new(StatusCode::TOO_MANY_REQUESTS, "")
            .with_header(RETRY_AFTER, "Wed, 21 Oct 2015 07:28:00 GMT");
        assert_eq!(response.retry_after_secs(), None);
    }

    #[test]
    fn test_message_extraction() {
        let response = InboundResponse::new(StatusCode::BAD_REQUEST, r#"{"message":"bad name"}"#);
        assert_eq!(response.message(), "bad name");

        let response = InboundResponse::new(StatusCode::BAD_REQUEST, "plain text");
        assert_eq!(response.message(), "plain text");
    }
}
