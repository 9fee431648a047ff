//! Anti-forgery token management for state-changing requests.

mod manager;
mod token;

pub use manager::{CsrfConfig, CsrfTokenManager, CSRF_FORM_FIELD, CSRF_HEADER, CSRF_STORAGE_KEY};
pub use token::{generate_token, tokens_match, TOKEN_BYTES};
