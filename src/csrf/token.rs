//! CSRF token generation and comparison.

use crate::storage::random_hex;

/// Random bytes per token.
pub const TOKEN_BYTES: usize = 32;

/// Generate a fresh token: 32 bytes from the OS CSPRNG, hex-encoded.
pub fn generate_token() -> String {
    random_hex(TOKEN_BYTES)
}

/// Compare two tokens without short-circuiting on the first differing byte.
pub fn tokens_match(a: &str, b: &str) -> bool {
    let (a, b) = (a.as_bytes(), b.as_bytes());
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}
