//! Reversible payload obfuscation.
//!
//! **This is not encryption.** Payloads are XORed with a locally generated
//! key and base64-encoded. Anyone who can read the key (it lives in the same
//! durable storage as the data) can recover every value. The goal is only to
//! keep session data from being readable at a glance in storage dumps.

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;

use super::backend::StorageBackend;
use crate::error::Result;

/// Storage key holding the obfuscation key.
pub const OBFUSCATION_KEY_NAME: &str = "__secure_key__";

/// Number of random bytes in a generated key (rendered as hex).
const KEY_BYTES: usize = 32;

/// XOR obfuscator keyed by a persisted local secret.
#[derive(Clone)]
pub struct Obfuscator {
    key: Vec<u8>,
}

impl Obfuscator {
    /// Build an obfuscator from an explicit key.
    ///
    /// An empty key would make the transform the identity, so it is
    /// replaced with a fresh random one.
    pub fn with_key(key: impl Into<String>) -> Self {
        let key = key.into();
        if key.is_empty() {
            return Self::with_key(random_hex(KEY_BYTES));
        }
        Self {
            key: key.into_bytes(),
        }
    }

    /// Load the key from `backend`, generating and persisting one on first use.
    pub fn load_or_create(backend: &dyn StorageBackend) -> Result<Self> {
        if let Some(existing) = backend.get(OBFUSCATION_KEY_NAME)? {
            if !existing.is_empty() {
                return Ok(Self::with_key(existing));
            }
        }

        let key = random_hex(KEY_BYTES);
        backend.set(OBFUSCATION_KEY_NAME, &key)?;
        debug!("Generated new storage obfuscation key");
        Ok(Self::with_key(key))
    }

    /// Obfuscate a plaintext string.
    pub fn obfuscate(&self, plain: &str) -> String {
        STANDARD.encode(self.xor(plain.as_bytes()))
    }

    /// Reverse [`Obfuscator::obfuscate`]. Returns `None` for input that is
    /// not valid base64 or does not decode to UTF-8.
    pub fn deobfuscate(&self, encoded: &str) -> Option<String> {
        let bytes = STANDARD.decode(encoded).ok()?;
        String::from_utf8(self.xor(&bytes)).ok()
    }

    fn xor(&self, input: &[u8]) -> Vec<u8> {
        input
            .iter()
            .zip(self.key.iter().cycle())
            .map(|(b, k)| b ^ k)
            .collect()
    }
}

impl std::fmt::Debug for Obfuscator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Obfuscator").finish_non_exhaustive()
    }
}

/// Hex-encode `len` bytes from the operating system's CSPRNG.
pub(crate) fn random_hex(len: usize) -> String {
    let mut bytes = vec![0u8; len];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryBackend;

    #[test]
    fn test_obfuscate_round_trip() {
        let obfuscator = Obfuscator::with_key("k3y");
        let encoded = obfuscator.obfuscate("{\"name\":\"Ünïcødé\"}");

        assert_ne!(encoded, "{\"name\":\"Ünïcødé\"}");
        assert_eq!(
            obfuscator.deobfuscate(&encoded).as_deref(),
            Some("{\"name\":\"Ünïcødé\"}")
        );
    }

    #[test]
    fn test_deobfuscate_rejects_invalid_base64() {
        let obfuscator = Obfuscator::with_key("k3y");
        assert!(obfuscator.deobfuscate("%%% not base64 %%%").is_none());
    }

    #[test]
    fn test_key_is_persisted_once() {
        let backend = MemoryBackend::new();
        let first = Obfuscator::load_or_create(&backend).unwrap();
        let stored = backend.get(OBFUSCATION_KEY_NAME).unwrap().unwrap();
        assert_eq!(stored.len(), KEY_BYTES * 2);

        let second = Obfuscator::load_or_create(&backend).unwrap();
        let encoded = first.obfuscate("same key");
        assert_eq!(second.deobfuscate(&encoded).as_deref(), Some("same key"));
    }

    #[test]
    fn test_different_keys_do_not_decode() {
        let a = Obfuscator::with_key("aaaa");
        let b = Obfuscator::with_key("bbbb");
        let encoded = a.obfuscate("secret");
        assert_ne!(b.deobfuscate(&encoded).as_deref(), Some("secret"));
    }
}
