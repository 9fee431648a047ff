//! Obfuscated key/value store with per-entry expiry.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use super::backend::StorageBackend;
use super::obfuscation::Obfuscator;
use crate::clock::SharedClock;
use crate::error::{GuardError, Result};

/// Key prefix for entries owned by the store; [`SecureStore::clear`] only
/// touches keys carrying it.
pub const SECURE_PREFIX: &str = "secure_";

/// On-disk envelope around an obfuscated value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Obfuscated, serialized value
    pub value: String,
    /// When the entry was written (epoch ms)
    pub timestamp: u64,
    /// When the entry stops being readable (epoch ms)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration: Option<u64>,
}

impl StoredEntry {
    /// Whether the entry has passed its expiry at `now_ms`.
    pub fn is_expired_at(&self, now_ms: u64) -> bool {
        matches!(self.expiration, Some(expires) if now_ms > expires)
    }
}

/// Key/value store that obfuscates values and evicts expired entries on read.
///
/// See [`Obfuscator`] for why this offers no confidentiality.
pub struct SecureStore {
    backend: Arc<dyn StorageBackend>,
    obfuscator: Obfuscator,
    clock: SharedClock,
}

impl SecureStore {
    /// Open a store on `backend`, loading (or creating) its obfuscation key
    /// from the same backend.
    pub fn open(backend: Arc<dyn StorageBackend>, clock: SharedClock) -> Result<Self> {
        let obfuscator = Obfuscator::load_or_create(backend.as_ref())?;
        Ok(Self::with_obfuscator(backend, obfuscator, clock))
    }

    /// Build a store with an explicit obfuscator.
    pub fn with_obfuscator(
        backend: Arc<dyn StorageBackend>,
        obfuscator: Obfuscator,
        clock: SharedClock,
    ) -> Self {
        Self {
            backend,
            obfuscator,
            clock,
        }
    }

    /// Serialize, obfuscate and write `value` under `key`.
    ///
    /// With `ttl_minutes`, the entry reads as absent once that many minutes
    /// have passed. Backend failures are returned unchanged.
    pub fn put<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        ttl_minutes: Option<u64>,
    ) -> Result<()> {
        let now = self.clock.now_ms();
        let plain = serde_json::to_string(value)?;
        let entry = StoredEntry {
            value: self.obfuscator.obfuscate(&plain),
            timestamp: now,
            expiration: ttl_minutes
                .map(|minutes| now.saturating_add(minutes.saturating_mul(60_000))),
        };

        trace!(key, expiration = ?entry.expiration, "Writing stored entry");
        self.backend.set(key, &serde_json::to_string(&entry)?)
    }

    /// Read and decode the value under `key`.
    ///
    /// Expired, corrupt and undecodable entries are deleted and read as
    /// `None`. Only backend failures are returned as errors.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let Some(raw) = self.backend.get(key)? else {
            return Ok(None);
        };

        match self.decode(key, &raw) {
            Ok(Some(value)) => Ok(Some(value)),
            Ok(None) => {
                debug!(key, "Stored entry expired, evicting");
                self.backend.remove(key)?;
                Ok(None)
            }
            Err(e @ (GuardError::StorageCorrupt(_) | GuardError::DecryptionFailed(_))) => {
                warn!(key, error = %e, "Discarding unreadable stored entry");
                self.backend.remove(key)?;
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Delete the entry under `key`.
    pub fn remove(&self, key: &str) -> Result<()> {
        self.backend.remove(key)
    }

    /// Whether `key` is expired. Missing or unreadable entries count as expired.
    pub fn is_expired(&self, key: &str) -> Result<bool> {
        let Some(raw) = self.backend.get(key)? else {
            return Ok(true);
        };
        Ok(match serde_json::from_str::<StoredEntry>(&raw) {
            Ok(entry) => entry.is_expired_at(self.clock.now_ms()),
            Err(_) => true,
        })
    }

    /// Remove every entry carrying [`SECURE_PREFIX`]. The obfuscation key
    /// and foreign keys are left in place.
    pub fn clear(&self) -> Result<()> {
        let keys: Vec<String> = self
            .backend
            .keys()?
            .into_iter()
            .filter(|k| k.starts_with(SECURE_PREFIX))
            .collect();
        for key in &keys {
            self.backend.remove(key)?;
        }
        debug!(removed = keys.len(), "Cleared secure entries");
        Ok(())
    }

    /// `Ok(None)` means expired.
    fn decode<T: DeserializeOwned>(&self, key: &str, raw: &str) -> Result<Option<T>> {
        let entry: StoredEntry = serde_json::from_str(raw)
            .map_err(|_| GuardError::StorageCorrupt(key.to_string()))?;

        if entry.is_expired_at(self.clock.now_ms()) {
            return Ok(None);
        }

        let plain = self
            .obfuscator
            .deobfuscate(&entry.value)
            .ok_or_else(|| GuardError::DecryptionFailed(key.to_string()))?;
        let value = serde_json::from_str(&plain)
            .map_err(|_| GuardError::DecryptionFailed(key.to_string()))?;
        Ok(Some(value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::{Clock, ManualClock};
    use crate::storage::MemoryBackend;
    use serde::{Deserialize, Serialize};
    use std::time::Duration;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Profile {
        id: u64,
        name: String,
        roles: Vec<String>,
    }

    fn setup() -> (Arc<MemoryBackend>, Arc<ManualClock>, SecureStore) {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = SecureStore::open(backend.clone(), clock.clone()).unwrap();
        (backend, clock, store)
    }

    #[test]
    fn test_put_get_round_trip() {
        let (_, _, store) = setup();
        let profile = Profile {
            id: 7,
            name: "ada".to_string(),
            roles: vec!["admin".to_string()],
        };

        store.put("secure_user", &profile, None).unwrap();
        let read: Option<Profile> = store.get("secure_user").unwrap();
        assert_eq!(read, Some(profile));
    }

    #[test]
    fn test_value_is_not_stored_in_plain_text() {
        let (backend, _, store) = setup();
        store.put("secure_token", "bearer-abc", None).unwrap();

        let raw = backend.get("secure_token").unwrap().unwrap();
        assert!(!raw.contains("bearer-abc"));
    }

    #[test]
    fn test_entry_expires_after_ttl() {
        let (backend, clock, store) = setup();
        store.put("secure_token", "abc", Some(10)).unwrap();

        clock.advance(Duration::from_secs(10 * 60));
        assert_eq!(store.get::<String>("secure_token").unwrap().as_deref(), Some("abc"));

        clock.advance(Duration::from_millis(1));
        assert!(store.get::<String>("secure_token").unwrap().is_none());
        assert!(backend.get("secure_token").unwrap().is_none());
    }

    #[test]
    fn test_entry_without_ttl_never_expires() {
        let (_, clock, store) = setup();
        store.put("secure_user_id", &42u64, None).unwrap();
        clock.advance(Duration::from_secs(365 * 24 * 3600));

        assert!(!store.is_expired("secure_user_id").unwrap());
        assert_eq!(store.get::<u64>("secure_user_id").unwrap(), Some(42));
    }

    #[test]
    fn test_corrupt_envelope_is_evicted() {
        let (backend, _, store) = setup();
        backend.set("secure_user", "{not json").unwrap();

        assert!(store.get::<Profile>("secure_user").unwrap().is_none());
        assert!(backend.get("secure_user").unwrap().is_none());
    }

    #[test]
    fn test_undecodable_payload_is_evicted() {
        let (backend, clock, store) = setup();
        let entry = StoredEntry {
            value: "***".to_string(),
            timestamp: clock.now_ms(),
            expiration: None,
        };
        backend
            .set("secure_user", &serde_json::to_string(&entry).unwrap())
            .unwrap();

        assert!(store.get::<Profile>("secure_user").unwrap().is_none());
        assert!(backend.get("secure_user").unwrap().is_none());
    }

    #[test]
    fn test_huge_ttl_saturates() {
        let (_, clock, store) = setup();
        store
            .put("secure_token", "abc", Some(u64::MAX / 60_000))
            .unwrap();
        clock.advance(Duration::from_secs(365 * 24 * 60 * 60));
        assert_eq!(store.get::<String>("secure_token").unwrap().as_deref(), Some("abc"));
    }

    #[test]
    fn test_lost_key_invalidates_entries() {
        let backend = Arc::new(MemoryBackend::new());
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = SecureStore::with_obfuscator(
            backend.clone(),
            Obfuscator::with_key("original-key"),
            clock.clone(),
        );
        store.put("secure_token", "abc", None).unwrap();

        let other = SecureStore::with_obfuscator(
            backend.clone(),
            Obfuscator::with_key("a-different-key"),
            clock,
        );
        assert!(other.get::<String>("secure_token").unwrap().is_none());
        assert!(backend.get("secure_token").unwrap().is_none());
    }

    #[test]
    fn test_is_expired_for_missing_key() {
        let (_, _, store) = setup();
        assert!(store.is_expired("secure_nothing").unwrap());
    }

    #[test]
    fn test_clear_only_removes_secure_entries() {
        let (backend, _, store) = setup();
        store.put("secure_token", "abc", None).unwrap();
        store.put("secure_user_id", &1u64, None).unwrap();
        backend.set("theme", "dark").unwrap();

        store.clear().unwrap();

        assert!(backend.get("secure_token").unwrap().is_none());
        assert!(backend.get("secure_user_id").unwrap().is_none());
        assert_eq!(backend.get("theme").unwrap().as_deref(), Some("dark"));
        assert!(backend.get(crate::storage::OBFUSCATION_KEY_NAME).unwrap().is_some());
    }
}
