//! Obfuscated, expiring storage for session data.

mod backend;
mod obfuscation;
mod store;
mod vault;

pub use backend::{FileBackend, MemoryBackend, StorageBackend};
pub use obfuscation::{Obfuscator, OBFUSCATION_KEY_NAME};
pub use store::{SecureStore, StoredEntry, SECURE_PREFIX};
pub use vault::{AuthVault, UserRecord, TOKEN_KEY, USER_ID_KEY, USER_KEY};

pub(crate) use obfuscation::random_hex;
