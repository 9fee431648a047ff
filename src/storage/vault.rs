//! Persisted authentication state.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, info};

use super::store::SecureStore;
use crate::error::Result;

/// Storage key for the bearer token.
pub const TOKEN_KEY: &str = "secure_token";
/// Storage key for the serialized user profile.
pub const USER_KEY: &str = "secure_user";
/// Storage key for the user identifier.
pub const USER_ID_KEY: &str = "secure_user_id";

/// Anything that can be persisted as the signed-in user.
pub trait UserRecord: Serialize {
    /// Stable identifier written alongside the profile.
    fn user_id(&self) -> String;
}

impl UserRecord for serde_json::Value {
    fn user_id(&self) -> String {
        match self.get("id") {
            Some(serde_json::Value::String(s)) => s.clone(),
            Some(other) if !other.is_null() => other.to_string(),
            _ => String::new(),
        }
    }
}

/// Typed access to the token, profile and user id kept in a [`SecureStore`].
#[derive(Clone)]
pub struct AuthVault {
    store: Arc<SecureStore>,
    ttl_minutes: Option<u64>,
}

impl AuthVault {
    /// `ttl_minutes` applies to every entry written by the vault.
    pub fn new(store: Arc<SecureStore>, ttl_minutes: Option<u64>) -> Self {
        Self { store, ttl_minutes }
    }

    pub fn store(&self) -> &Arc<SecureStore> {
        &self.store
    }

    /// Persist a freshly authenticated session.
    pub fn store_login<U: UserRecord>(&self, token: &str, user: &U) -> Result<()> {
        self.store.put(TOKEN_KEY, token, self.ttl_minutes)?;
        self.write_user(user)?;
        info!(user_id = %user.user_id(), "Stored authenticated session");
        Ok(())
    }

    /// Replace the stored profile after a profile or user-data update.
    pub fn update_profile<U: UserRecord>(&self, user: &U) -> Result<()> {
        self.write_user(user)?;
        debug!(user_id = %user.user_id(), "Refreshed stored profile");
        Ok(())
    }

    pub fn token(&self) -> Result<Option<String>> {
        self.store.get(TOKEN_KEY)
    }

    pub fn user<T: DeserializeOwned>(&self) -> Result<Option<T>> {
        self.store.get(USER_KEY)
    }

    pub fn user_id(&self) -> Result<Option<String>> {
        self.store.get(USER_ID_KEY)
    }

    /// A session is authenticated when both a token and a profile are readable.
    pub fn is_authenticated(&self) -> Result<bool> {
        Ok(self.token()?.is_some() && self.user::<serde_json::Value>()?.is_some())
    }

    /// Remove all persisted authentication state.
    pub fn clear(&self) -> Result<()> {
        self.store.remove(TOKEN_KEY)?;
        self.store.remove(USER_KEY)?;
        self.store.remove(USER_ID_KEY)?;
        debug!("Cleared stored authentication state");
        Ok(())
    }

    fn write_user<U: UserRecord>(&self, user: &U) -> Result<()> {
        self.store.put(USER_KEY, user, self.ttl_minutes)?;
        self.store.put(USER_ID_KEY, &user.user_id(), self.ttl_minutes)
    }
}
