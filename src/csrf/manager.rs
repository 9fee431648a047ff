//! CSRF token lifecycle.

use std::sync::Arc;
use std::time::Duration;

use http::header::HeaderName;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::token::{generate_token, tokens_match};
use crate::error::Result;
use crate::session::config::MAX_DURATION_SECS;
use crate::storage::StorageBackend;
use crate::transport::OutboundRequest;

/// Session storage key for the current token.
pub const CSRF_STORAGE_KEY: &str = "csrf_token";
/// Header carrying the token on state-changing requests.
pub const CSRF_HEADER: &str = "x-csrf-token";
/// Form field carrying the token.
pub const CSRF_FORM_FIELD: &str = "csrf_token";

/// CSRF manager configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CsrfConfig {
    /// Background rotation interval in seconds
    #[serde(default = "default_rotation_interval")]
    pub rotation_interval_secs: u64,
}

impl Default for CsrfConfig {
    fn default() -> Self {
        Self {
            rotation_interval_secs: default_rotation_interval(),
        }
    }
}

fn default_rotation_interval() -> u64 {
    30 * 60
}

impl CsrfConfig {
    pub fn rotation_interval(&self) -> Duration {
        Duration::from_secs(self.rotation_interval_secs.min(MAX_DURATION_SECS))
    }
}

/// Holds the single current anti-forgery token for a browser session.
///
/// The token is mirrored into session-scoped storage so that it survives a
/// reload but not the end of the session. If that copy disappears (storage
/// cleared externally), the next read generates a replacement.
pub struct CsrfTokenManager {
    storage: Arc<dyn StorageBackend>,
    current: Mutex<Option<String>>,
    config: CsrfConfig,
    rotation: Mutex<Option<JoinHandle<()>>>,
}

impl CsrfTokenManager {
    /// Create a manager, adopting a token already present in `storage`.
    pub fn new(storage: Arc<dyn StorageBackend>, config: CsrfConfig) -> Self {
        let existing = match storage.get(CSRF_STORAGE_KEY) {
            Ok(token) => token.filter(|t| !t.is_empty()),
            Err(e) => {
                warn!(error = %e, "Failed to read stored CSRF token");
                None
            }
        };
        Self {
            storage,
            current: Mutex::new(existing),
            config,
            rotation: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    /// The active token, generated on first use or after external clearing.
    pub fn current_token(&self) -> Result<String> {
        let mut current = self.current.lock();
        let stored = self.storage.get(CSRF_STORAGE_KEY)?;

        match (current.as_ref(), stored) {
            (Some(token), Some(_)) => Ok(token.clone()),
            _ => {
                let token = self.install(&mut current)?;
                debug!("Generated CSRF token");
                Ok(token)
            }
        }
    }

    /// Replace the active token unconditionally.
    pub fn rotate(&self) -> Result<String> {
        let mut current = self.current.lock();
        let token = self.install(&mut current)?;
        info!("Rotated CSRF token");
        Ok(token)
    }

    /// Window-focus hook: rotate only if the stored copy has gone missing.
    pub fn on_focus(&self) -> Result<()> {
        if self.storage.get(CSRF_STORAGE_KEY)?.is_none() {
            self.rotate()?;
        }
        Ok(())
    }

    /// Add the token header to state-changing requests. Returns whether a
    /// header was set.
    pub fn attach_to(&self, request: &mut OutboundRequest) -> Result<bool> {
        if !request.is_state_changing() {
            return Ok(false);
        }
        let token = self.current_token()?;
        request.set_header(HeaderName::from_static(CSRF_HEADER), &token);
        Ok(true)
    }

    /// Add the token to a form-style JSON body.
    pub fn attach_to_form(&self, form: &mut serde_json::Map<String, serde_json::Value>) -> Result<()> {
        let token = self.current_token()?;
        form.insert(CSRF_FORM_FIELD.to_string(), serde_json::Value::String(token));
        Ok(())
    }

    /// Whether `candidate` equals the current token.
    pub fn validate(&self, candidate: &str) -> Result<bool> {
        Ok(tokens_match(&self.current_token()?, candidate))
    }

    /// Forget the token and stop background rotation (logout).
    pub fn cleanup(&self) -> Result<()> {
        self.stop_rotation();
        let mut current = self.current.lock();
        *current = None;
        self.storage.remove(CSRF_STORAGE_KEY)?;
        debug!("Cleared CSRF token");
        Ok(())
    }

    /// Whether a token is currently held.
    pub fn has_token(&self) -> bool {
        self.current.lock().is_some()
    }

    /// Rotate on the configured interval until [`cleanup`](Self::cleanup)
    /// or [`stop_rotation`](Self::stop_rotation). Replaces any running
    /// rotation task. Returns `false` when called outside a tokio runtime.
    pub fn spawn_rotation(self: &Arc<Self>) -> bool {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            debug!("No async runtime, CSRF rotation not started");
            return false;
        };

        let manager = Arc::downgrade(self);
        let period = self.config.rotation_interval();
        let task = runtime.spawn(async move {
            let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
            loop {
                ticker.tick().await;
                let Some(manager) = manager.upgrade() else {
                    break;
                };
                if let Err(e) = manager.rotate_if_held() {
                    warn!(error = %e, "Scheduled CSRF rotation failed");
                }
            }
        });

        if let Some(previous) = self.rotation.lock().replace(task) {
            previous.abort();
        }
        true
    }

    /// Abort the background rotation task, if running.
    pub fn stop_rotation(&self) {
        if let Some(task) = self.rotation.lock().take() {
            task.abort();
            debug!("Stopped CSRF rotation");
        }
    }

    /// Whether a background rotation task is running.
    pub fn is_rotating(&self) -> bool {
        self.rotation
            .lock()
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Rotate only while a token is held, so a tick racing logout cannot
    /// issue a new one.
    fn rotate_if_held(&self) -> Result<bool> {
        let mut current = self.current.lock();
        if current.is_none() {
            return Ok(false);
        }
        self.install(&mut current)?;
        info!("Rotated CSRF token");
        Ok(true)
    }

    fn install(&self, current: &mut Option<String>) -> Result<String> {
        let token = generate_token();
        self.storage.set(CSRF_STORAGE_KEY, &token)?;
        *current = Some(token.clone());
        Ok(token)
    }
}
