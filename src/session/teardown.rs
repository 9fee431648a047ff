//! Logout side effects.

use std::sync::Arc;

use tracing::{debug, info, warn};

use super::state::ExpiryReason;
use crate::csrf::CsrfTokenManager;
use crate::guard::InFlight;
use crate::storage::AuthVault;

/// Runs when a session ends.
pub trait SessionTeardown: Send + Sync {
    fn teardown(&self, reason: ExpiryReason);
}

/// Sends the user to the unauthenticated entry point.
pub trait Navigator: Send + Sync {
    fn redirect_to_login(&self, reason: ExpiryReason);
}

impl<F> Navigator for F
where
    F: Fn(ExpiryReason) + Send + Sync,
{
    fn redirect_to_login(&self, reason: ExpiryReason) {
        self(reason)
    }
}

/// Clears persisted auth state and the CSRF token, then redirects.
///
/// Storage failures are logged and do not stop the redirect: a half-cleared
/// session still ends.
pub struct LogoutCoordinator {
    vault: AuthVault,
    csrf: Arc<CsrfTokenManager>,
    navigator: Arc<dyn Navigator>,
    in_flight: InFlight,
}

impl LogoutCoordinator {
    pub fn new(vault: AuthVault, csrf: Arc<CsrfTokenManager>, navigator: Arc<dyn Navigator>) -> Self {
        Self {
            vault,
            csrf,
            navigator,
            in_flight: InFlight::new(),
        }
    }

    /// Whether a logout is currently running.
    pub fn is_logging_out(&self) -> bool {
        self.in_flight.is_busy()
    }
}

impl SessionTeardown for LogoutCoordinator {
    fn teardown(&self, reason: ExpiryReason) {
        let Some(_guard) = self.in_flight.try_begin() else {
            debug!(reason = %reason, "Logout already in progress, skipping");
            return;
        };

        info!(reason = %reason, "Logging out");
        if let Err(e) = self.vault.clear() {
            warn!(error = %e, "Failed to clear stored session");
        }
        if let Err(e) = self.csrf.cleanup() {
            warn!(error = %e, "Failed to clear CSRF token");
        }
        self.navigator.redirect_to_login(reason);
    }
}
