//! Wiring of the guard components for one browser origin.

use std::sync::Arc;

use tracing::info;

use crate::clock::SharedClock;
use crate::config::GuardConfig;
use crate::csrf::CsrfTokenManager;
use crate::error::Result;
use crate::session::{
    EventBus, LogoutCoordinator, Navigator, SessionMonitor, SessionTeardown,
};
use crate::storage::{AuthVault, FileBackend, MemoryBackend, SecureStore, StorageBackend, UserRecord};
use crate::throttle::RequestThrottle;
use crate::transport::{Interceptor, RejoinPrompt};

/// Shared components built from a [`GuardConfig`].
///
/// `durable` plays the role of `localStorage` (login records, obfuscation
/// key); `session` plays `sessionStorage` (CSRF token).
pub struct GuardContext {
    config: GuardConfig,
    clock: SharedClock,
    vault: AuthVault,
    csrf: Arc<CsrfTokenManager>,
    throttle: Arc<RequestThrottle>,
    events: EventBus,
}

impl GuardContext {
    /// Build with storage chosen by the config: a file when
    /// `storage.path` is set, memory otherwise.
    pub fn from_config(config: GuardConfig, clock: SharedClock) -> Result<Self> {
        let durable: Arc<dyn StorageBackend> = match &config.storage.path {
            Some(path) => Arc::new(FileBackend::open(path)?),
            None => Arc::new(MemoryBackend::new()),
        };
        Self::with_backends(config, clock, durable, Arc::new(MemoryBackend::new()))
    }

    pub fn with_backends(
        config: GuardConfig,
        clock: SharedClock,
        durable: Arc<dyn StorageBackend>,
        session: Arc<dyn StorageBackend>,
    ) -> Result<Self> {
        config.validate()?;

        let store = SecureStore::open(durable, Arc::clone(&clock))?;
        let vault = AuthVault::new(Arc::new(store), config.storage.session_ttl_minutes);
        let csrf = Arc::new(CsrfTokenManager::new(session, config.csrf.clone()));
        let throttle = Arc::new(RequestThrottle::with_config(
            Arc::clone(&clock),
            config.throttle.clone(),
        ));

        Ok(Self {
            config,
            clock,
            vault,
            csrf,
            throttle,
            events: EventBus::new(),
        })
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    pub fn vault(&self) -> &AuthVault {
        &self.vault
    }

    pub fn csrf(&self) -> &Arc<CsrfTokenManager> {
        &self.csrf
    }

    pub fn throttle(&self) -> &Arc<RequestThrottle> {
        &self.throttle
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    /// Teardown that clears this context's records and redirects.
    pub fn logout_coordinator(&self, navigator: Arc<dyn Navigator>) -> Arc<LogoutCoordinator> {
        Arc::new(LogoutCoordinator::new(
            self.vault.clone(),
            Arc::clone(&self.csrf),
            navigator,
        ))
    }

    /// Persist a successful login, issue a fresh CSRF token and start
    /// monitoring the new session. Background CSRF rotation starts too
    /// when called inside a tokio runtime; logout stops it.
    pub fn login<U: UserRecord>(
        &self,
        token: &str,
        user: &U,
        navigator: Arc<dyn Navigator>,
    ) -> Result<SessionMonitor> {
        self.vault.store_login(token, user)?;
        self.csrf.rotate()?;
        self.csrf.spawn_rotation();

        let monitor = SessionMonitor::start(
            self.config.session,
            Arc::clone(&self.clock),
            self.events.clone(),
            self.logout_coordinator(navigator),
        )?;
        info!(session_id = %monitor.id(), user_id = %user.user_id(), "Login recorded");
        Ok(monitor)
    }

    /// Interceptor sharing this context's vault, CSRF manager and throttle.
    pub fn interceptor(
        &self,
        logout: Arc<dyn SessionTeardown>,
        rejoin: Arc<dyn RejoinPrompt>,
    ) -> Interceptor {
        Interceptor::new(
            self.vault.clone(),
            Arc::clone(&self.csrf),
            Arc::clone(&self.throttle),
            logout,
            rejoin,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::session::{ExpiryReason, SessionState};
    use parking_lot::Mutex;
    use std::time::Duration;

    #[test]
    fn test_login_then_idle_logout_clears_records() {
        let clock = Arc::new(ManualClock::new(0));
        let context = GuardContext::from_config(GuardConfig::default(), clock.clone()).unwrap();

        let redirects = Arc::new(Mutex::new(Vec::new()));
        let sink = redirects.clone();
        let mut monitor = context
            .login(
                "jwt",
                &serde_json::json!({"id": "u-1"}),
                Arc::new(move |reason: ExpiryReason| sink.lock().push(reason)),
            )
            .unwrap();

        assert!(context.vault().is_authenticated().unwrap());
        assert!(context.csrf().has_token());
        assert!(!context.csrf().is_rotating());

        clock.advance(Duration::from_secs(20 * 60));
        monitor.poll();

        assert_eq!(monitor.state(), SessionState::LoggedOut);
        assert!(!context.vault().is_authenticated().unwrap());
        assert!(!context.csrf().has_token());
        assert_eq!(*redirects.lock(), vec![ExpiryReason::IdleTimeout]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_login_rotates_until_logout() {
        let clock = Arc::new(ManualClock::new(0));
        let mut config = GuardConfig::default();
        config.csrf.rotation_interval_secs = 60;
        let context = GuardContext::from_config(config, clock).unwrap();

        let mut monitor = context
            .login("jwt", &serde_json::json!({"id": 7}), Arc::new(|_: ExpiryReason| {}))
            .unwrap();
        assert!(context.csrf().is_rotating());
        let first = context.csrf().current_token().unwrap();

        tokio::time::sleep(Duration::from_secs(61)).await;
        assert_ne!(context.csrf().current_token().unwrap(), first);

        monitor.logout_now();
        assert!(!context.csrf().is_rotating());
        tokio::time::sleep(Duration::from_secs(61)).await;
        assert!(!context.csrf().has_token());
    }

    #[test]
    fn test_file_storage_survives_rebuild() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = GuardConfig::default();
        config.storage.path = Some(dir.path().join("local.json"));

        let clock: SharedClock = Arc::new(ManualClock::new(0));
        {
            let context = GuardContext::from_config(config.clone(), clock.clone()).unwrap();
            context
                .vault()
                .store_login("jwt", &serde_json::json!({"id": 3}))
                .unwrap();
        }

        let context = GuardContext::from_config(config, clock).unwrap();
        assert_eq!(context.vault().token().unwrap().as_deref(), Some("jwt"));
        assert_eq!(context.vault().user_id().unwrap().as_deref(), Some("3"));
    }
}
