//! Request/response policy wrapped around a [`Transport`].
//!
//! Outbound: bearer token, client-side throttle, CSRF header.
//! Inbound: 401 asks the user to rejoin (once, deduplicated across
//! concurrent requests), a CSRF 403 rotates the token and retries once,
//! 429 surfaces the server's retry hint, anything else unsuccessful comes
//! back as a sanitized [`GuardError::Http`].

use std::sync::Arc;

use async_trait::async_trait;
use http::header::AUTHORIZATION;
use http::StatusCode;
use tracing::{debug, info, warn};

use super::request::{InboundResponse, OutboundRequest};
use crate::csrf::CsrfTokenManager;
use crate::error::{GuardError, Result};
use crate::guard::InFlight;
use crate::sanitize::sanitize_message;
use crate::session::{ExpiryReason, SessionTeardown};
use crate::storage::AuthVault;
use crate::throttle::{EndpointClass, RequestThrottle};

/// Path suffix of the authentication call, whose 401s are plain failures.
pub const DEFAULT_LOGIN_PATH: &str = "/login";

/// Sends a request and returns whatever the server answered.
///
/// Only failures to obtain a response are errors; HTTP error statuses come
/// back as an [`InboundResponse`].
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: OutboundRequest) -> Result<InboundResponse>;
}

/// The user's answer when the server rejects the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejoinDecision {
    /// The user signed in again; the vault holds a fresh token
    Reauthenticated,
    /// The user chose to leave
    Decline,
}

/// Asks the user whether to sign in again after a 401.
#[async_trait]
pub trait RejoinPrompt: Send + Sync {
    async fn confirm_rejoin(&self) -> Result<RejoinDecision>;
}

/// Applies session security policy to every call made through a
/// [`Transport`].
pub struct Interceptor {
    vault: AuthVault,
    csrf: Arc<CsrfTokenManager>,
    throttle: Arc<RequestThrottle>,
    logout: Arc<dyn SessionTeardown>,
    rejoin: Arc<dyn RejoinPrompt>,
    rejoin_in_flight: InFlight,
    login_path: String,
}

impl Interceptor {
    pub fn new(
        vault: AuthVault,
        csrf: Arc<CsrfTokenManager>,
        throttle: Arc<RequestThrottle>,
        logout: Arc<dyn SessionTeardown>,
        rejoin: Arc<dyn RejoinPrompt>,
    ) -> Self {
        Self {
            vault,
            csrf,
            throttle,
            logout,
            rejoin,
            rejoin_in_flight: InFlight::new(),
            login_path: DEFAULT_LOGIN_PATH.to_string(),
        }
    }

    /// Override the path suffix that identifies the authentication call.
    pub fn with_login_path(mut self, path: impl Into<String>) -> Self {
        self.login_path = path.into();
        self
    }

    /// Decorate `request` for sending and charge it to its throttle class.
    ///
    /// Fails with [`GuardError::RateLimited`] without touching the request
    /// when the class is over quota. The charge is taken atomically before
    /// decoration, so a storage failure while decorating still counts.
    pub fn prepare(&self, request: &mut OutboundRequest) -> Result<EndpointClass> {
        let class = EndpointClass::classify(&request.path);
        self.throttle.admit(class)?;

        self.authorize(request)?;
        self.csrf.attach_to(request)?;

        debug!(method = %request.method, path = %request.path, class = %class, "Request prepared");
        Ok(class)
    }

    /// Prepare, send and interpret `request`.
    pub async fn execute(
        &self,
        transport: &dyn Transport,
        mut request: OutboundRequest,
    ) -> Result<InboundResponse> {
        self.prepare(&mut request)?;

        let mut csrf_retried = false;
        let mut rejoined = false;
        loop {
            let response = transport.send(request.clone()).await?;
            let status = response.status;

            if !status.is_client_error() && !status.is_server_error() {
                return Ok(response);
            }

            match status {
                StatusCode::UNAUTHORIZED if !self.is_login(&request) => {
                    if rejoined {
                        warn!(path = %request.path, "Rejected again after rejoining");
                        self.force_logout();
                        return Err(GuardError::SessionExpired(ExpiryReason::Unauthorized));
                    }
                    self.rejoin().await?;
                    rejoined = true;
                    self.authorize(&mut request)?;
                }
                StatusCode::FORBIDDEN if is_csrf_rejection(&response) => {
                    if csrf_retried {
                        warn!(path = %request.path, "CSRF token rejected after rotation");
                        return Err(GuardError::CsrfRejected);
                    }
                    info!(path = %request.path, "CSRF token rejected, rotating and retrying");
                    self.csrf.rotate()?;
                    self.csrf.attach_to(&mut request)?;
                    csrf_retried = true;
                }
                StatusCode::TOO_MANY_REQUESTS => {
                    let retry_after_secs = response.retry_after_secs();
                    debug!(path = %request.path, ?retry_after_secs, "Server rate limited request");
                    return Err(GuardError::ServerRateLimited { retry_after_secs });
                }
                _ => {
                    return Err(GuardError::Http {
                        status: status.as_u16(),
                        message: sanitize_message(&response.message()),
                    });
                }
            }
        }
    }

    /// Whether a rejoin prompt is currently showing.
    pub fn is_rejoin_pending(&self) -> bool {
        self.rejoin_in_flight.is_busy()
    }

    fn is_login(&self, request: &OutboundRequest) -> bool {
        let path = request.path.split(['?', '#']).next().unwrap_or_default();
        path.ends_with(&self.login_path)
    }

    fn authorize(&self, request: &mut OutboundRequest) -> Result<()> {
        if let Some(token) = self.vault.token()? {
            request.set_header(AUTHORIZATION, &format!("Bearer {token}"));
        }
        Ok(())
    }

    async fn rejoin(&self) -> Result<()> {
        let Some(_guard) = self.rejoin_in_flight.try_begin() else {
            debug!("Rejoin prompt already showing, failing request");
            return Err(GuardError::SessionExpired(ExpiryReason::Unauthorized));
        };

        match self.rejoin.confirm_rejoin().await {
            Ok(RejoinDecision::Reauthenticated) => {
                info!("User signed in again, retrying request");
                Ok(())
            }
            Ok(RejoinDecision::Decline) => {
                info!("User declined to rejoin");
                self.force_logout();
                Err(GuardError::SessionExpired(ExpiryReason::Unauthorized))
            }
            Err(e) => {
                warn!(error = %e, "Rejoin prompt failed, logging out");
                self.force_logout();
                Err(GuardError::SessionExpired(ExpiryReason::Unauthorized))
            }
        }
    }

    fn force_logout(&self) {
        self.logout.teardown(ExpiryReason::Unauthorized);
    }
}

/// A 403 is a CSRF rejection when its body mentions CSRF.
fn is_csrf_rejection(response: &InboundResponse) -> bool {
    response.body.to_lowercase().contains("csrf")
}
