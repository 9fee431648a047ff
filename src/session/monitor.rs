//! Idle and absolute session timeout state machine.
//!
//! The monitor owns three deadlines:
//!
//! - **idle**: `last_activity + idle_timeout`, pushed forward by every
//!   recognized interaction. When it passes in `Active`, the monitor enters
//!   `IdleWarning` and starts the warning countdown.
//! - **warning**: `idle_fired_at + warning_time`. When it passes in
//!   `IdleWarning`, the session ends.
//! - **session**: fixed at start. Activity never moves it; only an explicit
//!   extend (or a config update, which implies one) starts a fresh window.
//!   When it passes, the session ends from any state.
//!
//! Nothing here sleeps. Callers feed time in through [`SessionMonitor::poll`]
//! (the async [`super::SessionDriver`] does this on a tokio timer) and
//! every transition happens inside one `&mut self` call.

use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, trace, warn};
use uuid::Uuid;

use super::config::{SessionConfig, SessionConfigUpdate};
use super::events::{EventBus, SessionEvent};
use super::state::{ActivityKind, ExpiryReason, SessionState, WarningDecision};
use super::teardown::SessionTeardown;
use super::timer::{TimerHandle, TimerKind, TimerSet};
use crate::clock::{to_datetime, SharedClock};
use crate::error::{GuardError, Result};

/// Point-in-time view of a session, for diagnostics.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SessionSnapshot {
    pub session_id: Uuid,
    pub state: SessionState,
    pub last_activity: chrono::DateTime<chrono::Utc>,
    pub session_deadline: chrono::DateTime<chrono::Utc>,
    pub idle_deadline: chrono::DateTime<chrono::Utc>,
    pub warning_deadline: Option<chrono::DateTime<chrono::Utc>>,
    pub config: SessionConfig,
    pub idle_remaining_ms: u64,
    pub session_remaining_ms: u64,
    pub expiring_soon: bool,
}

pub struct SessionMonitor {
    id: Uuid,
    config: SessionConfig,
    clock: SharedClock,
    events: EventBus,
    teardown: Arc<dyn SessionTeardown>,
    timers: TimerSet,
    state: SessionState,
    last_activity: u64,
    session_deadline: u64,
    idle_deadline: u64,
    warning_deadline: Option<u64>,
    ended: Option<ExpiryReason>,
    /// Hold teardown for the owner to run outside its lock
    defer_teardown: bool,
    pending_teardown: Option<ExpiryReason>,
}

impl SessionMonitor {
    /// Start monitoring a freshly authenticated session.
    pub fn start(
        config: SessionConfig,
        clock: SharedClock,
        events: EventBus,
        teardown: Arc<dyn SessionTeardown>,
    ) -> Result<Self> {
        config.validate()?;
        let now = clock.now_ms();
        let mut monitor = Self {
            id: Uuid::new_v4(),
            config,
            clock,
            events,
            teardown,
            timers: TimerSet::new(),
            state: SessionState::Active,
            last_activity: now,
            session_deadline: now,
            idle_deadline: now,
            warning_deadline: None,
            ended: None,
            defer_teardown: false,
            pending_teardown: None,
        };
        monitor.restart_session_window(now);
        monitor.reset_idle(now);

        info!(
            session_id = %monitor.id,
            session_timeout_secs = config.session_timeout_secs,
            idle_timeout_secs = config.idle_timeout_secs,
            "Session monitor started"
        );
        Ok(monitor)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn clock(&self) -> &SharedClock {
        &self.clock
    }

    /// Why the session ended, once it has.
    pub fn expiry_reason(&self) -> Option<ExpiryReason> {
        self.ended
    }

    /// Fire every timer that is due, in deadline order.
    ///
    /// Returns the number of transitions taken.
    pub fn poll(&mut self) -> usize {
        let now = self.clock.now_ms();
        let mut transitions = 0;
        while let Some(handle) = self.timers.next_due(now) {
            if self.fire(handle) {
                transitions += 1;
            }
        }
        transitions
    }

    /// Deliver a scheduled timer. Stale handles (superseded by a later
    /// schedule or cancelled) are ignored. Returns whether a transition
    /// happened.
    pub fn fire(&mut self, handle: TimerHandle) -> bool {
        if !self.timers.is_current(&handle) {
            trace!(session_id = %self.id, kind = ?handle.kind, "Ignoring stale timer");
            return false;
        }
        self.timers.cancel(handle.kind);

        match (handle.kind, self.state) {
            (TimerKind::Session, SessionState::Active | SessionState::IdleWarning) => {
                self.end(ExpiryReason::SessionTimeout);
                true
            }
            (TimerKind::Idle, SessionState::Active) => {
                self.enter_warning(handle.deadline);
                true
            }
            (TimerKind::Warning, SessionState::IdleWarning) => {
                self.end(ExpiryReason::IdleTimeout);
                true
            }
            _ => false,
        }
    }

    /// Record a user interaction. Ignored once logged out.
    ///
    /// Overdue timers are settled first, so activity arriving after a
    /// deadline has already passed cannot revive the session.
    pub fn record_activity(&mut self, kind: ActivityKind) -> bool {
        self.poll();
        if self.state.is_terminal() {
            return false;
        }

        let now = self.clock.now_ms();
        if self.state == SessionState::IdleWarning {
            debug!(session_id = %self.id, ?kind, "Activity during idle warning, resuming");
            self.leave_warning();
        }
        self.reset_idle(now);
        trace!(session_id = %self.id, ?kind, "Activity recorded");
        self.events.emit(SessionEvent::ActivityDetected {
            timestamp: to_datetime(now),
        });
        true
    }

    /// Start a fresh session window and reset the idle deadline.
    pub fn extend_session(&mut self) -> Result<()> {
        self.poll();
        if let Some(reason) = self.ended {
            return Err(GuardError::SessionExpired(reason));
        }

        let now = self.clock.now_ms();
        if self.state == SessionState::IdleWarning {
            self.leave_warning();
        }
        self.reset_idle(now);
        self.restart_session_window(now);
        info!(session_id = %self.id, "Session extended");
        self.events.emit(SessionEvent::ActivityDetected {
            timestamp: to_datetime(now),
        });
        Ok(())
    }

    /// Apply the user's answer to the idle warning.
    ///
    /// Answers that arrive after the countdown already ended the session
    /// (or when no warning is showing) are ignored.
    pub fn resolve_warning(&mut self, decision: WarningDecision) -> Result<()> {
        self.poll();
        match (self.state, decision) {
            (SessionState::LoggedOut, _) => {
                debug!(session_id = %self.id, ?decision, "Warning answered after logout");
                Err(GuardError::SessionExpired(
                    self.ended.unwrap_or(ExpiryReason::IdleTimeout),
                ))
            }
            (SessionState::IdleWarning, WarningDecision::StayLoggedIn) => self.extend_session(),
            (SessionState::IdleWarning, WarningDecision::LogOut) => {
                self.end(ExpiryReason::UserLogout);
                Ok(())
            }
            (SessionState::Active, _) => Ok(()),
        }
    }

    /// End the session immediately.
    pub fn logout_now(&mut self) {
        self.end(ExpiryReason::UserLogout);
    }

    /// End the session because the server rejected it.
    pub fn expire_unauthorized(&mut self) {
        self.end(ExpiryReason::Unauthorized);
    }

    /// Change durations at runtime. Applying a change restarts all timers
    /// under the new values, as an extend would.
    pub fn update_config(&mut self, update: SessionConfigUpdate) -> Result<()> {
        let mut config = self.config;
        config.apply(&update);
        config.validate()?;
        self.config = config;
        debug!(session_id = %self.id, ?config, "Session config updated");
        self.extend_session()
    }

    /// Time left before the idle warning; zero once it is showing or the
    /// session is over.
    pub fn idle_time_remaining(&self) -> Duration {
        if self.state != SessionState::Active {
            return Duration::ZERO;
        }
        self.until(self.idle_deadline)
    }

    /// Time left before the absolute session deadline.
    pub fn session_time_remaining(&self) -> Duration {
        if self.state.is_terminal() {
            return Duration::ZERO;
        }
        self.until(self.session_deadline)
    }

    /// Time left on the idle-warning countdown, while it runs.
    pub fn warning_time_remaining(&self) -> Option<Duration> {
        match (self.state, self.warning_deadline) {
            (SessionState::IdleWarning, Some(deadline)) => Some(self.until(deadline)),
            _ => None,
        }
    }

    /// Whether the idle warning countdown is running.
    pub fn is_in_warning_window(&self) -> bool {
        self.state == SessionState::IdleWarning
    }

    /// Whether the absolute deadline is within one warning period.
    pub fn is_expiring_soon(&self) -> bool {
        !self.state.is_terminal()
            && self.session_time_remaining() <= self.config.warning_time()
    }

    /// Idle-warning countdown deadline in epoch ms.
    pub fn warning_deadline(&self) -> Option<u64> {
        self.warning_deadline
    }

    /// Earliest pending timer deadline in epoch ms.
    pub fn next_deadline(&self) -> Option<u64> {
        self.timers.next().map(|h| h.deadline)
    }

    /// The live timer of a kind, if scheduled.
    pub fn timer(&self, kind: TimerKind) -> Option<TimerHandle> {
        self.timers.get(kind)
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            session_id: self.id,
            state: self.state,
            last_activity: to_datetime(self.last_activity),
            session_deadline: to_datetime(self.session_deadline),
            idle_deadline: to_datetime(self.idle_deadline),
            warning_deadline: self.warning_deadline.map(to_datetime),
            config: self.config,
            idle_remaining_ms: self.idle_time_remaining().as_millis() as u64,
            session_remaining_ms: self.session_time_remaining().as_millis() as u64,
            expiring_soon: self.is_expiring_soon(),
        }
    }

    fn reset_idle(&mut self, now: u64) {
        self.last_activity = now;
        self.idle_deadline = now.saturating_add(self.config.idle_timeout_ms());
        self.timers.schedule(TimerKind::Idle, self.idle_deadline);
    }

    fn restart_session_window(&mut self, now: u64) {
        self.session_deadline = now.saturating_add(self.config.session_timeout_ms());
        self.timers.schedule(TimerKind::Session, self.session_deadline);
    }

    fn enter_warning(&mut self, fired_at: u64) {
        let deadline = fired_at.saturating_add(self.config.warning_ms());
        self.state = SessionState::IdleWarning;
        self.warning_deadline = Some(deadline);
        self.timers.schedule(TimerKind::Warning, deadline);

        info!(
            session_id = %self.id,
            warning_secs = self.config.warning_secs,
            "Idle timeout reached, warning user"
        );
        self.events.emit(SessionEvent::IdleWarning {
            remaining_ms: self.config.warning_ms(),
            timestamp: to_datetime(self.clock.now_ms()),
        });
    }

    fn leave_warning(&mut self) {
        self.timers.cancel(TimerKind::Warning);
        self.warning_deadline = None;
        self.state = SessionState::Active;
    }

    fn end(&mut self, reason: ExpiryReason) {
        if self.state.is_terminal() {
            return;
        }
        self.timers.cancel_all();
        self.state = SessionState::LoggedOut;
        self.warning_deadline = None;
        self.ended = Some(reason);

        warn!(session_id = %self.id, reason = %reason, "Session ended");
        self.events.emit(SessionEvent::SessionExpired {
            reason,
            timestamp: to_datetime(self.clock.now_ms()),
        });
        if self.defer_teardown {
            self.pending_teardown = Some(reason);
        } else {
            self.teardown.teardown(reason);
        }
    }

    /// Stop running teardown inline. The owner must collect it with
    /// [`take_pending_teardown`](Self::take_pending_teardown) after every
    /// call that can end the session.
    pub(crate) fn defer_teardown(&mut self) {
        self.defer_teardown = true;
    }

    /// Teardown owed by a session that ended while deferred.
    pub(crate) fn take_pending_teardown(&mut self) -> Option<(ExpiryReason, Arc<dyn SessionTeardown>)> {
        self.pending_teardown
            .take()
            .map(|reason| (reason, Arc::clone(&self.teardown)))
    }

    fn until(&self, deadline: u64) -> Duration {
        Duration::from_millis(deadline.saturating_sub(self.clock.now_ms()))
    }
}
