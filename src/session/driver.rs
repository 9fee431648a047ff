//! Async driver for [`SessionMonitor`].
//!
//! One tokio task owns the monitor's timeline: it sleeps until the next
//! deadline, applies commands from [`SessionHandle`]s as they arrive, and
//! while the idle warning is showing it races the [`WarningPrompt`] against
//! the countdown. Whichever finishes first wins; an answer that arrives
//! after the countdown is discarded.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::BoxFuture;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::config::SessionConfigUpdate;
use super::events::SessionEvent;
use super::monitor::{SessionMonitor, SessionSnapshot};
use super::state::{ActivityKind, ExpiryReason, SessionState, WarningDecision};
use super::teardown::SessionTeardown;
use crate::error::{GuardError, Result};

/// Commands queued before activity signals start being dropped.
const COMMAND_CAPACITY: usize = 256;

/// Asks the user whether to stay logged in.
///
/// An error (the prompt could not be shown or crashed) logs the user out.
#[async_trait]
pub trait WarningPrompt: Send + Sync {
    async fn confirm_stay(&self, remaining: Duration) -> Result<WarningDecision>;
}

/// A prompt that never answers, leaving the countdown to decide.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoPrompt;

#[async_trait]
impl WarningPrompt for NoPrompt {
    async fn confirm_stay(&self, _remaining: Duration) -> Result<WarningDecision> {
        std::future::pending().await
    }
}

#[derive(Debug, Clone)]
enum SessionCommand {
    Activity(ActivityKind),
    Extend,
    Logout,
    Unauthorized,
    UpdateConfig(SessionConfigUpdate),
}

/// Cloneable handle for feeding a running session and reading its state.
#[derive(Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<SessionCommand>,
    monitor: Arc<Mutex<SessionMonitor>>,
}

impl SessionHandle {
    /// Report a user interaction. Returns `false` if the signal was dropped
    /// because the queue is full or the session is over.
    pub fn record_activity(&self, kind: ActivityKind) -> bool {
        self.commands.try_send(SessionCommand::Activity(kind)).is_ok()
    }

    /// Request a fresh session window.
    pub async fn extend(&self) -> Result<()> {
        self.send(SessionCommand::Extend).await
    }

    /// End the session now.
    pub async fn logout(&self) -> Result<()> {
        self.send(SessionCommand::Logout).await
    }

    /// End the session because the server no longer accepts it.
    pub async fn expire_unauthorized(&self) -> Result<()> {
        self.send(SessionCommand::Unauthorized).await
    }

    /// Adjust durations; restarts all timers.
    pub async fn update_config(&self, update: SessionConfigUpdate) -> Result<()> {
        self.send(SessionCommand::UpdateConfig(update)).await
    }

    pub fn state(&self) -> SessionState {
        self.monitor.lock().state()
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        self.monitor.lock().snapshot()
    }

    pub fn idle_time_remaining(&self) -> Duration {
        self.monitor.lock().idle_time_remaining()
    }

    pub fn session_time_remaining(&self) -> Duration {
        self.monitor.lock().session_time_remaining()
    }

    pub fn is_in_warning_window(&self) -> bool {
        self.monitor.lock().is_in_warning_window()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.monitor.lock().events().subscribe()
    }

    async fn send(&self, command: SessionCommand) -> Result<()> {
        self.commands.send(command).await.map_err(|_| {
            let reason = self
                .monitor
                .lock()
                .expiry_reason()
                .unwrap_or(ExpiryReason::UserLogout);
            GuardError::SessionExpired(reason)
        })
    }
}

/// Lets the transport layer end a driven session.
impl SessionTeardown for SessionHandle {
    fn teardown(&self, reason: ExpiryReason) {
        let command = match reason {
            ExpiryReason::Unauthorized => SessionCommand::Unauthorized,
            _ => SessionCommand::Logout,
        };
        if self.commands.try_send(command).is_err() {
            debug!(reason = %reason, "Session queue unavailable, ending session directly");
            with_monitor(&self.monitor, |monitor| match reason {
                ExpiryReason::Unauthorized => monitor.expire_unauthorized(),
                _ => monitor.logout_now(),
            });
        }
    }
}

/// Runs a [`SessionMonitor`] on the tokio clock.
pub struct SessionDriver {
    monitor: Arc<Mutex<SessionMonitor>>,
    commands: mpsc::Receiver<SessionCommand>,
    prompt: Arc<dyn WarningPrompt>,
}

impl SessionDriver {
    /// Wrap `monitor`, returning the driver and a handle to it.
    ///
    /// From here on teardown runs after the monitor lock is released, so a
    /// navigator may read the session through its handle.
    pub fn new(mut monitor: SessionMonitor, prompt: Arc<dyn WarningPrompt>) -> (Self, SessionHandle) {
        monitor.defer_teardown();
        let (tx, rx) = mpsc::channel(COMMAND_CAPACITY);
        let monitor = Arc::new(Mutex::new(monitor));
        let handle = SessionHandle {
            commands: tx,
            monitor: Arc::clone(&monitor),
        };
        let driver = Self {
            monitor,
            commands: rx,
            prompt,
        };
        (driver, handle)
    }

    /// Spawn the driver on the current runtime.
    pub fn spawn(
        monitor: SessionMonitor,
        prompt: Arc<dyn WarningPrompt>,
    ) -> (SessionHandle, JoinHandle<Option<ExpiryReason>>) {
        let (driver, handle) = Self::new(monitor, prompt);
        (handle, tokio::spawn(driver.run()))
    }

    /// Drive the session until it ends. Returns why it ended.
    pub async fn run(mut self) -> Option<ExpiryReason> {
        let mut prompt: Option<BoxFuture<'static, Result<WarningDecision>>> = None;
        let mut prompted_for: Option<u64> = None;
        let mut commands_open = true;

        loop {
            let (state, sleep_for, warning) = {
                let monitor = self.monitor.lock();
                let now = monitor.clock().now_ms();
                let sleep_for = monitor
                    .next_deadline()
                    .map(|deadline| Duration::from_millis(deadline.saturating_sub(now)));
                let warning = monitor
                    .warning_deadline()
                    .zip(monitor.warning_time_remaining());
                (monitor.state(), sleep_for, warning)
            };

            if state.is_terminal() {
                break;
            }

            match (state, warning) {
                (SessionState::IdleWarning, Some((deadline, remaining)))
                    if prompted_for != Some(deadline) =>
                {
                    debug!(remaining_ms = (remaining.as_millis() as u64), "Showing idle warning prompt");
                    let ask = Arc::clone(&self.prompt);
                    prompt = Some(Box::pin(async move { ask.confirm_stay(remaining).await }));
                    prompted_for = Some(deadline);
                }
                (SessionState::Active, _) => {
                    prompt = None;
                    prompted_for = None;
                }
                _ => {}
            }

            tokio::select! {
                _ = sleep_opt(sleep_for) => {
                    with_monitor(&self.monitor, |monitor| {
                        monitor.poll();
                    });
                }
                command = self.commands.recv(), if commands_open => match command {
                    Some(command) => self.apply(command),
                    None => commands_open = false,
                },
                answer = wait_prompt(&mut prompt) => {
                    prompt = None;
                    let decision = match answer {
                        Ok(decision) => decision,
                        Err(e) => {
                            warn!(error = %e, "Idle warning prompt failed, logging out");
                            WarningDecision::LogOut
                        }
                    };
                    if let Err(e) = with_monitor(&self.monitor, |m| m.resolve_warning(decision)) {
                        debug!(error = %e, ?decision, "Idle warning answered too late");
                    }
                }
            }
        }

        let reason = self.monitor.lock().expiry_reason();
        info!(reason = ?reason, "Session driver stopped");
        reason
    }

    fn apply(&self, command: SessionCommand) {
        let outcome = with_monitor(&self.monitor, |monitor| match command {
            SessionCommand::Activity(kind) => {
                monitor.record_activity(kind);
                Ok(())
            }
            SessionCommand::Extend => monitor.extend_session(),
            SessionCommand::Logout => {
                monitor.logout_now();
                Ok(())
            }
            SessionCommand::Unauthorized => {
                monitor.expire_unauthorized();
                Ok(())
            }
            SessionCommand::UpdateConfig(update) => monitor.update_config(update),
        });
        if let Err(e) = outcome {
            debug!(error = %e, "Session command had no effect");
        }
    }
}

/// Run `f` under the monitor lock, then any teardown it triggered once the
/// lock is released.
fn with_monitor<R>(monitor: &Mutex<SessionMonitor>, f: impl FnOnce(&mut SessionMonitor) -> R) -> R {
    let (result, pending) = {
        let mut guard = monitor.lock();
        let result = f(&mut guard);
        (result, guard.take_pending_teardown())
    };
    if let Some((reason, teardown)) = pending {
        teardown.teardown(reason);
    }
    result
}

async fn sleep_opt(duration: Option<Duration>) {
    match duration {
        Some(duration) => tokio::time::sleep(duration).await,
        None => std::future::pending().await,
    }
}

fn wait_prompt<'a>(
    prompt: &'a mut Option<BoxFuture<'static, Result<WarningDecision>>>,
) -> impl Future<Output = Result<WarningDecision>> + 'a {
    async move {
        match prompt.as_mut() {
            Some(fut) => fut.await,
            None => std::future::pending().await,
        }
    }
}
