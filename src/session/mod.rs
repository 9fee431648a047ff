//! Idle and absolute session timeouts.

pub mod config;
pub mod driver;
pub mod events;
pub mod monitor;
pub mod state;
pub mod teardown;
pub mod timer;

pub use config::{SessionConfig, SessionConfigUpdate};
pub use driver::{NoPrompt, SessionDriver, SessionHandle, WarningPrompt};
pub use events::{EventBus, SessionEvent};
pub use monitor::{SessionMonitor, SessionSnapshot};
pub use state::{ActivityKind, ExpiryReason, SessionState, WarningDecision};
pub use teardown::{LogoutCoordinator, Navigator, SessionTeardown};
pub use timer::{TimerHandle, TimerKind, TimerSet};
