//! Session Guard - Client-side Session Security
//!
//! This crate implements the security layer a web client wraps around its
//! API calls: rotating CSRF tokens on state-changing requests, per-endpoint
//! request throttling, an obfuscated expiring store for login records, and
//! an idle/absolute session timeout that warns and then logs the user out.

pub mod clock;
pub mod config;
pub mod context;
pub mod csrf;
pub mod error;
pub mod guard;
pub mod sanitize;
pub mod session;
pub mod storage;
pub mod throttle;
pub mod transport;

pub use config::GuardConfig;
pub use context::GuardContext;
pub use error::{GuardError, Result};
