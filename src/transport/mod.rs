//! Session policy at the HTTP boundary.

mod interceptor;
mod request;

pub use interceptor::{Interceptor, RejoinDecision, RejoinPrompt, Transport, DEFAULT_LOGIN_PATH};
pub use request::{is_state_changing, InboundResponse, OutboundRequest};
