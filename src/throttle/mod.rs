//! Per-endpoint-class request throttling.

mod classify;
mod limiter;
mod rules;
mod window;

pub use classify::{classify, EndpointClass};
pub use limiter::{RequestThrottle, ThrottleDecision, ThrottleInfo};
pub use rules::{ClassLimit, ThrottleConfig};
pub use window::SlidingWindow;
