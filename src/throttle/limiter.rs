//! Client-side request throttle.

use std::future::Future;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::Serialize;
use tracing::{debug, trace};

use super::classify::EndpointClass;
use super::rules::{ClassLimit, ThrottleConfig};
use super::window::SlidingWindow;
use crate::clock::SharedClock;
use crate::error::{GuardError, Result};

/// Outcome of an admission check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThrottleDecision {
    Allowed,
    Limited { retry_after_secs: u64 },
}

impl ThrottleDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, ThrottleDecision::Allowed)
    }

    /// `Limited` as [`GuardError::RateLimited`].
    pub fn into_result(self) -> Result<()> {
        match self {
            ThrottleDecision::Allowed => Ok(()),
            ThrottleDecision::Limited { retry_after_secs } => {
                Err(GuardError::RateLimited { retry_after_secs })
            }
        }
    }
}

/// Quota status for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ThrottleInfo {
    pub class: EndpointClass,
    pub limit: u32,
    pub remaining: u32,
    /// Seconds until the oldest counted request leaves the window
    pub reset_in_secs: u64,
    pub window_secs: u64,
}

/// Sliding-window throttle keyed by [`EndpointClass`].
///
/// `check` and `record` are deliberately separate: callers check before
/// doing work and record only once the request is actually sent, so calls
/// that never go out are not charged. [`RequestThrottle::throttle`] does both.
pub struct RequestThrottle {
    /// Request logs indexed by class, created on first record
    windows: DashMap<EndpointClass, SlidingWindow>,
    /// Effective quotas
    config: RwLock<ThrottleConfig>,
    clock: SharedClock,
}

impl RequestThrottle {
    /// Create a throttle with built-in quotas.
    pub fn new(clock: SharedClock) -> Self {
        Self::with_config(clock, ThrottleConfig::default())
    }

    /// Create a throttle with quota overrides.
    pub fn with_config(clock: SharedClock, config: ThrottleConfig) -> Self {
        Self {
            windows: DashMap::new(),
            config: RwLock::new(config),
            clock,
        }
    }

    /// Replace the quota configuration. Recorded requests are kept and
    /// re-evaluated against the new windows.
    pub fn set_config(&self, config: ThrottleConfig) {
        for mut entry in self.windows.iter_mut() {
            let window = config.limit_for(*entry.key()).window();
            entry.value_mut().set_window(window);
        }
        *self.config.write() = config;
    }

    /// The effective quota for a class.
    pub fn limit_for(&self, class: EndpointClass) -> ClassLimit {
        self.config.read().limit_for(class)
    }

    /// Whether one more request of `class` would be admitted now.
    pub fn check(&self, class: EndpointClass) -> ThrottleDecision {
        let limit = self.limit_for(class);
        let now = self.clock.now_ms();

        let Some(mut window) = self.windows.get_mut(&class) else {
            return ThrottleDecision::Allowed;
        };
        window.prune(now);

        if window.is_empty() {
            drop(window);
            self.windows.remove_if(&class, |_, window| window.is_empty());
            return ThrottleDecision::Allowed;
        }
        decide(class, &window, limit, now)
    }

    /// Charge one request of `class` at the current time.
    pub fn record(&self, class: EndpointClass) {
        let now = self.clock.now_ms();
        let window = self.limit_for(class).window();
        self.windows
            .entry(class)
            .or_insert_with(|| SlidingWindow::new(window))
            .record(now);
    }

    /// Check, then record and run `action`, or fail with
    /// [`GuardError::RateLimited`].
    pub fn throttle<T, F>(&self, class: EndpointClass, action: F) -> Result<T>
    where
        F: FnOnce() -> T,
    {
        self.admit(class)?;
        Ok(action())
    }

    /// Async form of [`RequestThrottle::throttle`].
    pub async fn throttle_async<T, Fut>(&self, class: EndpointClass, action: Fut) -> Result<T>
    where
        Fut: Future<Output = T>,
    {
        self.admit(class)?;
        Ok(action.await)
    }

    /// Check and record in one step. Both happen under the class's entry
    /// lock, so concurrent callers cannot overshoot the quota.
    pub fn admit(&self, class: EndpointClass) -> Result<()> {
        let limit = self.limit_for(class);
        let now = self.clock.now_ms();

        let mut window = self
            .windows
            .entry(class)
            .or_insert_with(|| SlidingWindow::new(limit.window()));
        window.prune(now);
        decide(class, &window, limit, now).into_result()?;
        window.record(now);
        Ok(())
    }

    /// Requests still admissible in the current window.
    pub fn remaining(&self, class: EndpointClass) -> u32 {
        let limit = self.limit_for(class).max_requests;
        limit.saturating_sub(self.count(class) as u32)
    }

    /// Time until the oldest counted request leaves the window; zero when
    /// nothing is counted.
    pub fn reset_in(&self, class: EndpointClass) -> Duration {
        let now = self.clock.now_ms();
        self.windows
            .get_mut(&class)
            .and_then(|mut window| {
                window.prune(now);
                window.next_release_ms()
            })
            .map(|release| Duration::from_millis(release.saturating_sub(now)))
            .unwrap_or(Duration::ZERO)
    }

    /// Quota status for display.
    pub fn info(&self, class: EndpointClass) -> ThrottleInfo {
        let limit = self.limit_for(class);
        ThrottleInfo {
            class,
            limit: limit.max_requests,
            remaining: self.remaining(class),
            reset_in_secs: ceil_secs(self.reset_in(class).as_millis() as u64),
            window_secs: limit.window_secs,
        }
    }

    /// Forget all recorded requests.
    pub fn reset(&self) {
        self.windows.clear();
    }

    /// Number of classes with at least one counted request.
    pub fn tracked_classes(&self) -> usize {
        let now = self.clock.now_ms();
        self.windows.retain(|_, window| {
            window.prune(now);
            !window.is_empty()
        });
        self.windows.len()
    }

    fn count(&self, class: EndpointClass) -> usize {
        let now = self.clock.now_ms();
        self.windows
            .get_mut(&class)
            .map(|mut window| {
                window.prune(now);
                window.count()
            })
            .unwrap_or(0)
    }
}

/// Decision for a pruned window.
fn decide(class: EndpointClass, window: &SlidingWindow, limit: ClassLimit, now: u64) -> ThrottleDecision {
    trace!(
        class = %class,
        count = window.count(),
        limit = limit.max_requests,
        "Checking throttle"
    );

    if window.count() < limit.max_requests as usize {
        return ThrottleDecision::Allowed;
    }

    let retry_after_secs = window
        .next_release_ms()
        .map(|release| ceil_secs(release.saturating_sub(now)))
        .unwrap_or(0)
        .max(1);

    debug!(
        class = %class,
        count = window.count(),
        limit = limit.max_requests,
        retry_after_secs,
        "Throttle limit reached"
    );
    ThrottleDecision::Limited { retry_after_secs }
}

fn ceil_secs(ms: u64) -> u64 {
    ms.div_ceil(1000)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use std::sync::Arc;

    fn throttle() -> (Arc<ManualClock>, RequestThrottle) {
        let clock = Arc::new(ManualClock::new(1_700_000_000_000));
        let throttle = RequestThrottle::new(clock.clone());
        (clock, throttle)
    }

    #[test]
    fn test_first_check_is_allowed() {
        let (_, throttle) = throttle();
        assert_eq!(throttle.check(EndpointClass::General), ThrottleDecision::Allowed);
        assert_eq!(throttle.remaining(EndpointClass::General), 100);
    }

    #[test]
    fn test_check_does_not_charge() {
        let (_, throttle) = throttle();
        for _ in 0..20 {
            assert!(throttle.check(EndpointClass::Login).is_allowed());
        }
        assert_eq!(throttle.remaining(EndpointClass::Login), 5);
    }

    #[test]
    fn test_login_quota_with_retry_after() {
        let (clock, throttle) = throttle();

        for _ in 0..5 {
            assert!(throttle.check(EndpointClass::Login).is_allowed());
            throttle.record(EndpointClass::Login);
            clock.advance(Duration::from_secs(10));
        }

        // First request was 50s ago; it leaves the 900s window in 850s
        assert_eq!(
            throttle.check(EndpointClass::Login),
            ThrottleDecision::Limited {
                retry_after_secs: 850
            }
        );
    }

    #[test]
    fn test_window_slides() {
        let (clock, throttle) = throttle();
        for _ in 0..10 {
            throttle.admit(EndpointClass::Upload).unwrap();
        }
        assert!(!throttle.check(EndpointClass::Upload).is_allowed());

        clock.advance(Duration::from_secs(60));
        assert!(throttle.check(EndpointClass::Upload).is_allowed());
        assert_eq!(throttle.remaining(EndpointClass::Upload), 10);
    }

    #[test]
    fn test_retry_after_rounds_up_to_at_least_one() {
        let (clock, throttle) = throttle();
        for _ in 0..3 {
            throttle.admit(EndpointClass::Registration).unwrap();
        }
        clock.advance(Duration::from_millis(3_600_000 - 1));

        assert_eq!(
            throttle.check(EndpointClass::Registration),
            ThrottleDecision::Limited {
                retry_after_secs: 1
            }
        );
    }

    #[test]
    fn test_classes_are_independent() {
        let (_, throttle) = throttle();
        for _ in 0..5 {
            throttle.admit(EndpointClass::Login).unwrap();
        }
        assert!(!throttle.check(EndpointClass::Login).is_allowed());
        assert!(throttle.check(EndpointClass::Search).is_allowed());
    }

    #[test]
    fn test_throttle_wrapper() {
        let (_, throttle) = throttle();
        let config = ThrottleConfig::new().with_limit(EndpointClass::Search, ClassLimit::new(2, 60));
        throttle.set_config(config);

        assert_eq!(throttle.throttle(EndpointClass::Search, || 1).unwrap(), 1);
        assert_eq!(throttle.throttle(EndpointClass::Search, || 2).unwrap(), 2);

        let mut ran = false;
        let err = throttle
            .throttle(EndpointClass::Search, || ran = true)
            .unwrap_err();
        assert!(!ran);
        assert!(matches!(
            err,
            GuardError::RateLimited {
                retry_after_secs: 60
            }
        ));
    }

    #[test]
    fn test_throttle_async_wrapper() {
        let (_, throttle) = throttle();
        throttle.set_config(
            ThrottleConfig::new().with_limit(EndpointClass::Download, ClassLimit::new(1, 60)),
        );

        let value = tokio_test::block_on(throttle.throttle_async(EndpointClass::Download, async { "ok" }));
        assert_eq!(tokio_test::assert_ok!(value), "ok");

        let err = tokio_test::block_on(
            throttle.throttle_async(EndpointClass::Download, async { "never" }),
        );
        assert!(matches!(
            tokio_test::assert_err!(err),
            GuardError::RateLimited { retry_after_secs: 60 }
        ));
    }

    #[test]
    fn test_info_and_reset() {
        let (clock, throttle) = throttle();
        throttle.admit(EndpointClass::Search).unwrap();
        clock.advance(Duration::from_secs(15));

        let info = throttle.info(EndpointClass::Search);
        assert_eq!(info.limit, 30);
        assert_eq!(info.remaining, 29);
        assert_eq!(info.reset_in_secs, 45);
        assert_eq!(info.window_secs, 60);

        throttle.reset();
        assert_eq!(throttle.remaining(EndpointClass::Search), 30);
        assert_eq!(throttle.reset_in(EndpointClass::Search), Duration::ZERO);
    }

    #[test]
    fn test_stale_classes_are_pruned() {
        let (clock, throttle) = throttle();
        throttle.admit(EndpointClass::Upload).unwrap();
        throttle.admit(EndpointClass::Login).unwrap();
        assert_eq!(throttle.tracked_classes(), 2);

        clock.advance(Duration::from_secs(61));
        assert_eq!(throttle.tracked_classes(), 1);
    }

    #[test]
    fn test_check_drops_emptied_window() {
        let (clock, throttle) = throttle();
        throttle.record(EndpointClass::Upload);
        assert_eq!(throttle.windows.len(), 1);

        clock.advance(Duration::from_secs(61));
        assert!(throttle.check(EndpointClass::Upload).is_allowed());
        assert_eq!(throttle.windows.len(), 0);
    }

    #[test]
    fn test_concurrent_admit_never_exceeds_quota() {
        let (_, throttle) = throttle();
        let throttle = Arc::new(throttle);
        let quota = throttle.limit_for(EndpointClass::Login).max_requests as usize;

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let throttle = throttle.clone();
                std::thread::spawn(move || {
                    (0..4)
                        .filter(|_| throttle.admit(EndpointClass::Login).is_ok())
                        .count()
                })
            })
            .collect();
        let admitted: usize = workers.into_iter().map(|w| w.join().unwrap()).sum();

        assert_eq!(admitted, quota);
        assert_eq!(throttle.remaining(EndpointClass::Login), 0);
    }

    #[test]
    fn test_n_checks_property() {
        // For quota Q in window W, calls 1..=Q pass and Q+1..=N fail.
        let (clock, throttle) = throttle();
        let quota = throttle.limit_for(EndpointClass::Search).max_requests as usize;
        for i in 1..=quota + 10 {
            let decision = throttle.check(EndpointClass::Search);
            if i <= quota {
                assert!(decision.is_allowed(), "call {} should pass", i);
                throttle.record(EndpointClass::Search);
            } else {
                match decision {
                    ThrottleDecision::Limited { retry_after_secs } => assert!(retry_after_secs > 0),
                    ThrottleDecision::Allowed => panic!("call {} should be limited", i),
                }
            }
            clock.advance(Duration::from_millis(100));
        }
    }
}
