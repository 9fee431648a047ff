//! Re-entrancy guards for critical sections.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A flag marking that an action (logout, rejoin prompt) is in progress.
///
/// A second caller arriving while the action runs gets `None` from
/// [`InFlight::try_begin`] and must not start it again.
#[derive(Debug, Clone, Default)]
pub struct InFlight {
    busy: Arc<AtomicBool>,
}

impl InFlight {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the section. The claim is released when the guard drops.
    pub fn try_begin(&self) -> Option<InFlightGuard> {
        self.busy
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| InFlightGuard {
                busy: Arc::clone(&self.busy),
            })
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::Acquire)
    }
}

/// Releases an [`InFlight`] claim on drop.
#[derive(Debug)]
pub struct InFlightGuard {
    busy: Arc<AtomicBool>,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::Release);
    }
}
