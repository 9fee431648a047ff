//! Cancellable deadline bookkeeping.
//!
//! Each [`TimerKind`] has at most one live timer. Scheduling a kind again
//! replaces the previous timer and bumps a generation counter, so a handle
//! obtained before the reschedule is recognisably stale and must be ignored
//! if it ever fires.

/// The three timers driving a session.
///
/// When deadlines coincide, the absolute session timer fires first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum TimerKind {
    Session,
    Warning,
    Idle,
}

impl TimerKind {
    fn slot(&self) -> usize {
        match self {
            TimerKind::Idle => 0,
            TimerKind::Session => 1,
            TimerKind::Warning => 2,
        }
    }
}

/// A scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TimerHandle {
    pub kind: TimerKind,
    pub generation: u64,
    /// Fire time in epoch ms
    pub deadline: u64,
}

#[derive(Debug, Default)]
pub struct TimerSet {
    slots: [Option<TimerHandle>; 3],
    generation: u64,
}

impl TimerSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `kind` at `deadline`, invalidating any previous timer of
    /// that kind.
    pub fn schedule(&mut self, kind: TimerKind, deadline: u64) -> TimerHandle {
        self.generation += 1;
        let handle = TimerHandle {
            kind,
            generation: self.generation,
            deadline,
        };
        self.slots[kind.slot()] = Some(handle);
        handle
    }

    pub fn cancel(&mut self, kind: TimerKind) {
        self.slots[kind.slot()] = None;
    }

    pub fn cancel_all(&mut self) {
        self.slots = [None; 3];
    }

    /// Whether `handle` is still the live timer for its kind.
    pub fn is_current(&self, handle: &TimerHandle) -> bool {
        self.slots[handle.kind.slot()].as_ref() == Some(handle)
    }

    pub fn get(&self, kind: TimerKind) -> Option<TimerHandle> {
        self.slots[kind.slot()]
    }

    /// Live timer with the earliest deadline.
    pub fn next(&self) -> Option<TimerHandle> {
        self.slots.iter().flatten().min_by_key(|h| (h.deadline, h.kind)).copied()
    }

    /// Earliest live timer whose deadline is at or before `now_ms`.
    pub fn next_due(&self, now_ms: u64) -> Option<TimerHandle> {
        self.next().filter(|h| h.deadline <= now_ms)
    }
}
