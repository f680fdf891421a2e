//! Fence completion tracking.
//!
//! The completed fence only ever moves forward, and only across the
//! contiguous run of completed in-flight fences: completing fence 3 while 2
//! is still running is remembered but not yet observable. Completions that
//! arrive before their submission is registered are kept and applied when it
//! shows up.
//!
//! The tracker is shared (`Arc<FenceTracker>`) so a backend thread can report
//! completions while the device blocks for frame pacing.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Condvar, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{trace, warn};

use crate::error::SyncError;

#[derive(Debug, Clone, Copy)]
struct InFlight {
    completed: bool,
    present: bool,
}

#[derive(Debug, Default)]
struct FenceState {
    completed_fence: u64,
    in_flight: BTreeMap<u64, InFlight>,
    completed_before_submit: HashSet<u64>,
    forced: HashSet<u64>,
}

impl FenceState {
    fn advance(&mut self) -> bool {
        let mut advanced = false;
        while let Some(entry) = self.in_flight.first_entry() {
            let fence = *entry.key();
            // Stale entry from a reused fence value.
            if fence <= self.completed_fence {
                entry.remove();
                continue;
            }
            if !entry.get().completed {
                break;
            }
            entry.remove();
            self.completed_fence = fence;
            advanced = true;
        }
        if advanced {
            let completed = self.completed_fence;
            self.completed_before_submit.retain(|&f| f > completed);
        }
        advanced
    }

    fn pending(&self) -> impl Iterator<Item = (&u64, &InFlight)> {
        self.in_flight.iter().filter(|(_, e)| !e.completed)
    }
}

#[derive(Debug, Default)]
pub struct FenceTracker {
    state: Mutex<FenceState>,
    changed: Condvar,
}

impl FenceTracker {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FenceState> {
        // A panic while holding the lock cannot leave the state torn; keep going.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn completed_fence(&self) -> u64 {
        self.lock().completed_fence
    }

    pub fn is_completed(&self, fence: u64) -> bool {
        fence <= self.completed_fence()
    }

    /// Submissions registered but not yet completed.
    pub fn in_flight_count(&self) -> usize {
        self.lock().pending().count()
    }

    /// Present submissions registered but not yet completed.
    pub fn in_flight_presents(&self) -> usize {
        self.lock().pending().filter(|(_, e)| e.present).count()
    }

    /// Track a newly accepted submission.
    pub fn register(&self, fence: u64, present: bool) {
        let mut state = self.lock();
        if fence <= state.completed_fence {
            trace!(fence, "fence already complete at submit");
            return;
        }
        let completed = state.completed_before_submit.remove(&fence);
        state.in_flight.insert(fence, InFlight { completed, present });
        if completed && state.advance() {
            self.changed.notify_all();
        }
    }

    /// Record that `fence` finished. Returns whether the completed fence
    /// advanced.
    pub fn complete(&self, fence: u64) -> bool {
        let mut state = self.lock();
        if fence <= state.completed_fence {
            return false;
        }
        match state.in_flight.get_mut(&fence) {
            Some(entry) => entry.completed = true,
            None => {
                state.completed_before_submit.insert(fence);
                return false;
            }
        }
        let advanced = state.advance();
        if advanced {
            trace!(fence = state.completed_fence, "completed fence advanced");
            self.changed.notify_all();
        }
        advanced
    }

    /// Signal every in-flight fence, e.g. after the backend died. Returns the
    /// fences that were forced, ascending.
    pub fn force_complete_all(&self) -> Vec<u64> {
        let mut state = self.lock();
        let forced: Vec<u64> = state.pending().map(|(&f, _)| f).collect();
        if let Some(&last) = state.in_flight.keys().next_back() {
            state.completed_fence = state.completed_fence.max(last);
        }
        state.in_flight.clear();
        state.completed_before_submit.clear();
        state.forced.extend(forced.iter().copied());
        if !forced.is_empty() {
            warn!(count = forced.len(), completed_fence = state.completed_fence, "force-completed in-flight fences");
        }
        self.changed.notify_all();
        forced
    }

    /// Forget all tracking, keeping the completed fence value.
    pub fn reset(&self) {
        let mut state = self.lock();
        state.in_flight.clear();
        state.completed_before_submit.clear();
        state.forced.clear();
        self.changed.notify_all();
    }

    /// Block until `fence` completes or `timeout` passes. Returns whether it
    /// completed; a fence that was only force-completed reports
    /// [`SyncError::ForcedCompletion`].
    pub fn wait(&self, fence: u64, timeout: Duration) -> Result<bool, SyncError> {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        while state.completed_fence < fence {
            let now = Instant::now();
            if now >= deadline {
                return Ok(false);
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
        if state.forced.contains(&fence) {
            return Err(SyncError::ForcedCompletion { fence });
        }
        Ok(true)
    }

    /// Block until fewer than `limit` presents are in flight or `timeout`
    /// passes. Returns whether the condition holds.
    pub fn wait_presents_below(&self, limit: usize, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut state = self.lock();
        loop {
            if state.pending().filter(|(_, e)| e.present).count() < limit {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            state = self
                .changed
                .wait_timeout(state, deadline - now)
                .map(|(guard, _)| guard)
                .unwrap_or_else(|poisoned| poisoned.into_inner().0);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn out_of_order_completion_waits_for_prefix() {
        let tracker = FenceTracker::new();
        for fence in 1..=3 {
            tracker.register(fence, false);
        }
        assert_eq!(tracker.in_flight_count(), 3);

        assert!(!tracker.complete(2));
        assert_eq!(tracker.completed_fence(), 0);

        assert!(tracker.complete(1));
        assert_eq!(tracker.completed_fence(), 2);

        assert!(tracker.complete(3));
        assert_eq!(tracker.completed_fence(), 3);

        // Duplicate completion is ignored.
        assert!(!tracker.complete(3));
        assert_eq!(tracker.in_flight_count(), 0);
    }

    #[test]
    fn completion_before_submit_is_remembered() {
        let tracker = FenceTracker::new();
        tracker.complete(5);
        assert_eq!(tracker.completed_fence(), 0);

        tracker.register(5, true);
        assert_eq!(tracker.completed_fence(), 5);
        assert_eq!(tracker.in_flight_presents(), 0);
    }

    #[test]
    fn force_complete_reports_forced_fences() {
        let tracker = FenceTracker::new();
        tracker.register(1, true);
        tracker.register(2, false);
        tracker.complete(1);

        assert_eq!(tracker.force_complete_all(), vec![2]);
        assert_eq!(tracker.completed_fence(), 2);
        assert_eq!(tracker.wait(1, Duration::ZERO), Ok(true));
        assert_eq!(
            tracker.wait(2, Duration::ZERO),
            Err(SyncError::ForcedCompletion { fence: 2 })
        );
    }

    #[test]
    fn wait_times_out_without_completion() {
        let tracker = FenceTracker::new();
        tracker.register(1, true);
        assert_eq!(tracker.wait(1, Duration::from_millis(1)), Ok(false));
        assert!(!tracker.wait_presents_below(1, Duration::from_millis(1)));
        assert!(tracker.wait_presents_below(2, Duration::ZERO));
    }
}
