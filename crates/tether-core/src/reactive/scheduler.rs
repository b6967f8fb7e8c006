#![forbid(unsafe_code)]

//! Pause/resume batching of observable triggers.
//!
//! While the scheduler is paused (depth > 0), [`Observable::trigger`] does not
//! notify anyone: the observable is added to a pending set instead. When the
//! outermost [`resume`] brings the depth back to zero, every pending
//! observable is removed from the set and emitted once, in the order it was
//! first triggered.
//!
//! # Invariants
//!
//! 1. An observable appears in the pending set at most once, so N triggers
//!    during one pause produce exactly one sweep on resume.
//! 2. An observable triggered again by the flush itself (after its own
//!    emission) is re-added and emitted in a later round.
//! 3. `resume` at depth zero is a no-op.
//!
//! # Failure Modes
//!
//! - **Subscriber panics during flush**: the remaining pending observables
//!   are still emitted; the first panic is resumed after the flush.
//! - **Flush never settles**: rounds are bounded by
//!   [`EngineConfig::max_flush_rounds`](crate::EngineConfig::max_flush_rounds);
//!   leftovers are dropped with an `error!` event.

use std::cell::RefCell;
use std::panic;

use ahash::AHashSet;

use super::isolate::PanicSlot;
use super::observable::{Observable, ObservableId};
use crate::config::config;

#[derive(Default)]
struct SchedulerState {
    depth: usize,
    pending: Vec<Observable>,
    members: AHashSet<ObservableId>,
}

thread_local! {
    static SCHEDULER: RefCell<SchedulerState> = RefCell::new(SchedulerState::default());
}

/// Enter a paused section. Pauses nest.
pub fn pause() {
    SCHEDULER.with(|s| s.borrow_mut().depth += 1);
}

/// Leave a paused section, flushing pending triggers at depth zero.
///
/// # Panics
///
/// Resumes the first subscriber panic raised during the flush.
pub fn resume() {
    let should_flush = SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        if s.depth == 0 {
            return false;
        }
        s.depth -= 1;
        s.depth == 0 && !s.pending.is_empty()
    });
    if should_flush {
        flush();
    }
}

#[must_use]
pub fn is_paused() -> bool {
    pause_depth() > 0
}

#[must_use]
pub fn pause_depth() -> usize {
    SCHEDULER.with(|s| s.borrow().depth)
}

/// Run `f` paused, then resume. Pending triggers are flushed even if `f`
/// panics.
pub fn batch<R>(f: impl FnOnce() -> R) -> R {
    let guard = PauseGuard::new();
    let out = f();
    guard.finish();
    out
}

/// RAII pause: pauses on creation and resumes on drop.
///
/// Dropping the guard during a panic still flushes, but a panic raised by
/// that flush is logged and discarded instead of aborting the process.
#[must_use = "the scheduler resumes as soon as the guard is dropped"]
pub struct PauseGuard {
    armed: bool,
}

impl PauseGuard {
    pub fn new() -> Self {
        pause();
        Self { armed: true }
    }

    /// Resume now, flushing pending triggers.
    pub fn finish(mut self) {
        self.armed = false;
        resume();
    }
}

impl Default for PauseGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for PauseGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if std::thread::panicking() {
            unwind_resume();
        } else {
            resume();
        }
    }
}

/// Resume while a panic is already unwinding.
fn unwind_resume() {
    if panic::catch_unwind(resume).is_err() {
        tracing::warn!("panic during flush discarded while unwinding");
    }
}

/// Queue `observable` if the scheduler is paused. Returns whether it was
/// deferred.
pub(crate) fn defer(observable: &Observable) -> bool {
    SCHEDULER.with(|s| {
        let mut s = s.borrow_mut();
        if s.depth == 0 {
            return false;
        }
        if s.members.insert(observable.id()) {
            s.pending.push(observable.clone());
        }
        true
    })
}

/// Number of observables queued for the next flush.
pub(crate) fn pending_len() -> usize {
    SCHEDULER.with(|s| s.borrow().pending.len())
}

/// Ids of the observables queued at or after position `mark`.
pub(crate) fn pending_ids_from(mark: usize) -> Vec<ObservableId> {
    SCHEDULER.with(|s| {
        let s = s.borrow();
        s.pending
            .get(mark..)
            .map(|queued| queued.iter().map(Observable::id).collect())
            .unwrap_or_default()
    })
}

fn flush() {
    let limit = config().max_flush_rounds;
    let mut slot = PanicSlot::new();
    let mut rounds = 0usize;

    loop {
        let batch = SCHEDULER.with(|s| {
            let mut s = s.borrow_mut();
            if s.depth > 0 {
                Vec::new()
            } else {
                std::mem::take(&mut s.pending)
            }
        });
        if batch.is_empty() {
            break;
        }

        rounds += 1;
        if rounds > limit {
            SCHEDULER.with(|s| {
                let mut s = s.borrow_mut();
                s.pending.clear();
                s.members.clear();
            });
            tracing::error!(rounds, limit, "scheduler flush did not settle");
            break;
        }

        tracing::debug!(pending = batch.len(), round = rounds, "flushing paused triggers");
        for observable in batch {
            let still_pending = SCHEDULER.with(|s| s.borrow_mut().members.remove(&observable.id()));
            if still_pending {
                slot.run(|| observable.emit());
            }
        }
    }

    slot.resume("scheduler flush");
}
