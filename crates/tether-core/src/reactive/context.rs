#![forbid(unsafe_code)]

//! The ambient tracking context.
//!
//! Reads of reactive cells call [`track`] with their observable. If a
//! [`Tracker`] is installed on the current thread (normally by a running
//! [`Reaction`](crate::Reaction)), it is told about the read; otherwise the
//! read is untracked. Installation is scoped: the previous tracker is
//! restored when the scope ends, including on unwind.

use std::cell::RefCell;
use std::rc::Rc;

use super::observable::Observable;

/// Receives the observables read while it is installed.
pub trait Tracker {
    fn track(&self, observable: &Observable);
}

impl<F: Fn(&Observable)> Tracker for F {
    fn track(&self, observable: &Observable) {
        self(observable);
    }
}

thread_local! {
    static TRACKER: RefCell<Option<Rc<dyn Tracker>>> = const { RefCell::new(None) };
}

/// Report a read of `observable` to the ambient tracker, if any.
pub fn track(observable: &Observable) {
    let tracker = TRACKER.with(|t| t.borrow().clone());
    if let Some(tracker) = tracker {
        tracker.track(observable);
    }
}

/// Whether reads are currently being tracked.
#[must_use]
pub fn is_tracking() -> bool {
    TRACKER.with(|t| t.borrow().is_some())
}

/// Run `f` with `tracker` installed as the ambient tracker.
pub fn with_tracker<R>(tracker: Option<Rc<dyn Tracker>>, f: impl FnOnce() -> R) -> R {
    let _restore = TrackerScope::install(tracker);
    f()
}

/// Run `f` with tracking suspended.
pub fn untracked<R>(f: impl FnOnce() -> R) -> R {
    with_tracker(None, f)
}

/// Restores the previous tracker on drop.
pub(crate) struct TrackerScope {
    prev: Option<Rc<dyn Tracker>>,
}

impl TrackerScope {
    pub(crate) fn install(tracker: Option<Rc<dyn Tracker>>) -> Self {
        let prev = TRACKER.with(|t| t.replace(tracker));
        Self { prev }
    }
}

impl Drop for TrackerScope {
    fn drop(&mut self) {
        let prev = self.prev.take();
        TRACKER.with(|t| *t.borrow_mut() = prev);
    }
}
