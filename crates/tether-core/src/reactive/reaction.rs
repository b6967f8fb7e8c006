#![forbid(unsafe_code)]

//! Dependency-tracking reactions.
//!
//! A [`Reaction`] runs a closure with itself installed as the ambient
//! [`Tracker`]. Every observable read during the run is subscribed to once;
//! when the run finishes, that set replaces the previously committed one and
//! the old subscriptions are revoked, so dependencies that are no longer read
//! stop notifying.
//!
//! # Run contexts
//!
//! Each run owns a fresh context with its own subscriptions:
//!
//! ```text
//!   Tracking ──commit──▶ Pending ──first trigger──▶ Triggered
//!      │                    │
//!      └──────teardown──────┴──────────▶ Dead
//! ```
//!
//! Only a `Pending` context calls its `on_trigger`, and only once. A context
//! stays `Tracking` while the commit flushes the writes the run deferred.
//! Triggers from those writes are ignored. Any other trigger during that
//! flush means a dependency changed after it was read, so `on_trigger` fires
//! as soon as the context settles.
//!
//! # Invariants
//!
//! 1. At most one run is in progress per reaction ([`Error::OverlappingRun`]).
//! 2. Each observable is subscribed at most once per run.
//! 3. The scheduler is paused for the duration of a run and resumed after
//!    the new set is committed, so writes made by the run coalesce.
//! 4. The ambient tracker is restored after a run, including on unwind.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::{Rc, Weak};

use ahash::AHashSet;

use super::context::{Tracker, TrackerScope};
use super::isolate::PanicSlot;
use super::observable::{Observable, ObservableId, Subscription};
use super::scheduler;
use crate::error::{Error, Result};
use crate::lifetime::Disposable;

/// Lifecycle of one run's dependency set.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    Tracking,
    Pending,
    Triggered,
    Dead,
}

struct RunContext {
    state: Cell<RunState>,
    on_trigger: RefCell<Option<Rc<dyn Fn()>>>,
    subs: RefCell<Vec<Subscription>>,
    seen: RefCell<AHashSet<ObservableId>>,
    /// Observables the run itself triggered, flushed by the commit.
    own_writes: RefCell<AHashSet<ObservableId>>,
    missed: Cell<bool>,
}

impl RunContext {
    fn new(on_trigger: Rc<dyn Fn()>) -> Self {
        Self {
            state: Cell::new(RunState::Tracking),
            on_trigger: RefCell::new(Some(on_trigger)),
            subs: RefCell::new(Vec::new()),
            seen: RefCell::new(AHashSet::new()),
            own_writes: RefCell::new(AHashSet::new()),
            missed: Cell::new(false),
        }
    }

    fn trigger_from(&self, source: ObservableId) {
        match self.state.get() {
            RunState::Pending => self.trigger(),
            RunState::Tracking => {
                if !self.own_writes.borrow().contains(&source) {
                    self.missed.set(true);
                }
            }
            RunState::Triggered | RunState::Dead => {}
        }
    }

    fn trigger(&self) {
        if self.state.get() != RunState::Pending {
            return;
        }
        self.state.set(RunState::Triggered);
        let on_trigger = self.on_trigger.borrow_mut().take();
        if let Some(on_trigger) = on_trigger {
            on_trigger();
        }
    }

    /// Leave `Tracking`. Returns whether a dependency changed while the
    /// commit was flushing.
    fn settle(&self) -> bool {
        if self.state.get() != RunState::Tracking {
            return false;
        }
        self.state.set(RunState::Pending);
        self.own_writes.borrow_mut().clear();
        self.missed.get()
    }

    fn dependency_count(&self) -> usize {
        self.subs.borrow().len()
    }

    /// Mark dead and revoke every subscription, continuing past panics.
    fn teardown(&self) {
        self.state.set(RunState::Dead);
        let _on_trigger = self.on_trigger.borrow_mut().take();
        let mut slot = PanicSlot::new();
        loop {
            let next = self.subs.borrow_mut().pop();
            let Some(sub) = next else { break };
            slot.run(|| sub.deinit());
        }
        slot.resume("reaction teardown");
    }
}

/// The ambient tracker installed for the duration of a run.
struct RunTracker {
    ctx: Weak<RunContext>,
}

impl Tracker for RunTracker {
    fn track(&self, observable: &Observable) {
        let Some(ctx) = self.ctx.upgrade() else { return };
        if ctx.state.get() != RunState::Tracking {
            return;
        }
        if !ctx.seen.borrow_mut().insert(observable.id()) {
            return;
        }
        let weak = Rc::downgrade(&ctx);
        let source = observable.id();
        let sub = observable.subscribe(move || {
            if let Some(ctx) = weak.upgrade() {
                ctx.trigger_from(source);
            }
        });
        ctx.subs.borrow_mut().push(sub);
    }
}

#[derive(Default)]
struct ReactionInner {
    running: RefCell<Option<Rc<RunContext>>>,
    committed: RefCell<Option<Rc<RunContext>>>,
}

impl Drop for ReactionInner {
    fn drop(&mut self) {
        for ctx in [self.running.get_mut().take(), self.committed.get_mut().take()]
            .into_iter()
            .flatten()
        {
            if panic::catch_unwind(AssertUnwindSafe(|| ctx.teardown())).is_err() {
                tracing::warn!("panic while releasing a dropped reaction");
            }
        }
    }
}

/// A reusable dependency-tracking context.
///
/// Cloning creates another handle to the same reaction.
///
/// # Example
///
/// ```
/// use std::cell::Cell;
/// use std::rc::Rc;
/// use tether_core::{Atom, Reaction};
///
/// let count = Atom::new(1);
/// let seen = Rc::new(Cell::new(0));
///
/// let (c, s) = (count.clone(), Rc::clone(&seen));
/// let reaction = Reaction::spawn_loop(move || s.set(c.get() * 10)).unwrap();
/// assert_eq!(seen.get(), 10);
///
/// count.reset(2);
/// assert_eq!(seen.get(), 20);
/// reaction.deinit();
/// ```
#[derive(Clone, Default)]
pub struct Reaction {
    inner: Rc<ReactionInner>,
}

impl Reaction {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run `f`, subscribing to every observable it reads.
    ///
    /// `on_trigger` fires at most once, the first time any of those
    /// observables emits after the run has completed.
    ///
    /// # Errors
    ///
    /// [`Error::OverlappingRun`] if this reaction is already running.
    ///
    /// # Panics
    ///
    /// A panic from `f` is resumed after the dependency set is committed and
    /// the previous tracker restored.
    pub fn run<R>(&self, f: impl FnOnce() -> R, on_trigger: impl Fn() + 'static) -> Result<R> {
        if self.inner.running.borrow().is_some() {
            return Err(Error::OverlappingRun);
        }

        let ctx = Rc::new(RunContext::new(Rc::new(on_trigger)));
        *self.inner.running.borrow_mut() = Some(Rc::clone(&ctx));
        let mark = scheduler::pending_len();
        scheduler::pause();

        let tracker: Rc<dyn Tracker> = Rc::new(RunTracker {
            ctx: Rc::downgrade(&ctx),
        });
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| {
            let _scope = TrackerScope::install(Some(tracker));
            f()
        }));

        let slot = self.commit(&ctx, mark);
        match outcome {
            Ok(out) => {
                slot.resume("reaction commit");
                Ok(out)
            }
            Err(payload) => {
                if !slot.is_empty() {
                    tracing::warn!("panic during commit discarded in favor of the run's panic");
                }
                panic::resume_unwind(payload)
            }
        }
    }

    /// Promote `ctx` to the committed set, revoke the previous set, and
    /// resume the scheduler. Writes queued from `mark` on belong to the run.
    fn commit(&self, ctx: &Rc<RunContext>, mark: usize) -> PanicSlot {
        let prev = {
            self.inner.running.borrow_mut().take();
            self.inner.committed.borrow_mut().replace(Rc::clone(ctx))
        };

        let mut slot = PanicSlot::new();
        if let Some(prev) = prev {
            slot.run(|| prev.teardown());
        }
        ctx.own_writes
            .borrow_mut()
            .extend(scheduler::pending_ids_from(mark));
        slot.run(scheduler::resume);
        if ctx.settle() {
            slot.run(|| ctx.trigger());
        }
        slot
    }

    /// Run `f` now and again every time one of its dependencies changes.
    ///
    /// # Errors
    ///
    /// [`Error::OverlappingRun`] if this reaction is already running.
    pub fn run_loop(&self, f: impl Fn() + 'static) -> Result<()> {
        step(Rc::downgrade(&self.inner), Rc::new(f))
    }

    /// Create a reaction and start `f` looping on it.
    ///
    /// If the first run fails, the reaction is torn down before the failure
    /// is returned or resumed.
    pub fn spawn_loop(f: impl Fn() + 'static) -> Result<Reaction> {
        let reaction = Reaction::new();
        match panic::catch_unwind(AssertUnwindSafe(|| reaction.run_loop(f))) {
            Ok(Ok(())) => Ok(reaction),
            Ok(Err(err)) => {
                reaction.deinit();
                Err(err)
            }
            Err(payload) => {
                let _ = panic::catch_unwind(AssertUnwindSafe(|| reaction.deinit()));
                panic::resume_unwind(payload)
            }
        }
    }

    /// Tear down the in-flight and committed dependency sets. Idempotent.
    ///
    /// An in-flight run keeps its overlap guard until it returns, but its
    /// context is dead, so it subscribes to nothing further.
    ///
    /// # Panics
    ///
    /// Resumes the first panic raised while revoking (for example by an
    /// upstream `on_deinit` hook) after both sets are released.
    pub fn deinit(&self) {
        let running = self.inner.running.borrow().clone();
        let committed = self.inner.committed.borrow_mut().take();
        let mut slot = PanicSlot::new();
        for ctx in [running, committed].into_iter().flatten() {
            slot.run(|| ctx.teardown());
        }
        slot.resume("reaction deinit");
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.borrow().is_some()
    }

    /// Number of observables the committed run subscribed to.
    #[must_use]
    pub fn dependency_count(&self) -> usize {
        self.inner
            .committed
            .borrow()
            .as_ref()
            .map_or(0, |ctx| ctx.dependency_count())
    }

    /// State of the committed run, if any.
    #[must_use]
    pub fn state(&self) -> Option<RunState> {
        self.inner.committed.borrow().as_ref().map(|ctx| ctx.state.get())
    }
}

fn step(weak: Weak<ReactionInner>, f: Rc<dyn Fn()>) -> Result<()> {
    let Some(inner) = weak.upgrade() else {
        return Ok(());
    };
    let reaction = Reaction { inner };
    let next = Rc::clone(&f);
    reaction.run(
        || f(),
        move || {
            if let Err(err) = step(weak.clone(), Rc::clone(&next)) {
                tracing::error!(error = %err, "reaction loop could not re-run");
                panic::panic_any(err);
            }
        },
    )
}

impl Disposable for Reaction {
    fn deinit(&self) -> Result<()> {
        Reaction::deinit(self);
        Ok(())
    }
}

impl fmt::Debug for Reaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Reaction")
            .field("running", &self.is_running())
            .field("state", &self.state())
            .field("dependencies", &self.dependency_count())
            .finish()
    }
}

// ---- Tests ----
