#![forbid(unsafe_code)]

//! Cached derived values recomputed by a reaction loop.
//!
//! # Design
//!
//! [`Computation<T>`] wraps a definition function and its cached result in
//! shared, reference-counted storage, together with its own [`Observable`]
//! and [`Reaction`]. The reaction only runs while somebody is subscribed:
//!
//! - **Idle** (no subscribers): reads recompute eagerly and cache the result.
//! - **Active**: the first subscription starts a reaction loop that reruns the
//!   definition whenever a dependency changes and notifies subscribers only if
//!   the result differs from the cached one. The last unsubscription stops the
//!   loop and releases the upstream subscriptions.
//!
//! A computation built with [`Computation::lazy`] defers even while active: a
//! dependency change only marks the cache stale and notifies subscribers
//! once. The definition reruns on the next read.
//!
//! # Invariants
//!
//! 1. While active and not stale, `get()` returns the cached value in O(1)
//!    without calling the definition.
//! 2. Eager computations notify subscribers only when the new result is
//!    unequal to the cached one. Lazy ones notify once per stale period.
//! 3. Version increments by exactly 1 per effective change of the cached
//!    value.
//! 4. An idle computation holds no upstream subscriptions.
//!
//! # Failure Modes
//!
//! - **Definition panics**: the cached value remains from the last successful
//!   computation. The dependency set read before the panic is kept, so the
//!   next change to one of those dependencies retries.
//! - **Loop cannot start**: activation panics with the [`Error`](crate::Error)
//!   and the computation stays idle.
//! - **Handle dropped while active**: the reaction is released with the
//!   computation and its upstream subscriptions become inert.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic;
use std::rc::{Rc, Weak};

use super::context::track;
use super::observable::{LifecycleHooks, Observable, Subscription};
use super::reaction::Reaction;
use super::traits::{Dereferenceable, Subscribable};
use crate::equality::{SameValue, same_value};
use crate::error::Result;
use crate::lifetime::Disposable;

/// Shared interior for [`Computation<T>`].
struct ComputationInner<T> {
    /// Self handle, used to build the loop closure on activation.
    this: Weak<ComputationInner<T>>,
    observable: Observable,
    def: Box<dyn Fn(&Reaction) -> T>,
    equal: Box<dyn Fn(&T, &T) -> bool>,
    /// None only before the first computation.
    cached: RefCell<Option<T>>,
    reaction: Reaction,
    version: Cell<u64>,
    lazy: bool,
    /// Lazy mode only: a dependency changed since the last run.
    stale: Cell<bool>,
}

impl<T: 'static> ComputationInner<T> {
    /// Store `next` if it differs from the cached value. Returns whether it
    /// did.
    fn store(&self, next: T) -> bool {
        let changed = self
            .cached
            .borrow()
            .as_ref()
            .is_none_or(|prev| !(self.equal)(prev, &next));
        if changed {
            *self.cached.borrow_mut() = Some(next);
            self.version.set(self.version.get() + 1);
        }
        changed
    }

    /// One loop step: recompute and notify on change.
    fn update(&self) {
        let next = (self.def)(&self.reaction);
        if self.store(next) {
            self.observable.trigger();
        }
    }

    /// Lazy mode: one tracked run whose trigger only marks the cache stale.
    fn rerun(&self) {
        self.stale.set(false);
        let this = self.this.clone();
        let next = self.reaction.run(
            || (self.def)(&self.reaction),
            move || {
                if let Some(inner) = this.upgrade() {
                    inner.mark_stale();
                }
            },
        );
        match next {
            Ok(next) => {
                self.store(next);
            }
            Err(err) => {
                tracing::error!(error = %err, "lazy computation could not rerun");
                panic::panic_any(err);
            }
        }
    }

    fn mark_stale(&self) {
        if !self.stale.replace(true) {
            self.observable.trigger();
        }
    }

    /// Make the cache current for an untracked read.
    fn refresh(&self) {
        if self.observable.is_active() {
            let uncached = self.cached.borrow().is_none();
            if self.lazy && (self.stale.get() || uncached) {
                self.rerun();
            } else if uncached {
                let next = (self.def)(&self.reaction);
                self.store(next);
            }
            return;
        }
        let next = (self.def)(&self.reaction);
        self.store(next);
    }
}

impl<T: 'static> LifecycleHooks for ComputationInner<T> {
    fn on_init(&self) {
        if self.lazy {
            self.rerun();
            return;
        }
        let this = self.this.clone();
        let started = self.reaction.run_loop(move || {
            if let Some(inner) = this.upgrade() {
                inner.update();
            }
        });
        if let Err(err) = started {
            tracing::error!(error = %err, "computation could not start its loop");
            panic::panic_any(err);
        }
    }

    fn on_deinit(&self) {
        self.stale.set(false);
        self.reaction.deinit();
    }
}

/// A cached value derived from whatever observables its definition reads.
///
/// Cloning a `Computation` creates a new handle to the **same** inner state.
///
/// # Example
///
/// ```
/// use tether_core::{Atom, computation};
///
/// let width = Atom::new(3);
/// let height = Atom::new(4);
/// let (w, h) = (width.clone(), height.clone());
/// let area = computation(move || w.get() * h.get());
///
/// assert_eq!(area.get(), 12);
/// width.reset(5);
/// assert_eq!(area.get(), 20);
/// ```
pub struct Computation<T> {
    inner: Rc<ComputationInner<T>>,
}

impl<T> Clone for Computation<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for Computation<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Computation")
            .field("cached", &*self.inner.cached.borrow())
            .field("version", &self.inner.version.get())
            .field("lazy", &self.inner.lazy)
            .field("observable", &self.inner.observable)
            .finish()
    }
}

/// Build a [`Computation`] from a plain closure, using [`SameValue`] as the
/// change test.
pub fn computation<T: SameValue + 'static>(f: impl Fn() -> T + 'static) -> Computation<T> {
    Computation::new(move |_| f(), same_value::<T>)
}

/// Build a lazy [`Computation`] from a plain closure.
pub fn lazy_computation<T: SameValue + 'static>(f: impl Fn() -> T + 'static) -> Computation<T> {
    Computation::lazy(move |_| f(), same_value::<T>)
}

impl<T: 'static> Computation<T> {
    /// Create a computation from a definition and a change test.
    ///
    /// `def` receives the computation's own reaction. `equal(old, new)`
    /// returning true suppresses the notification.
    pub fn new(
        def: impl Fn(&Reaction) -> T + 'static,
        equal: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        Self::build(Box::new(def), Box::new(equal), false)
    }

    /// Create a computation that recomputes on read instead of on change.
    ///
    /// While active, a dependency change marks the cache stale and notifies
    /// subscribers once; the definition reruns the next time the value is
    /// read.
    pub fn lazy(
        def: impl Fn(&Reaction) -> T + 'static,
        equal: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        Self::build(Box::new(def), Box::new(equal), true)
    }

    fn build(
        def: Box<dyn Fn(&Reaction) -> T>,
        equal: Box<dyn Fn(&T, &T) -> bool>,
        lazy: bool,
    ) -> Self {
        let inner = Rc::new_cyclic(|this: &Weak<ComputationInner<T>>| {
            let hooks: Weak<dyn LifecycleHooks> = this.clone();
            ComputationInner {
                this: this.clone(),
                observable: Observable::with_hooks(hooks),
                def,
                equal,
                cached: RefCell::new(None),
                reaction: Reaction::new(),
                version: Cell::new(0),
                lazy,
                stale: Cell::new(false),
            }
        });
        Self { inner }
    }

    /// Tracked read of a clone of the current value.
    #[must_use]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Tracked read through a borrow.
    ///
    /// # Panics
    ///
    /// Panics if `f` causes this computation to recompute (re-entrant
    /// borrow).
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        track(&self.inner.observable);
        self.peek_with(f)
    }

    /// Untracked read; recomputes first if idle.
    pub fn peek_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.refresh();
        let cached = self.inner.cached.borrow();
        f(cached.as_ref().expect("cached is always Some after refresh"))
    }

    /// Number of effective changes so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    /// Whether the reaction loop is currently running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.observable.is_active()
    }

    #[must_use]
    pub fn is_lazy(&self) -> bool {
        self.inner.lazy
    }

    /// Whether a lazy computation will rerun on its next read.
    #[must_use]
    pub fn is_stale(&self) -> bool {
        self.inner.stale.get()
    }

    #[must_use]
    pub fn observable(&self) -> &Observable {
        &self.inner.observable
    }

    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Subscription {
        self.inner.observable.subscribe(callback)
    }

    /// Revoke every subscriber and stop the loop.
    pub fn deinit(&self) {
        self.inner.observable.deinit();
        self.inner.reaction.deinit();
    }
}

impl<T: 'static> Subscribable for Computation<T> {
    fn observable(&self) -> &Observable {
        &self.inner.observable
    }
}

impl<T: 'static> Dereferenceable for Computation<T> {
    type Target = T;

    fn deref_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.peek_with(f)
    }
}

impl<T: 'static> Disposable for Computation<T> {
    fn deinit(&self) -> Result<()> {
        Computation::deinit(self);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
