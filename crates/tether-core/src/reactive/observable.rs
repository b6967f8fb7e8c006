#![forbid(unsafe_code)]

//! Observables and the subscriptions that link them to callbacks.
//!
//! # Design
//!
//! [`Observable`] is a cheap, cloneable handle to shared `Rc` storage that
//! owns an ordered list of [`Subscription`]s. It carries no value of its own:
//! cells such as [`Atom`](crate::Atom) pair an observable with a value slot
//! and call [`trigger`](Observable::trigger) when the slot changes.
//!
//! Derived values need to know when they are being observed, so an observable
//! may carry [`LifecycleHooks`]. `on_init` fires on the IDLE→ACTIVE
//! transition (first subscriber), `on_deinit` on ACTIVE→IDLE (last
//! subscriber leaves). These are the only points where the hooks fire.
//!
//! # Invariants
//!
//! 1. The state is ACTIVE iff the subscription list is non-empty.
//! 2. Subscribers are notified in registration order.
//! 3. Each sweep notifies a snapshot of the list; subscribing or revoking
//!    during a sweep affects the next sweep, not the current one.
//! 4. Re-entrant triggers never nest: they are queued and drained by the
//!    sweep loop already running.
//! 5. A subscription is revoked at most once; later revocations are no-ops.
//!
//! # Failure Modes
//!
//! - **Subscriber panics**: the remaining subscribers of the sweep are still
//!   notified, queued sweeps are dropped, and the first panic is resumed.
//! - **Runaway cascade**: a subscriber that keeps re-triggering its own
//!   observable is stopped after [`EngineConfig::max_drain_sweeps`] sweeps
//!   with a panic carrying [`Error::RunawayCascade`].
//!
//! [`EngineConfig::max_drain_sweeps`]: crate::EngineConfig::max_drain_sweeps

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic;
use std::rc::{Rc, Weak};
use std::sync::atomic::{AtomicU64, Ordering};

use super::isolate::PanicSlot;
use super::scheduler;
use crate::config::config;
use crate::error::{Error, Result};
use crate::lifetime::Disposable;

static NEXT_OBSERVABLE_ID: AtomicU64 = AtomicU64::new(1);

/// Process-unique identity of an [`Observable`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObservableId(u64);

impl ObservableId {
    fn next() -> Self {
        Self(NEXT_OBSERVABLE_ID.fetch_add(1, Ordering::Relaxed))
    }

    #[must_use]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Whether an observable currently has subscribers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Idle,
    Active,
}

/// Hooks fired on the first-subscriber / last-subscriber transitions.
pub trait LifecycleHooks {
    fn on_init(&self) {}
    fn on_deinit(&self) {}
}

pub(crate) struct ObservableInner {
    id: ObservableId,
    state: Cell<LifecycleState>,
    subs: RefCell<Vec<Subscription>>,
    queued: Cell<usize>,
    draining: Cell<bool>,
    hooks: Option<Weak<dyn LifecycleHooks>>,
}

/// A subscribable notification source.
///
/// Cloning an `Observable` creates a new handle to the **same** source.
#[derive(Clone)]
pub struct Observable {
    inner: Rc<ObservableInner>,
}

impl Observable {
    #[must_use]
    pub fn new() -> Self {
        Self::build(None)
    }

    /// An observable that reports lifecycle transitions to `hooks`.
    ///
    /// The hooks are held weakly so an owner can embed its own observable.
    #[must_use]
    pub fn with_hooks(hooks: Weak<dyn LifecycleHooks>) -> Self {
        Self::build(Some(hooks))
    }

    fn build(hooks: Option<Weak<dyn LifecycleHooks>>) -> Self {
        Self {
            inner: Rc::new(ObservableInner {
                id: ObservableId::next(),
                state: Cell::new(LifecycleState::Idle),
                subs: RefCell::new(Vec::new()),
                queued: Cell::new(0),
                draining: Cell::new(false),
                hooks,
            }),
        }
    }

    #[must_use]
    pub fn id(&self) -> ObservableId {
        self.inner.id
    }

    #[must_use]
    pub fn state(&self) -> LifecycleState {
        self.inner.state.get()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == LifecycleState::Active
    }

    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.subs.borrow().len()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Observable) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Register `callback`, activating the observable if it was idle.
    ///
    /// `on_init` runs before the new subscription is registered, so it never
    /// sees it. If `on_init` panics the observable stays idle.
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Subscription {
        if self.state() == LifecycleState::Idle {
            self.inner.state.set(LifecycleState::Active);
            tracing::debug!(observable = self.id().raw(), "observable activated");
            if let Err(payload) = panic::catch_unwind(panic::AssertUnwindSafe(|| self.fire_init()))
            {
                if self.inner.subs.borrow().is_empty() {
                    self.inner.state.set(LifecycleState::Idle);
                }
                panic::resume_unwind(payload);
            }
        }

        let sub = Subscription::new(self, Rc::new(callback));
        self.inner.subs.borrow_mut().push(sub.clone());
        sub
    }

    /// Revoke `sub` if it belongs to this observable.
    pub fn unsubscribe(&self, sub: &Subscription) {
        if sub.belongs_to(self) {
            sub.deinit();
        }
    }

    /// Notify subscribers, or defer to the scheduler while it is paused.
    ///
    /// # Panics
    ///
    /// Resumes the first subscriber panic once the sweep is complete, and
    /// panics with [`Error::RunawayCascade`] if re-entrant triggers exceed
    /// the configured sweep limit.
    pub fn trigger(&self) {
        if scheduler::defer(self) {
            return;
        }
        self.emit();
    }

    /// Unbatched emission: queue one sweep and drain unless a drain is
    /// already running further up the stack.
    pub(crate) fn emit(&self) {
        let inner = &self.inner;
        inner.queued.set(inner.queued.get() + 1);
        if inner.draining.replace(true) {
            return;
        }
        let _reset = DrainReset(inner);

        let settings = config();
        let mut sweeps = 0usize;
        let mut slot = PanicSlot::new();

        while inner.queued.get() > 0 {
            inner.queued.set(inner.queued.get() - 1);
            sweeps += 1;
            if sweeps > settings.max_drain_sweeps {
                let err = Error::RunawayCascade {
                    sweeps,
                    limit: settings.max_drain_sweeps,
                };
                tracing::error!(observable = inner.id.raw(), error = %err, "aborting drain");
                panic::panic_any(err);
            }

            let snapshot: Vec<Subscription> = inner.subs.borrow().clone();
            if settings.trace_notifications {
                tracing::trace!(
                    observable = inner.id.raw(),
                    subscribers = snapshot.len(),
                    sweep = sweeps,
                    "notification sweep"
                );
            }
            for sub in &snapshot {
                slot.run(|| sub.trigger());
            }
            if !slot.is_empty() {
                break;
            }
        }

        drop(_reset);
        slot.resume("observable sweep");
    }

    /// Revoke every subscription, continuing past panicking revocations.
    ///
    /// # Panics
    ///
    /// Resumes the first panic raised by a revocation (for example by an
    /// `on_deinit` hook) after the list is empty.
    pub fn deinit(&self) {
        let mut slot = PanicSlot::new();
        loop {
            let next = {
                let mut subs = self.inner.subs.borrow_mut();
                if subs.is_empty() {
                    None
                } else {
                    Some(subs.remove(0))
                }
            };
            let Some(sub) = next else { break };
            slot.run(|| sub.deinit());
        }
        slot.resume("observable deinit");
    }

    /// Remove `sub` from the list and go idle if it was the last one.
    fn detach(&self, sub: &Subscription) {
        let now_empty = {
            let mut subs = self.inner.subs.borrow_mut();
            if let Some(pos) = subs.iter().position(|s| s.ptr_eq(sub)) {
                subs.remove(pos);
            }
            subs.is_empty()
        };
        if now_empty && self.state() == LifecycleState::Active {
            self.inner.state.set(LifecycleState::Idle);
            tracing::debug!(observable = self.id().raw(), "observable deactivated");
            self.fire_deinit();
        }
    }

    fn hooks(&self) -> Option<Rc<dyn LifecycleHooks>> {
        self.inner.hooks.as_ref().and_then(Weak::upgrade)
    }

    fn fire_init(&self) {
        if let Some(hooks) = self.hooks() {
            hooks.on_init();
        }
    }

    fn fire_deinit(&self) {
        if let Some(hooks) = self.hooks() {
            hooks.on_deinit();
        }
    }
}

impl Default for Observable {
    fn default() -> Self {
        Self::new()
    }
}

impl Disposable for Observable {
    fn deinit(&self) -> Result<()> {
        Observable::deinit(self);
        Ok(())
    }
}

impl fmt::Debug for Observable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observable")
            .field("id", &self.id().raw())
            .field("state", &self.state())
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

struct DrainReset<'a>(&'a ObservableInner);

impl Drop for DrainReset<'_> {
    fn drop(&mut self) {
        self.0.queued.set(0);
        self.0.draining.set(false);
    }
}

// ─── Subscription ────────────────────────────────────────────────────────────

/// Whether a subscription can still deliver.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscriptionState {
    Active,
    Idle,
}

struct SubscriptionInner {
    state: Cell<SubscriptionState>,
    observable: Weak<ObservableInner>,
    callback: RefCell<Option<Rc<dyn Fn()>>>,
}

/// A revocable link between one [`Observable`] and one callback.
///
/// Both the observable and whoever holds this handle may revoke it; the
/// first revocation wins and releases the callback.
#[derive(Clone)]
pub struct Subscription {
    inner: Rc<SubscriptionInner>,
}

impl Subscription {
    fn new(observable: &Observable, callback: Rc<dyn Fn()>) -> Self {
        Self {
            inner: Rc::new(SubscriptionInner {
                state: Cell::new(SubscriptionState::Active),
                observable: Rc::downgrade(&observable.inner),
                callback: RefCell::new(Some(callback)),
            }),
        }
    }

    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.inner.state.get()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.state() == SubscriptionState::Active
    }

    /// The observable this subscription is bound to, if it still exists.
    #[must_use]
    pub fn observable(&self) -> Option<Observable> {
        self.inner
            .observable
            .upgrade()
            .map(|inner| Observable { inner })
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Subscription) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    fn belongs_to(&self, observable: &Observable) -> bool {
        std::ptr::eq(self.inner.observable.as_ptr(), Rc::as_ptr(&observable.inner))
    }

    /// Invoke the callback if the subscription is still active.
    pub fn trigger(&self) {
        if !self.is_active() {
            return;
        }
        let callback = self.inner.callback.borrow().clone();
        if let Some(callback) = callback {
            callback();
        }
    }

    /// Revoke the subscription. Idempotent.
    pub fn deinit(&self) {
        if self.inner.state.replace(SubscriptionState::Idle) == SubscriptionState::Idle {
            return;
        }
        let _callback = self.inner.callback.borrow_mut().take();
        if let Some(observable) = self.observable() {
            observable.detach(self);
        }
    }
}

impl Disposable for Subscription {
    fn deinit(&self) -> Result<()> {
        Subscription::deinit(self);
        Ok(())
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("state", &self.state())
            .field(
                "observable",
                &self.observable().map(|obs| obs.id().raw()),
            )
            .finish()
    }
}
