#![forbid(unsafe_code)]

//! Mutable reactive cells.
//!
//! [`Atom`] pairs an [`Observable`] with one value slot. Writes go through a
//! single equality-gated path: a write that leaves the value the same (by the
//! atom's equality, [`SameValue`] by default) notifies nobody.
//!
//! [`Agent`] is an atom over [`Value`] that owns what it holds: replacing the
//! value disposes whatever the new value no longer references.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::rc::Rc;

use super::context::track;
use super::observable::{Observable, Subscription};
use super::traits::{Dereferenceable, Subscribable};
use crate::equality::{SameValue, same_value};
use crate::error::Result;
use crate::lifetime::{Disposable, Value, deinit_deep, deinit_diff};

type EqualFn<T> = Box<dyn Fn(&T, &T) -> bool>;

struct AtomInner<T> {
    observable: Observable,
    value: RefCell<T>,
    equal: EqualFn<T>,
    version: Cell<u64>,
}

/// A mutable observable cell.
///
/// Cloning an `Atom` creates a new handle to the **same** cell.
///
/// # Example
///
/// ```
/// use tether_core::Atom;
///
/// let name = Atom::new(String::from("tether"));
/// name.swap(|s| s.to_uppercase());
/// assert_eq!(name.get(), "TETHER");
/// ```
pub struct Atom<T> {
    inner: Rc<AtomInner<T>>,
}

impl<T> Clone for Atom<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: SameValue + 'static> Atom<T> {
    #[must_use]
    pub fn new(value: T) -> Self {
        Self::with_equality(value, same_value::<T>)
    }
}

impl<T: 'static> Atom<T> {
    /// An atom that treats `equal(old, new)` as "unchanged".
    #[must_use]
    pub fn with_equality(value: T, equal: impl Fn(&T, &T) -> bool + 'static) -> Self {
        Self {
            inner: Rc::new(AtomInner {
                observable: Observable::new(),
                value: RefCell::new(value),
                equal: Box::new(equal),
                version: Cell::new(0),
            }),
        }
    }

    /// Tracked read of a clone of the value.
    #[must_use]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        track(&self.inner.observable);
        self.peek()
    }

    /// Tracked read through a borrow.
    ///
    /// # Panics
    ///
    /// Panics if `f` writes to this atom.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        track(&self.inner.observable);
        self.peek_with(f)
    }

    /// Untracked read of a clone of the value.
    #[must_use]
    pub fn peek(&self) -> T
    where
        T: Clone,
    {
        self.inner.value.borrow().clone()
    }

    /// Untracked read through a borrow.
    pub fn peek_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        let value = self.inner.value.borrow();
        f(&*value)
    }

    /// Replace the value, notifying subscribers if it changed.
    pub fn reset(&self, next: T) {
        if self.replace(next).is_some() {
            self.inner.observable.trigger();
        }
    }

    /// Reset to `f(current)`.
    pub fn swap(&self, f: impl FnOnce(&T) -> T) {
        let next = self.peek_with(f);
        self.reset(next);
    }

    /// Store `next` without notifying. Returns the previous value if it was
    /// replaced, `None` if `next` was equal to it.
    pub(crate) fn replace(&self, next: T) -> Option<T> {
        let unchanged = {
            let current = self.inner.value.borrow();
            (self.inner.equal)(&*current, &next)
        };
        if unchanged {
            return None;
        }
        let prev = self.inner.value.replace(next);
        self.inner.version.set(self.inner.version.get() + 1);
        Some(prev)
    }

    /// Number of effective changes so far.
    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    #[must_use]
    pub fn observable(&self) -> &Observable {
        &self.inner.observable
    }

    /// Subscribe a plain listener.
    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Subscription {
        self.inner.observable.subscribe(callback)
    }

    /// Revoke every subscriber.
    pub fn deinit(&self) {
        self.inner.observable.deinit();
    }
}

impl<T: Default + SameValue + 'static> Default for Atom<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T: 'static> Subscribable for Atom<T> {
    fn observable(&self) -> &Observable {
        &self.inner.observable
    }
}

impl<T: 'static> Dereferenceable for Atom<T> {
    type Target = T;

    fn deref_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.peek_with(f)
    }
}

impl<T: 'static> Disposable for Atom<T> {
    fn deinit(&self) -> Result<()> {
        Atom::deinit(self);
        Ok(())
    }
}

impl<T: fmt::Debug> fmt::Debug for Atom<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Atom")
            .field("value", &*self.inner.value.borrow())
            .field("version", &self.inner.version.get())
            .field("observable", &self.inner.observable)
            .finish()
    }
}

// ─── Agent ───────────────────────────────────────────────────────────────────

/// An atom over [`Value`] that owns the resources it holds.
#[derive(Clone, Debug, Default)]
pub struct Agent {
    atom: Atom<Value>,
}

impl Agent {
    #[must_use]
    pub fn new(value: Value) -> Self {
        Self {
            atom: Atom::new(value),
        }
    }

    #[must_use]
    pub fn get(&self) -> Value {
        self.atom.get()
    }

    pub fn with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        self.atom.with(f)
    }

    #[must_use]
    pub fn peek(&self) -> Value {
        self.atom.peek()
    }

    /// Replace the value, disposing whatever `next` no longer references.
    ///
    /// Subscribers are notified before disposal errors are reported.
    ///
    /// # Errors
    ///
    /// The first disposal failure; every other orphaned resource is still
    /// disposed.
    pub fn reset(&self, next: Value) -> Result<()> {
        let Some(prev) = self.atom.replace(next) else {
            return Ok(());
        };
        let disposal = deinit_diff(&prev, &self.atom.peek());
        self.atom.observable().trigger();
        disposal
    }

    pub fn swap(&self, f: impl FnOnce(&Value) -> Value) -> Result<()> {
        let next = self.atom.peek_with(f);
        self.reset(next)
    }

    /// Take the value out, leaving `Nil`, and give up ownership of it.
    ///
    /// # Panics
    ///
    /// If notifying subscribers panics, the taken value is disposed before
    /// the panic resumes.
    pub fn unown(&self) -> Value {
        let Some(taken) = self.atom.replace(Value::Nil) else {
            return Value::Nil;
        };
        if let Err(payload) =
            panic::catch_unwind(AssertUnwindSafe(|| self.atom.observable().trigger()))
        {
            if let Err(err) = deinit_deep(&taken) {
                tracing::warn!(error = %err, "disposal failed while unwinding unown");
            }
            panic::resume_unwind(payload);
        }
        taken
    }

    /// Revoke subscribers, then dispose everything the agent holds.
    ///
    /// # Errors
    ///
    /// The first disposal failure.
    pub fn deinit(&self) -> Result<()> {
        let revoked = panic::catch_unwind(AssertUnwindSafe(|| self.atom.deinit()));
        let disposal = deinit_deep(&self.atom.peek());
        if let Err(payload) = revoked {
            panic::resume_unwind(payload);
        }
        disposal
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.atom.version()
    }

    #[must_use]
    pub fn observable(&self) -> &Observable {
        self.atom.observable()
    }

    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Subscription {
        self.atom.subscribe(callback)
    }
}

impl Subscribable for Agent {
    fn observable(&self) -> &Observable {
        self.atom.observable()
    }
}

impl Dereferenceable for Agent {
    type Target = Value;

    fn deref_with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        self.atom.peek_with(f)
    }
}

impl Disposable for Agent {
    fn deinit(&self) -> Result<()> {
        Agent::deinit(self)
    }
}
