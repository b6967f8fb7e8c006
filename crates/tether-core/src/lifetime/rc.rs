#![forbid(unsafe_code)]

//! Manual reference counting for disposable values.
//!
//! `std::rc::Rc` frees memory when the last handle drops, but it cannot run a
//! fallible, explicit disposal protocol at a point the caller chooses.
//! [`ManualRc`] can: every handle is released with an explicit
//! [`deinit`](ManualRc::deinit), and the last release disposes the held
//! value exactly once.
//!
//! ```
//! use tether_core::{ManualRc, Value};
//!
//! let rc1 = ManualRc::new(Value::Int(7));   // count = 1
//! let rc2 = rc1.try_clone().unwrap();       // count = 2
//! let weak = rc1.weak();
//!
//! rc1.deinit().unwrap();                    // count = 1
//! assert_eq!(rc2.get().unwrap().as_int(), Some(7));
//!
//! rc2.deinit().unwrap();                    // count = 0, value disposed
//! assert!(weak.is_empty());
//! assert!(rc2.get().is_err());
//! ```
//!
//! # Invariants
//!
//! 1. A cell's count only changes through a live cell; both increment and
//!    decrement on a dead cell are errors.
//! 2. The held value is disposed exactly once, when the count reaches zero.
//! 3. Each [`ManualRc`] handle releases its share at most once; repeated
//!    `deinit` calls on the same handle are no-ops.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::Rc;

use super::Disposable;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CellState {
    Alive,
    Dead,
}

/// Shared counted storage behind every handle.
struct RcCell<T> {
    value: RefCell<Option<T>>,
    count: Cell<usize>,
    state: Cell<CellState>,
}

impl<T> RcCell<T> {
    fn new(value: T) -> Rc<Self> {
        Rc::new(Self {
            value: RefCell::new(Some(value)),
            count: Cell::new(0),
            state: Cell::new(CellState::Alive),
        })
    }

    fn is_dead(&self) -> bool {
        self.state.get() == CellState::Dead
    }

    fn inc(&self) -> Result<()> {
        if self.is_dead() {
            return Err(Error::dead("increment"));
        }
        self.count.set(self.count.get() + 1);
        Ok(())
    }

    fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        if self.is_dead() {
            return None;
        }
        self.value.borrow().as_ref().map(f)
    }
}

impl<T: Disposable> RcCell<T> {
    fn dec(&self) -> Result<()> {
        if self.is_dead() {
            return Err(Error::dead("decrement"));
        }
        let count = self.count.get();
        if count == 0 {
            return Err(Error::NoReferences);
        }
        self.count.set(count - 1);
        if count > 1 {
            return Ok(());
        }

        self.state.set(CellState::Dead);
        let value = self.value.borrow_mut().take();
        tracing::debug!("reference count reached zero");
        match value {
            Some(value) => value.deinit(),
            None => Ok(()),
        }
    }
}

// ─── ManualRc ────────────────────────────────────────────────────────────────

/// Owning handle to a manually counted value.
pub struct ManualRc<T> {
    cell: Rc<RcCell<T>>,
    released: Cell<bool>,
}

impl<T> ManualRc<T> {
    /// Allocate a new cell holding `value` with a count of one.
    #[must_use]
    pub fn new(value: T) -> Self {
        let cell = RcCell::new(value);
        cell.count.set(1);
        Self {
            cell,
            released: Cell::new(false),
        }
    }

    fn attach(cell: &Rc<RcCell<T>>) -> Result<Self> {
        cell.inc()?;
        Ok(Self {
            cell: Rc::clone(cell),
            released: Cell::new(false),
        })
    }

    /// Share the value, incrementing the count.
    pub fn try_clone(&self) -> Result<Self> {
        if self.released.get() {
            return Err(Error::dead("clone"));
        }
        Self::attach(&self.cell)
    }

    /// A non-owning handle to the same cell.
    #[must_use]
    pub fn weak(&self) -> ManualWeak<T> {
        ManualWeak {
            cell: Rc::clone(&self.cell),
        }
    }

    /// Borrow the value.
    ///
    /// # Panics
    ///
    /// Panics if `f` releases the last handle to this same cell.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Result<R> {
        if self.released.get() {
            return Err(Error::dead("deref"));
        }
        self.cell.with(f).ok_or(Error::dead("deref"))
    }

    /// Current number of live owning handles.
    #[must_use]
    pub fn strong_count(&self) -> usize {
        self.cell.count.get()
    }

    /// Whether this handle can still reach the value.
    #[must_use]
    pub fn is_alive(&self) -> bool {
        !self.released.get() && !self.cell.is_dead()
    }
}

impl<T: Clone> ManualRc<T> {
    pub fn get(&self) -> Result<T> {
        self.with(T::clone)
    }
}

impl<T: Disposable> ManualRc<T> {
    /// Release this handle's share. The last release disposes the value.
    pub fn deinit(&self) -> Result<()> {
        if self.released.replace(true) {
            return Ok(());
        }
        self.cell.dec()
    }
}

impl<T: Disposable> Disposable for ManualRc<T> {
    fn deinit(&self) -> Result<()> {
        ManualRc::deinit(self)
    }
}

impl<T> fmt::Debug for ManualRc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualRc")
            .field("count", &self.cell.count.get())
            .field("alive", &self.is_alive())
            .finish()
    }
}

// ─── ManualWeak ──────────────────────────────────────────────────────────────

/// Non-owning handle; does not affect the count.
pub struct ManualWeak<T> {
    cell: Rc<RcCell<T>>,
}

impl<T> Clone for ManualWeak<T> {
    fn clone(&self) -> Self {
        Self {
            cell: Rc::clone(&self.cell),
        }
    }
}

impl<T> ManualWeak<T> {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cell.is_dead()
    }

    /// Borrow the value if the cell is still alive.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        self.cell.with(f)
    }

    /// Obtain an owning handle. Fails once the cell is dead.
    pub fn upgrade(&self) -> Result<ManualRc<T>> {
        ManualRc::attach(&self.cell)
    }
}

impl<T> fmt::Debug for ManualWeak<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualWeak")
            .field("empty", &self.is_empty())
            .finish()
    }
}

// ─── LazyRc ──────────────────────────────────────────────────────────────────

/// Defers allocating the counted cell until the first [`rc`](LazyRc::rc).
///
/// A `LazyRc` never owns the value: once every handle it produced is
/// released, the next `rc()` constructs a fresh one.
pub struct LazyRc<T> {
    construct: Box<dyn Fn() -> T>,
    cell: RefCell<Option<Rc<RcCell<T>>>>,
    constructing: Cell<bool>,
}

impl<T> LazyRc<T> {
    #[must_use]
    pub fn new(construct: impl Fn() -> T + 'static) -> Self {
        Self {
            construct: Box::new(construct),
            cell: RefCell::new(None),
            constructing: Cell::new(false),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.cell.borrow().as_ref().is_none_or(|cell| cell.is_dead())
    }

    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> Option<R> {
        let cell = self.cell.borrow().clone()?;
        cell.with(f)
    }

    /// An owning handle, constructing the value first if needed.
    pub fn rc(&self) -> Result<ManualRc<T>> {
        if self.is_empty() {
            if self.constructing.replace(true) {
                return Err(Error::LazyReentry);
            }
            let _reset = ResetOnDrop(&self.constructing);
            let cell = RcCell::new((self.construct)());
            *self.cell.borrow_mut() = Some(cell);
        }
        let cell = self.cell.borrow().clone().ok_or(Error::dead("construct"))?;
        ManualRc::attach(&cell)
    }
}

impl<T> fmt::Debug for LazyRc<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyRc")
            .field("empty", &self.is_empty())
            .finish()
    }
}

struct ResetOnDrop<'a>(&'a Cell<bool>);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.set(false);
    }
}
