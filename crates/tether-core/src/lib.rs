#![forbid(unsafe_code)]

//! Tether: a fine-grained reactive state engine.
//!
//! Tether tracks which computation reads which value, batches change
//! notifications, and propagates updates deterministically on a single
//! thread. It also carries an explicit resource-lifetime layer: disposal,
//! ownership diffing on reassignment, and manual reference counting.
//!
//! # Quick start
//!
//! ```
//! use std::cell::RefCell;
//! use std::rc::Rc;
//! use tether_core::{Atom, Reaction, batch, computation};
//!
//! let first = Atom::new(String::from("Ada"));
//! let last = Atom::new(String::from("Lovelace"));
//! let (f, l) = (first.clone(), last.clone());
//! let full = computation(move || format!("{} {}", f.get(), l.get()));
//!
//! let log = Rc::new(RefCell::new(Vec::new()));
//! let (full2, log2) = (full.clone(), Rc::clone(&log));
//! let printer = Reaction::spawn_loop(move || log2.borrow_mut().push(full2.get())).unwrap();
//!
//! batch(|| {
//!     first.reset(String::from("Grace"));
//!     last.reset(String::from("Hopper"));
//! });
//! assert_eq!(log.borrow().last().map(String::as_str), Some("Grace Hopper"));
//! printer.deinit();
//! ```
//!
//! # Modules
//!
//! - [`reactive`]: observables, reactions, the scheduler and derived cells.
//! - [`lifetime`]: [`Disposable`], diff-based disposal and [`ManualRc`].
//! - [`config`]: per-thread [`EngineConfig`].
//! - [`equality`]: the [`SameValue`] change test.
//! - [`error`]: [`Error`] and [`Result`].

pub mod config;
pub mod equality;
pub mod error;
pub mod lifetime;
pub mod reactive;

pub use config::{EngineConfig, config, configure};
pub use equality::{SameValue, same_value};
pub use error::{Error, Result};
pub use lifetime::{
    Disposable, LazyRc, List, ManualRc, ManualWeak, Map, Opaque, Path, PathSegment, Resource,
    Value, deinit, deinit_all, deinit_deep, deinit_diff, drain_by, get_in,
};
pub use reactive::{
    Agent, Atom, Computation, Dereferenceable, LifecycleHooks, LifecycleState, Observable,
    ObservableId, ObservableRef, PathQuery, PauseGuard, Query, Reaction, Record, RunState,
    Subscribable, Subscription, SubscriptionState, Tracker, batch, computation, deref_in,
    is_paused, is_tracking, lazy_computation, path_query, pause, pause_depth, query, resume, scan,
    track, untracked, with_tracker,
};
