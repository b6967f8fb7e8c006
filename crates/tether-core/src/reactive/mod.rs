#![forbid(unsafe_code)]

//! The reactive graph.
//!
//! - [`Observable`] / [`Subscription`]: notification sources and revocable
//!   links to callbacks, with first/last-subscriber lifecycle hooks.
//! - [`scheduler`]: nestable pause/resume batching of triggers.
//! - [`context`]: the ambient [`Tracker`] that reads report to.
//! - [`Reaction`]: runs a closure, subscribes to what it read, prunes what it
//!   stopped reading.
//! - [`Atom`], [`Agent`], [`Record`]: mutable cells.
//! - [`Computation`], [`Query`], [`PathQuery`]: cached derived values that
//!   only hold upstream subscriptions while observed.
//!
//! # Architecture
//!
//! Everything is single-threaded and `Rc`-based. Handles are cheap clones of
//! shared interiors. The tracker and the scheduler are thread-local and are
//! always installed and removed with save-and-restore guards.
//!
//! # Invariants
//!
//! 1. An observable is active iff it has subscribers.
//! 2. Subscribers are notified in registration order.
//! 3. Notification never nests per observable: re-entrant triggers are queued.
//! 4. A write that leaves a cell's value unchanged notifies nobody.
//! 5. While paused, each observable is emitted at most once at resume.

pub mod atom;
pub mod computed;
pub mod context;
mod isolate;
pub mod observable;
pub mod query;
pub mod reaction;
pub mod record;
pub mod scheduler;
pub mod traits;

pub use atom::{Agent, Atom};
pub use computed::{Computation, computation, lazy_computation};
pub use context::{Tracker, is_tracking, track, untracked, with_tracker};
pub use observable::{
    LifecycleHooks, LifecycleState, Observable, ObservableId, Subscription, SubscriptionState,
};
pub use query::{PathQuery, Query, deref_in, path_query, query, scan};
pub use reaction::{Reaction, RunState};
pub use record::Record;
pub use scheduler::{PauseGuard, batch, is_paused, pause, pause_depth, resume};
pub use traits::{Dereferenceable, ObservableRef, Subscribable};
