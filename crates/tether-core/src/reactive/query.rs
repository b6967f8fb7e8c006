#![forbid(unsafe_code)]

//! Projections of another reactive reference.
//!
//! A [`Query`] watches one source and caches `project(source value)`. It is a
//! computation with a single, fixed dependency: instead of a reaction loop it
//! subscribes to the source directly while it has subscribers of its own, and
//! re-projects on every source notification. Subscribers hear about the new
//! projection only if it is unequal to the cached one.
//!
//! [`PathQuery`] is the common case of projecting a [`Path`] out of a
//! [`Value`] tree, compared by identity.

use std::cell::{Cell, RefCell};
use std::fmt;
use std::rc::{Rc, Weak};

use super::context::{is_tracking, track};
use super::observable::{LifecycleHooks, Observable, Subscription};
use super::traits::{Dereferenceable, ObservableRef, Subscribable};
use crate::equality::{SameValue, same_value};
use crate::error::Result;
use crate::lifetime::{Disposable, Path, Value, get_in};

type ProjectFn<S, T> = Box<dyn Fn(&<S as Dereferenceable>::Target) -> T>;

struct QueryInner<S: Dereferenceable, T> {
    this: Weak<QueryInner<S, T>>,
    observable: Observable,
    source: S,
    project: ProjectFn<S, T>,
    equal: Box<dyn Fn(&T, &T) -> bool>,
    cached: RefCell<Option<T>>,
    upstream: RefCell<Option<Subscription>>,
    version: Cell<u64>,
}

impl<S: ObservableRef + 'static, T: 'static> QueryInner<S, T> {
    fn compute(&self) -> T {
        self.source.deref_with(|value| (self.project)(value))
    }

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

    fn on_source_trigger(&self) {
        if self.store(self.compute()) {
            self.observable.trigger();
        }
    }

    fn refresh(&self) {
        if self.observable.is_active() && self.cached.borrow().is_some() {
            return;
        }
        self.store(self.compute());
    }
}

impl<S: ObservableRef + 'static, T: 'static> LifecycleHooks for QueryInner<S, T> {
    fn on_init(&self) {
        // The upstream subscription keeps the query alive while it is
        // observed; `on_deinit` releases it.
        let Some(this) = self.this.upgrade() else {
            return;
        };
        let sub = self
            .source
            .observable()
            .subscribe(move || this.on_source_trigger());
        *self.upstream.borrow_mut() = Some(sub);
        self.store(self.compute());
    }

    fn on_deinit(&self) {
        let upstream = self.upstream.borrow_mut().take();
        if let Some(sub) = upstream {
            sub.deinit();
        }
    }
}

/// A cached projection of another reactive reference.
pub struct Query<S: Dereferenceable, T> {
    inner: Rc<QueryInner<S, T>>,
}

/// A query projecting a [`Path`] out of a [`Value`] source.
pub type PathQuery<S> = Query<S, Value>;

impl<S: Dereferenceable, T> Clone for Query<S, T> {
    fn clone(&self) -> Self {
        Self {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<S: ObservableRef + 'static, T: 'static> Query<S, T> {
    pub fn new(
        source: S,
        project: impl Fn(&S::Target) -> T + 'static,
        equal: impl Fn(&T, &T) -> bool + 'static,
    ) -> Self {
        let inner = Rc::new_cyclic(|this: &Weak<QueryInner<S, T>>| {
            let hooks: Weak<dyn LifecycleHooks> = this.clone();
            QueryInner {
                this: this.clone(),
                observable: Observable::with_hooks(hooks),
                source,
                project: Box::new(project),
                equal: Box::new(equal),
                cached: RefCell::new(None),
                upstream: RefCell::new(None),
                version: Cell::new(0),
            }
        });
        Self { inner }
    }

    /// Tracked read of a clone of the projection.
    #[must_use]
    pub fn get(&self) -> T
    where
        T: Clone,
    {
        self.with(T::clone)
    }

    /// Tracked read through a borrow.
    pub fn with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        track(&self.inner.observable);
        self.peek_with(f)
    }

    /// Untracked read; re-projects first if idle.
    pub fn peek_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.inner.refresh();
        let cached = self.inner.cached.borrow();
        f(cached.as_ref().expect("cached is always Some after refresh"))
    }

    #[must_use]
    pub fn version(&self) -> u64 {
        self.inner.version.get()
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.inner.observable.is_active()
    }

    #[must_use]
    pub fn source(&self) -> &S {
        &self.inner.source
    }

    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Subscription {
        self.inner.observable.subscribe(callback)
    }

    pub fn deinit(&self) {
        self.inner.observable.deinit();
    }
}

impl<S: ObservableRef<Target = Value> + 'static> Query<S, Value> {
    /// Project `path` out of `source`, compared by [`Value::identical`].
    pub fn at_path(source: S, path: Path) -> Self {
        Query::new(source, move |value| get_in(value, &path), Value::identical)
    }
}

/// Build a [`Query`] compared by [`SameValue`].
pub fn query<S, T>(source: S, project: impl Fn(&S::Target) -> T + 'static) -> Query<S, T>
where
    S: ObservableRef + 'static,
    T: SameValue + 'static,
{
    Query::new(source, project, same_value::<T>)
}

/// Build a [`PathQuery`].
pub fn path_query<S>(source: S, path: Path) -> PathQuery<S>
where
    S: ObservableRef<Target = Value> + 'static,
{
    Query::at_path(source, path)
}

/// Untracked lookup of `path` in the current value of `source`.
pub fn deref_in<S>(source: &S, path: &Path) -> Value
where
    S: Dereferenceable<Target = Value> + ?Sized,
{
    source.deref_with(|value| get_in(value, path))
}

/// Look up `path` in `source`, tracking the result.
///
/// With a tracker installed the read goes through a temporary [`PathQuery`],
/// so the caller only reruns when the value at `path` changes rather than on
/// every change to `source`. Without one it is a plain [`deref_in`].
pub fn scan<S>(source: &S, path: &Path) -> Value
where
    S: ObservableRef<Target = Value> + Clone + 'static,
{
    if is_tracking() {
        path_query(source.clone(), path.clone()).get()
    } else {
        deref_in(source, path)
    }
}

impl<S: ObservableRef + 'static, T: 'static> Subscribable for Query<S, T> {
    fn observable(&self) -> &Observable {
        &self.inner.observable
    }
}

impl<S: ObservableRef + 'static, T: 'static> Dereferenceable for Query<S, T> {
    type Target = T;

    fn deref_with<R>(&self, f: impl FnOnce(&T) -> R) -> R {
        self.peek_with(f)
    }
}

impl<S: ObservableRef + 'static, T: 'static> Disposable for Query<S, T> {
    fn deinit(&self) -> Result<()> {
        Query::deinit(self);
        Ok(())
    }
}

impl<S: Dereferenceable, T: fmt::Debug> fmt::Debug for Query<S, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Query")
            .field("cached", &*self.inner.cached.borrow())
            .field("version", &self.inner.version.get())
            .field("observable", &self.inner.observable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reactive::{Agent, Atom, Reaction};

    fn user() -> Agent {
        Agent::new(Value::map([
            ("name", Value::str("ada")),
            (
                "tags",
                Value::list([Value::str("admin"), Value::str("ops")]),
            ),
        ]))
    }

    #[test]
    fn query_projects_source() {
        let pair = Atom::new((1, 2));
        let first = query(pair.clone(), |p: &(i32, i32)| p.0);
        assert_eq!(first.get(), 1);

        pair.reset((5, 2));
        assert_eq!(first.get(), 5);
    }

    #[test]
    fn nan_projection_is_unchanged() {
        let pair = Atom::new((f64::NAN, 0));
        let first = query(pair.clone(), |p: &(f64, i32)| p.0);
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let _sub = first.subscribe(move || c.set(c.get() + 1));

        pair.reset((f64::NAN, 1));
        pair.reset((f64::NAN, 2));
        assert_eq!(count.get(), 0);
        pair.reset((1.5, 2));
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn query_notifies_only_when_projection_changes() {
        let pair = Atom::new((1, 2));
        let first = query(pair.clone(), |p: &(i32, i32)| p.0);
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let _sub = first.subscribe(move || c.set(c.get() + 1));

        pair.reset((1, 3));
        assert_eq!(count.get(), 0);
        pair.reset((2, 3));
        assert_eq!(count.get(), 1);
        assert_eq!(first.version(), 2);
    }

    #[test]
    fn query_attaches_upstream_only_while_observed() {
        let source = Atom::new(1);
        let q = query(source.clone(), |v: &i32| v * 3);
        assert!(!source.observable().is_active());

        let sub = q.subscribe(|| {});
        assert!(source.observable().is_active());
        assert!(q.is_active());

        sub.deinit();
        assert!(!source.observable().is_active());
    }

    #[test]
    fn path_query_follows_path() {
        let agent = user();
        let tag = path_query(agent.clone(), Path::new().key("tags").index(1));
        assert_eq!(tag.get().as_str(), Some("ops"));

        agent
            .reset(Value::map([("tags", Value::list([Value::str("dev")]))]))
            .unwrap();
        assert!(tag.get().is_nil());
    }

    #[test]
    fn path_query_ignores_unrelated_changes() {
        let name = Value::str("ada");
        let agent = Agent::new(Value::map([("name", name.clone()), ("age", Value::Int(36))]));
        let q = path_query(agent.clone(), Path::new().key("name"));
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let _sub = q.subscribe(move || c.set(c.get() + 1));

        agent
            .reset(Value::map([("name", name), ("age", Value::Int(37))]))
            .unwrap();
        assert_eq!(count.get(), 0);

        agent
            .reset(Value::map([("name", Value::str("grace"))]))
            .unwrap();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn deref_in_is_untracked() {
        let agent = user();
        let reaction = Reaction::new();
        let a = agent.clone();
        let name = reaction
            .run(|| deref_in(&a, &Path::new().key("name")), || {})
            .unwrap();
        assert_eq!(name.as_str(), Some("ada"));
        assert_eq!(reaction.dependency_count(), 0);
    }

    #[test]
    fn scan_without_tracker_is_plain_lookup() {
        let agent = user();
        let value = scan(&agent, &Path::new().key("tags").index(0));
        assert_eq!(value.as_str(), Some("admin"));
        assert!(!agent.observable().is_active());
    }

    #[test]
    fn scan_inside_reaction_tracks_only_the_path() {
        let name = Value::str("ada");
        let agent = Agent::new(Value::map([("name", name.clone()), ("age", Value::Int(36))]));
        let runs = Rc::new(Cell::new(0));

        let (a, r) = (agent.clone(), Rc::clone(&runs));
        let reaction = Reaction::spawn_loop(move || {
            r.set(r.get() + 1);
            let _ = scan(&a, &Path::new().key("name"));
        })
        .unwrap();
        assert_eq!(runs.get(), 1);
        assert!(agent.observable().is_active());

        agent
            .reset(Value::map([("name", name), ("age", Value::Int(40))]))
            .unwrap();
        assert_eq!(runs.get(), 1);

        agent
            .reset(Value::map([("name", Value::str("grace"))]))
            .unwrap();
        assert_eq!(runs.get(), 2);

        reaction.deinit();
        assert!(!agent.observable().is_active());
    }
}
