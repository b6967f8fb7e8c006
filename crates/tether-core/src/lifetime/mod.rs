#![forbid(unsafe_code)]

//! Explicit resource lifetimes.
//!
//! Nothing in the engine relies on drop order to release external resources.
//! Instead, anything that owns something implements [`Disposable`] and is
//! released with an explicit `deinit`. This module provides:
//!
//! - [`deinit`]: dispose a [`Value`] if it is a resource, no-op otherwise.
//! - [`deinit_diff`]: dispose whatever `prev` owns that `next` no longer
//!   references (used when an owning cell is reset).
//! - [`deinit_deep`]: dispose everything reachable.
//! - [`drain_by`]: the retry-until-empty drain shared by every teardown path.
//! - [`ManualRc`], [`ManualWeak`], [`LazyRc`]: manual reference counting.
//!
//! # Failure Modes
//!
//! - **A resource fails to dispose**: the walk or drain keeps going so the
//!   remaining resources are still released, then returns the first error.
//! - **Cyclic containers**: each container is visited at most once per walk.

pub mod rc;
pub mod value;

use std::collections::VecDeque;

use ahash::AHashSet;

use crate::error::{Error, Result};

pub use rc::{LazyRc, ManualRc, ManualWeak};
pub use value::{List, Map, Opaque, Path, PathSegment, Resource, Value, get_in};

/// Something that owns resources and can release them explicitly.
///
/// `deinit` must be idempotent: calling it on an already released value is a
/// no-op.
pub trait Disposable {
    fn deinit(&self) -> Result<()>;
}

/// Dispose `value` if it is a [`Resource`]. Safe on any value.
pub fn deinit(value: &Value) -> Result<()> {
    match value {
        Value::Resource(res) => res.deinit(),
        _ => Ok(()),
    }
}

/// Dispose every resource reachable from `prev` that is not referenced from
/// the corresponding position of `next`.
///
/// Lists are compared by membership (an item still present anywhere in the
/// next list survives) and then by index; maps are compared key by key. Only
/// [`List`] and [`Map`] are traversed.
pub fn deinit_diff(prev: &Value, next: &Value) -> Result<()> {
    let mut visited = AHashSet::new();
    diff_walk(prev, next, &mut visited)
}

/// Dispose every resource reachable from `value`.
pub fn deinit_deep(value: &Value) -> Result<()> {
    deinit_diff(value, &Value::Nil)
}

/// Dispose each field of `map` directly, without descending.
pub fn deinit_all(map: &Map) -> Result<()> {
    let mut fields: VecDeque<Value> = map.entries().into_iter().map(|(_, v)| v).collect();
    drain_by(&mut fields, |value| deinit(&value))
}

/// Pop and process items until `queue` is empty, even if some fail. Returns
/// the first failure once drained.
pub fn drain_by<T>(queue: &mut VecDeque<T>, mut f: impl FnMut(T) -> Result<()>) -> Result<()> {
    let mut first = None;
    while let Some(item) = queue.pop_front() {
        keep_first(&mut first, f(item));
    }
    first.map_or(Ok(()), Err)
}

fn keep_first(first: &mut Option<Error>, result: Result<()>) {
    if let Err(err) = result {
        if first.is_none() {
            *first = Some(err);
        } else {
            tracing::warn!(error = %err, "additional disposal failure");
        }
    }
}

fn diff_walk(prev: &Value, next: &Value, visited: &mut AHashSet<usize>) -> Result<()> {
    if prev.identical(next) {
        return Ok(());
    }

    match prev {
        Value::Resource(res) => res.deinit(),
        Value::List(list) => {
            if !visited.insert(list.addr()) {
                return Ok(());
            }
            let next_items = next.as_list().map(List::to_vec);
            let mut first = None;
            for (idx, item) in list.to_vec().iter().enumerate() {
                let next_item = match &next_items {
                    Some(items) if items.iter().any(|n| n.identical(item)) => continue,
                    Some(items) => items.get(idx).cloned().unwrap_or_default(),
                    None => Value::Nil,
                };
                keep_first(&mut first, diff_walk(item, &next_item, visited));
            }
            first.map_or(Ok(()), Err)
        }
        Value::Map(map) => {
            if !visited.insert(map.addr()) {
                return Ok(());
            }
            let next_map = next.as_map();
            let mut first = None;
            for (key, item) in map.entries() {
                let next_item = next_map.and_then(|m| m.get(&key)).unwrap_or_default();
                keep_first(&mut first, diff_walk(&item, &next_item, visited));
            }
            first.map_or(Ok(()), Err)
        }
        _ => Ok(()),
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::cell::Cell;
    use std::rc::Rc;

    use super::*;

    /// Counts disposals; optionally fails every time.
    #[derive(Debug, Default)]
    pub struct Probe {
        pub disposed: Cell<u32>,
        pub fail: bool,
    }

    impl Probe {
        pub fn new() -> Rc<Self> {
            Rc::new(Self::default())
        }

        pub fn failing() -> Rc<Self> {
            Rc::new(Self {
                disposed: Cell::new(0),
                fail: true,
            })
        }

        pub fn count(&self) -> u32 {
            self.disposed.get()
        }
    }

    impl Disposable for Probe {
        fn deinit(&self) -> Result<()> {
            self.disposed.set(self.disposed.get() + 1);
            if self.fail {
                Err(Error::disposal("probe refused"))
            } else {
                Ok(())
            }
        }
    }

    pub fn res(probe: &Rc<Probe>) -> Value {
        Value::Resource(Resource::from_rc(Rc::clone(probe) as Rc<dyn Disposable>))
    }
}

#[cfg(test)]
mod tests {
    use super::testing::{Probe, res};
    use super::*;

    #[test]
    fn deinit_ignores_plain_values() {
        assert!(deinit(&Value::Int(3)).is_ok());
        assert!(deinit(&Value::Nil).is_ok());
        assert!(deinit(&Value::list([])).is_ok());
    }

    #[test]
    fn deinit_disposes_resources() {
        let probe = Probe::new();
        deinit(&res(&probe)).unwrap();
        assert_eq!(probe.count(), 1);
    }

    #[test]
    fn diff_disposes_only_dropped_leaves() {
        let x = Probe::new();
        let y = Probe::new();
        let x_val = res(&x);

        let prev = Value::map([("a", x_val.clone()), ("b", Value::list([res(&y)]))]);
        let next = Value::map([("a", x_val)]);

        deinit_diff(&prev, &next).unwrap();
        assert_eq!(x.count(), 0);
        assert_eq!(y.count(), 1);
    }

    #[test]
    fn diff_keeps_list_members_that_moved() {
        let a = Probe::new();
        let b = Probe::new();
        let (a_val, b_val) = (res(&a), res(&b));

        let prev = Value::list([a_val.clone(), b_val.clone()]);
        let next = Value::list([b_val, a_val]);

        deinit_diff(&prev, &next).unwrap();
        assert_eq!(a.count(), 0);
        assert_eq!(b.count(), 0);
    }

    #[test]
    fn diff_of_identical_values_is_noop() {
        let a = Probe::new();
        let value = Value::list([res(&a)]);
        deinit_diff(&value, &value.clone()).unwrap();
        assert_eq!(a.count(), 0);
    }

    #[test]
    fn deep_disposes_everything_reachable() {
        let a = Probe::new();
        let b = Probe::new();
        let value = Value::map([
            ("a", res(&a)),
            ("nested", Value::map([("b", Value::list([res(&b)]))])),
        ]);

        deinit_deep(&value).unwrap();
        assert_eq!(a.count(), 1);
        assert_eq!(b.count(), 1);
    }

    #[test]
    fn deep_survives_cycles() {
        let a = Probe::new();
        let list = List::new([res(&a)]);
        list.push(Value::List(list.clone()));
        let map = Map::new();
        map.insert("self", Value::Map(map.clone()));
        map.insert("list", Value::List(list.clone()));

        deinit_deep(&Value::Map(map)).unwrap();
        assert_eq!(a.count(), 1);
    }

    #[test]
    fn shared_container_visited_once() {
        let a = Probe::new();
        let shared = Value::list([res(&a)]);
        let value = Value::list([shared.clone(), shared]);

        deinit_deep(&value).unwrap();
        assert_eq!(a.count(), 1);
    }

    #[test]
    fn opaque_values_are_not_traversed() {
        let value = Value::list([Value::opaque(vec![1, 2, 3])]);
        assert!(deinit_deep(&value).is_ok());
    }

    #[test]
    fn failure_does_not_stop_the_walk() {
        let bad = Probe::failing();
        let good = Probe::new();
        let value = Value::list([res(&bad), res(&good)]);

        let err = deinit_deep(&value).unwrap_err();
        assert_eq!(err, Error::disposal("probe refused"));
        assert_eq!(bad.count(), 1);
        assert_eq!(good.count(), 1);
    }

    #[test]
    fn drain_by_empties_queue_despite_errors() {
        let mut queue: VecDeque<u32> = (0..5).collect();
        let mut seen = Vec::new();
        let result = drain_by(&mut queue, |n| {
            seen.push(n);
            if n % 2 == 0 {
                Err(Error::disposal(format!("item {n}")))
            } else {
                Ok(())
            }
        });
        assert!(queue.is_empty());
        assert_eq!(seen, vec![0, 1, 2, 3, 4]);
        assert_eq!(result, Err(Error::disposal("item 0")));
    }

    #[test]
    fn deinit_all_is_shallow() {
        let top = Probe::new();
        let nested = Probe::new();
        let map = Map::from_entries([
            ("top", res(&top)),
            ("nested", Value::list([res(&nested)])),
        ]);

        deinit_all(&map).unwrap();
        assert_eq!(top.count(), 1);
        assert_eq!(nested.count(), 0);
    }
}
