#![forbid(unsafe_code)]

//! Observable keyed records.
//!
//! A [`Record`] is a string-keyed bag of [`Value`] fields behind one
//! [`Observable`]. Reads go through [`Record::get`], which tracks the record;
//! writes go through [`Record::set`], which notifies only when the stored
//! value actually changes and disposes the value it replaces. Use
//! [`Record::assign`] to apply several writes as one notification.

use std::fmt;
use std::rc::Rc;

use super::context::track;
use super::observable::{Observable, Subscription};
use super::scheduler::batch;
use super::traits::{Dereferenceable, Subscribable};
use crate::error::{Error, Result};
use crate::lifetime::{Disposable, Map, Value, deinit, deinit_all};

struct RecordInner {
    observable: Observable,
    fields: Map,
    /// `fields` viewed as a value, for path lookups.
    view: Value,
}

/// An observable string-keyed record that owns its fields.
#[derive(Clone)]
pub struct Record {
    inner: Rc<RecordInner>,
}

impl Record {
    #[must_use]
    pub fn new() -> Self {
        Self::from_entries(std::iter::empty::<(String, Value)>())
    }

    pub fn from_entries<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        let fields = Map::from_entries(entries);
        Self {
            inner: Rc::new(RecordInner {
                observable: Observable::new(),
                view: Value::Map(fields.clone()),
                fields,
            }),
        }
    }

    /// Tracked read of one field; `Nil` when absent.
    #[must_use]
    pub fn get(&self, key: &str) -> Value {
        track(&self.inner.observable);
        self.peek(key)
    }

    /// Untracked read of one field.
    #[must_use]
    pub fn peek(&self, key: &str) -> Value {
        self.inner.fields.get(key).unwrap_or_default()
    }

    /// Tracked list of field names.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        track(&self.inner.observable);
        self.inner.fields.keys()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.fields.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.fields.is_empty()
    }

    /// Store `value` under `key`.
    ///
    /// An absent key reads as [`Value::Nil`], so storing `Nil` there is a
    /// no-op. Otherwise notifies iff the stored value is not identical to the
    /// previous one. The replaced value is disposed before subscribers run.
    ///
    /// # Errors
    ///
    /// Disposal failure of the replaced value, reported after notifying.
    pub fn set(&self, key: impl Into<String>, value: Value) -> Result<()> {
        let key = key.into();
        if self
            .inner
            .fields
            .get(&key)
            .unwrap_or_default()
            .identical(&value)
        {
            return Ok(());
        }
        let prev = self.inner.fields.insert(key, value);
        let disposed = prev.map_or(Ok(()), |prev| deinit(&prev));
        self.inner.observable.trigger();
        disposed
    }

    /// Remove `key`, disposing its value before subscribers run.
    ///
    /// # Errors
    ///
    /// Disposal failure of the removed value, reported after notifying.
    pub fn remove(&self, key: &str) -> Result<()> {
        let Some(prev) = self.inner.fields.remove(key) else {
            return Ok(());
        };
        let disposed = deinit(&prev);
        self.inner.observable.trigger();
        disposed
    }

    /// Apply every write inside one pause, so subscribers are notified once.
    ///
    /// # Errors
    ///
    /// The first disposal failure; the remaining writes are still applied.
    pub fn assign<K: Into<String>>(&self, entries: impl IntoIterator<Item = (K, Value)>) -> Result<()> {
        batch(|| {
            let mut first: Option<Error> = None;
            for (key, value) in entries {
                if let Err(err) = self.set(key, value) {
                    first.get_or_insert(err);
                }
            }
            first.map_or(Ok(()), Err)
        })
    }

    #[must_use]
    pub fn observable(&self) -> &Observable {
        &self.inner.observable
    }

    pub fn subscribe(&self, callback: impl Fn() + 'static) -> Subscription {
        self.inner.observable.subscribe(callback)
    }

    /// Revoke subscribers, then dispose every field.
    ///
    /// # Errors
    ///
    /// The first disposal failure.
    pub fn deinit(&self) -> Result<()> {
        self.inner.observable.deinit();
        deinit_all(&self.inner.fields)
    }
}

impl Default for Record {
    fn default() -> Self {
        Self::new()
    }
}

impl Subscribable for Record {
    fn observable(&self) -> &Observable {
        &self.inner.observable
    }
}

impl Dereferenceable for Record {
    type Target = Value;

    fn deref_with<R>(&self, f: impl FnOnce(&Value) -> R) -> R {
        f(&self.inner.view)
    }
}

impl Disposable for Record {
    fn deinit(&self) -> Result<()> {
        Record::deinit(self)
    }
}

impl fmt::Debug for Record {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Record")
            .field("keys", &self.inner.fields.keys())
            .field("observable", &self.inner.observable)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lifetime::Path;
    use crate::lifetime::testing::{Probe, res};
    use crate::reactive::{Reaction, computation, path_query};
    use std::cell::Cell;
    use std::panic::{self, AssertUnwindSafe};

    fn counted(record: &Record) -> Rc<Cell<u32>> {
        let count = Rc::new(Cell::new(0));
        let c = Rc::clone(&count);
        let _sub = record.subscribe(move || c.set(c.get() + 1));
        count
    }

    #[test]
    fn set_notifies_on_change_only() {
        let record = Record::new();
        let count = counted(&record);

        record.set("x", Value::Int(1)).unwrap();
        record.set("x", Value::Int(1)).unwrap();
        assert_eq!(count.get(), 1);
        record.set("x", Value::Int(2)).unwrap();
        assert_eq!(count.get(), 2);
        assert_eq!(record.peek("x").as_int(), Some(2));
    }

    #[test]
    fn set_disposes_replaced_value() {
        let old = Probe::new();
        let record = Record::from_entries([("conn", res(&old))]);
        record.set("conn", Value::Nil).unwrap();
        assert_eq!(old.count(), 1);
    }

    #[test]
    fn nil_on_absent_key_is_silent() {
        let record = Record::new();
        let count = counted(&record);

        record.set("missing", Value::Nil).unwrap();
        assert_eq!(count.get(), 0);
        assert!(record.is_empty());
    }

    #[test]
    fn replaced_value_is_disposed_when_a_subscriber_panics() {
        let old = Probe::new();
        let gone = Probe::new();
        let record = Record::from_entries([("conn", res(&old)), ("tmp", res(&gone))]);
        let _sub = record.subscribe(|| panic!("subscriber failed"));

        let set = panic::catch_unwind(AssertUnwindSafe(|| record.set("conn", Value::Int(1))));
        assert!(set.is_err());
        assert_eq!(old.count(), 1);

        let removed = panic::catch_unwind(AssertUnwindSafe(|| record.remove("tmp")));
        assert!(removed.is_err());
        assert_eq!(gone.count(), 1);
    }

    #[test]
    fn remove_disposes_and_notifies() {
        let probe = Probe::new();
        let record = Record::from_entries([("conn", res(&probe))]);
        let count = counted(&record);

        record.remove("conn").unwrap();
        record.remove("conn").unwrap();
        assert_eq!(probe.count(), 1);
        assert_eq!(count.get(), 1);
        assert!(record.is_empty());
    }

    #[test]
    fn assign_coalesces_notifications() {
        let record = Record::new();
        let count = counted(&record);

        record
            .assign([
                ("a", Value::Int(1)),
                ("b", Value::Int(2)),
                ("c", Value::Int(3)),
            ])
            .unwrap();
        assert_eq!(count.get(), 1);
        assert_eq!(record.len(), 3);
    }

    #[test]
    fn assign_keeps_going_after_disposal_failure() {
        let bad = Probe::failing();
        let record = Record::from_entries([("a", res(&bad))]);

        let err = record
            .assign([("a", Value::Int(1)), ("b", Value::Int(2))])
            .unwrap_err();
        assert_eq!(err, Error::disposal("probe refused"));
        assert_eq!(record.peek("b").as_int(), Some(2));
    }

    #[test]
    fn reads_are_tracked() {
        let record = Record::from_entries([("n", Value::Int(1))]);
        let runs = Rc::new(Cell::new(0));
        let (r, n) = (record.clone(), Rc::clone(&runs));
        let reaction = Reaction::spawn_loop(move || {
            n.set(n.get() + 1);
            let _ = r.get("n");
        })
        .unwrap();

        record.set("n", Value::Int(2)).unwrap();
        assert_eq!(runs.get(), 2);
        reaction.deinit();
    }

    #[test]
    fn computation_over_record() {
        let record = Record::from_entries([("w", Value::Int(2)), ("h", Value::Int(3))]);
        let r = record.clone();
        let area = computation(move || {
            r.get("w").as_int().unwrap_or(0) * r.get("h").as_int().unwrap_or(0)
        });
        assert_eq!(area.get(), 6);

        record
            .assign([("w", Value::Int(4)), ("h", Value::Int(5))])
            .unwrap();
        assert_eq!(area.get(), 20);
    }

    #[test]
    fn path_query_over_record() {
        let record = Record::from_entries([("user", Value::map([("name", Value::str("ada"))]))]);
        let name = path_query(record.clone(), Path::new().key("user").key("name"));
        assert_eq!(name.get().as_str(), Some("ada"));

        record
            .set("user", Value::map([("name", Value::str("grace"))]))
            .unwrap();
        assert_eq!(name.get().as_str(), Some("grace"));
    }

    #[test]
    fn deinit_disposes_fields_and_revokes() {
        let a = Probe::new();
        let b = Probe::new();
        let record = Record::from_entries([("a", res(&a)), ("b", res(&b))]);
        let count = counted(&record);

        record.deinit().unwrap();
        assert_eq!((a.count(), b.count()), (1, 1));
        assert_eq!(record.observable().subscriber_count(), 0);
        record.set("c", Value::Int(1)).unwrap();
        assert_eq!(count.get(), 0);
    }
}
