#![forbid(unsafe_code)]

//! Dynamic owned data walked by diff-based disposal.
//!
//! [`Value`] models the open-ended state an [`Agent`](crate::Agent) or a
//! [`Record`](crate::Record) owns: scalars, plain containers, disposable
//! resources, and opaque foreign objects. Only [`List`] and [`Map`] are ever
//! traversed; resources are disposed as a unit and opaque values are left
//! alone.
//!
//! Containers are shared (`Rc<RefCell<..>>`), so the same list can appear at
//! several positions of a tree, or inside itself.

use std::any::Any;
use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fmt;
use std::rc::Rc;

use super::Disposable;
use crate::equality::SameValue;
use crate::error::Result;

/// A dynamically shaped value.
#[derive(Clone, Default)]
pub enum Value {
    #[default]
    Nil,
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(Rc<str>),
    List(List),
    Map(Map),
    Resource(Resource),
    Opaque(Opaque),
}

impl Value {
    #[must_use]
    pub fn str(s: &str) -> Self {
        Self::Str(Rc::from(s))
    }

    #[must_use]
    pub fn list(items: impl IntoIterator<Item = Value>) -> Self {
        Self::List(List::new(items))
    }

    #[must_use]
    pub fn map<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self::Map(Map::from_entries(entries))
    }

    #[must_use]
    pub fn resource(resource: impl Disposable + 'static) -> Self {
        Self::Resource(Resource::new(resource))
    }

    #[must_use]
    pub fn opaque(value: impl Any) -> Self {
        Self::Opaque(Opaque(Rc::new(value)))
    }

    #[must_use]
    pub const fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Identity test: scalars by value (`NaN` equals itself), everything
    /// shared by pointer.
    #[must_use]
    pub fn identical(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Float(a), Self::Float(b)) => a.same_value(b),
            (Self::Str(a), Self::Str(b)) => a == b,
            (Self::List(a), Self::List(b)) => a.ptr_eq(b),
            (Self::Map(a), Self::Map(b)) => a.ptr_eq(b),
            (Self::Resource(a), Self::Resource(b)) => a.ptr_eq(b),
            (Self::Opaque(a), Self::Opaque(b)) => Rc::ptr_eq(&a.0, &b.0),
            _ => false,
        }
    }

    #[must_use]
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Self::Int(n) => Some(*n),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_float(&self) -> Option<f64> {
        match self {
            Self::Float(n) => Some(*n),
            Self::Int(n) => Some(*n as f64),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::Str(s) => Some(s),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_list(&self) -> Option<&List> {
        match self {
            Self::List(list) => Some(list),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_map(&self) -> Option<&Map> {
        match self {
            Self::Map(map) => Some(map),
            _ => None,
        }
    }

    /// One step of a path lookup. Missing entries and non-containers yield
    /// [`Value::Nil`].
    #[must_use]
    pub fn get(&self, segment: &PathSegment) -> Value {
        match (self, segment) {
            (Self::Map(map), PathSegment::Key(key)) => map.get(key).unwrap_or_default(),
            (Self::Map(map), PathSegment::Index(idx)) => {
                map.get(&idx.to_string()).unwrap_or_default()
            }
            (Self::List(list), PathSegment::Index(idx)) => list.get(*idx).unwrap_or_default(),
            (Self::List(list), PathSegment::Key(key)) => key
                .parse::<usize>()
                .ok()
                .and_then(|idx| list.get(idx))
                .unwrap_or_default(),
            _ => Value::Nil,
        }
    }
}

impl SameValue for Value {
    fn same_value(&self, other: &Self) -> bool {
        self.identical(other)
    }
}

impl Disposable for Value {
    fn deinit(&self) -> Result<()> {
        super::deinit(self)
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => f.write_str("Nil"),
            Self::Bool(b) => write!(f, "Bool({b})"),
            Self::Int(n) => write!(f, "Int({n})"),
            Self::Float(n) => write!(f, "Float({n})"),
            Self::Str(s) => write!(f, "Str({s:?})"),
            // Shallow: containers may be cyclic.
            Self::List(list) => write!(f, "List(len={})", list.len()),
            Self::Map(map) => write!(f, "Map(len={})", map.len()),
            Self::Resource(res) => write!(f, "Resource({:p})", Rc::as_ptr(&res.0).cast::<()>()),
            Self::Opaque(op) => write!(f, "Opaque({:p})", Rc::as_ptr(&op.0).cast::<()>()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Self::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Self::Int(i64::from(n))
    }
}

impl From<f64> for Value {
    fn from(n: f64) -> Self {
        Self::Float(n)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Self::str(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Self::Str(Rc::from(s))
    }
}

impl From<List> for Value {
    fn from(list: List) -> Self {
        Self::List(list)
    }
}

impl From<Map> for Value {
    fn from(map: Map) -> Self {
        Self::Map(map)
    }
}

impl From<Resource> for Value {
    fn from(res: Resource) -> Self {
        Self::Resource(res)
    }
}

// ─── Containers ──────────────────────────────────────────────────────────────

/// Shared, mutable, ordered list of values.
#[derive(Clone, Default)]
pub struct List(Rc<RefCell<Vec<Value>>>);

impl List {
    #[must_use]
    pub fn new(items: impl IntoIterator<Item = Value>) -> Self {
        Self(Rc::new(RefCell::new(items.into_iter().collect())))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    #[must_use]
    pub fn get(&self, idx: usize) -> Option<Value> {
        self.0.borrow().get(idx).cloned()
    }

    pub fn push(&self, value: Value) {
        self.0.borrow_mut().push(value);
    }

    /// Replace the item at `idx`, returning the old one. Out-of-range indices
    /// are ignored.
    pub fn set(&self, idx: usize, value: Value) -> Option<Value> {
        let mut items = self.0.borrow_mut();
        let slot = items.get_mut(idx)?;
        Some(std::mem::replace(slot, value))
    }

    /// Snapshot of the current items.
    #[must_use]
    pub fn to_vec(&self) -> Vec<Value> {
        self.0.borrow().clone()
    }

    /// Whether some item is [identical](Value::identical) to `value`.
    #[must_use]
    pub fn contains(&self, value: &Value) -> bool {
        self.0.borrow().iter().any(|item| item.identical(value))
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &List) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }
}

/// Shared, mutable, string-keyed map of values.
#[derive(Clone, Default)]
pub struct Map(Rc<RefCell<BTreeMap<String, Value>>>);

impl Map {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_entries<K: Into<String>>(entries: impl IntoIterator<Item = (K, Value)>) -> Self {
        Self(Rc::new(RefCell::new(
            entries.into_iter().map(|(k, v)| (k.into(), v)).collect(),
        )))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.borrow().is_empty()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<Value> {
        self.0.borrow().get(key).cloned()
    }

    #[must_use]
    pub fn contains_key(&self, key: &str) -> bool {
        self.0.borrow().contains_key(key)
    }

    pub fn insert(&self, key: impl Into<String>, value: Value) -> Option<Value> {
        self.0.borrow_mut().insert(key.into(), value)
    }

    pub fn remove(&self, key: &str) -> Option<Value> {
        self.0.borrow_mut().remove(key)
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.0.borrow().keys().cloned().collect()
    }

    /// Snapshot of the current entries in key order.
    #[must_use]
    pub fn entries(&self) -> Vec<(String, Value)> {
        self.0
            .borrow()
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Map) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }

    pub(crate) fn addr(&self) -> usize {
        Rc::as_ptr(&self.0).cast::<()>() as usize
    }
}

// ─── Leaves ──────────────────────────────────────────────────────────────────

/// A shared disposable leaf. Disposal owns whatever the resource holds, so
/// the walk never descends into it.
#[derive(Clone)]
pub struct Resource(Rc<dyn Disposable>);

impl Resource {
    #[must_use]
    pub fn new(resource: impl Disposable + 'static) -> Self {
        Self(Rc::new(resource))
    }

    #[must_use]
    pub fn from_rc(resource: Rc<dyn Disposable>) -> Self {
        Self(resource)
    }

    pub fn deinit(&self) -> Result<()> {
        self.0.deinit()
    }

    #[must_use]
    pub fn ptr_eq(&self, other: &Resource) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

/// A foreign object. Never traversed, never disposed.
#[derive(Clone)]
pub struct Opaque(Rc<dyn Any>);

impl Opaque {
    #[must_use]
    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.0.downcast_ref()
    }
}

// ─── Paths ───────────────────────────────────────────────────────────────────

/// One step into a [`Value`].
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(key: &str) -> Self {
        Self::Key(key.to_owned())
    }
}

impl From<String> for PathSegment {
    fn from(key: String) -> Self {
        Self::Key(key)
    }
}

impl From<usize> for PathSegment {
    fn from(idx: usize) -> Self {
        Self::Index(idx)
    }
}

/// A fixed sequence of segments.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct Path(Vec<PathSegment>);

impl Path {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn key(mut self, key: impl Into<String>) -> Self {
        self.0.push(PathSegment::Key(key.into()));
        self
    }

    #[must_use]
    pub fn index(mut self, idx: usize) -> Self {
        self.0.push(PathSegment::Index(idx));
        self
    }

    #[must_use]
    pub fn segments(&self) -> &[PathSegment] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl<S: Into<PathSegment>> FromIterator<S> for Path {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self(iter.into_iter().map(Into::into).collect())
    }
}

/// Follow `path` into `value`. Any missing step yields [`Value::Nil`].
#[must_use]
pub fn get_in(value: &Value, path: &Path) -> Value {
    let mut current = value.clone();
    for segment in path.segments() {
        current = current.get(segment);
    }
    current
}
