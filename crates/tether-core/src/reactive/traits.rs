#![forbid(unsafe_code)]

//! Capability traits shared by reactive cells.

use super::observable::Observable;

/// Something that notifies through an [`Observable`].
pub trait Subscribable {
    fn observable(&self) -> &Observable;
}

/// Something that exposes a current value without tracking the read.
pub trait Dereferenceable {
    type Target;

    fn deref_with<R>(&self, f: impl FnOnce(&Self::Target) -> R) -> R;
}

/// A reactive reference: subscribable and dereferenceable.
pub trait ObservableRef: Subscribable + Dereferenceable {}

impl<T: Subscribable + Dereferenceable + ?Sized> ObservableRef for T {}
