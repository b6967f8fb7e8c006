#![forbid(unsafe_code)]

//! Identity-style equality used to gate notifications.
//!
//! [`SameValue`] is the default change test for atoms, computations and
//! queries: scalars compare by value with `NaN` equal to itself, shared
//! pointers compare by address. A reset with a value that is the "same" as the
//! current one is not a change and triggers nothing.

use std::rc::Rc;

/// Equality where `NaN` is equal to itself and shared pointers compare by
/// identity.
pub trait SameValue {
    fn same_value(&self, other: &Self) -> bool;
}

/// Free-function form of [`SameValue::same_value`], usable as an equality
/// callback.
#[must_use]
pub fn same_value<T: SameValue + ?Sized>(a: &T, b: &T) -> bool {
    a.same_value(b)
}

macro_rules! same_value_by_eq {
    ($($ty:ty),* $(,)?) => {
        $(
            impl SameValue for $ty {
                #[inline]
                fn same_value(&self, other: &Self) -> bool {
                    self == other
                }
            }
        )*
    };
}

same_value_by_eq!(
    (),
    bool,
    char,
    i8,
    i16,
    i32,
    i64,
    i128,
    isize,
    u8,
    u16,
    u32,
    u64,
    u128,
    usize,
    str,
    String,
);

impl SameValue for f32 {
    #[inline]
    fn same_value(&self, other: &Self) -> bool {
        self == other || (self.is_nan() && other.is_nan())
    }
}

impl SameValue for f64 {
    #[inline]
    fn same_value(&self, other: &Self) -> bool {
        self == other || (self.is_nan() && other.is_nan())
    }
}

impl<T: ?Sized> SameValue for Rc<T> {
    #[inline]
    fn same_value(&self, other: &Self) -> bool {
        Rc::ptr_eq(self, other)
    }
}

impl<T: SameValue> SameValue for Option<T> {
    fn same_value(&self, other: &Self) -> bool {
        match (self, other) {
            (Some(a), Some(b)) => a.same_value(b),
            (None, None) => true,
            _ => false,
        }
    }
}

impl<T: SameValue> SameValue for [T] {
    fn same_value(&self, other: &Self) -> bool {
        self.len() == other.len() && self.iter().zip(other).all(|(a, b)| a.same_value(b))
    }
}

impl<T: SameValue> SameValue for Vec<T> {
    fn same_value(&self, other: &Self) -> bool {
        self.as_slice().same_value(other.as_slice())
    }
}

impl<A: SameValue, B: SameValue> SameValue for (A, B) {
    fn same_value(&self, other: &Self) -> bool {
        self.0.same_value(&other.0) && self.1.same_value(&other.1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn nan_is_self_equal() {
        assert!(f64::NAN.same_value(&f64::NAN));
        assert!(f32::NAN.same_value(&f32::NAN));
        assert!(!f64::NAN.same_value(&1.0));
        assert!(0.5f64.same_value(&0.5));
    }

    #[test]
    fn rc_compares_by_identity() {
        let a = Rc::new(String::from("x"));
        let b = Rc::new(String::from("x"));
        assert!(a.same_value(&Rc::clone(&a)));
        assert!(!a.same_value(&b));
    }

    #[test]
    fn containers_compare_elementwise() {
        assert!(vec![f64::NAN, 1.0].same_value(&vec![f64::NAN, 1.0]));
        assert!(!vec![1, 2].same_value(&vec![1]));
        assert!(Some(3).same_value(&Some(3)));
        assert!(!Some(3).same_value(&None));
        assert!((1, "a".to_string()).same_value(&(1, "a".to_string())));
    }
}
