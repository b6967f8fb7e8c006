#![forbid(unsafe_code)]

//! Per-callback panic isolation for sweeps and drains.
//!
//! A panicking subscriber must not prevent delivery to the rest of the sweep.
//! Each callback runs under `catch_unwind`; the first payload is kept and
//! resumed once the sweep is over. Later payloads are reported with `warn!`.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

#[derive(Default)]
pub(crate) struct PanicSlot {
    first: Option<Box<dyn Any + Send>>,
    extra: usize,
}

impl PanicSlot {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Run `f`, capturing a panic instead of unwinding.
    pub(crate) fn run(&mut self, f: impl FnOnce()) {
        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(f)) {
            if self.first.is_none() {
                self.first = Some(payload);
            } else {
                self.extra += 1;
            }
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.first.is_none()
    }

    /// Resume the first captured panic, if any.
    pub(crate) fn resume(self, context: &'static str) {
        if self.extra > 0 {
            tracing::warn!(
                context,
                extra = self.extra,
                "additional panics raised after the first were discarded"
            );
        }
        if let Some(payload) = self.first {
            panic::resume_unwind(payload);
        }
    }
}
