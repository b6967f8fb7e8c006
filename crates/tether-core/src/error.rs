#![forbid(unsafe_code)]

//! Error type shared by every fallible engine operation.
//!
//! Usage errors (overlapping runs, dead reference counts) are programmer
//! errors: they are returned synchronously at the call site and are not
//! expected to be recovered from. Disposal errors come from user resources
//! and are only surfaced after the surrounding drain has finished.

use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Error {
    #[error("unexpected overlapping reaction run")]
    OverlappingRun,

    #[error("can't {op} a dead reference")]
    DeadReference { op: &'static str },

    #[error("can't decrement a reference count that is already zero")]
    NoReferences,

    #[error("lazy reference constructor re-entered its own rc()")]
    LazyReentry,

    #[error("disposal failed: {message}")]
    Disposal { message: String },

    #[error("runaway cascade: {sweeps} re-entrant sweeps exceeded the limit of {limit}")]
    RunawayCascade { sweeps: usize, limit: usize },
}

impl Error {
    #[must_use]
    pub fn disposal(message: impl Into<String>) -> Self {
        Self::Disposal {
            message: message.into(),
        }
    }

    #[must_use]
    pub const fn dead(op: &'static str) -> Self {
        Self::DeadReference { op }
    }

    /// Whether this error is a programmer error rather than a resource failure.
    #[must_use]
    pub const fn is_usage_error(&self) -> bool {
        !matches!(self, Self::Disposal { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_messages() {
        assert_eq!(
            Error::OverlappingRun.to_string(),
            "unexpected overlapping reaction run"
        );
        assert_eq!(
            Error::dead("deref").to_string(),
            "can't deref a dead reference"
        );
        assert_eq!(
            Error::disposal("socket busy").to_string(),
            "disposal failed: socket busy"
        );
    }

    #[test]
    fn usage_classification() {
        assert!(Error::OverlappingRun.is_usage_error());
        assert!(Error::NoReferences.is_usage_error());
        assert!(!Error::disposal("x").is_usage_error());
    }
}
