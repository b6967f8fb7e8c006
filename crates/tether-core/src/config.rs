#![forbid(unsafe_code)]

//! Engine configuration.
//!
//! The engine is single-threaded, so configuration is installed per thread
//! with [`configure`] and read back with [`config`]. Defaults are generous
//! enough that well-behaved graphs never hit a limit; the limits exist to turn
//! a runaway cascade into a loud failure instead of a hang.
//!
//! # Environment
//!
//! [`EngineConfig::from_env`] honors:
//!
//! - `TETHER_MAX_DRAIN_SWEEPS`
//! - `TETHER_MAX_FLUSH_ROUNDS`
//! - `TETHER_TRACE_NOTIFICATIONS` (`1`, `true`, `yes`, `on`)

use std::cell::Cell;
use std::env;

/// Default bound on re-entrant sweeps per observable drain.
pub const DEFAULT_MAX_DRAIN_SWEEPS: usize = 100_000;

/// Default bound on scheduler flush rounds at the outermost resume.
pub const DEFAULT_MAX_FLUSH_ROUNDS: usize = 10_000;

/// Configuration for the reactive engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EngineConfig {
    /// Maximum number of sweeps a single observable drain may perform,
    /// counting sweeps queued by re-entrant triggers.
    pub max_drain_sweeps: usize,
    /// Maximum number of rounds the scheduler performs when flushing.
    pub max_flush_rounds: usize,
    /// Emit a `TRACE` event for every notification sweep.
    pub trace_notifications: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_drain_sweeps: DEFAULT_MAX_DRAIN_SWEEPS,
            max_flush_rounds: DEFAULT_MAX_FLUSH_ROUNDS,
            trace_notifications: false,
        }
    }
}

impl EngineConfig {
    /// Build a config from defaults overridden by `TETHER_*` variables.
    #[must_use]
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(val) = env_usize("TETHER_MAX_DRAIN_SWEEPS") {
            config.max_drain_sweeps = val;
        }
        if let Some(val) = env_usize("TETHER_MAX_FLUSH_ROUNDS") {
            config.max_flush_rounds = val;
        }
        if let Ok(val) = env::var("TETHER_TRACE_NOTIFICATIONS") {
            config.trace_notifications = parse_flag(&val);
        }
        config
    }

    /// Set the drain sweep limit. Zero is clamped to one.
    #[must_use]
    pub fn with_max_drain_sweeps(mut self, limit: usize) -> Self {
        self.max_drain_sweeps = limit.max(1);
        self
    }

    /// Set the flush round limit. Zero is clamped to one.
    #[must_use]
    pub fn with_max_flush_rounds(mut self, limit: usize) -> Self {
        self.max_flush_rounds = limit.max(1);
        self
    }

    /// Toggle per-sweep trace events.
    #[must_use]
    pub fn with_trace_notifications(mut self, enabled: bool) -> Self {
        self.trace_notifications = enabled;
        self
    }
}

thread_local! {
    static CONFIG: Cell<EngineConfig> = Cell::new(EngineConfig::default());
}

/// Install `config` for the current thread, returning the previous one.
pub fn configure(config: EngineConfig) -> EngineConfig {
    CONFIG.with(|cell| cell.replace(config))
}

/// The configuration active on the current thread.
#[must_use]
pub fn config() -> EngineConfig {
    CONFIG.with(Cell::get)
}

fn env_usize(key: &str) -> Option<usize> {
    env::var(key).ok()?.trim().parse().ok()
}

fn parse_flag(val: &str) -> bool {
    matches!(
        val.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.max_drain_sweeps, DEFAULT_MAX_DRAIN_SWEEPS);
        assert_eq!(config.max_flush_rounds, DEFAULT_MAX_FLUSH_ROUNDS);
        assert!(!config.trace_notifications);
    }

    #[test]
    fn builders_clamp_zero() {
        let config = EngineConfig::default()
            .with_max_drain_sweeps(0)
            .with_max_flush_rounds(0)
            .with_trace_notifications(true);
        assert_eq!(config.max_drain_sweeps, 1);
        assert_eq!(config.max_flush_rounds, 1);
        assert!(config.trace_notifications);
    }

    #[test]
    fn configure_returns_previous() {
        let custom = EngineConfig::default().with_max_drain_sweeps(7);
        let prev = configure(custom);
        assert_eq!(config().max_drain_sweeps, 7);
        configure(prev);
        assert_eq!(config(), prev);
    }

    #[test]
    fn flag_parsing() {
        assert!(parse_flag("1"));
        assert!(parse_flag(" TRUE "));
        assert!(parse_flag("on"));
        assert!(!parse_flag("0"));
        assert!(!parse_flag("nope"));
    }
}
