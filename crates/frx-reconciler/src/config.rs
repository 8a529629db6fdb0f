#![forbid(unsafe_code)]

//! Reconciler configuration.
//!
//! # Environment overrides
//!
//! [`ReconcilerConfig::with_env_overrides`] reads:
//!
//! | Variable                  | Effect                                   |
//! |---------------------------|------------------------------------------|
//! | `FRX_TRACE`               | enable (`1`/`true`/`on`) or disable trace |
//! | `FRX_TRACE_MAX_ENTRIES`   | ring-buffer size of the trace            |
//! | `FRX_CATCH_PANICS`        | convert component panics to errors       |
//! | `FRX_SUSPENSE_TIMEOUT_MS` | delayed-fallback timeout                 |

use std::str::FromStr;
use std::time::Duration;

use frx_core::LaneTimeouts;

use crate::trace::TraceConfig;

/// Tunables for one root.
#[derive(Debug, Clone)]
pub struct ReconcilerConfig {
    /// Starvation timeouts per lane class.
    pub lane_timeouts: LaneTimeouts,
    /// How long a transition keeps already-visible content on screen before
    /// committing a suspense fallback.
    pub suspense_timeout: Duration,
    /// Catch panics in components and effects and treat them as errors.
    pub catch_panics: bool,
    /// Consecutive synchronous commits triggered from commit-phase effects
    /// before [`ReconcileError::MaxUpdateDepth`](crate::ReconcileError::MaxUpdateDepth).
    pub max_nested_sync_commits: u32,
    /// Recovery attempts an error boundary allows before staying failed.
    pub max_recovery_attempts: u32,
    /// Reconciliation trace recorder.
    pub trace: TraceConfig,
    /// Number of recent [`CommitSummary`](crate::CommitSummary) values retained.
    pub commit_log_capacity: usize,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            lane_timeouts: LaneTimeouts::default(),
            suspense_timeout: Duration::from_millis(500),
            catch_panics: true,
            max_nested_sync_commits: 50,
            max_recovery_attempts: 3,
            trace: TraceConfig::default(),
            commit_log_capacity: 16,
        }
    }
}

impl ReconcilerConfig {
    #[must_use]
    pub fn with_lane_timeouts(mut self, timeouts: LaneTimeouts) -> Self {
        self.lane_timeouts = timeouts;
        self
    }

    #[must_use]
    pub fn with_suspense_timeout(mut self, timeout: Duration) -> Self {
        self.suspense_timeout = timeout;
        self
    }

    #[must_use]
    pub fn with_catch_panics(mut self, catch: bool) -> Self {
        self.catch_panics = catch;
        self
    }

    #[must_use]
    pub fn with_max_nested_sync_commits(mut self, limit: u32) -> Self {
        self.max_nested_sync_commits = limit;
        self
    }

    #[must_use]
    pub fn with_max_recovery_attempts(mut self, attempts: u32) -> Self {
        self.max_recovery_attempts = attempts;
        self
    }

    #[must_use]
    pub fn with_trace(mut self, trace: TraceConfig) -> Self {
        self.trace = trace;
        self
    }

    #[must_use]
    pub fn with_commit_log_capacity(mut self, capacity: usize) -> Self {
        self.commit_log_capacity = capacity;
        self
    }

    /// Apply `FRX_*` environment overrides.
    #[must_use]
    pub fn with_env_overrides(self) -> Self {
        self.with_overrides_from(|name| std::env::var(name).ok())
    }

    /// Apply overrides from an arbitrary lookup (same keys as the environment).
    #[must_use]
    pub fn with_overrides_from(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(enabled) = flag(lookup("FRX_TRACE")) {
            self.trace.enabled = enabled;
        }
        if let Some(max) = number::<usize>(lookup("FRX_TRACE_MAX_ENTRIES")) {
            self.trace.max_entries = max;
        }
        if let Some(catch) = flag(lookup("FRX_CATCH_PANICS")) {
            self.catch_panics = catch;
        }
        if let Some(ms) = number::<u64>(lookup("FRX_SUSPENSE_TIMEOUT_MS")) {
            self.suspense_timeout = Duration::from_millis(ms);
        }
        self
    }
}

fn flag(value: Option<String>) -> Option<bool> {
    let value = value?;
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return None;
    }
    Some(matches!(
        trimmed,
        "1" | "true" | "TRUE" | "True" | "yes" | "YES" | "on" | "ON"
    ))
}

/// Values that do not fit the target type are ignored.
fn number<T: FromStr>(value: Option<String>) -> Option<T> {
    value.and_then(|v| v.trim().parse::<T>().ok())
}
