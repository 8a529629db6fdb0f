#![forbid(unsafe_code)]

//! Reconciliation trace.
//!
//! Every root records what its work loop did: passes started, yielded,
//! interrupted, suspended and committed, callbacks requested from the host
//! scheduler, dependencies pinged and retried. Entries carry a monotonic
//! sequence number and a tick in microseconds of scheduler time since the
//! root was created, so a run driven by
//! [`ManualScheduler`](crate::ManualScheduler) produces a byte-identical
//! trace every time.
//!
//! Traces hash with FNV-1a for golden comparisons and export to JSONL.

use std::collections::VecDeque;
use std::fmt;
use std::time::Instant;

use frx_core::{Lanes, SchedulerPriority};

bitflags::bitflags! {
    /// Which event families are recorded.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct TraceCategories: u8 {
        const RENDER = 1 << 0;
        const COMMIT = 1 << 1;
        const SCHEDULE = 1 << 2;
        const SUSPENSE = 1 << 3;
        const ERRORS = 1 << 4;
    }
}

impl Default for TraceCategories {
    fn default() -> Self {
        Self::all()
    }
}

/// One thing the work loop did.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
#[cfg_attr(feature = "serde", serde(tag = "event", rename_all = "snake_case"))]
pub enum ReconcileEvent {
    /// A fresh pass was prepared.
    RenderStarted { lanes: Lanes, sync: bool },
    /// The pass yielded to the host after `units` work units.
    RenderYielded { lanes: Lanes, units: u64 },
    /// The in-progress pass was thrown away. `by` is empty when abandoned
    /// without a competing lane.
    RenderInterrupted { lanes: Lanes, by: Lanes },
    /// The pass finished its tree.
    RenderCompleted { lanes: Lanes, units: u64 },
    /// A component suspended.
    Suspended {
        lanes: Lanes,
        dependency: u64,
        boundary: bool,
    },
    /// The root parked a pass instead of committing.
    Parked { lanes: Lanes, delayed: bool },
    /// A dependency resolved while lanes were suspended on it.
    Pinged { dependency: u64, lanes: Lanes },
    /// A suspense boundary was scheduled for retry.
    RetryScheduled { dependency: u64, lane: Lanes },
    /// A pass committed.
    Committed {
        lanes: Lanes,
        effects: usize,
        deletions: usize,
    },
    /// Deferred passive effects ran.
    PassiveFlushed { unmounts: usize, mounts: usize },
    /// A host callback was requested.
    CallbackScheduled {
        priority: SchedulerPriority,
        delay_ms: u64,
    },
    /// The scheduled host callback was cancelled.
    CallbackCancelled,
    /// An error was captured by a boundary or reached the root.
    ErrorCaptured {
        component: String,
        message: String,
        handled: bool,
    },
}

impl ReconcileEvent {
    fn category(&self) -> TraceCategories {
        match self {
            Self::RenderStarted { .. }
            | Self::RenderYielded { .. }
            | Self::RenderInterrupted { .. }
            | Self::RenderCompleted { .. } => TraceCategories::RENDER,
            Self::Suspended { .. }
            | Self::Parked { .. }
            | Self::Pinged { .. }
            | Self::RetryScheduled { .. } => TraceCategories::SUSPENSE,
            Self::Committed { .. } | Self::PassiveFlushed { .. } => TraceCategories::COMMIT,
            Self::CallbackScheduled { .. } | Self::CallbackCancelled => TraceCategories::SCHEDULE,
            Self::ErrorCaptured { .. } => TraceCategories::ERRORS,
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Self::RenderStarted { .. } => "render_started",
            Self::RenderYielded { .. } => "render_yielded",
            Self::RenderInterrupted { .. } => "render_interrupted",
            Self::RenderCompleted { .. } => "render_completed",
            Self::Suspended { .. } => "suspended",
            Self::Parked { .. } => "parked",
            Self::Pinged { .. } => "pinged",
            Self::RetryScheduled { .. } => "retry_scheduled",
            Self::Committed { .. } => "committed",
            Self::PassiveFlushed { .. } => "passive_flushed",
            Self::CallbackScheduled { .. } => "callback_scheduled",
            Self::CallbackCancelled => "callback_cancelled",
            Self::ErrorCaptured { .. } => "error_captured",
        }
    }
}

/// A sequenced trace entry.
#[derive(Debug, Clone, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize))]
pub struct TraceEntry {
    /// Monotonic sequence number.
    pub seq: u64,
    /// Scheduler time since root creation, in microseconds.
    pub tick: u64,
    pub event: ReconcileEvent,
}

impl TraceEntry {
    /// Serialize to one JSONL line.
    pub fn to_jsonl(&self) -> String {
        let details = match &self.event {
            ReconcileEvent::RenderStarted { lanes, sync } => {
                format!("\"lanes\":{},\"sync\":{}", lanes.bits(), sync)
            }
            ReconcileEvent::RenderYielded { lanes, units }
            | ReconcileEvent::RenderCompleted { lanes, units } => {
                format!("\"lanes\":{},\"units\":{}", lanes.bits(), units)
            }
            ReconcileEvent::RenderInterrupted { lanes, by } => {
                format!("\"lanes\":{},\"by\":{}", lanes.bits(), by.bits())
            }
            ReconcileEvent::Suspended {
                lanes,
                dependency,
                boundary,
            } => format!(
                "\"lanes\":{},\"dependency\":{},\"boundary\":{}",
                lanes.bits(),
                dependency,
                boundary
            ),
            ReconcileEvent::Parked { lanes, delayed } => {
                format!("\"lanes\":{},\"delayed\":{}", lanes.bits(), delayed)
            }
            ReconcileEvent::Pinged { dependency, lanes } => {
                format!("\"dependency\":{},\"lanes\":{}", dependency, lanes.bits())
            }
            ReconcileEvent::RetryScheduled { dependency, lane } => {
                format!("\"dependency\":{},\"lane\":{}", dependency, lane.bits())
            }
            ReconcileEvent::Committed {
                lanes,
                effects,
                deletions,
            } => format!(
                "\"lanes\":{},\"effects\":{},\"deletions\":{}",
                lanes.bits(),
                effects,
                deletions
            ),
            ReconcileEvent::PassiveFlushed { unmounts, mounts } => {
                format!("\"unmounts\":{},\"mounts\":{}", unmounts, mounts)
            }
            ReconcileEvent::CallbackScheduled { priority, delay_ms } => {
                format!("\"priority\":\"{}\",\"delay_ms\":{}", priority, delay_ms)
            }
            ReconcileEvent::CallbackCancelled => String::new(),
            ReconcileEvent::ErrorCaptured {
                component,
                message,
                handled,
            } => format!(
                "\"component\":\"{}\",\"message\":\"{}\",\"handled\":{}",
                escape(component),
                escape(message),
                handled
            ),
        };
        let sep = if details.is_empty() { "" } else { "," };
        format!(
            "{{\"seq\":{},\"tick\":{},\"event\":\"{}\"{}{}}}",
            self.seq,
            self.tick,
            self.event.name(),
            sep,
            details
        )
    }
}

fn escape(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\r' => out.push_str("\\r"),
            '\t' => out.push_str("\\t"),
            c if (c as u32) < 0x20 => out.push_str(&format!("\\u{:04x}", c as u32)),
            c => out.push(c),
        }
    }
    out
}

/// Trace recorder settings.
#[derive(Debug, Clone)]
pub struct TraceConfig {
    pub enabled: bool,
    /// Maximum entries to retain (0 = unlimited).
    pub max_entries: usize,
    pub categories: TraceCategories,
}

impl Default for TraceConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_entries: 4_096,
            categories: TraceCategories::all(),
        }
    }
}

impl TraceConfig {
    #[must_use]
    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    #[must_use]
    pub fn with_max_entries(mut self, max: usize) -> Self {
        self.max_entries = max;
        self
    }

    #[must_use]
    pub fn with_categories(mut self, categories: TraceCategories) -> Self {
        self.categories = categories;
        self
    }
}

/// Per-root trace recorder.
#[derive(Debug, Clone)]
pub struct ReconcileTrace {
    config: TraceConfig,
    entries: VecDeque<TraceEntry>,
    seq: u64,
    origin: Instant,
}

impl ReconcileTrace {
    /// Recorder whose ticks count from `origin`.
    pub fn new(config: TraceConfig, origin: Instant) -> Self {
        let capacity = if config.max_entries > 0 {
            config.max_entries.min(1024)
        } else {
            1024
        };
        Self {
            config,
            entries: VecDeque::with_capacity(capacity),
            seq: 0,
            origin,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    /// Record `event` at scheduler time `now`.
    pub fn record(&mut self, now: Instant, event: ReconcileEvent) {
        if !self.config.enabled || !self.config.categories.contains(event.category()) {
            return;
        }
        let tick = now.saturating_duration_since(self.origin).as_micros() as u64;
        let entry = TraceEntry {
            seq: self.seq,
            tick,
            event,
        };
        self.seq += 1;
        if self.config.max_entries > 0 && self.entries.len() >= self.config.max_entries {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn entries(&self) -> &VecDeque<TraceEntry> {
        &self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop all entries; sequence numbers restart at zero.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.seq = 0;
    }

    /// Entries of one kind, by event name (e.g. `"committed"`).
    pub fn count(&self, name: &str) -> usize {
        self.entries.iter().filter(|e| e.event.name() == name).count()
    }

    /// Export to JSONL.
    #[must_use]
    pub fn to_jsonl(&self) -> String {
        self.entries
            .iter()
            .map(TraceEntry::to_jsonl)
            .collect::<Vec<_>>()
            .join("\n")
    }

    /// Export to a JSON array via serde.
    #[cfg(feature = "serde")]
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(&self.entries)
    }

    /// FNV-1a checksum over the JSONL form.
    #[must_use]
    pub fn checksum(&self) -> u64 {
        const FNV_OFFSET: u64 = 0xcbf29ce484222325;
        const FNV_PRIME: u64 = 0x100000001b3;

        let mut hash = FNV_OFFSET;
        for entry in &self.entries {
            for byte in entry.to_jsonl().bytes().chain(std::iter::once(b'\n')) {
                hash ^= byte as u64;
                hash = hash.wrapping_mul(FNV_PRIME);
            }
        }
        hash
    }

    #[must_use]
    pub fn checksum_hex(&self) -> String {
        format!("{:016x}", self.checksum())
    }
}

impl fmt::Display for ReconcileTrace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_jsonl())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn sample(trace: &mut ReconcileTrace, origin: Instant) {
        trace.record(
            origin,
            ReconcileEvent::RenderStarted {
                lanes: Lanes::DEFAULT,
                sync: false,
            },
        );
        trace.record(
            origin + Duration::from_millis(3),
            ReconcileEvent::Committed {
                lanes: Lanes::DEFAULT,
                effects: 2,
                deletions: 0,
            },
        );
    }

    #[test]
    fn ordering_and_ticks() {
        let origin = Instant::now();
        let mut trace = ReconcileTrace::new(TraceConfig::default(), origin);
        sample(&mut trace, origin);
        let entries: Vec<_> = trace.entries().iter().collect();
        assert_eq!(entries[0].seq, 0);
        assert_eq!(entries[1].seq, 1);
        assert_eq!(entries[1].tick, 3_000);
    }

    #[test]
    fn checksum_is_stable_and_order_sensitive() {
        let origin = Instant::now();
        let mut a = ReconcileTrace::new(TraceConfig::default(), origin);
        let mut b = ReconcileTrace::new(TraceConfig::default(), origin);
        sample(&mut a, origin);
        sample(&mut b, origin);
        assert_eq!(a.checksum_hex(), b.checksum_hex());

        let mut c = ReconcileTrace::new(TraceConfig::default(), origin);
        c.record(origin, ReconcileEvent::CallbackCancelled);
        sample(&mut c, origin);
        assert_ne!(a.checksum(), c.checksum());
    }

    #[test]
    fn jsonl_format() {
        let origin = Instant::now();
        let mut trace = ReconcileTrace::new(TraceConfig::default(), origin);
        trace.record(
            origin,
            ReconcileEvent::ErrorCaptured {
                component: "Leaf".into(),
                message: "said \"no\"".into(),
                handled: true,
            },
        );
        trace.record(origin, ReconcileEvent::CallbackCancelled);
        let jsonl = trace.to_jsonl();
        let lines: Vec<_> = jsonl.lines().collect();
        assert_eq!(
            lines[0],
            r#"{"seq":0,"tick":0,"event":"error_captured","component":"Leaf","message":"said \"no\"","handled":true}"#
        );
        assert_eq!(lines[1], r#"{"seq":1,"tick":0,"event":"callback_cancelled"}"#);
    }

    #[test]
    fn max_entries_and_categories() {
        let origin = Instant::now();
        let config = TraceConfig::default()
            .with_max_entries(2)
            .with_categories(TraceCategories::RENDER);
        let mut trace = ReconcileTrace::new(config, origin);
        for units in 0..5 {
            trace.record(
                origin,
                ReconcileEvent::RenderYielded {
                    lanes: Lanes::DEFAULT,
                    units,
                },
            );
        }
        trace.record(origin, ReconcileEvent::CallbackCancelled);
        assert_eq!(trace.len(), 2);
        assert_eq!(trace.entries()[0].seq, 3);
        assert_eq!(trace.count("callback_cancelled"), 0);
    }

    #[test]
    fn disabled_records_nothing() {
        let origin = Instant::now();
        let mut trace = ReconcileTrace::new(TraceConfig::default().with_enabled(false), origin);
        sample(&mut trace, origin);
        assert!(trace.is_empty());
    }
}
