// src/diagnostics.rs
// Rate-limited reporting of malformed upstream data and the debug snapshot

use crate::types::PriceRange;
use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::warn;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueClass {
    NonFiniteBounds,
    MissingIdentity,
    DuplicateIdentity,
    MissingField,
    BadTimestamp,
    UnknownTimeframe,
    OutOfOrderBar,
    InvalidSession,
}

impl fmt::Display for IssueClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            IssueClass::NonFiniteBounds => "non_finite_bounds",
            IssueClass::MissingIdentity => "missing_identity",
            IssueClass::DuplicateIdentity => "duplicate_identity",
            IssueClass::MissingField => "missing_field",
            IssueClass::BadTimestamp => "bad_timestamp",
            IssueClass::UnknownTimeframe => "unknown_timeframe",
            IssueClass::OutOfOrderBar => "out_of_order_bar",
            IssueClass::InvalidSession => "invalid_session",
        };
        f.write_str(s)
    }
}

/// One warning per issue class per interval; everything in between is counted.
#[derive(Debug)]
pub struct RateLimitedLog {
    interval: Duration,
    last_emitted: HashMap<IssueClass, Instant>,
    suppressed: HashMap<IssueClass, u64>,
}

impl RateLimitedLog {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last_emitted: HashMap::new(),
            suppressed: HashMap::new(),
        }
    }

    /// Returns true when a warning for `class` may be emitted at `now`.
    pub fn should_emit_at(&mut self, class: IssueClass, now: Instant) -> bool {
        match self.last_emitted.get(&class) {
            Some(last) if now.saturating_duration_since(*last) < self.interval => {
                *self.suppressed.entry(class).or_insert(0) += 1;
                false
            }
            _ => {
                self.last_emitted.insert(class, now);
                true
            }
        }
    }

    pub fn report(&mut self, class: IssueClass, detail: &str) {
        self.report_at(class, detail, Instant::now());
    }

    pub fn report_at(&mut self, class: IssueClass, detail: &str, now: Instant) -> bool {
        if !self.should_emit_at(class, now) {
            return false;
        }
        let suppressed = self.suppressed.remove(&class).unwrap_or(0);
        if suppressed > 0 {
            warn!(
                "⚠️ [DIAG] {}: {} ({} similar issues suppressed)",
                class, detail, suppressed
            );
        } else {
            warn!("⚠️ [DIAG] {}: {}", class, detail);
        }
        true
    }

    pub fn suppressed_count(&self, class: IssueClass) -> u64 {
        self.suppressed.get(&class).copied().unwrap_or(0)
    }

    pub fn reset(&mut self) {
        self.last_emitted.clear();
        self.suppressed.clear();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DragPhase {
    Idle,
    Armed,
    Engaged,
    Released,
}

/// Read-only view exposed only when the debug flag is set.
#[derive(Debug, Clone, Serialize)]
pub struct EngineDiagnostics {
    pub manual_range: Option<PriceRange>,
    pub auto_range: Option<PriceRange>,
    pub drag_phase: DragPhase,
    pub drag_engaged: bool,
    pub deferred_gesture: bool,
    pub frozen_zones: usize,
    pub frozen_clusters: usize,
    pub primitives: usize,
    pub generation: u64,
    pub stale_relayouts: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_per_class() {
        let mut log = RateLimitedLog::new(Duration::from_secs(5));
        let t0 = Instant::now();

        assert!(log.report_at(IssueClass::NonFiniteBounds, "zone a", t0));
        assert!(!log.report_at(IssueClass::NonFiniteBounds, "zone b", t0 + Duration::from_secs(1)));
        assert!(!log.report_at(IssueClass::NonFiniteBounds, "zone c", t0 + Duration::from_secs(4)));
        assert_eq!(log.suppressed_count(IssueClass::NonFiniteBounds), 2);

        // A different class is not throttled by the first one
        assert!(log.report_at(IssueClass::DuplicateIdentity, "dup", t0 + Duration::from_secs(1)));

        assert!(log.report_at(IssueClass::NonFiniteBounds, "zone d", t0 + Duration::from_secs(6)));
        assert_eq!(log.suppressed_count(IssueClass::NonFiniteBounds), 0);
    }
}
