// src/bars.rs
// Bar cache owned by the engine: ordered, unique times, live preview kept apart

use crate::diagnostics::IssueClass;
use crate::timeframe::Timeframe;
use crate::types::Bar;
use serde::Serialize;
use tracing::debug;

/// Cheap fingerprint of a bar series used to detect instrument/timeframe switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatasetSignature {
    pub first_time: i64,
    pub last_time: i64,
    pub len: usize,
}

impl DatasetSignature {
    /// Same history start with the tail only growing: a refresh of the same
    /// dataset rather than a different one.
    pub fn is_extension_of(&self, prev: &DatasetSignature) -> bool {
        self.first_time == prev.first_time && self.last_time >= prev.last_time && self.len >= prev.len
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BarUpdate {
    Replaced,
    Appended,
    Rejected,
}

#[derive(Debug, Clone)]
pub struct SetBarsOutcome {
    pub signature: Option<DatasetSignature>,
    pub dataset_changed: bool,
    pub issues: Vec<(IssueClass, String)>,
}

#[derive(Debug, Default)]
pub struct BarCache {
    bars: Vec<Bar>,
    live: Option<Bar>,
}

impl BarCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn live(&self) -> Option<&Bar> {
        self.live.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn signature(&self) -> Option<DatasetSignature> {
        match (self.bars.first(), self.bars.last()) {
            (Some(first), Some(last)) => Some(DatasetSignature {
                first_time: first.time,
                last_time: last.time,
                len: self.bars.len(),
            }),
            _ => None,
        }
    }

    /// Full replacement. Non-finite bars are dropped, the rest sorted by time with
    /// the last occurrence of a duplicated time winning.
    pub fn set_bars(&mut self, bars: Vec<Bar>) -> SetBarsOutcome {
        let prev = self.signature();
        let mut issues = Vec::new();

        let mut clean: Vec<Bar> = Vec::with_capacity(bars.len());
        for bar in bars {
            if bar.is_finite() {
                clean.push(bar);
            } else {
                issues.push((IssueClass::NonFiniteBounds, format!("bar {} has non-finite prices", bar.time)));
            }
        }
        // Stable sort keeps arrival order within equal times
        clean.sort_by_key(|b| b.time);
        let mut deduped: Vec<Bar> = Vec::with_capacity(clean.len());
        for bar in clean {
            match deduped.last_mut() {
                Some(last) if last.time == bar.time => {
                    issues.push((IssueClass::DuplicateIdentity, format!("bar time {} repeated", bar.time)));
                    *last = bar;
                }
                _ => deduped.push(bar),
            }
        }

        self.bars = deduped;
        let next = self.signature();
        if let (Some(live), Some(last)) = (self.live, self.bars.last()) {
            if live.time < last.time {
                self.live = None;
            }
        }

        let dataset_changed = match (prev, next) {
            (None, None) => false,
            (Some(p), Some(n)) => !n.is_extension_of(&p),
            _ => true,
        };
        debug!(
            "[BARS] Snapshot of {} bars, signature {:?} -> {:?}, changed: {}",
            self.bars.len(),
            prev,
            next,
            dataset_changed
        );

        SetBarsOutcome {
            signature: next,
            dataset_changed,
            issues,
        }
    }

    /// Mutates the last bar in place (same time) or appends a newer one.
    pub fn update_last_bar(&mut self, bar: Bar) -> BarUpdate {
        if !bar.is_finite() {
            return BarUpdate::Rejected;
        }
        let outcome = match self.bars.last_mut() {
            Some(last) if last.time == bar.time => {
                *last = bar;
                BarUpdate::Replaced
            }
            Some(last) if last.time > bar.time => BarUpdate::Rejected,
            _ => {
                self.bars.push(bar);
                BarUpdate::Appended
            }
        };
        if outcome != BarUpdate::Rejected {
            if let Some(live) = self.live {
                if live.time <= bar.time && bar.complete {
                    self.live = None;
                }
            }
        }
        outcome
    }

    /// Tick-driven preview of the forming bar. Never touches the closed series.
    pub fn set_live_bar(&mut self, bar: Bar) -> bool {
        if !bar.is_finite() {
            return false;
        }
        if let Some(last) = self.bars.last() {
            if bar.time < last.time {
                return false;
            }
        }
        self.live = Some(bar);
        true
    }

    pub fn clear_live_bar(&mut self) {
        self.live = None;
    }

    pub fn last_closed_bar(&self) -> Option<&Bar> {
        self.bars.iter().rev().find(|b| b.complete)
    }

    /// Live close, else last closed close, else last open.
    pub fn reference_price(&self) -> Option<f64> {
        if let Some(live) = &self.live {
            if live.close.is_finite() {
                return Some(live.close);
            }
        }
        if let Some(closed) = self.last_closed_bar() {
            if closed.close.is_finite() {
                return Some(closed.close);
            }
        }
        self.bars.last().map(|b| b.open).filter(|p| p.is_finite())
    }

    /// Smallest positive spacing among recent bars.
    pub fn inferred_granularity(&self) -> Option<Timeframe> {
        let start = self.bars.len().saturating_sub(64);
        self.bars[start..]
            .windows(2)
            .map(|w| w[1].time.saturating_sub(w[0].time))
            .filter(|d| *d > 0)
            .min()
            .and_then(Timeframe::from_secs)
    }

    pub fn clear(&mut self) {
        self.bars.clear();
        self.live = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn bar(time: i64, close: f64) -> Bar {
        Bar {
            time,
            open: close - 0.5,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
            complete: true,
        }
    }

    #[test]
    fn test_set_bars_sorts_and_dedupes() {
        let mut cache = BarCache::new();
        let out = cache.set_bars(vec![bar(120, 3.0), bar(60, 1.0), bar(60, 2.0)]);
        assert!(out.dataset_changed);
        assert_eq!(cache.bars().len(), 2);
        assert_eq!(cache.bars()[0].close, 2.0);
        assert_eq!(out.issues.len(), 1);
    }

    #[test]
    fn test_extension_is_not_a_dataset_change() {
        let mut cache = BarCache::new();
        cache.set_bars(vec![bar(60, 1.0), bar(120, 2.0)]);
        let out = cache.set_bars(vec![bar(60, 1.0), bar(120, 2.0), bar(180, 3.0)]);
        assert!(!out.dataset_changed);

        let out = cache.set_bars(vec![bar(300, 1.0), bar(600, 2.0)]);
        assert!(out.dataset_changed);
    }

    #[test]
    fn test_update_last_bar_replace_append_reject() {
        let mut cache = BarCache::new();
        cache.set_bars(vec![bar(60, 1.0), bar(120, 2.0)]);
        assert_eq!(cache.update_last_bar(bar(120, 2.5)), BarUpdate::Replaced);
        assert_eq!(cache.update_last_bar(bar(180, 3.0)), BarUpdate::Appended);
        assert_eq!(cache.update_last_bar(bar(60, 9.0)), BarUpdate::Rejected);
        assert_eq!(cache.bars().len(), 3);
        assert_eq!(cache.bars()[1].close, 2.5);
    }

    #[test]
    fn test_reference_price_fallbacks() {
        let mut cache = BarCache::new();
        assert_eq!(cache.reference_price(), None);

        let mut forming = bar(60, 1.0);
        forming.complete = false;
        cache.set_bars(vec![forming]);
        // No closed bar yet: last open
        assert_eq!(cache.reference_price(), Some(0.5));

        cache.set_bars(vec![bar(60, 1.0), bar(120, 2.0)]);
        assert_eq!(cache.reference_price(), Some(2.0));

        assert!(cache.set_live_bar(bar(180, 2.2)));
        assert_eq!(cache.reference_price(), Some(2.2));
        cache.clear_live_bar();
        assert_eq!(cache.reference_price(), Some(2.0));
    }

    #[test]
    fn test_live_bar_cleared_by_closing_update() {
        let mut cache = BarCache::new();
        cache.set_bars(vec![bar(60, 1.0)]);
        cache.set_live_bar(bar(120, 1.4));
        cache.update_last_bar(bar(120, 1.5));
        assert!(cache.live().is_none());
        assert!(!cache.set_live_bar(bar(60, 1.0)));
    }

    #[test]
    fn test_granularity_and_last_closed_bar() {
        let mut cache = BarCache::new();
        let mut forming = bar(1_080, 4.0);
        forming.complete = false;
        cache.set_bars(vec![bar(0, 1.0), bar(900, 2.0), forming]);
        let tf = cache.inferred_granularity().unwrap();
        assert_eq!(tf.secs(), 180);
        assert_eq!(cache.last_closed_bar().map(|b| b.time), Some(900));
    }
}
