// src/zones/truth.rs
// Truth gating: only zones provably built from fully closed buckets of their own timeframe

use crate::bars::BarCache;
use crate::timeframe::Timeframe;
use crate::types::Zone;
use tracing::debug;

/// End of the closed bar history, or `None` when nothing has closed yet.
/// Without a known granularity the last closed bar is treated as still open.
pub fn closed_until(bars: &BarCache, granularity: Option<Timeframe>) -> Option<i64> {
    let last = bars.last_closed_bar()?;
    Some(match granularity {
        Some(tf) => last.time.saturating_add(tf.secs()),
        None => last.time,
    })
}

/// Origin on an exact bucket boundary and the whole bucket closed.
pub fn is_truthful(zone: &Zone, closed_until: i64) -> bool {
    let tf = zone.timeframe;
    tf.is_aligned(zone.origin_time)
        && zone
            .origin_time
            .checked_add(tf.secs())
            .map_or(false, |end| end <= closed_until)
}

/// Drops untrusted zones entirely. Returns the survivors and the rejected count.
pub fn gate(zones: Vec<Zone>, closed_until: Option<i64>) -> (Vec<Zone>, usize) {
    let Some(closed_until) = closed_until else {
        let rejected = zones.len();
        if rejected > 0 {
            debug!("[ZONES] No closed bars yet, {} zones held back", rejected);
        }
        return (Vec::new(), rejected);
    };

    let before = zones.len();
    let accepted: Vec<Zone> = zones
        .into_iter()
        .filter(|z| {
            let ok = is_truthful(z, closed_until);
            if !ok {
                debug!(
                    "🚫 [ZONES] {} ({}) origin {} not from a closed bucket (closed until {})",
                    z.id, z.timeframe, z.origin_time, closed_until
                );
            }
            ok
        })
        .collect();
    let rejected = before - accepted.len();
    (accepted, rejected)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Bar, ZoneDirection, ZoneId, ZoneKind, ZoneRole, ZoneState};

    fn zone(id: &str, tf: Timeframe, origin: i64) -> Zone {
        Zone {
            id: ZoneId::new(id),
            min: 1.0,
            max: 2.0,
            direction: ZoneDirection::Bullish,
            kind: ZoneKind::Demand,
            role: ZoneRole::Entry,
            state: ZoneState::Fresh,
            score: 0.0,
            strength: None,
            confidence: None,
            timeframe: tf,
            origin_time: origin,
            invalidated_time: None,
            why: Vec::new(),
        }
    }

    fn closed_bars(times: &[i64]) -> BarCache {
        let mut cache = BarCache::new();
        cache.set_bars(
            times
                .iter()
                .map(|t| Bar {
                    time: *t,
                    open: 1.0,
                    high: 1.0,
                    low: 1.0,
                    close: 1.0,
                    volume: 0.0,
                    complete: true,
                })
                .collect(),
        );
        cache
    }

    #[test]
    fn test_misaligned_origin_rejected() {
        assert!(!is_truthful(&zone("a", Timeframe::H1, 3_601), 100_000));
        assert!(is_truthful(&zone("b", Timeframe::H1, 3_600), 100_000));
    }

    #[test]
    fn test_in_progress_bucket_rejected() {
        // 15m bars closed through 10:45 -> closed until 11:00
        let bars = closed_bars(&[36_000, 36_900, 37_800, 38_700]);
        let until = closed_until(&bars, Some(Timeframe::M15)).unwrap();
        assert_eq!(until, 39_600);

        // The 10:00 1h bucket closed at 11:00
        assert!(is_truthful(&zone("h1-done", Timeframe::H1, 36_000), until));
        // The 11:00 1h bucket is still forming
        assert!(!is_truthful(&zone("h1-forming", Timeframe::H1, 39_600), until));
        // A 4h bucket starting at 08:00 closes at 12:00
        assert!(!is_truthful(&zone("h4-forming", Timeframe::H4, 28_800), until));
    }

    #[test]
    fn test_extreme_times_do_not_overflow() {
        let bars = closed_bars(&[i64::MAX - 10]);
        assert_eq!(closed_until(&bars, Some(Timeframe::H1)), Some(i64::MAX));

        let origin = i64::MAX - i64::MAX.rem_euclid(3_600);
        assert!(!is_truthful(&zone("edge", Timeframe::H1, origin), i64::MAX));
    }

    #[test]
    fn test_gate_without_closed_bars_drops_everything() {
        let (kept, rejected) = gate(vec![zone("a", Timeframe::M1, 60)], None);
        assert!(kept.is_empty());
        assert_eq!(rejected, 1);
    }

    #[test]
    fn test_gate_counts_rejections() {
        let zones = vec![
            zone("ok", Timeframe::M15, 900),
            zone("late", Timeframe::M15, 9_000),
            zone("odd", Timeframe::M15, 950),
        ];
        let (kept, rejected) = gate(zones, Some(1_800));
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].id.as_str(), "ok");
        assert_eq!(rejected, 2);
    }
}
