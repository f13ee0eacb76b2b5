// src/zones/refine.rs
// View-dependent narrowing of the truthful zone set

use crate::timeframe::Timeframe;
use crate::types::{Zone, ZoneLimitMode, ZoneRole};
use std::cmp::Ordering;
use tracing::debug;

#[derive(Debug, Clone, Copy)]
pub struct RefineContext {
    pub view: Timeframe,
    pub reference: f64,
    /// Absolute tolerance for "fine zone inside coarse zone".
    pub containment_tolerance: f64,
    /// Volatility-scaled distance window for the micro view.
    pub micro_window: f64,
    pub limit: ZoneLimitMode,
}

/// Price order used wherever a deterministic zone ordering is needed.
pub fn price_order(a: &Zone, b: &Zone) -> Ordering {
    a.min
        .total_cmp(&b.min)
        .then(a.max.total_cmp(&b.max))
        .then_with(|| a.id.cmp(&b.id))
}

fn nearest_first(reference: f64) -> impl Fn(&&Zone, &&Zone) -> Ordering {
    move |a, b| {
        a.distance_to(reference)
            .total_cmp(&b.distance_to(reference))
            .then_with(|| a.id.cmp(&b.id))
    }
}

pub fn refine(zones: Vec<Zone>, ctx: &RefineContext) -> Vec<Zone> {
    let before = zones.len();
    let mut refined = if ctx.view.is_high_timeframe_view() {
        refine_high_timeframe(zones, ctx)
    } else if ctx.view.is_micro_view() {
        refine_micro(zones, ctx)
    } else {
        zones
    };
    refined.sort_by(price_order);
    if refined.len() != before {
        debug!(
            "[ZONES] {} view kept {}/{} zones around {:.6}",
            ctx.view,
            refined.len(),
            before,
            ctx.reference
        );
    }
    refined
}

fn contained_in(fine: &Zone, coarse: &Zone, tolerance: f64) -> bool {
    fine.min >= coarse.min - tolerance && fine.max <= coarse.max + tolerance
}

/// Coarse zones always stay. Fine zones stay when nested in a coarse zone;
/// of the rest only the nearest one above and one below the reference survive.
fn refine_high_timeframe(zones: Vec<Zone>, ctx: &RefineContext) -> Vec<Zone> {
    let (coarse, fine): (Vec<Zone>, Vec<Zone>) = zones.into_iter().partition(|z| z.timeframe >= ctx.view);

    let mut keep_ids = Vec::new();
    let mut loose: Vec<&Zone> = Vec::new();
    for z in &fine {
        if coarse.iter().any(|c| contained_in(z, c, ctx.containment_tolerance)) {
            keep_ids.push(z.id.clone());
        } else {
            loose.push(z);
        }
    }

    let (mut above, mut below): (Vec<&Zone>, Vec<&Zone>) = loose.into_iter().partition(|z| z.mid() >= ctx.reference);
    above.sort_by(nearest_first(ctx.reference));
    below.sort_by(nearest_first(ctx.reference));
    keep_ids.extend(above.first().map(|z| z.id.clone()));
    keep_ids.extend(below.first().map(|z| z.id.clone()));

    let mut out = coarse;
    out.extend(fine.into_iter().filter(|z| keep_ids.contains(&z.id)));
    out
}

/// Point-of-interest zones only: every zone containing the reference, plus up
/// to K per side inside the volatility window.
fn refine_micro(zones: Vec<Zone>, ctx: &RefineContext) -> Vec<Zone> {
    let poi: Vec<Zone> = zones
        .into_iter()
        .filter(|z| z.role == ZoneRole::PointOfInterest)
        .collect();

    let mut keep_ids = Vec::new();
    let mut above: Vec<&Zone> = Vec::new();
    let mut below: Vec<&Zone> = Vec::new();
    for z in &poi {
        if z.contains_price(ctx.reference) {
            keep_ids.push(z.id.clone());
        } else if z.distance_to(ctx.reference) <= ctx.micro_window {
            if z.min > ctx.reference {
                above.push(z);
            } else {
                below.push(z);
            }
        }
    }

    above.sort_by(nearest_first(ctx.reference));
    below.sort_by(nearest_first(ctx.reference));
    let per_side = ctx.limit.per_side().unwrap_or(usize::MAX);
    keep_ids.extend(above.iter().take(per_side).map(|z| z.id.clone()));
    keep_ids.extend(below.iter().take(per_side).map(|z| z.id.clone()));

    poi.into_iter().filter(|z| keep_ids.contains(&z.id)).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{ZoneDirection, ZoneId, ZoneKind, ZoneState};

    fn zone(id: &str, tf: Timeframe, min: f64, max: f64, role: ZoneRole) -> Zone {
        Zone {
            id: ZoneId::new(id),
            min,
            max,
            direction: ZoneDirection::Neutral,
            kind: ZoneKind::OrderBlock,
            role,
            state: ZoneState::Fresh,
            score: 0.0,
            strength: None,
            confidence: None,
            timeframe: tf,
            origin_time: 0,
            invalidated_time: None,
            why: Vec::new(),
        }
    }

    fn ctx(view: Timeframe, limit: ZoneLimitMode) -> RefineContext {
        RefineContext {
            view,
            reference: 100.0,
            containment_tolerance: 0.05,
            micro_window: 5.0,
            limit,
        }
    }

    fn ids(zones: &[Zone]) -> Vec<&str> {
        zones.iter().map(|z| z.id.as_str()).collect()
    }

    #[test]
    fn test_high_timeframe_keeps_nested_and_nearest_fine() {
        let zones = vec![
            zone("h4", Timeframe::H4, 90.0, 95.0, ZoneRole::Context),
            zone("nested", Timeframe::M15, 91.0, 94.02, ZoneRole::Context),
            zone("above-near", Timeframe::M15, 101.0, 102.0, ZoneRole::Context),
            zone("above-far", Timeframe::M15, 110.0, 111.0, ZoneRole::Context),
            zone("below-near", Timeframe::M5, 97.0, 98.0, ZoneRole::Context),
            zone("below-far", Timeframe::M5, 80.0, 81.0, ZoneRole::Context),
        ];
        let out = refine(zones, &ctx(Timeframe::H1, ZoneLimitMode::All));
        assert_eq!(ids(&out), vec!["h4", "nested", "below-near", "above-near"]);
    }

    #[test]
    fn test_medium_view_is_untouched() {
        let zones = vec![
            zone("a", Timeframe::M5, 50.0, 51.0, ZoneRole::Context),
            zone("b", Timeframe::M1, 150.0, 151.0, ZoneRole::Context),
        ];
        let out = refine(zones, &ctx(Timeframe::M15, ZoneLimitMode::Near1));
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn test_micro_view_limits_per_side() {
        let zones = vec![
            zone("inside", Timeframe::M1, 99.0, 101.0, ZoneRole::PointOfInterest),
            zone("a1", Timeframe::M1, 101.5, 102.0, ZoneRole::PointOfInterest),
            zone("a2", Timeframe::M1, 102.5, 103.0, ZoneRole::PointOfInterest),
            zone("a3", Timeframe::M1, 103.5, 104.0, ZoneRole::PointOfInterest),
            zone("far", Timeframe::M1, 120.0, 121.0, ZoneRole::PointOfInterest),
            zone("b1", Timeframe::M1, 97.0, 98.0, ZoneRole::PointOfInterest),
            zone("not-poi", Timeframe::M1, 100.5, 100.6, ZoneRole::Entry),
        ];

        let near1 = refine(zones.clone(), &ctx(Timeframe::M1, ZoneLimitMode::Near1));
        assert_eq!(ids(&near1), vec!["b1", "inside", "a1"]);

        let near2 = refine(zones.clone(), &ctx(Timeframe::M1, ZoneLimitMode::Near2));
        assert_eq!(ids(&near2), vec!["b1", "inside", "a1", "a2"]);

        let all = refine(zones, &ctx(Timeframe::M1, ZoneLimitMode::All));
        assert_eq!(ids(&all), vec!["b1", "inside", "a1", "a2", "a3"]);
    }
}
