// src/zones/cluster.rs
// Merge overlapping/adjacent bands into clusters with a deterministic representative

use crate::geometry::overlap_ratio;
use crate::types::{Zone, ZoneCluster};
use crate::zones::refine::price_order;
use std::cmp::Ordering;

#[derive(Debug, Clone, Copy)]
pub struct ClusterParams {
    /// Intersection over the smaller span at or above which zones merge.
    pub overlap_ratio: f64,
    /// Absolute price gap at or below which zones merge.
    pub gap_tolerance: f64,
}

fn desc_opt(a: Option<f64>, b: Option<f64>) -> Ordering {
    // Present values beat missing ones, larger beats smaller
    match (a, b) {
        (Some(x), Some(y)) => y.total_cmp(&x),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Total order, best candidate first: fresher state, higher role, strength,
/// confidence, score, then the narrower band, then the smaller id.
pub fn representative_order(a: &Zone, b: &Zone) -> Ordering {
    b.state
        .freshness()
        .cmp(&a.state.freshness())
        .then(b.role.rank().cmp(&a.role.rank()))
        .then(desc_opt(a.strength, b.strength))
        .then(desc_opt(a.confidence, b.confidence))
        .then(b.score.total_cmp(&a.score))
        .then(a.width().total_cmp(&b.width()))
        .then_with(|| a.id.cmp(&b.id))
}

fn finish(members: Vec<Zone>, envelope_max: f64) -> Option<ZoneCluster> {
    let representative = members.iter().min_by(|a, b| representative_order(a, b))?.clone();
    let min = members.iter().map(|z| z.min).fold(f64::INFINITY, f64::min);
    let start_time = members.iter().map(|z| z.origin_time).min()?;

    Some(ZoneCluster {
        representative,
        members,
        start_time,
        min,
        max: envelope_max,
    })
}

/// Sweeps zones in price order. A zone joins the open bucket when it overlaps
/// the bucket's last member enough, or when its gap to the bucket is small.
/// Input order does not matter.
pub fn cluster_zones(zones: &[Zone], params: &ClusterParams) -> Vec<ZoneCluster> {
    let mut sorted: Vec<Zone> = zones.to_vec();
    sorted.sort_by(price_order);

    let mut clusters = Vec::new();
    let mut bucket: Vec<Zone> = Vec::new();
    let mut envelope_max = f64::NEG_INFINITY;

    for zone in sorted {
        let joins = match bucket.last() {
            Some(last) => {
                let ratio = overlap_ratio(last.min, last.max, zone.min, zone.max);
                let gap = zone.min - envelope_max;
                ratio >= params.overlap_ratio || gap <= params.gap_tolerance
            }
            None => true,
        };

        if !joins {
            clusters.extend(finish(std::mem::take(&mut bucket), envelope_max));
            envelope_max = f64::NEG_INFINITY;
        }
        envelope_max = envelope_max.max(zone.max);
        bucket.push(zone);
    }
    clusters.extend(finish(bucket, envelope_max));
    clusters
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeframe::Timeframe;
    use crate::types::{ZoneDirection, ZoneId, ZoneKind, ZoneRole, ZoneState};

    fn zone(id: &str, min: f64, max: f64) -> Zone {
        Zone {
            id: ZoneId::new(id),
            min,
            max,
            direction: ZoneDirection::Bullish,
            kind: ZoneKind::Demand,
            role: ZoneRole::Entry,
            state: ZoneState::Fresh,
            score: 0.0,
            strength: None,
            confidence: None,
            timeframe: Timeframe::M15,
            origin_time: 900,
            invalidated_time: None,
            why: Vec::new(),
        }
    }

    fn params() -> ClusterParams {
        ClusterParams {
            overlap_ratio: 0.6,
            gap_tolerance: 0.01,
        }
    }

    #[test]
    fn test_overlapping_pair_merges_distant_zone_stands_alone() {
        let zones = vec![zone("a", 100.0, 102.0), zone("b", 101.0, 103.0), zone("c", 150.0, 151.0)];
        let clusters = cluster_zones(&zones, &params());
        assert_eq!(clusters.len(), 2);
        assert_eq!((clusters[0].min, clusters[0].max), (100.0, 103.0));
        assert_eq!(clusters[0].members.len(), 2);
        assert_eq!(clusters[1].members.len(), 1);
        assert_eq!(clusters[1].id().as_str(), "c");
    }

    #[test]
    fn test_adjacent_within_gap_merges() {
        let zones = vec![zone("a", 100.0, 101.0), zone("b", 101.005, 102.0), zone("c", 102.5, 103.0)];
        let clusters = cluster_zones(&zones, &params());
        assert_eq!(clusters.len(), 2);
        assert_eq!(clusters[0].members.len(), 2);
    }

    #[test]
    fn test_wide_member_swallows_later_nested_zones() {
        let zones = vec![zone("wide", 100.0, 120.0), zone("n1", 101.0, 102.0), zone("n2", 110.0, 111.0)];
        let clusters = cluster_zones(&zones, &params());
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].max, 120.0);
    }

    #[test]
    fn test_representative_priority_chain() {
        let mut tested = zone("tested", 100.0, 101.0);
        tested.state = ZoneState::Tested;
        tested.score = 99.0;
        let fresh = zone("fresh", 100.2, 101.0);
        assert_eq!(representative_order(&fresh, &tested), Ordering::Less);

        let mut strong = zone("strong", 100.0, 105.0);
        strong.strength = Some(80.0);
        let weak = zone("weak", 100.0, 100.5);
        // Strength beats width
        assert_eq!(representative_order(&strong, &weak), Ordering::Less);

        let narrow = zone("narrow", 100.0, 100.5);
        let wide = zone("wide", 100.0, 101.0);
        assert_eq!(representative_order(&narrow, &wide), Ordering::Less);

        let mut poi = zone("poi", 100.0, 101.0);
        poi.role = ZoneRole::PointOfInterest;
        assert_eq!(representative_order(&poi, &narrow), Ordering::Less);
    }

    #[test]
    fn test_clustering_is_idempotent() {
        let zones = vec![zone("a", 1.0, 2.0), zone("b", 1.5, 2.5), zone("c", 5.0, 6.0)];
        let first = cluster_zones(&zones, &params());
        let second = cluster_zones(&zones, &params());
        assert_eq!(first, second);
    }
}
