// src/zones/engine.rs
// Selection pipeline: sanitize -> dedupe -> purge -> truth gate -> freeze -> refine -> cluster -> freeze clusters

use crate::bars::BarCache;
use crate::config::ZoneConfig;
use crate::diagnostics::{IssueClass, RateLimitedLog};
use crate::geometry::volatility_window;
use crate::timeframe::Timeframe;
use crate::types::{Zone, ZoneCluster, ZoneId, ZoneLimitMode};
use crate::zones::cluster::{cluster_zones, representative_order, ClusterParams};
use crate::zones::freeze::GeometryFreeze;
use crate::zones::refine::{price_order, refine, RefineContext};
use crate::zones::truth;
use serde::Serialize;
use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SelectionStats {
    pub input: usize,
    pub non_finite: usize,
    pub duplicates: usize,
    pub untrusted: usize,
    pub refined_out: usize,
    pub clusters: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectionOutput {
    /// Display set in price order.
    pub clusters: Vec<ZoneCluster>,
    /// Post-refinement zones before clustering, kept for hit testing.
    pub zones: Vec<Zone>,
    pub reference_price: Option<f64>,
    pub stats: SelectionStats,
}

impl SelectionOutput {
    /// Zones whose band contains `price`, best candidate first.
    pub fn hit_test(&self, price: f64) -> Vec<&Zone> {
        if !price.is_finite() {
            return Vec::new();
        }
        let mut hits: Vec<&Zone> = self.zones.iter().filter(|z| z.contains_price(price)).collect();
        hits.sort_by(|a, b| representative_order(a, b));
        hits
    }

    pub fn is_empty(&self) -> bool {
        self.clusters.is_empty()
    }
}

#[derive(Debug)]
pub struct ZoneEngine {
    config: ZoneConfig,
    freeze: GeometryFreeze,
}

/// Drops zones with non-finite bounds and swaps inverted ones.
fn sanitize(zones: &[Zone], issues: &mut RateLimitedLog) -> (Vec<Zone>, usize) {
    let mut kept = Vec::with_capacity(zones.len());
    let mut dropped = 0;
    for zone in zones {
        if !zone.min.is_finite() || !zone.max.is_finite() {
            dropped += 1;
            issues.report(
                IssueClass::NonFiniteBounds,
                &format!("zone {} bounds {} / {}", zone.id, zone.min, zone.max),
            );
            continue;
        }
        let mut zone = zone.clone();
        if zone.min > zone.max {
            std::mem::swap(&mut zone.min, &mut zone.max);
        }
        kept.push(zone);
    }
    (kept, dropped)
}

/// One zone per identity. When an identity repeats the best candidate wins,
/// so the survivor does not depend on payload order.
fn dedupe(zones: Vec<Zone>, issues: &mut RateLimitedLog) -> (Vec<Zone>, usize) {
    let mut by_id: HashMap<ZoneId, Zone> = HashMap::with_capacity(zones.len());
    let mut duplicates = 0;
    for zone in zones {
        match by_id.entry(zone.id.clone()) {
            Entry::Occupied(mut slot) => {
                duplicates += 1;
                issues.report(IssueClass::DuplicateIdentity, &format!("zone {} repeated", zone.id));
                let existing = slot.get();
                let better = representative_order(&zone, existing).then_with(|| price_order(&zone, existing));
                if better.is_lt() {
                    slot.insert(zone);
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(zone);
            }
        }
    }
    let mut unique: Vec<Zone> = by_id.into_values().collect();
    unique.sort_by(price_order);
    (unique, duplicates)
}

impl ZoneEngine {
    pub fn new(config: ZoneConfig) -> Self {
        Self {
            config,
            freeze: GeometryFreeze::new(),
        }
    }

    pub fn config(&self) -> &ZoneConfig {
        &self.config
    }

    pub fn freeze(&self) -> &GeometryFreeze {
        &self.freeze
    }

    /// Drops every frozen geometry. Used on dataset switches.
    pub fn clear(&mut self) {
        self.freeze.clear();
    }

    /// Runs the full pipeline over the raw annotation set. `view` falls back to
    /// the bar spacing when unset; without either, refinement is skipped.
    /// Malformed and repeated zones are reported to `issues`.
    pub fn select(
        &mut self,
        zones: &[Zone],
        bars: &BarCache,
        view: Option<Timeframe>,
        limit: ZoneLimitMode,
        issues: &mut RateLimitedLog,
    ) -> SelectionOutput {
        let mut stats = SelectionStats {
            input: zones.len(),
            ..SelectionStats::default()
        };

        let (finite, non_finite) = sanitize(zones, issues);
        stats.non_finite = non_finite;
        let (unique, duplicates) = dedupe(finite, issues);
        stats.duplicates = duplicates;

        // Identities absent from this snapshot lose their frozen geometry
        let present: HashSet<ZoneId> = unique.iter().map(|z| z.id.clone()).collect();
        self.freeze.retain_present(&present);

        let Some(reference) = bars.reference_price() else {
            debug!("[ZONES] No reference price, display set left empty");
            return SelectionOutput {
                stats,
                ..SelectionOutput::default()
            };
        };

        let granularity = view.or_else(|| bars.inferred_granularity());
        let closed_until = truth::closed_until(bars, granularity);
        let (mut accepted, untrusted) = truth::gate(unique, closed_until);
        stats.untrusted = untrusted;

        for zone in accepted.iter_mut() {
            if self.freeze.freeze_zone(zone) {
                debug!("🧊 [ZONES] {} drifted upstream, frozen geometry kept", zone.id);
            }
        }

        let before_refine = accepted.len();
        let refined = match granularity {
            Some(view) => {
                let ctx = RefineContext {
                    view,
                    reference,
                    containment_tolerance: reference.abs() * self.config.containment_tolerance_ratio,
                    micro_window: volatility_window(
                        bars.bars(),
                        self.config.atr_period,
                        self.config.micro_window_atr_mult,
                        reference,
                        self.config.micro_window_min_ratio,
                    ),
                    limit,
                };
                refine(accepted, &ctx)
            }
            None => {
                let mut all = accepted;
                all.sort_by(price_order);
                all
            }
        };
        stats.refined_out = before_refine - refined.len();

        let params = ClusterParams {
            overlap_ratio: self.config.cluster_overlap_ratio,
            gap_tolerance: reference.abs() * self.config.cluster_gap_ratio,
        };
        let mut clusters = cluster_zones(&refined, &params);
        for cluster in clusters.iter_mut() {
            self.freeze.freeze_cluster(cluster);
        }
        clusters.sort_by(|a, b| {
            a.min
                .total_cmp(&b.min)
                .then(a.max.total_cmp(&b.max))
                .then_with(|| a.id().cmp(b.id()))
        });
        stats.clusters = clusters.len();

        debug!(
            "📐 [ZONES] {} in, {} non-finite, {} dup, {} untrusted, {} refined out -> {} clusters (ref {:.6})",
            stats.input, stats.non_finite, stats.duplicates, stats.untrusted, stats.refined_out, stats.clusters, reference
        );

        SelectionOutput {
            clusters,
            zones: refined,
            reference_price: Some(reference),
            stats,
        }
    }
}
