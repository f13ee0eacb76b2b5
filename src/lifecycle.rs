// src/lifecycle.rs
// Identity -> primitive arena with explicit create/update/recreate/remove diffs

use crate::surface::{ChartSurface, PrimitiveHandle};
use crate::types::{Level, LevelKind, PoolBand, PoolStatus, SessionWindow, ZoneCluster, ZoneDirection, ZoneState};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveFamily {
    Zone,
    Pool,
    Level,
    Session,
}

impl fmt::Display for PrimitiveFamily {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PrimitiveFamily::Zone => "zone",
            PrimitiveFamily::Pool => "pool",
            PrimitiveFamily::Level => "level",
            PrimitiveFamily::Session => "session",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PrimitiveKey {
    pub family: PrimitiveFamily,
    pub identity: String,
}

impl PrimitiveKey {
    pub fn new(family: PrimitiveFamily, identity: impl Into<String>) -> Self {
        Self {
            family,
            identity: identity.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PrimitiveLayout {
    /// Filled rectangle from a start time to the right edge.
    Band,
    /// Two edge segments plus an optional translucent fill.
    EdgesWithFill,
    Line,
    /// Full-height vertical band between two times.
    TimeBand,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PrimitiveGeometry {
    pub start_time: Option<i64>,
    pub end_time: Option<i64>,
    pub top: Option<f64>,
    pub bottom: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimitiveStyle {
    pub color: String,
    /// `None` means no fill layer at all.
    pub fill_opacity: Option<f64>,
    pub dashed: bool,
    pub text: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrimitiveSpec {
    pub layout: PrimitiveLayout,
    pub geometry: PrimitiveGeometry,
    pub style: PrimitiveStyle,
    /// Badge on the main price axis. Pools never carry one.
    pub axis_label: bool,
}

impl PrimitiveSpec {
    /// Changes the surface cannot apply in place.
    pub fn is_structural_change(&self, next: &PrimitiveSpec) -> bool {
        self.layout != next.layout
            || self.style.fill_opacity.is_some() != next.style.fill_opacity.is_some()
            || self.axis_label != next.axis_label
    }

    pub fn for_cluster(cluster: &ZoneCluster) -> Self {
        let rep = &cluster.representative;
        let color = match rep.direction {
            ZoneDirection::Bullish => "#26a69a",
            ZoneDirection::Bearish => "#ef5350",
            ZoneDirection::Neutral => "#9e9e9e",
        };
        let opacity = match rep.state {
            ZoneState::Fresh => 0.25,
            ZoneState::Tested => 0.18,
            ZoneState::Mitigated => 0.10,
            ZoneState::Invalidated => 0.05,
        };
        let text = if cluster.members.len() > 1 {
            format!("{} {} x{}", rep.timeframe, rep.kind.as_str(), cluster.members.len())
        } else {
            format!("{} {}", rep.timeframe, rep.kind.as_str())
        };
        Self {
            layout: PrimitiveLayout::Band,
            geometry: PrimitiveGeometry {
                start_time: Some(cluster.start_time),
                end_time: None,
                top: Some(cluster.max),
                bottom: Some(cluster.min),
            },
            style: PrimitiveStyle {
                color: color.to_string(),
                fill_opacity: Some(opacity),
                dashed: rep.state == ZoneState::Invalidated,
                text: Some(text),
            },
            axis_label: false,
        }
    }

    pub fn for_pool(pool: &PoolBand) -> Self {
        let active = pool.status == PoolStatus::Active;
        Self {
            layout: PrimitiveLayout::EdgesWithFill,
            geometry: PrimitiveGeometry {
                start_time: None,
                end_time: None,
                top: Some(pool.top.max(pool.bot)),
                bottom: Some(pool.top.min(pool.bot)),
            },
            style: PrimitiveStyle {
                color: if active { "#ffb74d" } else { "#78909c" }.to_string(),
                // Swept pools keep their edges but lose the fill
                fill_opacity: if active { Some(0.12) } else { None },
                dashed: !active,
                text: Some(format!("{} {}", pool.timeframe, pool.kind)),
            },
            axis_label: false,
        }
    }

    pub fn for_level(level: &Level) -> Self {
        let (color, name) = match level.kind {
            LevelKind::Premium => ("#ef5350", "premium"),
            LevelKind::Discount => ("#26a69a", "discount"),
            LevelKind::Equilibrium => ("#9e9e9e", "eq"),
            LevelKind::Other => ("#b0bec5", "level"),
        };
        let text = match level.timeframe {
            Some(tf) => format!("{} {}", tf, name),
            None => name.to_string(),
        };
        Self {
            layout: PrimitiveLayout::Line,
            geometry: PrimitiveGeometry {
                start_time: None,
                end_time: None,
                top: Some(level.price),
                bottom: Some(level.price),
            },
            style: PrimitiveStyle {
                color: color.to_string(),
                fill_opacity: None,
                dashed: level.kind == LevelKind::Equilibrium,
                text: Some(text),
            },
            axis_label: level.kind != LevelKind::Other,
        }
    }

    pub fn for_session(session: &SessionWindow) -> Self {
        Self {
            layout: PrimitiveLayout::TimeBand,
            geometry: PrimitiveGeometry {
                start_time: Some(session.start),
                end_time: Some(session.end),
                top: None,
                bottom: None,
            },
            style: PrimitiveStyle {
                color: "#5c6bc0".to_string(),
                fill_opacity: Some(0.06),
                dashed: false,
                text: Some(session.tag.clone()),
            },
            axis_label: false,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DiffReport {
    pub created: usize,
    pub updated: usize,
    pub recreated: usize,
    pub removed: usize,
    pub unchanged: usize,
}

impl DiffReport {
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.recreated == 0 && self.removed == 0
    }
}

#[derive(Debug, Clone)]
struct Entry {
    handle: PrimitiveHandle,
    spec: PrimitiveSpec,
}

#[derive(Debug, Default)]
pub struct OverlayLifecycle {
    arena: BTreeMap<PrimitiveKey, Entry>,
}

impl OverlayLifecycle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.arena.len()
    }

    pub fn is_empty(&self) -> bool {
        self.arena.is_empty()
    }

    pub fn family_len(&self, family: PrimitiveFamily) -> usize {
        self.arena.keys().filter(|k| k.family == family).count()
    }

    pub fn handle_of(&self, key: &PrimitiveKey) -> Option<PrimitiveHandle> {
        self.arena.get(key).map(|e| e.handle)
    }

    pub fn spec_of(&self, key: &PrimitiveKey) -> Option<&PrimitiveSpec> {
        self.arena.get(key).map(|e| &e.spec)
    }

    /// Brings one family on the surface in line with `desired`, keyed by identity.
    pub fn reconcile<S: ChartSurface + ?Sized>(
        &mut self,
        family: PrimitiveFamily,
        desired: BTreeMap<String, PrimitiveSpec>,
        surface: &mut S,
    ) -> DiffReport {
        let mut report = DiffReport::default();

        let stale: Vec<PrimitiveKey> = self
            .arena
            .keys()
            .filter(|k| k.family == family && !desired.contains_key(&k.identity))
            .cloned()
            .collect();
        for key in stale {
            if let Some(entry) = self.arena.remove(&key) {
                surface.remove_primitive(entry.handle);
                report.removed += 1;
            }
        }

        for (identity, spec) in desired {
            let key = PrimitiveKey::new(family, identity);
            let existing = self
                .arena
                .get(&key)
                .map(|e| (e.handle, e.spec == spec, e.spec.is_structural_change(&spec)));
            let (handle, structural) = match existing {
                None => {
                    if self.create(key, spec, surface) {
                        report.created += 1;
                    }
                    continue;
                }
                Some((_, true, _)) => {
                    report.unchanged += 1;
                    continue;
                }
                Some((handle, false, structural)) => (handle, structural),
            };

            if !structural && surface.update_primitive(handle, &spec) {
                if let Some(entry) = self.arena.get_mut(&key) {
                    entry.spec = spec;
                }
                report.updated += 1;
                continue;
            }
            if let Some(old) = self.arena.remove(&key) {
                surface.remove_primitive(old.handle);
            }
            if self.create(key, spec, surface) {
                report.recreated += 1;
            }
        }

        if !report.is_noop() {
            debug!(
                "[LIFECYCLE] {}: +{} ~{} !{} -{} ={}",
                family, report.created, report.updated, report.recreated, report.removed, report.unchanged
            );
        }
        report
    }

    fn create<S: ChartSurface + ?Sized>(&mut self, key: PrimitiveKey, spec: PrimitiveSpec, surface: &mut S) -> bool {
        match surface.create_primitive(&key, &spec) {
            Some(handle) => {
                self.arena.insert(key, Entry { handle, spec });
                true
            }
            None => {
                debug!("[LIFECYCLE] Surface refused {} {}", key.family, key.identity);
                false
            }
        }
    }

    /// Removes every primitive of every family. Returns how many were removed.
    pub fn clear_all<S: ChartSurface + ?Sized>(&mut self, surface: &mut S) -> usize {
        let removed = self.arena.len();
        for (_, entry) in std::mem::take(&mut self.arena) {
            surface.remove_primitive(entry.handle);
        }
        if removed > 0 {
            info!("🧹 [LIFECYCLE] Removed {} primitives", removed);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::HeadlessSurface;
    use crate::timeframe::Timeframe;
    use crate::types::{PoolSide, PoolStatus};

    fn pool(id: &str, top: f64, status: PoolStatus) -> PoolBand {
        PoolBand {
            id: id.to_string(),
            timeframe: Timeframe::H1,
            top,
            bot: top - 1.0,
            status,
            kind: "eqh".to_string(),
            side: PoolSide::BuySide,
        }
    }

    fn desired(pools: &[PoolBand]) -> BTreeMap<String, PrimitiveSpec> {
        pools.iter().map(|p| (p.id.clone(), PrimitiveSpec::for_pool(p))).collect()
    }

    #[test]
    fn test_diff_create_update_remove() {
        let mut surface = HeadlessSurface::new(800.0, 500.0);
        let mut lifecycle = OverlayLifecycle::new();

        let first = lifecycle.reconcile(
            PrimitiveFamily::Pool,
            desired(&[pool("p1", 110.0, PoolStatus::Active), pool("p2", 120.0, PoolStatus::Active)]),
            &mut surface,
        );
        assert_eq!(first.created, 2);
        assert_eq!(surface.primitive_count(), 2);

        let handle = lifecycle
            .handle_of(&PrimitiveKey::new(PrimitiveFamily::Pool, "p1"))
            .unwrap();
        let second = lifecycle.reconcile(
            PrimitiveFamily::Pool,
            desired(&[pool("p1", 111.0, PoolStatus::Active)]),
            &mut surface,
        );
        assert_eq!(second.updated, 1);
        assert_eq!(second.removed, 1);
        // Updated in place, same handle
        assert_eq!(lifecycle.handle_of(&PrimitiveKey::new(PrimitiveFamily::Pool, "p1")), Some(handle));

        let third = lifecycle.reconcile(
            PrimitiveFamily::Pool,
            desired(&[pool("p1", 111.0, PoolStatus::Active)]),
            &mut surface,
        );
        assert!(third.is_noop());
        assert_eq!(third.unchanged, 1);
    }

    #[test]
    fn test_losing_fill_layer_recreates() {
        let mut surface = HeadlessSurface::new(800.0, 500.0);
        let mut lifecycle = OverlayLifecycle::new();
        lifecycle.reconcile(PrimitiveFamily::Pool, desired(&[pool("p1", 110.0, PoolStatus::Active)]), &mut surface);
        let report = lifecycle.reconcile(PrimitiveFamily::Pool, desired(&[pool("p1", 110.0, PoolStatus::Swept)]), &mut surface);
        assert_eq!(report.recreated, 1);
        assert_eq!(surface.primitive_count(), 1);
    }

    #[test]
    fn test_families_are_independent() {
        let mut surface = HeadlessSurface::new(800.0, 500.0);
        let mut lifecycle = OverlayLifecycle::new();
        lifecycle.reconcile(PrimitiveFamily::Pool, desired(&[pool("x", 110.0, PoolStatus::Active)]), &mut surface);

        let session = SessionWindow {
            start: 0,
            end: 3_600,
            tag: "london".to_string(),
        };
        let sessions: BTreeMap<String, PrimitiveSpec> =
            [("x".to_string(), PrimitiveSpec::for_session(&session))].into_iter().collect();
        lifecycle.reconcile(PrimitiveFamily::Session, sessions, &mut surface);
        assert_eq!(lifecycle.len(), 2);

        lifecycle.reconcile(PrimitiveFamily::Session, BTreeMap::new(), &mut surface);
        assert_eq!(lifecycle.family_len(PrimitiveFamily::Pool), 1);
        assert_eq!(lifecycle.clear_all(&mut surface), 1);
        assert_eq!(surface.primitive_count(), 0);
    }

    #[test]
    fn test_pools_never_carry_axis_label() {
        assert!(!PrimitiveSpec::for_pool(&pool("p", 1.0, PoolStatus::Active)).axis_label);
        let level = Level {
            id: "premium@1h".to_string(),
            price: 1.2,
            kind: LevelKind::Premium,
            timeframe: Some(Timeframe::H1),
        };
        assert!(PrimitiveSpec::for_level(&level).axis_label);
    }
}
