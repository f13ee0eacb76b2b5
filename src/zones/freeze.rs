// src/zones/freeze.rs
// No-repaint cache: first accepted geometry per identity wins until the identity disappears

use crate::types::{Zone, ZoneCluster, ZoneId};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FrozenGeometry {
    pub min: f64,
    pub max: f64,
    pub origin_time: i64,
}

#[derive(Debug, Default)]
pub struct GeometryFreeze {
    zones: HashMap<ZoneId, FrozenGeometry>,
    /// Keyed by the cluster's representative id.
    clusters: HashMap<ZoneId, FrozenGeometry>,
}

impl GeometryFreeze {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores the zone's geometry on first sight, otherwise overwrites the zone
    /// with the stored values. Returns true when the zone was corrected.
    pub fn freeze_zone(&mut self, zone: &mut Zone) -> bool {
        match self.zones.get(&zone.id) {
            Some(frozen) => {
                let drifted = frozen.min != zone.min || frozen.max != zone.max || frozen.origin_time != zone.origin_time;
                zone.min = frozen.min;
                zone.max = frozen.max;
                zone.origin_time = frozen.origin_time;
                drifted
            }
            None => {
                self.zones.insert(
                    zone.id.clone(),
                    FrozenGeometry {
                        min: zone.min,
                        max: zone.max,
                        origin_time: zone.origin_time,
                    },
                );
                false
            }
        }
    }

    /// Same as `freeze_zone` for the displayed cluster bounds.
    pub fn freeze_cluster(&mut self, cluster: &mut ZoneCluster) -> bool {
        let key = cluster.id().clone();
        match self.clusters.get(&key) {
            Some(frozen) => {
                let drifted = frozen.min != cluster.min || frozen.max != cluster.max || frozen.origin_time != cluster.start_time;
                cluster.min = frozen.min;
                cluster.max = frozen.max;
                cluster.start_time = frozen.origin_time;
                drifted
            }
            None => {
                self.clusters.insert(
                    key,
                    FrozenGeometry {
                        min: cluster.min,
                        max: cluster.max,
                        origin_time: cluster.start_time,
                    },
                );
                false
            }
        }
    }

    /// Purges every entry whose identity is absent from `present`. Returns the
    /// number of entries dropped.
    pub fn retain_present(&mut self, present: &HashSet<ZoneId>) -> usize {
        let before = self.zones.len() + self.clusters.len();
        self.zones.retain(|id, _| present.contains(id));
        self.clusters.retain(|id, _| present.contains(id));
        let dropped = before - self.zones.len() - self.clusters.len();
        if dropped > 0 {
            debug!("🧊 [ZONES] Released {} frozen geometries for vanished identities", dropped);
        }
        dropped
    }

    pub fn zone_geometry(&self, id: &ZoneId) -> Option<&FrozenGeometry> {
        self.zones.get(id)
    }

    pub fn clear(&mut self) {
        self.zones.clear();
        self.clusters.clear();
    }

    pub fn zone_count(&self) -> usize {
        self.zones.len()
    }

    pub fn cluster_count(&self) -> usize {
        self.clusters.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::timeframe::Timeframe;
    use crate::types::{ZoneDirection, ZoneKind, ZoneRole, ZoneState};

    fn zone(id: &str, min: f64, max: f64) -> Zone {
        Zone {
            id: ZoneId::new(id),
            min,
            max,
            direction: ZoneDirection::Bearish,
            kind: ZoneKind::Supply,
            role: ZoneRole::Entry,
            state: ZoneState::Fresh,
            score: 1.0,
            strength: None,
            confidence: None,
            timeframe: Timeframe::H1,
            origin_time: 3_600,
            invalidated_time: None,
            why: Vec::new(),
        }
    }

    #[test]
    fn test_noise_does_not_move_frozen_zone() {
        let mut freeze = GeometryFreeze::new();
        let mut first = zone("z1", 100.0, 101.0);
        assert!(!freeze.freeze_zone(&mut first));

        let mut noisy = zone("z1", 100.003, 100.998);
        assert!(freeze.freeze_zone(&mut noisy));
        assert_eq!((noisy.min, noisy.max), (100.0, 101.0));
    }

    #[test]
    fn test_reappearance_after_removal_refreezes() {
        let mut freeze = GeometryFreeze::new();
        freeze.freeze_zone(&mut zone("z1", 100.0, 101.0));
        freeze.freeze_zone(&mut zone("z2", 200.0, 201.0));

        let present: HashSet<ZoneId> = [ZoneId::new("z2")].into_iter().collect();
        assert_eq!(freeze.retain_present(&present), 1);
        assert!(freeze.zone_geometry(&ZoneId::new("z1")).is_none());

        let mut back = zone("z1", 105.0, 106.0);
        assert!(!freeze.freeze_zone(&mut back));
        assert_eq!(back.min, 105.0);
    }

    #[test]
    fn test_cluster_bounds_freeze_by_representative() {
        let mut freeze = GeometryFreeze::new();
        let rep = zone("rep", 100.0, 102.0);
        let mut cluster = ZoneCluster {
            representative: rep.clone(),
            members: vec![rep.clone()],
            start_time: 3_600,
            min: 100.0,
            max: 102.0,
        };
        freeze.freeze_cluster(&mut cluster);

        cluster.max = 103.0;
        assert!(freeze.freeze_cluster(&mut cluster));
        assert_eq!(cluster.max, 102.0);
        assert_eq!(freeze.cluster_count(), 1);
    }
}
