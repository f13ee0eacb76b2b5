// src/zones/mod.rs
pub mod cluster;
pub mod engine;
pub mod freeze;
pub mod refine;
pub mod truth;

pub use cluster::{cluster_zones, representative_order, ClusterParams};
pub use engine::{SelectionOutput, SelectionStats, ZoneEngine};
pub use freeze::{FrozenGeometry, GeometryFreeze};
