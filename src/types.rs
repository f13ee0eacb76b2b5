// src/types.rs
// Strict internal data model. Raw upstream payloads are mapped into these by `adapter`.

use crate::timeframe::Timeframe;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Smallest allowed price span. Keeps zoom/pan factor math away from zero.
pub const MIN_PRICE_SPAN: f64 = 1e-8;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    #[serde(default)]
    pub volume: f64,
    #[serde(default = "default_complete")]
    pub complete: bool,
}

fn default_complete() -> bool {
    true
}

impl Bar {
    pub fn is_finite(&self) -> bool {
        self.open.is_finite() && self.high.is_finite() && self.low.is_finite() && self.close.is_finite()
    }
}

/// Vertical viewport bounds. Only built through `geometry::normalize_range`,
/// so `max > min` and `max - min >= MIN_PRICE_SPAN` always hold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct PriceRange {
    min: f64,
    max: f64,
}

impl PriceRange {
    pub(crate) fn from_normalized(min: f64, max: f64) -> Self {
        Self { min, max }
    }

    pub fn min(&self) -> f64 {
        self.min
    }

    pub fn max(&self) -> f64 {
        self.max
    }

    pub fn span(&self) -> f64 {
        self.max - self.min
    }

    pub fn mid(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn contains(&self, price: f64) -> bool {
        price >= self.min && price <= self.max
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: i64,
    pub to: i64,
}

/// Stable zone identity: the backend id when present, otherwise an anonymous key
/// derived from the zone's immutable attributes.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ZoneId(pub String);

impl ZoneId {
    pub fn new(id: impl Into<String>) -> Self {
        ZoneId(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_anonymous(&self) -> bool {
        self.0.starts_with("anon-")
    }
}

impl fmt::Display for ZoneId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneDirection {
    Bullish,
    Bearish,
    Neutral,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    Supply,
    Demand,
    OrderBlock,
    FairValueGap,
    Breaker,
    Liquidity,
    Other(String),
}

impl ZoneKind {
    pub fn as_str(&self) -> &str {
        match self {
            ZoneKind::Supply => "supply",
            ZoneKind::Demand => "demand",
            ZoneKind::OrderBlock => "order_block",
            ZoneKind::FairValueGap => "fair_value_gap",
            ZoneKind::Breaker => "breaker",
            ZoneKind::Liquidity => "liquidity",
            ZoneKind::Other(s) => s.as_str(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneRole {
    PointOfInterest,
    Entry,
    Target,
    Context,
}

impl ZoneRole {
    pub fn rank(&self) -> u8 {
        match self {
            ZoneRole::PointOfInterest => 3,
            ZoneRole::Entry => 2,
            ZoneRole::Target => 1,
            ZoneRole::Context => 0,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ZoneRole::PointOfInterest => "poi",
            ZoneRole::Entry => "entry",
            ZoneRole::Target => "target",
            ZoneRole::Context => "context",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneState {
    Fresh,
    Tested,
    Mitigated,
    Invalidated,
}

impl ZoneState {
    /// Higher is fresher.
    pub fn freshness(&self) -> u8 {
        match self {
            ZoneState::Fresh => 3,
            ZoneState::Tested => 2,
            ZoneState::Mitigated => 1,
            ZoneState::Invalidated => 0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Zone {
    pub id: ZoneId,
    pub min: f64,
    pub max: f64,
    pub direction: ZoneDirection,
    pub kind: ZoneKind,
    pub role: ZoneRole,
    pub state: ZoneState,
    pub score: f64,
    pub strength: Option<f64>,
    pub confidence: Option<f64>,
    pub timeframe: Timeframe,
    pub origin_time: i64,
    pub invalidated_time: Option<i64>,
    #[serde(default)]
    pub why: Vec<String>,
}

impl Zone {
    pub fn width(&self) -> f64 {
        self.max - self.min
    }

    pub fn mid(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    pub fn contains_price(&self, price: f64) -> bool {
        price >= self.min && price <= self.max
    }

    /// Absolute distance from `price` to the band, zero when inside.
    pub fn distance_to(&self, price: f64) -> f64 {
        if price < self.min {
            self.min - price
        } else if price > self.max {
            price - self.max
        } else {
            0.0
        }
    }
}

/// A merged group of overlapping/adjacent zones displayed as one band.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ZoneCluster {
    pub representative: Zone,
    pub members: Vec<Zone>,
    pub start_time: i64,
    pub min: f64,
    pub max: f64,
}

impl ZoneCluster {
    pub fn id(&self) -> &ZoneId {
        &self.representative.id
    }

    pub fn mid(&self) -> f64 {
        (self.min + self.max) / 2.0
    }

    /// Union of member timeframe bits, used for label ordering.
    pub fn timeframe_mask(&self) -> u32 {
        self.members
            .iter()
            .fold(0u32, |acc, z| acc | z.timeframe.mask_bit())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolStatus {
    Active,
    Swept,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoolSide {
    BuySide,
    SellSide,
}

/// Liquidity pool band: two edge segments plus a translucent fill.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoolBand {
    pub id: String,
    pub timeframe: Timeframe,
    pub top: f64,
    pub bot: f64,
    pub status: PoolStatus,
    pub kind: String,
    pub side: PoolSide,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LevelKind {
    Premium,
    Discount,
    Equilibrium,
    Other,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub id: String,
    pub price: f64,
    pub kind: LevelKind,
    pub timeframe: Option<Timeframe>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionWindow {
    pub start: i64,
    pub end: i64,
    pub tag: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ZoneLimitMode {
    Near1,
    #[default]
    Near2,
    All,
}

impl ZoneLimitMode {
    /// Zones kept on each side of the reference price in the micro view.
    pub fn per_side(&self) -> Option<usize> {
        match self {
            ZoneLimitMode::Near1 => Some(1),
            ZoneLimitMode::Near2 => Some(2),
            ZoneLimitMode::All => None,
        }
    }
}

impl std::str::FromStr for ZoneLimitMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "near1" => Ok(ZoneLimitMode::Near1),
            "near2" => Ok(ZoneLimitMode::Near2),
            "all" => Ok(ZoneLimitMode::All),
            other => Err(format!("unknown zone limit mode: {}", other)),
        }
    }
}
