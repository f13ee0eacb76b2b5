// src/adapter.rs
// Boundary normalization: heterogeneous upstream payloads -> strict internal model.
// Nothing past this module looks at raw field names.

use crate::diagnostics::IssueClass;
use crate::errors::OverlayError;
use crate::timeframe::Timeframe;
use crate::types::{
    Bar, Level, LevelKind, PoolBand, PoolSide, PoolStatus, SessionWindow, Zone, ZoneDirection, ZoneId, ZoneKind,
    ZoneRole, ZoneState,
};
use chrono::{DateTime, NaiveDateTime};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

/// Items that survived normalization plus one entry per dropped item.
#[derive(Debug, Clone)]
pub struct Normalized<T> {
    pub items: Vec<T>,
    pub issues: Vec<(IssueClass, String)>,
}

impl<T> Default for Normalized<T> {
    fn default() -> Self {
        Self {
            items: Vec::new(),
            issues: Vec::new(),
        }
    }
}

impl<T> Normalized<T> {
    fn push(&mut self, result: Result<T, OverlayError>) {
        match result {
            Ok(item) => self.items.push(item),
            Err(OverlayError::Malformed { class, detail }) => self.issues.push((class, detail)),
            Err(other) => self.issues.push((IssueClass::MissingField, other.to_string())),
        }
    }
}

/// Anonymous stable key: same real-world zone, same key, across snapshots.
pub fn anonymous_zone_id(
    timeframe: Timeframe,
    kind: &ZoneKind,
    role: ZoneRole,
    origin_time: i64,
    min: f64,
    max: f64,
    precision: usize,
) -> ZoneId {
    let id_input = format!(
        "{}|{}|{}|{}|{:.prec$}|{:.prec$}",
        timeframe,
        kind.as_str(),
        role.as_str(),
        origin_time,
        min,
        max,
        prec = precision
    );

    let mut hasher = Sha256::new();
    hasher.update(id_input.as_bytes());
    let hex_id = format!("{:x}", hasher.finalize());

    ZoneId(format!("anon-{}", &hex_id[..16]))
}

fn field<'a>(obj: &'a Map<String, Value>, names: &[&str]) -> Option<&'a Value> {
    names
        .iter()
        .filter_map(|n| obj.get(*n))
        .find(|v| !v.is_null())
}

fn num(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn flag(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => n.as_f64().map(|f| f != 0.0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "1" => Some(true),
            "false" | "no" | "0" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn seconds_from_number(n: f64) -> Option<i64> {
    if !n.is_finite() {
        return None;
    }
    // Millisecond epochs are 13 digits
    if n.abs() >= 1e11 {
        Some((n / 1000.0).floor() as i64)
    } else {
        Some(n.floor() as i64)
    }
}

/// Unix seconds, unix milliseconds, numeric strings, RFC 3339 or
/// "YYYY-MM-DD HH:MM:SS" (UTC).
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_f64().and_then(seconds_from_number),
        Value::String(s) => {
            let s = s.trim();
            if let Ok(n) = s.parse::<f64>() {
                return seconds_from_number(n);
            }
            if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
                return Some(dt.timestamp());
            }
            NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S")
                .ok()
                .map(|dt| dt.and_utc().timestamp())
        }
        _ => None,
    }
}

/// Accepts a bare array or an object holding the array under one of `keys`.
fn items_of<'a>(payload: &'a Value, keys: &[&str]) -> Vec<&'a Value> {
    match payload {
        Value::Array(items) => items.iter().collect(),
        Value::Object(obj) => keys
            .iter()
            .filter_map(|k| obj.get(*k))
            .filter_map(|v| v.as_array())
            .flat_map(|arr| arr.iter())
            .collect(),
        _ => Vec::new(),
    }
}

fn require_object<'a>(value: &'a Value, what: &str) -> Result<&'a Map<String, Value>, OverlayError> {
    value
        .as_object()
        .ok_or_else(|| OverlayError::malformed(IssueClass::MissingField, format!("{} is not an object", what)))
}

// --- Bars ---

pub fn normalize_bar(value: &Value) -> Result<Bar, OverlayError> {
    let obj = require_object(value, "bar")?;

    let time = field(obj, &["time", "t", "timestamp", "open_time", "openTime"])
        .and_then(parse_timestamp)
        .ok_or_else(|| OverlayError::malformed(IssueClass::BadTimestamp, "bar without usable time"))?;

    let get = |names: &[&str]| field(obj, names).and_then(num);
    let (open, high, low, close) = match (
        get(&["open", "o"]),
        get(&["high", "h"]),
        get(&["low", "l"]),
        get(&["close", "c"]),
    ) {
        (Some(o), Some(h), Some(l), Some(c)) => (o, h, l, c),
        _ => {
            return Err(OverlayError::malformed(
                IssueClass::MissingField,
                format!("bar {} missing OHLC", time),
            ))
        }
    };
    if ![open, high, low, close].iter().all(|v| v.is_finite()) {
        return Err(OverlayError::malformed(
            IssueClass::NonFiniteBounds,
            format!("bar {} has non-finite prices", time),
        ));
    }

    let volume = get(&["volume", "v", "vol"]).filter(|v| v.is_finite()).unwrap_or(0.0);
    let complete = field(obj, &["complete", "closed", "is_closed", "isClosed", "final", "x"])
        .and_then(flag)
        .unwrap_or(true);

    Ok(Bar {
        time,
        open,
        high: high.max(open).max(close),
        low: low.min(open).min(close),
        close,
        volume,
        complete,
    })
}

pub fn normalize_bars(payload: &Value) -> Normalized<Bar> {
    let mut out = Normalized::default();
    for item in items_of(payload, &["bars", "candles", "data"]) {
        out.push(normalize_bar(item));
    }
    out
}

// --- Zones ---

fn parse_kind(raw: &str) -> ZoneKind {
    match raw.to_lowercase().replace(['-', ' '], "_").as_str() {
        "supply" | "supply_zone" => ZoneKind::Supply,
        "demand" | "demand_zone" => ZoneKind::Demand,
        "ob" | "order_block" | "orderblock" => ZoneKind::OrderBlock,
        "fvg" | "fair_value_gap" | "imbalance" => ZoneKind::FairValueGap,
        "breaker" | "breaker_block" => ZoneKind::Breaker,
        "liquidity" | "pool" => ZoneKind::Liquidity,
        other => ZoneKind::Other(other.to_string()),
    }
}

fn parse_direction(raw: &str) -> ZoneDirection {
    match raw.to_lowercase().as_str() {
        "bullish" | "bull" | "long" | "buy" | "up" | "demand" => ZoneDirection::Bullish,
        "bearish" | "bear" | "short" | "sell" | "down" | "supply" => ZoneDirection::Bearish,
        _ => ZoneDirection::Neutral,
    }
}

fn parse_role(raw: &str) -> ZoneRole {
    match raw.to_lowercase().replace(['-', ' '], "_").as_str() {
        "poi" | "point_of_interest" => ZoneRole::PointOfInterest,
        "entry" => ZoneRole::Entry,
        "target" | "tp" => ZoneRole::Target,
        _ => ZoneRole::Context,
    }
}

fn parse_state(raw: &str) -> Option<ZoneState> {
    match raw.to_lowercase().as_str() {
        "fresh" | "active" | "untested" | "new" => Some(ZoneState::Fresh),
        "tested" | "touched" | "retested" => Some(ZoneState::Tested),
        "mitigated" => Some(ZoneState::Mitigated),
        "invalidated" | "invalid" | "broken" | "inactive" => Some(ZoneState::Invalidated),
        _ => None,
    }
}

fn why_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items.iter().filter_map(text).collect(),
        Some(v) => text(v).into_iter().collect(),
        None => Vec::new(),
    }
}

/// `kind_hint` is used when the zone came from a typed container such as
/// `supply_zones` and carries no type field of its own.
pub fn normalize_zone(value: &Value, kind_hint: Option<ZoneKind>, precision: usize) -> Result<Zone, OverlayError> {
    let obj = require_object(value, "zone")?;
    let explicit_id = field(obj, &["id", "zone_id", "zoneId", "uuid"]).and_then(text);
    let label = explicit_id.clone().unwrap_or_else(|| "<anonymous>".to_string());

    let timeframe_raw = field(obj, &["timeframe", "tf", "interval"])
        .and_then(text)
        .ok_or_else(|| OverlayError::malformed(IssueClass::MissingField, format!("zone {} without timeframe", label)))?;
    let timeframe: Timeframe = timeframe_raw.parse().map_err(|_| {
        OverlayError::malformed(
            IssueClass::UnknownTimeframe,
            format!("zone {} has timeframe '{}'", label, timeframe_raw),
        )
    })?;

    let origin_time = field(obj, &["origin_time", "originTime", "start_time", "startTime", "time", "t"])
        .and_then(parse_timestamp)
        .ok_or_else(|| OverlayError::malformed(IssueClass::BadTimestamp, format!("zone {} without origin time", label)))?;

    let lo = field(obj, &["min", "low", "bottom", "bot", "zone_low", "lo"]);
    let hi = field(obj, &["max", "high", "top", "zone_high", "hi"]);
    let (a, b) = match (lo.and_then(num), hi.and_then(num)) {
        (Some(a), Some(b)) => (a, b),
        _ => {
            return Err(OverlayError::malformed(
                IssueClass::MissingField,
                format!("zone {} without price bounds", label),
            ))
        }
    };
    if !a.is_finite() || !b.is_finite() {
        return Err(OverlayError::malformed(
            IssueClass::NonFiniteBounds,
            format!("zone {} bounds {} / {}", label, a, b),
        ));
    }
    let (min, max) = if a <= b { (a, b) } else { (b, a) };

    let kind = field(obj, &["type", "zone_type", "zoneType", "kind"])
        .and_then(text)
        .map(|s| parse_kind(&s))
        .or(kind_hint)
        .unwrap_or_else(|| ZoneKind::Other("zone".to_string()));

    let direction = field(obj, &["direction", "dir", "side", "bias"])
        .and_then(text)
        .map(|s| parse_direction(&s))
        .unwrap_or(match kind {
            ZoneKind::Supply => ZoneDirection::Bearish,
            ZoneKind::Demand => ZoneDirection::Bullish,
            _ => ZoneDirection::Neutral,
        });

    let role = match field(obj, &["role"]).and_then(text) {
        Some(r) => parse_role(&r),
        None if field(obj, &["poi", "is_poi", "isPoi"]).and_then(flag) == Some(true) => ZoneRole::PointOfInterest,
        None => ZoneRole::Context,
    };

    let invalidated_time = field(
        obj,
        &["invalidated_time", "invalidatedTime", "invalidation_time", "end_time", "endTime"],
    )
    .and_then(parse_timestamp);

    let state = field(obj, &["state", "status"])
        .and_then(text)
        .and_then(|s| parse_state(&s))
        .unwrap_or_else(|| {
            let inactive = field(obj, &["is_active", "isActive"]).and_then(flag) == Some(false);
            let touches = field(obj, &["touch_count", "touchCount"]).and_then(num).unwrap_or(0.0);
            if inactive || invalidated_time.is_some() {
                ZoneState::Invalidated
            } else if touches > 0.0 {
                ZoneState::Tested
            } else {
                ZoneState::Fresh
            }
        });

    let score = field(obj, &["score", "quality_score", "qualityScore"])
        .and_then(num)
        .filter(|v| v.is_finite())
        .unwrap_or(0.0);
    let strength = field(obj, &["strength", "strength_score", "strengthScore"])
        .and_then(num)
        .filter(|v| v.is_finite());
    let confidence = field(obj, &["confidence", "conf"]).and_then(num).filter(|v| v.is_finite());

    let id = match explicit_id {
        Some(id) => ZoneId(id),
        None => {
            let id = anonymous_zone_id(timeframe, &kind, role, origin_time, min, max, precision);
            debug!("[ADAPTER] Assigned anonymous key {} to {} zone at {}", id, timeframe, origin_time);
            id
        }
    };

    Ok(Zone {
        id,
        min,
        max,
        direction,
        kind,
        role,
        state,
        score,
        strength,
        confidence,
        timeframe,
        origin_time,
        invalidated_time,
        why: why_list(field(obj, &["why", "reasons", "notes"])),
    })
}

pub fn normalize_zones(payload: &Value, precision: usize) -> Normalized<Zone> {
    let mut out = Normalized::default();
    for item in items_of(payload, &["zones", "items", "data"]) {
        out.push(normalize_zone(item, None, precision));
    }
    for (key, hint) in [("supply_zones", ZoneKind::Supply), ("demand_zones", ZoneKind::Demand)] {
        if let Some(container) = payload.get(key) {
            // Either an array or the recognizer's {"zones": [...]} wrapper
            for item in items_of(container, &["zones"]) {
                out.push(normalize_zone(item, Some(hint.clone()), precision));
            }
        }
    }
    out
}

// --- Pools ---

pub fn normalize_pool(value: &Value) -> Result<PoolBand, OverlayError> {
    let obj = require_object(value, "pool")?;
    let id = field(obj, &["id", "pool_id", "poolId"])
        .and_then(text)
        .ok_or_else(|| OverlayError::malformed(IssueClass::MissingIdentity, "pool without id"))?;

    let timeframe = field(obj, &["timeframe", "tf", "interval"])
        .and_then(text)
        .ok_or_else(|| OverlayError::malformed(IssueClass::MissingField, format!("pool {} without timeframe", id)))?
        .parse::<Timeframe>()
        .map_err(|e| OverlayError::malformed(IssueClass::UnknownTimeframe, format!("pool {}: {}", id, e)))?;

    let top = field(obj, &["top", "max", "high"]).and_then(num);
    let bot = field(obj, &["bot", "bottom", "min", "low"]).and_then(num);
    let (top, bot) = match (top, bot) {
        (Some(t), Some(b)) if t.is_finite() && b.is_finite() => (t.max(b), t.min(b)),
        (Some(_), Some(_)) => {
            return Err(OverlayError::malformed(
                IssueClass::NonFiniteBounds,
                format!("pool {} has non-finite edges", id),
            ))
        }
        _ => {
            return Err(OverlayError::malformed(
                IssueClass::MissingField,
                format!("pool {} without edges", id),
            ))
        }
    };

    let swept_flag = field(obj, &["swept", "is_swept", "isSwept"]).and_then(flag).unwrap_or(false);
    let status = match field(obj, &["status", "state"]).and_then(text) {
        Some(s) if matches!(s.to_lowercase().as_str(), "swept" | "taken" | "mitigated" | "grabbed") => PoolStatus::Swept,
        _ if swept_flag => PoolStatus::Swept,
        _ => PoolStatus::Active,
    };

    let kind = field(obj, &["kind", "type"])
        .and_then(text)
        .map(|s| s.to_lowercase())
        .unwrap_or_else(|| "pool".to_string());

    let side = match field(obj, &["side", "direction"]).and_then(text).map(|s| s.to_lowercase()) {
        Some(s) if matches!(s.as_str(), "buy" | "buy_side" | "buyside" | "bsl" | "above" | "high") => PoolSide::BuySide,
        Some(s) if matches!(s.as_str(), "sell" | "sell_side" | "sellside" | "ssl" | "below" | "low") => {
            PoolSide::SellSide
        }
        _ if kind.contains("high") || kind.contains("bsl") => PoolSide::BuySide,
        _ => PoolSide::SellSide,
    };

    Ok(PoolBand {
        id,
        timeframe,
        top,
        bot,
        status,
        kind,
        side,
    })
}

pub fn normalize_pools(payload: &Value) -> Normalized<PoolBand> {
    let mut out = Normalized::default();
    for item in items_of(payload, &["pools", "liquidity", "items"]) {
        out.push(normalize_pool(item));
    }
    out
}

// --- Levels ---

fn parse_level_kind(raw: &str) -> LevelKind {
    match raw.to_lowercase().as_str() {
        "premium" => LevelKind::Premium,
        "discount" => LevelKind::Discount,
        "equilibrium" | "eq" | "mid" | "50%" => LevelKind::Equilibrium,
        _ => LevelKind::Other,
    }
}

pub fn normalize_level(value: &Value) -> Result<Level, OverlayError> {
    let obj = require_object(value, "level")?;
    let price = field(obj, &["price", "value", "level", "y"])
        .and_then(num)
        .ok_or_else(|| OverlayError::malformed(IssueClass::MissingField, "level without price"))?;
    if !price.is_finite() {
        return Err(OverlayError::malformed(IssueClass::NonFiniteBounds, "level price is not finite"));
    }
    let kind = field(obj, &["kind", "type", "zone"])
        .and_then(text)
        .map(|s| parse_level_kind(&s))
        .unwrap_or(LevelKind::Other);
    let timeframe = field(obj, &["timeframe", "tf"])
        .and_then(text)
        .and_then(|s| s.parse::<Timeframe>().ok());
    let id = field(obj, &["id", "level_id", "levelId"]).and_then(text).unwrap_or_else(|| {
        let tf = timeframe.map(|t| t.to_string()).unwrap_or_else(|| "any".to_string());
        format!("{:?}@{}", kind, tf).to_lowercase()
    });

    Ok(Level {
        id,
        price,
        kind,
        timeframe,
    })
}

pub fn normalize_levels(payload: &Value) -> Normalized<Level> {
    let mut out = Normalized::default();
    for item in items_of(payload, &["levels", "items"]) {
        out.push(normalize_level(item));
    }
    out
}

// --- Sessions ---

pub fn normalize_session(value: &Value) -> Result<SessionWindow, OverlayError> {
    let obj = require_object(value, "session")?;
    let start = field(obj, &["start", "from", "open"]).and_then(parse_timestamp);
    let end = field(obj, &["end", "to", "close"]).and_then(parse_timestamp);
    let (start, end) = match (start, end) {
        (Some(s), Some(e)) => (s, e),
        _ => {
            return Err(OverlayError::malformed(
                IssueClass::BadTimestamp,
                "session without start/end",
            ))
        }
    };
    if end <= start {
        return Err(OverlayError::malformed(
            IssueClass::InvalidSession,
            format!("session ends at {} before it starts at {}", end, start),
        ));
    }
    let tag = field(obj, &["tag", "name", "session", "label"])
        .and_then(text)
        .unwrap_or_else(|| "session".to_string());

    Ok(SessionWindow { start, end, tag })
}

pub fn normalize_sessions(payload: &Value) -> Normalized<SessionWindow> {
    let mut out = Normalized::default();
    for item in items_of(payload, &["sessions", "windows", "items"]) {
        out.push(normalize_session(item));
    }
    out
}
