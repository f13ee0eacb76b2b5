// src/geometry.rs
// Pure numeric helpers: range normalization, price<->pixel queries, volatility tolerance

use crate::types::{Bar, PriceRange, MIN_PRICE_SPAN};

/// Coordinate queries answered by the charting surface. `None` means the pane
/// has not been measured yet.
pub trait PriceMapper {
    fn pane_height(&self) -> Option<f64>;
    fn price_to_pixel(&self, price: f64) -> Option<f64>;
    fn pixel_to_price(&self, y: f64) -> Option<f64>;
}

/// Sorts the bounds, rejects non-finite input and widens degenerate ranges
/// around their midpoint to `MIN_PRICE_SPAN`.
pub fn normalize_range(a: f64, b: f64) -> Option<PriceRange> {
    if !a.is_finite() || !b.is_finite() {
        return None;
    }
    let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
    if hi - lo >= MIN_PRICE_SPAN {
        return Some(PriceRange::from_normalized(lo, hi));
    }

    let mid = lo + (hi - lo) / 2.0;
    let half = MIN_PRICE_SPAN / 2.0;
    let (mut lo, mut hi) = (mid - half, mid + half);
    // At large magnitudes the half span can vanish in rounding
    let mut widen = MIN_PRICE_SPAN;
    while hi - lo < MIN_PRICE_SPAN || hi <= lo {
        lo = mid - widen;
        hi = mid + widen;
        widen *= 2.0;
        if !lo.is_finite() || !hi.is_finite() {
            return None;
        }
    }
    Some(PriceRange::from_normalized(lo, hi))
}

/// Scales the anchor-to-bound distances by `factor` (< 1 zooms in).
pub fn scale_about(range: &PriceRange, anchor: f64, factor: f64) -> Option<PriceRange> {
    if !factor.is_finite() || factor <= 0.0 {
        return None;
    }
    let anchor = anchor.clamp(range.min(), range.max());
    let lo = anchor - (anchor - range.min()) * factor;
    let hi = anchor + (range.max() - anchor) * factor;
    normalize_range(lo, hi)
}

pub fn shift(range: &PriceRange, offset: f64) -> Option<PriceRange> {
    normalize_range(range.min() + offset, range.max() + offset)
}

/// Pan offset in price units for a vertical pixel delta.
pub fn pan_offset(delta_px: f64, pane_height_px: f64, span: f64, pan_factor: f64) -> Option<f64> {
    if !(pane_height_px > 0.0) || !delta_px.is_finite() {
        return None;
    }
    Some((-delta_px / pane_height_px) * span * pan_factor)
}

/// Intersection over the smaller span. Point-like bands count as fully
/// overlapping when they touch.
pub fn overlap_ratio(a_min: f64, a_max: f64, b_min: f64, b_max: f64) -> f64 {
    let inter = a_max.min(b_max) - a_min.max(b_min);
    if inter < 0.0 {
        return 0.0;
    }
    let smaller = (a_max - a_min).min(b_max - b_min);
    if smaller <= 0.0 {
        return 1.0;
    }
    (inter / smaller).min(1.0)
}

/// Mean true range over the last `period` bars.
pub fn average_true_range(bars: &[Bar], period: usize) -> Option<f64> {
    if bars.is_empty() || period == 0 {
        return None;
    }
    let start = bars.len().saturating_sub(period);
    let mut sum = 0.0;
    let mut count = 0usize;
    for i in start..bars.len() {
        let bar = &bars[i];
        if !bar.is_finite() {
            continue;
        }
        let mut tr = bar.high - bar.low;
        if i > 0 && bars[i - 1].close.is_finite() {
            let prev_close = bars[i - 1].close;
            tr = tr
                .max((bar.high - prev_close).abs())
                .max((bar.low - prev_close).abs());
        }
        sum += tr;
        count += 1;
    }
    if count == 0 {
        None
    } else {
        Some(sum / count as f64)
    }
}

/// Distance window scaled by recent volatility, never below `ref * min_ratio`.
pub fn volatility_window(bars: &[Bar], period: usize, atr_mult: f64, reference: f64, min_ratio: f64) -> f64 {
    let floor = reference.abs() * min_ratio;
    match average_true_range(bars, period) {
        Some(atr) if atr.is_finite() => (atr * atr_mult).max(floor),
        _ => floor,
    }
}

pub fn snap_to_tick(price: f64, tick_size: f64) -> f64 {
    if !(tick_size > 0.0) || !tick_size.is_finite() {
        return price;
    }
    (price / tick_size).round() * tick_size
}
