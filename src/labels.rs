// src/labels.rs
// Collision-avoiding vertical packing for price-anchored badges

use crate::config::LabelConfig;
use crate::errors::OverlayError;
use crate::geometry::PriceMapper;
use crate::timeframe::mask_rank;
use serde::Serialize;
use std::cmp::Ordering;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LabelItem {
    pub id: String,
    pub anchor_price: f64,
    pub priority: i32,
    /// Bitset of timeframes behind the label; higher bits sort first.
    pub timeframe_mask: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlacedLabel {
    pub id: String,
    pub y: f64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabelLayout {
    /// Top to bottom.
    pub placed: Vec<PlacedLabel>,
    pub hidden: Vec<String>,
}

impl LabelLayout {
    pub fn position_of(&self, id: &str) -> Option<f64> {
        self.placed.iter().find(|p| p.id == id).map(|p| p.y)
    }
}

fn placement_order(a: &(LabelItem, f64), b: &(LabelItem, f64)) -> Ordering {
    let (a, b) = (&a.0, &b.0);
    b.priority
        .cmp(&a.priority)
        .then(mask_rank(b.timeframe_mask).cmp(&mask_rank(a.timeframe_mask)))
        .then(b.anchor_price.total_cmp(&a.anchor_price))
        .then_with(|| a.id.cmp(&b.id))
}

#[derive(Debug, Clone)]
pub struct LabelPacker {
    config: LabelConfig,
}

impl LabelPacker {
    pub fn new(config: LabelConfig) -> Self {
        Self { config }
    }

    pub fn min_gap(&self) -> f64 {
        self.config.min_gap_px
    }

    /// Position-only pass. Fails with `GeometryUnavailable` when the pane has
    /// no height yet or a price cannot be mapped, so callers can defer.
    pub fn layout(&self, items: &[LabelItem], mapper: &dyn PriceMapper) -> Result<LabelLayout, OverlayError> {
        let height = match mapper.pane_height() {
            Some(h) if h > 0.0 && h.is_finite() => h,
            _ => return Err(OverlayError::GeometryUnavailable("pane height")),
        };
        let margin = self.config.margin_px;
        let gap = self.config.min_gap_px;

        let mut hidden = Vec::new();
        let mut visible: Vec<(LabelItem, f64)> = Vec::with_capacity(items.len());
        for item in items {
            if !item.anchor_price.is_finite() {
                hidden.push(item.id.clone());
                continue;
            }
            let y = mapper
                .price_to_pixel(item.anchor_price)
                .ok_or(OverlayError::GeometryUnavailable("price to pixel"))?
                .round();
            if y < -margin || y > height + margin {
                hidden.push(item.id.clone());
            } else {
                visible.push((item.clone(), y.clamp(0.0, height)));
            }
        }
        visible.sort_by(placement_order);

        // Ascending y of everything placed so far
        let mut taken: Vec<f64> = Vec::with_capacity(visible.len());
        let mut placed = Vec::with_capacity(visible.len());
        for (item, desired) in visible {
            let mut y = desired;
            for &p in &taken {
                if (y - p).abs() < gap {
                    y = p + gap;
                }
            }
            if y > height {
                debug!("[LABELS] {} pushed past the pane bottom, hidden", item.id);
                hidden.push(item.id);
                continue;
            }
            let at = taken.partition_point(|&p| p < y);
            taken.insert(at, y);
            placed.push(PlacedLabel { id: item.id, y });
        }

        placed.sort_by(|a, b| a.y.total_cmp(&b.y).then_with(|| a.id.cmp(&b.id)));
        hidden.sort();
        Ok(LabelLayout { placed, hidden })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 100 at the bottom, 110 at the top of a 500px pane.
    struct Pane {
        height: Option<f64>,
    }

    impl PriceMapper for Pane {
        fn pane_height(&self) -> Option<f64> {
            self.height
        }

        fn price_to_pixel(&self, price: f64) -> Option<f64> {
            let h = self.height?;
            Some((110.0 - price) / 10.0 * h)
        }

        fn pixel_to_price(&self, y: f64) -> Option<f64> {
            let h = self.height?;
            Some(110.0 - y / h * 10.0)
        }
    }

    fn item(id: &str, price: f64, priority: i32) -> LabelItem {
        LabelItem {
            id: id.to_string(),
            anchor_price: price,
            priority,
            timeframe_mask: 0,
        }
    }

    fn packer() -> LabelPacker {
        LabelPacker::new(LabelConfig {
            min_gap_px: 16.0,
            margin_px: 8.0,
        })
    }

    #[test]
    fn test_crowded_labels_keep_min_gap() {
        let pane = Pane { height: Some(500.0) };
        let items: Vec<LabelItem> = (0..8).map(|i| item(&format!("l{}", i), 105.0 + i as f64 * 0.01, 0)).collect();
        let layout = packer().layout(&items, &pane).unwrap();

        assert_eq!(layout.placed.len(), 8);
        for pair in layout.placed.windows(2) {
            assert!(pair[1].y - pair[0].y >= 16.0);
        }
        assert!(layout.placed.iter().all(|p| p.y >= 0.0 && p.y <= 500.0));
    }

    #[test]
    fn test_offscreen_items_hidden_not_clamped() {
        let pane = Pane { height: Some(500.0) };
        let items = vec![item("above", 111.0, 0), item("inside", 105.0, 0), item("edge", 110.1, 0)];
        let layout = packer().layout(&items, &pane).unwrap();
        assert_eq!(layout.hidden, vec!["above".to_string()]);
        // 110.1 maps to -5px, within the margin, clamped to the top
        assert_eq!(layout.position_of("edge"), Some(0.0));
        assert_eq!(layout.position_of("inside"), Some(250.0));
    }

    #[test]
    fn test_higher_priority_keeps_its_anchor() {
        let pane = Pane { height: Some(500.0) };
        let items = vec![item("low", 105.0, 0), item("high", 105.0, 5)];
        let layout = packer().layout(&items, &pane).unwrap();
        assert_eq!(layout.position_of("high"), Some(250.0));
        assert_eq!(layout.position_of("low"), Some(266.0));
    }

    #[test]
    fn test_pushed_past_bottom_is_hidden() {
        let pane = Pane { height: Some(500.0) };
        let items = vec![item("a", 100.0, 1), item("b", 100.0, 0)];
        let layout = packer().layout(&items, &pane).unwrap();
        assert_eq!(layout.placed.len(), 1);
        assert_eq!(layout.hidden, vec!["b".to_string()]);
    }

    #[test]
    fn test_unmeasured_pane_is_retryable() {
        let pane = Pane { height: None };
        let err = packer().layout(&[item("a", 105.0, 0)], &pane).unwrap_err();
        assert!(err.is_retryable());
    }
}
