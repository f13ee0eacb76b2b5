// src/surface.rs
// The seam to the external charting surface

use crate::geometry::PriceMapper;
use crate::labels::LabelLayout;
use crate::lifecycle::{PrimitiveKey, PrimitiveSpec};
use crate::scheduler::FrameScheduler;
use crate::types::{Bar, TimeRange};
use serde::Serialize;

/// Opaque handle the surface hands out for a drawn primitive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct PrimitiveHandle(pub u64);

/// Everything the engine needs from a charting surface. Price/pixel queries and
/// frame requests come from the supertraits.
pub trait ChartSurface: PriceMapper + FrameScheduler {
    fn visible_time_range(&self) -> Option<TimeRange>;
    fn set_visible_time_range(&mut self, range: TimeRange);
    fn fit_content(&mut self);
    /// Re-aligns the time axis after a price-axis reset.
    fn sync_time_axis(&mut self);

    /// Disabled while a vertical price drag owns the pointer.
    fn set_surface_pan_enabled(&mut self, enabled: bool);
    /// Asks the surface to re-run every series' autoscale query.
    fn invalidate_price_scale(&mut self);

    fn render_bars(&mut self, bars: &[Bar]);
    fn render_bar(&mut self, bar: &Bar);
    fn set_price_badge(&mut self, price: Option<f64>);

    fn create_primitive(&mut self, key: &PrimitiveKey, spec: &PrimitiveSpec) -> Option<PrimitiveHandle>;
    /// In-place update. `false` means the handle is gone and must be recreated.
    fn update_primitive(&mut self, handle: PrimitiveHandle, spec: &PrimitiveSpec) -> bool;
    fn remove_primitive(&mut self, handle: PrimitiveHandle);

    fn place_labels(&mut self, layout: &LabelLayout);

    /// `(width, height)` of the host container, when measured.
    fn container_size(&self) -> Option<(f64, f64)>;
    fn apply_size(&mut self, width: f64, height: f64);
}
