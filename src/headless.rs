// src/headless.rs
// In-memory ChartSurface: linear price<->pixel map, records every call. Drives replay and tests.

use crate::engine::OverlayEngine;
use crate::geometry::{normalize_range, PriceMapper};
use crate::labels::LabelLayout;
use crate::lifecycle::{PrimitiveKey, PrimitiveSpec};
use crate::scheduler::FrameScheduler;
use crate::surface::{ChartSurface, PrimitiveHandle};
use crate::types::{Bar, PriceRange, TimeRange};
use std::collections::BTreeMap;

/// Padding added above and below the bar extremes by `base_autoscale`.
const AUTOSCALE_PADDING: f64 = 0.05;

#[derive(Debug)]
pub struct HeadlessSurface {
    width: Option<f64>,
    height: Option<f64>,
    container: Option<(f64, f64)>,
    price_range: Option<PriceRange>,
    time_range: Option<TimeRange>,
    pan_enabled: bool,
    frame_pending: bool,
    frames_requested: usize,
    bars: Vec<Bar>,
    badge: Option<f64>,
    labels: LabelLayout,
    label_passes: usize,
    primitives: BTreeMap<PrimitiveHandle, (PrimitiveKey, PrimitiveSpec)>,
    next_handle: u64,
    fit_count: usize,
    time_syncs: usize,
    price_invalidations: usize,
}

impl HeadlessSurface {
    pub fn new(width: f64, height: f64) -> Self {
        Self {
            width: Some(width),
            height: Some(height),
            container: Some((width, height)),
            price_range: None,
            time_range: None,
            pan_enabled: true,
            frame_pending: false,
            frames_requested: 0,
            bars: Vec::new(),
            badge: None,
            labels: LabelLayout::default(),
            label_passes: 0,
            primitives: BTreeMap::new(),
            next_handle: 1,
            fit_count: 0,
            time_syncs: 0,
            price_invalidations: 0,
        }
    }

    /// A surface whose pane has not been measured yet.
    pub fn unmeasured() -> Self {
        Self {
            width: None,
            height: None,
            container: None,
            ..Self::new(0.0, 0.0)
        }
    }

    /// What the surface's own autoscale would show: bar extremes plus padding.
    pub fn base_autoscale(&self) -> Option<PriceRange> {
        let mut lo = f64::INFINITY;
        let mut hi = f64::NEG_INFINITY;
        for bar in &self.bars {
            lo = lo.min(bar.low);
            hi = hi.max(bar.high);
        }
        if !lo.is_finite() || !hi.is_finite() {
            return None;
        }
        let pad = (hi - lo) * AUTOSCALE_PADDING;
        normalize_range(lo - pad, hi + pad)
    }

    pub fn visible_price_range(&self) -> Option<PriceRange> {
        self.price_range
    }

    pub fn set_visible_price_range(&mut self, range: Option<PriceRange>) {
        self.price_range = range;
    }

    pub fn set_container_size(&mut self, size: Option<(f64, f64)>) {
        self.container = size;
    }

    /// Clears and returns the pending frame request.
    pub fn take_frame_request(&mut self) -> bool {
        std::mem::take(&mut self.frame_pending)
    }

    pub fn frames_requested(&self) -> usize {
        self.frames_requested
    }

    pub fn is_pan_enabled(&self) -> bool {
        self.pan_enabled
    }

    pub fn bars(&self) -> &[Bar] {
        &self.bars
    }

    pub fn badge(&self) -> Option<f64> {
        self.badge
    }

    pub fn labels(&self) -> &LabelLayout {
        &self.labels
    }

    pub fn label_passes(&self) -> usize {
        self.label_passes
    }

    pub fn primitive_count(&self) -> usize {
        self.primitives.len()
    }

    pub fn primitives(&self) -> impl Iterator<Item = (&PrimitiveKey, &PrimitiveSpec)> {
        self.primitives.values().map(|(k, s)| (k, s))
    }

    pub fn fit_count(&self) -> usize {
        self.fit_count
    }

    pub fn time_syncs(&self) -> usize {
        self.time_syncs
    }

    pub fn price_invalidations(&self) -> usize {
        self.price_invalidations
    }

    pub fn size(&self) -> Option<(f64, f64)> {
        self.width.zip(self.height)
    }
}

impl PriceMapper for HeadlessSurface {
    fn pane_height(&self) -> Option<f64> {
        self.height.filter(|h| *h > 0.0)
    }

    fn price_to_pixel(&self, price: f64) -> Option<f64> {
        let h = self.pane_height()?;
        let r = self.price_range?;
        Some((r.max() - price) / r.span() * h)
    }

    fn pixel_to_price(&self, y: f64) -> Option<f64> {
        let h = self.pane_height()?;
        let r = self.price_range?;
        Some(r.max() - y / h * r.span())
    }
}

impl FrameScheduler for HeadlessSurface {
    fn request_frame(&mut self) {
        self.frame_pending = true;
        self.frames_requested += 1;
    }
}

impl ChartSurface for HeadlessSurface {
    fn visible_time_range(&self) -> Option<TimeRange> {
        self.time_range
    }

    fn set_visible_time_range(&mut self, range: TimeRange) {
        self.time_range = Some(range);
    }

    fn fit_content(&mut self) {
        self.fit_count += 1;
        if let (Some(first), Some(last)) = (self.bars.first(), self.bars.last()) {
            self.time_range = Some(TimeRange {
                from: first.time,
                to: last.time,
            });
        }
    }

    fn sync_time_axis(&mut self) {
        self.time_syncs += 1;
    }

    fn set_surface_pan_enabled(&mut self, enabled: bool) {
        self.pan_enabled = enabled;
    }

    fn invalidate_price_scale(&mut self) {
        self.price_invalidations += 1;
    }

    fn render_bars(&mut self, bars: &[Bar]) {
        self.bars = bars.to_vec();
    }

    fn render_bar(&mut self, bar: &Bar) {
        match self.bars.last_mut() {
            Some(last) if last.time == bar.time => *last = *bar,
            _ => self.bars.push(*bar),
        }
    }

    fn set_price_badge(&mut self, price: Option<f64>) {
        self.badge = price;
    }

    fn create_primitive(&mut self, key: &PrimitiveKey, spec: &PrimitiveSpec) -> Option<PrimitiveHandle> {
        let handle = PrimitiveHandle(self.next_handle);
        self.next_handle += 1;
        self.primitives.insert(handle, (key.clone(), spec.clone()));
        Some(handle)
    }

    fn update_primitive(&mut self, handle: PrimitiveHandle, spec: &PrimitiveSpec) -> bool {
        match self.primitives.get_mut(&handle) {
            Some(entry) => {
                entry.1 = spec.clone();
                true
            }
            None => false,
        }
    }

    fn remove_primitive(&mut self, handle: PrimitiveHandle) {
        self.primitives.remove(&handle);
    }

    fn place_labels(&mut self, layout: &LabelLayout) {
        self.labels = layout.clone();
        self.label_passes += 1;
    }

    fn container_size(&self) -> Option<(f64, f64)> {
        self.container
    }

    fn apply_size(&mut self, width: f64, height: f64) {
        self.width = Some(width);
        self.height = Some(height);
    }
}

/// One autoscale pass the way the surface would run it: every price-bearing
/// series asks the engine, the result becomes the visible range.
pub fn run_autoscale(engine: &mut OverlayEngine<HeadlessSurface>) -> Option<PriceRange> {
    let base = engine.surface().base_autoscale();
    let range = engine.autoscale_query(|| base);
    engine.surface_mut().set_visible_price_range(range);
    range
}

/// Runs animation frames while the engine keeps requesting them, up to `max`.
pub fn pump_frames(engine: &mut OverlayEngine<HeadlessSurface>, max: usize) -> usize {
    let mut frames = 0;
    while frames < max && engine.surface_mut().take_frame_request() {
        engine.on_animation_frame();
        frames += 1;
    }
    frames
}
