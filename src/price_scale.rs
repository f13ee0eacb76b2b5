// src/price_scale.rs
// Manual vs auto price range, and the gestures that move between them

use crate::config::GestureConfig;
use crate::diagnostics::DragPhase;
use crate::errors::OverlayError;
use crate::geometry::{pan_offset, scale_about, shift, PriceMapper};
use crate::types::PriceRange;
use serde::Serialize;
use tracing::{debug, info};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PointerRegion {
    PriceAxis,
    Plot,
    Outside,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Gesture {
    Wheel {
        y: f64,
        delta_y: f64,
        modifier: bool,
        region: PointerRegion,
    },
    PointerDown {
        x: f64,
        y: f64,
        region: PointerRegion,
    },
    PointerMove {
        x: f64,
        y: f64,
    },
    PointerUp,
    PointerCancel,
    Blur,
    DoubleClick {
        region: PointerRegion,
    },
}

impl Gesture {
    /// Pointer moves and wheel events arrive in bursts and are coalesced per frame.
    pub fn is_high_frequency(&self) -> bool {
        matches!(self, Gesture::PointerMove { .. } | Gesture::Wheel { .. })
    }
}

/// What the caller must apply to the surface after a gesture.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ScaleEffect {
    pub range_changed: bool,
    /// `Some(false)` while a vertical drag owns the pointer, `Some(true)` when it ends.
    pub surface_pan: Option<bool>,
    pub resync_time_axis: bool,
    pub deferred: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum DragState {
    Idle,
    Armed { start_x: f64, start_y: f64 },
    Engaged { start_y: f64, origin: PriceRange },
    /// Horizontal-dominant drag: the surface's time pan keeps it until pointer-up.
    Released,
}

#[derive(Debug)]
pub struct PriceScale {
    manual: Option<PriceRange>,
    last_auto: Option<PriceRange>,
    drag: DragState,
    deferred: Option<Gesture>,
    config: GestureConfig,
}

impl PriceScale {
    pub fn new(config: GestureConfig) -> Self {
        Self {
            manual: None,
            last_auto: None,
            drag: DragState::Idle,
            deferred: None,
            config,
        }
    }

    pub fn manual_range(&self) -> Option<PriceRange> {
        self.manual
    }

    pub fn auto_range(&self) -> Option<PriceRange> {
        self.last_auto
    }

    /// Manual range when set, otherwise the last auto range.
    pub fn effective_range(&self) -> Option<PriceRange> {
        self.manual.or(self.last_auto)
    }

    pub fn is_manual(&self) -> bool {
        self.manual.is_some()
    }

    pub fn apply_manual_range(&mut self, range: PriceRange) {
        debug!("[SCALE] Manual range {:.6}..{:.6}", range.min(), range.max());
        self.manual = Some(range);
    }

    pub fn reset_to_auto(&mut self) {
        if self.manual.take().is_some() {
            info!("🔄 [SCALE] Manual price range cleared, back to auto");
        }
    }

    /// Hook for every price-bearing series. With a manual range active all series
    /// report that same range and `base` is never consulted.
    pub fn autoscale_query<F>(&mut self, base: F) -> Option<PriceRange>
    where
        F: FnOnce() -> Option<PriceRange>,
    {
        if let Some(manual) = self.manual {
            return Some(manual);
        }
        let auto = base();
        if auto.is_some() {
            self.last_auto = auto;
        }
        auto
    }

    pub fn drag_phase(&self) -> DragPhase {
        match self.drag {
            DragState::Idle => DragPhase::Idle,
            DragState::Armed { .. } => DragPhase::Armed,
            DragState::Engaged { .. } => DragPhase::Engaged,
            DragState::Released => DragPhase::Released,
        }
    }

    pub fn is_drag_engaged(&self) -> bool {
        matches!(self.drag, DragState::Engaged { .. })
    }

    /// Drops any drag in progress without touching the range. Returns whether
    /// the drag had engaged.
    pub fn cancel_drag(&mut self) -> bool {
        let engaged = self.is_drag_engaged();
        if !matches!(self.drag, DragState::Idle) {
            debug!("[SCALE] Drag cancelled");
        }
        self.drag = DragState::Idle;
        engaged
    }

    pub fn has_deferred(&self) -> bool {
        self.deferred.is_some()
    }

    /// Forgets everything: manual range, cached auto range, drag and deferral.
    pub fn clear(&mut self) {
        self.manual = None;
        self.last_auto = None;
        self.drag = DragState::Idle;
        self.deferred = None;
    }

    /// Processes one gesture. Missing geometry defers it to the next frame.
    pub fn handle_gesture(&mut self, gesture: Gesture, mapper: &dyn PriceMapper) -> ScaleEffect {
        match self.apply(gesture, mapper) {
            Ok(effect) => effect,
            Err(e) if e.is_retryable() => {
                debug!("⏳ [SCALE] {} - deferring {:?} one frame", e, gesture);
                self.deferred = Some(gesture);
                ScaleEffect {
                    deferred: true,
                    ..ScaleEffect::default()
                }
            }
            Err(e) => {
                debug!("[SCALE] Dropping {:?}: {}", gesture, e);
                ScaleEffect::default()
            }
        }
    }

    /// Single retry of a deferred gesture; abandoned if geometry is still missing.
    pub fn retry_deferred(&mut self, mapper: &dyn PriceMapper) -> Option<ScaleEffect> {
        let gesture = self.deferred.take()?;
        match self.apply(gesture, mapper) {
            Ok(effect) => Some(effect),
            Err(e) => {
                debug!("🚫 [SCALE] Abandoning deferred {:?}: {}", gesture, e);
                None
            }
        }
    }

    fn apply(&mut self, gesture: Gesture, mapper: &dyn PriceMapper) -> Result<ScaleEffect, OverlayError> {
        match gesture {
            Gesture::Wheel {
                y,
                delta_y,
                region: PointerRegion::PriceAxis,
                ..
            } => self.zoom(y, delta_y, mapper),
            Gesture::Wheel {
                delta_y,
                modifier: true,
                region: PointerRegion::Plot,
                ..
            } => self.wheel_pan(delta_y, mapper),
            Gesture::Wheel { .. } => Ok(ScaleEffect::default()),
            Gesture::PointerDown {
                x,
                y,
                region: PointerRegion::Plot,
            } => {
                self.drag = DragState::Armed { start_x: x, start_y: y };
                Ok(ScaleEffect::default())
            }
            Gesture::PointerDown { .. } => {
                self.drag = DragState::Released;
                Ok(ScaleEffect::default())
            }
            Gesture::PointerMove { x, y } => self.drag_move(x, y, mapper),
            Gesture::PointerUp | Gesture::PointerCancel | Gesture::Blur => Ok(self.end_drag()),
            Gesture::DoubleClick {
                region: PointerRegion::PriceAxis,
            } => {
                self.reset_to_auto();
                Ok(ScaleEffect {
                    range_changed: true,
                    resync_time_axis: true,
                    ..ScaleEffect::default()
                })
            }
            Gesture::DoubleClick { .. } => Ok(ScaleEffect::default()),
        }
    }

    fn seed(&self) -> Result<PriceRange, OverlayError> {
        self.effective_range()
            .ok_or(OverlayError::GeometryUnavailable("no price range to seed the gesture"))
    }

    fn zoom(&mut self, y: f64, delta_y: f64, mapper: &dyn PriceMapper) -> Result<ScaleEffect, OverlayError> {
        let magnitude = delta_y.abs().min(self.config.wheel_delta_cap) * self.config.zoom_intensity;
        if !(magnitude > 0.0) {
            return Ok(ScaleEffect::default());
        }
        let seed = self.seed()?;
        let anchor = mapper
            .pixel_to_price(y)
            .ok_or(OverlayError::GeometryUnavailable("pixel_to_price"))?;

        // Scrolling toward the chart zooms in
        let factor = if delta_y < 0.0 { (-magnitude).exp() } else { magnitude.exp() };
        let next = scale_about(&seed, anchor, factor).ok_or(OverlayError::GeometryUnavailable("zoom factor"))?;

        debug!(
            "🔍 [SCALE] Zoom x{:.4} at {:.6}: {:.6}..{:.6} -> {:.6}..{:.6}",
            factor,
            anchor,
            seed.min(),
            seed.max(),
            next.min(),
            next.max()
        );
        self.manual = Some(next);
        Ok(ScaleEffect {
            range_changed: true,
            ..ScaleEffect::default()
        })
    }

    fn wheel_pan(&mut self, delta_y: f64, mapper: &dyn PriceMapper) -> Result<ScaleEffect, OverlayError> {
        if delta_y == 0.0 {
            return Ok(ScaleEffect::default());
        }
        let seed = self.seed()?;
        let height = mapper
            .pane_height()
            .ok_or(OverlayError::GeometryUnavailable("pane height"))?;
        let offset = pan_offset(delta_y, height, seed.span(), self.config.pan_factor)
            .ok_or(OverlayError::GeometryUnavailable("pane height is zero"))?;
        let next = shift(&seed, offset).ok_or(OverlayError::GeometryUnavailable("pan offset"))?;

        self.manual = Some(next);
        Ok(ScaleEffect {
            range_changed: true,
            ..ScaleEffect::default()
        })
    }

    fn drag_move(&mut self, x: f64, y: f64, mapper: &dyn PriceMapper) -> Result<ScaleEffect, OverlayError> {
        match self.drag {
            DragState::Idle | DragState::Released => Ok(ScaleEffect::default()),
            DragState::Armed { start_x, start_y } => {
                let dx = x - start_x;
                let dy = y - start_y;
                let activation = self.config.drag_activation_px;

                if dy.abs() > activation && dy.abs() > dx.abs() {
                    let height = mapper
                        .pane_height()
                        .ok_or(OverlayError::GeometryUnavailable("pane height"))?;
                    let origin = self.seed()?;
                    debug!("✋ [SCALE] Vertical drag engaged after {:.1}px", dy.abs());
                    self.drag = DragState::Engaged { start_y, origin };
                    let mut effect = self.drag_to(origin, dy, height)?;
                    effect.surface_pan = Some(false);
                    Ok(effect)
                } else if dx.abs() > activation && dx.abs() >= dy.abs() {
                    self.drag = DragState::Released;
                    Ok(ScaleEffect::default())
                } else {
                    Ok(ScaleEffect::default())
                }
            }
            DragState::Engaged { start_y, origin } => {
                let height = mapper
                    .pane_height()
                    .ok_or(OverlayError::GeometryUnavailable("pane height"))?;
                self.drag_to(origin, y - start_y, height)
            }
        }
    }

    /// Range at engagement shifted by the cumulative drag. Dragging down reveals
    /// higher prices, hence the flipped delta.
    fn drag_to(&mut self, origin: PriceRange, dy: f64, height: f64) -> Result<ScaleEffect, OverlayError> {
        let offset = pan_offset(-dy, height, origin.span(), self.config.pan_factor)
            .ok_or(OverlayError::GeometryUnavailable("pane height is zero"))?;
        let next = shift(&origin, offset).ok_or(OverlayError::GeometryUnavailable("drag offset"))?;
        let changed = self.manual != Some(next);
        self.manual = Some(next);
        Ok(ScaleEffect {
            range_changed: changed,
            ..ScaleEffect::default()
        })
    }

    fn end_drag(&mut self) -> ScaleEffect {
        let was_engaged = self.is_drag_engaged();
        self.drag = DragState::Idle;
        if was_engaged {
            debug!("✋ [SCALE] Vertical drag finished, surface pan restored");
            ScaleEffect {
                surface_pan: Some(true),
                ..ScaleEffect::default()
            }
        } else {
            ScaleEffect::default()
        }
    }
}
