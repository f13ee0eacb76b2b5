// src/engine.rs
// OverlayEngine: one instance per chart surface, owns every mutable cache

use crate::bars::{BarCache, BarUpdate};
use crate::config::EngineConfig;
use crate::diagnostics::{EngineDiagnostics, IssueClass, RateLimitedLog};
use crate::errors::{OverlayError, OverlayResult};
use crate::geometry::snap_to_tick;
use crate::labels::{LabelItem, LabelLayout, LabelPacker};
use crate::lifecycle::{OverlayLifecycle, PrimitiveFamily, PrimitiveSpec};
use crate::price_scale::{Gesture, PriceScale, ScaleEffect};
use crate::scheduler::CoalescedTask;
use crate::surface::ChartSurface;
use crate::timeframe::Timeframe;
use crate::types::{Bar, Level, PoolBand, PoolStatus, PriceRange, SessionWindow, TimeRange, Zone, ZoneLimitMode};
use crate::zones::{SelectionOutput, ZoneEngine};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// Folds a burst of wheel events with the same target into one.
fn merge_wheel(pending: Gesture, next: Gesture) -> Gesture {
    match (pending, next) {
        (
            Gesture::Wheel { delta_y: acc, .. },
            Gesture::Wheel {
                y,
                delta_y,
                modifier,
                region,
            },
        ) => Gesture::Wheel {
            y,
            delta_y: acc + delta_y,
            modifier,
            region,
        },
        (_, next) => next,
    }
}

fn same_wheel_target(a: &Gesture, b: &Gesture) -> bool {
    match (a, b) {
        (
            Gesture::Wheel {
                modifier: ma,
                region: ra,
                ..
            },
            Gesture::Wheel {
                modifier: mb,
                region: rb,
                ..
            },
        ) => ma == mb && ra == rb,
        _ => false,
    }
}

pub struct OverlayEngine<S: ChartSurface> {
    surface: S,
    config: EngineConfig,
    bars: BarCache,
    scale: PriceScale,
    zones: ZoneEngine,
    packer: LabelPacker,
    lifecycle: OverlayLifecycle,
    issues: RateLimitedLog,

    raw_zones: Vec<Zone>,
    pools: Vec<PoolBand>,
    selection: SelectionOutput,
    label_layout: LabelLayout,
    view_timeframe: Option<Timeframe>,
    limit_mode: ZoneLimitMode,

    /// Bumped on every dataset switch; relayouts from older generations are dropped.
    generation: u64,
    pointer: CoalescedTask<Gesture>,
    wheel: CoalescedTask<Gesture>,
    relayout: CoalescedTask<u64>,
    gesture_retry_due: bool,
    label_retry_used: bool,
    stale_relayouts: u64,
    disposed: bool,
}

impl<S: ChartSurface> OverlayEngine<S> {
    /// Fails with `InvalidConfig` when `config` does not validate.
    pub fn new(surface: S, config: EngineConfig) -> OverlayResult<Self> {
        config.validate()?;
        info!(
            "🚀 [ENGINE] Overlay engine created (view {:?}, limit {:?}, debug {})",
            config.view_timeframe, config.zones.zone_limit_mode, config.debug
        );
        Ok(Self {
            surface,
            bars: BarCache::new(),
            scale: PriceScale::new(config.gestures.clone()),
            zones: ZoneEngine::new(config.zones.clone()),
            packer: LabelPacker::new(config.labels.clone()),
            lifecycle: OverlayLifecycle::new(),
            issues: RateLimitedLog::new(config.diagnostic_interval),
            raw_zones: Vec::new(),
            pools: Vec::new(),
            selection: SelectionOutput::default(),
            label_layout: LabelLayout::default(),
            view_timeframe: config.view_timeframe,
            limit_mode: config.zones.zone_limit_mode,
            generation: 0,
            pointer: CoalescedTask::new(),
            wheel: CoalescedTask::new(),
            relayout: CoalescedTask::new(),
            gesture_retry_due: false,
            label_retry_used: false,
            stale_relayouts: 0,
            disposed: false,
            config,
        })
    }

    pub fn surface(&self) -> &S {
        &self.surface
    }

    pub fn surface_mut(&mut self) -> &mut S {
        &mut self.surface
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn bars(&self) -> &BarCache {
        &self.bars
    }

    pub fn effective_range(&self) -> Option<PriceRange> {
        self.scale.effective_range()
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    fn ensure_live(&self) -> OverlayResult<()> {
        if self.disposed {
            Err(OverlayError::Disposed)
        } else {
            Ok(())
        }
    }

    pub fn issue_log(&self) -> &RateLimitedLog {
        &self.issues
    }

    /// Routes adapter findings through the rate-limited log.
    pub fn report_malformed(&mut self, issues: &[(IssueClass, String)]) {
        for (class, detail) in issues {
            self.issues.report(*class, detail);
        }
    }

    // ---- bars ----

    /// Full replacement. A series that is not an extension of the previous
    /// one is a different dataset: every cache is purged and the view refits.
    pub fn set_bars(&mut self, bars: Vec<Bar>) -> OverlayResult<()> {
        self.ensure_live()?;
        let outcome = self.bars.set_bars(bars);
        self.report_malformed(&outcome.issues);

        let autofit = outcome.dataset_changed;
        if autofit {
            self.switch_dataset();
        }
        let snapshot = self.snapshot_viewport(autofit);
        self.surface.render_bars(self.bars.bars());
        self.refresh_zones();
        self.restore_viewport(snapshot, autofit);
        Ok(())
    }

    pub fn update_last_bar(&mut self, bar: Bar) -> OverlayResult<()> {
        self.ensure_live()?;
        match self.bars.update_last_bar(bar) {
            BarUpdate::Rejected => {
                let class = if bar.is_finite() {
                    IssueClass::OutOfOrderBar
                } else {
                    IssueClass::NonFiniteBounds
                };
                self.issues.report(class, &format!("bar update at {} rejected", bar.time));
            }
            update => {
                self.surface.render_bar(&bar);
                // Only a newly closed bar can make more zones truthful
                if update == BarUpdate::Appended || bar.complete {
                    self.refresh_zones();
                }
            }
        }
        Ok(())
    }

    /// Tick-driven preview of the forming bar. Never touches closed history or zones.
    pub fn set_live_bar(&mut self, bar: Bar) -> OverlayResult<()> {
        self.ensure_live()?;
        if self.bars.set_live_bar(bar) {
            self.surface.render_bar(&bar);
        } else {
            self.issues
                .report(IssueClass::OutOfOrderBar, &format!("live bar at {} rejected", bar.time));
        }
        Ok(())
    }

    pub fn clear_live_bar(&mut self) -> OverlayResult<()> {
        self.ensure_live()?;
        self.bars.clear_live_bar();
        Ok(())
    }

    /// Updates the price badge only.
    pub fn on_price_tick(&mut self, price: f64) -> OverlayResult<()> {
        self.ensure_live()?;
        if price.is_finite() {
            self.surface.set_price_badge(Some(price));
        } else {
            self.issues.report(IssueClass::NonFiniteBounds, "price tick is not finite");
        }
        Ok(())
    }

    // ---- annotations ----

    pub fn set_zones(&mut self, zones: Vec<Zone>) -> OverlayResult<()> {
        self.ensure_live()?;
        let snapshot = self.snapshot_viewport(false);
        self.raw_zones = zones;
        self.refresh_zones();
        self.restore_viewport(snapshot, false);
        Ok(())
    }

    /// Incremental single-zone update keyed by identity.
    pub fn upsert_zone(&mut self, zone: Zone) -> OverlayResult<()> {
        self.ensure_live()?;
        match self.raw_zones.iter_mut().find(|z| z.id == zone.id) {
            Some(existing) => *existing = zone,
            None => self.raw_zones.push(zone),
        }
        self.refresh_zones();
        Ok(())
    }

    pub fn set_pools_selected(&mut self, pools: Vec<PoolBand>) -> OverlayResult<()> {
        self.ensure_live()?;
        let snapshot = self.snapshot_viewport(false);

        let mut desired = BTreeMap::new();
        let mut kept = Vec::with_capacity(pools.len());
        for pool in pools {
            if !pool.top.is_finite() || !pool.bot.is_finite() {
                self.issues
                    .report(IssueClass::NonFiniteBounds, &format!("pool {} has non-finite edges", pool.id));
                continue;
            }
            if desired.insert(pool.id.clone(), PrimitiveSpec::for_pool(&pool)).is_some() {
                self.issues
                    .report(IssueClass::DuplicateIdentity, &format!("pool {} repeated", pool.id));
                kept.retain(|p: &PoolBand| p.id != pool.id);
            }
            kept.push(pool);
        }
        self.pools = kept;
        self.lifecycle.reconcile(PrimitiveFamily::Pool, desired, &mut self.surface);
        self.schedule_relayout();

        self.restore_viewport(snapshot, false);
        Ok(())
    }

    /// Levels are snapped to `tick_size`; a missing timeframe is stamped with
    /// the timeframe they were rendered for.
    pub fn set_levels_selected(
        &mut self,
        levels: Vec<Level>,
        render_timeframe: Option<Timeframe>,
        tick_size: f64,
    ) -> OverlayResult<()> {
        self.ensure_live()?;
        let snapshot = self.snapshot_viewport(false);

        let mut desired = BTreeMap::new();
        for mut level in levels {
            if !level.price.is_finite() {
                self.issues
                    .report(IssueClass::NonFiniteBounds, &format!("level {} has no finite price", level.id));
                continue;
            }
            level.price = snap_to_tick(level.price, tick_size);
            if level.timeframe.is_none() {
                level.timeframe = render_timeframe;
            }
            // Last one wins
            if desired.insert(level.id.clone(), PrimitiveSpec::for_level(&level)).is_some() {
                self.issues
                    .report(IssueClass::DuplicateIdentity, &format!("level {} repeated", level.id));
            }
        }
        self.lifecycle.reconcile(PrimitiveFamily::Level, desired, &mut self.surface);

        self.restore_viewport(snapshot, false);
        Ok(())
    }

    pub fn set_sessions(&mut self, sessions: Vec<SessionWindow>) -> OverlayResult<()> {
        self.ensure_live()?;
        let snapshot = self.snapshot_viewport(false);

        let mut desired = BTreeMap::new();
        for session in sessions {
            if session.end <= session.start {
                self.issues.report(
                    IssueClass::InvalidSession,
                    &format!("session {} ends before it starts", session.tag),
                );
                continue;
            }
            let identity = format!("{}@{}", session.tag, session.start);
            desired.insert(identity, PrimitiveSpec::for_session(&session));
        }
        self.lifecycle.reconcile(PrimitiveFamily::Session, desired, &mut self.surface);

        self.restore_viewport(snapshot, false);
        Ok(())
    }

    pub fn set_view_timeframe(&mut self, timeframe: Option<Timeframe>) -> OverlayResult<()> {
        self.ensure_live()?;
        if self.view_timeframe != timeframe {
            debug!("[ENGINE] View timeframe {:?} -> {:?}", self.view_timeframe, timeframe);
            self.view_timeframe = timeframe;
            self.refresh_zones();
        }
        Ok(())
    }

    pub fn set_zone_limit_mode(&mut self, mode: ZoneLimitMode) -> OverlayResult<()> {
        self.ensure_live()?;
        if self.limit_mode != mode {
            self.limit_mode = mode;
            self.refresh_zones();
        }
        Ok(())
    }

    pub fn selection(&self) -> &SelectionOutput {
        &self.selection
    }

    /// Zones under `price`, best first, for tooltips.
    pub fn hit_test(&self, price: f64) -> Vec<&Zone> {
        self.selection.hit_test(price)
    }

    pub fn label_layout(&self) -> &LabelLayout {
        &self.label_layout
    }

    // ---- price scale ----

    /// Hook for every price-bearing series' autoscale.
    pub fn autoscale_query<F>(&mut self, base: F) -> Option<PriceRange>
    where
        F: FnOnce() -> Option<PriceRange>,
    {
        if self.disposed {
            return base();
        }
        self.scale.autoscale_query(base)
    }

    /// Pointer moves and wheel bursts are coalesced to the next frame; anything
    /// else flushes them first and applies immediately.
    pub fn handle_gesture(&mut self, gesture: Gesture) -> OverlayResult<()> {
        self.ensure_live()?;
        match gesture {
            Gesture::PointerMove { .. } => {
                self.pointer.push(gesture, &mut self.surface);
            }
            Gesture::Wheel { .. } => {
                let compatible = self.wheel.pending().map_or(true, |p| same_wheel_target(p, &gesture));
                if !compatible {
                    self.flush_wheel();
                }
                self.wheel.push_merge(gesture, &mut self.surface, merge_wheel);
            }
            _ => {
                self.flush_wheel();
                self.flush_pointer();
                self.apply_gesture(gesture);
            }
        }
        Ok(())
    }

    fn flush_wheel(&mut self) {
        if let Some(pending) = self.wheel.take() {
            self.apply_gesture(pending);
        }
    }

    fn flush_pointer(&mut self) {
        if let Some(pending) = self.pointer.take() {
            self.apply_gesture(pending);
        }
    }

    fn apply_gesture(&mut self, gesture: Gesture) {
        let effect = self.scale.handle_gesture(gesture, &self.surface);
        self.apply_effect(effect);
    }

    fn apply_effect(&mut self, effect: ScaleEffect) {
        if effect.deferred {
            self.gesture_retry_due = true;
            self.surface.request_frame();
        }
        if let Some(enabled) = effect.surface_pan {
            self.surface.set_surface_pan_enabled(enabled);
        }
        if effect.range_changed {
            self.surface.invalidate_price_scale();
            self.schedule_relayout();
        }
        if effect.resync_time_axis {
            self.surface.sync_time_axis();
        }
    }

    /// Viewport moved (pan, zoom, resize): labels need a new position pass.
    pub fn notify_viewport_changed(&mut self) -> OverlayResult<()> {
        self.ensure_live()?;
        self.schedule_relayout();
        Ok(())
    }

    /// Frame callback: deferred gesture retry, coalesced gestures, then the
    /// pending relayout.
    pub fn on_animation_frame(&mut self) {
        if self.disposed {
            return;
        }

        if std::mem::take(&mut self.gesture_retry_due) {
            if let Some(effect) = self.scale.retry_deferred(&self.surface) {
                self.apply_effect(effect);
            }
        }
        self.flush_wheel();
        self.flush_pointer();

        if let Some(generation) = self.relayout.take() {
            if generation != self.generation {
                self.stale_relayouts += 1;
                debug!(
                    "🗑️ [LABELS] Dropping relayout from generation {} (now {})",
                    generation, self.generation
                );
            } else {
                self.run_relayout();
            }
        }
    }

    pub fn resize_to_container(&mut self) -> OverlayResult<bool> {
        self.ensure_live()?;
        match self.surface.container_size() {
            Some((w, h)) if w > 0.0 && h > 0.0 => {
                self.surface.apply_size(w, h);
                self.schedule_relayout();
                Ok(true)
            }
            _ => {
                debug!("[ENGINE] Container not measured, resize skipped");
                Ok(false)
            }
        }
    }

    /// Back to auto range and a fitted time axis.
    pub fn reset_view(&mut self) -> OverlayResult<()> {
        self.ensure_live()?;
        self.pointer.cancel();
        self.scale.cancel_drag();
        self.scale.reset_to_auto();
        self.surface.set_surface_pan_enabled(true);
        self.surface.invalidate_price_scale();
        self.surface.fit_content();
        self.schedule_relayout();
        Ok(())
    }

    /// Tears down every primitive and cache. Further calls return `Disposed`.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        let removed = self.lifecycle.clear_all(&mut self.surface);
        self.pointer.cancel();
        self.wheel.cancel();
        self.relayout.cancel();
        self.label_layout = LabelLayout::default();
        self.surface.place_labels(&self.label_layout);
        self.surface.set_price_badge(None);
        self.surface.set_surface_pan_enabled(true);
        self.scale.clear();
        self.zones.clear();
        self.bars.clear();
        self.raw_zones.clear();
        self.pools.clear();
        self.selection = SelectionOutput::default();
        self.disposed = true;
        info!("👋 [ENGINE] Disposed, {} primitives removed", removed);
    }

    /// Debug-only snapshot of the internal state.
    pub fn diagnostics(&self) -> Option<EngineDiagnostics> {
        if !self.config.debug {
            return None;
        }
        Some(EngineDiagnostics {
            manual_range: self.scale.manual_range(),
            auto_range: self.scale.auto_range(),
            drag_phase: self.scale.drag_phase(),
            drag_engaged: self.scale.is_drag_engaged(),
            deferred_gesture: self.scale.has_deferred(),
            frozen_zones: self.zones.freeze().zone_count(),
            frozen_clusters: self.zones.freeze().cluster_count(),
            primitives: self.lifecycle.len(),
            generation: self.generation,
            stale_relayouts: self.stale_relayouts,
        })
    }

    // ---- internals ----

    fn switch_dataset(&mut self) {
        self.generation += 1;
        info!(
            "🔀 [ENGINE] Dataset changed, purging caches (generation {})",
            self.generation
        );
        self.scale.clear();
        self.zones.clear();
        self.lifecycle.clear_all(&mut self.surface);
        self.raw_zones.clear();
        self.pools.clear();
        self.selection = SelectionOutput::default();
        self.pointer.cancel();
        self.wheel.cancel();
        self.gesture_retry_due = false;
        self.label_retry_used = false;
        self.label_layout = LabelLayout::default();
        self.surface.place_labels(&self.label_layout);
        self.surface.set_surface_pan_enabled(true);
        self.surface.invalidate_price_scale();
    }

    fn snapshot_viewport(&self, autofit: bool) -> Option<TimeRange> {
        if autofit {
            None
        } else {
            self.surface.visible_time_range()
        }
    }

    fn restore_viewport(&mut self, snapshot: Option<TimeRange>, autofit: bool) {
        if autofit {
            self.surface.fit_content();
        } else if let Some(range) = snapshot {
            if self.surface.visible_time_range() != Some(range) {
                self.surface.set_visible_time_range(range);
            }
        }
    }

    fn refresh_zones(&mut self) {
        self.selection = self.zones.select(
            &self.raw_zones,
            &self.bars,
            self.view_timeframe,
            self.limit_mode,
            &mut self.issues,
        );

        let desired: BTreeMap<String, PrimitiveSpec> = self
            .selection
            .clusters
            .iter()
            .map(|c| (c.id().to_string(), PrimitiveSpec::for_cluster(c)))
            .collect();
        let report = self.lifecycle.reconcile(PrimitiveFamily::Zone, desired, &mut self.surface);

        if !report.is_noop() || !self.selection.is_empty() || !self.label_layout.placed.is_empty() {
            self.schedule_relayout();
        }
    }

    fn schedule_relayout(&mut self) {
        self.relayout.push(self.generation, &mut self.surface);
    }

    fn label_items(&self) -> Vec<LabelItem> {
        let mut items: Vec<LabelItem> = self
            .selection
            .clusters
            .iter()
            .map(|c| LabelItem {
                id: format!("zone:{}", c.id()),
                anchor_price: c.mid(),
                priority: i32::from(c.representative.role.rank()) * 10
                    + i32::from(c.representative.state.freshness()),
                timeframe_mask: c.timeframe_mask(),
            })
            .collect();
        items.extend(self.pools.iter().map(|p| LabelItem {
            id: format!("pool:{}", p.id),
            anchor_price: p.top.max(p.bot),
            priority: if p.status == PoolStatus::Active { 1 } else { 0 },
            timeframe_mask: p.timeframe.mask_bit(),
        }));
        items
    }

    fn run_relayout(&mut self) {
        let items = self.label_items();
        match self.packer.layout(&items, &self.surface) {
            Ok(layout) => {
                self.label_retry_used = false;
                debug!(
                    "🏷️ [LABELS] {} placed, {} hidden",
                    layout.placed.len(),
                    layout.hidden.len()
                );
                self.surface.place_labels(&layout);
                self.label_layout = layout;
            }
            Err(e) if e.is_retryable() && !self.label_retry_used => {
                debug!("⏳ [LABELS] {} - retrying next frame", e);
                self.label_retry_used = true;
                self.schedule_relayout();
            }
            Err(e) => {
                debug!("🚫 [LABELS] Relayout abandoned: {}", e);
                self.label_retry_used = false;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::headless::{pump_frames, run_autoscale, HeadlessSurface};
    use crate::price_scale::PointerRegion;

    fn bar(time: i64, close: f64) -> Bar {
        Bar {
            time,
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 1.0,
            complete: true,
        }
    }

    fn zone(id: &str, min: f64, max: f64) -> Zone {
        Zone {
            id: crate::types::ZoneId::new(id),
            min,
            max,
            direction: crate::types::ZoneDirection::Bullish,
            kind: crate::types::ZoneKind::Demand,
            role: crate::types::ZoneRole::Entry,
            state: crate::types::ZoneState::Fresh,
            score: 0.0,
            strength: None,
            confidence: None,
            timeframe: Timeframe::M15,
            origin_time: 900,
            invalidated_time: None,
            why: Vec::new(),
        }
    }

    fn debug_engine() -> OverlayEngine<HeadlessSurface> {
        let config = EngineConfig {
            debug: true,
            ..EngineConfig::default()
        };
        OverlayEngine::new(HeadlessSurface::new(800.0, 500.0), config).unwrap()
    }

    #[test]
    fn test_wheel_burst_is_one_frame_one_zoom() {
        let mut engine = debug_engine();
        engine.set_bars((0..10).map(|i| bar(i * 60, 100.0)).collect()).unwrap();
        run_autoscale(&mut engine);
        let requested = engine.surface().frames_requested();

        for _ in 0..5 {
            engine
                .handle_gesture(Gesture::Wheel {
                    y: 250.0,
                    delta_y: -10.0,
                    modifier: false,
                    region: PointerRegion::PriceAxis,
                })
                .unwrap();
        }
        assert_eq!(engine.surface().frames_requested(), requested + 1);
        assert!(engine.diagnostics().unwrap().manual_range.is_none());

        pump_frames(&mut engine, 4);
        let manual = engine.diagnostics().unwrap().manual_range.unwrap();
        let auto = engine.diagnostics().unwrap().auto_range.unwrap();
        assert!(manual.span() < auto.span());
    }

    #[test]
    fn test_diagnostics_hidden_without_debug() {
        let engine = OverlayEngine::new(HeadlessSurface::new(800.0, 500.0), EngineConfig::default()).unwrap();
        assert!(engine.diagnostics().is_none());
    }

    #[test]
    fn test_disposed_engine_rejects_calls() {
        let mut engine = debug_engine();
        engine.set_bars(vec![bar(0, 1.0)]).unwrap();
        engine.dispose();
        assert!(matches!(engine.set_bars(vec![bar(60, 1.0)]), Err(OverlayError::Disposed)));
        assert!(engine.is_disposed());
        assert_eq!(engine.surface().badge(), None);
    }

    #[test]
    fn test_price_tick_only_moves_badge() {
        let mut engine = debug_engine();
        engine.set_bars(vec![bar(0, 1.0), bar(60, 1.1)]).unwrap();
        let bars_before = engine.surface().bars().to_vec();
        engine.on_price_tick(1.15).unwrap();
        assert_eq!(engine.surface().badge(), Some(1.15));
        assert_eq!(engine.surface().bars(), bars_before.as_slice());
    }

    #[test]
    fn test_levels_snap_to_tick_and_stamp_timeframe() {
        let mut engine = debug_engine();
        let level = Level {
            id: "premium@x".to_string(),
            price: 1.234567,
            kind: crate::types::LevelKind::Premium,
            timeframe: None,
        };
        engine
            .set_levels_selected(vec![level], Some(Timeframe::H4), 0.001)
            .unwrap();
        let (_, spec) = engine.surface().primitives().next().unwrap();
        let price = spec.geometry.top.unwrap();
        assert!((price - 1.235).abs() < 1e-9);
        assert_eq!(spec.style.text.as_deref(), Some("4h premium"));
    }

    #[test]
    fn test_resize_waits_for_measured_container() {
        let mut engine = OverlayEngine::new(HeadlessSurface::unmeasured(), EngineConfig::default()).unwrap();
        assert!(!engine.resize_to_container().unwrap());
        assert_eq!(engine.surface().size(), None);

        engine.surface_mut().set_container_size(Some((640.0, 320.0)));
        assert!(engine.resize_to_container().unwrap());
        assert_eq!(engine.surface().size(), Some((640.0, 320.0)));
        assert!(engine.surface_mut().take_frame_request());
    }

    #[test]
    fn test_reset_view_refits_and_restores_pan() {
        let mut engine = debug_engine();
        engine.set_bars((0..10).map(|i| bar(i * 60, 100.0)).collect()).unwrap();
        run_autoscale(&mut engine);
        engine
            .handle_gesture(Gesture::PointerDown {
                x: 10.0,
                y: 100.0,
                region: PointerRegion::Plot,
            })
            .unwrap();
        engine.handle_gesture(Gesture::PointerMove { x: 10.0, y: 200.0 }).unwrap();
        pump_frames(&mut engine, 4);
        assert!(!engine.surface().is_pan_enabled());
        let fits = engine.surface().fit_count();

        engine.reset_view().unwrap();
        assert!(engine.diagnostics().unwrap().manual_range.is_none());
        assert!(!engine.diagnostics().unwrap().drag_engaged);
        assert!(engine.surface().is_pan_enabled());
        assert_eq!(engine.surface().fit_count(), fits + 1);

        // The pointer is still down, but the surface owns it now
        engine.handle_gesture(Gesture::PointerMove { x: 10.0, y: 300.0 }).unwrap();
        pump_frames(&mut engine, 4);
        assert!(engine.diagnostics().unwrap().manual_range.is_none());
        assert!(engine.surface().is_pan_enabled());
    }

    #[test]
    fn test_invalid_config_rejected_at_construction() {
        let mut config = EngineConfig::default();
        config.labels.min_gap_px = 0.0;
        let result = OverlayEngine::new(HeadlessSurface::new(800.0, 500.0), config);
        assert!(matches!(result, Err(OverlayError::InvalidConfig { .. })));

        let mut config = EngineConfig::default();
        config.gestures.zoom_intensity = -0.002;
        assert!(OverlayEngine::new(HeadlessSurface::new(800.0, 500.0), config).is_err());
    }

    #[test]
    fn test_non_finite_zones_are_skipped_and_reported() {
        let mut engine = debug_engine();
        engine.set_bars((0..10).map(|i| bar(i * 900, 120.0)).collect()).unwrap();

        let good = zone("good", 100.0, 102.0);
        let mut nan = zone("bad", f64::NAN, f64::NAN);
        nan.strength = Some(99.0);
        engine.set_zones(vec![good, nan]).unwrap();
        let selection = engine.selection();
        assert_eq!(selection.clusters.len(), 1);
        assert_eq!(selection.clusters[0].id().as_str(), "good");
        assert_eq!(selection.clusters[0].members.len(), 1);

        engine
            .upsert_zone(zone("wide", f64::NEG_INFINITY, f64::INFINITY))
            .unwrap();
        assert!(engine
            .surface()
            .primitives()
            .all(|(_, spec)| spec.geometry.top.map_or(true, f64::is_finite)
                && spec.geometry.bottom.map_or(true, f64::is_finite)));
        assert_eq!(engine.surface().primitive_count(), 1);
        assert!(engine.issue_log().suppressed_count(IssueClass::NonFiniteBounds) >= 1);
    }

    #[test]
    fn test_repeated_zone_and_level_ids_are_reported() {
        let mut engine = debug_engine();
        engine.set_bars((0..10).map(|i| bar(i * 900, 120.0)).collect()).unwrap();
        engine
            .set_zones(vec![zone("z", 100.0, 101.0), zone("z", 100.5, 101.5), zone("z", 100.7, 101.7)])
            .unwrap();
        assert_eq!(engine.selection().stats.duplicates, 2);
        assert_eq!(engine.issue_log().suppressed_count(IssueClass::DuplicateIdentity), 1);

        let level = |price: f64| Level {
            id: "eq@1h".to_string(),
            price,
            kind: crate::types::LevelKind::Equilibrium,
            timeframe: Some(Timeframe::H1),
        };
        engine
            .set_levels_selected(vec![level(1.0), level(2.0)], None, 0.01)
            .unwrap();
        assert_eq!(engine.issue_log().suppressed_count(IssueClass::DuplicateIdentity), 2);
        let levels: Vec<f64> = engine
            .surface()
            .primitives()
            .filter(|(k, _)| k.family == PrimitiveFamily::Level)
            .filter_map(|(_, spec)| spec.geometry.top)
            .collect();
        assert_eq!(levels, vec![2.0]);
    }

    #[test]
    fn test_invalid_sessions_skipped() {
        let mut engine = debug_engine();
        let sessions = vec![
            SessionWindow {
                start: 0,
                end: 3_600,
                tag: "asia".to_string(),
            },
            SessionWindow {
                start: 7_200,
                end: 7_200,
                tag: "broken".to_string(),
            },
        ];
        engine.set_sessions(sessions).unwrap();
        assert_eq!(engine.surface().primitive_count(), 1);
    }
}
