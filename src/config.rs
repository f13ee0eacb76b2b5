// src/config.rs
// Engine tuning constants, overridable through OVERLAY_* environment variables

use crate::errors::OverlayError;
use crate::timeframe::Timeframe;
use crate::types::ZoneLimitMode;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

#[derive(Debug, Clone)]
pub struct GestureConfig {
    /// Cap on |deltaY| per wheel event before the exponential factor.
    pub wheel_delta_cap: f64,
    /// Exponent per wheel delta unit.
    pub zoom_intensity: f64,
    pub pan_factor: f64,
    /// Vertical drag must exceed this (and |dx|) before it takes over.
    pub drag_activation_px: f64,
}

impl Default for GestureConfig {
    fn default() -> Self {
        Self {
            wheel_delta_cap: 120.0,
            zoom_intensity: 0.002,
            pan_factor: 1.0,
            drag_activation_px: 4.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ZoneConfig {
    /// Intersection over the smaller span needed to merge two zones.
    pub cluster_overlap_ratio: f64,
    /// Gap tolerance as a fraction of the reference price.
    pub cluster_gap_ratio: f64,
    /// Containment tolerance (fraction of reference) for fine zones in HTF views.
    pub containment_tolerance_ratio: f64,
    pub atr_period: usize,
    pub micro_window_atr_mult: f64,
    pub micro_window_min_ratio: f64,
    pub zone_limit_mode: ZoneLimitMode,
    /// Decimal places used for bounds in anonymous zone keys.
    pub anonymous_key_precision: usize,
}

impl Default for ZoneConfig {
    fn default() -> Self {
        Self {
            cluster_overlap_ratio: 0.6,
            cluster_gap_ratio: 0.0001,
            containment_tolerance_ratio: 0.0005,
            atr_period: 14,
            micro_window_atr_mult: 6.0,
            micro_window_min_ratio: 0.0005,
            zone_limit_mode: ZoneLimitMode::Near2,
            anonymous_key_precision: 6,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LabelConfig {
    pub min_gap_px: f64,
    pub margin_px: f64,
}

impl Default for LabelConfig {
    fn default() -> Self {
        Self {
            min_gap_px: 16.0,
            margin_px: 8.0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub gestures: GestureConfig,
    pub zones: ZoneConfig,
    pub labels: LabelConfig,
    pub view_timeframe: Option<Timeframe>,
    pub diagnostic_interval: Duration,
    pub debug: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            gestures: GestureConfig::default(),
            zones: ZoneConfig::default(),
            labels: LabelConfig::default(),
            view_timeframe: None,
            diagnostic_interval: Duration::from_secs(5),
            debug: false,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> Result<T, OverlayError>
where
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .trim()
            .parse::<T>()
            .map_err(|e| OverlayError::invalid_config(key, e.to_string())),
        _ => Ok(default),
    }
}

impl EngineConfig {
    /// Defaults overridden by OVERLAY_* variables. Call `dotenv()` first to
    /// pick up a `.env` file.
    pub fn from_env() -> Result<Self, OverlayError> {
        let d = EngineConfig::default();

        let gestures = GestureConfig {
            wheel_delta_cap: env_parse("OVERLAY_WHEEL_DELTA_CAP", d.gestures.wheel_delta_cap)?,
            zoom_intensity: env_parse("OVERLAY_ZOOM_INTENSITY", d.gestures.zoom_intensity)?,
            pan_factor: env_parse("OVERLAY_PAN_FACTOR", d.gestures.pan_factor)?,
            drag_activation_px: env_parse("OVERLAY_DRAG_ACTIVATION_PX", d.gestures.drag_activation_px)?,
        };

        let zones = ZoneConfig {
            cluster_overlap_ratio: env_parse("OVERLAY_CLUSTER_OVERLAP_RATIO", d.zones.cluster_overlap_ratio)?,
            cluster_gap_ratio: env_parse("OVERLAY_CLUSTER_GAP_RATIO", d.zones.cluster_gap_ratio)?,
            containment_tolerance_ratio: env_parse(
                "OVERLAY_CONTAINMENT_TOLERANCE_RATIO",
                d.zones.containment_tolerance_ratio,
            )?,
            atr_period: env_parse("OVERLAY_ATR_PERIOD", d.zones.atr_period)?,
            micro_window_atr_mult: env_parse("OVERLAY_MICRO_WINDOW_ATR_MULT", d.zones.micro_window_atr_mult)?,
            micro_window_min_ratio: env_parse("OVERLAY_MICRO_WINDOW_MIN_RATIO", d.zones.micro_window_min_ratio)?,
            zone_limit_mode: env_parse("OVERLAY_ZONE_LIMIT_MODE", d.zones.zone_limit_mode)?,
            anonymous_key_precision: env_parse("OVERLAY_ANON_KEY_PRECISION", d.zones.anonymous_key_precision)?,
        };

        let labels = LabelConfig {
            min_gap_px: env_parse("OVERLAY_LABEL_MIN_GAP_PX", d.labels.min_gap_px)?,
            margin_px: env_parse("OVERLAY_LABEL_MARGIN_PX", d.labels.margin_px)?,
        };

        let view_timeframe = match std::env::var("OVERLAY_VIEW_TIMEFRAME") {
            Ok(raw) if !raw.trim().is_empty() => Some(
                raw.parse::<Timeframe>()
                    .map_err(|e| OverlayError::invalid_config("OVERLAY_VIEW_TIMEFRAME", e.to_string()))?,
            ),
            _ => None,
        };

        let diagnostic_secs: u64 = env_parse("OVERLAY_DIAGNOSTIC_INTERVAL_SECS", d.diagnostic_interval.as_secs())?;
        let debug: bool = env_parse("OVERLAY_DEBUG", d.debug)?;

        let config = Self {
            gestures,
            zones,
            labels,
            view_timeframe,
            diagnostic_interval: Duration::from_secs(diagnostic_secs),
            debug,
        };
        config.validate()?;

        info!("🎛️ Overlay engine configuration loaded:");
        info!(
            "   Cluster overlap ratio: {:.2}, gap ratio: {:.5}",
            config.zones.cluster_overlap_ratio, config.zones.cluster_gap_ratio
        );
        info!(
            "   Label gap: {:.0}px, margin: {:.0}px, debug: {}",
            config.labels.min_gap_px, config.labels.margin_px, config.debug
        );

        Ok(config)
    }

    pub fn validate(&self) -> Result<(), OverlayError> {
        let z = &self.zones;
        if !(z.cluster_overlap_ratio > 0.0 && z.cluster_overlap_ratio <= 1.0) {
            return Err(OverlayError::invalid_config(
                "cluster_overlap_ratio",
                format!("must be in (0, 1], got {}", z.cluster_overlap_ratio),
            ));
        }
        for (key, value) in [
            ("cluster_gap_ratio", z.cluster_gap_ratio),
            ("containment_tolerance_ratio", z.containment_tolerance_ratio),
            ("micro_window_atr_mult", z.micro_window_atr_mult),
            ("micro_window_min_ratio", z.micro_window_min_ratio),
            ("label_margin_px", self.labels.margin_px),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(OverlayError::invalid_config(key, format!("must be finite and >= 0, got {}", value)));
            }
        }
        for (key, value) in [
            ("wheel_delta_cap", self.gestures.wheel_delta_cap),
            ("zoom_intensity", self.gestures.zoom_intensity),
            ("pan_factor", self.gestures.pan_factor),
            ("label_min_gap_px", self.labels.min_gap_px),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(OverlayError::invalid_config(key, format!("must be finite and > 0, got {}", value)));
            }
        }
        if !self.gestures.drag_activation_px.is_finite() || self.gestures.drag_activation_px < 0.0 {
            return Err(OverlayError::invalid_config(
                "drag_activation_px",
                format!("must be finite and >= 0, got {}", self.gestures.drag_activation_px),
            ));
        }
        if z.atr_period == 0 {
            return Err(OverlayError::invalid_config("atr_period", "must be at least 1"));
        }
        Ok(())
    }
}
