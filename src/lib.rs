// src/lib.rs
pub mod adapter;
pub mod bars;
pub mod config;
pub mod diagnostics;
pub mod engine;
pub mod errors;
pub mod geometry;
pub mod headless;
pub mod labels;
pub mod lifecycle;
pub mod price_scale;
pub mod scheduler;
pub mod surface;
pub mod timeframe;
pub mod types;
pub mod zones;

pub use config::EngineConfig;
pub use engine::OverlayEngine;
pub use errors::{OverlayError, OverlayResult};
pub use headless::HeadlessSurface;
pub use surface::ChartSurface;
