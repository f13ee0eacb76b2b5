// src/bin/overlay_replay.rs
// Replays a JSON snapshot through the overlay engine on a headless surface

use chrono::Utc;
use clap::Parser;
use serde::Serialize;
use serde_json::Value;
use std::fs::File;
use std::path::PathBuf;
use tracing::{info, warn};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};
use zone_overlay::adapter::{normalize_bars, normalize_levels, normalize_pools, normalize_sessions, normalize_zones};
use zone_overlay::headless::{pump_frames, run_autoscale, HeadlessSurface};
use zone_overlay::lifecycle::PrimitiveFamily;
use zone_overlay::timeframe::Timeframe;
use zone_overlay::types::{ZoneCluster, ZoneLimitMode};
use zone_overlay::zones::SelectionStats;
use zone_overlay::{EngineConfig, OverlayEngine};

#[derive(Parser, Debug)]
#[command(name = "overlay-replay")]
#[command(about = "Run a bars/zones snapshot through the overlay engine and report what would be drawn")]
struct Args {
    /// Snapshot JSON with bars, zones, pools, levels and sessions
    input: PathBuf,

    /// Pane width in pixels
    #[arg(long, default_value_t = 1200.0)]
    width: f64,

    /// Pane height in pixels
    #[arg(long, default_value_t = 600.0)]
    height: f64,

    /// View timeframe (e.g. 1m, 15m, 4h). Defaults to OVERLAY_VIEW_TIMEFRAME or the bar spacing
    #[arg(long)]
    view_tf: Option<String>,

    /// Zone limit for micro views: near1, near2 or all
    #[arg(long)]
    zone_limit: Option<String>,

    /// Tick size levels are snapped to
    #[arg(long, default_value_t = 0.00001)]
    tick_size: f64,

    /// Write the cluster table to this CSV file
    #[arg(long)]
    csv: Option<PathBuf>,

    /// Directory for the daily rolling log
    #[arg(long, default_value = "logs")]
    log_dir: String,

    /// Enable debug logging and the engine diagnostics block
    #[arg(short, long)]
    debug: bool,
}

#[derive(Serialize)]
struct ClusterRow {
    id: String,
    min: f64,
    max: f64,
    start_time: i64,
    members: usize,
    timeframes: String,
    role: &'static str,
}

impl From<&ZoneCluster> for ClusterRow {
    fn from(c: &ZoneCluster) -> Self {
        let mut tfs: Vec<Timeframe> = c.members.iter().map(|z| z.timeframe).collect();
        tfs.sort();
        tfs.dedup();
        let timeframes: Vec<String> = tfs.iter().map(|t| t.to_string()).collect();
        Self {
            id: c.id().to_string(),
            min: c.min,
            max: c.max,
            start_time: c.start_time,
            members: c.members.len(),
            timeframes: timeframes.join("|"),
            role: c.representative.role.as_str(),
        }
    }
}

#[derive(Serialize)]
struct Report {
    generated_at: String,
    reference_price: Option<f64>,
    stats: SelectionStats,
    clusters: Vec<ClusterRow>,
    labels: zone_overlay::labels::LabelLayout,
    primitives: Vec<(String, String)>,
    malformed: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<zone_overlay::diagnostics::EngineDiagnostics>,
}

fn init_logging(log_dir: &str, debug: bool) -> Result<(), Box<dyn std::error::Error>> {
    std::fs::create_dir_all(log_dir)?;
    let file_appender = tracing_appender::rolling::daily(log_dir, "overlay_replay");
    let default_level = if debug { "debug" } else { "info" };

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_writer(std::io::stderr)
                .with_target(false)
                .with_level(true)
                .compact(),
        )
        .with(
            fmt::layer()
                .with_writer(file_appender)
                .with_target(true)
                .with_level(true)
                .with_ansi(false),
        )
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .init();
    Ok(())
}

fn section<'a>(doc: &'a Value, key: &str) -> &'a Value {
    doc.get(key).unwrap_or(&Value::Null)
}

fn write_csv(path: &PathBuf, rows: &[ClusterRow]) -> Result<(), Box<dyn std::error::Error>> {
    info!("📝 Writing {} clusters to CSV: {}", rows.len(), path.display());
    let file = File::create(path)?;
    let mut writer = csv::Writer::from_writer(file);
    for row in rows {
        writer.serialize(row)?;
    }
    writer.flush()?;
    Ok(())
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();
    let args = Args::parse();
    init_logging(&args.log_dir, args.debug)?;

    let mut config = EngineConfig::from_env()?;
    config.debug |= args.debug;
    if let Some(raw) = &args.view_tf {
        config.view_timeframe = Some(raw.parse::<Timeframe>()?);
    }
    if let Some(raw) = &args.zone_limit {
        config.zones.zone_limit_mode = raw.parse::<ZoneLimitMode>()?;
    }
    let precision = config.zones.anonymous_key_precision;
    let render_tf = config.view_timeframe;

    let raw = std::fs::read_to_string(&args.input)?;
    let doc: Value = serde_json::from_str(&raw)?;

    let bars = normalize_bars(section(&doc, "bars"));
    let zones = normalize_zones(&doc, precision);
    let pools = normalize_pools(section(&doc, "pools"));
    let levels = normalize_levels(section(&doc, "levels"));
    let sessions = normalize_sessions(section(&doc, "sessions"));
    info!(
        "📥 Loaded {} bars, {} zones, {} pools, {} levels, {} sessions from {}",
        bars.items.len(),
        zones.items.len(),
        pools.items.len(),
        levels.items.len(),
        sessions.items.len(),
        args.input.display()
    );

    let malformed = bars.issues.len() + zones.issues.len() + pools.issues.len() + levels.issues.len() + sessions.issues.len();
    if malformed > 0 {
        warn!("⚠️ {} payload items dropped during normalization", malformed);
    }

    let mut engine = OverlayEngine::new(HeadlessSurface::new(args.width, args.height), config)?;
    for issues in [&bars.issues, &zones.issues, &pools.issues, &levels.issues, &sessions.issues] {
        engine.report_malformed(issues);
    }

    engine.set_bars(bars.items)?;
    run_autoscale(&mut engine);
    engine.set_zones(zones.items)?;
    engine.set_pools_selected(pools.items)?;
    engine.set_levels_selected(levels.items, render_tf, args.tick_size)?;
    engine.set_sessions(sessions.items)?;
    let last_close = engine.bars().bars().last().map(|b| b.close);
    if let Some(close) = last_close {
        engine.on_price_tick(close)?;
    }
    engine.notify_viewport_changed()?;
    pump_frames(&mut engine, 8);

    let selection = engine.selection();
    let clusters: Vec<ClusterRow> = selection.clusters.iter().map(ClusterRow::from).collect();
    let primitives = engine
        .surface()
        .primitives()
        .map(|(key, spec)| {
            let text = spec.style.text.clone().unwrap_or_default();
            (format!("{}:{}", key.family, key.identity), text)
        })
        .collect();

    if let Some(path) = &args.csv {
        write_csv(path, &clusters)?;
    }

    let report = Report {
        generated_at: Utc::now().to_rfc3339(),
        reference_price: selection.reference_price,
        stats: selection.stats,
        clusters,
        labels: engine.label_layout().clone(),
        primitives,
        malformed,
        diagnostics: engine.diagnostics(),
    };
    println!("{}", serde_json::to_string_pretty(&report)?);

    info!(
        "✅ Replay done: {} zone bands, {} pools drawn",
        report.clusters.len(),
        engine.surface().primitives().filter(|(k, _)| k.family == PrimitiveFamily::Pool).count()
    );
    engine.dispose();
    Ok(())
}
