//! perceptiond - Pixel Perception pipeline daemon
//!
//! This daemon:
//! 1. Loads configuration (PERCEPTION_CONFIG file, PERCEPTION_* env, CLI flags)
//! 2. Connects a frame source (synthetic `stub://` or a local image directory)
//! 3. Feeds frames to the perception engine at the target frame rate
//! 4. Optionally prints every new primary grid as a JSON line on stdout
//! 5. Logs engine health periodically and disposes the engine on Ctrl-C

use anyhow::{anyhow, Result};
use clap::Parser;
use serde::Serialize;
use std::io::Write;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use pixel_perception::config::{parse_grid, parse_outputs, DepthBackendKind, PerceptiondConfig};
use pixel_perception::ingest::FrameSource;
use pixel_perception::{OutputGrid, PerceptionEngine};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "Run the Pixel Perception pipeline over a frame source"
)]
struct Args {
    /// Frame source: `stub://name` or a directory of png/jpeg files.
    #[arg(long)]
    source: Option<String>,

    /// Target frames per second.
    #[arg(long)]
    fps: Option<u32>,

    /// Stop after this many frames (0 runs until Ctrl-C).
    #[arg(long, default_value = "0")]
    frames: u64,

    /// Primary grid size, `N` or `WxH`.
    #[arg(long)]
    grid: Option<String>,

    /// Comma-separated outputs to enable, or `all`.
    #[arg(long)]
    outputs: Option<String>,

    /// Print each new primary grid as a JSON line on stdout.
    #[arg(long)]
    json: bool,

    /// ONNX depth model (requires the backend-tract feature).
    #[arg(long)]
    model: Option<PathBuf>,
}

#[derive(Serialize)]
struct GridLine<'a> {
    frame: u64,
    grid: &'a OutputGrid,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();
    let args = Args::parse();

    let mut config = PerceptiondConfig::load()?;
    apply_args(&mut config, &args)?;

    let backend = config.build_depth_backend()?;
    let engine = PerceptionEngine::spawn(config.engine.clone(), backend)?;
    let mut outputs = engine.outputs();

    let mut source = FrameSource::new(config.source.clone())?;
    source.connect()?;

    let running = Arc::new(AtomicBool::new(true));
    let handler_flag = running.clone();
    ctrlc::set_handler(move || {
        handler_flag.store(false, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("error setting Ctrl-C handler: {e}"))?;

    log::info!(
        "perceptiond running: source={} fps={} grid={}x{} outputs={:?}",
        config.source.uri,
        config.source.target_fps,
        config.engine.grid_width,
        config.engine.grid_height,
        engine.enabled_outputs()
    );

    let frame_interval = Duration::from_secs_f64(1.0 / config.source.target_fps as f64);
    let mut last_health_log = Instant::now();
    let mut delivered = 0u64;
    let stdout = std::io::stdout();

    while running.load(Ordering::SeqCst) && (args.frames == 0 || delivered < args.frames) {
        let tick = Instant::now();
        source.deliver(&engine);
        delivered += 1;

        if args.json {
            if let Some(grid) = outputs.primary_grid.try_next() {
                let line = serde_json::to_string(&GridLine {
                    frame: delivered,
                    grid: &grid,
                })?;
                writeln!(stdout.lock(), "{line}")?;
            }
        }

        if last_health_log.elapsed() >= config.health_interval {
            let stats = engine.stats();
            log::info!(
                "health: source_ok={} captured={} submitted={} processed={} dropped={} failed={} source_errors={}",
                source.is_healthy(),
                source.stats().frames_captured,
                stats.frames_submitted,
                stats.frames_processed,
                stats.frames_dropped,
                stats.frames_failed,
                stats.source_errors
            );
            last_health_log = Instant::now();
        }

        if let Some(rest) = frame_interval.checked_sub(tick.elapsed()) {
            std::thread::sleep(rest);
        }
    }

    log::info!("shutting down after {delivered} frames");
    engine.dispose();
    if args.json {
        if let Some(grid) = outputs.primary_grid.try_next() {
            let line = serde_json::to_string(&GridLine {
                frame: delivered,
                grid: &grid,
            })?;
            writeln!(stdout.lock(), "{line}")?;
        }
    }
    Ok(())
}

fn apply_args(config: &mut PerceptiondConfig, args: &Args) -> Result<()> {
    if let Some(source) = &args.source {
        config.source.uri = source.clone();
    }
    if let Some(fps) = args.fps {
        if fps == 0 {
            return Err(anyhow!("--fps must be greater than zero"));
        }
        config.source.target_fps = fps;
    }
    if let Some(grid) = &args.grid {
        let (w, h) = parse_grid(grid)?;
        config.engine.grid_width = w;
        config.engine.grid_height = h;
    }
    if let Some(outputs) = &args.outputs {
        config.engine.initially_enabled = parse_outputs(outputs)?;
    }
    if let Some(model) = &args.model {
        config.model_path = Some(model.clone());
        config.depth_backend = DepthBackendKind::Tract;
    }
    Ok(())
}
