//! Perception engine: frame intake, the single pipeline worker, and output fan-out.
//!
//! # Concurrency model
//!
//! - Producers call `submit_frame` from any thread. Intake is a one-slot channel: a
//!   newer frame evicts a pending older one, which is released immediately. Producers
//!   never block on the worker.
//! - Exactly one worker thread owns every stage instance. Stage state is never shared.
//! - Each output type has a single-slot mailbox. The worker overwrites it and never
//!   waits for readers.
//! - Every frame is released exactly once: after processing, on eviction from intake,
//!   on rejection after `dispose`, or when `dispose` drains the intake.

use anyhow::{Context, Result};
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, TrySendError};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::depth::{DepthBackend, DepthConfig, DepthEstimator};
use crate::error::{ensure_arg, PerceptionError};
use crate::field::{FloatField, GrayField};
use crate::frame::{Frame, FrameSnapshot};
use crate::grid::{aggregate, OutputGrid};
use crate::ingest::FrameListener;
use crate::mailbox::{Mailbox, Subscriber};
use crate::stage::{FrameProcessor, StageConfig};
use crate::vision::{
    CannyEdgeDetector, EdgeDetectorConfig, FrameDiffConfig, FrameDiffDetector, OpticalFlowConfig,
    OpticalFlowDetector, TemporalAccumulator, TemporalConfig,
};

const WORKER_POLL: Duration = Duration::from_millis(100);

/// Publishable signals, each with its own enabled flag.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    PrimaryGrid,
    CameraFeed,
    GreyScale,
    EdgeDetection,
    MotionDetection,
    DepthDetection,
}

impl OutputType {
    pub const ALL: [OutputType; 6] = [
        OutputType::PrimaryGrid,
        OutputType::CameraFeed,
        OutputType::GreyScale,
        OutputType::EdgeDetection,
        OutputType::MotionDetection,
        OutputType::DepthDetection,
    ];

    fn bit(self) -> u8 {
        1 << (self as u8)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            OutputType::PrimaryGrid => "primary_grid",
            OutputType::CameraFeed => "camera_feed",
            OutputType::GreyScale => "grey_scale",
            OutputType::EdgeDetection => "edge_detection",
            OutputType::MotionDetection => "motion_detection",
            OutputType::DepthDetection => "depth_detection",
        }
    }
}

impl fmt::Display for OutputType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OutputType {
    type Err = PerceptionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let normalized = s.trim().to_ascii_lowercase().replace('-', "_");
        OutputType::ALL
            .into_iter()
            .find(|t| t.as_str() == normalized)
            .ok_or_else(|| PerceptionError::invalid(format!("unknown output type '{s}'")))
    }
}

const ALL_OUTPUTS: u8 = (1 << OutputType::ALL.len()) - 1;

/// Which field the primary grid summarizes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GridSource {
    Edges,
    Motion,
    Depth,
    GreyScale,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MotionAlgorithm {
    FrameDiff,
    OpticalFlow,
}

/// Engine-wide configuration, including every stage's config.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub grid_width: u32,
    pub grid_height: u32,
    pub grid_source: GridSource,
    pub grid_gain: f32,
    /// Gain applied to the 8-bit grayscale field before every gray-consuming stage.
    pub grayscale_gain: f32,
    pub motion_algorithm: MotionAlgorithm,
    /// Route motion through the temporal accumulator.
    pub accumulate_motion: bool,
    pub initially_enabled: Vec<OutputType>,
    pub edge: EdgeDetectorConfig,
    pub frame_diff: FrameDiffConfig,
    pub optical_flow: OpticalFlowConfig,
    pub temporal: TemporalConfig,
    pub depth: DepthConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            grid_width: 32,
            grid_height: 32,
            grid_source: GridSource::Edges,
            grid_gain: 1.0,
            grayscale_gain: 3.0,
            motion_algorithm: MotionAlgorithm::FrameDiff,
            accumulate_motion: true,
            initially_enabled: vec![OutputType::PrimaryGrid],
            edge: EdgeDetectorConfig::default(),
            frame_diff: FrameDiffConfig::default(),
            optical_flow: OpticalFlowConfig::default(),
            temporal: TemporalConfig::default(),
            depth: DepthConfig::default(),
        }
    }
}

impl StageConfig for EngineConfig {
    fn validate(&self) -> Result<()> {
        ensure_arg(self.grid_width > 0 && self.grid_height > 0, || {
            format!(
                "grid size must be positive, got {}x{}",
                self.grid_width, self.grid_height
            )
        })?;
        ensure_arg(self.grid_gain >= 0.0 && self.grayscale_gain >= 0.0, || {
            "grid_gain and grayscale_gain must be >= 0".to_string()
        })?;
        self.edge.validate()?;
        self.frame_diff.validate()?;
        self.optical_flow.validate()?;
        self.temporal.validate()?;
        self.depth.validate()
    }
}

/// Counters readable at any time. Once the engine is disposed,
/// `frames_submitted == frames_processed + frames_dropped + frames_failed`.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub frames_submitted: u64,
    pub frames_processed: u64,
    pub frames_dropped: u64,
    pub frames_failed: u64,
    pub source_errors: u64,
}

#[derive(Default)]
struct Counters {
    submitted: AtomicU64,
    processed: AtomicU64,
    dropped: AtomicU64,
    failed: AtomicU64,
    source_errors: AtomicU64,
}

impl Counters {
    fn snapshot(&self) -> EngineStats {
        EngineStats {
            frames_submitted: self.submitted.load(Ordering::SeqCst),
            frames_processed: self.processed.load(Ordering::SeqCst),
            frames_dropped: self.dropped.load(Ordering::SeqCst),
            frames_failed: self.failed.load(Ordering::SeqCst),
            source_errors: self.source_errors.load(Ordering::SeqCst),
        }
    }
}

/// Read handles for every output stream.
#[derive(Clone)]
pub struct PerceptionOutputs {
    pub primary_grid: Subscriber<OutputGrid>,
    pub camera_feed: Subscriber<FrameSnapshot>,
    pub grey_scale: Subscriber<GrayField>,
    pub edges: Subscriber<GrayField>,
    pub motion: Subscriber<FloatField>,
    pub depth: Subscriber<FloatField>,
}

struct Publishers {
    primary_grid: Mailbox<OutputGrid>,
    camera_feed: Mailbox<FrameSnapshot>,
    grey_scale: Mailbox<GrayField>,
    edges: Mailbox<GrayField>,
    motion: Mailbox<FloatField>,
    depth: Mailbox<FloatField>,
}

impl Publishers {
    fn new() -> Self {
        Self {
            primary_grid: Mailbox::new(),
            camera_feed: Mailbox::new(),
            grey_scale: Mailbox::new(),
            edges: Mailbox::new(),
            motion: Mailbox::new(),
            depth: Mailbox::new(),
        }
    }

    fn subscribe(&self) -> PerceptionOutputs {
        PerceptionOutputs {
            primary_grid: self.primary_grid.subscribe(),
            camera_feed: self.camera_feed.subscribe(),
            grey_scale: self.grey_scale.subscribe(),
            edges: self.edges.subscribe(),
            motion: self.motion.subscribe(),
            depth: self.depth.subscribe(),
        }
    }

    fn close_all(&self) {
        self.primary_grid.close();
        self.camera_feed.close();
        self.grey_scale.close();
        self.edges.close();
        self.motion.close();
        self.depth.close();
    }
}

/// Snapshot of the enabled flags taken once per frame. It picks the stages to run;
/// each publish re-reads the live flags through [`Outlet`].
#[derive(Clone, Copy)]
struct Enabled(u8);

impl Enabled {
    fn has(self, t: OutputType) -> bool {
        self.0 & t.bit() != 0
    }

    fn grid_from(self, cfg: &EngineConfig, source: GridSource) -> bool {
        self.has(OutputType::PrimaryGrid) && cfg.grid_source == source
    }
}

/// Publishers paired with the live enabled flags. An output disabled while its
/// frame is in flight receives nothing from that frame.
struct Outlet<'a> {
    publishers: &'a Publishers,
    flags: &'a AtomicU8,
}

impl Outlet<'_> {
    fn live(&self, t: OutputType) -> bool {
        Enabled(self.flags.load(Ordering::SeqCst)).has(t)
    }
}

/// All stage instances, owned by the worker thread.
struct Pipeline {
    edges: CannyEdgeDetector,
    frame_diff: FrameDiffDetector,
    optical_flow: OpticalFlowDetector,
    temporal: TemporalAccumulator,
    depth: DepthEstimator,
    motion_algorithm: Option<MotionAlgorithm>,
}

impl Pipeline {
    fn new(depth: DepthEstimator) -> Self {
        Self {
            edges: CannyEdgeDetector::new(),
            frame_diff: FrameDiffDetector::new(),
            optical_flow: OpticalFlowDetector::new(),
            temporal: TemporalAccumulator::new(),
            depth,
            motion_algorithm: None,
        }
    }

    fn reset(&mut self) {
        self.frame_diff.reset();
        self.optical_flow.reset();
        self.temporal.reset();
        self.depth.reset();
        self.motion_algorithm = None;
    }

    /// Run every stage some enabled output consumes, in fixed order, publishing as
    /// results become available.
    fn run(&mut self, frame: &Frame, cfg: &EngineConfig, enabled: Enabled, out: &Outlet<'_>) -> Result<()> {
        if enabled.has(OutputType::CameraFeed) && out.live(OutputType::CameraFeed) {
            out.publishers.camera_feed.publish(frame.snapshot());
        }

        let gray = frame.to_grayscale().scaled_clamped(cfg.grayscale_gain);
        let mut grid = None;
        if enabled.grid_from(cfg, GridSource::GreyScale) {
            grid = Some(aggregate(&gray, cfg.grid_width, cfg.grid_height)?);
        }

        if enabled.has(OutputType::EdgeDetection) || enabled.grid_from(cfg, GridSource::Edges) {
            let edges = self.edges.process(&gray, &cfg.edge)?;
            if enabled.grid_from(cfg, GridSource::Edges) {
                grid = Some(aggregate(&edges, cfg.grid_width, cfg.grid_height)?);
            }
            if enabled.has(OutputType::EdgeDetection) && out.live(OutputType::EdgeDetection) {
                out.publishers.edges.publish(edges);
            }
        }

        if enabled.has(OutputType::MotionDetection) || enabled.grid_from(cfg, GridSource::Motion) {
            let motion = self.motion(&gray, cfg)?;
            if enabled.grid_from(cfg, GridSource::Motion) {
                grid = Some(aggregate(&motion, cfg.grid_width, cfg.grid_height)?);
            }
            if enabled.has(OutputType::MotionDetection) && out.live(OutputType::MotionDetection) {
                out.publishers.motion.publish(motion);
            }
        }

        if enabled.has(OutputType::GreyScale) && out.live(OutputType::GreyScale) {
            out.publishers.grey_scale.publish(gray);
        }

        if enabled.has(OutputType::DepthDetection) || enabled.grid_from(cfg, GridSource::Depth) {
            let depth = self.depth.process(frame, &cfg.depth)?;
            if enabled.grid_from(cfg, GridSource::Depth) {
                grid = Some(aggregate(&depth, cfg.grid_width, cfg.grid_height)?);
            }
            if enabled.has(OutputType::DepthDetection) && out.live(OutputType::DepthDetection) {
                out.publishers.depth.publish(depth);
            }
        }

        if let Some(grid) = grid.filter(|_| out.live(OutputType::PrimaryGrid)) {
            out.publishers.primary_grid.publish(grid.apply_gain(cfg.grid_gain));
        }
        Ok(())
    }

    fn motion(&mut self, gray: &GrayField, cfg: &EngineConfig) -> Result<FloatField> {
        if self.motion_algorithm != Some(cfg.motion_algorithm) {
            if self.motion_algorithm.is_some() {
                log::info!("motion algorithm switched to {:?}", cfg.motion_algorithm);
            }
            self.frame_diff.reset();
            self.optical_flow.reset();
            self.temporal.reset();
            self.motion_algorithm = Some(cfg.motion_algorithm);
        }
        let motion = match cfg.motion_algorithm {
            MotionAlgorithm::FrameDiff => self.frame_diff.process(gray, &cfg.frame_diff)?,
            MotionAlgorithm::OpticalFlow => self.optical_flow.process(gray, &cfg.optical_flow)?,
        };
        if cfg.accumulate_motion {
            self.temporal.process(&motion, &cfg.temporal)
        } else {
            Ok(motion)
        }
    }
}

/// State shared between the engine handle and its worker.
struct Shared {
    flags: AtomicU8,
    config: Mutex<Arc<EngineConfig>>,
    shutdown: AtomicBool,
    counters: Counters,
    publishers: Publishers,
}

struct Intake {
    tx: Sender<Frame>,
    rx: Receiver<Frame>,
}

/// Frame-processing pipeline with a dedicated worker thread.
///
/// Dropping the engine disposes it.
pub struct PerceptionEngine {
    shared: Arc<Shared>,
    intake: Mutex<Option<Intake>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl PerceptionEngine {
    /// Validate `config`, warm up the depth backend and start the worker.
    ///
    /// Backend warm-up failure is returned here; it is never a per-frame error.
    pub fn spawn(config: EngineConfig, depth_backend: impl DepthBackend + 'static) -> Result<Self> {
        config.validate()?;
        let depth = DepthEstimator::new(depth_backend)?;
        let initial = config
            .initially_enabled
            .iter()
            .fold(0u8, |bits, t| bits | t.bit());

        let shared = Arc::new(Shared {
            flags: AtomicU8::new(initial),
            config: Mutex::new(Arc::new(config)),
            shutdown: AtomicBool::new(false),
            counters: Counters::default(),
            publishers: Publishers::new(),
        });

        let (tx, rx) = crossbeam_channel::bounded::<Frame>(1);
        let worker_rx = rx.clone();
        let worker_shared = shared.clone();
        let pipeline = Pipeline::new(depth);
        let handle = thread::Builder::new()
            .name("perception-worker".to_string())
            .spawn(move || worker_loop(pipeline, worker_rx, worker_shared))
            .context("failed to spawn perception worker")?;

        Ok(Self {
            shared,
            intake: Mutex::new(Some(Intake { tx, rx })),
            worker: Mutex::new(Some(handle)),
        })
    }

    /// Hand a frame to the pipeline without blocking.
    ///
    /// If a frame is already pending it is dropped (and released) in favour of this
    /// one. After `dispose` the frame is released and `EngineStopped` is returned.
    pub fn submit_frame(&self, frame: Frame) -> Result<()> {
        let guard = self.intake.lock();
        let Some(intake) = guard.as_ref() else {
            drop(frame);
            return Err(PerceptionError::EngineStopped.into());
        };
        let counters = &self.shared.counters;
        counters.submitted.fetch_add(1, Ordering::SeqCst);

        let mut frame = frame;
        loop {
            match intake.tx.try_send(frame) {
                Ok(()) => return Ok(()),
                Err(TrySendError::Full(back)) => {
                    if let Ok(stale) = intake.rx.try_recv() {
                        drop(stale);
                        counters.dropped.fetch_add(1, Ordering::SeqCst);
                    }
                    frame = back;
                }
                Err(TrySendError::Disconnected(back)) => {
                    drop(back);
                    counters.dropped.fetch_add(1, Ordering::SeqCst);
                    return Err(PerceptionError::EngineStopped.into());
                }
            }
        }
    }

    /// Enable `output`. With `exclusive`, every other output is disabled in the same
    /// atomic step.
    pub fn enable_output(&self, output: OutputType, exclusive: bool) {
        if exclusive {
            self.shared.flags.store(output.bit(), Ordering::SeqCst);
        } else {
            self.shared.flags.fetch_or(output.bit(), Ordering::SeqCst);
        }
    }

    pub fn disable_output(&self, output: OutputType) {
        self.shared.flags.fetch_and(!output.bit(), Ordering::SeqCst);
    }

    pub fn enable_all(&self) {
        self.shared.flags.store(ALL_OUTPUTS, Ordering::SeqCst);
    }

    pub fn disable_all(&self) {
        self.shared.flags.store(0, Ordering::SeqCst);
    }

    pub fn is_enabled(&self, output: OutputType) -> bool {
        Enabled(self.shared.flags.load(Ordering::SeqCst)).has(output)
    }

    pub fn enabled_outputs(&self) -> Vec<OutputType> {
        OutputType::ALL
            .into_iter()
            .filter(|t| self.is_enabled(*t))
            .collect()
    }

    /// Replace the configuration. Takes effect from the next frame the worker starts.
    pub fn update_config(&self, config: EngineConfig) -> Result<()> {
        config.validate()?;
        *self.shared.config.lock() = Arc::new(config);
        Ok(())
    }

    pub fn config(&self) -> Arc<EngineConfig> {
        self.shared.config.lock().clone()
    }

    /// Fresh read handles for every output stream.
    pub fn outputs(&self) -> PerceptionOutputs {
        self.shared.publishers.subscribe()
    }

    pub fn stats(&self) -> EngineStats {
        self.shared.counters.snapshot()
    }

    pub fn is_running(&self) -> bool {
        self.intake.lock().is_some()
    }

    /// Disable all outputs, stop accepting frames, release pending frames and join
    /// the worker. A frame already being processed runs to completion but publishes
    /// nothing. Idempotent.
    pub fn dispose(&self) {
        self.disable_all();
        self.shared.shutdown.store(true, Ordering::SeqCst);

        if let Some(intake) = self.intake.lock().take() {
            let mut drained = 0u64;
            while let Ok(frame) = intake.rx.try_recv() {
                drop(frame);
                drained += 1;
            }
            self.shared
                .counters
                .dropped
                .fetch_add(drained, Ordering::SeqCst);
        }

        if let Some(handle) = self.worker.lock().take() {
            self.shared.publishers.close_all();
            if handle.join().is_err() {
                log::error!("perception worker exited with a panic");
            }
            let stats = self.stats();
            log::info!(
                "perception engine stopped: {} submitted, {} processed, {} dropped, {} failed",
                stats.frames_submitted,
                stats.frames_processed,
                stats.frames_dropped,
                stats.frames_failed
            );
        }
    }
}

impl Drop for PerceptionEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl FrameListener for PerceptionEngine {
    fn on_frame_ready(&self, frame: Frame) {
        if let Err(e) = self.submit_frame(frame) {
            log::debug!("frame rejected: {e}");
        }
    }

    fn on_frame_error(&self, error: anyhow::Error) {
        self.shared
            .counters
            .source_errors
            .fetch_add(1, Ordering::SeqCst);
        log::warn!("capture source error: {error:#}");
    }
}

fn worker_loop(mut pipeline: Pipeline, rx: Receiver<Frame>, shared: Arc<Shared>) {
    log::info!(
        "perception worker started (depth backend '{}')",
        pipeline.depth.backend_name()
    );
    let counters = &shared.counters;

    while !shared.shutdown.load(Ordering::SeqCst) {
        let frame = match rx.recv_timeout(WORKER_POLL) {
            Ok(frame) => frame,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => break,
        };

        let config = shared.config.lock().clone();
        let enabled = Enabled(shared.flags.load(Ordering::SeqCst));
        let outlet = Outlet {
            publishers: &shared.publishers,
            flags: &shared.flags,
        };
        let result = panic::catch_unwind(AssertUnwindSafe(|| {
            pipeline.run(&frame, &config, enabled, &outlet)
        }));
        drop(frame);

        match result {
            Ok(Ok(())) => {
                counters.processed.fetch_add(1, Ordering::SeqCst);
            }
            Ok(Err(e)) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                log::error!("frame processing failed: {e:#}");
            }
            Err(_) => {
                counters.failed.fetch_add(1, Ordering::SeqCst);
                log::error!("frame processing panicked; resetting stage state");
                pipeline.reset();
            }
        }
    }

    log::info!("perception worker stopped");
}
