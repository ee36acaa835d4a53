//! Pixel Perception
//!
//! Real-time frame pipeline that turns a camera stream into several derived signals:
//! grayscale, Canny edges, motion (frame differencing or sparse optical flow, optionally
//! accumulated into a decaying heat map), and EMA-normalized monocular depth. Each
//! signal is published on its own single-slot "latest value" stream, plus a coarse
//! `OutputGrid` summarizing one of them for lightweight overlays.
//!
//! # Architecture
//!
//! - Capture sources hand owned `Frame`s to the engine through `FrameListener`.
//! - Intake holds at most one pending frame; newer frames evict older ones.
//! - One worker thread owns every stage and runs them in a fixed order.
//! - Outputs are published only while enabled; readers never block the worker.
//!
//! # Module Structure
//!
//! - `frame`, `field`, `grid`: data model (frames, single-channel fields, grids)
//! - `vision`: edge, motion and accumulation stages
//! - `depth`: depth estimator and inference backends
//! - `engine`: intake, worker loop, output flags and streams
//! - `ingest`: capture-source boundary and bundled sources
//! - `config`: daemon configuration

pub mod config;
pub mod depth;
pub mod engine;
pub mod error;
pub mod field;
pub(crate) mod filter;
pub mod frame;
pub mod grid;
pub mod ingest;
mod mailbox;
pub mod stage;
pub mod vision;

pub use depth::{
    ConstantDepthBackend, DepthBackend, DepthConfig, DepthEstimator, DepthOutputKind,
    FnDepthBackend, LumaDepthBackend, NormalizationMode, TensorShape,
};
pub use engine::{
    EngineConfig, EngineStats, GridSource, MotionAlgorithm, OutputType, PerceptionEngine,
    PerceptionOutputs,
};
pub use error::{is_invalid_argument, PerceptionError};
pub use field::{Field, FloatField, GrayField, Intensity};
pub use frame::{Frame, FrameSnapshot, PixelFormat};
pub use grid::{aggregate, OutputGrid};
pub use ingest::FrameListener;
pub use mailbox::Subscriber;
pub use stage::{FrameProcessor, StageConfig};
