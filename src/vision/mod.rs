//! Per-frame vision stages.
//!
//! - `edge`: stateless Canny-style edge map.
//! - `frame_diff`: two-frame differencing motion.
//! - `optical_flow`: sparse feature tracking motion (uses `features` and `lk`).
//! - `accumulate`: decaying motion heat map fed by either motion detector.

pub mod accumulate;
pub mod edge;
pub mod features;
pub mod frame_diff;
mod lk;
pub mod optical_flow;

pub use accumulate::{TemporalAccumulator, TemporalConfig};
pub use edge::{CannyEdgeDetector, EdgeDetectorConfig};
pub use features::Point2;
pub use frame_diff::{FrameDiffConfig, FrameDiffDetector};
pub use optical_flow::{OpticalFlowConfig, OpticalFlowDetector};
