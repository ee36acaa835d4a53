//! Capture-source boundary.
//!
//! Sources produce owned `Frame`s and hand them to a `FrameListener` (the engine).
//! Two sources ship with the crate:
//! - `stub://...`: synthetic moving square (testing, demos)
//! - a local directory path: still images replayed in order
//!
//! Real camera drivers live outside this crate and only need to construct `Frame`s,
//! attaching a release hook when the underlying buffer must be returned.

pub mod file;
pub(crate) mod normalize;
pub mod synthetic;

use anyhow::Result;

use crate::frame::{Frame, PixelFormat};

pub use file::ImageSequenceSource;
pub use synthetic::SyntheticSource;

/// Receiver of capture callbacks. Called on the source's own thread.
pub trait FrameListener: Send + Sync {
    fn on_frame_ready(&self, frame: Frame);
    fn on_frame_error(&self, error: anyhow::Error);
}

/// Configuration for a frame source.
#[derive(Clone, Debug)]
pub struct SourceConfig {
    /// `stub://name` or a local directory of images.
    pub uri: String,
    /// Target frame rate (frames per second). Pacing is the caller's job.
    pub target_fps: u32,
    /// Frame width (synthetic sources only).
    pub width: u32,
    /// Frame height (synthetic sources only).
    pub height: u32,
    /// Pixel format (synthetic sources only).
    pub format: PixelFormat,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            uri: "stub://square".to_string(),
            target_fps: 15,
            width: 320,
            height: 240,
            format: PixelFormat::Rgba8,
        }
    }
}

/// Statistics for a frame source.
#[derive(Clone, Debug)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub uri: String,
}

/// Frame source chosen from the config URI.
pub struct FrameSource {
    backend: SourceBackend,
}

enum SourceBackend {
    Synthetic(SyntheticSource),
    Images(ImageSequenceSource),
}

impl FrameSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        let backend = if config.uri.starts_with("stub://") {
            SourceBackend::Synthetic(SyntheticSource::new(config))
        } else {
            SourceBackend::Images(ImageSequenceSource::new(config)?)
        };
        Ok(Self { backend })
    }

    pub fn connect(&mut self) -> Result<()> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.connect(),
            SourceBackend::Images(source) => source.connect(),
        }
    }

    pub fn next_frame(&mut self) -> Result<Frame> {
        match &mut self.backend {
            SourceBackend::Synthetic(source) => source.next_frame(),
            SourceBackend::Images(source) => source.next_frame(),
        }
    }

    /// Capture one frame and deliver it, or the capture error, to `listener`.
    pub fn deliver(&mut self, listener: &dyn FrameListener) {
        match self.next_frame() {
            Ok(frame) => listener.on_frame_ready(frame),
            Err(e) => listener.on_frame_error(e),
        }
    }

    pub fn is_healthy(&self) -> bool {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.is_healthy(),
            SourceBackend::Images(source) => source.is_healthy(),
        }
    }

    pub fn stats(&self) -> SourceStats {
        match &self.backend {
            SourceBackend::Synthetic(source) => source.stats(),
            SourceBackend::Images(source) => source.stats(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;

    #[derive(Default)]
    struct Recorder {
        frames: Mutex<Vec<(u32, u32)>>,
        errors: Mutex<Vec<String>>,
    }

    impl FrameListener for Recorder {
        fn on_frame_ready(&self, frame: Frame) {
            self.frames.lock().push((frame.width(), frame.height()));
        }

        fn on_frame_error(&self, error: anyhow::Error) {
            self.errors.lock().push(error.to_string());
        }
    }

    #[test]
    fn deliver_routes_frames_and_errors() -> Result<()> {
        let recorder = Recorder::default();

        let mut stub = FrameSource::new(SourceConfig::default())?;
        stub.connect()?;
        stub.deliver(&recorder);
        assert_eq!(recorder.frames.lock().as_slice(), &[(320, 240)]);

        // An unconnected image source reports an error instead of a frame.
        let dir = tempfile::tempdir()?;
        let mut images = FrameSource::new(SourceConfig {
            uri: dir.path().to_string_lossy().to_string(),
            ..Default::default()
        })?;
        images.deliver(&recorder);
        assert_eq!(recorder.errors.lock().len(), 1);
        Ok(())
    }
}
