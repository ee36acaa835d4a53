use anyhow::Result;

use crate::frame::{Frame, PixelFormat};
use crate::ingest::{SourceConfig, SourceStats};

/// Synthetic `stub://` source: a bright square sliding across a dark background.
///
/// The square moves `speed` pixels per frame and wraps around, so consecutive frames
/// always differ and edge and motion stages have something to find.
pub struct SyntheticSource {
    config: SourceConfig,
    frame_count: u64,
    side: u32,
    speed: u32,
}

impl SyntheticSource {
    pub fn new(config: SourceConfig) -> Self {
        let side = (config.width.min(config.height) / 4).max(1);
        Self {
            config,
            frame_count: 0,
            side,
            speed: 2,
        }
    }

    /// Synthetic sources are always "connected".
    pub fn connect(&mut self) -> Result<()> {
        log::info!(
            "SyntheticSource: connected to {} ({}x{} {:?})",
            self.config.uri,
            self.config.width,
            self.config.height,
            self.config.format
        );
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<Frame> {
        let luma = self.render_luma();
        self.frame_count += 1;
        let (w, h) = (self.config.width, self.config.height);
        let pixels = match self.config.format {
            PixelFormat::Luma8 => luma,
            PixelFormat::Rgba8 => luma.iter().flat_map(|&y| [y, y, y, 255]).collect(),
            PixelFormat::Nv12 => {
                let chroma = (w as usize).div_ceil(2) * 2 * (h as usize).div_ceil(2);
                let mut nv12 = luma;
                nv12.resize(nv12.len() + chroma, 128);
                nv12
            }
        };
        Frame::new(pixels, w, h, self.config.format)
    }

    fn render_luma(&self) -> Vec<u8> {
        let (w, h) = (self.config.width as u64, self.config.height as u64);
        let side = self.side as u64;
        let x0 = (self.frame_count * self.speed as u64) % w.max(1);
        let y0 = (h.saturating_sub(side)) / 2;
        let mut luma = vec![16u8; (w * h) as usize];
        for y in y0..(y0 + side).min(h) {
            for dx in 0..side {
                let x = (x0 + dx) % w;
                luma[(y * w + x) as usize] = 235;
            }
        }
        luma
    }

    pub fn is_healthy(&self) -> bool {
        true
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.config.uri.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stub_config(format: PixelFormat) -> SourceConfig {
        SourceConfig {
            uri: "stub://square".to_string(),
            width: 64,
            height: 48,
            format,
            ..Default::default()
        }
    }

    #[test]
    fn produces_frames_in_requested_format() -> Result<()> {
        for format in [PixelFormat::Luma8, PixelFormat::Rgba8, PixelFormat::Nv12] {
            let mut source = SyntheticSource::new(stub_config(format));
            source.connect()?;
            let frame = source.next_frame()?;
            assert_eq!((frame.width(), frame.height(), frame.format()), (64, 48, format));
        }
        Ok(())
    }

    #[test]
    fn consecutive_frames_differ() -> Result<()> {
        let mut source = SyntheticSource::new(stub_config(PixelFormat::Luma8));
        let a = source.next_frame()?;
        let b = source.next_frame()?;
        assert_ne!(a.pixels(), b.pixels());
        assert_eq!(source.stats().frames_captured, 2);
        Ok(())
    }

    #[test]
    fn square_is_bright_on_dark() -> Result<()> {
        let mut source = SyntheticSource::new(stub_config(PixelFormat::Luma8));
        let frame = source.next_frame()?;
        let bright = frame.pixels().iter().filter(|&&v| v == 235).count();
        assert_eq!(bright, 12 * 12);
        Ok(())
    }
}
