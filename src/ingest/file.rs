//! Still-image sequence source.
//!
//! Decodes every PNG/JPEG file in a local directory, in file-name order, and replays
//! them as RGBA frames, looping at the end. Only local paths are accepted.

use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use crate::frame::{Frame, PixelFormat};
use crate::ingest::{SourceConfig, SourceStats};

pub struct ImageSequenceSource {
    config: SourceConfig,
    files: Vec<PathBuf>,
    cursor: usize,
    frame_count: u64,
    last_error: bool,
}

impl ImageSequenceSource {
    pub fn new(config: SourceConfig) -> Result<Self> {
        if !is_local_file_path(&config.uri) {
            return Err(anyhow!(
                "image sequences only support local paths (no URL schemes)"
            ));
        }
        Ok(Self {
            config,
            files: Vec::new(),
            cursor: 0,
            frame_count: 0,
            last_error: false,
        })
    }

    /// Scan the directory. Fails if it holds no decodable image files.
    pub fn connect(&mut self) -> Result<()> {
        let dir = Path::new(&self.config.uri);
        let mut files: Vec<PathBuf> = std::fs::read_dir(dir)
            .with_context(|| format!("failed to read image directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|p| is_image_file(p))
            .collect();
        files.sort();
        if files.is_empty() {
            return Err(anyhow!("no png/jpeg files in {}", dir.display()));
        }
        log::info!(
            "ImageSequenceSource: {} images from {}",
            files.len(),
            dir.display()
        );
        self.files = files;
        self.cursor = 0;
        Ok(())
    }

    pub fn next_frame(&mut self) -> Result<Frame> {
        let path = self
            .files
            .get(self.cursor)
            .cloned()
            .ok_or_else(|| anyhow!("image sequence source is not connected"))?;
        self.cursor = (self.cursor + 1) % self.files.len();

        let decoded = image::open(&path)
            .with_context(|| format!("failed to decode {}", path.display()));
        self.last_error = decoded.is_err();
        let rgba = decoded?.to_rgba8();
        self.frame_count += 1;
        let (w, h) = rgba.dimensions();
        Frame::new(rgba.into_raw(), w, h, PixelFormat::Rgba8)
    }

    pub fn is_healthy(&self) -> bool {
        !self.files.is_empty() && !self.last_error
    }

    pub fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frame_count,
            uri: self.config.uri.clone(),
        }
    }
}

fn is_image_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| matches!(e.to_ascii_lowercase().as_str(), "png" | "jpg" | "jpeg"))
        .unwrap_or(false)
}

fn is_local_file_path(path: &str) -> bool {
    !path.trim().is_empty() && !path.contains("://")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(uri: &str) -> SourceConfig {
        SourceConfig {
            uri: uri.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn rejects_url_schemes() {
        assert!(ImageSequenceSource::new(config("http://example.com/frames")).is_err());
        assert!(ImageSequenceSource::new(config("")).is_err());
    }

    #[test]
    fn replays_directory_in_order_and_loops() -> Result<()> {
        let dir = tempfile::tempdir()?;
        image::RgbaImage::from_pixel(4, 3, image::Rgba([10, 20, 30, 255])).save(dir.path().join("a.png"))?;
        image::RgbaImage::from_pixel(4, 3, image::Rgba([200, 200, 200, 255])).save(dir.path().join("b.png"))?;
        std::fs::write(dir.path().join("notes.txt"), "ignored")?;

        let uri = dir.path().to_string_lossy().to_string();
        let mut source = ImageSequenceSource::new(config(&uri))?;
        source.connect()?;
        let first = source.next_frame()?;
        assert_eq!((first.width(), first.height()), (4, 3));
        assert_eq!(&first.pixels()[..4], &[10, 20, 30, 255]);
        assert_eq!(source.next_frame()?.pixels()[0], 200);
        assert_eq!(source.next_frame()?.pixels()[0], 10);
        assert!(source.is_healthy());
        assert_eq!(source.stats().frames_captured, 3);
        Ok(())
    }

    #[test]
    fn empty_directory_fails_to_connect() -> Result<()> {
        let dir = tempfile::tempdir()?;
        let mut source = ImageSequenceSource::new(config(&dir.path().to_string_lossy()))?;
        assert!(source.connect().is_err());
        assert!(!source.is_healthy());
        Ok(())
    }
}
