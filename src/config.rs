use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use crate::depth::{ConstantDepthBackend, DepthBackend, LumaDepthBackend};
use crate::engine::{EngineConfig, OutputType};
use crate::error::PerceptionError;
use crate::frame::PixelFormat;
use crate::ingest::SourceConfig;
use crate::stage::StageConfig;

const DEFAULT_SOURCE_URI: &str = "stub://square";
const DEFAULT_FPS: u32 = 15;
const DEFAULT_WIDTH: u32 = 320;
const DEFAULT_HEIGHT: u32 = 240;
const DEFAULT_HEALTH_SECS: u64 = 10;

#[derive(Debug, Deserialize, Default)]
struct PerceptiondConfigFile {
    source: Option<SourceConfigFile>,
    engine: Option<EngineConfig>,
    depth_backend: Option<DepthBackendConfigFile>,
    health_interval_secs: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    uri: Option<String>,
    target_fps: Option<u32>,
    width: Option<u32>,
    height: Option<u32>,
    format: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DepthBackendConfigFile {
    kind: Option<String>,
    model_path: Option<PathBuf>,
}

/// Which depth backend the daemon constructs.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DepthBackendKind {
    /// Brightness heuristic, no model needed.
    Luma,
    /// Flat depth; useful to exercise the pipeline only.
    Constant,
    /// ONNX model through tract (feature `backend-tract`).
    Tract,
}

impl FromStr for DepthBackendKind {
    type Err = PerceptionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "luma" => Ok(Self::Luma),
            "constant" => Ok(Self::Constant),
            "tract" | "onnx" => Ok(Self::Tract),
            other => Err(PerceptionError::invalid(format!(
                "unknown depth backend '{other}'"
            ))),
        }
    }
}

/// `perceptiond` settings: optional TOML file named by `PERCEPTION_CONFIG`, then
/// `PERCEPTION_*` environment overrides, then validation.
#[derive(Debug, Clone)]
pub struct PerceptiondConfig {
    pub source: SourceConfig,
    pub engine: EngineConfig,
    pub depth_backend: DepthBackendKind,
    pub model_path: Option<PathBuf>,
    pub health_interval: Duration,
}

impl PerceptiondConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("PERCEPTION_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: PerceptiondConfigFile) -> Result<Self> {
        let src = file.source.unwrap_or_default();
        let format = match src.format {
            Some(f) => f.parse::<PixelFormat>()?,
            None => PixelFormat::Rgba8,
        };
        let source = SourceConfig {
            uri: src.uri.unwrap_or_else(|| DEFAULT_SOURCE_URI.to_string()),
            target_fps: src.target_fps.unwrap_or(DEFAULT_FPS),
            width: src.width.unwrap_or(DEFAULT_WIDTH),
            height: src.height.unwrap_or(DEFAULT_HEIGHT),
            format,
        };
        let backend = file.depth_backend.unwrap_or_default();
        let model_path = backend.model_path;
        let depth_backend = match backend.kind {
            Some(kind) => kind.parse()?,
            None if model_path.is_some() => DepthBackendKind::Tract,
            None => DepthBackendKind::Luma,
        };
        Ok(Self {
            source,
            engine: file.engine.unwrap_or_default(),
            depth_backend,
            model_path,
            health_interval: Duration::from_secs(
                file.health_interval_secs.unwrap_or(DEFAULT_HEALTH_SECS),
            ),
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Ok(uri) = std::env::var("PERCEPTION_SOURCE") {
            if !uri.trim().is_empty() {
                self.source.uri = uri;
            }
        }
        if let Ok(fps) = std::env::var("PERCEPTION_FPS") {
            self.source.target_fps = fps
                .trim()
                .parse()
                .map_err(|_| anyhow!("PERCEPTION_FPS must be an integer frame rate"))?;
        }
        if let Ok(grid) = std::env::var("PERCEPTION_GRID") {
            let (w, h) = parse_grid(&grid)?;
            self.engine.grid_width = w;
            self.engine.grid_height = h;
        }
        if let Ok(path) = std::env::var("PERCEPTION_MODEL") {
            if !path.trim().is_empty() {
                self.model_path = Some(PathBuf::from(path));
                self.depth_backend = DepthBackendKind::Tract;
            }
        }
        if let Ok(outputs) = std::env::var("PERCEPTION_OUTPUTS") {
            self.engine.initially_enabled = parse_outputs(&outputs)?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        self.engine.validate()?;
        if self.source.target_fps == 0 {
            return Err(anyhow!("target_fps must be greater than zero"));
        }
        if self.source.width == 0 || self.source.height == 0 {
            return Err(anyhow!("source size must be positive"));
        }
        if self.health_interval.is_zero() {
            return Err(anyhow!("health_interval_secs must be greater than zero"));
        }
        if self.depth_backend == DepthBackendKind::Tract && self.model_path.is_none() {
            return Err(anyhow!("the tract depth backend needs a model path"));
        }
        Ok(())
    }

    /// Construct the configured depth backend.
    pub fn build_depth_backend(&self) -> Result<Box<dyn DepthBackend>> {
        match self.depth_backend {
            DepthBackendKind::Luma => Ok(Box::new(LumaDepthBackend)),
            DepthBackendKind::Constant => Ok(Box::new(ConstantDepthBackend::default())),
            DepthBackendKind::Tract => {
                #[cfg(feature = "backend-tract")]
                {
                    let path = self
                        .model_path
                        .as_ref()
                        .ok_or_else(|| anyhow!("the tract depth backend needs a model path"))?;
                    Ok(Box::new(crate::depth::TractDepthBackend::new(
                        path,
                        self.engine.depth.input_width,
                        self.engine.depth.input_height,
                    )?))
                }
                #[cfg(not(feature = "backend-tract"))]
                {
                    Err(PerceptionError::Backend(
                        "ONNX depth models require the backend-tract feature".to_string(),
                    )
                    .into())
                }
            }
        }
    }
}

fn read_config_file(path: &Path) -> Result<PerceptiondConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = toml::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

/// `"32"` or `"48x27"`.
pub fn parse_grid(value: &str) -> Result<(u32, u32)> {
    let value = value.trim().to_ascii_lowercase();
    let parsed = match value.split_once('x') {
        Some((w, h)) => w.trim().parse().ok().zip(h.trim().parse().ok()),
        None => value.parse().ok().map(|n| (n, n)),
    };
    match parsed {
        Some((w, h)) if w > 0 && h > 0 => Ok((w, h)),
        _ => Err(PerceptionError::invalid(format!(
            "grid must be N or WxH with positive sizes, got '{value}'"
        ))
        .into()),
    }
}

/// Comma-separated output names, or `all`.
pub fn parse_outputs(value: &str) -> Result<Vec<OutputType>> {
    let entries = split_csv(value);
    if entries.iter().any(|e| e.eq_ignore_ascii_case("all")) {
        return Ok(OutputType::ALL.to_vec());
    }
    let mut outputs = Vec::new();
    for entry in entries {
        let output: OutputType = entry.parse()?;
        if !outputs.contains(&output) {
            outputs.push(output);
        }
    }
    Ok(outputs)
}

fn split_csv(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|entry| entry.trim())
        .filter(|entry| !entry.is_empty())
        .map(|entry| entry.to_string())
        .collect()
}
