//! Player configuration, read from an optional JSON file.

use dmaview_core::{cadence, DmaViewError, PixelLayout, Result, YuvMatrix};
use dmaview_gpu::RendererConfig;
use dmaview_media::{PatternStage, ProducerConfig};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub surface_width: u32,
    pub surface_height: u32,
    pub tick_hz: u32,
    pub producer_poll_ms: u64,
    pub pull_timeout_ms: u64,
    pub yuv_matrix: YuvMatrix,
    /// Stop after this many render ticks; run until killed when absent.
    pub max_ticks: Option<u64>,
    /// Synthetic source script.
    pub stages: Vec<PatternStage>,
    /// Synthetic source frame rate.
    pub source_fps: f64,
    /// Start the script over after the last stage.
    pub repeat_stages: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            surface_width: 3840,
            surface_height: 2160,
            tick_hz: cadence::DEFAULT_TICK_HZ,
            producer_poll_ms: cadence::PRODUCER_POLL_INTERVAL.as_millis() as u64,
            pull_timeout_ms: cadence::PULL_TIMEOUT.as_millis() as u64,
            yuv_matrix: YuvMatrix::default(),
            max_ticks: None,
            stages: vec![
                PatternStage::new(1920, 1080, PixelLayout::Nv12, 90),
                PatternStage::new(3840, 2160, PixelLayout::Nv12, 90),
            ],
            source_fps: 30.0,
            repeat_stages: true,
        }
    }
}

impl AppConfig {
    pub fn from_json(data: &[u8]) -> Result<Self> {
        let config: Self = serde_json::from_slice(data)
            .map_err(|e| DmaViewError::Config(format!("invalid config JSON: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn load_from_file(path: &Path) -> Result<Self> {
        let data = std::fs::read(path)?;
        Self::from_json(&data)
    }

    pub fn validate(&self) -> Result<()> {
        if self.surface_width == 0 || self.surface_height == 0 {
            return Err(DmaViewError::Config(format!(
                "surface must be non-empty, got {}x{}",
                self.surface_width, self.surface_height
            )));
        }
        if self.tick_hz == 0 {
            return Err(DmaViewError::Config("tick_hz must be positive".into()));
        }
        if !(self.source_fps.is_finite() && self.source_fps >= 0.0) {
            return Err(DmaViewError::Config(format!(
                "source_fps must be a non-negative number, got {}",
                self.source_fps
            )));
        }
        if self.stages.is_empty() {
            return Err(DmaViewError::Config("at least one stage is required".into()));
        }
        if let Some(stage) = self.stages.iter().find(|s| s.width == 0 || s.height == 0) {
            return Err(DmaViewError::Config(format!(
                "stage {}x{} {} is empty",
                stage.width, stage.height, stage.layout
            )));
        }
        Ok(())
    }

    pub fn producer_config(&self) -> ProducerConfig {
        ProducerConfig {
            poll_interval: Duration::from_millis(self.producer_poll_ms),
            pull_timeout: Duration::from_millis(self.pull_timeout_ms),
        }
    }

    pub fn renderer_config(&self) -> RendererConfig {
        RendererConfig {
            tick_hz: self.tick_hz,
            yuv_matrix: self.yuv_matrix,
            max_ticks: self.max_ticks,
        }
    }
}
