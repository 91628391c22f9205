use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::error::ConfigError;

/// Tuning constants for the card detection pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorConfig {
    /// Longest side of the working image; inputs are only ever scaled down
    pub max_dimension: u32,
    /// Gaussian sigma applied before edge detection
    pub blur_sigma: f32,
    /// Gradient magnitude cutoff for the binary edge map
    pub edge_threshold: u8,
    /// Expected card width / height (portrait trading card)
    pub target_aspect_ratio: f32,
    /// Maximum absolute deviation from `target_aspect_ratio`
    pub aspect_tolerance: f32,
    /// Grid scan card widths as fractions of the image width. The width of a
    /// card covering `ideal_area_fraction` is scanned as well.
    pub scan_scales: Vec<f32>,
    /// Grid scan position step as a fraction of the smaller image side
    pub scan_step_fraction: f32,
    /// Distance between sampled perimeter pixels
    pub perimeter_stride: f32,
    /// Neighbourhood radius used for corner density
    pub corner_radius: u32,
    /// Local score below which candidates are discarded
    pub min_score: f32,
    /// Base template width as a fraction of the smaller image side
    pub template_base_fraction: f32,
    pub template_scales: Vec<f32>,
    /// Template rotations in degrees
    pub template_angles: Vec<f32>,
    /// Template placement step as a fraction of the template width
    pub template_stride_fraction: f32,
    /// Number of best candidates hill-climbed onto nearby edges
    pub refine_top_k: usize,
    /// Smallest contour bounding box width, as a fraction of the image width
    pub contour_min_fraction: f32,
    /// Preferred card area as a fraction of the image area
    pub ideal_area_fraction: f32,
    /// IoU above which two cards count as duplicates
    pub overlap_threshold: f32,
    pub max_results: usize,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            max_dimension: 800,
            blur_sigma: 0.5,
            edge_threshold: 50,
            target_aspect_ratio: 0.714,
            aspect_tolerance: 0.1,
            scan_scales: vec![0.15, 0.2, 0.25, 0.3],
            scan_step_fraction: 0.025,
            perimeter_stride: 3.0,
            corner_radius: 5,
            min_score: 0.3,
            template_base_fraction: 0.3,
            template_scales: vec![0.5, 0.75, 1.0, 1.25, 1.5],
            template_angles: vec![0.0, 15.0, -15.0, 30.0, -30.0, 45.0],
            template_stride_fraction: 0.25,
            refine_top_k: 12,
            contour_min_fraction: 0.08,
            ideal_area_fraction: 0.15,
            overlap_threshold: 0.2,
            max_results: 8,
        }
    }
}

impl DetectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_dimension < 16 {
            return Err(invalid("max_dimension must be at least 16"));
        }
        if !(self.blur_sigma > 0.0) {
            return Err(invalid("blur_sigma must be positive"));
        }
        if !(self.target_aspect_ratio > 0.0) {
            return Err(invalid("target_aspect_ratio must be positive"));
        }
        if !(self.aspect_tolerance >= 0.0) {
            return Err(invalid("aspect_tolerance must not be negative"));
        }
        if !(self.perimeter_stride >= 1.0) {
            return Err(invalid("perimeter_stride must be at least 1 pixel"));
        }
        if !(self.scan_step_fraction > 0.0) || !(self.template_stride_fraction > 0.0) {
            return Err(invalid("scan and template strides must be positive"));
        }
        if self.scan_scales.iter().any(|s| !(*s > 0.0 && *s <= 1.0)) {
            return Err(invalid("scan_scales must lie in (0, 1]"));
        }
        if self.template_scales.iter().any(|s| !(*s > 0.0)) {
            return Err(invalid("template_scales must be positive"));
        }
        if !(self.ideal_area_fraction > 0.0 && self.ideal_area_fraction <= 1.0) {
            return Err(invalid("ideal_area_fraction must lie in (0, 1]"));
        }
        if !(0.0..=1.0).contains(&self.overlap_threshold) {
            return Err(invalid("overlap_threshold must lie in [0, 1]"));
        }
        if self.max_results == 0 {
            return Err(invalid("max_results must be at least 1"));
        }
        Ok(())
    }

    /// Aspect-ratio band every emitted card must fall into.
    pub fn aspect_range(&self) -> std::ops::RangeInclusive<f32> {
        (self.target_aspect_ratio - self.aspect_tolerance)..=(self.target_aspect_ratio + self.aspect_tolerance)
    }
}

/// Settings for the batch engine and its worker pool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub worker_count: usize,
    /// Upper bound on files per batch
    pub max_batch_size: usize,
    /// Pending count is divided by this to size batches
    pub batch_size_divisor: usize,
    /// Deadline for a dispatched batch before it is declared timed out
    pub batch_timeout_ms: u64,
    /// How long to wait for a worker to acknowledge cancellation
    pub cancel_grace_ms: u64,
    pub detector: DetectorConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            worker_count: 2,
            max_batch_size: 3,
            batch_size_divisor: 5,
            batch_timeout_ms: 120_000,
            cancel_grace_ms: 5_000,
            detector: DetectorConfig::default(),
        }
    }
}

impl EngineConfig {
    /// Load a JSON config file; absent keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path)?;
        let config: EngineConfig = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.worker_count == 0 {
            return Err(invalid("worker_count must be at least 1"));
        }
        if self.max_batch_size == 0 || self.batch_size_divisor == 0 {
            return Err(invalid("max_batch_size and batch_size_divisor must be at least 1"));
        }
        if self.batch_timeout_ms == 0 {
            return Err(invalid("batch_timeout_ms must be positive"));
        }
        self.detector.validate()
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn cancel_grace(&self) -> Duration {
        Duration::from_millis(self.cancel_grace_ms)
    }
}

fn invalid(msg: &str) -> ConfigError {
    ConfigError::Invalid(msg.to_string())
}
