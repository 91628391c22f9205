pub mod preprocessing;
pub mod edge_map;
pub mod rect_score;
pub mod contours;
pub mod templates;
pub mod scoring;
pub mod steps;

use image::DynamicImage;
use std::path::PathBuf;
use std::sync::Arc;

use crate::config::DetectorConfig;
use crate::engine::FileProcessor;
use crate::error::DetectionError;
use crate::models::{DetectedCard, DetectionReport};
use crate::pipeline::Pipeline;

/// Main detection entry point: a validated configuration bound to the
/// standard pipeline.
#[derive(Clone)]
pub struct CardDetector {
    pipeline: Pipeline,
}

impl CardDetector {
    pub fn new(config: DetectorConfig) -> Result<Self, DetectionError> {
        config
            .validate()
            .map_err(|e| DetectionError::InvalidConfig(e.to_string()))?;
        Ok(Self {
            pipeline: build_standard_pipeline(config),
        })
    }

    /// Write per-step diagnostic images into `output_dir`
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self, DetectionError> {
        self.pipeline = self.pipeline.with_debug(output_dir)?;
        Ok(self)
    }

    pub fn config(&self) -> &DetectorConfig {
        self.pipeline.config()
    }

    /// Decode and detect. Bounds are in working-image coordinates.
    pub fn detect_bytes(&self, bytes: &[u8]) -> Result<DetectionReport, DetectionError> {
        self.pipeline.run_bytes(bytes)
    }

    pub fn detect_image(&self, image: DynamicImage) -> Result<DetectionReport, DetectionError> {
        self.pipeline.run(image)
    }
}

impl Default for CardDetector {
    fn default() -> Self {
        Self {
            pipeline: build_standard_pipeline(DetectorConfig::default()),
        }
    }
}

impl FileProcessor for CardDetector {
    fn process(&self, bytes: &[u8]) -> Result<Vec<DetectedCard>, DetectionError> {
        Ok(self.detect_bytes(bytes)?.cards)
    }
}

/// Build the standard detection pipeline using the composable pipeline system
pub fn build_standard_pipeline(config: DetectorConfig) -> Pipeline {
    use crate::detection::steps::*;

    Pipeline::new(config)
        .add_step(Arc::new(PreprocessStep))
        .add_step(Arc::new(EdgeDetectionStep))
        .add_step(Arc::new(CandidateSearchStep::standard()))
        .add_step(Arc::new(RefinementStep))
        .add_step(Arc::new(ScoringStep))
}
