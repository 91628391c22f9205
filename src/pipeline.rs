use image::{DynamicImage, GrayImage, RgbImage};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use crate::config::DetectorConfig;
use crate::detection::edge_map::EdgeMap;
use crate::detection::preprocessing;
use crate::error::DetectionError;
use crate::models::{Candidate, DebugStep, DetectedCard, DetectionDebugInfo, DetectionReport, Strategy};

/// Data that flows through the pipeline for one image.
/// Each step fills in the stage it owns.
#[derive(Clone)]
pub struct PipelineData {
    /// Decoded input (shared efficiently via Arc)
    pub original: Arc<DynamicImage>,

    /// Working-resolution, denoised pixels
    pub working: Option<RgbImage>,

    /// working size / original size
    pub scale: f32,

    pub gray: Option<GrayImage>,
    pub edges: Option<EdgeMap>,

    /// Candidates from every strategy, in strategy order
    pub candidates: Vec<Candidate>,

    /// Final ranked, deduplicated cards
    pub cards: Vec<DetectedCard>,
}

impl PipelineData {
    pub fn from_image(image: DynamicImage) -> Self {
        Self {
            original: Arc::new(image),
            working: None,
            scale: 1.0,
            gray: None,
            edges: None,
            candidates: Vec::new(),
            cards: Vec::new(),
        }
    }

    pub fn working(&self) -> Result<&RgbImage, DetectionError> {
        self.working.as_ref().ok_or(DetectionError::MissingStage("working image"))
    }

    pub fn gray(&self) -> Result<&GrayImage, DetectionError> {
        self.gray.as_ref().ok_or(DetectionError::MissingStage("grayscale image"))
    }

    pub fn edges(&self) -> Result<&EdgeMap, DetectionError> {
        self.edges.as_ref().ok_or(DetectionError::MissingStage("edge map"))
    }
}

/// What one step reports back to the pipeline
#[derive(Default)]
pub struct StepOutcome {
    pub candidates_found: usize,
    /// Finer-grained timings recorded inside the step (e.g. per strategy)
    pub substeps: Vec<DebugStep>,
    /// Image written to the debug directory, if enabled
    pub debug_image: Option<DynamicImage>,
}

impl StepOutcome {
    pub fn found(candidates_found: usize) -> Self {
        Self {
            candidates_found,
            ..Default::default()
        }
    }

    pub fn with_debug_image(mut self, image: DynamicImage) -> Self {
        self.debug_image = Some(image);
        self
    }

    /// Attach a debug image, rendering it only when debug output is enabled
    pub fn with_debug_render(self, context: &PipelineContext, render: impl FnOnce() -> DynamicImage) -> Self {
        if context.debug_enabled() {
            self.with_debug_image(render())
        } else {
            self
        }
    }
}

/// Debug configuration for pipeline execution
#[derive(Clone, Debug)]
pub struct DebugConfig {
    /// Root directory for debug outputs
    pub output_dir: PathBuf,
    /// Whether debug mode is enabled
    pub enabled: bool,
}

/// Context available to all pipeline steps
#[derive(Clone)]
pub struct PipelineContext {
    pub config: Arc<DetectorConfig>,
    pub debug: Option<DebugConfig>,
}

impl PipelineContext {
    fn debug_dir(&self) -> Option<&PathBuf> {
        self.debug.as_ref().filter(|d| d.enabled).map(|d| &d.output_dir)
    }

    pub fn debug_enabled(&self) -> bool {
        self.debug_dir().is_some()
    }
}

/// Trait that all pipeline steps must implement
pub trait PipelineStep: Send + Sync {
    /// Read the stages produced by earlier steps and fill in this one
    fn process(&self, data: &mut PipelineData, context: &PipelineContext) -> Result<StepOutcome, DetectionError>;

    /// Short snake_case name used in debug info and debug file names
    fn name(&self) -> &str;
}

/// Composable pipeline builder
#[derive(Clone)]
pub struct Pipeline {
    steps: Vec<Arc<dyn PipelineStep>>,
    context: PipelineContext,
}

impl Pipeline {
    /// Create a new empty pipeline
    pub fn new(config: DetectorConfig) -> Self {
        Self {
            steps: Vec::new(),
            context: PipelineContext {
                config: Arc::new(config),
                debug: None,
            },
        }
    }

    pub fn config(&self) -> &DetectorConfig {
        &self.context.config
    }

    /// Enable debug mode with output directory
    /// The directory must be empty or non-existent
    pub fn with_debug(mut self, output_dir: PathBuf) -> Result<Self, DetectionError> {
        let io_err = |e: std::io::Error| DetectionError::DebugOutput(e.to_string());
        if output_dir.exists() {
            let entries = std::fs::read_dir(&output_dir).map_err(io_err)?;
            if entries.count() > 0 {
                return Err(DetectionError::DebugOutput(format!(
                    "debug directory is not empty: {}",
                    output_dir.display()
                )));
            }
        } else {
            std::fs::create_dir_all(&output_dir).map_err(io_err)?;
        }

        self.context.debug = Some(DebugConfig {
            output_dir,
            enabled: true,
        });

        Ok(self)
    }

    /// Add a processing step to the pipeline
    pub fn add_step(mut self, step: Arc<dyn PipelineStep>) -> Self {
        self.steps.push(step);
        self
    }

    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    /// Decode raw file bytes and run every step
    pub fn run_bytes(&self, bytes: &[u8]) -> Result<DetectionReport, DetectionError> {
        let image = preprocessing::decode(bytes)?;
        self.run(image)
    }

    /// Run the pipeline on a decoded image
    pub fn run(&self, input: DynamicImage) -> Result<DetectionReport, DetectionError> {
        self.run_partial(input, self.steps.len())
    }

    /// Run only the first `num_steps` steps (useful for debugging)
    pub fn run_partial(&self, input: DynamicImage, num_steps: usize) -> Result<DetectionReport, DetectionError> {
        let started = Instant::now();
        let (source_width, source_height) = (input.width(), input.height());

        if let Some(dir) = self.context.debug_dir() {
            save_debug_image(&input, &dir.join("00_input.png"))?;
        }

        let mut data = PipelineData::from_image(input);
        let mut steps = Vec::new();

        for (idx, step) in self.steps.iter().take(num_steps).enumerate() {
            let step_started = Instant::now();
            let outcome = step.process(&mut data, &self.context)?;
            let time_ms = elapsed_ms(step_started);

            tracing::debug!(
                step = step.name(),
                candidates = outcome.candidates_found,
                time_ms,
                "pipeline step finished"
            );

            steps.extend(outcome.substeps);
            steps.push(DebugStep {
                step: step.name().to_string(),
                candidates_found: outcome.candidates_found,
                time_ms,
            });

            if let (Some(dir), Some(image)) = (self.context.debug_dir(), &outcome.debug_image) {
                let filename = format!("{:02}_{}.png", idx + 1, step.name());
                save_debug_image(image, &dir.join(filename))?;
            }
        }

        let mut strategies: Vec<Strategy> = data.cards.iter().map(|c| c.strategy).collect();
        strategies.sort();
        strategies.dedup();

        let (working_width, working_height) = data
            .working
            .as_ref()
            .map(|w| w.dimensions())
            .unwrap_or((source_width, source_height));

        Ok(DetectionReport {
            cards: data.cards,
            debug: DetectionDebugInfo {
                processing_time_ms: elapsed_ms(started),
                steps,
                strategies,
                source_width,
                source_height,
                working_width,
                working_height,
                scale: data.scale,
            },
        })
    }
}

pub(crate) fn elapsed_ms(since: Instant) -> f64 {
    since.elapsed().as_secs_f64() * 1000.0
}

fn save_debug_image(image: &DynamicImage, path: &std::path::Path) -> Result<(), DetectionError> {
    image
        .save(path)
        .map_err(|e| DetectionError::DebugOutput(format!("{}: {}", path.display(), e)))?;
    tracing::debug!(path = %path.display(), "saved debug image");
    Ok(())
}
