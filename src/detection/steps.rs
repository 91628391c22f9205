use crate::config::DetectorConfig;
use crate::detection::edge_map::EdgeMap;
use crate::detection::{contours, preprocessing, rect_score, scoring, templates};
use crate::error::DetectionError;
use crate::models::{Candidate, DebugStep, Strategy};
use crate::pipeline::{elapsed_ms, PipelineContext, PipelineData, PipelineStep, StepOutcome};
use image::{DynamicImage, Rgb};
use imageproc::drawing::draw_line_segment_mut;
use std::sync::Arc;
use std::time::Instant;

/// Smallest working image the detector accepts, per side
const MIN_WORKING_SIDE: u32 = 16;

/// Downscale to the working resolution and denoise
pub struct PreprocessStep;

impl PipelineStep for PreprocessStep {
    fn process(&self, data: &mut PipelineData, context: &PipelineContext) -> Result<StepOutcome, DetectionError> {
        let config = &context.config;
        let (working, scale) = preprocessing::downscale(&data.original, config.max_dimension);
        if working.width() < MIN_WORKING_SIDE || working.height() < MIN_WORKING_SIDE {
            return Err(DetectionError::ImageTooSmall {
                width: data.original.width(),
                height: data.original.height(),
            });
        }
        let blurred = preprocessing::apply_blur(&working, config.blur_sigma);

        let outcome = StepOutcome::found(0).with_debug_render(context, || DynamicImage::ImageRgb8(blurred.clone()));
        data.working = Some(blurred);
        data.scale = scale;
        Ok(outcome)
    }

    fn name(&self) -> &str {
        "preprocess"
    }
}

/// Grayscale, Sobel magnitude, threshold and gap closing
pub struct EdgeDetectionStep;

impl PipelineStep for EdgeDetectionStep {
    fn process(&self, data: &mut PipelineData, context: &PipelineContext) -> Result<StepOutcome, DetectionError> {
        let gray = preprocessing::to_grayscale(data.working()?);
        let edges = EdgeMap::new(preprocessing::detect_edges(&gray, context.config.edge_threshold));

        tracing::trace!(coverage = edges.coverage(), "edge map built");
        let outcome = StepOutcome::found(0).with_debug_render(context, || DynamicImage::ImageLuma8(edges.image().clone()));
        data.gray = Some(gray);
        data.edges = Some(edges);
        Ok(outcome)
    }

    fn name(&self) -> &str {
        "edge_detection"
    }
}

/// One independent way of proposing card rectangles from an edge map
pub trait CandidateStrategy: Send + Sync {
    fn strategy(&self) -> Strategy;

    fn generate(&self, edges: &EdgeMap, config: &DetectorConfig) -> Vec<Candidate>;
}

/// Connected edge regions with a card-like bounding box
pub struct ContourTraceStrategy;

impl CandidateStrategy for ContourTraceStrategy {
    fn strategy(&self) -> Strategy {
        Strategy::ContourTrace
    }

    fn generate(&self, edges: &EdgeMap, config: &DetectorConfig) -> Vec<Candidate> {
        contours::contour_candidates(edges, config)
    }
}

/// Axis-aligned sliding scan over positions × scales
pub struct GridScanStrategy;

impl CandidateStrategy for GridScanStrategy {
    fn strategy(&self) -> Strategy {
        Strategy::GridScan
    }

    fn generate(&self, edges: &EdgeMap, config: &DetectorConfig) -> Vec<Candidate> {
        contours::scan_grid(edges, config)
    }
}

/// Scaled and rotated card templates
pub struct TemplateMatchStrategy;

impl CandidateStrategy for TemplateMatchStrategy {
    fn strategy(&self) -> Strategy {
        Strategy::TemplateMatch
    }

    fn generate(&self, edges: &EdgeMap, config: &DetectorConfig) -> Vec<Candidate> {
        templates::match_templates(edges, config)
    }
}

/// Run every strategy concurrently over the shared, read-only edge map
pub struct CandidateSearchStep {
    pub strategies: Vec<Arc<dyn CandidateStrategy>>,
}

impl CandidateSearchStep {
    pub fn standard() -> Self {
        Self {
            strategies: vec![
                Arc::new(ContourTraceStrategy),
                Arc::new(GridScanStrategy),
                Arc::new(TemplateMatchStrategy),
            ],
        }
    }
}

impl PipelineStep for CandidateSearchStep {
    fn process(&self, data: &mut PipelineData, context: &PipelineContext) -> Result<StepOutcome, DetectionError> {
        let edges = data.edges()?;
        let config: &DetectorConfig = &context.config;

        let results: Vec<(Strategy, Vec<Candidate>, f64)> = std::thread::scope(|scope| {
            let handles: Vec<_> = self
                .strategies
                .iter()
                .map(|strategy| {
                    let handle = scope.spawn(move || {
                        let started = Instant::now();
                        let found = strategy.generate(edges, config);
                        (found, elapsed_ms(started))
                    });
                    (strategy.strategy(), handle)
                })
                .collect();

            // Joined in spawn order, so the merged list is deterministic
            handles
                .into_iter()
                .map(|(strategy, handle)| match handle.join() {
                    Ok((found, time_ms)) => (strategy, found, time_ms),
                    Err(_) => {
                        tracing::warn!(strategy = strategy.as_str(), "candidate strategy panicked");
                        (strategy, Vec::new(), 0.0)
                    }
                })
                .collect()
        });

        let mut outcome = StepOutcome::default();
        let mut candidates = Vec::new();
        for (strategy, found, time_ms) in results {
            outcome.substeps.push(DebugStep {
                step: strategy.as_str().to_string(),
                candidates_found: found.len(),
                time_ms,
            });
            candidates.extend(found);
        }

        outcome.candidates_found = candidates.len();
        data.candidates = candidates;
        Ok(outcome)
    }

    fn name(&self) -> &str {
        "candidate_search"
    }
}

/// Hill-climb the strongest candidates onto nearby edges
pub struct RefinementStep;

impl PipelineStep for RefinementStep {
    fn process(&self, data: &mut PipelineData, context: &PipelineContext) -> Result<StepOutcome, DetectionError> {
        let config = &context.config;
        // Field borrows, so candidates can be rewritten while the edge map is read
        let edges = data.edges.as_ref().ok_or(DetectionError::MissingStage("edge map"))?;
        let candidates = &mut data.candidates;

        // Best first; stable sort keeps strategy order among equal scores
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| candidates[b].score.support().total_cmp(&candidates[a].score.support()));

        let initial_step = contours::scan_step(edges.width(), edges.height(), config) as f32 / 2.0;
        let mut refined = 0;
        for &idx in order.iter().take(config.refine_top_k) {
            let before = candidates[idx];
            let after = rect_score::refine_candidate(edges, &before, initial_step, config);
            if after.score.support() > before.score.support() {
                refined += 1;
            }
            candidates[idx] = after;
        }

        Ok(StepOutcome::found(refined))
    }

    fn name(&self) -> &str {
        "refinement"
    }
}

/// Centrality and size scoring, overlap suppression and ranking
pub struct ScoringStep;

impl PipelineStep for ScoringStep {
    fn process(&self, data: &mut PipelineData, context: &PipelineContext) -> Result<StepOutcome, DetectionError> {
        let cards = scoring::finalize(&data.candidates, data.gray()?, data.edges()?, &context.config);
        let working = data.working()?;

        let outcome = StepOutcome::found(cards.len()).with_debug_render(context, || {
            let mut overlay = working.clone();
            for card in &cards {
                for i in 0..4 {
                    let (a, b) = (card.corners[i], card.corners[(i + 1) % 4]);
                    draw_line_segment_mut(&mut overlay, (a.x, a.y), (b.x, b.y), Rgb([255u8, 0, 0]));
                }
            }
            DynamicImage::ImageRgb8(overlay)
        });
        data.cards = cards;
        Ok(outcome)
    }

    fn name(&self) -> &str {
        "scoring"
    }
}
