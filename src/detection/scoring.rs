//! Global re-scoring, non-max suppression and ranking of candidates.

use image::GrayImage;
use std::cmp::Ordering;

use crate::config::DetectorConfig;
use crate::detection::edge_map::EdgeMap;
use crate::models::{BackgroundType, Bounds, CardCondition, Candidate, DetectedCard};

const LOCAL_WEIGHT: f32 = 0.7;
const GEOMETRY_WEIGHT: f32 = 0.3;
const CENTRALITY_WEIGHT: f32 = 0.5;
const SIZE_WEIGHT: f32 = 0.5;

/// Ring edge density above which the surroundings count as textured
const TEXTURED_DENSITY: f32 = 0.15;

/// 1 at the image centre, 0 at a corner
pub fn centrality(candidate: &Candidate, width: u32, height: u32) -> f32 {
    let (cx, cy) = ((width as f32 - 1.0) / 2.0, (height as f32 - 1.0) / 2.0);
    let half_diagonal = (cx * cx + cy * cy).sqrt();
    if half_diagonal == 0.0 {
        return 1.0;
    }
    let c = candidate.geometry.center;
    let distance = ((c.x - cx).powi(2) + (c.y - cy).powi(2)).sqrt();
    (1.0 - distance / half_diagonal).clamp(0.0, 1.0)
}

/// 1 when the card covers exactly the ideal fraction of the image
pub fn size_plausibility(candidate: &Candidate, width: u32, height: u32, ideal_fraction: f32) -> f32 {
    let image_area = width as f32 * height as f32;
    if image_area == 0.0 {
        return 0.0;
    }
    let fraction = candidate.geometry.width * candidate.geometry.height / image_area;
    (1.0 - (fraction - ideal_fraction).abs() / ideal_fraction).clamp(0.0, 1.0)
}

pub fn geometry_score(candidate: &Candidate, width: u32, height: u32, config: &DetectorConfig) -> f32 {
    CENTRALITY_WEIGHT * centrality(candidate, width, height)
        + SIZE_WEIGHT * size_plausibility(candidate, width, height, config.ideal_area_fraction)
}

/// `0.7·local + 0.3·geometry`, kept in [0, 1]
pub fn combined_confidence(local: f32, geometry: f32) -> f32 {
    (LOCAL_WEIGHT * local + GEOMETRY_WEIGHT * geometry).clamp(0.0, 1.0)
}

/// Descending confidence; ties broken by position so ranking is stable
fn rank(a: &DetectedCard, b: &DetectedCard) -> Ordering {
    b.confidence
        .total_cmp(&a.confidence)
        .then_with(|| (a.bounds.y, a.bounds.x).cmp(&(b.bounds.y, b.bounds.x)))
        .then_with(|| a.bounds.width.cmp(&b.bounds.width))
        .then_with(|| a.angle.total_cmp(&b.angle))
}

/// Greedy IoU suppression over an already ranked list.
///
/// A card survives only if its overlap with every kept card is at most
/// `threshold`.
pub fn suppress_overlaps(ranked: Vec<DetectedCard>, threshold: f32) -> Vec<DetectedCard> {
    let mut kept: Vec<DetectedCard> = Vec::with_capacity(ranked.len());
    for card in ranked {
        if kept.iter().all(|k| k.bounds.iou(&card.bounds) <= threshold) {
            kept.push(card);
        }
    }
    kept
}

/// Merge, score, deduplicate and truncate candidates from all strategies.
///
/// The local term is the clutter-discounted [`crate::models::LocalScore::support`];
/// candidates whose support falls under `min_score` are dropped, so uniformly
/// busy texture yields no cards.
pub fn finalize(
    candidates: &[Candidate],
    gray: &GrayImage,
    edges: &EdgeMap,
    config: &DetectorConfig,
) -> Vec<DetectedCard> {
    let (width, height) = gray.dimensions();
    let aspect_range = config.aspect_range();

    let mut cards: Vec<DetectedCard> = candidates
        .iter()
        .filter(|c| aspect_range.contains(&c.geometry.aspect_ratio()))
        .filter(|c| c.score.support() >= config.min_score)
        .map(|c| {
            let geometry_score = geometry_score(c, width, height, config);
            let bounds = c.geometry.bounds(width, height);
            DetectedCard {
                bounds,
                confidence: combined_confidence(c.score.support(), geometry_score),
                aspect_ratio: c.geometry.aspect_ratio(),
                angle: c.geometry.angle,
                corners: c.geometry.corners(),
                edge_strength: c.score.total.clamp(0.0, 1.0),
                geometry_score,
                background_type: classify_background(gray, edges, &bounds),
                card_condition: classify_condition(c.score.edge_ratio),
                strategy: c.strategy,
            }
        })
        .collect();

    cards.sort_by(rank);
    let mut kept = suppress_overlaps(cards, config.overlap_threshold);
    kept.truncate(config.max_results);
    kept
}

/// Light/dark/textured guess from a ring just outside the card
pub fn classify_background(gray: &GrayImage, edges: &EdgeMap, bounds: &Bounds) -> BackgroundType {
    let (width, height) = gray.dimensions();
    let margin = (bounds.width.min(bounds.height) / 10).max(2);
    let x0 = bounds.x.saturating_sub(margin);
    let y0 = bounds.y.saturating_sub(margin);
    let x1 = (bounds.right() + margin).min(width);
    let y1 = (bounds.bottom() + margin).min(height);

    let mut luma_sum = 0u64;
    let mut samples = 0u64;
    let mut edge_hits = 0u64;
    for y in y0..y1 {
        for x in x0..x1 {
            let inside = x >= bounds.x && x < bounds.right() && y >= bounds.y && y < bounds.bottom();
            if inside {
                continue;
            }
            luma_sum += gray.get_pixel(x, y)[0] as u64;
            if edges.is_on(x as i64, y as i64) {
                edge_hits += 1;
            }
            samples += 1;
        }
    }

    if samples == 0 {
        return BackgroundType::Textured;
    }
    // About two pixels of the card's own outline fall inside the ring
    let outline_allowance = 2.0 / margin as f32;
    let density = edge_hits as f32 / samples as f32;
    if density > TEXTURED_DENSITY + outline_allowance {
        BackgroundType::Textured
    } else if luma_sum / samples >= 128 {
        BackgroundType::Light
    } else {
        BackgroundType::Dark
    }
}

/// Crisp/fair/worn guess from how continuous the border edges are
pub fn classify_condition(edge_ratio: f32) -> CardCondition {
    if edge_ratio >= 0.85 {
        CardCondition::Crisp
    } else if edge_ratio >= 0.6 {
        CardCondition::Fair
    } else {
        CardCondition::Worn
    }
}
