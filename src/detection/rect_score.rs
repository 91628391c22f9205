//! Edge and corner evidence for a rectangle hypothesis.
//!
//! Every strategy scores its proposals through [`score_rectangle`], so grid
//! scan, contour and template candidates are directly comparable.

use crate::config::DetectorConfig;
use crate::detection::edge_map::EdgeMap;
use crate::models::{Candidate, LocalScore, RectGeometry};

const EDGE_WEIGHT: f32 = 0.5;
const CORNER_WEIGHT: f32 = 0.3;
const ASPECT_WEIGHT: f32 = 0.2;

/// Refinement stops after this many accepted moves.
const MAX_REFINE_MOVES: usize = 64;

/// Refinement never shrinks a candidate below this share of its starting width.
pub const MIN_REFINE_SCALE: f32 = 0.8;

/// Interior lattice side, in points
const INTERIOR_SAMPLES: usize = 8;
/// Fraction of the rectangle left out on every side of the interior lattice
const INTERIOR_INSET: f32 = 0.15;

/// `1 - |actual - target| / target`
pub fn aspect_bonus(actual: f32, target: f32) -> f32 {
    1.0 - (actual - target).abs() / target
}

/// Fraction of perimeter samples, taken every `stride` pixels, that land on
/// an edge pixel.
pub fn perimeter_edge_ratio(edges: &EdgeMap, geometry: &RectGeometry, stride: f32) -> f32 {
    let corners = geometry.corners();
    let mut hits = 0usize;
    let mut samples = 0usize;

    for i in 0..4 {
        let a = corners[i];
        let b = corners[(i + 1) % 4];
        let length = ((b.x - a.x).powi(2) + (b.y - a.y).powi(2)).sqrt();
        let steps = ((length / stride).floor() as usize).max(1);
        // The end point belongs to the next side
        for k in 0..steps {
            let t = k as f32 / steps as f32;
            let x = a.x + (b.x - a.x) * t;
            let y = a.y + (b.y - a.y) * t;
            if edges.is_on(x.round() as i64, y.round() as i64) {
                hits += 1;
            }
            samples += 1;
        }
    }

    if samples == 0 {
        0.0
    } else {
        hits as f32 / samples as f32
    }
}

/// Mean edge density in a square neighbourhood of each corner.
pub fn corner_score(edges: &EdgeMap, geometry: &RectGeometry, radius: u32) -> f32 {
    let corners = geometry.corners();
    corners
        .iter()
        .map(|p| edges.density(p.x, p.y, radius))
        .sum::<f32>()
        / corners.len() as f32
}

/// Share of edge pixels on a lattice over the inner part of the rectangle,
/// taken in the rectangle's own rotated frame.
pub fn interior_density(edges: &EdgeMap, geometry: &RectGeometry) -> f32 {
    let (sin, cos) = geometry.angle.to_radians().sin_cos();
    let span = 1.0 - 2.0 * INTERIOR_INSET;
    let offset = |i: usize| INTERIOR_INSET + span * (i as f32 + 0.5) / INTERIOR_SAMPLES as f32 - 0.5;

    let mut hits = 0usize;
    for i in 0..INTERIOR_SAMPLES {
        for j in 0..INTERIOR_SAMPLES {
            let u = offset(i) * geometry.width;
            let v = offset(j) * geometry.height;
            let x = geometry.center.x + u * cos - v * sin;
            let y = geometry.center.y + u * sin + v * cos;
            if edges.is_on(x.round() as i64, y.round() as i64) {
                hits += 1;
            }
        }
    }
    hits as f32 / (INTERIOR_SAMPLES * INTERIOR_SAMPLES) as f32
}

/// Score a rectangle against the edge map.
///
/// Returns `None` when the shape does not fit inside the image.
pub fn score_rectangle(
    edges: &EdgeMap,
    geometry: &RectGeometry,
    config: &DetectorConfig,
) -> Option<LocalScore> {
    if geometry.width < 2.0 || geometry.height < 2.0 {
        return None;
    }
    if !geometry.fits_within(edges.width(), edges.height()) {
        return None;
    }

    let edge_ratio = perimeter_edge_ratio(edges, geometry, config.perimeter_stride);
    let corner_score = corner_score(edges, geometry, config.corner_radius);
    let aspect_bonus = aspect_bonus(geometry.aspect_ratio(), config.target_aspect_ratio);
    let total = EDGE_WEIGHT * edge_ratio + CORNER_WEIGHT * corner_score + ASPECT_WEIGHT * aspect_bonus.max(0.0);

    Some(LocalScore {
        edge_ratio,
        corner_score,
        aspect_bonus,
        total,
        interior_density: interior_density(edges, geometry),
    })
}

/// Hill-climb a candidate over centre position and uniform scale.
///
/// Steepest ascent on [`LocalScore::support`]: starts with `initial_step`
/// pixel moves and halves the step whenever no neighbour improves, down to
/// one pixel. Angle and aspect ratio never change, and the width never drops
/// below `MIN_REFINE_SCALE` of the starting width.
pub fn refine_candidate(
    edges: &EdgeMap,
    candidate: &Candidate,
    initial_step: f32,
    config: &DetectorConfig,
) -> Candidate {
    let mut best = *candidate;
    let min_width = candidate.geometry.width * MIN_REFINE_SCALE;
    let mut step = initial_step.max(1.0);
    let mut moves = 0;

    while step >= 1.0 && moves < MAX_REFINE_MOVES {
        let mut next: Option<Candidate> = None;

        for (dx, dy, dw) in neighbour_moves() {
            let geometry = &best.geometry;
            let scale = (geometry.width + dw * step) / geometry.width;
            let trial = geometry.adjusted(dx * step, dy * step, scale);
            if trial.width < min_width {
                continue;
            }
            let Some(score) = score_rectangle(edges, &trial, config) else {
                continue;
            };
            let to_beat = next.map_or(best.score.support(), |c| c.score.support());
            if score.support() > to_beat + f32::EPSILON {
                next = Some(Candidate {
                    geometry: trial,
                    score,
                    strategy: best.strategy,
                });
            }
        }

        match next {
            Some(better) => {
                best = better;
                moves += 1;
            }
            None => step /= 2.0,
        }
    }

    best
}

/// All 26 non-zero combinations of {-1, 0, 1} over (x, y, width).
fn neighbour_moves() -> impl Iterator<Item = (f32, f32, f32)> {
    const UNIT: [f32; 3] = [-1.0, 0.0, 1.0];
    UNIT.into_iter()
        .flat_map(|dx| UNIT.into_iter().map(move |dy| (dx, dy)))
        .flat_map(|(dx, dy)| UNIT.into_iter().map(move |dw| (dx, dy, dw)))
        .filter(|&(dx, dy, dw)| dx != 0.0 || dy != 0.0 || dw != 0.0)
}
