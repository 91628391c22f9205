//! Template matching over a fixed lattice of scaled and rotated card shapes.
//!
//! Catches tilted or skewed cards that the axis-aligned grid scan misses.

use crate::config::DetectorConfig;
use crate::detection::edge_map::EdgeMap;
use crate::detection::rect_score::score_rectangle;
use crate::models::{Candidate, Point, RectGeometry, Strategy};

/// One card shape to slide over the image
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CardTemplate {
    pub width: f32,
    pub height: f32,
    /// Degrees, clockwise
    pub angle: f32,
}

impl CardTemplate {
    /// Half extents of the rotated shape's axis-aligned bounding box
    fn half_extents(&self) -> (f32, f32) {
        let (sin, cos) = self.angle.to_radians().sin_cos();
        let (hw, hh) = ((self.width - 1.0) / 2.0, (self.height - 1.0) / 2.0);
        (
            hw * cos.abs() + hh * sin.abs(),
            hw * sin.abs() + hh * cos.abs(),
        )
    }

    fn at(&self, center: Point) -> RectGeometry {
        RectGeometry {
            center,
            width: self.width,
            height: self.height,
            angle: self.angle,
        }
    }
}

/// Base card size × scale factors × rotation angles
pub fn template_lattice(width: u32, height: u32, config: &DetectorConfig) -> Vec<CardTemplate> {
    let base_w = width.min(height) as f32 * config.template_base_fraction;
    let base_h = base_w / config.target_aspect_ratio;

    config
        .template_scales
        .iter()
        .flat_map(|&scale| {
            config.template_angles.iter().map(move |&angle| CardTemplate {
                width: (base_w * scale).round(),
                height: (base_h * scale).round(),
                angle,
            })
        })
        .filter(|t| t.width >= 8.0 && t.height >= 8.0)
        .collect()
}

/// Score every template at every lattice position that keeps it inside
/// the image.
pub fn match_templates(edges: &EdgeMap, config: &DetectorConfig) -> Vec<Candidate> {
    let (width, height) = (edges.width() as f32, edges.height() as f32);
    let mut candidates = Vec::new();

    for template in template_lattice(edges.width(), edges.height(), config) {
        let (ex, ey) = template.half_extents();
        if 2.0 * ex >= width || 2.0 * ey >= height {
            continue;
        }
        let step = (template.width * config.template_stride_fraction).max(4.0);

        let mut cy = ey;
        while cy + ey <= height - 1.0 {
            let mut cx = ex;
            while cx + ex <= width - 1.0 {
                let geometry = template.at(Point::new(cx, cy));
                if let Some(score) = score_rectangle(edges, &geometry, config) {
                    if score.total >= config.min_score {
                        candidates.push(Candidate {
                            geometry,
                            score,
                            strategy: Strategy::TemplateMatch,
                        });
                    }
                }
                cx += step;
            }
            cy += step;
        }
    }

    candidates
}
