use image::Luma;
use imageproc::region_labelling::{connected_components, Connectivity};
use std::collections::BTreeMap;

use crate::config::DetectorConfig;
use crate::detection::edge_map::EdgeMap;
use crate::detection::rect_score::score_rectangle;
use crate::models::{Candidate, RectGeometry, Strategy};

/// Bounding box and pixel count of one connected edge region
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Contour {
    pub min_x: u32,
    pub min_y: u32,
    pub max_x: u32,
    pub max_y: u32,
    pub pixel_count: u32,
}

impl Contour {
    pub fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    pub fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    pub fn aspect_ratio(&self) -> f32 {
        self.width() as f32 / self.height() as f32
    }
}

/// Find contours in the binary edge map using connected components
pub fn find_contours(edges: &EdgeMap, min_area: u32) -> Vec<Contour> {
    let labeled = connected_components(edges.image(), Connectivity::Eight, Luma([0u8]));

    // Ordered map keeps the output independent of hashing
    let mut regions: BTreeMap<u32, (u32, u32, u32, u32, u32)> = BTreeMap::new();

    for (x, y, label) in labeled.enumerate_pixels() {
        let label_val = label[0];
        if label_val == 0 {
            continue; // Skip background
        }

        regions
            .entry(label_val)
            .and_modify(|(min_x, min_y, max_x, max_y, count)| {
                *min_x = (*min_x).min(x);
                *min_y = (*min_y).min(y);
                *max_x = (*max_x).max(x);
                *max_y = (*max_y).max(y);
                *count += 1;
            })
            .or_insert((x, y, x, y, 1));
    }

    regions
        .into_iter()
        .map(|(_, (min_x, min_y, max_x, max_y, count))| Contour {
            min_x,
            min_y,
            max_x,
            max_y,
            pixel_count: count,
        })
        .filter(|c| c.pixel_count >= min_area)
        .collect()
}

/// Contours whose bounding box has a card-like size and aspect ratio,
/// scored as axis-aligned rectangles.
pub fn contour_candidates(edges: &EdgeMap, config: &DetectorConfig) -> Vec<Candidate> {
    let width = edges.width();
    let min_width = (width as f32 * config.contour_min_fraction).max(8.0) as u32;
    // An outline has at least its perimeter in pixels
    let min_area = min_width * 2;
    let aspect_range = config.aspect_range();

    find_contours(edges, min_area)
        .into_iter()
        .filter(|c| c.width() >= min_width && c.width() < width)
        .filter(|c| aspect_range.contains(&c.aspect_ratio()))
        .filter_map(|c| {
            let geometry = RectGeometry::axis_aligned(
                c.min_x as f32,
                c.min_y as f32,
                c.width() as f32,
                c.height() as f32,
            );
            let score = score_rectangle(edges, &geometry, config)?;
            (score.total >= config.min_score).then_some(Candidate {
                geometry,
                score,
                strategy: Strategy::ContourTrace,
            })
        })
        .collect()
}

/// Grid position step for the sliding scan
pub fn scan_step(width: u32, height: u32, config: &DetectorConfig) -> u32 {
    ((width.min(height) as f32 * config.scan_step_fraction).round() as u32).max(4)
}

/// Width of a target-ratio card covering `ideal_area_fraction` of the image
pub fn ideal_card_width(width: u32, height: u32, config: &DetectorConfig) -> f32 {
    (config.ideal_area_fraction * config.target_aspect_ratio * width as f32 * height as f32).sqrt()
}

/// Card widths for the grid scan: each configured fraction of the image
/// width, plus the ideal card width when it lies beyond the largest of them.
pub fn scan_widths(width: u32, height: u32, config: &DetectorConfig) -> Vec<f32> {
    let mut widths: Vec<f32> = config
        .scan_scales
        .iter()
        .map(|fraction| (width as f32 * fraction).round())
        .collect();
    let largest = widths.iter().copied().fold(0.0, f32::max);
    let ideal = ideal_card_width(width, height, config).round();
    if ideal > largest {
        widths.push(ideal);
    }
    widths
}

/// Slide card-shaped rectangles of each scan width over a grid of
/// positions, keeping those above the minimum score.
pub fn scan_grid(edges: &EdgeMap, config: &DetectorConfig) -> Vec<Candidate> {
    let (width, height) = (edges.width(), edges.height());
    let step = scan_step(width, height, config) as usize;
    let mut candidates = Vec::new();

    for card_w in scan_widths(width, height, config) {
        let card_h = (card_w / config.target_aspect_ratio).round();
        if card_w < 8.0 || card_w > width as f32 || card_h > height as f32 {
            continue;
        }

        let max_x = width - card_w as u32;
        let max_y = height - card_h as u32;
        for y in (0..=max_y).step_by(step) {
            for x in (0..=max_x).step_by(step) {
                let geometry = RectGeometry::axis_aligned(x as f32, y as f32, card_w, card_h);
                if let Some(score) = score_rectangle(edges, &geometry, config) {
                    if score.total >= config.min_score {
                        candidates.push(Candidate {
                            geometry,
                            score,
                            strategy: Strategy::GridScan,
                        });
                    }
                }
            }
        }
    }

    candidates
}
