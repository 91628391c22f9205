use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f32,
    pub y: f32,
}

impl Point {
    pub fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }
}

/// Axis-aligned pixel rectangle in the processed image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Bounds {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Bounds {
    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    pub fn right(&self) -> u32 {
        self.x + self.width
    }

    pub fn bottom(&self) -> u32 {
        self.y + self.height
    }

    pub fn intersection_area(&self, other: &Bounds) -> u64 {
        let left = self.x.max(other.x);
        let top = self.y.max(other.y);
        let right = self.right().min(other.right());
        let bottom = self.bottom().min(other.bottom());
        if right <= left || bottom <= top {
            return 0;
        }
        (right - left) as u64 * (bottom - top) as u64
    }

    /// Intersection over union; 0 for two empty rectangles.
    pub fn iou(&self, other: &Bounds) -> f32 {
        let inter = self.intersection_area(other);
        let union = self.area() + other.area() - inter;
        if union == 0 {
            return 0.0;
        }
        inter as f32 / union as f32
    }

    /// Scale into another coordinate space (e.g. back to the source image).
    pub fn scaled(&self, factor: f32) -> Bounds {
        Bounds {
            x: (self.x as f32 * factor).round() as u32,
            y: (self.y as f32 * factor).round() as u32,
            width: (self.width as f32 * factor).round() as u32,
            height: (self.height as f32 * factor).round() as u32,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Strategy {
    ContourTrace,
    GridScan,
    TemplateMatch,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::ContourTrace => "contour_trace",
            Strategy::GridScan => "grid_scan",
            Strategy::TemplateMatch => "template_match",
        }
    }
}

/// Coarse guess at what surrounds the card. Not authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum BackgroundType {
    Light,
    Dark,
    Textured,
}

/// Coarse guess at border wear from edge continuity. Not authoritative.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum CardCondition {
    Crisp,
    Fair,
    Worn,
}

/// Oriented rectangle hypothesis in working-image coordinates.
///
/// `width` and `height` are the unrotated pixel spans; `angle` rotates the
/// shape clockwise (image y points down) around `center`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RectGeometry {
    pub center: Point,
    pub width: f32,
    pub height: f32,
    pub angle: f32,
}

impl RectGeometry {
    /// Axis-aligned rectangle covering pixels `x..x+width`, `y..y+height`.
    pub fn axis_aligned(x: f32, y: f32, width: f32, height: f32) -> Self {
        Self {
            center: Point::new(x + (width - 1.0) / 2.0, y + (height - 1.0) / 2.0),
            width,
            height,
            angle: 0.0,
        }
    }

    pub fn aspect_ratio(&self) -> f32 {
        if self.height <= 0.0 {
            return 0.0;
        }
        self.width / self.height
    }

    /// Corner pixel centres, clockwise from top-left.
    pub fn corners(&self) -> [Point; 4] {
        let hw = (self.width - 1.0) / 2.0;
        let hh = (self.height - 1.0) / 2.0;
        let (sin, cos) = self.angle.to_radians().sin_cos();
        let offsets = [(-hw, -hh), (hw, -hh), (hw, hh), (-hw, hh)];
        offsets.map(|(dx, dy)| {
            Point::new(
                self.center.x + dx * cos - dy * sin,
                self.center.y + dx * sin + dy * cos,
            )
        })
    }

    /// Whether every corner lies inside a `width` x `height` image.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.corners().iter().all(|p| {
            p.x >= 0.0
                && p.y >= 0.0
                && p.x <= width.saturating_sub(1) as f32
                && p.y <= height.saturating_sub(1) as f32
        })
    }

    /// Pixel bounding box of the corners, clipped to the image.
    pub fn bounds(&self, width: u32, height: u32) -> Bounds {
        let corners = self.corners();
        let min_x = corners.iter().map(|p| p.x).fold(f32::INFINITY, f32::min).round().max(0.0);
        let min_y = corners.iter().map(|p| p.y).fold(f32::INFINITY, f32::min).round().max(0.0);
        let max_x = corners
            .iter()
            .map(|p| p.x)
            .fold(f32::NEG_INFINITY, f32::max)
            .round()
            .min(width.saturating_sub(1) as f32);
        let max_y = corners
            .iter()
            .map(|p| p.y)
            .fold(f32::NEG_INFINITY, f32::max)
            .round()
            .min(height.saturating_sub(1) as f32);
        Bounds {
            x: min_x as u32,
            y: min_y as u32,
            width: (max_x - min_x + 1.0).max(0.0) as u32,
            height: (max_y - min_y + 1.0).max(0.0) as u32,
        }
    }

    /// Same shape moved and uniformly scaled; angle and aspect ratio are kept.
    pub fn adjusted(&self, dx: f32, dy: f32, scale: f32) -> Self {
        Self {
            center: Point::new(self.center.x + dx, self.center.y + dy),
            width: self.width * scale,
            height: self.height * scale,
            angle: self.angle,
        }
    }
}

/// Edge-based evidence for one rectangle hypothesis.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct LocalScore {
    /// Fraction of sampled perimeter pixels that are edges
    pub edge_ratio: f32,
    /// Mean edge density around the four corners
    pub corner_score: f32,
    /// `1 - |ratio - target| / target`, may be negative
    pub aspect_bonus: f32,
    /// `0.5·edge + 0.3·corner + 0.2·max(0, aspect)`
    pub total: f32,
    /// Edge density sampled over the inner part of the rectangle
    pub interior_density: f32,
}

impl LocalScore {
    /// `total` discounted by interior clutter.
    ///
    /// A card face is quieter than its border. On saturated texture the
    /// inside is as busy as the perimeter and support falls to zero.
    pub fn support(&self) -> f32 {
        if self.interior_density <= 0.0 {
            return self.total;
        }
        if self.edge_ratio <= 0.0 {
            return 0.0;
        }
        let clutter = (self.interior_density / self.edge_ratio).min(1.0);
        self.total * (1.0 - clutter)
    }
}

/// A provisional rectangle proposed by one strategy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Candidate {
    pub geometry: RectGeometry,
    pub score: LocalScore,
    pub strategy: Strategy,
}

/// One card-shaped region reported to callers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectedCard {
    pub bounds: Bounds,
    pub confidence: f32,
    pub aspect_ratio: f32,
    pub angle: f32,
    pub corners: [Point; 4],
    pub edge_strength: f32,
    pub geometry_score: f32,
    pub background_type: BackgroundType,
    pub card_condition: CardCondition,
    pub strategy: Strategy,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DebugStep {
    pub step: String,
    pub candidates_found: usize,
    pub time_ms: f64,
}

/// Diagnostic trace of one detection run.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionDebugInfo {
    pub processing_time_ms: f64,
    pub steps: Vec<DebugStep>,
    /// Strategies that produced at least one reported card
    pub strategies: Vec<Strategy>,
    pub source_width: u32,
    pub source_height: u32,
    pub working_width: u32,
    pub working_height: u32,
    /// working size / source size (≤ 1)
    pub scale: f32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DetectionReport {
    pub cards: Vec<DetectedCard>,
    pub debug: DetectionDebugInfo,
}
