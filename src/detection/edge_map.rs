//! Binary edge map with a summed-area table for constant-time density queries.

use image::GrayImage;

#[derive(Debug, Clone)]
pub struct EdgeMap {
    pixels: GrayImage,
    /// `(width + 1) * (height + 1)` prefix sums of edge pixels
    integral: Vec<u32>,
}

impl EdgeMap {
    /// Wrap a binary image where any non-zero pixel is an edge.
    pub fn new(pixels: GrayImage) -> Self {
        let (w, h) = pixels.dimensions();
        let stride = w as usize + 1;
        let mut integral = vec![0u32; stride * (h as usize + 1)];
        for y in 0..h as usize {
            let mut row_sum = 0u32;
            for x in 0..w as usize {
                if pixels.get_pixel(x as u32, y as u32)[0] > 0 {
                    row_sum += 1;
                }
                integral[(y + 1) * stride + x + 1] = integral[y * stride + x + 1] + row_sum;
            }
        }
        Self { pixels, integral }
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn image(&self) -> &GrayImage {
        &self.pixels
    }

    /// Edge test at a pixel; anything outside the image is off.
    pub fn is_on(&self, x: i64, y: i64) -> bool {
        if x < 0 || y < 0 || x >= self.width() as i64 || y >= self.height() as i64 {
            return false;
        }
        self.pixels.get_pixel(x as u32, y as u32)[0] > 0
    }

    /// Number of edge pixels in the inclusive window `[x0, x1] x [y0, y1]`.
    pub fn count(&self, x0: u32, y0: u32, x1: u32, y1: u32) -> u32 {
        let stride = self.width() as usize + 1;
        let (x0, y0) = (x0 as usize, y0 as usize);
        let (x1, y1) = (x1 as usize + 1, y1 as usize + 1);
        self.integral[y1 * stride + x1] + self.integral[y0 * stride + x0]
            - self.integral[y0 * stride + x1]
            - self.integral[y1 * stride + x0]
    }

    /// Fraction of edge pixels in a square of `radius` around a point,
    /// clipped to the image.
    pub fn density(&self, x: f32, y: f32, radius: u32) -> f32 {
        if self.width() == 0 || self.height() == 0 {
            return 0.0;
        }
        let cx = x.round().clamp(0.0, (self.width() - 1) as f32) as u32;
        let cy = y.round().clamp(0.0, (self.height() - 1) as f32) as u32;
        let x0 = cx.saturating_sub(radius);
        let y0 = cy.saturating_sub(radius);
        let x1 = (cx + radius).min(self.width() - 1);
        let y1 = (cy + radius).min(self.height() - 1);
        let area = (x1 - x0 + 1) * (y1 - y0 + 1);
        self.count(x0, y0, x1, y1) as f32 / area as f32
    }

    /// Fraction of edge pixels over the whole map.
    pub fn coverage(&self) -> f32 {
        if self.width() == 0 || self.height() == 0 {
            return 0.0;
        }
        let total = self.width() as f32 * self.height() as f32;
        self.count(0, 0, self.width() - 1, self.height() - 1) as f32 / total
    }
}
