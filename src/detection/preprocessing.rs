use image::imageops::{self, FilterType};
use image::{DynamicImage, GrayImage, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::filter::gaussian_blur_f32;
use imageproc::gradients::{horizontal_sobel, vertical_sobel};
use imageproc::morphology::dilate;

use crate::error::DetectionError;

/// Decode raw file bytes into an image
pub fn decode(bytes: &[u8]) -> Result<DynamicImage, DetectionError> {
    if bytes.is_empty() {
        return Err(DetectionError::EmptyInput);
    }
    Ok(image::load_from_memory(bytes)?)
}

/// Scale factor that fits the image inside `max_dim`; never above 1
pub fn working_scale(width: u32, height: u32, max_dim: u32) -> f32 {
    let sx = max_dim as f32 / width as f32;
    let sy = max_dim as f32 / height as f32;
    sx.min(sy).min(1.0)
}

/// Downscale to the working resolution, preserving aspect ratio
pub fn downscale(img: &DynamicImage, max_dim: u32) -> (RgbImage, f32) {
    let rgb = img.to_rgb8();
    let scale = working_scale(rgb.width(), rgb.height(), max_dim);
    if scale >= 1.0 {
        return (rgb, 1.0);
    }
    let width = ((rgb.width() as f32 * scale).round() as u32).max(1);
    let height = ((rgb.height() as f32 * scale).round() as u32).max(1);
    (imageops::resize(&rgb, width, height, FilterType::Triangle), scale)
}

/// Apply a small Gaussian blur to suppress sensor noise
pub fn apply_blur(img: &RgbImage, sigma: f32) -> RgbImage {
    gaussian_blur_f32(img, sigma)
}

/// Luminance-weighted grayscale (0.299 R + 0.587 G + 0.114 B)
pub fn to_grayscale(img: &RgbImage) -> GrayImage {
    GrayImage::from_fn(img.width(), img.height(), |x, y| {
        let [r, g, b] = img.get_pixel(x, y).0;
        let luma = 0.299 * r as f32 + 0.587 * g as f32 + 0.114 * b as f32;
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}

/// Sobel gradient magnitude `sqrt(gx² + gy²)`, clamped to [0, 255]
pub fn gradient_magnitude(gray: &GrayImage) -> GrayImage {
    let gx = horizontal_sobel(gray);
    let gy = vertical_sobel(gray);
    GrayImage::from_fn(gray.width(), gray.height(), |x, y| {
        let dx = gx.get_pixel(x, y)[0] as f32;
        let dy = gy.get_pixel(x, y)[0] as f32;
        Luma([(dx * dx + dy * dy).sqrt().min(255.0) as u8])
    })
}

/// Binary edge map: 255 where magnitude exceeds `cutoff`, else 0
pub fn binarize(magnitude: &GrayImage, cutoff: u8) -> GrayImage {
    GrayImage::from_fn(magnitude.width(), magnitude.height(), |x, y| {
        if magnitude.get_pixel(x, y)[0] > cutoff {
            Luma([255u8])
        } else {
            Luma([0u8])
        }
    })
}

/// One dilation pass with a 3x3 square to bridge small gaps
pub fn close_gaps(edges: &GrayImage) -> GrayImage {
    dilate(edges, Norm::LInf, 1)
}

/// Full edge stage: grayscale → Sobel → threshold → dilation
pub fn detect_edges(gray: &GrayImage, cutoff: u8) -> GrayImage {
    close_gaps(&binarize(&gradient_magnitude(gray), cutoff))
}
