#![allow(dead_code)]

use cardscan::engine::ProcessorFactory;
use cardscan::models::{Point, RectGeometry};
use cardscan::{Bounds, DetectedCard, DetectionError, Engine, EngineEvent, FileProcessor, InputFile};
use image::{ImageFormat, Rgb, RgbImage};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::io::Cursor;
use std::sync::Arc;
use std::time::{Duration, Instant};

pub const CARD_COLOR: Rgb<u8> = Rgb([228, 220, 205]);
pub const BACKGROUND_LUMA: i16 = 60;

/// Dark background with seeded ±`noise` grain and solid card rectangles.
pub fn card_scene(width: u32, height: u32, cards: &[Bounds], noise: i16, seed: u64) -> RgbImage {
    scene(width, height, noise, seed, |x, y| {
        cards
            .iter()
            .any(|c| x >= c.x && x < c.x + c.width && y >= c.y && y < c.y + c.height)
    })
}

/// Like [`card_scene`], with one card drawn as a rotated rectangle
pub fn tilted_card_scene(width: u32, height: u32, card: &RectGeometry, noise: i16, seed: u64) -> RgbImage {
    let corners = card.corners();
    scene(width, height, noise, seed, |x, y| {
        let p = Point::new(x as f32, y as f32);
        // Corners run clockwise with y pointing down
        (0..4).all(|i| {
            let (a, b) = (corners[i], corners[(i + 1) % 4]);
            (b.x - a.x) * (p.y - a.y) - (b.y - a.y) * (p.x - a.x) >= 0.0
        })
    })
}

fn scene(width: u32, height: u32, noise: i16, seed: u64, on_card: impl Fn(u32, u32) -> bool) -> RgbImage {
    let mut rng = StdRng::seed_from_u64(seed);
    RgbImage::from_fn(width, height, |x, y| {
        let grain: i16 = if noise > 0 { rng.gen_range(-noise..=noise) } else { 0 };
        if on_card(x, y) {
            CARD_COLOR
        } else {
            let v = (BACKGROUND_LUMA + grain).clamp(0, 255) as u8;
            Rgb([v, v, v])
        }
    })
}

pub fn png_bytes(image: &RgbImage) -> Vec<u8> {
    let mut buffer = Cursor::new(Vec::new());
    image
        .write_to(&mut buffer, ImageFormat::Png)
        .expect("Failed to encode test image");
    buffer.into_inner()
}

/// 1000x1400 photo with one 0.714-ratio card covering ~15% of the area.
/// Returns the encoded PNG and the card's bounds in source pixels.
pub fn scenario_d_image() -> (Vec<u8>, Bounds) {
    let card = Bounds {
        x: 306,
        y: 429,
        width: 387,
        height: 542,
    };
    let image = card_scene(1000, 1400, &[card], 12, 42);
    (png_bytes(&image), card)
}

/// Small single-card image, cheap enough for engine runs
pub fn small_card_png(seed: u64) -> Vec<u8> {
    let card = Bounds {
        x: 52,
        y: 60,
        width: 57,
        height: 80,
    };
    png_bytes(&card_scene(160, 200, &[card], 8, seed))
}

pub fn corrupt_bytes() -> Vec<u8> {
    let mut bytes = small_card_png(1);
    bytes.truncate(40);
    bytes
}

/// Named files with placeholder bytes, for engines with injected processors
pub fn dummy_files(count: usize) -> Vec<InputFile> {
    (0..count)
        .map(|i| InputFile::new(format!("card-{i:02}.png"), vec![1u8]))
        .collect()
}

/// Sleeps, then succeeds; files with empty bytes fail
pub struct SlowProcessor {
    pub delay: Duration,
}

impl FileProcessor for SlowProcessor {
    fn process(&self, bytes: &[u8]) -> Result<Vec<DetectedCard>, DetectionError> {
        std::thread::sleep(self.delay);
        if bytes.is_empty() {
            return Err(DetectionError::EmptyInput);
        }
        Ok(Vec::new())
    }
}

pub fn slow_factory(delay: Duration) -> ProcessorFactory {
    Arc::new(move || Box::new(SlowProcessor { delay }) as Box<dyn FileProcessor>)
}

/// Collect events until `stop` matches one (inclusive). Panics on timeout.
pub fn events_until(engine: &Engine, timeout: Duration, stop: impl Fn(&EngineEvent) -> bool) -> Vec<EngineEvent> {
    let deadline = Instant::now() + timeout;
    let mut events = Vec::new();
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        let event = match engine.events().recv_timeout(remaining) {
            Ok(event) => event,
            Err(_) => panic!("timed out waiting for event; saw {events:?}"),
        };
        let done = stop(&event);
        events.push(event);
        if done {
            return events;
        }
    }
}

pub fn until_terminal(engine: &Engine) -> Vec<EngineEvent> {
    events_until(engine, Duration::from_secs(60), EngineEvent::is_terminal)
}
