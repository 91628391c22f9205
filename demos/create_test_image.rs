use image::{Rgb, RgbImage};

// Writes a synthetic scan with three cards, one of them tilted, for trying
// out `cardscan detect`.
fn main() -> anyhow::Result<()> {
    let (width, height) = (1200u32, 900u32);
    let mut img = RgbImage::new(width, height);

    // Slightly uneven dark table top
    for y in 0..height {
        for x in 0..width {
            let shade = 50 + ((x / 7 + y / 5) % 9) as u8;
            img.put_pixel(x, y, Rgb([shade, shade, shade + 8]));
        }
    }

    // Two upright cards (0.714 ratio)
    for (x0, y0) in [(120u32, 220u32), (470, 220)] {
        for y in y0..y0 + 350 {
            for x in x0..x0 + 250 {
                img.put_pixel(x, y, Rgb([230, 222, 205]));
            }
        }
    }

    // One card rotated by 15 degrees around its centre
    let (cx, cy) = (950.0f32, 420.0f32);
    let (half_w, half_h) = (125.0f32, 175.0f32);
    let (sin, cos) = 15f32.to_radians().sin_cos();
    for y in 0..height {
        for x in 0..width {
            let (dx, dy) = (x as f32 - cx, y as f32 - cy);
            let u = dx * cos + dy * sin;
            let v = -dx * sin + dy * cos;
            if u.abs() <= half_w && v.abs() <= half_h {
                img.put_pixel(x, y, Rgb([214, 60, 52]));
            }
        }
    }

    img.save("test_cards.png")?;
    println!("Created test_cards.png ({}x{}, 3 cards)", width, height);
    Ok(())
}
