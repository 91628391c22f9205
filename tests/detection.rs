mod common;

use common::*;
use image::DynamicImage;

fn assert_invariants(cards: &[DetectedCard], config: &DetectorConfig) {
    for card in cards {
        assert!(
            (card.aspect_ratio - config.target_aspect_ratio).abs() <= config.aspect_tolerance + 1e-6,
            "aspect ratio {} outside tolerance",
            card.aspect_ratio
        );
        assert!((0.0..=1.0).contains(&card.confidence));
        assert!((0.0..=1.0).contains(&card.edge_strength));
        assert!((0.0..=1.0).contains(&card.geometry_score));
    }
    for (i, a) in cards.iter().enumerate() {
        for b in &cards[i + 1..] {
            assert!(a.bounds.iou(&b.bounds) <= config.overlap_threshold);
        }
    }
    assert!(cards.windows(2).all(|w| w[0].confidence >= w[1].confidence));
    assert!(cards.len() <= config.max_results);
}

#[test]
fn finds_card_on_noisy_background() -> anyhow::Result<()> {
    let (bytes, truth) = scenario_d_image();
    let detector = CardDetector::default();
    let report = detector.detect_bytes(&bytes)?;

    assert_eq!((report.debug.source_width, report.debug.source_height), (1000, 1400));
    assert_eq!(report.debug.working_height, 800);
    assert!(report.debug.scale < 1.0);

    let truth = truth.scaled(report.debug.scale);
    let best = report
        .cards
        .iter()
        .map(|c| c.bounds.iou(&truth))
        .fold(0.0f32, f32::max);
    assert!(best > 0.8, "best IoU {best} for {:?}", report.cards);

    assert_invariants(&report.cards, detector.config());
    Ok(())
}

#[test]
fn every_card_in_a_sheet_is_found() -> anyhow::Result<()> {
    let truths = [
        Bounds { x: 75, y: 195, width: 150, height: 210 },
        Bounds { x: 375, y: 195, width: 150, height: 210 },
        Bounds { x: 675, y: 195, width: 150, height: 210 },
    ];
    let image = card_scene(900, 600, &truths, 10, 7);
    let detector = CardDetector::default();
    let report = detector.detect_image(DynamicImage::ImageRgb8(image))?;

    for truth in truths {
        let truth = truth.scaled(report.debug.scale);
        assert!(
            report.cards.iter().any(|c| c.bounds.iou(&truth) > 0.6),
            "no detection for {truth:?} in {:?}",
            report.cards
        );
    }
    assert_invariants(&report.cards, detector.config());
    Ok(())
}

#[test]
fn detection_is_deterministic() -> anyhow::Result<()> {
    let bytes = small_card_png(3);
    let detector = CardDetector::default();
    let first = detector.detect_bytes(&bytes)?;
    let second = detector.detect_bytes(&bytes)?;

    assert_eq!(first.cards.len(), second.cards.len());
    for (a, b) in first.cards.iter().zip(&second.cards) {
        assert_eq!(a.bounds, b.bounds);
        assert_eq!(a.corners, b.corners);
        assert_eq!(a.strategy, b.strategy);
        assert!((a.confidence - b.confidence).abs() < 1e-6);
    }
    Ok(())
}

#[test]
fn tightened_config_is_honoured() -> anyhow::Result<()> {
    let config = DetectorConfig {
        max_results: 1,
        aspect_tolerance: 0.02,
        ..Default::default()
    };
    let detector = CardDetector::new(config.clone())?;
    let report = detector.detect_bytes(&small_card_png(5))?;
    assert!(report.cards.len() <= 1);
    assert_invariants(&report.cards, &config);
    Ok(())
}

#[test]
fn blank_image_has_no_cards() -> anyhow::Result<()> {
    let image = card_scene(300, 300, &[], 0, 0);
    let report = CardDetector::default().detect_image(DynamicImage::ImageRgb8(image))?;
    assert!(report.cards.is_empty());
    assert!(report.debug.strategies.is_empty());
    Ok(())
}

#[test]
fn finds_off_centre_card_through_heavy_noise() -> anyhow::Result<()> {
    let truth = Bounds { x: 100, y: 200, width: 387, height: 542 };
    let image = card_scene(1000, 1400, &[truth], 20, 11);
    let detector = CardDetector::default();
    let report = detector.detect_image(DynamicImage::ImageRgb8(image))?;

    let truth = truth.scaled(report.debug.scale);
    let best = report
        .cards
        .iter()
        .map(|c| c.bounds.iou(&truth))
        .fold(0.0f32, f32::max);
    assert!(best > 0.8, "best IoU {best} for {:?}", report.cards);
    assert_invariants(&report.cards, detector.config());
    Ok(())
}

#[test]
fn tilted_card_is_found_by_templates() -> anyhow::Result<()> {
    // Lines up with the 15° template at its natural size on a 400x400 image
    let shape = RectGeometry {
        center: Point::new(199.08, 186.05),
        width: 120.0,
        height: 168.0,
        angle: 15.0,
    };
    let image = tilted_card_scene(400, 400, &shape, 8, 21);
    let detector = CardDetector::default();
    let report = detector.detect_image(DynamicImage::ImageRgb8(image))?;

    let top = report.cards.first().expect("no cards found");
    assert_eq!(top.strategy, Strategy::TemplateMatch);
    assert_eq!(top.angle, 15.0);
    assert!((top.aspect_ratio - 120.0 / 168.0).abs() < 0.01);
    let truth = shape.bounds(400, 400);
    assert!(top.bounds.iou(&truth) > 0.8, "{:?} vs {truth:?}", top.bounds);
    assert!(report.debug.strategies.contains(&Strategy::TemplateMatch));
    assert_invariants(&report.cards, detector.config());
    Ok(())
}

#[test]
fn uniform_texture_has_no_cards() -> anyhow::Result<()> {
    let image = card_scene(800, 800, &[], 60, 5);
    let report = CardDetector::default().detect_image(DynamicImage::ImageRgb8(image))?;
    assert!(report.cards.is_empty(), "found {:?}", report.cards);
    Ok(())
}

#[test]
fn empty_and_corrupt_input_are_errors() {
    let detector = CardDetector::default();
    assert!(matches!(detector.detect_bytes(&[]), Err(DetectionError::EmptyInput)));
    let err = detector.detect_bytes(&corrupt_bytes()).unwrap_err();
    assert!(matches!(err, DetectionError::Decode(_)));
    assert!(!err.to_string().is_empty());
}

#[test]
fn debug_images_are_written_per_step() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    let debug_dir = dir.path().join("debug");
    let detector = CardDetector::default().with_debug(debug_dir.clone())?;
    detector.detect_bytes(&small_card_png(9))?;

    for name in ["00_input.png", "01_preprocess.png", "02_edge_detection.png", "05_scoring.png"] {
        assert!(debug_dir.join(name).exists(), "missing {name}");
    }
    // Search and refinement steps have nothing to draw
    assert!(!debug_dir.join("03_candidate_search.png").exists());
    Ok(())
}

#[test]
fn debug_dir_must_be_empty() -> anyhow::Result<()> {
    let dir = tempfile::TempDir::new()?;
    std::fs::write(dir.path().join("leftover.txt"), "x")?;
    let result = CardDetector::default().with_debug(dir.path().to_path_buf());
    assert!(matches!(result, Err(DetectionError::DebugOutput(_))));
    Ok(())
}

#[test]
fn report_serializes_camel_case() -> anyhow::Result<()> {
    let report = CardDetector::default().detect_bytes(&small_card_png(2))?;
    let json = serde_json::to_value(&report)?;
    assert!(json["debug"]["processingTimeMs"].is_number());
    if let Some(card) = json["cards"].get(0) {
        assert!(card["aspectRatio"].is_number());
        assert!(card["backgroundType"].is_string());
    }
    Ok(())
}
