use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing_subscriber::EnvFilter;

use cardscan::{CardDetector, Engine, EngineConfig, EngineEvent, InputFile};

#[derive(Parser)]
#[command(name = "cardscan")]
#[command(about = "Find trading cards in scanned photos")]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON engine/detector config; missing keys keep their defaults
    #[arg(long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Print machine-readable JSON instead of text
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Detect cards in a single image
    Detect {
        /// Path to input image file
        #[arg(value_name = "IMAGE")]
        image_path: PathBuf,

        /// Save debug outputs to directory (must be empty)
        #[arg(long, value_name = "DIR")]
        debug_out: Option<PathBuf>,
    },
    /// Run many images through the batch engine
    Batch {
        #[arg(value_name = "IMAGES", required = true)]
        image_paths: Vec<PathBuf>,
    },
}

fn main() -> anyhow::Result<()> {
    let args = Cli::parse();

    let default_level = if args.verbose { "cardscan=debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)))
        .with_writer(std::io::stderr)
        .init();

    let config = match &args.config {
        Some(path) => EngineConfig::from_json_file(path)
            .with_context(|| format!("Failed to load config {}", path.display()))?,
        None => EngineConfig::default(),
    };

    match args.command {
        Command::Detect { image_path, debug_out } => detect(&image_path, debug_out, config, args.json),
        Command::Batch { image_paths } => batch(&image_paths, config, args.json),
    }
}

fn detect(image_path: &Path, debug_out: Option<PathBuf>, config: EngineConfig, json: bool) -> anyhow::Result<()> {
    let bytes = std::fs::read(image_path).with_context(|| format!("Failed to read {}", image_path.display()))?;

    let mut detector = CardDetector::new(config.detector)?;
    if let Some(debug_dir) = debug_out {
        detector = detector.with_debug(debug_dir)?;
    }

    let report = detector.detect_bytes(&bytes)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
        return Ok(());
    }

    let debug = &report.debug;
    println!("\n=== Card Detection Results ===");
    println!(
        "Image {}x{} (working {}x{}, scale {:.3})",
        debug.source_width, debug.source_height, debug.working_width, debug.working_height, debug.scale
    );
    println!("Total detections: {}", report.cards.len());

    if report.cards.is_empty() {
        println!("No cards detected.");
    } else {
        println!("\nDetected cards:");
        for (i, card) in report.cards.iter().enumerate() {
            println!(
                "  {} at ({}, {}) {}x{} angle {:.0}° - confidence: {:.2} [{}, {:?}, {:?}]",
                i + 1,
                card.bounds.x,
                card.bounds.y,
                card.bounds.width,
                card.bounds.height,
                card.angle,
                card.confidence,
                card.strategy.as_str(),
                card.background_type,
                card.card_condition,
            );
        }
    }

    println!("\nSteps:");
    for step in &debug.steps {
        println!("  {:<16} {:>5} candidates {:>9.2} ms", step.step, step.candidates_found, step.time_ms);
    }
    println!("Total: {:.2} ms", debug.processing_time_ms);

    Ok(())
}

fn batch(image_paths: &[PathBuf], config: EngineConfig, json: bool) -> anyhow::Result<()> {
    let files = image_paths
        .iter()
        .map(|path| {
            let bytes = std::fs::read(path).with_context(|| format!("Failed to read {}", path.display()))?;
            let name = path.display().to_string();
            Ok::<_, anyhow::Error>(InputFile::new(name, bytes))
        })
        .collect::<anyhow::Result<Vec<_>>>()?;

    // Generous wait per batch on top of the engine's own deadline
    let idle_limit = config.batch_timeout() + Duration::from_secs(10);
    let engine = Engine::start(config)?;
    engine.enqueue(files)?;
    engine.start_processing()?;

    loop {
        let event = engine
            .events()
            .recv_timeout(idle_limit)
            .context("Engine stopped responding")?;

        if json {
            println!("{}", serde_json::to_string(&event)?);
        } else {
            print_event(&event);
        }

        if event.is_terminal() {
            break;
        }
    }

    engine.shutdown();
    Ok(())
}

fn print_event(event: &EngineEvent) {
    match event {
        EngineEvent::BatchProgress {
            batch_id,
            current,
            total,
            file_name,
        } => println!("[{batch_id}] {current}/{total} {file_name}"),
        EngineEvent::BatchComplete { batch_id, results } => {
            println!("[{batch_id}] complete");
            for result in results {
                println!("    {}: {} card(s)", result.file_name, result.detected_cards.len());
                for card in &result.detected_cards {
                    println!(
                        "      ({}, {}) {}x{} - confidence: {:.2}",
                        card.bounds.x, card.bounds.y, card.bounds.width, card.bounds.height, card.confidence
                    );
                }
            }
        }
        EngineEvent::BatchError {
            batch_id,
            file_name,
            error,
        } => println!("[{batch_id}] {file_name} failed: {error}"),
        EngineEvent::BatchTimeout { batch_id } => println!("[{batch_id}] timed out"),
        EngineEvent::BatchFailed { batch_id, error } => println!("[{batch_id}] failed: {error}"),
        EngineEvent::ProcessingComplete { completed, failed } => {
            println!("\n=== Processing complete: {completed} completed, {failed} failed ===")
        }
        EngineEvent::ProcessingCancelled => println!("Processing cancelled"),
        EngineEvent::EngineFailed { error } => println!("Engine failed: {error}"),
    }
}
