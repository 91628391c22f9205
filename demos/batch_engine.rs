use cardscan::{Engine, EngineConfig, EngineEvent, InputFile};
use std::time::{Duration, Instant};

// Runs every image given on the command line through the batch engine and
// cancels the run after `--cancel-after N` completed batches, if requested.
fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("cardscan=debug")),
        )
        .init();

    let mut args: Vec<String> = std::env::args().skip(1).collect();
    let cancel_after = match args.iter().position(|a| a == "--cancel-after") {
        Some(pos) => {
            let value = args
                .get(pos + 1)
                .ok_or_else(|| anyhow::anyhow!("--cancel-after needs a number"))?
                .parse::<usize>()?;
            args.drain(pos..pos + 2);
            Some(value)
        }
        None => None,
    };
    if args.is_empty() {
        anyhow::bail!("usage: batch_engine [--cancel-after N] IMAGE...");
    }

    let files = args
        .iter()
        .map(|path| Ok::<_, anyhow::Error>(InputFile::new(path.clone(), std::fs::read(path)?)))
        .collect::<anyhow::Result<Vec<_>>>()?;

    let engine = Engine::start(EngineConfig::default())?;
    engine.enqueue(files)?;

    println!("Processing {} files...\n", args.len());
    let start = Instant::now();
    engine.start_processing()?;

    let mut batches_done = 0;
    loop {
        let event = engine.events().recv_timeout(Duration::from_secs(300))?;
        match &event {
            EngineEvent::BatchProgress { batch_id, current, total, file_name } => {
                println!("  [{batch_id}] {current}/{total} {file_name}");
            }
            EngineEvent::BatchComplete { batch_id, results } => {
                batches_done += 1;
                let cards: usize = results.iter().map(|r| r.detected_cards.len()).sum();
                println!("✓ [{batch_id}] {} files, {} cards", results.len(), cards);
                if cancel_after == Some(batches_done) {
                    println!("\nCancelling...");
                    engine.cancel()?;
                }
            }
            other => println!("{other:?}"),
        }
        if event.is_terminal() {
            break;
        }
    }

    let counts = engine.snapshot()?.counts;
    println!("\nFinished in {:?}", start.elapsed());
    println!(
        "  completed {}, failed {}, pending {}, total {}",
        counts.completed, counts.error, counts.pending, counts.total
    );

    engine.shutdown();
    Ok(())
}
