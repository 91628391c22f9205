mod common;

use cardscan::engine::{BatchStatus, QueueCounts};
use cardscan::EngineError;
use common::*;
use std::collections::BTreeMap;
use std::time::{Duration, Instant};

fn conserved(counts: &QueueCounts) -> bool {
    counts.pending + counts.processing + counts.completed + counts.error == counts.total
}

fn config(workers: usize) -> EngineConfig {
    EngineConfig {
        worker_count: workers,
        ..Default::default()
    }
}

#[test]
fn ten_files_all_reach_a_terminal_state() -> anyhow::Result<()> {
    let engine = Engine::start(config(2))?;
    let files: Vec<InputFile> = (0..10)
        .map(|i| InputFile::new(format!("scan-{i}.png"), small_card_png(i)))
        .collect();
    let ids = engine.enqueue(files)?;
    assert_eq!(ids.len(), 10);
    engine.start_processing()?;

    let events = until_terminal(&engine);
    assert!(!events.contains(&EngineEvent::ProcessingCancelled));
    match events.last() {
        Some(EngineEvent::ProcessingComplete { completed, failed }) => assert_eq!(completed + failed, 10),
        other => panic!("unexpected final event {other:?}"),
    }

    let snapshot = engine.snapshot()?;
    assert!(!snapshot.processing);
    assert_eq!(snapshot.counts.completed, 10);
    assert_eq!(snapshot.counts.processing, 0);
    assert!(snapshot.items.iter().all(|i| i.result.is_some() && i.error.is_none()));
    // 10 pending → batches of 2
    assert_eq!(snapshot.batches.len(), 5);
    assert!(snapshot.batches.iter().all(|b| b.status == BatchStatus::Completed && b.progress == 100));
    Ok(())
}

#[test]
fn corrupt_file_ends_in_error() -> anyhow::Result<()> {
    let engine = Engine::start(config(1))?;
    let ids = engine.enqueue(vec![InputFile::new("broken.png", corrupt_bytes())])?;
    engine.start_processing()?;

    let events = until_terminal(&engine);
    let error_event = events.iter().find_map(|e| match e {
        EngineEvent::BatchError { file_name, error, .. } => Some((file_name.clone(), error.clone())),
        _ => None,
    });
    let (file_name, error) = error_event.expect("no BatchError event");
    assert_eq!(file_name, "broken.png");
    assert!(!error.is_empty());
    assert_eq!(events.last(), Some(&EngineEvent::ProcessingComplete { completed: 0, failed: 1 }));

    let snapshot = engine.snapshot()?;
    let item = snapshot.items.iter().find(|i| i.id == ids[0]).unwrap();
    assert_eq!(item.status, ItemStatus::Error);
    assert_eq!(item.error.as_deref(), Some(error.as_str()));
    assert!(item.result.is_none());

    // The engine keeps working afterwards
    engine.enqueue(vec![InputFile::new("good.png", small_card_png(4))])?;
    engine.start_processing()?;
    let events = until_terminal(&engine);
    assert_eq!(events.last(), Some(&EngineEvent::ProcessingComplete { completed: 1, failed: 1 }));
    Ok(())
}

#[test]
fn one_bad_file_does_not_abort_its_batch() -> anyhow::Result<()> {
    let engine = Engine::start_with(config(1), slow_factory(Duration::ZERO))?;
    let mut files = dummy_files(15);
    files[4] = InputFile::new("empty.png", Vec::new());
    engine.enqueue(files)?;
    engine.start_processing()?;

    let events = until_terminal(&engine);
    assert_eq!(events.last(), Some(&EngineEvent::ProcessingComplete { completed: 14, failed: 1 }));
    let complete = events.iter().find_map(|e| match e {
        EngineEvent::BatchComplete { results, .. } if results.len() == 2 => Some(results),
        _ => None,
    });
    let results = complete.expect("batch with the bad file should still complete");
    assert!(results.iter().all(|r| r.file_name != "empty.png"));
    Ok(())
}

#[test]
fn progress_follows_submission_order() -> anyhow::Result<()> {
    let engine = Engine::start_with(config(2), slow_factory(Duration::ZERO))?;
    engine.enqueue(dummy_files(15))?;
    engine.start_processing()?;
    let events = until_terminal(&engine);

    let mut progress: BTreeMap<String, Vec<(usize, String)>> = BTreeMap::new();
    let mut completed_batches = Vec::new();
    for event in &events {
        match event {
            EngineEvent::BatchProgress { batch_id, current, file_name, total } => {
                assert_eq!(*total, 3);
                progress
                    .entry(batch_id.to_string())
                    .or_default()
                    .push((*current, file_name.clone()));
            }
            EngineEvent::BatchComplete { batch_id, .. } => completed_batches.push(*batch_id),
            _ => {}
        }
    }

    // One batch in flight: completions are strictly sequential
    assert_eq!(completed_batches.len(), 5);
    assert!(completed_batches.windows(2).all(|w| w[0] < w[1]));

    let snapshot = engine.snapshot()?;
    for batch in &snapshot.batches {
        let seen = &progress[&batch.id.to_string()];
        let expected: Vec<(usize, String)> = batch.files.iter().cloned().enumerate().map(|(i, f)| (i + 1, f)).collect();
        assert_eq!(seen, &expected);
    }
    Ok(())
}

#[test]
fn cancel_mid_run_returns_items_to_pending() -> anyhow::Result<()> {
    let engine = Engine::start_with(config(2), slow_factory(Duration::from_millis(40)))?;
    engine.enqueue(dummy_files(20))?;
    engine.start_processing()?;

    // Let the first batch finish, then cancel while the second is running
    events_until(&engine, Duration::from_secs(30), |e| matches!(e, EngineEvent::BatchComplete { .. }));
    let completed_before = engine.snapshot()?.counts.completed;
    assert!(completed_before >= 3);
    engine.cancel()?;

    let events = events_until(&engine, Duration::from_secs(30), |e| *e == EngineEvent::ProcessingCancelled);
    assert!(!events.iter().any(|e| matches!(e, EngineEvent::ProcessingComplete { .. })));

    let snapshot = engine.snapshot()?;
    let counts = snapshot.counts;
    assert!(!snapshot.processing);
    assert_eq!(counts.processing, 0);
    assert_eq!(counts.error, 0);
    assert_eq!(counts.completed + counts.pending, 20);
    assert!(counts.completed >= completed_before);
    assert!(snapshot.batches.is_empty());
    assert!(snapshot
        .items
        .iter()
        .filter(|i| i.status == ItemStatus::Pending)
        .all(|i| i.batch_id.is_none() && i.result.is_none()));

    // Remaining items can be processed by a fresh run
    engine.start_processing()?;
    let events = until_terminal(&engine);
    assert_eq!(events.last(), Some(&EngineEvent::ProcessingComplete { completed: 20, failed: 0 }));
    Ok(())
}

#[test]
fn counts_are_conserved_throughout_a_run() -> anyhow::Result<()> {
    let engine = Engine::start_with(config(2), slow_factory(Duration::from_millis(5)))?;
    let mut files = dummy_files(12);
    files[7] = InputFile::new("bad.png", Vec::new());
    engine.enqueue(files)?;
    engine.start_processing()?;

    loop {
        let counts = engine.snapshot()?.counts;
        assert!(conserved(&counts));
        assert_eq!(counts.total, 12);
        match engine.events().recv_timeout(Duration::from_secs(30))? {
            event if event.is_terminal() => break,
            _ => {}
        }
    }
    let counts = engine.snapshot()?.counts;
    assert!(conserved(&counts));
    assert_eq!((counts.completed, counts.error, counts.processing), (11, 1, 0));
    Ok(())
}

#[test]
fn clear_is_rejected_while_processing() -> anyhow::Result<()> {
    let engine = Engine::start_with(config(1), slow_factory(Duration::from_millis(100)))?;
    engine.enqueue(dummy_files(3))?;
    engine.start_processing()?;
    assert!(matches!(engine.clear(), Err(EngineError::ProcessingActive)));

    until_terminal(&engine);
    engine.clear()?;
    let snapshot = engine.snapshot()?;
    assert_eq!(snapshot.counts.total, 0);
    assert!(snapshot.batches.is_empty());
    Ok(())
}

#[test]
fn start_while_running_is_a_no_op() -> anyhow::Result<()> {
    let engine = Engine::start_with(config(1), slow_factory(Duration::from_millis(20)))?;
    engine.enqueue(dummy_files(3))?;
    engine.start_processing()?;
    engine.start_processing()?;

    until_terminal(&engine);
    // No second run was started behind the first
    assert!(engine.events().recv_timeout(Duration::from_millis(200)).is_err());
    let snapshot = engine.snapshot()?;
    assert_eq!(snapshot.batches.len(), 3);
    assert_eq!(snapshot.counts.completed, 3);
    Ok(())
}

#[test]
fn items_enqueued_mid_run_wait_for_next_start() -> anyhow::Result<()> {
    let engine = Engine::start_with(config(1), slow_factory(Duration::from_millis(30)))?;
    engine.enqueue(dummy_files(2))?;
    engine.start_processing()?;
    engine.enqueue(vec![InputFile::new("late.png", vec![1u8])])?;

    let events = until_terminal(&engine);
    assert_eq!(events.last(), Some(&EngineEvent::ProcessingComplete { completed: 2, failed: 0 }));
    assert_eq!(engine.snapshot()?.counts.pending, 1);

    engine.start_processing()?;
    let events = until_terminal(&engine);
    assert_eq!(events.last(), Some(&EngineEvent::ProcessingComplete { completed: 3, failed: 0 }));
    // Only the second run's batch is listed
    let snapshot = engine.snapshot()?;
    assert_eq!(snapshot.batches.len(), 1);
    assert_eq!(snapshot.batches[0].files, vec!["late.png".to_string()]);
    Ok(())
}

#[test]
fn hung_batch_times_out() -> anyhow::Result<()> {
    let config = EngineConfig {
        worker_count: 1,
        batch_timeout_ms: 100,
        ..Default::default()
    };
    let engine = Engine::start_with(config, slow_factory(Duration::from_millis(1500)))?;
    engine.enqueue(dummy_files(1))?;
    let started = Instant::now();
    engine.start_processing()?;

    let events = until_terminal(&engine);
    assert!(started.elapsed() < Duration::from_millis(1200));
    assert!(events.iter().any(|e| matches!(e, EngineEvent::BatchTimeout { .. })));
    assert_eq!(events.last(), Some(&EngineEvent::ProcessingComplete { completed: 0, failed: 0 }));

    let snapshot = engine.snapshot()?;
    assert_eq!(snapshot.counts.pending, 1);
    assert_eq!(snapshot.batches[0].status, BatchStatus::TimedOut);
    Ok(())
}

#[test]
fn unresponsive_worker_still_yields_cancelled() -> anyhow::Result<()> {
    let config = EngineConfig {
        worker_count: 1,
        cancel_grace_ms: 100,
        ..Default::default()
    };
    let engine = Engine::start_with(config, slow_factory(Duration::from_millis(1500)))?;
    engine.enqueue(dummy_files(2))?;
    engine.start_processing()?;
    events_until(&engine, Duration::from_secs(5), |e| matches!(e, EngineEvent::BatchProgress { .. }));

    let started = Instant::now();
    engine.cancel()?;
    events_until(&engine, Duration::from_secs(5), |e| *e == EngineEvent::ProcessingCancelled);
    assert!(started.elapsed() < Duration::from_millis(1000));
    assert_eq!(engine.snapshot()?.counts.pending, 2);
    Ok(())
}

#[test]
fn cancel_while_idle_is_acknowledged() -> anyhow::Result<()> {
    let engine = Engine::start_with(config(1), slow_factory(Duration::ZERO))?;
    engine.cancel()?;
    let event = engine.events().recv_timeout(Duration::from_secs(5))?;
    assert_eq!(event, EngineEvent::ProcessingCancelled);
    Ok(())
}
