//! The orchestrator actor.
//!
//! Owns the queue, the batch list and the worker pool. Commands from the
//! `Engine` handle and responses from workers arrive on one inbox, so all
//! orchestration state has a single writer and needs no locks. At most one
//! batch is in flight; the loop blocks on the inbox with that batch's
//! deadline instead of polling.

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::time::Instant;

use uuid::Uuid;

use crate::config::EngineConfig;
use crate::engine::batch::BatchStatus;
use crate::engine::protocol::{BatchId, EngineEvent, InputFile, ItemId, WorkerRequest, WorkerResponse};
use crate::engine::queue::QueueManager;
use crate::engine::scheduler::BatchScheduler;
use crate::engine::worker::WorkerPool;
use crate::engine::EngineSnapshot;
use crate::error::EngineError;

pub(crate) enum Command {
    Enqueue(Vec<InputFile>, Sender<Vec<ItemId>>),
    StartProcessing,
    Cancel,
    Clear(Sender<Result<(), EngineError>>),
    Snapshot(Sender<EngineSnapshot>),
    Shutdown,
}

pub(crate) enum Inbox {
    Command(Command),
    Worker { worker: usize, response: WorkerResponse },
    WorkerExited { worker: usize },
}

#[derive(Debug, Clone, Copy)]
enum RunState {
    Idle,
    Running { session_id: Uuid },
    /// Waiting for the worker that had the in-flight batch to acknowledge
    Cancelling { worker: usize, deadline: Instant },
}

pub(crate) struct Orchestrator {
    config: EngineConfig,
    queue: QueueManager,
    scheduler: BatchScheduler,
    pool: WorkerPool,
    events: Sender<EngineEvent>,
    state: RunState,
}

impl Orchestrator {
    pub(crate) fn new(config: EngineConfig, pool: WorkerPool, events: Sender<EngineEvent>) -> Self {
        Self {
            scheduler: BatchScheduler::new(config.max_batch_size, config.batch_size_divisor),
            queue: QueueManager::new(),
            config,
            pool,
            events,
            state: RunState::Idle,
        }
    }

    pub(crate) fn run(mut self, inbox: Receiver<Inbox>) {
        loop {
            let message = match self.deadline() {
                Some(deadline) => {
                    let wait = deadline.saturating_duration_since(Instant::now());
                    match inbox.recv_timeout(wait) {
                        Ok(message) => message,
                        Err(RecvTimeoutError::Timeout) => {
                            self.on_deadline();
                            continue;
                        }
                        Err(RecvTimeoutError::Disconnected) => break,
                    }
                }
                None => match inbox.recv() {
                    Ok(message) => message,
                    Err(_) => break,
                },
            };

            match message {
                Inbox::Command(Command::Shutdown) => break,
                Inbox::Command(command) => self.handle_command(command),
                Inbox::Worker { worker, response } => self.handle_response(worker, response),
                Inbox::WorkerExited { worker } => self.handle_worker_exit(worker),
            }
        }

        tracing::info!("engine shutting down");
        self.pool.shutdown();
    }

    fn deadline(&self) -> Option<Instant> {
        match self.state {
            RunState::Idle => None,
            RunState::Running { .. } => self.scheduler.in_flight().map(|f| f.deadline),
            RunState::Cancelling { deadline, .. } => Some(deadline),
        }
    }

    fn is_processing(&self) -> bool {
        !matches!(self.state, RunState::Idle)
    }

    fn emit(&self, event: EngineEvent) {
        // Nobody listening is not an error
        let _ = self.events.send(event);
    }

    // ═══════════════════════════════════════════
    // Commands
    // ═══════════════════════════════════════════

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enqueue(files, reply) => {
                let ids = self.queue.enqueue(files);
                tracing::debug!(count = ids.len(), "files enqueued");
                let _ = reply.send(ids);
            }
            Command::StartProcessing => self.start_processing(),
            Command::Cancel => self.cancel(),
            Command::Clear(reply) => {
                let result = if self.is_processing() {
                    Err(EngineError::ProcessingActive)
                } else {
                    self.queue.clear();
                    self.scheduler.clear();
                    tracing::debug!("queue cleared");
                    Ok(())
                };
                let _ = reply.send(result);
            }
            Command::Snapshot(reply) => {
                let _ = reply.send(self.snapshot());
            }
            Command::Shutdown => {}
        }
    }

    fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            items: self.queue.items().to_vec(),
            batches: self.scheduler.batches().to_vec(),
            counts: self.queue.counts(),
            processing: self.is_processing(),
        }
    }

    fn start_processing(&mut self) {
        if self.is_processing() {
            tracing::debug!("processing already active");
            return;
        }
        let planned = self.scheduler.plan(self.queue.pending());
        let session_id = Uuid::new_v4();
        tracing::info!(session = %session_id, batches = planned, "processing started");
        self.state = RunState::Running { session_id };
        self.dispatch_next();
    }

    fn cancel(&mut self) {
        match self.state {
            RunState::Idle => {
                tracing::debug!("cancel while idle");
                self.emit(EngineEvent::ProcessingCancelled);
            }
            RunState::Cancelling { .. } => tracing::debug!("cancellation already in progress"),
            RunState::Running { .. } => {
                let released = self.queue.reset();
                let in_flight = self.scheduler.cancel_all();
                self.scheduler.clear();
                tracing::info!(released, "processing cancelled");

                match in_flight {
                    Some(f) if self.pool.send(f.worker, WorkerRequest::CancelProcessing) => {
                        self.state = RunState::Cancelling {
                            worker: f.worker,
                            deadline: Instant::now() + self.config.cancel_grace(),
                        };
                    }
                    _ => {
                        self.state = RunState::Idle;
                        self.emit(EngineEvent::ProcessingCancelled);
                    }
                }
            }
        }
    }

    // ═══════════════════════════════════════════
    // Dispatch
    // ═══════════════════════════════════════════

    /// Send the next pending batch to a worker, or finish the run
    fn dispatch_next(&mut self) {
        let RunState::Running { session_id } = self.state else {
            return;
        };

        while let Some(batch) = self.scheduler.next_pending() {
            let batch_id = batch.id;
            let item_ids = batch.item_ids.clone();
            let files = self.queue.claim(batch_id, &item_ids);
            if files.is_empty() {
                self.scheduler.finish(batch_id, BatchStatus::Completed);
                continue;
            }

            let Some(worker) = self.pool.next_worker() else {
                self.queue.release(batch_id);
                self.fail_engine("no workers available".to_string());
                return;
            };

            let deadline = Instant::now() + self.config.batch_timeout();
            self.scheduler.dispatched(batch_id, worker, deadline);
            let request = WorkerRequest::ProcessBatch {
                batch_id,
                session_id,
                files,
            };
            if self.pool.send(worker, request) {
                tracing::debug!(batch = %batch_id, worker, files = item_ids.len(), "batch dispatched");
                return;
            }

            // The worker hung up before taking the batch
            self.batch_failed(batch_id, format!("worker {worker} is unavailable"));
            if !self.replace_worker(worker) {
                return;
            }
        }

        self.finish_run();
    }

    fn finish_run(&mut self) {
        let counts = self.queue.counts();
        tracing::info!(completed = counts.completed, failed = counts.error, pending = counts.pending, "processing complete");
        self.state = RunState::Idle;
        self.emit(EngineEvent::ProcessingComplete {
            completed: counts.completed,
            failed: counts.error,
        });
    }

    // ═══════════════════════════════════════════
    // Worker messages
    // ═══════════════════════════════════════════

    fn handle_response(&mut self, worker: usize, response: WorkerResponse) {
        if let RunState::Cancelling { worker: cancelling, .. } = self.state {
            if cancelling == worker && matches!(response, WorkerResponse::ProcessingCancelled { .. }) {
                tracing::debug!(worker, "cancellation acknowledged");
                self.state = RunState::Idle;
                self.emit(EngineEvent::ProcessingCancelled);
            } else {
                tracing::debug!(worker, "ignoring worker message while cancelling");
            }
            return;
        }

        let Some(batch_id) = response
            .batch_id()
            .filter(|id| self.scheduler.is_active(*id, worker))
        else {
            tracing::debug!(worker, batch = ?response.batch_id(), "ignoring stale worker message");
            return;
        };

        match response {
            WorkerResponse::BatchProgress {
                current,
                total,
                file_name,
                ..
            } => {
                self.scheduler.record_progress(batch_id, current, total, file_name.clone());
                self.emit(EngineEvent::BatchProgress {
                    batch_id,
                    current,
                    total,
                    file_name,
                });
            }
            WorkerResponse::BatchError { file_name, error, .. } => {
                if !self.queue.fail(batch_id, &file_name, &error) {
                    tracing::warn!(batch = %batch_id, file = %file_name, "error for unknown file");
                }
                self.emit(EngineEvent::BatchError {
                    batch_id,
                    file_name,
                    error,
                });
            }
            WorkerResponse::BatchComplete { results, .. } => {
                let (completed, missing) = self.queue.resolve(batch_id, results.clone());
                self.scheduler.finish(batch_id, BatchStatus::Completed);
                tracing::debug!(batch = %batch_id, completed, missing, "batch complete");
                self.emit(EngineEvent::BatchComplete { batch_id, results });
                self.dispatch_next();
            }
            WorkerResponse::ProcessingCancelled { .. } => {
                self.batch_failed(batch_id, "worker cancelled the batch unprompted".to_string());
                self.dispatch_next();
            }
        }
    }

    fn on_deadline(&mut self) {
        match self.state {
            RunState::Idle => {}
            RunState::Running { .. } => {
                let Some(f) = self.scheduler.in_flight() else {
                    return;
                };
                if Instant::now() < f.deadline {
                    return;
                }
                let released = self.queue.release(f.batch_id);
                self.scheduler.finish(f.batch_id, BatchStatus::TimedOut);
                tracing::warn!(batch = %f.batch_id, worker = f.worker, released, "batch timed out");
                self.emit(EngineEvent::BatchTimeout { batch_id: f.batch_id });
                if self.replace_worker(f.worker) {
                    self.dispatch_next();
                }
            }
            RunState::Cancelling { worker, .. } => {
                tracing::warn!(worker, "worker did not acknowledge cancellation");
                self.state = RunState::Idle;
                self.emit(EngineEvent::ProcessingCancelled);
                self.replace_worker(worker);
            }
        }
    }

    fn handle_worker_exit(&mut self, worker: usize) {
        if !self.pool.contains(worker) {
            tracing::debug!(worker, "retired worker exited");
            return;
        }
        tracing::warn!(worker, "worker exited unexpectedly");

        match self.state {
            RunState::Running { .. } => {
                let lost = self.scheduler.in_flight().filter(|f| f.worker == worker);
                if let Some(f) = lost {
                    self.batch_failed(f.batch_id, "worker exited unexpectedly".to_string());
                }
                if self.replace_worker(worker) && lost.is_some() {
                    self.dispatch_next();
                }
            }
            RunState::Cancelling { worker: cancelling, .. } if cancelling == worker => {
                self.state = RunState::Idle;
                self.emit(EngineEvent::ProcessingCancelled);
                self.replace_worker(worker);
            }
            _ => {
                self.replace_worker(worker);
            }
        }
    }

    // ═══════════════════════════════════════════
    // Failures
    // ═══════════════════════════════════════════

    /// The batch's unresolved items go back to pending
    fn batch_failed(&mut self, batch_id: BatchId, error: String) {
        let released = self.queue.release(batch_id);
        self.scheduler.finish(batch_id, BatchStatus::Error);
        tracing::warn!(batch = %batch_id, released, %error, "batch failed");
        self.emit(EngineEvent::BatchFailed { batch_id, error });
    }

    /// Returns false when the pool could not be restored
    fn replace_worker(&mut self, worker: usize) -> bool {
        match self.pool.replace(worker) {
            Ok(_) => true,
            Err(e) => {
                self.fail_engine(format!("failed to replace worker {worker}: {e}"));
                false
            }
        }
    }

    fn fail_engine(&mut self, error: String) {
        tracing::error!(%error, "engine failed");
        self.queue.reset();
        self.scheduler.cancel_all();
        self.state = RunState::Idle;
        self.emit(EngineEvent::EngineFailed { error });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::worker::{FileProcessor, ProcessorFactory};
    use crate::error::DetectionError;
    use crate::models::DetectedCard;
    use std::sync::mpsc::{self, Receiver};
    use std::sync::Arc;

    struct NoCards;

    impl FileProcessor for NoCards {
        fn process(&self, _bytes: &[u8]) -> Result<Vec<DetectedCard>, DetectionError> {
            Ok(Vec::new())
        }
    }

    /// Orchestrator driven by hand; the inbox receiver is kept alive so
    /// workers can still report, but nothing reads it.
    struct Harness {
        orchestrator: Orchestrator,
        events: Receiver<EngineEvent>,
        _inbox: Receiver<Inbox>,
    }

    impl Harness {
        fn new(workers: usize) -> Self {
            let (inbox_tx, inbox) = mpsc::channel();
            let (events_tx, events) = mpsc::channel();
            let factory: ProcessorFactory = Arc::new(|| Box::new(NoCards) as Box<dyn FileProcessor>);
            let pool = WorkerPool::start(workers, factory, inbox_tx).unwrap();
            let mut orchestrator = Orchestrator::new(EngineConfig::default(), pool, events_tx);
            orchestrator.queue.enqueue(vec![InputFile::new("a.png", vec![1u8])]);
            Self {
                orchestrator,
                events,
                _inbox: inbox,
            }
        }

        fn start(&mut self) -> (BatchId, usize) {
            self.orchestrator.start_processing();
            let f = self.orchestrator.scheduler.in_flight().unwrap();
            (f.batch_id, f.worker)
        }

        fn drain(&self) -> Vec<EngineEvent> {
            self.events.try_iter().collect()
        }
    }

    impl Drop for Harness {
        fn drop(&mut self) {
            self.orchestrator.pool.shutdown();
        }
    }

    #[test]
    fn lost_worker_fails_its_batch_and_is_replaced() {
        let mut h = Harness::new(2);
        let (batch_id, worker) = h.start();

        h.orchestrator.handle_worker_exit(worker);

        let events = h.drain();
        assert!(matches!(&events[..], [
            EngineEvent::BatchFailed { batch_id: failed, .. },
            EngineEvent::ProcessingComplete { completed: 0, failed: 0 },
        ] if *failed == batch_id));
        assert_eq!(h.orchestrator.queue.counts().pending, 1);
        assert!(!h.orchestrator.pool.contains(worker));
        assert!(h.orchestrator.pool.contains(2));
        assert!(!h.orchestrator.is_processing());
    }

    #[test]
    fn failed_replacement_stops_the_engine() {
        let mut h = Harness::new(1);
        let (_, worker) = h.start();
        h.orchestrator
            .pool
            .set_spawner(|_, _, _| Err(std::io::Error::other("no threads left")));

        h.orchestrator.handle_worker_exit(worker);

        let events = h.drain();
        assert!(matches!(&events[..], [EngineEvent::BatchFailed { .. }, EngineEvent::EngineFailed { .. }]));
        assert!(!h.orchestrator.is_processing());
        assert_eq!(h.orchestrator.queue.counts().pending, 1);
        assert_eq!(h.orchestrator.pool.next_worker(), None);
    }

    #[test]
    fn unprompted_cancel_fails_the_batch() {
        let mut h = Harness::new(1);
        let (batch_id, worker) = h.start();

        h.orchestrator.handle_response(
            worker,
            WorkerResponse::ProcessingCancelled {
                batch_id: Some(batch_id),
            },
        );

        let events = h.drain();
        assert!(matches!(&events[..], [
            EngineEvent::BatchFailed { .. },
            EngineEvent::ProcessingComplete { completed: 0, failed: 0 },
        ]));
        assert_eq!(h.orchestrator.queue.counts().pending, 1);
        assert!(h.orchestrator.pool.contains(worker));
    }

    #[test]
    fn messages_for_other_batches_are_ignored() {
        let mut h = Harness::new(1);
        let (batch_id, worker) = h.start();

        h.orchestrator.handle_response(
            worker,
            WorkerResponse::BatchComplete {
                batch_id: BatchId(99),
                results: Vec::new(),
            },
        );
        h.orchestrator.handle_response(
            worker + 1,
            WorkerResponse::BatchComplete {
                batch_id,
                results: Vec::new(),
            },
        );

        assert!(h.drain().is_empty());
        assert!(h.orchestrator.is_processing());
        assert!(h.orchestrator.scheduler.is_active(batch_id, worker));
        assert_eq!(h.orchestrator.queue.counts().processing, 1);
    }

    #[test]
    fn empty_pool_cannot_start_a_run() {
        let mut h = Harness::new(0);
        h.orchestrator.start_processing();

        let events = h.drain();
        assert!(matches!(&events[..], [EngineEvent::EngineFailed { error }] if error.contains("no workers")));
        assert_eq!(h.orchestrator.queue.counts().pending, 1);
        assert!(h.orchestrator.scheduler.in_flight().is_none());
    }
}
