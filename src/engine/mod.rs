//! Batch orchestration: queue, scheduler and a pool of isolated workers
//! behind a small handle.

pub mod batch;
pub mod protocol;
pub mod queue;
pub mod scheduler;
mod orchestrator;
mod worker;

pub use batch::{Batch, BatchStatus};
pub use protocol::{BatchId, EngineEvent, FileResult, InputFile, ItemId, WorkerRequest, WorkerResponse};
pub use queue::{ItemStatus, QueueCounts, QueueItem};
pub use worker::{FileProcessor, ProcessorFactory};

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread::JoinHandle;

use crate::config::EngineConfig;
use crate::detection::CardDetector;
use crate::error::EngineError;
use orchestrator::{Command, Inbox, Orchestrator};
use worker::WorkerPool;

/// Point-in-time copy of the orchestration state
#[derive(Debug, Clone)]
pub struct EngineSnapshot {
    pub items: Vec<QueueItem>,
    pub batches: Vec<Batch>,
    pub counts: QueueCounts,
    /// True from `start_processing` until the run's terminal event
    pub processing: bool,
}

/// Handle to a running engine.
///
/// Dropping the handle shuts the orchestrator and its workers down.
pub struct Engine {
    inbox: Sender<Inbox>,
    events: Receiver<EngineEvent>,
    orchestrator: Option<JoinHandle<()>>,
}

impl Engine {
    /// Start an engine whose workers run the standard card detector
    pub fn start(config: EngineConfig) -> Result<Self, EngineError> {
        let detector =
            CardDetector::new(config.detector.clone()).map_err(|e| EngineError::InvalidConfig(e.to_string()))?;
        let factory: ProcessorFactory = Arc::new(move || Box::new(detector.clone()) as Box<dyn FileProcessor>);
        Self::start_with(config, factory)
    }

    /// Start an engine whose workers each get a processor from `factory`
    pub fn start_with(config: EngineConfig, factory: ProcessorFactory) -> Result<Self, EngineError> {
        config
            .validate()
            .map_err(|e| EngineError::InvalidConfig(e.to_string()))?;

        let (inbox_tx, inbox_rx) = mpsc::channel();
        let (events_tx, events_rx) = mpsc::channel();

        let pool = WorkerPool::start(config.worker_count, factory, inbox_tx.clone()).map_err(|e| {
            tracing::error!("Worker pool failed to start: {e}");
            EngineError::WorkerInit(e)
        })?;

        let orchestrator = Orchestrator::new(config, pool, events_tx);
        let thread = std::thread::Builder::new()
            .name("cardscan-orchestrator".to_string())
            .spawn(move || orchestrator.run(inbox_rx))
            .map_err(EngineError::WorkerInit)?;

        Ok(Self {
            inbox: inbox_tx,
            events: events_rx,
            orchestrator: Some(thread),
        })
    }

    fn send(&self, command: Command) -> Result<(), EngineError> {
        self.inbox
            .send(Inbox::Command(command))
            .map_err(|_| EngineError::Disconnected)
    }

    /// Add files as pending items; returns their ids in order
    pub fn enqueue(&self, files: Vec<InputFile>) -> Result<Vec<ItemId>, EngineError> {
        let (reply, ids) = mpsc::channel();
        self.send(Command::Enqueue(files, reply))?;
        ids.recv().map_err(|_| EngineError::Disconnected)
    }

    /// Partition the pending items into batches and start dispatching.
    /// Does nothing while a run is active.
    pub fn start_processing(&self) -> Result<(), EngineError> {
        self.send(Command::StartProcessing)
    }

    /// Request cancellation. Completion is signalled by
    /// `EngineEvent::ProcessingCancelled`.
    pub fn cancel(&self) -> Result<(), EngineError> {
        self.send(Command::Cancel)
    }

    /// Empty the queue and batch list; fails while processing
    pub fn clear(&self) -> Result<(), EngineError> {
        let (reply, result) = mpsc::channel();
        self.send(Command::Clear(reply))?;
        result.recv().map_err(|_| EngineError::Disconnected)?
    }

    pub fn snapshot(&self) -> Result<EngineSnapshot, EngineError> {
        let (reply, snapshot) = mpsc::channel();
        self.send(Command::Snapshot(reply))?;
        snapshot.recv().map_err(|_| EngineError::Disconnected)
    }

    /// Progress, completion, error and cancellation events, in order
    pub fn events(&self) -> &Receiver<EngineEvent> {
        &self.events
    }

    pub fn shutdown(mut self) {
        self.stop();
    }

    fn stop(&mut self) {
        let _ = self.inbox.send(Inbox::Command(Command::Shutdown));
        if let Some(thread) = self.orchestrator.take() {
            if thread.join().is_err() {
                tracing::error!("orchestrator thread panicked");
            }
        }
    }
}

impl Drop for Engine {
    fn drop(&mut self) {
        self.stop();
    }
}
