//! Worker execution units: one thread per worker, each owning its own
//! processor, talking to the orchestrator only through channels.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::mpsc::{self, Receiver, Sender, TryRecvError};
use std::sync::Arc;
use std::thread::JoinHandle;

use uuid::Uuid;

use crate::engine::protocol::{BatchId, FileResult, InputFile, WorkerRequest, WorkerResponse};
use crate::engine::orchestrator::Inbox;
use crate::error::DetectionError;
use crate::models::DetectedCard;

/// Turns one file's bytes into detected cards.
pub trait FileProcessor: Send {
    fn process(&self, bytes: &[u8]) -> Result<Vec<DetectedCard>, DetectionError>;
}

/// Builds a fresh processor for each worker, including replacements
pub type ProcessorFactory = Arc<dyn Fn() -> Box<dyn FileProcessor> + Send + Sync>;

pub(crate) struct WorkerHandle {
    pub id: usize,
    sender: Sender<WorkerRequest>,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    pub fn send(&self, request: WorkerRequest) -> bool {
        self.sender.send(request).is_ok()
    }
}

/// Spawn one worker thread. Its responses arrive on `inbox` tagged with `id`.
pub(crate) fn spawn_worker(id: usize, processor: Box<dyn FileProcessor>, inbox: Sender<Inbox>) -> std::io::Result<WorkerHandle> {
    let (sender, requests) = mpsc::channel();
    let thread = std::thread::Builder::new()
        .name(format!("cardscan-worker-{id}"))
        .spawn(move || {
            let worker = Worker { id, processor, inbox };
            worker.run(requests);
        })?;

    Ok(WorkerHandle {
        id,
        sender,
        thread: Some(thread),
    })
}

struct Worker {
    id: usize,
    processor: Box<dyn FileProcessor>,
    inbox: Sender<Inbox>,
}

enum Flow {
    Continue,
    Stop,
}

impl Worker {
    fn run(self, requests: Receiver<WorkerRequest>) {
        let _exit = ExitNotice {
            worker: self.id,
            inbox: self.inbox.clone(),
        };
        tracing::debug!(worker = self.id, "worker started");

        while let Ok(request) = requests.recv() {
            let flow = match request {
                WorkerRequest::ProcessBatch { batch_id, session_id, files } => {
                    self.process_batch(batch_id, session_id, files, &requests)
                }
                WorkerRequest::CancelProcessing => {
                    // Nothing running; acknowledge so the orchestrator can go idle
                    self.respond(WorkerResponse::ProcessingCancelled { batch_id: None })
                }
                WorkerRequest::Shutdown => Flow::Stop,
            };
            if let Flow::Stop = flow {
                break;
            }
        }
        tracing::debug!(worker = self.id, "worker stopped");
    }

    fn process_batch(
        &self,
        batch_id: BatchId,
        session_id: Uuid,
        files: Vec<InputFile>,
        requests: &Receiver<WorkerRequest>,
    ) -> Flow {
        tracing::debug!(worker = self.id, batch = %batch_id, session = %session_id, files = files.len(), "batch received");
        let total = files.len();
        let mut results = Vec::with_capacity(total);

        for (idx, file) in files.into_iter().enumerate() {
            // Cancellation is checked between files; a file already running finishes
            match requests.try_recv() {
                Ok(WorkerRequest::CancelProcessing) => {
                    tracing::debug!(worker = self.id, batch = %batch_id, "batch cancelled");
                    return self.respond(WorkerResponse::ProcessingCancelled {
                        batch_id: Some(batch_id),
                    });
                }
                Ok(WorkerRequest::Shutdown) | Err(TryRecvError::Disconnected) => return Flow::Stop,
                Ok(WorkerRequest::ProcessBatch { batch_id: other, .. }) => {
                    tracing::warn!(worker = self.id, batch = %other, "worker busy, dropping batch");
                }
                Err(TryRecvError::Empty) => {}
            }

            let progress = WorkerResponse::BatchProgress {
                batch_id,
                current: idx + 1,
                total,
                file_name: file.name.clone(),
            };
            if let Flow::Stop = self.respond(progress) {
                return Flow::Stop;
            }

            match self.process_file(&file) {
                Ok(detected_cards) => results.push(FileResult {
                    file_name: file.name,
                    detected_cards,
                }),
                Err(error) => {
                    tracing::debug!(worker = self.id, file = %file.name, %error, "file failed");
                    let failed = WorkerResponse::BatchError {
                        batch_id,
                        file_name: file.name,
                        error,
                    };
                    if let Flow::Stop = self.respond(failed) {
                        return Flow::Stop;
                    }
                }
            }
        }

        self.respond(WorkerResponse::BatchComplete { batch_id, results })
    }

    /// Run the processor, turning both errors and panics into a message
    fn process_file(&self, file: &InputFile) -> Result<Vec<DetectedCard>, String> {
        match catch_unwind(AssertUnwindSafe(|| self.processor.process(&file.bytes))) {
            Ok(Ok(cards)) => Ok(cards),
            Ok(Err(e)) => Err(e.to_string()),
            Err(payload) => Err(format!("detector panicked: {}", panic_message(payload.as_ref()))),
        }
    }

    fn respond(&self, response: WorkerResponse) -> Flow {
        let message = Inbox::Worker {
            worker: self.id,
            response,
        };
        match self.inbox.send(message) {
            Ok(()) => Flow::Continue,
            Err(_) => Flow::Stop,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}

/// Tells the orchestrator the thread is gone, however it ended
struct ExitNotice {
    worker: usize,
    inbox: Sender<Inbox>,
}

impl Drop for ExitNotice {
    fn drop(&mut self) {
        let _ = self.inbox.send(Inbox::WorkerExited { worker: self.worker });
    }
}

/// How the pool starts a worker thread
pub(crate) type SpawnFn = fn(usize, Box<dyn FileProcessor>, Sender<Inbox>) -> std::io::Result<WorkerHandle>;

/// The live workers, plus what is needed to replace one.
pub(crate) struct WorkerPool {
    workers: Vec<WorkerHandle>,
    factory: ProcessorFactory,
    inbox: Sender<Inbox>,
    spawner: SpawnFn,
    next_id: usize,
    cursor: usize,
}

impl WorkerPool {
    pub fn start(count: usize, factory: ProcessorFactory, inbox: Sender<Inbox>) -> std::io::Result<Self> {
        let mut pool = Self {
            workers: Vec::with_capacity(count),
            factory,
            inbox,
            spawner: spawn_worker,
            next_id: 0,
            cursor: 0,
        };
        for _ in 0..count {
            pool.spawn()?;
        }
        tracing::info!(workers = count, "worker pool started");
        Ok(pool)
    }

    fn spawn(&mut self) -> std::io::Result<usize> {
        let id = self.next_id;
        self.next_id += 1;
        let handle = (self.spawner)(id, (self.factory)(), self.inbox.clone())?;
        self.workers.push(handle);
        Ok(id)
    }

    #[cfg(test)]
    pub(crate) fn set_spawner(&mut self, spawner: SpawnFn) {
        self.spawner = spawner;
    }

    pub fn contains(&self, worker: usize) -> bool {
        self.workers.iter().any(|w| w.id == worker)
    }

    /// Round-robin choice of the worker for the next batch
    pub fn next_worker(&mut self) -> Option<usize> {
        if self.workers.is_empty() {
            return None;
        }
        self.cursor = (self.cursor + 1) % self.workers.len();
        Some(self.workers[self.cursor].id)
    }

    pub fn send(&self, worker: usize, request: WorkerRequest) -> bool {
        self.workers
            .iter()
            .find(|w| w.id == worker)
            .is_some_and(|w| w.send(request))
    }

    /// Forget a worker without waiting for it; it exits when it next reads
    /// its queue
    pub fn retire(&mut self, worker: usize) {
        if let Some(pos) = self.workers.iter().position(|w| w.id == worker) {
            let handle = self.workers.remove(pos);
            handle.send(WorkerRequest::Shutdown);
            tracing::debug!(worker, "worker retired");
        }
    }

    /// Retire `worker` and start a fresh one in its place
    pub fn replace(&mut self, worker: usize) -> std::io::Result<usize> {
        self.retire(worker);
        let id = self.spawn()?;
        tracing::warn!(retired = worker, replacement = id, "worker replaced");
        Ok(id)
    }

    /// Ask every worker to stop and wait for them
    pub fn shutdown(&mut self) {
        for worker in &self.workers {
            worker.send(WorkerRequest::CancelProcessing);
            worker.send(WorkerRequest::Shutdown);
        }
        for mut worker in self.workers.drain(..) {
            if let Some(thread) = worker.thread.take() {
                if thread.join().is_err() {
                    tracing::warn!(worker = worker.id, "worker thread panicked");
                }
            }
        }
    }
}
