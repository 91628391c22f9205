//! Messages exchanged between the caller, the orchestrator and workers.
//!
//! Everything here is passed by value across channels; nothing is shared
//! mutably between threads.

use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use uuid::Uuid;

use crate::models::DetectedCard;

/// Unique per enqueue, even when the same file is enqueued twice.
pub type ItemId = Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(transparent)]
pub struct BatchId(pub u64);

impl fmt::Display for BatchId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "batch-{}", self.0)
    }
}

/// A named, immutable blob of image bytes.
#[derive(Debug, Clone)]
pub struct InputFile {
    pub name: String,
    pub bytes: Arc<[u8]>,
}

impl InputFile {
    pub fn new(name: impl Into<String>, bytes: impl Into<Arc<[u8]>>) -> Self {
        Self {
            name: name.into(),
            bytes: bytes.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileResult {
    pub file_name: String,
    pub detected_cards: Vec<DetectedCard>,
}

// ═══════════════════════════════════════════
// Worker boundary
// ═══════════════════════════════════════════

#[derive(Debug, Clone)]
pub enum WorkerRequest {
    ProcessBatch {
        batch_id: BatchId,
        session_id: Uuid,
        files: Vec<InputFile>,
    },
    CancelProcessing,
    Shutdown,
}

#[derive(Debug, Clone, PartialEq)]
pub enum WorkerResponse {
    /// Sent before each file, in submission order; `current` is 1-based
    BatchProgress {
        batch_id: BatchId,
        current: usize,
        total: usize,
        file_name: String,
    },
    /// Carries only the files that succeeded
    BatchComplete {
        batch_id: BatchId,
        results: Vec<FileResult>,
    },
    BatchError {
        batch_id: BatchId,
        file_name: String,
        error: String,
    },
    /// `None` when the worker was idle at the time of the request
    ProcessingCancelled { batch_id: Option<BatchId> },
}

impl WorkerResponse {
    pub fn batch_id(&self) -> Option<BatchId> {
        match self {
            WorkerResponse::BatchProgress { batch_id, .. }
            | WorkerResponse::BatchComplete { batch_id, .. }
            | WorkerResponse::BatchError { batch_id, .. } => Some(*batch_id),
            WorkerResponse::ProcessingCancelled { batch_id } => *batch_id,
        }
    }
}

// ═══════════════════════════════════════════
// Caller-facing events
// ═══════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE", rename_all_fields = "camelCase")]
pub enum EngineEvent {
    BatchProgress {
        batch_id: BatchId,
        current: usize,
        total: usize,
        file_name: String,
    },
    BatchComplete {
        batch_id: BatchId,
        results: Vec<FileResult>,
    },
    BatchError {
        batch_id: BatchId,
        file_name: String,
        error: String,
    },
    /// The batch missed its deadline; its unresolved items are pending again
    BatchTimeout { batch_id: BatchId },
    /// The worker running the batch died; its unresolved items are pending again
    BatchFailed { batch_id: BatchId, error: String },
    ProcessingComplete { completed: usize, failed: usize },
    ProcessingCancelled,
    /// The worker pool could not be restored; the run has stopped
    EngineFailed { error: String },
}

impl EngineEvent {
    /// True for the events that end a processing run
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            EngineEvent::ProcessingComplete { .. }
                | EngineEvent::ProcessingCancelled
                | EngineEvent::EngineFailed { .. }
        )
    }
}
