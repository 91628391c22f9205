//! Per-file lifecycle tracking.
//!
//! `pending → processing → completed | error`, with `processing → pending`
//! only when a batch is cancelled, times out or loses its worker. Only the
//! orchestrator thread touches a `QueueManager`.

use serde::Serialize;
use uuid::Uuid;

use crate::engine::protocol::{BatchId, FileResult, InputFile, ItemId};
use crate::models::DetectedCard;

pub const MISSING_RESULT_ERROR: &str = "missing from batch results";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum ItemStatus {
    Pending,
    Processing,
    Completed,
    Error,
}

#[derive(Debug, Clone)]
pub struct QueueItem {
    pub id: ItemId,
    pub file: InputFile,
    pub status: ItemStatus,
    /// Present iff `Completed`
    pub result: Option<Vec<DetectedCard>>,
    /// Present iff `Error`
    pub error: Option<String>,
    /// Set while the item is claimed by a batch
    pub batch_id: Option<BatchId>,
}

impl QueueItem {
    fn claimed_by(&self, batch_id: BatchId) -> bool {
        self.status == ItemStatus::Processing && self.batch_id == Some(batch_id)
    }

    fn back_to_pending(&mut self) {
        self.status = ItemStatus::Pending;
        self.batch_id = None;
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueCounts {
    pub pending: usize,
    pub processing: usize,
    pub completed: usize,
    pub error: usize,
    pub total: usize,
}

#[derive(Debug, Default)]
pub struct QueueManager {
    items: Vec<QueueItem>,
}

impl QueueManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn enqueue(&mut self, files: Vec<InputFile>) -> Vec<ItemId> {
        files
            .into_iter()
            .map(|file| {
                let id = Uuid::new_v4();
                self.items.push(QueueItem {
                    id,
                    file,
                    status: ItemStatus::Pending,
                    result: None,
                    error: None,
                    batch_id: None,
                });
                id
            })
            .collect()
    }

    /// Pending items in enqueue order
    pub fn pending(&self) -> Vec<(ItemId, String)> {
        self.items
            .iter()
            .filter(|item| item.status == ItemStatus::Pending)
            .map(|item| (item.id, item.file.name.clone()))
            .collect()
    }

    /// Move the listed pending items to `processing` under `batch_id`.
    /// Returns the claimed files in the order given.
    pub fn claim(&mut self, batch_id: BatchId, ids: &[ItemId]) -> Vec<InputFile> {
        let mut files = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(item) = self
                .items
                .iter_mut()
                .find(|item| item.id == *id && item.status == ItemStatus::Pending)
            {
                item.status = ItemStatus::Processing;
                item.batch_id = Some(batch_id);
                files.push(item.file.clone());
            }
        }
        files
    }

    /// Attach results by file name to the batch's processing items.
    ///
    /// Completion order inside a batch is not guaranteed, so matching is by
    /// name. Items the batch claimed but neither resolved nor failed are
    /// marked as errors. Returns `(completed, missing)`.
    pub fn resolve(&mut self, batch_id: BatchId, results: Vec<FileResult>) -> (usize, usize) {
        let mut completed = 0;
        for result in results {
            match self
                .items
                .iter_mut()
                .find(|item| item.claimed_by(batch_id) && item.file.name == result.file_name)
            {
                Some(item) => {
                    item.status = ItemStatus::Completed;
                    item.result = Some(result.detected_cards);
                    completed += 1;
                }
                None => {
                    tracing::warn!(batch = %batch_id, file = %result.file_name, "result for unknown file");
                }
            }
        }

        let mut missing = 0;
        for item in self.items.iter_mut().filter(|item| item.claimed_by(batch_id)) {
            item.status = ItemStatus::Error;
            item.error = Some(MISSING_RESULT_ERROR.to_string());
            missing += 1;
        }
        (completed, missing)
    }

    /// Mark one file of a batch as failed. Returns false if no processing
    /// item of that batch carries the name.
    pub fn fail(&mut self, batch_id: BatchId, file_name: &str, error: &str) -> bool {
        match self
            .items
            .iter_mut()
            .find(|item| item.claimed_by(batch_id) && item.file.name == file_name)
        {
            Some(item) => {
                item.status = ItemStatus::Error;
                item.error = Some(error.to_string());
                true
            }
            None => false,
        }
    }

    /// Return one batch's unresolved items to `pending`
    pub fn release(&mut self, batch_id: BatchId) -> usize {
        let mut released = 0;
        for item in self.items.iter_mut().filter(|item| item.claimed_by(batch_id)) {
            item.back_to_pending();
            released += 1;
        }
        released
    }

    /// Return every processing item to `pending`
    pub fn reset(&mut self) -> usize {
        let mut released = 0;
        for item in self
            .items
            .iter_mut()
            .filter(|item| item.status == ItemStatus::Processing)
        {
            item.back_to_pending();
            released += 1;
        }
        released
    }

    pub fn clear(&mut self) {
        self.items.clear();
    }

    pub fn items(&self) -> &[QueueItem] {
        &self.items
    }

    pub fn get(&self, id: ItemId) -> Option<&QueueItem> {
        self.items.iter().find(|item| item.id == id)
    }

    pub fn counts(&self) -> QueueCounts {
        let mut counts = QueueCounts {
            total: self.items.len(),
            ..Default::default()
        };
        for item in &self.items {
            match item.status {
                ItemStatus::Pending => counts.pending += 1,
                ItemStatus::Processing => counts.processing += 1,
                ItemStatus::Completed => counts.completed += 1,
                ItemStatus::Error => counts.error += 1,
            }
        }
        counts
    }
}
