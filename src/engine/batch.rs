use serde::Serialize;

use crate::engine::protocol::{BatchId, ItemId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum BatchStatus {
    Pending,
    Processing,
    Completed,
    Cancelled,
    Error,
    TimedOut,
}

impl BatchStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, BatchStatus::Pending | BatchStatus::Processing)
    }
}

/// A bounded group of queue items reported on as a unit.
///
/// `files` and `item_ids` are fixed when the batch is created.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Batch {
    pub id: BatchId,
    pub files: Vec<String>,
    #[serde(skip)]
    pub item_ids: Vec<ItemId>,
    pub status: BatchStatus,
    pub current: usize,
    pub total: usize,
    /// 0 to 100
    pub progress: u8,
    pub current_file_name: Option<String>,
}

impl Batch {
    pub fn new(id: BatchId, items: Vec<(ItemId, String)>) -> Self {
        let (item_ids, files): (Vec<_>, Vec<_>) = items.into_iter().unzip();
        Self {
            id,
            total: files.len(),
            files,
            item_ids,
            status: BatchStatus::Pending,
            current: 0,
            progress: 0,
            current_file_name: None,
        }
    }

    pub fn record_progress(&mut self, current: usize, total: usize, file_name: String) {
        self.current = current;
        self.total = total;
        self.progress = percent(current, total);
        self.current_file_name = Some(file_name);
    }

    pub fn finish(&mut self, status: BatchStatus) {
        if status == BatchStatus::Completed || status == BatchStatus::Error {
            self.current = self.total;
            self.progress = 100;
        }
        self.status = status;
    }
}

fn percent(current: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    ((current.min(total) * 100) as f32 / total as f32).round() as u8
}

/// Files per batch for a queue of `pending` items: small queues get
/// single-file batches, larger ones grow up to `max_batch_size`.
pub fn batch_size(pending: usize, max_batch_size: usize, divisor: usize) -> usize {
    (pending / divisor.max(1)).max(1).min(max_batch_size.max(1))
}
