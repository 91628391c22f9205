//! Batch partitioning and single-batch-in-flight bookkeeping.

use std::time::Instant;

use crate::engine::batch::{batch_size, Batch, BatchStatus};
use crate::engine::protocol::{BatchId, ItemId};

/// The batch currently dispatched to a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InFlight {
    pub batch_id: BatchId,
    pub worker: usize,
    pub deadline: Instant,
}

#[derive(Debug)]
pub struct BatchScheduler {
    max_batch_size: usize,
    divisor: usize,
    batches: Vec<Batch>,
    next_id: u64,
    in_flight: Option<InFlight>,
}

impl BatchScheduler {
    pub fn new(max_batch_size: usize, divisor: usize) -> Self {
        Self {
            max_batch_size,
            divisor,
            batches: Vec::new(),
            next_id: 1,
            in_flight: None,
        }
    }

    /// Start a new run: forget every batch not in flight, then partition the
    /// pending items into new pending batches.
    /// Returns how many batches were created.
    pub fn plan(&mut self, pending: Vec<(ItemId, String)>) -> usize {
        let in_flight = self.in_flight;
        self.batches
            .retain(|b| in_flight.is_some_and(|f| f.batch_id == b.id));
        if pending.is_empty() {
            return 0;
        }
        let size = batch_size(pending.len(), self.max_batch_size, self.divisor);
        let mut created = 0;
        let mut items = pending.into_iter().peekable();
        while items.peek().is_some() {
            let chunk: Vec<_> = items.by_ref().take(size).collect();
            let id = BatchId(self.next_id);
            self.next_id += 1;
            self.batches.push(Batch::new(id, chunk));
            created += 1;
        }
        tracing::debug!(batches = created, size, "planned batches");
        created
    }

    /// Oldest batch still waiting for dispatch
    pub fn next_pending(&self) -> Option<&Batch> {
        self.batches.iter().find(|b| b.status == BatchStatus::Pending)
    }

    pub fn dispatched(&mut self, batch_id: BatchId, worker: usize, deadline: Instant) {
        if let Some(batch) = self.get_mut(batch_id) {
            batch.status = BatchStatus::Processing;
        }
        self.in_flight = Some(InFlight {
            batch_id,
            worker,
            deadline,
        });
    }

    pub fn in_flight(&self) -> Option<InFlight> {
        self.in_flight
    }

    /// Is `batch_id` the batch currently running on `worker`?
    pub fn is_active(&self, batch_id: BatchId, worker: usize) -> bool {
        self.in_flight
            .is_some_and(|f| f.batch_id == batch_id && f.worker == worker)
    }

    pub fn record_progress(&mut self, batch_id: BatchId, current: usize, total: usize, file_name: String) {
        if let Some(batch) = self.get_mut(batch_id) {
            batch.record_progress(current, total, file_name);
        }
    }

    /// Close out a batch; clears the in-flight slot if it was that batch
    pub fn finish(&mut self, batch_id: BatchId, status: BatchStatus) {
        if let Some(batch) = self.get_mut(batch_id) {
            batch.finish(status);
        }
        if self.in_flight.is_some_and(|f| f.batch_id == batch_id) {
            self.in_flight = None;
        }
    }

    /// Mark the in-flight batch and everything not yet dispatched as
    /// cancelled. Returns the batch that was in flight, if any.
    pub fn cancel_all(&mut self) -> Option<InFlight> {
        for batch in self.batches.iter_mut().filter(|b| !b.status.is_terminal()) {
            batch.status = BatchStatus::Cancelled;
        }
        self.in_flight.take()
    }

    pub fn clear(&mut self) {
        self.batches.clear();
        self.in_flight = None;
    }

    pub fn batches(&self) -> &[Batch] {
        &self.batches
    }

    fn get_mut(&mut self, batch_id: BatchId) -> Option<&mut Batch> {
        self.batches.iter_mut().find(|b| b.id == batch_id)
    }
}
