#![forbid(unsafe_code)]

use crate::store::JobStore;
use cg_core::model::JobStatus;
use cg_storage::{JobRow, StoreError};
use std::collections::VecDeque;
use std::sync::Mutex;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

/// In-memory FIFO of job ids awaiting a decision.
///
/// The queue only holds ids; the store stays the authority on a job's state, so every
/// entry is re-read before it is handed to the consumer. When the queue runs dry it
/// re-primes from the store's pending jobs, which is how jobs left pending by a previous
/// process (or inserted out-of-band) get picked up.
#[derive(Debug)]
pub struct ApprovalQueue {
    store: JobStore,
    ids: Mutex<VecDeque<i64>>,
    wake: Notify,
    shutdown: CancellationToken,
}

impl ApprovalQueue {
    pub fn new(store: JobStore, shutdown: CancellationToken) -> Self {
        Self {
            store,
            ids: Mutex::new(VecDeque::new()),
            wake: Notify::new(),
            shutdown,
        }
    }

    fn ids(&self) -> std::sync::MutexGuard<'_, VecDeque<i64>> {
        self.ids.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn enqueue(&self, id: i64) -> bool {
        let mut ids = self.ids();
        if ids.contains(&id) {
            return false;
        }
        ids.push_back(id);
        true
    }

    fn pop_front(&self) -> Option<i64> {
        self.ids().pop_front()
    }

    /// Queues a pending job and wakes the consumer. Returns `false` when the job is not
    /// pending or its id is already queued.
    pub fn push(&self, job: &JobRow) -> bool {
        if job.status != JobStatus::Pending {
            return false;
        }
        if !self.enqueue(job.id) {
            tracing::debug!(job_id = job.id, "job already queued");
            return false;
        }
        tracing::info!(job_id = job.id, "job queued");
        self.wake.notify_one();
        true
    }

    pub fn len(&self) -> usize {
        self.ids().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Next job that is still pending, oldest first.
    ///
    /// Waits while there is nothing to hand out; returns `Ok(None)` once shutdown has been
    /// requested.
    pub async fn next(&self) -> Result<Option<JobRow>, StoreError> {
        loop {
            if self.shutdown.is_cancelled() {
                return Ok(None);
            }

            while let Some(id) = self.pop_front() {
                match self.store.get_by_id(id).await? {
                    Some(job) if job.status == JobStatus::Pending => return Ok(Some(job)),
                    Some(job) => {
                        tracing::debug!(job_id = id, status = %job.status, "dropping stale queue entry");
                    }
                    None => tracing::debug!(job_id = id, "dropping queue entry for missing job"),
                }
            }

            let mut reprimed = 0usize;
            for job in self.store.list_pending().await? {
                if self.enqueue(job.id) {
                    reprimed += 1;
                }
            }
            if reprimed > 0 {
                tracing::info!(count = reprimed, "re-primed queue from pending jobs");
                continue;
            }

            tokio::select! {
                _ = self.wake.notified() => {}
                _ = self.shutdown.cancelled() => return Ok(None),
            }
        }
    }
}
