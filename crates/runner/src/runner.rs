#![forbid(unsafe_code)]

use crate::exec::{CommandExecutor, ExecLimits};
use crate::store::JobStore;
use cg_core::model::REJECTED_BY_OPERATOR;
use cg_storage::{JobRow, JobUpdate, StoreError, now_ms};
use std::sync::Arc;

/// Applies a decision to a job: executes it under [`ExecLimits`] or rejects it.
#[derive(Clone)]
pub struct JobRunner {
    store: JobStore,
    executor: Arc<dyn CommandExecutor>,
    limits: ExecLimits,
}

impl JobRunner {
    pub fn new(store: JobStore, executor: Arc<dyn CommandExecutor>, limits: ExecLimits) -> Self {
        Self {
            store,
            executor,
            limits,
        }
    }

    /// pending -> running -> completed | failed.
    pub async fn execute(&self, job: &JobRow) -> Result<JobRow, StoreError> {
        let running = self.store.update(job.id, JobUpdate::running(now_ms())).await?;
        tracing::info!(job_id = job.id, command = %running.command, "job started");

        let outcome = self.executor.run(&running.command, &self.limits).await;
        let output = outcome.merged_output();
        let update = match outcome.failure_message(&self.limits) {
            None => JobUpdate::completed(now_ms(), output),
            Some(error) => {
                let output = (!output.is_empty()).then_some(output);
                JobUpdate::failed(now_ms(), output, error)
            }
        };

        let finished = self.store.update(job.id, update).await?;
        match finished.error.as_deref() {
            None => tracing::info!(job_id = job.id, status = %finished.status, "job finished"),
            Some(error) => {
                tracing::warn!(job_id = job.id, status = %finished.status, error, "job finished")
            }
        }
        Ok(finished)
    }

    /// running -> failed for rows orphaned by an earlier process.
    pub async fn fail_interrupted(&self) -> Result<Vec<i64>, StoreError> {
        let ids = self.store.fail_interrupted().await?;
        for job_id in &ids {
            tracing::warn!(job_id, "job was interrupted before completion; marked failed");
        }
        Ok(ids)
    }

    /// pending -> rejected, without running anything.
    pub async fn reject(&self, job: &JobRow) -> Result<JobRow, StoreError> {
        let rejected = self
            .store
            .update(job.id, JobUpdate::rejected(now_ms(), REJECTED_BY_OPERATOR))
            .await?;
        tracing::info!(job_id = job.id, status = %rejected.status, "job rejected");
        Ok(rejected)
    }
}
