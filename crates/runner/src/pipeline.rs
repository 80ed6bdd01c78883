#![forbid(unsafe_code)]

use crate::gate::{ApprovalGate, Decision};
use crate::queue::ApprovalQueue;
use crate::runner::JobRunner;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

const STORE_RETRY_DELAY: Duration = Duration::from_millis(250);

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct LoopSummary {
    pub approved: u64,
    pub rejected: u64,
}

/// The single consumer of the approval queue and the only writer of `running` and
/// terminal statuses.
///
/// Without a gate every job is rejected. A job whose prompt is interrupted by shutdown is
/// left pending; an execution already in progress is allowed to finish (it is bounded by
/// the runner's timeout). Jobs a previous process left `running` are failed before the
/// first job is taken.
pub struct ApprovalLoop {
    queue: Arc<ApprovalQueue>,
    gate: Option<Arc<dyn ApprovalGate>>,
    runner: JobRunner,
}

impl ApprovalLoop {
    pub fn new(
        queue: Arc<ApprovalQueue>,
        gate: Option<Arc<dyn ApprovalGate>>,
        runner: JobRunner,
    ) -> Self {
        Self {
            queue,
            gate,
            runner,
        }
    }

    pub async fn run(self, shutdown: CancellationToken) -> LoopSummary {
        let mut summary = LoopSummary::default();
        if self.gate.is_none() {
            tracing::warn!("no interactive approval surface; every job will be rejected");
        }
        if let Err(err) = self.runner.fail_interrupted().await {
            tracing::error!(error = %err, "failed to recover interrupted jobs");
        }

        loop {
            let job = match self.queue.next().await {
                Ok(Some(job)) => job,
                Ok(None) => break,
                Err(err) => {
                    tracing::error!(error = %err, "approval queue failed to read the job store");
                    tokio::select! {
                        _ = tokio::time::sleep(STORE_RETRY_DELAY) => continue,
                        _ = shutdown.cancelled() => break,
                    }
                }
            };

            let decision = match &self.gate {
                None => Decision::Reject,
                Some(gate) => {
                    tokio::select! {
                        biased;
                        _ = shutdown.cancelled() => {
                            tracing::info!(job_id = job.id, "shutdown during approval prompt; job stays pending");
                            break;
                        }
                        answer = gate.ask(&job) => match answer {
                            Ok(decision) => decision,
                            Err(err) => {
                                tracing::warn!(job_id = job.id, error = %err, "approval gate failed; rejecting");
                                Decision::Reject
                            }
                        },
                    }
                }
            };

            let result = match decision {
                Decision::Approve => {
                    tracing::info!(job_id = job.id, "job approved");
                    summary.approved += 1;
                    self.runner.execute(&job).await
                }
                Decision::Reject => {
                    summary.rejected += 1;
                    self.runner.reject(&job).await
                }
            };
            if let Err(err) = result {
                tracing::error!(job_id = job.id, error = %err, "failed to record job outcome");
            }
        }

        tracing::info!(
            approved = summary.approved,
            rejected = summary.rejected,
            "approval loop stopped"
        );
        summary
    }
}
