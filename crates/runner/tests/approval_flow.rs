#![forbid(unsafe_code)]

use cg_core::model::{INTERRUPTED_BEFORE_COMPLETION, JobStatus, REJECTED_BY_OPERATOR};
use cg_runner::{
    ApprovalGate, ApprovalLoop, ApprovalQueue, ExecLimits, JobRow, JobRunner, JobStore,
    JobUpdate, LoopSummary, ScriptedGate, ShellExecutor,
};
use cg_storage::{SqliteStore, now_ms};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn temp_dir(test_name: &str) -> PathBuf {
    let nanos = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .expect("time")
        .as_nanos();
    let dir = std::env::temp_dir().join(format!("cg_runner_{test_name}_{nanos}"));
    std::fs::create_dir_all(&dir).expect("create temp dir");
    dir
}

struct Harness {
    store: JobStore,
    queue: Arc<ApprovalQueue>,
    shutdown: CancellationToken,
    handle: JoinHandle<LoopSummary>,
}

impl Harness {
    fn start(store: JobStore, gate: Option<Arc<dyn ApprovalGate>>, limits: ExecLimits) -> Self {
        let shutdown = CancellationToken::new();
        let queue = Arc::new(ApprovalQueue::new(store.clone(), shutdown.clone()));
        let runner = JobRunner::new(store.clone(), Arc::new(ShellExecutor), limits);
        let handle = tokio::spawn(
            ApprovalLoop::new(Arc::clone(&queue), gate, runner).run(shutdown.clone()),
        );
        Self {
            store,
            queue,
            shutdown,
            handle,
        }
    }

    async fn submit(&self, command: &str) -> JobRow {
        let job = self.store.create(command).await.expect("create job");
        assert_eq!(job.status, JobStatus::Pending);
        self.queue.push(&job);
        job
    }

    async fn wait_terminal(&self, id: i64) -> JobRow {
        self.wait_until(id, |status| status.is_terminal()).await
    }

    async fn wait_until(&self, id: i64, reached: impl Fn(JobStatus) -> bool) -> JobRow {
        let deadline = tokio::time::Instant::now() + Duration::from_secs(20);
        loop {
            let job = self
                .store
                .get_by_id(id)
                .await
                .expect("get job")
                .expect("job exists");
            if reached(job.status) {
                return job;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "job {id} stuck in {}",
                job.status
            );
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
    }

    async fn stop(self) -> LoopSummary {
        self.shutdown.cancel();
        tokio::time::timeout(Duration::from_secs(10), self.handle)
            .await
            .expect("loop stops")
            .expect("join loop")
    }
}

fn in_memory() -> JobStore {
    JobStore::new(SqliteStore::open_in_memory().expect("open store"))
}

#[tokio::test]
async fn approved_command_runs_to_completion() {
    let gate: Arc<dyn ApprovalGate> = Arc::new(ScriptedGate::new(["y"]));
    let harness = Harness::start(in_memory(), Some(gate), ExecLimits::default());

    let job = harness.submit("echo hello").await;
    let done = harness.wait_terminal(job.id).await;

    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.output.as_deref().unwrap_or("").contains("hello"));
    assert_eq!(done.error, None);
    let started = done.started_at_ms.expect("startedAt set");
    let finished = done.finished_at_ms.expect("finishedAt set");
    assert!(done.created_at_ms <= started && started <= finished);

    let summary = harness.stop().await;
    assert_eq!(summary, LoopSummary { approved: 1, rejected: 0 });
}

#[tokio::test]
async fn operator_rejection_never_executes() {
    let marker = temp_dir("rejected").join("ran");
    let gate: Arc<dyn ApprovalGate> = Arc::new(ScriptedGate::new(["what", "n"]));
    let harness = Harness::start(in_memory(), Some(gate), ExecLimits::default());

    let job = harness
        .submit(&format!("touch '{}'", marker.display()))
        .await;
    let done = harness.wait_terminal(job.id).await;

    assert_eq!(done.status, JobStatus::Rejected);
    assert_eq!(done.error.as_deref(), Some(REJECTED_BY_OPERATOR));
    assert_eq!(done.output, None);
    assert_eq!(done.started_at_ms, None);
    assert!(done.finished_at_ms.is_some());
    assert!(!marker.exists());
    harness.stop().await;
}

#[tokio::test]
async fn missing_gate_rejects_every_job() {
    let harness = Harness::start(in_memory(), None, ExecLimits::default());

    let a = harness.submit("echo a").await;
    let b = harness.submit("echo b").await;
    for id in [a.id, b.id] {
        let done = harness.wait_terminal(id).await;
        assert_eq!(done.status, JobStatus::Rejected);
        assert_eq!(done.error.as_deref(), Some(REJECTED_BY_OPERATOR));
    }

    let summary = harness.stop().await;
    assert_eq!(summary, LoopSummary { approved: 0, rejected: 2 });
}

#[tokio::test]
async fn exhausted_gate_fails_closed() {
    let gate: Arc<dyn ApprovalGate> = Arc::new(ScriptedGate::new(Vec::<String>::new()));
    let harness = Harness::start(in_memory(), Some(gate), ExecLimits::default());

    let job = harness.submit("echo never").await;
    let done = harness.wait_terminal(job.id).await;
    assert_eq!(done.status, JobStatus::Rejected);
    harness.stop().await;
}

#[tokio::test]
async fn timed_out_command_is_failed() {
    let gate: Arc<dyn ApprovalGate> = Arc::new(ScriptedGate::new(["yes"]));
    let limits = ExecLimits {
        timeout: Duration::from_millis(300),
        ..ExecLimits::default()
    };
    let harness = Harness::start(in_memory(), Some(gate), limits);

    let job = harness.submit("sleep 9999").await;
    let done = harness.wait_terminal(job.id).await;

    assert_eq!(done.status, JobStatus::Failed);
    assert!(
        done.error.as_deref().unwrap_or("").contains("timed out"),
        "{:?}",
        done.error
    );
    harness.stop().await;
}

#[tokio::test]
async fn failing_command_records_output_and_error() {
    let gate: Arc<dyn ApprovalGate> = Arc::new(ScriptedGate::new(["y"]));
    let harness = Harness::start(in_memory(), Some(gate), ExecLimits::default());

    let job = harness.submit("echo partial; echo boom >&2; exit 4").await;
    let done = harness.wait_terminal(job.id).await;

    assert_eq!(done.status, JobStatus::Failed);
    assert_eq!(done.output.as_deref(), Some("partial\nboom\n"));
    assert_eq!(done.error.as_deref(), Some("Command exited with code 4"));
    harness.stop().await;
}

#[tokio::test]
async fn jobs_are_served_one_at_a_time_in_order() {
    let gate = Arc::new(ScriptedGate::new(["y", "n", "y"]));
    let dyn_gate: Arc<dyn ApprovalGate> = gate.clone();
    let harness = Harness::start(in_memory(), Some(dyn_gate), ExecLimits::default());

    let first = harness.submit("echo 1").await;
    let second = harness.submit("echo 2").await;
    let third = harness.submit("echo 3").await;
    let statuses = [
        harness.wait_terminal(first.id).await.status,
        harness.wait_terminal(second.id).await.status,
        harness.wait_terminal(third.id).await.status,
    ];

    assert_eq!(
        statuses,
        [JobStatus::Completed, JobStatus::Rejected, JobStatus::Completed]
    );
    assert_eq!(gate.prompts(), vec![first.id, second.id, third.id]);
    harness.stop().await;
}

#[tokio::test]
async fn pending_jobs_survive_a_restart() {
    let dir = temp_dir("restart");

    let leftover = {
        let store = JobStore::new(SqliteStore::open(&dir).expect("open store"));
        let job = store.create("echo recovered").await.expect("create");
        store.close().await.expect("close");
        job
    };

    let store = JobStore::new(SqliteStore::open(&dir).expect("reopen store"));
    let gate: Arc<dyn ApprovalGate> = Arc::new(ScriptedGate::new(["y"]));
    let harness = Harness::start(store, Some(gate), ExecLimits::default());

    let done = harness.wait_terminal(leftover.id).await;
    assert_eq!(done.status, JobStatus::Completed);
    assert!(done.output.as_deref().unwrap_or("").contains("recovered"));

    harness.stop().await;
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn jobs_left_running_are_failed_on_restart() {
    let dir = temp_dir("orphan");

    let orphan = {
        let store = JobStore::new(SqliteStore::open(&dir).expect("open store"));
        let job = store.create("sleep 30").await.expect("create");
        store
            .update(job.id, JobUpdate::running(now_ms()))
            .await
            .expect("mark running");
        store.close().await.expect("close");
        job
    };

    let store = JobStore::new(SqliteStore::open(&dir).expect("reopen store"));
    let gate: Arc<dyn ApprovalGate> = Arc::new(ScriptedGate::new(["y"]));
    let harness = Harness::start(store, Some(gate), ExecLimits::default());

    let fresh = harness.submit("echo fresh").await;
    let done = harness.wait_terminal(fresh.id).await;
    assert_eq!(done.status, JobStatus::Completed);

    let orphan = harness
        .store
        .get_by_id(orphan.id)
        .await
        .expect("get")
        .expect("job");
    assert_eq!(orphan.status, JobStatus::Failed);
    assert_eq!(orphan.error.as_deref(), Some(INTERRUPTED_BEFORE_COMPLETION));
    assert!(orphan.finished_at_ms.is_some());
    let counts = harness.store.status_counts().await.expect("counts");
    assert_eq!(counts.running, 0);
    assert_eq!(counts.failed, 1);

    harness.stop().await;
    let _ = std::fs::remove_dir_all(&dir);
}

#[tokio::test]
async fn shutdown_waits_for_the_running_job() {
    let gate: Arc<dyn ApprovalGate> = Arc::new(ScriptedGate::new(["y"]));
    let harness = Harness::start(in_memory(), Some(gate), ExecLimits::default());

    let job = harness.submit("sleep 0.5; echo done").await;
    harness
        .wait_until(job.id, |status| status == JobStatus::Running)
        .await;

    let store = harness.store.clone();
    let summary = harness.stop().await;
    assert_eq!(summary, LoopSummary { approved: 1, rejected: 0 });

    // The loop only returned once the command had finished and been recorded.
    let job = store.get_by_id(job.id).await.expect("get").expect("job");
    assert_eq!(job.status, JobStatus::Completed);
    assert_eq!(job.output.as_deref(), Some("done\n"));
    assert!(job.finished_at_ms.is_some());
}

#[tokio::test]
async fn shutdown_while_prompting_leaves_job_pending() {
    struct NeverAnswers;

    #[async_trait::async_trait]
    impl ApprovalGate for NeverAnswers {
        async fn ask(&self, _job: &JobRow) -> Result<cg_runner::Decision, cg_runner::GateError> {
            std::future::pending().await
        }
    }

    let harness = Harness::start(in_memory(), Some(Arc::new(NeverAnswers)), ExecLimits::default());
    let job = harness.submit("echo later").await;
    tokio::time::sleep(Duration::from_millis(100)).await;

    let store = harness.store.clone();
    let summary = harness.stop().await;
    assert_eq!(summary, LoopSummary::default());
    let job = store.get_by_id(job.id).await.expect("get").expect("job");
    assert_eq!(job.status, JobStatus::Pending);
}
