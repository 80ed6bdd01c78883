#![forbid(unsafe_code)]

use cg_core::model::INTERRUPTED_BEFORE_COMPLETION;
use cg_storage::{JobRow, JobUpdate, JobsStatusCounts, SqliteStore, StoreError, now_ms};
use std::sync::{Arc, Mutex, MutexGuard};

/// Cloneable async handle over the SQLite job table.
///
/// Every call hops onto tokio's blocking pool, so a slow disk never stalls the
/// single-threaded scheduler. After [`JobStore::close`] every call fails with
/// [`StoreError::Unavailable`].
#[derive(Clone, Debug)]
pub struct JobStore {
    inner: Arc<Mutex<Option<SqliteStore>>>,
}

fn lock(inner: &Mutex<Option<SqliteStore>>) -> MutexGuard<'_, Option<SqliteStore>> {
    // A panic inside a store call cannot leave the connection half-written: each write is
    // its own transaction.
    inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl JobStore {
    pub fn new(store: SqliteStore) -> Self {
        Self {
            inner: Arc::new(Mutex::new(Some(store))),
        }
    }

    async fn with_store<T, F>(&self, op: &'static str, f: F) -> Result<T, StoreError>
    where
        T: Send + 'static,
        F: FnOnce(&mut SqliteStore) -> Result<T, StoreError> + Send + 'static,
    {
        let inner = Arc::clone(&self.inner);
        let result = tokio::task::spawn_blocking(move || {
            let mut guard = lock(&inner);
            let store = guard.as_mut().ok_or(StoreError::Unavailable)?;
            f(store)
        })
        .await
        .unwrap_or(Err(StoreError::Unavailable));

        if let Err(err) = &result {
            tracing::warn!(op, error = %err, "job store operation failed");
        }
        result
    }

    pub async fn create(&self, command: &str) -> Result<JobRow, StoreError> {
        let command = command.to_string();
        self.with_store("create", move |store| store.job_create(&command))
            .await
    }

    pub async fn update(&self, id: i64, update: JobUpdate) -> Result<JobRow, StoreError> {
        self.with_store("update", move |store| store.job_update(id, update))
            .await
    }

    pub async fn get_by_id(&self, id: i64) -> Result<Option<JobRow>, StoreError> {
        self.with_store("get_by_id", move |store| store.job_get(id))
            .await
    }

    pub async fn get_latest_by_command(&self, command: &str) -> Result<Option<JobRow>, StoreError> {
        let command = command.to_string();
        self.with_store("get_latest_by_command", move |store| {
            store.job_latest_by_command(&command)
        })
        .await
    }

    pub async fn list_pending(&self) -> Result<Vec<JobRow>, StoreError> {
        self.with_store("list_pending", |store| store.jobs_list_pending())
            .await
    }

    pub async fn list_all(&self) -> Result<Vec<JobRow>, StoreError> {
        self.with_store("list_all", |store| store.jobs_list_all())
            .await
    }

    pub async fn status_counts(&self) -> Result<JobsStatusCounts, StoreError> {
        self.with_store("status_counts", |store| store.jobs_status_counts())
            .await
    }

    /// Moves every `running` row to `failed`. Must only be called while no execution is in
    /// flight: at startup, or after the approval loop was torn down.
    pub async fn fail_interrupted(&self) -> Result<Vec<i64>, StoreError> {
        self.with_store("fail_interrupted", |store| {
            store.jobs_fail_running(now_ms(), INTERRUPTED_BEFORE_COMPLETION)
        })
        .await
    }

    /// Closes the underlying connection. Closing twice is a no-op.
    pub async fn close(&self) -> Result<(), StoreError> {
        let inner = Arc::clone(&self.inner);
        tokio::task::spawn_blocking(move || match lock(&inner).take() {
            Some(store) => store.close(),
            None => Ok(()),
        })
        .await
        .unwrap_or(Err(StoreError::Unavailable))
    }
}
