#![forbid(unsafe_code)]

use super::*;
use cg_core::model::JobStatus;
use rusqlite::{OptionalExtension, params};

const JOB_COLUMNS: &str =
    "id, command, status, created_at_ms, started_at_ms, finished_at_ms, output, error";

/// Commands are stored exactly as submitted; only all-whitespace input is refused.
fn check_command(raw: &str) -> Result<(), StoreError> {
    if raw.trim().is_empty() {
        return Err(StoreError::InvalidInput("command must not be empty"));
    }
    Ok(())
}

struct RawJobRow {
    id: i64,
    command: String,
    status: String,
    created_at_ms: i64,
    started_at_ms: Option<i64>,
    finished_at_ms: Option<i64>,
    output: Option<String>,
    error: Option<String>,
}

fn read_raw_job_row(row: &rusqlite::Row<'_>) -> Result<RawJobRow, rusqlite::Error> {
    Ok(RawJobRow {
        id: row.get(0)?,
        command: row.get(1)?,
        status: row.get(2)?,
        created_at_ms: row.get(3)?,
        started_at_ms: row.get(4)?,
        finished_at_ms: row.get(5)?,
        output: row.get(6)?,
        error: row.get(7)?,
    })
}

impl TryFrom<RawJobRow> for JobRow {
    type Error = StoreError;

    fn try_from(raw: RawJobRow) -> Result<Self, Self::Error> {
        let status = JobStatus::parse(&raw.status)
            .ok_or(StoreError::InvalidInput("jobs.status holds an unknown value"))?;
        Ok(JobRow {
            id: raw.id,
            command: raw.command,
            status,
            created_at_ms: raw.created_at_ms,
            started_at_ms: raw.started_at_ms,
            finished_at_ms: raw.finished_at_ms,
            output: raw.output,
            error: raw.error,
        })
    }
}

fn select_job(conn: &rusqlite::Connection, id: i64) -> Result<Option<JobRow>, StoreError> {
    let raw = conn
        .query_row(
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE id=?1"),
            params![id],
            read_raw_job_row,
        )
        .optional()?;
    raw.map(JobRow::try_from).transpose()
}

fn select_jobs(conn: &rusqlite::Connection, sql: &str) -> Result<Vec<JobRow>, StoreError> {
    let mut stmt = conn.prepare(sql)?;
    let mut rows = stmt.query([])?;
    let mut out = Vec::new();
    while let Some(row) = rows.next()? {
        out.push(JobRow::try_from(read_raw_job_row(row)?)?);
    }
    Ok(out)
}

impl SqliteStore {
    pub fn job_create(&mut self, command: &str) -> Result<JobRow, StoreError> {
        check_command(command)?;
        let command = command.to_string();
        let created_at_ms = now_ms();

        self.conn.execute(
            "INSERT INTO jobs(command, status, created_at_ms) VALUES (?1, ?2, ?3)",
            params![command, JobStatus::Pending.as_str(), created_at_ms],
        )?;
        let id = self.conn.last_insert_rowid();

        Ok(JobRow {
            id,
            command,
            status: JobStatus::Pending,
            created_at_ms,
            started_at_ms: None,
            finished_at_ms: None,
            output: None,
            error: None,
        })
    }

    /// Merges `update` into the row. Status edges outside the job state machine, and any
    /// change to a job that already reached a terminal status, are refused.
    pub fn job_update(&mut self, id: i64, update: JobUpdate) -> Result<JobRow, StoreError> {
        let tx = self.conn.transaction()?;
        let current = select_job(&tx, id)?.ok_or(StoreError::UnknownId)?;
        if update.is_empty() {
            return Ok(current);
        }

        let next = update.status.unwrap_or(current.status);
        let legal = if current.status.is_terminal() {
            false
        } else {
            next == current.status || current.status.can_transition_to(next)
        };
        if !legal {
            return Err(StoreError::InvalidTransition {
                id,
                from: current.status,
                to: next,
            });
        }

        tx.execute(
            r#"
            UPDATE jobs
            SET status=?2,
                started_at_ms=COALESCE(started_at_ms, ?3),
                finished_at_ms=COALESCE(finished_at_ms, ?4),
                output=COALESCE(?5, output),
                error=COALESCE(?6, error)
            WHERE id=?1
            "#,
            params![
                id,
                next.as_str(),
                update.started_at_ms,
                update.finished_at_ms,
                update.output,
                update.error
            ],
        )?;
        let updated = select_job(&tx, id)?.ok_or(StoreError::UnknownId)?;
        tx.commit()?;
        Ok(updated)
    }

    pub fn job_get(&self, id: i64) -> Result<Option<JobRow>, StoreError> {
        select_job(&self.conn, id)
    }

    pub fn job_latest_by_command(&self, command: &str) -> Result<Option<JobRow>, StoreError> {
        if command.trim().is_empty() {
            return Ok(None);
        }
        let raw = self
            .conn
            .query_row(
                &format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE command=?1 ORDER BY id DESC LIMIT 1"
                ),
                params![command],
                read_raw_job_row,
            )
            .optional()?;
        raw.map(JobRow::try_from).transpose()
    }

    /// Pending jobs, oldest first.
    pub fn jobs_list_pending(&self) -> Result<Vec<JobRow>, StoreError> {
        select_jobs(
            &self.conn,
            &format!("SELECT {JOB_COLUMNS} FROM jobs WHERE status='pending' ORDER BY id ASC"),
        )
    }

    /// Every job, newest first.
    pub fn jobs_list_all(&self) -> Result<Vec<JobRow>, StoreError> {
        select_jobs(
            &self.conn,
            &format!("SELECT {JOB_COLUMNS} FROM jobs ORDER BY id DESC"),
        )
    }

    /// Fails every job still marked `running` and returns their ids, oldest first. Callers
    /// must ensure no execution is in flight.
    pub fn jobs_fail_running(
        &mut self,
        finished_at_ms: i64,
        error: &str,
    ) -> Result<Vec<i64>, StoreError> {
        let tx = self.conn.transaction()?;
        let ids = {
            let mut stmt =
                tx.prepare("SELECT id FROM jobs WHERE status='running' ORDER BY id ASC")?;
            let ids = stmt
                .query_map([], |row| row.get::<_, i64>(0))?
                .collect::<Result<Vec<_>, _>>()?;
            ids
        };
        if ids.is_empty() {
            return Ok(ids);
        }
        tx.execute(
            r#"
            UPDATE jobs
            SET status=?1,
                finished_at_ms=COALESCE(finished_at_ms, ?2),
                error=COALESCE(error, ?3)
            WHERE status='running'
            "#,
            params![JobStatus::Failed.as_str(), finished_at_ms, error],
        )?;
        tx.commit()?;
        Ok(ids)
    }

    pub fn jobs_status_counts(&self) -> Result<JobsStatusCounts, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT status, COUNT(*) FROM jobs GROUP BY status")?;
        let mut rows = stmt.query([])?;
        let mut counts = JobsStatusCounts::default();
        while let Some(row) = rows.next()? {
            let status: String = row.get(0)?;
            let count: i64 = row.get(1)?;
            let count = u64::try_from(count).unwrap_or(0);
            match JobStatus::parse(&status) {
                Some(JobStatus::Pending) => counts.pending = count,
                Some(JobStatus::Running) => counts.running = count,
                Some(JobStatus::Completed) => counts.completed = count,
                Some(JobStatus::Failed) => counts.failed = count,
                Some(JobStatus::Rejected) => counts.rejected = count,
                None => {}
            }
        }
        Ok(counts)
    }
}
