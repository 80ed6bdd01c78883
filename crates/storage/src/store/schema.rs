#![forbid(unsafe_code)]

use super::StoreError;
use rusqlite::{Connection, params};

const SQL: &str = r#"
CREATE TABLE IF NOT EXISTS meta (
  key TEXT PRIMARY KEY,
  value TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS jobs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  command TEXT NOT NULL CHECK(length(command) > 0),
  status TEXT NOT NULL,
  created_at_ms INTEGER NOT NULL,
  started_at_ms INTEGER,
  finished_at_ms INTEGER,
  output TEXT,
  error TEXT
);

CREATE INDEX IF NOT EXISTS idx_jobs_status_id ON jobs(status, id);
CREATE INDEX IF NOT EXISTS idx_jobs_command_id ON jobs(command, id);
"#;

pub(super) fn install(conn: &Connection, version: &str) -> Result<(), StoreError> {
    conn.execute_batch(SQL)?;
    conn.execute(
        "INSERT OR IGNORE INTO meta(key, value) VALUES (?1, ?2)",
        params!["schema_version", version],
    )?;
    Ok(())
}
