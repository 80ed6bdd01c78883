#![forbid(unsafe_code)]

use super::ToolReply;
use crate::server::McpServer;
use crate::{opt_ts_ms_to_json, ts_ms_to_rfc3339};
use cg_runner::JobRow;
use serde_json::{Value, json};

pub(crate) fn job_json(job: &JobRow) -> Value {
    json!({
        "id": job.id,
        "command": job.command,
        "status": job.status.as_str(),
        "createdAt": ts_ms_to_rfc3339(job.created_at_ms),
        "startedAt": opt_ts_ms_to_json(job.started_at_ms),
        "finishedAt": opt_ts_ms_to_json(job.finished_at_ms),
        "output": job.output,
        "error": job.error,
    })
}

fn not_found() -> ToolReply {
    ToolReply::error(json!({ "error": "Job not found" }))
}

pub(crate) async fn run_command(server: &McpServer, args: Value) -> ToolReply {
    let command = match args.get("command") {
        Some(Value::String(command)) if !command.trim().is_empty() => command.clone(),
        Some(Value::String(_)) | None | Some(Value::Null) => {
            return ToolReply::error_message("command is required");
        }
        Some(_) => return ToolReply::error_message("command must be a string"),
    };

    let job = match server.jobs.create(&command).await {
        Ok(job) => job,
        Err(err) => return ToolReply::error_message(format!("Failed to create job: {err}")),
    };
    tracing::info!(job_id = job.id, command = %job.command, "job created");
    server.queue.push(&job);
    ToolReply::ok(job_json(&job))
}

enum Lookup {
    Id(i64),
    Command(String),
}

fn parse_lookup(args: &Value) -> Result<Lookup, String> {
    match args.get("id") {
        None | Some(Value::Null) => {}
        Some(raw) => {
            return match raw.as_i64() {
                Some(id) if id > 0 => Ok(Lookup::Id(id)),
                _ => Err("id must be a positive integer".to_string()),
            };
        }
    }
    match args.get("command") {
        None | Some(Value::Null) => Err("Either id or command is required".to_string()),
        Some(Value::String(command)) if !command.trim().is_empty() => {
            Ok(Lookup::Command(command.clone()))
        }
        Some(_) => Err("command must be a non-empty string".to_string()),
    }
}

pub(crate) async fn get_job_status(server: &McpServer, args: Value) -> ToolReply {
    let lookup = match parse_lookup(&args) {
        Ok(lookup) => lookup,
        Err(message) => return ToolReply::error_message(message),
    };
    let found = match &lookup {
        Lookup::Id(id) => server.jobs.get_by_id(*id).await,
        Lookup::Command(command) => server.jobs.get_latest_by_command(command).await,
    };
    match found {
        Ok(Some(job)) => ToolReply::ok(job_json(&job)),
        Ok(None) => not_found(),
        Err(err) => ToolReply::error_message(format!("Failed to read job: {err}")),
    }
}
