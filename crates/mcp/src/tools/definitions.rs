#![forbid(unsafe_code)]

use serde_json::{Value, json};

pub(crate) fn tool_definitions() -> Vec<Value> {
    vec![
        json!({
            "name": "run_command",
            "description": "Queue a shell command for operator approval. Returns the pending job; poll get_job_status for the outcome.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "command": { "type": "string", "description": "Shell command to run once approved." }
                },
                "required": ["command"]
            },
        }),
        json!({
            "name": "get_job_status",
            "description": "Look up a job by id, or the most recent job for a command. id wins when both are given.",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "id": { "type": "integer", "minimum": 1 },
                    "command": { "type": "string" }
                }
            },
        }),
        json!({
            "name": "proxy_call",
            "description": "Call a tool on another MCP server. server is a configured name, an http(s):// URL, or stdio:<command> [args...].",
            "inputSchema": {
                "type": "object",
                "properties": {
                    "server": { "type": "string" },
                    "tool": { "type": "string" },
                    "args": { "type": "object" },
                    "options": {
                        "type": "object",
                        "properties": {
                            "timeoutMs": { "type": "integer", "minimum": 1 }
                        }
                    }
                },
                "required": ["server", "tool"]
            },
        }),
    ]
}
