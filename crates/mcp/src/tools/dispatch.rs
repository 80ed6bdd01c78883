#![forbid(unsafe_code)]

use super::{ToolReply, jobs, proxy};
use crate::server::McpServer;
use serde_json::Value;

pub(crate) async fn dispatch_tool(server: &McpServer, name: &str, args: Value) -> Option<ToolReply> {
    let reply = match name {
        "run_command" => jobs::run_command(server, args).await,
        "get_job_status" => jobs::get_job_status(server, args).await,
        "proxy_call" => proxy::proxy_call(server, args).await,
        _ => return None,
    };
    Some(reply)
}
