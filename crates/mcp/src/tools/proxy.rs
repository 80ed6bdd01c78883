#![forbid(unsafe_code)]

use super::ToolReply;
use crate::proxy::CallOptions;
use crate::server::McpServer;
use serde_json::{Value, json};
use std::time::Duration;

fn required_string(args: &Value, key: &str) -> Result<String, String> {
    match args.get(key) {
        Some(Value::String(value)) if !value.trim().is_empty() => Ok(value.clone()),
        _ => Err(format!("{key} is required")),
    }
}

fn call_options(args: &Value) -> Result<CallOptions, String> {
    let Some(options) = args.get("options").filter(|v| !v.is_null()) else {
        return Ok(CallOptions::default());
    };
    if !options.is_object() {
        return Err("options must be an object".to_string());
    }
    let timeout = match options.get("timeoutMs") {
        None | Some(Value::Null) => None,
        Some(raw) => match raw.as_u64() {
            Some(ms) if ms > 0 => Some(Duration::from_millis(ms)),
            _ => return Err("options.timeoutMs must be a positive integer".to_string()),
        },
    };
    Ok(CallOptions { timeout })
}

pub(crate) async fn proxy_call(server: &McpServer, args: Value) -> ToolReply {
    let parsed = required_string(&args, "server").and_then(|peer| {
        let tool = required_string(&args, "tool")?;
        let call_args = match args.get("args") {
            None | Some(Value::Null) => json!({}),
            Some(value @ Value::Object(_)) => value.clone(),
            Some(_) => return Err("args must be an object".to_string()),
        };
        Ok((peer, tool, call_args, call_options(&args)?))
    });
    let (peer, tool, call_args, options) = match parsed {
        Ok(parsed) => parsed,
        Err(message) => return ToolReply::error_message(message),
    };

    match server.proxy.forward(&peer, &tool, call_args, options).await {
        Ok(result) => ToolReply::Passthrough(result),
        Err(err) => {
            tracing::warn!(server = %peer, tool = %tool, error = %err, "proxy call failed");
            ToolReply::error_message(err.to_string())
        }
    }
}
