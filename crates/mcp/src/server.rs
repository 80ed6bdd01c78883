#![forbid(unsafe_code)]

use crate::proxy::ProxyClient;
use crate::{
    INVALID_PARAMS, JsonRpcRequest, METHOD_NOT_FOUND, NOT_INITIALIZED, json_rpc_error,
    json_rpc_response,
};
use cg_runner::{ApprovalQueue, JobStore};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

pub(crate) struct McpServer {
    initialized: AtomicBool,
    pub(crate) jobs: JobStore,
    pub(crate) queue: Arc<ApprovalQueue>,
    pub(crate) proxy: Arc<ProxyClient>,
}

impl McpServer {
    pub(crate) fn new(jobs: JobStore, queue: Arc<ApprovalQueue>, proxy: Arc<ProxyClient>) -> Self {
        Self {
            initialized: AtomicBool::new(false),
            jobs,
            queue,
            proxy,
        }
    }

    pub(crate) fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::SeqCst)
    }

    /// Response for `request`, or `None` for notifications.
    pub(crate) async fn handle(&self, request: JsonRpcRequest) -> Option<Value> {
        let notification = request.is_notification();
        let response = self.respond(request).await;
        if notification {
            return None;
        }
        response
    }

    async fn respond(&self, request: JsonRpcRequest) -> Option<Value> {
        let method = request.method.as_str();

        if method == "initialize" {
            return Some(json_rpc_response(
                request.id,
                json!({
                    "protocolVersion": crate::MCP_VERSION,
                    "serverInfo": { "name": crate::SERVER_NAME, "version": crate::SERVER_VERSION },
                    "capabilities": { "tools": {} }
                }),
            ));
        }

        if method == "notifications/initialized" {
            if !self.initialized.swap(true, Ordering::SeqCst) {
                tracing::info!("client initialized");
            }
            return None;
        }

        if !self.is_initialized() {
            return Some(json_rpc_error(
                request.id,
                NOT_INITIALIZED,
                "Server not initialized",
            ));
        }

        match method {
            "ping" => Some(json_rpc_response(request.id, json!({}))),
            "resources/list" => Some(json_rpc_response(
                request.id,
                json!({ "resources": [] }),
            )),
            "tools/list" => Some(json_rpc_response(
                request.id,
                json!({ "tools": crate::tools::tool_definitions() }),
            )),
            "tools/call" => Some(self.tools_call(request.id, request.params).await),
            _ => Some(json_rpc_error(
                request.id,
                METHOD_NOT_FOUND,
                &format!("Method not found: {method}"),
            )),
        }
    }

    async fn tools_call(&self, id: Option<Value>, params: Option<Value>) -> Value {
        let Some(Value::Object(params)) = params else {
            return json_rpc_error(id, INVALID_PARAMS, "params must be an object");
        };
        let Some(name) = params.get("name").and_then(Value::as_str) else {
            return json_rpc_error(id, INVALID_PARAMS, "params.name must be a string");
        };
        let args = match params.get("arguments") {
            None | Some(Value::Null) => json!({}),
            Some(args @ Value::Object(_)) => args.clone(),
            Some(_) => {
                return json_rpc_error(id, INVALID_PARAMS, "params.arguments must be an object");
            }
        };

        match crate::tools::dispatch_tool(self, name, args).await {
            Some(reply) => json_rpc_response(id, reply.into_result()),
            None => json_rpc_error(id, INVALID_PARAMS, &format!("Unknown tool: {name}")),
        }
    }
}
