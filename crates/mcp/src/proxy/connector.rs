#![forbid(unsafe_code)]

use super::http::HttpConnector;
use super::stdio::StdioConnector;
use super::ProxyError;
use crate::config::PeerConfig;
use async_trait::async_trait;
use serde_json::{Value, json};
use std::sync::Arc;
use std::time::Duration;

/// Live link to one peer, able to issue MCP tool calls.
#[async_trait]
pub(crate) trait PeerConnector: Send + Sync {
    /// Connects and performs the MCP handshake. A no-op while the link is live.
    async fn initialize(&self) -> Result<(), ProxyError>;

    /// Issues `tools/call` and returns the peer's raw `result`.
    async fn call_tool(&self, tool: &str, args: Value, timeout: Duration)
    -> Result<Value, ProxyError>;

    fn is_connected(&self) -> bool;

    async fn close(&self) -> Result<(), ProxyError>;
}

pub(crate) trait ConnectorFactory: Send + Sync {
    fn connect(&self, name: &str, config: &PeerConfig)
    -> Result<Arc<dyn PeerConnector>, ProxyError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub(crate) struct DefaultConnectorFactory;

impl ConnectorFactory for DefaultConnectorFactory {
    fn connect(
        &self,
        name: &str,
        config: &PeerConfig,
    ) -> Result<Arc<dyn PeerConnector>, ProxyError> {
        Ok(match config {
            PeerConfig::Http { url } => Arc::new(HttpConnector::new(name, url)?),
            PeerConfig::Stdio { command, args } => {
                Arc::new(StdioConnector::new(name, command, args))
            }
        })
    }
}

pub(super) fn initialize_params() -> Value {
    json!({
        "protocolVersion": crate::MCP_VERSION,
        "capabilities": {},
        "clientInfo": { "name": crate::SERVER_NAME, "version": crate::SERVER_VERSION }
    })
}

pub(super) fn tools_call_params(tool: &str, args: Value) -> Value {
    json!({ "name": tool, "arguments": args })
}

/// Splits a JSON-RPC response into its `result` or a [`ProxyError::Remote`].
pub(super) fn rpc_result(peer: &str, response: Value) -> Result<Value, ProxyError> {
    let Value::Object(mut obj) = response else {
        return Err(ProxyError::transport(peer, "response is not a JSON object"));
    };
    if let Some(error) = obj.remove("error").filter(|e| !e.is_null()) {
        let code = error.get("code").and_then(Value::as_i64).unwrap_or(-32603);
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .unwrap_or("unknown error")
            .to_string();
        return Err(ProxyError::Remote {
            peer: peer.to_string(),
            code,
            message,
        });
    }
    obj.remove("result")
        .ok_or_else(|| ProxyError::transport(peer, "response has neither result nor error"))
}

/// True when `message` is the response to request `id` (notifications and requests from
/// the peer carry a `method`).
pub(super) fn is_response_to(message: &Value, id: i64) -> bool {
    message.get("method").is_none() && message.get("id").and_then(Value::as_i64) == Some(id)
}
