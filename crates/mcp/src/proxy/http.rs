#![forbid(unsafe_code)]

use super::ProxyError;
use super::connector::{
    PeerConnector, initialize_params, is_response_to, rpc_result, tools_call_params,
};
use crate::support::{json_rpc_notification, json_rpc_request};
use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use serde_json::{Value, json};
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;

const SESSION_HEADER: &str = "mcp-session-id";
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

/// `data:` payloads of a `text/event-stream` body, one entry per event. Multi-line data is
/// joined with `\n`; comments and other fields are ignored.
pub(super) fn parse_sse_data(body: &str) -> Vec<String> {
    let mut events = Vec::new();
    let normalized = body.replace("\r\n", "\n");
    for raw_event in normalized.split("\n\n") {
        let mut data: Option<String> = None;
        for line in raw_event.lines() {
            if line.starts_with(':') {
                continue;
            }
            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            if field != "data" {
                continue;
            }
            match data.as_mut() {
                Some(buf) => {
                    buf.push('\n');
                    buf.push_str(value);
                }
                None => data = Some(value.to_string()),
            }
        }
        if let Some(data) = data.filter(|d| !d.is_empty()) {
            events.push(data);
        }
    }
    events
}

/// Peer reached over MCP streamable HTTP: JSON-RPC POSTed to the configured URL, replies as
/// a JSON body or an SSE stream, session carried in `Mcp-Session-Id`.
pub(crate) struct HttpConnector {
    peer: String,
    url: String,
    client: reqwest::Client,
    session_id: Mutex<Option<String>>,
    handshake: Mutex<()>,
    next_id: AtomicI64,
    connected: AtomicBool,
}

impl HttpConnector {
    pub(crate) fn new(peer: &str, url: &str) -> Result<Self, ProxyError> {
        let client = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .map_err(|e| ProxyError::ConnectorUnavailable {
                peer: peer.to_string(),
                reason: format!("failed to build HTTP client: {e}"),
            })?;
        Ok(Self {
            peer: peer.to_string(),
            url: url.to_string(),
            client,
            session_id: Mutex::new(None),
            handshake: Mutex::new(()),
            next_id: AtomicI64::new(1),
            connected: AtomicBool::new(false),
        })
    }

    async fn headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );
        if let Some(session) = self.session_id.lock().await.as_deref()
            && let Ok(value) = HeaderValue::from_str(session)
        {
            headers.insert(SESSION_HEADER, value);
        }
        headers
    }

    async fn capture_session_id(&self, headers: &HeaderMap) {
        if let Some(value) = headers.get(SESSION_HEADER).and_then(|v| v.to_str().ok()) {
            let mut session = self.session_id.lock().await;
            if session.as_deref() != Some(value) {
                tracing::debug!(peer = %self.peer, "captured MCP session id");
                *session = Some(value.to_string());
            }
        }
    }

    fn transport_error(&self, err: reqwest::Error, timeout: Duration) -> ProxyError {
        if err.is_timeout() {
            return ProxyError::Timeout {
                peer: self.peer.clone(),
                ms: timeout.as_millis(),
            };
        }
        self.connected.store(false, Ordering::SeqCst);
        ProxyError::transport(&self.peer, err)
    }

    /// POSTs one message. Returns the matching response for requests, `None` for
    /// notifications.
    async fn post(
        &self,
        message: &Value,
        expect_id: Option<i64>,
        timeout: Duration,
    ) -> Result<Option<Value>, ProxyError> {
        let response = self
            .client
            .post(&self.url)
            .headers(self.headers().await)
            .timeout(timeout)
            .json(message)
            .send()
            .await
            .map_err(|e| self.transport_error(e, timeout))?;
        self.capture_session_id(response.headers()).await;

        let status = response.status();
        if !status.is_success() {
            if status == reqwest::StatusCode::NOT_FOUND && self.session_id.lock().await.is_some() {
                // Expired session: start over on the next call.
                self.session_id.lock().await.take();
                self.connected.store(false, Ordering::SeqCst);
            }
            return Err(ProxyError::transport(
                &self.peer,
                format!("HTTP status {status}"),
            ));
        }
        let Some(id) = expect_id else {
            return Ok(None);
        };

        let is_sse = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.contains("text/event-stream"));
        let body = response
            .text()
            .await
            .map_err(|e| self.transport_error(e, timeout))?;

        if is_sse {
            for data in parse_sse_data(&body) {
                match serde_json::from_str::<Value>(&data) {
                    Ok(message) if is_response_to(&message, id) => return Ok(Some(message)),
                    Ok(_) => {}
                    Err(err) => {
                        tracing::debug!(peer = %self.peer, error = %err, "skipping non-JSON SSE event")
                    }
                }
            }
            return Err(ProxyError::transport(
                &self.peer,
                "event stream ended without a response",
            ));
        }

        serde_json::from_str::<Value>(&body)
            .map(Some)
            .map_err(|e| ProxyError::transport(&self.peer, format!("invalid JSON response: {e}")))
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> Result<Value, ProxyError> {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let response = self
            .post(&json_rpc_request(id, method, params), Some(id), timeout)
            .await?
            .ok_or_else(|| ProxyError::transport(&self.peer, "missing response"))?;
        rpc_result(&self.peer, response)
    }
}

#[async_trait]
impl PeerConnector for HttpConnector {
    async fn initialize(&self) -> Result<(), ProxyError> {
        let _handshake = self.handshake.lock().await;
        if self.is_connected() {
            return Ok(());
        }
        self.session_id.lock().await.take();
        self.request("initialize", initialize_params(), HANDSHAKE_TIMEOUT)
            .await?;
        self.post(
            &json_rpc_notification("notifications/initialized", json!({})),
            None,
            HANDSHAKE_TIMEOUT,
        )
        .await?;
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(peer = %self.peer, url = %self.url, "http session initialized");
        Ok(())
    }

    async fn call_tool(
        &self,
        tool: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value, ProxyError> {
        self.request("tools/call", tools_call_params(tool, args), timeout)
            .await
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), ProxyError> {
        self.connected.store(false, Ordering::SeqCst);
        let Some(session) = self.session_id.lock().await.take() else {
            return Ok(());
        };
        let Ok(value) = HeaderValue::from_str(&session) else {
            return Ok(());
        };
        // Servers that keep no session state answer 405; either way the session is gone.
        let _ = self
            .client
            .delete(&self.url)
            .header(SESSION_HEADER, value)
            .timeout(Duration::from_secs(2))
            .send()
            .await;
        Ok(())
    }
}
