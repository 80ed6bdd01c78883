#![forbid(unsafe_code)]

use super::ProxyError;
use super::connector::{
    PeerConnector, initialize_params, is_response_to, rpc_result, tools_call_params,
};
use crate::support::{json_rpc_notification, json_rpc_request};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;

const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(30);

struct StdioLink {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    next_id: i64,
}

impl StdioLink {
    fn spawn(peer: &str, command: &str, args: &[String]) -> Result<Self, ProxyError> {
        let unavailable = |reason: String| ProxyError::ConnectorUnavailable {
            peer: peer.to_string(),
            reason,
        };
        let mut child = Command::new(command)
            .args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| unavailable(format!("failed to start '{command}': {e}")))?;
        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| unavailable("child stdin unavailable".to_string()))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| unavailable("child stdout unavailable".to_string()))?;
        Ok(Self {
            child,
            stdin,
            stdout: BufReader::new(stdout),
            next_id: 1,
        })
    }

    fn is_alive(&mut self) -> bool {
        matches!(self.child.try_wait(), Ok(None))
    }

    async fn send(&mut self, peer: &str, message: &Value) -> Result<(), ProxyError> {
        let mut line =
            serde_json::to_vec(message).map_err(|e| ProxyError::transport(peer, e))?;
        line.push(b'\n');
        self.stdin
            .write_all(&line)
            .await
            .map_err(|e| ProxyError::transport(peer, format!("write failed: {e}")))?;
        self.stdin
            .flush()
            .await
            .map_err(|e| ProxyError::transport(peer, format!("flush failed: {e}")))
    }

    async fn request(&mut self, peer: &str, method: &str, params: Value) -> Result<Value, ProxyError> {
        let id = self.next_id;
        self.next_id += 1;
        self.send(peer, &json_rpc_request(id, method, params)).await?;

        loop {
            let mut line = String::new();
            let read = self
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| ProxyError::transport(peer, format!("read failed: {e}")))?;
            if read == 0 {
                return Err(ProxyError::transport(peer, "peer closed its stdout"));
            }
            let raw = line.trim();
            if raw.is_empty() {
                continue;
            }
            let message: Value = match serde_json::from_str(raw) {
                Ok(message) => message,
                Err(err) => {
                    tracing::debug!(peer, error = %err, "skipping non-JSON line from peer");
                    continue;
                }
            };
            if is_response_to(&message, id) {
                return rpc_result(peer, message);
            }
        }
    }

    async fn handshake(&mut self, peer: &str) -> Result<(), ProxyError> {
        self.request(peer, "initialize", initialize_params()).await?;
        self.send(peer, &json_rpc_notification("notifications/initialized", json!({})))
            .await
    }
}

/// Peer reached by spawning `command args...` and speaking newline-delimited JSON-RPC over
/// its stdin/stdout.
pub(crate) struct StdioConnector {
    peer: String,
    command: String,
    args: Vec<String>,
    link: Mutex<Option<StdioLink>>,
    connected: AtomicBool,
}

impl StdioConnector {
    pub(crate) fn new(peer: &str, command: &str, args: &[String]) -> Self {
        Self {
            peer: peer.to_string(),
            command: command.to_string(),
            args: args.to_vec(),
            link: Mutex::new(None),
            connected: AtomicBool::new(false),
        }
    }

    fn mark_disconnected(&self, link: &mut Option<StdioLink>) {
        self.connected.store(false, Ordering::SeqCst);
        link.take();
    }
}

#[async_trait]
impl PeerConnector for StdioConnector {
    async fn initialize(&self) -> Result<(), ProxyError> {
        let mut guard = self.link.lock().await;
        if let Some(link) = guard.as_mut() {
            if self.connected.load(Ordering::SeqCst) && link.is_alive() {
                return Ok(());
            }
            tracing::info!(peer = %self.peer, "stdio peer went away; restarting");
        }
        self.mark_disconnected(&mut guard);

        let mut link = StdioLink::spawn(&self.peer, &self.command, &self.args)?;
        match tokio::time::timeout(HANDSHAKE_TIMEOUT, link.handshake(&self.peer)).await {
            Ok(Ok(())) => {}
            Ok(Err(err)) => return Err(err),
            Err(_) => {
                return Err(ProxyError::Timeout {
                    peer: self.peer.clone(),
                    ms: HANDSHAKE_TIMEOUT.as_millis(),
                });
            }
        }
        *guard = Some(link);
        self.connected.store(true, Ordering::SeqCst);
        tracing::info!(peer = %self.peer, command = %self.command, "stdio session initialized");
        Ok(())
    }

    async fn call_tool(
        &self,
        tool: &str,
        args: Value,
        timeout: Duration,
    ) -> Result<Value, ProxyError> {
        let mut guard = self.link.lock().await;
        let Some(link) = guard.as_mut() else {
            return Err(ProxyError::ConnectorUnavailable {
                peer: self.peer.clone(),
                reason: "session is not initialized".to_string(),
            });
        };

        let call = link.request(&self.peer, "tools/call", tools_call_params(tool, args));
        match tokio::time::timeout(timeout, call).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(err @ ProxyError::Remote { .. })) => Err(err),
            Ok(Err(err)) => {
                self.mark_disconnected(&mut guard);
                Err(err)
            }
            Err(_) => {
                // The reply may still arrive; a fresh process keeps request ids in step.
                self.mark_disconnected(&mut guard);
                Err(ProxyError::Timeout {
                    peer: self.peer.clone(),
                    ms: timeout.as_millis(),
                })
            }
        }
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    async fn close(&self) -> Result<(), ProxyError> {
        let mut guard = self.link.lock().await;
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut link) = guard.take() {
            drop(link.stdin);
            if let Err(err) = link.child.kill().await {
                return Err(ProxyError::transport(&self.peer, format!("kill failed: {err}")));
            }
        }
        Ok(())
    }
}
