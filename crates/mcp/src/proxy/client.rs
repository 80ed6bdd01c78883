#![forbid(unsafe_code)]

use super::{ConnectorFactory, PeerConnector, PeerResolver, ProxyError};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct CallOptions {
    pub(crate) timeout: Option<Duration>,
}

/// Owns one session per resolved peer name and forwards tool calls to it.
///
/// Sessions are created lazily on first use and re-initialized in place when their
/// connector reports a lost link. Two concurrent first calls to a new peer may both run the
/// handshake; connectors make that idempotent.
pub(crate) struct ProxyClient {
    resolver: PeerResolver,
    factory: Arc<dyn ConnectorFactory>,
    sessions: Mutex<HashMap<String, Arc<dyn PeerConnector>>>,
    default_timeout: Duration,
}

impl ProxyClient {
    pub(crate) fn new(
        resolver: PeerResolver,
        factory: Arc<dyn ConnectorFactory>,
        default_timeout: Duration,
    ) -> Self {
        Self {
            resolver,
            factory,
            sessions: Mutex::new(HashMap::new()),
            default_timeout,
        }
    }

    pub(crate) fn resolver(&self) -> &PeerResolver {
        &self.resolver
    }

    pub(crate) async fn session_count(&self) -> usize {
        self.sessions.lock().await.len()
    }

    /// Live session for `name`, created or re-initialized as needed.
    pub(crate) async fn ensure_session(
        &self,
        name: &str,
    ) -> Result<Arc<dyn PeerConnector>, ProxyError> {
        let (connector, created) = {
            let mut sessions = self.sessions.lock().await;
            match sessions.get(name) {
                Some(existing) => (Arc::clone(existing), false),
                None => {
                    let config = self.resolver.registry().get(name).ok_or_else(|| {
                        ProxyError::ConnectorUnavailable {
                            peer: name.to_string(),
                            reason: "no such server is registered".to_string(),
                        }
                    })?;
                    let connector = self.factory.connect(name, &config)?;
                    sessions.insert(name.to_string(), Arc::clone(&connector));
                    (connector, true)
                }
            }
        };

        if created {
            tracing::info!(peer = name, "creating session");
            connector.initialize().await?;
        } else if !connector.is_connected() {
            tracing::info!(peer = name, "session disconnected; reinitializing");
            connector.initialize().await?;
        }
        Ok(connector)
    }

    /// Resolves `server`, makes sure its session is live and issues `tools/call`, returning
    /// the peer's raw result.
    pub(crate) async fn forward(
        &self,
        server: &str,
        tool: &str,
        args: Value,
        options: CallOptions,
    ) -> Result<Value, ProxyError> {
        if server.trim().is_empty() {
            return Err(ProxyError::Validation("server is required".to_string()));
        }
        if tool.trim().is_empty() {
            return Err(ProxyError::Validation("tool is required".to_string()));
        }

        let peer = self.resolver.resolve(server).await?;
        let connector = self.ensure_session(&peer.name).await?;
        connector.initialize().await?;

        let timeout = options.timeout.unwrap_or(self.default_timeout);
        tracing::debug!(peer = %peer.name, tool, "forwarding tool call");
        connector.call_tool(tool, args, timeout).await
    }

    /// Closes every session. Failures are logged; every session is attempted.
    pub(crate) async fn close_all(&self) {
        let sessions: Vec<(String, Arc<dyn PeerConnector>)> =
            self.sessions.lock().await.drain().collect();
        for (name, connector) in sessions {
            match connector.close().await {
                Ok(()) => tracing::debug!(peer = %name, "session closed"),
                Err(err) => tracing::warn!(peer = %name, error = %err, "failed to close session"),
            }
        }
    }
}
