#![forbid(unsafe_code)]

use super::ProxyError;
use crate::config::{PeerConfig, PeerSet, PeersFile};
use cg_core::peer_spec::{PeerKind, PeerSpec};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

const NAME_DIGEST_HEX_CHARS: usize = 8;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct ResolvedPeer {
    pub(crate) name: String,
    pub(crate) config: PeerConfig,
}

/// Peers known by name: the configured set plus every peer registered at runtime.
#[derive(Debug, Default)]
pub(crate) struct PeerRegistry {
    peers: Mutex<PeerSet>,
}

impl PeerRegistry {
    pub(crate) fn new(peers: PeerSet) -> Self {
        Self {
            peers: Mutex::new(peers),
        }
    }

    pub(crate) fn get(&self, name: &str) -> Option<PeerConfig> {
        lock(&self.peers).get(name).cloned()
    }

    /// Returns `false` when `name` was already registered (the entry is left as is).
    pub(crate) fn register(&self, name: &str, config: PeerConfig) -> bool {
        let mut peers = lock(&self.peers);
        if peers.contains_key(name) {
            return false;
        }
        peers.insert(name.to_string(), config);
        true
    }

    pub(crate) fn snapshot(&self) -> PeerSet {
        lock(&self.peers).clone()
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.peers).len()
    }
}

/// Turns a caller-supplied server specification into a named peer.
///
/// Resolution is memoized per raw specification string for the life of the process, so
/// the same string always maps to the same name and config. New peers are registered in
/// the shared [`PeerRegistry`] and, when a [`PeersFile`] is attached, written through to
/// disk on a best-effort basis.
#[derive(Debug)]
pub(crate) struct PeerResolver {
    registry: Arc<PeerRegistry>,
    cache: Mutex<HashMap<String, ResolvedPeer>>,
    persistence: Option<PeersFile>,
    // Serializes file writes so a stale snapshot never lands after a newer one.
    persist_lock: tokio::sync::Mutex<()>,
}

impl PeerResolver {
    pub(crate) fn new(registry: Arc<PeerRegistry>, persistence: Option<PeersFile>) -> Self {
        Self {
            registry,
            cache: Mutex::new(HashMap::new()),
            persistence,
            persist_lock: tokio::sync::Mutex::new(()),
        }
    }

    pub(crate) fn registry(&self) -> &Arc<PeerRegistry> {
        &self.registry
    }

    pub(crate) async fn resolve(&self, spec: &str) -> Result<ResolvedPeer, ProxyError> {
        let (resolved, registered) = self.lookup_or_register(spec)?;
        if registered {
            tracing::info!(peer = %resolved.name, "registered peer");
            self.persist().await;
        }
        Ok(resolved)
    }

    /// Returns the peer and whether this call added it to the registry.
    fn lookup_or_register(&self, spec: &str) -> Result<(ResolvedPeer, bool), ProxyError> {
        if let Some(config) = self.registry.get(spec) {
            let peer = ResolvedPeer {
                name: spec.to_string(),
                config,
            };
            return Ok((peer, false));
        }

        let mut cache = lock(&self.cache);
        if let Some(hit) = cache.get(spec) {
            return Ok((hit.clone(), false));
        }

        let parsed = PeerSpec::parse(spec)?;
        let name = generated_name(parsed.kind(), spec);
        let resolved = ResolvedPeer {
            name,
            config: PeerConfig::from(parsed),
        };

        let registered = self
            .registry
            .register(&resolved.name, resolved.config.clone());
        cache.insert(spec.to_string(), resolved.clone());
        Ok((resolved, registered))
    }

    /// Best-effort write of the whole registry, done on the blocking pool.
    async fn persist(&self) {
        let Some(file) = &self.persistence else {
            return;
        };
        let _guard = self.persist_lock.lock().await;
        let file = file.clone();
        let peers = self.registry.snapshot();
        let written = tokio::task::spawn_blocking(move || {
            let result = file.write(&peers);
            (file, result)
        })
        .await;
        match written {
            Ok((file, Ok(()))) => tracing::debug!(path = %file.path().display(), "persisted peers"),
            Ok((_, Err(err))) => {
                tracing::warn!(error = %err, "failed to persist peers; keeping them in memory")
            }
            Err(err) => tracing::warn!(error = %err, "peers writer task failed"),
        }
    }
}

/// `<kind>-<first 8 hex chars of sha256(spec)>`.
pub(crate) fn generated_name(kind: PeerKind, spec: &str) -> String {
    let digest = Sha256::digest(spec.as_bytes());
    let mut hex = String::with_capacity(NAME_DIGEST_HEX_CHARS);
    for byte in digest.iter().take(NAME_DIGEST_HEX_CHARS / 2) {
        hex.push_str(&format!("{byte:02x}"));
    }
    format!("{}-{hex}", kind.as_str())
}
