#![forbid(unsafe_code)]

use cg_core::peer_spec::PeerSpec;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const SERVERS_KEY: &str = "mcpServers";

/// How to reach a peer: an HTTP endpoint or a locally spawned process.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum PeerConfig {
    Http {
        url: String,
    },
    Stdio {
        command: String,
        #[serde(default)]
        args: Vec<String>,
    },
}

impl From<PeerSpec> for PeerConfig {
    fn from(spec: PeerSpec) -> Self {
        match spec {
            PeerSpec::Http { url } => PeerConfig::Http { url },
            PeerSpec::Stdio { command, args } => PeerConfig::Stdio { command, args },
        }
    }
}

pub(crate) type PeerSet = BTreeMap<String, PeerConfig>;

#[derive(Debug, thiserror::Error)]
pub(crate) enum PeersFileError {
    #[error("failed to read peers config {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("peers config {path} is not valid JSON: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("peers config {path}: {message}")]
    Invalid { path: PathBuf, message: String },
    #[error("failed to write peers config {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// The on-disk peer document. Top-level keys other than `mcpServers` are carried through
/// rewrites untouched.
#[derive(Clone, Debug)]
pub(crate) struct PeersFile {
    path: PathBuf,
    document: Map<String, Value>,
}

impl PeersFile {
    pub(crate) fn empty(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            document: Map::new(),
        }
    }

    pub(crate) fn path(&self) -> &Path {
        &self.path
    }

    /// A missing file is an empty peer set.
    pub(crate) fn load(path: impl Into<PathBuf>) -> Result<(Self, PeerSet), PeersFileError> {
        let path = path.into();
        let text = match std::fs::read_to_string(&path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "peers config not found; starting with no configured peers");
                return Ok((Self::empty(path), PeerSet::new()));
            }
            Err(source) => return Err(PeersFileError::Read { path, source }),
        };

        let value: Value = serde_json::from_str(&text).map_err(|source| PeersFileError::Parse {
            path: path.clone(),
            source,
        })?;
        let Value::Object(document) = value else {
            return Err(PeersFileError::Invalid {
                path,
                message: "top level must be an object".to_string(),
            });
        };

        let mut peers = PeerSet::new();
        match document.get(SERVERS_KEY) {
            None | Some(Value::Null) => {}
            Some(Value::Object(servers)) => {
                for (name, raw) in servers {
                    let config: PeerConfig =
                        serde_json::from_value(raw.clone()).map_err(|err| {
                            PeersFileError::Invalid {
                                path: path.clone(),
                                message: format!(
                                    "server '{name}' needs either url or command/args ({err})"
                                ),
                            }
                        })?;
                    peers.insert(name.clone(), config);
                }
            }
            Some(_) => {
                return Err(PeersFileError::Invalid {
                    path,
                    message: format!("{SERVERS_KEY} must be an object"),
                });
            }
        }

        Ok((Self { path, document }, peers))
    }

    /// Writes the full peer set through a sibling temp file and an atomic rename.
    pub(crate) fn write(&self, peers: &PeerSet) -> Result<(), PeersFileError> {
        let write_err = |source| PeersFileError::Write {
            path: self.path.clone(),
            source,
        };

        let mut document = self.document.clone();
        let servers = serde_json::to_value(peers)
            .map_err(|err| write_err(std::io::Error::other(err)))?;
        document.insert(SERVERS_KEY.to_string(), servers);
        let mut body = serde_json::to_vec_pretty(&Value::Object(document))
            .map_err(|err| write_err(std::io::Error::other(err)))?;
        body.push(b'\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(write_err)?;
        }
        let file_name = self
            .path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| "peers.json".to_string());
        let tmp = self
            .path
            .with_file_name(format!(".{file_name}.{}.tmp", std::process::id()));
        std::fs::write(&tmp, &body).map_err(write_err)?;
        if let Err(err) = std::fs::rename(&tmp, &self.path) {
            let _ = std::fs::remove_file(&tmp);
            return Err(write_err(err));
        }
        Ok(())
    }
}
