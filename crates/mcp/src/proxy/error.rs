#![forbid(unsafe_code)]

use cg_core::peer_spec::PeerSpecError;

#[derive(Debug, thiserror::Error)]
pub(crate) enum ProxyError {
    #[error("{0}")]
    Validation(String),
    #[error("{0}")]
    UnknownPeerSpecification(String),
    #[error("{0}")]
    MalformedStdioSpecification(String),
    #[error("server '{peer}' has no usable connector: {reason}")]
    ConnectorUnavailable { peer: String, reason: String },
    #[error("transport error talking to '{peer}': {message}")]
    Transport { peer: String, message: String },
    #[error("server '{peer}' returned error {code}: {message}")]
    Remote {
        peer: String,
        code: i64,
        message: String,
    },
    #[error("call to '{peer}' timed out after {ms} ms")]
    Timeout { peer: String, ms: u128 },
}

impl ProxyError {
    pub(crate) fn transport(peer: &str, message: impl std::fmt::Display) -> Self {
        Self::Transport {
            peer: peer.to_string(),
            message: message.to_string(),
        }
    }
}

impl From<PeerSpecError> for ProxyError {
    fn from(err: PeerSpecError) -> Self {
        match err {
            PeerSpecError::Unknown { .. } => Self::UnknownPeerSpecification(err.to_string()),
            PeerSpecError::EmptyStdioCommand | PeerSpecError::Tokenize(_) => {
                Self::MalformedStdioSpecification(err.to_string())
            }
        }
    }
}
