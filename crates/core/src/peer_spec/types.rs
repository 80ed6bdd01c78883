#![forbid(unsafe_code)]

use super::{TokenizeError, tokenize};

pub const STDIO_PREFIX: &str = "stdio:";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PeerKind {
    Http,
    Stdio,
}

impl PeerKind {
    pub fn as_str(self) -> &'static str {
        match self {
            PeerKind::Http => "http",
            PeerKind::Stdio => "stdio",
        }
    }
}

/// A dynamically supplied peer, classified but not yet named.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerSpec {
    Http { url: String },
    Stdio { command: String, args: Vec<String> },
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PeerSpecError {
    Unknown { spec: String },
    EmptyStdioCommand,
    Tokenize(TokenizeError),
}

impl std::fmt::Display for PeerSpecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unknown { spec } => write!(
                f,
                "unknown server specification '{spec}': expected a configured server name, \
                 an http(s):// URL, or stdio:<command> [args...]"
            ),
            Self::EmptyStdioCommand => write!(f, "stdio server specification has no command"),
            Self::Tokenize(err) => write!(f, "malformed stdio server specification: {err}"),
        }
    }
}

impl std::error::Error for PeerSpecError {}

impl From<TokenizeError> for PeerSpecError {
    fn from(value: TokenizeError) -> Self {
        Self::Tokenize(value)
    }
}

pub fn is_http_url(raw: &str) -> bool {
    let has_prefix = |prefix: &str| {
        raw.get(..prefix.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(prefix))
    };
    has_prefix("http://") || has_prefix("https://")
}

impl PeerSpec {
    pub fn parse(raw: &str) -> Result<Self, PeerSpecError> {
        if is_http_url(raw) {
            return Ok(PeerSpec::Http {
                url: raw.to_string(),
            });
        }

        let Some(rest) = raw.strip_prefix(STDIO_PREFIX) else {
            return Err(PeerSpecError::Unknown {
                spec: raw.to_string(),
            });
        };
        if rest.trim().is_empty() {
            return Err(PeerSpecError::EmptyStdioCommand);
        }

        let mut tokens = tokenize(rest)?.into_iter();
        let command = match tokens.next() {
            Some(command) if !command.is_empty() => command,
            _ => return Err(PeerSpecError::EmptyStdioCommand),
        };
        Ok(PeerSpec::Stdio {
            command,
            args: tokens.collect(),
        })
    }

    pub fn kind(&self) -> PeerKind {
        match self {
            PeerSpec::Http { .. } => PeerKind::Http,
            PeerSpec::Stdio { .. } => PeerKind::Stdio,
        }
    }
}
