use std::io;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Synchronous failures surfaced to callers
///
/// Peer-side faults never show up here; they only drive the receiver's
/// reconnect state machine.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to open listener on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("failed to spawn {name} thread: {source}")]
    Spawn {
        name: &'static str,
        #[source]
        source: io::Error,
    },

    #[error("failed to read config {path}: {source}")]
    ConfigIo {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config json: {0}")]
    ConfigParse(#[from] serde_json::Error),

    #[error("invalid config: {0}")]
    InvalidConfig(String),
}

impl RelayError {
    pub fn bind(addr: Option<SocketAddr>, source: io::Error) -> Self {
        let addr = match addr {
            Some(addr) => addr.to_string(),
            None => String::from("<transport>"),
        };
        RelayError::Bind { addr, source }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
