use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the relay runtime, its protocol and the socket client.
#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config error: {0}")]
    Config(#[from] podium_core::ConfigError),

    #[error("deck store error: {0}")]
    Decks(#[from] podium_core::DeckStoreError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("corrupt state file {path}: {source}")]
    CorruptState {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("daemon protocol error: {0}")]
    Protocol(String),

    #[error("not authorized")]
    Unauthorized,

    #[error("relay is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DaemonError {
    DaemonError::Io {
        path: path.into(),
        source,
    }
}
