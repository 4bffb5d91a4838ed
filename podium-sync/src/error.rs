//! Error types for podium-sync.

use std::path::PathBuf;

use thiserror::Error;

use podium_core::{DeckAddress, DeckName, DeckStoreError, InvalidPageNumber, PageNumber};

/// Failure while fetching or decoding a document.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("I/O error reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{address} is not a PDF document")]
    NotPdf { address: DeckAddress },

    #[error("{address} contains no pages")]
    Empty { address: DeckAddress },

    #[error("document transport failed: {0}")]
    Transport(String),
}

/// Failure talking to the shared state record.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChannelError {
    /// The record refused the write because the session holds no valid identity.
    #[error("not authorized to write shared state")]
    Unauthorized,

    #[error("write rejected: {0}")]
    Rejected(String),

    #[error("transport error: {0}")]
    Transport(String),

    #[error("channel closed")]
    Closed,
}

/// Misuse of the viewer contract.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ViewerError {
    #[error("viewer has no ready document")]
    NotReady,

    #[error("page {page} is outside 1..={pages_count}")]
    PageOutOfRange { page: PageNumber, pages_count: u32 },
}

/// All errors surfaced by the reconciliation engine and session.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Resolve failed: no deck registered under `name`.
    #[error("deck '{name}' not found")]
    DeckNotFound { name: DeckName },

    /// Fetch or decode failed; the last good document stays displayed.
    #[error("failed to load deck '{deck}': {source}")]
    LoadFailure {
        deck: DeckName,
        #[source]
        source: LoadError,
    },

    /// The shared record rejected a write. Local state is not rolled back.
    #[error("failed to publish state: {0}")]
    PublishFailure(#[source] ChannelError),

    #[error("failed to subscribe to shared state: {0}")]
    Subscribe(#[source] ChannelError),

    #[error(transparent)]
    InvalidPageNumber(#[from] InvalidPageNumber),

    #[error("no deck is selected")]
    NoDeckSelected,

    #[error("deck store error: {0}")]
    DeckStore(#[source] DeckStoreError),

    #[error("viewer error: {0}")]
    Viewer(#[from] ViewerError),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),
}

impl From<DeckStoreError> for SyncError {
    fn from(err: DeckStoreError) -> Self {
        match err {
            DeckStoreError::NotFound { name } => SyncError::DeckNotFound { name },
            other => SyncError::DeckStore(other),
        }
    }
}

/// Convenience constructor for [`LoadError::Io`].
pub(crate) fn load_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> LoadError {
    LoadError::Io {
        path: path.into(),
        source,
    }
}
