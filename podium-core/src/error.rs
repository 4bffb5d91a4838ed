//! Error types for podium-core.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::DeckName;

/// Errors raised by the deck store.
#[derive(Debug, Error)]
pub enum DeckStoreError {
    /// No deck is registered under the requested name.
    #[error("deck '{name}' not found")]
    NotFound { name: DeckName },

    /// The name cannot be used as a deck key (empty, path separators, leading dot).
    #[error("invalid deck name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    /// Underlying I/O failure, with the path it happened at.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// `dirs::home_dir()` returned `None`: cannot locate `~/.podium/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// Errors raised while loading or saving `config.yaml`.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// YAML serialization error (save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Malformed config on load: includes the file path.
    #[error("failed to parse config at {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,
}

/// A page number that is not a positive integer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid page number '{input}': expected a positive integer")]
pub struct InvalidPageNumber {
    pub input: String,
}

pub(crate) fn deck_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> DeckStoreError {
    DeckStoreError::Io {
        path: path.into(),
        source,
    }
}

pub(crate) fn config_io_err(path: impl Into<PathBuf>, source: std::io::Error) -> ConfigError {
    ConfigError::Io {
        path: path.into(),
        source,
    }
}
