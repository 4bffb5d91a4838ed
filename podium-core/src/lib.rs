//! Podium core library: shared presentation state, deck store, config, errors.
//!
//! - [`types`]: deck names, page numbers, the shared state record and patches
//! - [`error`]: [`DeckStoreError`], [`ConfigError`], [`InvalidPageNumber`]
//! - [`decks`]: filesystem deck store and the [`DeckLocator`] seam
//! - [`config`]: `~/.podium/config.yaml` and presenter accounts

pub mod config;
pub mod decks;
pub mod error;
pub mod types;

pub use config::{PodiumConfig, PresenterAccount, RelaySettings, ViewerSettings};
pub use decks::{DeckLocator, FsDeckStore};
pub use error::{ConfigError, DeckStoreError, InvalidPageNumber};
pub use types::{
    DeckAddress, DeckName, DeckRecord, Identity, PageMap, PageNumber, SharedPresentationState,
    StatePatch,
};
