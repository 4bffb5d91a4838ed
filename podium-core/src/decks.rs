//! Filesystem deck store.
//!
//! # Storage layout
//!
//! ```text
//! ~/.podium/
//!   decks/                  (mode 0700, created on first upload)
//!     <deck_name>.pdf       (one file per deck, mode 0600)
//! ```
//!
//! # API pattern
//!
//! Every operation has two forms:
//! - `fn_at(home: &Path, …)`: explicit home; used in tests with `TempDir`
//! - `fn(…)`: derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Uploads are atomic: the document is copied to a `.pdf.tmp` sibling and
//! renamed over the target, so a name that resolves keeps resolving to a
//! complete document until it is explicitly removed.

use std::fs::{self, ReadDir};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use sha2::{Digest, Sha256};

use crate::config::podium_root;
use crate::error::{deck_io_err, DeckStoreError};
use crate::types::{DeckAddress, DeckName, DeckRecord};

pub const DECK_EXTENSION: &str = "pdf";

/// Name → address resolution and enumeration of available decks.
pub trait DeckLocator: Send + Sync {
    type Names: Iterator<Item = DeckName>;

    /// Resolve a deck by name. Fails with [`DeckStoreError::NotFound`].
    fn resolve(&self, name: &DeckName) -> Result<DeckRecord, DeckStoreError>;

    /// Enumerate deck names as the registry stands right now. Each call
    /// re-queries; nothing is cached between calls.
    fn list(&self) -> Result<Self::Names, DeckStoreError>;
}

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.podium/decks/`: pure, no I/O.
pub fn decks_dir_at(home: &Path) -> PathBuf {
    podium_root(home).join("decks")
}

/// `<home>/.podium/decks/<name>.pdf`: pure, no I/O.
pub fn deck_path_at(home: &Path, name: &DeckName) -> PathBuf {
    decks_dir_at(home).join(format!("{}.{DECK_EXTENSION}", name.0))
}

/// Reject names that cannot be stored as a single file in the decks directory.
pub fn validate_name(name: &str) -> Result<(), DeckStoreError> {
    let invalid = |reason| DeckStoreError::InvalidName {
        name: name.to_owned(),
        reason,
    };
    if name.trim().is_empty() {
        return Err(invalid("name is empty"));
    }
    if name.starts_with('.') {
        return Err(invalid("name must not start with '.'"));
    }
    if name.contains(['/', '\\']) || name.contains('\0') {
        return Err(invalid("name must not contain path separators"));
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// 2. Store
// ---------------------------------------------------------------------------

/// Deck store rooted at `<home>/.podium/decks/`.
#[derive(Debug, Clone)]
pub struct FsDeckStore {
    dir: PathBuf,
}

impl FsDeckStore {
    pub fn at(home: &Path) -> Self {
        Self {
            dir: decks_dir_at(home),
        }
    }

    /// `at` convenience wrapper.
    pub fn open() -> Result<Self, DeckStoreError> {
        Ok(Self::at(&home()?))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn path_for(&self, name: &DeckName) -> PathBuf {
        self.dir.join(format!("{}.{DECK_EXTENSION}", name.0))
    }

    /// Store the document at `source` under `name`, replacing any previous deck.
    pub fn upload(&self, name: &DeckName, source: &Path) -> Result<DeckRecord, DeckStoreError> {
        let bytes = fs::read(source).map_err(|e| deck_io_err(source, e))?;
        self.upload_bytes(name, &bytes)
    }

    /// Store raw document bytes under `name` (atomic replace).
    pub fn upload_bytes(&self, name: &DeckName, bytes: &[u8]) -> Result<DeckRecord, DeckStoreError> {
        validate_name(&name.0)?;
        ensure_dir(&self.dir)?;

        let path = self.path_for(name);
        let tmp = path.with_file_name(format!("{}.{DECK_EXTENSION}.tmp", name.0));
        fs::write(&tmp, bytes).map_err(|e| deck_io_err(&tmp, e))?;
        set_file_permissions(&tmp)?;
        if let Err(e) = fs::rename(&tmp, &path) {
            let _ = fs::remove_file(&tmp);
            return Err(deck_io_err(&path, e));
        }
        let mut record = self.resolve(name)?;
        record.sha256 = Some(digest(bytes));
        Ok(record)
    }

    /// [`DeckLocator::resolve`] plus the content digest. Reads the whole file.
    pub fn inspect(&self, name: &DeckName) -> Result<DeckRecord, DeckStoreError> {
        let mut record = self.resolve(name)?;
        let path = record.address.as_path();
        let bytes = fs::read(&path).map_err(|e| deck_io_err(&path, e))?;
        record.sha256 = Some(digest(&bytes));
        Ok(record)
    }

    /// Delete the deck stored under `name`.
    pub fn remove(&self, name: &DeckName) -> Result<(), DeckStoreError> {
        validate_name(&name.0)?;
        let path = self.path_for(name);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Err(DeckStoreError::NotFound {
                name: name.clone(),
            }),
            Err(err) => Err(deck_io_err(&path, err)),
        }
    }
}

impl DeckLocator for FsDeckStore {
    type Names = DeckNames;

    fn resolve(&self, name: &DeckName) -> Result<DeckRecord, DeckStoreError> {
        validate_name(&name.0)?;
        let path = self.path_for(name);
        let meta = match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => meta,
            Ok(_) => {
                return Err(DeckStoreError::NotFound { name: name.clone() });
            }
            Err(err) if err.kind() == ErrorKind::NotFound => {
                return Err(DeckStoreError::NotFound { name: name.clone() });
            }
            Err(err) => return Err(deck_io_err(&path, err)),
        };
        let stored_at = meta
            .modified()
            .map(DateTime::<Utc>::from)
            .unwrap_or_else(|_| Utc::now());

        Ok(DeckRecord {
            name: name.clone(),
            address: DeckAddress::from_path(&path),
            size_bytes: meta.len(),
            sha256: None,
            stored_at,
        })
    }

    fn list(&self) -> Result<DeckNames, DeckStoreError> {
        match fs::read_dir(&self.dir) {
            Ok(entries) => Ok(DeckNames {
                entries: Some(entries),
            }),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(DeckNames { entries: None }),
            Err(err) => Err(deck_io_err(&self.dir, err)),
        }
    }
}

/// Lazy walk over `decks/*.pdf`. Unreadable entries and temp files are skipped.
#[derive(Debug)]
pub struct DeckNames {
    entries: Option<ReadDir>,
}

impl Iterator for DeckNames {
    type Item = DeckName;

    fn next(&mut self) -> Option<DeckName> {
        let entries = self.entries.as_mut()?;
        for entry in entries.by_ref() {
            let Ok(entry) = entry else { continue };
            if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                continue;
            }
            let path = entry.path();
            let is_deck = path
                .extension()
                .and_then(|ext| ext.to_str())
                .map(|ext| ext.eq_ignore_ascii_case(DECK_EXTENSION))
                .unwrap_or(false);
            if !is_deck {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if validate_name(stem).is_err() {
                continue;
            }
            return Some(DeckName::from(stem));
        }
        None
    }
}

// ---------------------------------------------------------------------------
// 3. Convenience wrappers
// ---------------------------------------------------------------------------

/// Sorted deck names under `<home>/.podium/decks/`.
pub fn list_names_at(home: &Path) -> Result<Vec<DeckName>, DeckStoreError> {
    let mut names: Vec<DeckName> = FsDeckStore::at(home).list()?.collect();
    names.sort();
    Ok(names)
}

/// `list_names_at` convenience wrapper.
pub fn list_names() -> Result<Vec<DeckName>, DeckStoreError> {
    list_names_at(&home()?)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn digest(bytes: &[u8]) -> String {
    let mut h = Sha256::new();
    h.update(bytes);
    hex::encode(h.finalize())
}

fn home() -> Result<PathBuf, DeckStoreError> {
    dirs::home_dir().ok_or(DeckStoreError::HomeNotFound)
}

fn ensure_dir(dir: &Path) -> Result<(), DeckStoreError> {
    if !dir.exists() {
        fs::create_dir_all(dir).map_err(|e| deck_io_err(dir, e))?;
        set_dir_permissions(dir)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), DeckStoreError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o700)).map_err(|e| deck_io_err(path, e))
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), DeckStoreError> {
    Ok(())
}

#[cfg(unix)]
fn set_file_permissions(path: &Path) -> Result<(), DeckStoreError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| deck_io_err(path, e))
}
#[cfg(not(unix))]
fn set_file_permissions(_path: &Path) -> Result<(), DeckStoreError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
