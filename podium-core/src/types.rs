//! Domain types for the shared presentation record.
//!
//! The wire form of [`SharedPresentationState`] uses the per-deck page map:
//!
//! ```json
//! { "currentDeck": "intro", "currentPageNumber": { "intro": 3, "q3-review": 12 } }
//! ```
//!
//! Records written by older presenters carry a bare integer (or numeric
//! string) in `currentPageNumber`; those are read as a single entry for the
//! current deck and always written back in map form.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvalidPageNumber;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// Symbolic name of a deck (`intro`, `q3-review`, ...).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeckName(pub String);

impl DeckName {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for DeckName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for DeckName {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for DeckName {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A 1-based page number. Always positive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "u32")]
pub struct PageNumber(u32);

impl PageNumber {
    pub const FIRST: PageNumber = PageNumber(1);

    /// Validate raw input. Zero, negatives and values past `u32::MAX` are rejected.
    pub fn new(value: i64) -> Result<Self, InvalidPageNumber> {
        u32::try_from(value)
            .ok()
            .filter(|v| *v >= 1)
            .map(Self)
            .ok_or_else(|| InvalidPageNumber {
                input: value.to_string(),
            })
    }

    pub fn get(self) -> u32 {
        self.0
    }

    /// Clamp into `[1, pages_count]`. A zero page count is treated as one page.
    pub fn clamp_to(self, pages_count: u32) -> PageNumber {
        Self(self.0.min(pages_count.max(1)))
    }

    /// The following page, clamped to `pages_count`.
    pub fn next(self, pages_count: u32) -> PageNumber {
        Self(self.0.saturating_add(1)).clamp_to(pages_count)
    }

    /// The preceding page, never below 1.
    pub fn previous(self) -> PageNumber {
        Self(self.0.saturating_sub(1).max(1))
    }
}

impl TryFrom<i64> for PageNumber {
    type Error = InvalidPageNumber;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PageNumber> for u32 {
    fn from(p: PageNumber) -> Self {
        p.0
    }
}

impl FromStr for PageNumber {
    type Err = InvalidPageNumber;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let value: i64 = s.trim().parse().map_err(|_| InvalidPageNumber {
            input: s.to_owned(),
        })?;
        Self::new(value).map_err(|_| InvalidPageNumber {
            input: s.to_owned(),
        })
    }
}

impl fmt::Display for PageNumber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Per-deck page positions.
pub type PageMap = BTreeMap<DeckName, PageNumber>;

/// Opaque locator for a stored deck. The filesystem store uses absolute paths.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeckAddress(pub String);

impl DeckAddress {
    pub fn from_path(path: &Path) -> Self {
        Self(path.to_string_lossy().into_owned())
    }

    pub fn as_path(&self) -> PathBuf {
        PathBuf::from(&self.0)
    }
}

impl fmt::Display for DeckAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// An authenticated presenter. Only its presence matters for write permission.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub user: String,
}

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.user.fmt(f)
    }
}

// ---------------------------------------------------------------------------
// Deck records
// ---------------------------------------------------------------------------

/// A stored deck. Immutable; replacing a deck produces a new record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeckRecord {
    pub name: DeckName,
    pub address: DeckAddress,
    pub size_bytes: u64,
    /// Hex SHA-256 of the stored document. `None` when the record came from
    /// a metadata-only lookup.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    pub stored_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Shared state record
// ---------------------------------------------------------------------------

/// The single record every client observes and the presenter writes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", from = "StateCompat")]
pub struct SharedPresentationState {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub current_deck: Option<DeckName>,
    pub current_page_number: PageMap,
}

impl SharedPresentationState {
    pub fn new(deck: impl Into<DeckName>, page: PageNumber) -> Self {
        let deck = deck.into();
        let mut pages = PageMap::new();
        pages.insert(deck.clone(), page);
        Self {
            current_deck: Some(deck),
            current_page_number: pages,
        }
    }

    /// Recorded page for `deck`, if any.
    pub fn recorded_page(&self, deck: &DeckName) -> Option<PageNumber> {
        self.current_page_number.get(deck).copied()
    }

    /// Page for `deck`, defaulting to the first page.
    pub fn page_for(&self, deck: &DeckName) -> PageNumber {
        self.recorded_page(deck).unwrap_or(PageNumber::FIRST)
    }

    /// Page of the current deck, `None` when no deck is selected.
    pub fn active_page(&self) -> Option<PageNumber> {
        self.current_deck.as_ref().map(|deck| self.page_for(deck))
    }

    /// Merge a partial write. Fields absent from the patch are left untouched.
    pub fn apply(&mut self, patch: &StatePatch) {
        if let Some(deck) = &patch.current_deck {
            self.current_deck = Some(deck.clone());
        }
        for (deck, page) in &patch.current_page_number {
            self.current_page_number.insert(deck.clone(), *page);
        }
    }
}

/// A partial write to the shared record.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatePatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_deck: Option<DeckName>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub current_page_number: PageMap,
}

impl StatePatch {
    pub fn is_empty(&self) -> bool {
        self.current_deck.is_none() && self.current_page_number.is_empty()
    }

    pub fn with_deck(mut self, deck: DeckName) -> Self {
        self.current_deck = Some(deck);
        self
    }

    pub fn with_page(mut self, deck: DeckName, page: PageNumber) -> Self {
        self.current_page_number.insert(deck, page);
        self
    }

    /// The fields of `target` that differ from `base`.
    ///
    /// A patch cannot clear the current deck, so `target` without a deck
    /// yields no deck field.
    pub fn between(base: &SharedPresentationState, target: &SharedPresentationState) -> Self {
        let current_deck = match &target.current_deck {
            Some(deck) if base.current_deck.as_ref() != Some(deck) => Some(deck.clone()),
            _ => None,
        };
        let current_page_number = target
            .current_page_number
            .iter()
            .filter(|(deck, page)| base.current_page_number.get(*deck) != Some(*page))
            .map(|(deck, page)| (deck.clone(), *page))
            .collect();
        Self {
            current_deck,
            current_page_number,
        }
    }
}

// ---------------------------------------------------------------------------
// Lenient read form
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct StateCompat {
    #[serde(default)]
    current_deck: Option<DeckName>,
    #[serde(default)]
    current_page_number: Option<PagesCompat>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum PagesCompat {
    PerDeck(BTreeMap<DeckName, RawPage>),
    Legacy(RawPage),
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum RawPage {
    Number(f64),
    Text(String),
}

impl RawPage {
    /// Integer part of the value, clamped to at least 1. Unparseable text is dropped.
    fn sanitize(self) -> Option<PageNumber> {
        let value = match self {
            RawPage::Number(n) if n.is_finite() => n.trunc() as i64,
            RawPage::Number(_) => return None,
            RawPage::Text(s) => {
                let digits: String = s
                    .trim()
                    .chars()
                    .enumerate()
                    .take_while(|(i, c)| c.is_ascii_digit() || (*i == 0 && *c == '-'))
                    .map(|(_, c)| c)
                    .collect();
                digits.parse::<i64>().ok()?
            }
        };
        Some(PageNumber::new(value).unwrap_or(PageNumber::FIRST))
    }
}

impl From<StateCompat> for SharedPresentationState {
    fn from(compat: StateCompat) -> Self {
        let current_page_number = match compat.current_page_number {
            Some(PagesCompat::PerDeck(pages)) => pages
                .into_iter()
                .filter_map(|(deck, raw)| raw.sanitize().map(|page| (deck, page)))
                .collect(),
            Some(PagesCompat::Legacy(raw)) => match (&compat.current_deck, raw.sanitize()) {
                (Some(deck), Some(page)) => [(deck.clone(), page)].into_iter().collect(),
                _ => PageMap::new(),
            },
            None => PageMap::new(),
        };
        Self {
            current_deck: compat.current_deck,
            current_page_number,
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
