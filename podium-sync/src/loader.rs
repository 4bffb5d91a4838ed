//! Document loading.
//!
//! [`PdfLoader`] is a stand-in for a real rendering backend: it reads the file
//! behind a [`DeckAddress`], checks the `%PDF-` header and counts page objects
//! (`/Type /Page`, not `/Pages`). When page objects live in compressed object
//! streams the largest `/Count` in the file is used instead.

use std::future::Future;
use std::sync::Arc;

use podium_core::DeckAddress;

use crate::error::{load_io_err, LoadError};

/// A fetched document, ready to hand to a viewer.
#[derive(Debug, Clone)]
pub struct Document {
    pub address: DeckAddress,
    pub pages_count: u32,
    pub bytes: Arc<[u8]>,
}

pub trait DocumentLoader: Send + Sync + 'static {
    /// Fetch and decode the document at `address`. Failures are reported
    /// through the returned future, never by panicking.
    fn load(&self, address: &DeckAddress) -> impl Future<Output = Result<Document, LoadError>> + Send;
}

/// Loads PDF files from the local filesystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct PdfLoader;

impl DocumentLoader for PdfLoader {
    fn load(&self, address: &DeckAddress) -> impl Future<Output = Result<Document, LoadError>> + Send {
        let address = address.clone();
        async move {
            let path = address.as_path();
            let bytes = tokio::fs::read(&path)
                .await
                .map_err(|e| load_io_err(&path, e))?;
            if !bytes.starts_with(b"%PDF-") {
                return Err(LoadError::NotPdf { address });
            }
            let pages_count = count_pages(&bytes);
            if pages_count == 0 {
                return Err(LoadError::Empty { address });
            }
            tracing::debug!("decoded {address}: {pages_count} page(s)");
            Ok(Document {
                address,
                pages_count,
                bytes: bytes.into(),
            })
        }
    }
}

/// Page objects in `bytes`, falling back to the largest `/Count` entry.
pub fn count_pages(bytes: &[u8]) -> u32 {
    let mut pages = 0u32;
    let mut cursor = 0;
    while let Some(offset) = find(&bytes[cursor..], b"/Type") {
        let after_key = skip_whitespace(bytes, cursor + offset + b"/Type".len());
        if bytes[after_key..].starts_with(b"/Page") {
            let next = bytes.get(after_key + b"/Page".len());
            if next.map_or(true, |b| !b.is_ascii_alphanumeric()) {
                pages = pages.saturating_add(1);
            }
        }
        cursor += offset + b"/Type".len();
    }
    if pages > 0 {
        return pages;
    }

    let mut largest = 0u32;
    let mut cursor = 0;
    while let Some(offset) = find(&bytes[cursor..], b"/Count") {
        let start = skip_whitespace(bytes, cursor + offset + b"/Count".len());
        let digits = bytes[start..]
            .iter()
            .take_while(|b| b.is_ascii_digit())
            .count();
        if let Some(count) = std::str::from_utf8(&bytes[start..start + digits])
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
        {
            largest = largest.max(count);
        }
        cursor += offset + b"/Count".len();
    }
    largest
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn skip_whitespace(bytes: &[u8], mut at: usize) -> usize {
    while bytes.get(at).is_some_and(|b| b.is_ascii_whitespace()) {
        at += 1;
    }
    at
}
