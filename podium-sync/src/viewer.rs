//! The contract the engine consumes from the rendering side.
//!
//! A viewer receives a [`DocumentHandle`], lays out its pages and, once the
//! page tree is known, emits exactly one [`ViewerEvent::PagesReady`] for that
//! handle's token. Until then `pages_count` is `None` and page changes fail
//! with [`ViewerError::NotReady`]. Container resizes are reported as
//! [`ViewerEvent::Resized`].

use std::fmt;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use podium_core::{DeckName, PageNumber};

use crate::error::ViewerError;
use crate::loader::Document;

/// Identifies one deck-load request, and the document it produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct LoadToken(pub u64);

impl fmt::Display for LoadToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A loaded document on its way into the viewer.
#[derive(Debug, Clone)]
pub struct DocumentHandle {
    pub token: LoadToken,
    pub deck: DeckName,
    pub document: Document,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ViewerEvent {
    /// The page tree of the document set with `token` is ready.
    PagesReady { token: LoadToken },
    /// The display container changed size.
    Resized,
}

pub type ViewerEventSender = mpsc::UnboundedSender<ViewerEvent>;
pub type ViewerEventReceiver = mpsc::UnboundedReceiver<ViewerEvent>;

/// Channel a viewer uses to report readiness and resizes to its session.
pub fn viewer_events() -> (ViewerEventSender, ViewerEventReceiver) {
    mpsc::unbounded_channel()
}

pub trait ViewerAdapter {
    /// Replace the displayed document. The viewer starts over at page 1.
    fn set_document(&mut self, document: DocumentHandle);

    /// Drop the displayed document (no deck selected).
    fn close_document(&mut self);

    /// Page count of the current document; `None` before it is ready.
    fn pages_count(&self) -> Option<u32>;

    fn current_page_number(&self) -> Option<PageNumber>;

    fn set_current_page_number(&mut self, page: PageNumber) -> Result<(), ViewerError>;

    /// Scale the page to fit the container.
    fn fit_to_frame(&mut self);
}

// ---------------------------------------------------------------------------
// Headless viewer
// ---------------------------------------------------------------------------

/// Every call the engine made on a [`HeadlessViewer`], in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewerCall {
    SetDocument { deck: DeckName, token: LoadToken },
    CloseDocument,
    SetPage(PageNumber),
    FitToFrame,
}

/// Shared view of a headless viewer's call log.
#[derive(Debug, Clone, Default)]
pub struct ViewerLog(Arc<Mutex<Vec<ViewerCall>>>);

impl ViewerLog {
    fn push(&self, call: ViewerCall) {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).push(call);
    }

    pub fn calls(&self) -> Vec<ViewerCall> {
        self.0.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    /// Decks handed to the viewer, in order.
    pub fn documents(&self) -> Vec<DeckName> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ViewerCall::SetDocument { deck, .. } => Some(deck),
                _ => None,
            })
            .collect()
    }

    /// Pages applied, in order.
    pub fn pages(&self) -> Vec<PageNumber> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                ViewerCall::SetPage(page) => Some(page),
                _ => None,
            })
            .collect()
    }
}

/// A viewer with no display. Its page tree is ready as soon as a document is
/// set. Used for simulated clients and as the base of the terminal viewer.
#[derive(Debug)]
pub struct HeadlessViewer {
    events: ViewerEventSender,
    document: Option<DocumentHandle>,
    page: Option<PageNumber>,
    log: ViewerLog,
}

impl HeadlessViewer {
    pub fn new(events: ViewerEventSender) -> Self {
        Self {
            events,
            document: None,
            page: None,
            log: ViewerLog::default(),
        }
    }

    pub fn log(&self) -> ViewerLog {
        self.log.clone()
    }

    pub fn deck(&self) -> Option<&DeckName> {
        self.document.as_ref().map(|d| &d.deck)
    }
}

impl ViewerAdapter for HeadlessViewer {
    fn set_document(&mut self, document: DocumentHandle) {
        let token = document.token;
        self.log.push(ViewerCall::SetDocument {
            deck: document.deck.clone(),
            token,
        });
        self.document = Some(document);
        self.page = Some(PageNumber::FIRST);
        let _ = self.events.send(ViewerEvent::PagesReady { token });
    }

    fn close_document(&mut self) {
        self.log.push(ViewerCall::CloseDocument);
        self.document = None;
        self.page = None;
    }

    fn pages_count(&self) -> Option<u32> {
        self.document.as_ref().map(|d| d.document.pages_count)
    }

    fn current_page_number(&self) -> Option<PageNumber> {
        self.page
    }

    fn set_current_page_number(&mut self, page: PageNumber) -> Result<(), ViewerError> {
        let pages_count = self.pages_count().ok_or(ViewerError::NotReady)?;
        if page.get() > pages_count {
            return Err(ViewerError::PageOutOfRange { page, pages_count });
        }
        self.log.push(ViewerCall::SetPage(page));
        self.page = Some(page);
        Ok(())
    }

    fn fit_to_frame(&mut self) {
        self.log.push(ViewerCall::FitToFrame);
    }
}
