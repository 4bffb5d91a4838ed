//! # podium-sync
//!
//! Keeps every client's viewer on the presenter's deck and page.
//!
//! [`ReconciliationEngine`] is the synchronous core: it reconciles the local
//! viewer toward snapshots of the shared record and turns presenter changes
//! into partial writes. [`Session`] drives it against a [`RemoteStateChannel`],
//! a [`DeckLocator`](podium_core::DeckLocator) and a [`DocumentLoader`].
//!
//! Logging goes through the `log` facade (imported as `tracing`); binaries
//! pick the subscriber.

pub mod authority;
pub mod channel;
pub mod engine;
pub mod error;
pub mod loader;
pub mod session;
pub mod viewer;

pub use authority::{AuthorityChange, AuthorityGate};
pub use channel::{MemoryChannel, RemoteStateChannel, SnapshotReceiver};
pub use engine::{
    LoadOutcome, LoadRequest, LocalChange, LocalViewerState, PageStep, Proposal, Reconciliation,
    ReconciliationEngine,
};
pub use error::{ChannelError, LoadError, SyncError, ViewerError};
pub use loader::{Document, DocumentLoader, PdfLoader};
pub use session::{Session, SessionEvent, SessionHandle, SessionStatus};
pub use viewer::{
    viewer_events, DocumentHandle, HeadlessViewer, LoadToken, ViewerAdapter, ViewerCall,
    ViewerEvent, ViewerEventReceiver, ViewerEventSender, ViewerLog,
};
