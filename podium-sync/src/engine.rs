//! Reconciliation engine.
//!
//! Keeps a [`LocalViewerState`] that tracks the latest observed
//! [`SharedPresentationState`], and turns local presenter intents into
//! optimistic viewer updates plus partial writes.
//!
//! The engine performs no I/O. Deck changes come back as [`LoadRequest`]s for
//! the caller to run; the result is fed back through
//! [`ReconciliationEngine::on_load_finished`], and the viewer's readiness
//! through [`ReconciliationEngine::on_viewer_ready`]. Writes come back as
//! [`StatePatch`]es in a [`Proposal`].
//!
//! ## Race rule
//!
//! Every load gets a fresh [`LoadToken`] that replaces the previous one. A
//! completion whose token is no longer pending is dropped, success or
//! failure. Pages are only applied once the target deck's page count is
//! known, and always from the newest snapshot, so a page that was superseded
//! while the deck loaded is never shown.
//!
//! A presenter page for a deck whose length is not known yet is held back
//! from the write. Once the deck is ready the clamped page is queued and
//! handed out by [`ReconciliationEngine::take_deferred_write`].

use podium_core::{
    DeckName, Identity, PageNumber, SharedPresentationState, StatePatch,
};
use tokio::sync::watch;

use crate::authority::{AuthorityChange, AuthorityGate};
use crate::error::SyncError;
use crate::loader::Document;
use crate::viewer::{DocumentHandle, LoadToken, ViewerAdapter};

/// Per-client view state. Never shared.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalViewerState {
    pub loaded_deck: Option<DeckName>,
    pub loaded_page_count: Option<u32>,
    pub displayed_page_number: Option<PageNumber>,
    /// Most recent outstanding load; older completions are ignored.
    pub pending_load: Option<LoadToken>,
}

/// A deck load the caller must run and report back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadRequest {
    pub token: LoadToken,
    pub deck: DeckName,
}

/// What one reconciliation step did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Reconciliation {
    pub load: Option<LoadRequest>,
    pub page_applied: Option<PageNumber>,
}

/// Result of a local change.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Proposal {
    pub load: Option<LoadRequest>,
    pub page_applied: Option<PageNumber>,
    /// Partial write to publish. `None` when nothing changed or the session
    /// may not write.
    pub publish: Option<StatePatch>,
}

/// What happened to a finished load.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// A newer load replaced this one; nothing changed.
    Superseded,
    /// The document was handed to the viewer; waiting for its pages.
    DocumentSet,
}

/// A presenter's requested change. `page` is raw input and is validated.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LocalChange {
    pub deck: Option<DeckName>,
    pub page: Option<i64>,
}

impl LocalChange {
    pub fn deck(deck: impl Into<DeckName>) -> Self {
        Self {
            deck: Some(deck.into()),
            page: None,
        }
    }

    pub fn page(page: i64) -> Self {
        Self {
            deck: None,
            page: Some(page),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageStep {
    Next,
    Previous,
}

pub struct ReconciliationEngine<V> {
    viewer: V,
    authority: Option<AuthorityGate>,
    local: LocalViewerState,
    /// Last snapshot received from the shared record.
    shared: SharedPresentationState,
    /// `shared` plus local optimistic changes; what the viewer should show.
    target: SharedPresentationState,
    pending_deck: Option<DeckName>,
    /// Token of the document currently inside the viewer.
    document: Option<LoadToken>,
    last_token: u64,
    fit_to_frame: bool,
    /// Presenter page waiting for its deck's page count before it is written.
    held_page: Option<(DeckName, PageNumber)>,
    deferred_write: Option<StatePatch>,
}

impl<V: ViewerAdapter> ReconciliationEngine<V> {
    /// A read-only viewer: local changes are never published.
    pub fn viewer(viewer: V) -> Self {
        Self {
            viewer,
            authority: None,
            local: LocalViewerState::default(),
            shared: SharedPresentationState::default(),
            target: SharedPresentationState::default(),
            pending_deck: None,
            document: None,
            last_token: 0,
            fit_to_frame: true,
            held_page: None,
            deferred_write: None,
        }
    }

    /// A presenter: local changes are published while `authority` allows it.
    pub fn presenter(viewer: V, authority: AuthorityGate) -> Self {
        Self {
            authority: Some(authority),
            ..Self::viewer(viewer)
        }
    }

    pub fn with_fit_to_frame(mut self, enabled: bool) -> Self {
        self.fit_to_frame = enabled;
        self
    }

    pub fn local_state(&self) -> &LocalViewerState {
        &self.local
    }

    pub fn shared_state(&self) -> &SharedPresentationState {
        &self.shared
    }

    pub fn target_state(&self) -> &SharedPresentationState {
        &self.target
    }

    pub fn viewer_ref(&self) -> &V {
        &self.viewer
    }

    pub fn can_write(&self) -> bool {
        self.authority.as_ref().is_some_and(AuthorityGate::can_write)
    }

    /// Watch write permission. `None` for read-only viewers.
    pub fn subscribe_authority(&self) -> Option<watch::Receiver<bool>> {
        self.authority.as_ref().map(AuthorityGate::subscribe)
    }

    // -----------------------------------------------------------------------
    // Inbound
    // -----------------------------------------------------------------------

    /// Reconcile toward a freshly observed snapshot. Local optimistic changes
    /// not reflected in it are dropped.
    ///
    /// A held page survives while the snapshot stays on its deck and leaves
    /// that deck's recorded page untouched.
    pub fn on_remote_snapshot(&mut self, state: SharedPresentationState) -> Reconciliation {
        let held = self.held_page.take().filter(|(deck, _)| {
            state.current_deck.as_ref() == Some(deck)
                && state.recorded_page(deck) == self.shared.recorded_page(deck)
        });
        self.shared = state.clone();
        self.target = state;
        if let Some((deck, page)) = held {
            self.target.current_page_number.insert(deck.clone(), page);
            self.held_page = Some((deck, page));
        }
        self.reconcile()
    }

    /// Report the end of the load issued with `token`.
    ///
    /// Failures of the current load are returned to the caller; the last good
    /// document stays in the viewer.
    pub fn on_load_finished(
        &mut self,
        token: LoadToken,
        result: Result<Document, SyncError>,
    ) -> Result<LoadOutcome, SyncError> {
        if self.local.pending_load != Some(token) {
            tracing::debug!("discarding result of superseded load {token}");
            return Ok(LoadOutcome::Superseded);
        }
        self.local.pending_load = None;
        let Some(deck) = self.pending_deck.take() else {
            return Ok(LoadOutcome::Superseded);
        };

        let document = match result {
            Ok(document) => document,
            Err(err) => {
                tracing::warn!("load {token} of deck '{deck}' failed: {err}");
                return Err(err);
            }
        };

        tracing::info!(
            "deck '{deck}' loaded ({} page(s)), waiting for viewer",
            document.pages_count
        );
        self.viewer.set_document(DocumentHandle {
            token,
            deck: deck.clone(),
            document,
        });
        self.document = Some(token);
        self.local.loaded_deck = Some(deck);
        self.local.loaded_page_count = None;
        self.local.displayed_page_number = None;
        Ok(LoadOutcome::DocumentSet)
    }

    /// The viewer finished laying out the document set with `token`.
    pub fn on_viewer_ready(&mut self, token: LoadToken) -> Option<PageNumber> {
        if self.document != Some(token) || self.local.loaded_page_count.is_some() {
            tracing::debug!("ignoring ready notification for {token}");
            return None;
        }
        let Some(pages_count) = self.viewer.pages_count() else {
            tracing::warn!("viewer reported ready for {token} without a page count");
            return None;
        };
        self.local.loaded_page_count = Some(pages_count);
        self.local.displayed_page_number = self.viewer.current_page_number();
        if self.fit_to_frame {
            self.viewer.fit_to_frame();
        }
        self.settle_held_page();
        self.apply_target_page()
    }

    /// The viewer's container changed size.
    pub fn on_viewer_resized(&mut self) {
        if self.fit_to_frame && self.local.loaded_page_count.is_some() {
            self.viewer.fit_to_frame();
        }
    }

    // -----------------------------------------------------------------------
    // Outbound
    // -----------------------------------------------------------------------

    /// Apply a presenter's change locally and compute the write for it.
    ///
    /// The caller is expected to have checked that `change.deck` resolves.
    pub fn propose_local_change(&mut self, change: LocalChange) -> Result<Proposal, SyncError> {
        let page = change.page.map(PageNumber::new).transpose()?;
        if change.deck.is_none() && page.is_none() {
            return Ok(Proposal::default());
        }
        let deck = change
            .deck
            .or_else(|| self.target.current_deck.clone())
            .ok_or(SyncError::NoDeckSelected)?;

        if page.is_some() || self.held_page.as_ref().is_some_and(|(held, _)| *held != deck) {
            self.release_held_page();
        }
        let mut target = self.target.clone();
        let switching = target.current_deck.as_ref() != Some(&deck);
        target.current_deck = Some(deck.clone());
        match page {
            Some(page) => match self.page_count_once_on(&deck) {
                Some(pages_count) => {
                    target
                        .current_page_number
                        .insert(deck.clone(), page.clamp_to(pages_count));
                }
                None => {
                    target.current_page_number.insert(deck.clone(), page);
                    if page != PageNumber::FIRST {
                        tracing::debug!("page {page} of '{deck}' held until its length is known");
                        self.held_page = Some((deck.clone(), page));
                    }
                }
            },
            // First visit to a deck starts at page 1, written together with the deck.
            None if switching && target.recorded_page(&deck).is_none() => {
                target
                    .current_page_number
                    .insert(deck.clone(), PageNumber::FIRST);
            }
            None => {}
        }

        let mut patch = StatePatch::between(&self.shared, &target);
        if let Some((held, _)) = &self.held_page {
            patch.current_page_number.remove(held);
        }
        self.target = target;
        let Reconciliation { load, page_applied } = self.reconcile();

        let publish = if patch.is_empty() {
            None
        } else if self.can_write() {
            Some(patch)
        } else {
            tracing::debug!("change to '{deck}' kept local: session may not write");
            None
        };
        Ok(Proposal {
            load,
            page_applied,
            publish,
        })
    }

    /// The change that moves one page forward or back on the current deck.
    pub fn step_change(&self, step: PageStep) -> Result<LocalChange, SyncError> {
        let deck = self
            .target
            .current_deck
            .clone()
            .ok_or(SyncError::NoDeckSelected)?;
        let pages_count = self.ready_page_count(&deck);
        let current = match pages_count {
            Some(pages_count) => self.target.page_for(&deck).clamp_to(pages_count),
            None => self.target.page_for(&deck),
        };
        let page = match step {
            PageStep::Next => current.next(pages_count.unwrap_or(u32::MAX)),
            PageStep::Previous => current.previous(),
        };
        Ok(LocalChange {
            deck: Some(deck),
            page: Some(i64::from(page.get())),
        })
    }

    /// The clamped page write queued when a held page's deck became ready.
    pub fn take_deferred_write(&mut self) -> Option<StatePatch> {
        self.deferred_write.take()
    }

    /// Update write permission. Inbound reconciliation is unaffected.
    pub fn on_identity_changed(&mut self, identity: Option<Identity>) -> AuthorityChange {
        let Some(gate) = self.authority.as_mut() else {
            tracing::debug!("identity change ignored by read-only viewer");
            return AuthorityChange::Unchanged;
        };
        let change = gate.on_identity_changed(identity);
        match &change {
            AuthorityChange::Granted(identity) => {
                tracing::info!("writes enabled for {identity}");
            }
            AuthorityChange::Revoked => tracing::info!("writes disabled"),
            AuthorityChange::Unchanged => {}
        }
        change
    }

    // -----------------------------------------------------------------------
    // Internals
    // -----------------------------------------------------------------------

    /// The deck the viewer is on, or on its way to.
    fn heading_deck(&self) -> Option<&DeckName> {
        self.pending_deck
            .as_ref()
            .or(self.local.loaded_deck.as_ref())
    }

    fn reconcile(&mut self) -> Reconciliation {
        let wanted = self.target.current_deck.clone();
        let mut load = None;
        if wanted.as_ref() != self.heading_deck() {
            match wanted {
                None => {
                    self.supersede_pending();
                    self.close_document();
                }
                Some(deck) if self.local.loaded_deck.as_ref() == Some(&deck) => {
                    self.supersede_pending();
                }
                Some(deck) => load = Some(self.issue_load(deck)),
            }
        }
        let page_applied = self.apply_target_page();
        Reconciliation { load, page_applied }
    }

    fn issue_load(&mut self, deck: DeckName) -> LoadRequest {
        self.last_token += 1;
        let token = LoadToken(self.last_token);
        if let Some(previous) = self.local.pending_load.replace(token) {
            tracing::debug!("load {previous} superseded by {token}");
        }
        tracing::info!("loading deck '{deck}' ({token})");
        self.pending_deck = Some(deck.clone());
        LoadRequest { token, deck }
    }

    fn supersede_pending(&mut self) {
        if let Some(token) = self.local.pending_load.take() {
            tracing::debug!("load {token} superseded");
        }
        self.pending_deck = None;
    }

    fn close_document(&mut self) {
        if self.document.take().is_some() || self.local.loaded_deck.is_some() {
            tracing::info!("no deck selected, closing document");
            self.viewer.close_document();
        }
        self.local = LocalViewerState::default();
    }

    fn ready_page_count(&self, deck: &DeckName) -> Option<u32> {
        if self.pending_deck.is_some() || self.local.loaded_deck.as_ref() != Some(deck) {
            return None;
        }
        self.local.loaded_page_count
    }

    /// Page count of `deck` after reconciling toward it. Targeting the loaded
    /// deck drops any pending load, so only the loaded deck counts.
    fn page_count_once_on(&self, deck: &DeckName) -> Option<u32> {
        if self.local.loaded_deck.as_ref() != Some(deck) {
            return None;
        }
        self.local.loaded_page_count
    }

    /// Put the shared value back in place of a held page.
    fn release_held_page(&mut self) {
        let Some((deck, _)) = self.held_page.take() else {
            return;
        };
        match self.shared.recorded_page(&deck) {
            Some(page) => self.target.current_page_number.insert(deck, page),
            None => self.target.current_page_number.remove(&deck),
        };
    }

    /// Clamp a held page now that its deck is ready and queue its write.
    fn settle_held_page(&mut self) {
        let Some((deck, page)) = self.held_page.take() else {
            return;
        };
        let Some(pages_count) = self.ready_page_count(&deck) else {
            self.held_page = Some((deck, page));
            return;
        };
        let page = page.clamp_to(pages_count);
        self.target.current_page_number.insert(deck.clone(), page);
        if self.shared.recorded_page(&deck) == Some(page) {
            return;
        }
        if self.can_write() {
            self.deferred_write = Some(StatePatch::default().with_page(deck, page));
        } else {
            tracing::debug!("page {page} of '{deck}' kept local: session may not write");
        }
    }

    /// Show the target page of the loaded deck, once its page count is known.
    fn apply_target_page(&mut self) -> Option<PageNumber> {
        let deck = self.target.current_deck.clone()?;
        let pages_count = self.ready_page_count(&deck)?;
        let page = self.target.page_for(&deck).clamp_to(pages_count);
        if self.local.displayed_page_number == Some(page) {
            return None;
        }
        match self.viewer.set_current_page_number(page) {
            Ok(()) => {
                tracing::info!("showing '{deck}' page {page}/{pages_count}");
                self.local.displayed_page_number = Some(page);
                Some(page)
            }
            Err(err) => {
                tracing::warn!("viewer rejected page {page} of '{deck}': {err}");
                None
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use podium_core::DeckAddress;

    use super::*;
    use crate::error::{LoadError, ViewerError};

    /// Viewer whose readiness is driven by the test.
    #[derive(Default)]
    struct ScriptedViewer {
        documents: Vec<DeckName>,
        pages_set: Vec<PageNumber>,
        fits: usize,
        closed: usize,
        current: Option<(u32, bool)>,
        page: Option<PageNumber>,
    }

    impl ViewerAdapter for ScriptedViewer {
        fn set_document(&mut self, document: DocumentHandle) {
            self.documents.push(document.deck);
            self.current = Some((document.document.pages_count, false));
            self.page = Some(PageNumber::FIRST);
        }

        fn close_document(&mut self) {
            self.closed += 1;
            self.current = None;
            self.page = None;
        }

        fn pages_count(&self) -> Option<u32> {
            match self.current {
                Some((n, true)) => Some(n),
                _ => None,
            }
        }

        fn current_page_number(&self) -> Option<PageNumber> {
            self.page
        }

        fn set_current_page_number(&mut self, page: PageNumber) -> Result<(), ViewerError> {
            self.pages_count().ok_or(ViewerError::NotReady)?;
            self.pages_set.push(page);
            self.page = Some(page);
            Ok(())
        }

        fn fit_to_frame(&mut self) {
            self.fits += 1;
        }
    }

    fn page(n: i64) -> PageNumber {
        PageNumber::new(n).expect("page")
    }

    fn state(deck: &str, p: i64) -> SharedPresentationState {
        SharedPresentationState::new(deck, page(p))
    }

    fn doc(pages_count: u32) -> Document {
        Document {
            address: DeckAddress("mem".to_string()),
            pages_count,
            bytes: Arc::from(&b""[..]),
        }
    }

    /// Complete `request` with a `pages`-page document and mark the viewer ready.
    fn settle(
        engine: &mut ReconciliationEngine<ScriptedViewer>,
        request: &LoadRequest,
        pages: u32,
    ) -> Option<PageNumber> {
        let outcome = engine
            .on_load_finished(request.token, Ok(doc(pages)))
            .expect("load ok");
        assert_eq!(outcome, LoadOutcome::DocumentSet);
        if let Some((_, ready)) = engine.viewer.current.as_mut() {
            *ready = true;
        }
        engine.on_viewer_ready(request.token)
    }

    fn presenter(can_write: bool) -> ReconciliationEngine<ScriptedViewer> {
        let mut gate = AuthorityGate::new();
        if can_write {
            gate.on_identity_changed(Some(Identity {
                user: "alice".to_string(),
            }));
        }
        ReconciliationEngine::presenter(ScriptedViewer::default(), gate)
    }

    #[test]
    fn fresh_engine_loads_deck_then_shows_page() {
        let mut engine = ReconciliationEngine::viewer(ScriptedViewer::default());
        let step = engine.on_remote_snapshot(state("intro", 3));
        let request = step.load.expect("load issued");
        assert_eq!(request.deck, DeckName::from("intro"));
        assert_eq!(step.page_applied, None, "page waits for the deck");

        assert_eq!(settle(&mut engine, &request, 10), Some(page(3)));
        let local = engine.local_state();
        assert_eq!(local.loaded_deck, Some(DeckName::from("intro")));
        assert_eq!(local.loaded_page_count, Some(10));
        assert_eq!(local.displayed_page_number, Some(page(3)));
        assert_eq!(local.pending_load, None);
        assert_eq!(engine.viewer.fits, 1);
    }

    #[test]
    fn same_snapshot_twice_is_a_no_op() {
        let mut engine = ReconciliationEngine::viewer(ScriptedViewer::default());
        let request = engine.on_remote_snapshot(state("intro", 3)).load.expect("load");
        settle(&mut engine, &request, 10);

        let again = engine.on_remote_snapshot(state("intro", 3));
        assert_eq!(again, Reconciliation::default());
        assert_eq!(engine.viewer.pages_set, vec![page(3)]);
        assert_eq!(engine.viewer.documents.len(), 1);
    }

    #[test]
    fn duplicate_snapshot_during_load_does_not_reissue() {
        let mut engine = ReconciliationEngine::viewer(ScriptedViewer::default());
        let first = engine.on_remote_snapshot(state("intro", 3)).load;
        let second = engine.on_remote_snapshot(state("intro", 3)).load;
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[test]
    fn newer_deck_supersedes_in_flight_load() {
        let mut engine = ReconciliationEngine::viewer(ScriptedViewer::default());
        let x = engine.on_remote_snapshot(state("x", 5)).load.expect("x");
        let y = engine.on_remote_snapshot(state("y", 2)).load.expect("y");
        assert_ne!(x.token, y.token);

        // x resolves late and is dropped.
        let outcome = engine.on_load_finished(x.token, Ok(doc(10))).expect("stale ok");
        assert_eq!(outcome, LoadOutcome::Superseded);
        assert!(engine.viewer.documents.is_empty());

        assert_eq!(settle(&mut engine, &y, 10), Some(page(2)));
        assert_eq!(engine.viewer.documents, vec![DeckName::from("y")]);
        assert_eq!(engine.viewer.pages_set, vec![page(2)]);
    }

    #[test]
    fn stale_failure_is_ignored() {
        let mut engine = ReconciliationEngine::viewer(ScriptedViewer::default());
        let x = engine.on_remote_snapshot(state("x", 1)).load.expect("x");
        let _y = engine.on_remote_snapshot(state("y", 1)).load.expect("y");
        let err = SyncError::DeckNotFound {
            name: DeckName::from("x"),
        };
        assert_eq!(
            engine.on_load_finished(x.token, Err(err)).expect("ignored"),
            LoadOutcome::Superseded
        );
        assert!(engine.local_state().pending_load.is_some());
    }

    #[test]
    fn pages_arriving_during_load_collapse_to_the_last() {
        let mut engine = ReconciliationEngine::viewer(ScriptedViewer::default());
        let request = engine.on_remote_snapshot(state("intro", 2)).load.expect("load");
        assert!(engine.on_remote_snapshot(state("intro", 4)).load.is_none());
        assert!(engine.on_remote_snapshot(state("intro", 7)).load.is_none());

        settle(&mut engine, &request, 10);
        assert_eq!(engine.viewer.pages_set, vec![page(7)]);
    }

    #[test]
    fn remote_page_beyond_deck_is_clamped() {
        let mut engine = ReconciliationEngine::viewer(ScriptedViewer::default());
        let request = engine.on_remote_snapshot(state("intro", 50)).load.expect("load");
        assert_eq!(settle(&mut engine, &request, 10), Some(page(10)));
    }

    #[test]
    fn returning_to_loaded_deck_cancels_pending_load() {
        let mut engine = ReconciliationEngine::viewer(ScriptedViewer::default());
        let a = engine.on_remote_snapshot(state("a", 1)).load.expect("a");
        settle(&mut engine, &a, 5);

        let b = engine.on_remote_snapshot(state("a", 1).tap_deck("b")).load.expect("b");
        let back = engine.on_remote_snapshot(state("a", 3));
        assert_eq!(back.load, None);
        assert_eq!(back.page_applied, Some(page(3)));
        assert_eq!(
            engine.on_load_finished(b.token, Ok(doc(9))).expect("stale"),
            LoadOutcome::Superseded
        );
        assert_eq!(engine.viewer.documents, vec![DeckName::from("a")]);
    }

    #[test]
    fn clearing_the_deck_closes_the_document() {
        let mut engine = ReconciliationEngine::viewer(ScriptedViewer::default());
        let request = engine.on_remote_snapshot(state("intro", 2)).load.expect("load");
        settle(&mut engine, &request, 4);

        let step = engine.on_remote_snapshot(SharedPresentationState::default());
        assert_eq!(step, Reconciliation::default());
        assert_eq!(engine.viewer.closed, 1);
        assert_eq!(engine.local_state(), &LocalViewerState::default());
    }

    #[test]
    fn failed_load_keeps_last_good_deck_and_retries_on_next_snapshot() {
        let mut engine = ReconciliationEngine::viewer(ScriptedViewer::default());
        let a = engine.on_remote_snapshot(state("a", 2)).load.expect("a");
        settle(&mut engine, &a, 5);

        let b = engine.on_remote_snapshot(state("b", 1)).load.expect("b");
        let failure = SyncError::LoadFailure {
            deck: DeckName::from("b"),
            source: LoadError::Transport("reset".to_string()),
        };
        assert!(engine.on_load_finished(b.token, Err(failure)).is_err());
        assert_eq!(engine.local_state().loaded_deck, Some(DeckName::from("a")));
        assert_eq!(engine.local_state().displayed_page_number, Some(page(2)));

        let retry = engine.on_remote_snapshot(state("b", 1));
        assert!(retry.load.is_some(), "next snapshot retries the load");
    }

    #[test]
    fn ready_for_replaced_document_is_ignored() {
        let mut engine = ReconciliationEngine::viewer(ScriptedViewer::default());
        let a = engine.on_remote_snapshot(state("a", 2)).load.expect("a");
        engine.on_load_finished(a.token, Ok(doc(5))).expect("a set");
        let b = engine.on_remote_snapshot(state("b", 1)).load.expect("b");
        engine.on_load_finished(b.token, Ok(doc(3))).expect("b set");

        assert_eq!(engine.on_viewer_ready(a.token), None);
        assert_eq!(engine.local_state().loaded_page_count, None);
    }

    #[test]
    fn resize_refits_only_when_ready() {
        let mut engine = ReconciliationEngine::viewer(ScriptedViewer::default());
        engine.on_viewer_resized();
        assert_eq!(engine.viewer.fits, 0);

        let request = engine.on_remote_snapshot(state("a", 1)).load.expect("a");
        settle(&mut engine, &request, 2);
        engine.on_viewer_resized();
        assert_eq!(engine.viewer.fits, 2);
    }

    // --- outbound ---------------------------------------------------------

    fn loaded_presenter(can_write: bool) -> ReconciliationEngine<ScriptedViewer> {
        let mut engine = presenter(can_write);
        let request = engine.on_remote_snapshot(state("intro", 3)).load.expect("load");
        settle(&mut engine, &request, 10);
        engine
    }

    #[test]
    fn page_change_publishes_only_the_changed_field() {
        let mut engine = loaded_presenter(true);
        let proposal = engine.propose_local_change(LocalChange::page(4)).expect("propose");
        assert_eq!(proposal.page_applied, Some(page(4)));
        let patch = proposal.publish.expect("publish");
        assert_eq!(patch.current_deck, None);
        assert_eq!(
            patch.current_page_number.get(&DeckName::from("intro")),
            Some(&page(4))
        );
    }

    #[test]
    fn published_page_is_clamped_to_loaded_deck() {
        let mut engine = loaded_presenter(true);
        let proposal = engine.propose_local_change(LocalChange::page(99)).expect("propose");
        let patch = proposal.publish.expect("publish");
        assert_eq!(patch.current_page_number[&DeckName::from("intro")], page(10));
        assert_eq!(engine.local_state().displayed_page_number, Some(page(10)));
    }

    #[test]
    fn invalid_page_is_rejected_without_state_change() {
        let mut engine = loaded_presenter(true);
        for bad in [0, -1] {
            let err = engine.propose_local_change(LocalChange::page(bad)).unwrap_err();
            assert!(matches!(err, SyncError::InvalidPageNumber(_)), "got: {err}");
        }
        assert_eq!(engine.local_state().displayed_page_number, Some(page(3)));
        assert_eq!(engine.viewer.pages_set, vec![page(3)]);
    }

    #[test]
    fn without_authority_changes_stay_local() {
        let mut engine = loaded_presenter(false);
        let proposal = engine.propose_local_change(LocalChange::page(6)).expect("propose");
        assert_eq!(proposal.publish, None);
        assert_eq!(proposal.page_applied, Some(page(6)));

        let mut viewer = ReconciliationEngine::viewer(ScriptedViewer::default());
        let request = viewer.on_remote_snapshot(state("intro", 1)).load.expect("load");
        settle(&mut viewer, &request, 10);
        let proposal = viewer.propose_local_change(LocalChange::page(2)).expect("propose");
        assert_eq!(proposal.publish, None);
        assert_eq!(proposal.page_applied, Some(page(2)));
    }

    #[test]
    fn switching_to_unvisited_deck_writes_page_one_atomically() {
        let mut engine = loaded_presenter(true);
        let proposal = engine
            .propose_local_change(LocalChange::deck("outro"))
            .expect("propose");
        assert!(proposal.load.is_some());
        let patch = proposal.publish.expect("publish");
        assert_eq!(patch.current_deck, Some(DeckName::from("outro")));
        assert_eq!(
            patch.current_page_number.get(&DeckName::from("outro")),
            Some(&PageNumber::FIRST)
        );
    }

    #[test]
    fn switching_back_restores_recorded_page() {
        let mut engine = presenter(true);
        let mut remote = state("intro", 3);
        remote
            .current_page_number
            .insert(DeckName::from("outro"), page(8));
        let request = engine.on_remote_snapshot(remote).load.expect("load");
        settle(&mut engine, &request, 10);

        let proposal = engine
            .propose_local_change(LocalChange::deck("outro"))
            .expect("propose");
        let patch = proposal.publish.expect("publish");
        assert_eq!(patch.current_deck, Some(DeckName::from("outro")));
        assert!(patch.current_page_number.is_empty(), "page 8 is already recorded");

        let load = proposal.load.expect("load outro");
        assert_eq!(settle(&mut engine, &load, 12), Some(page(8)));
    }

    #[test]
    fn unchanged_proposal_publishes_nothing() {
        let mut engine = loaded_presenter(true);
        let proposal = engine.propose_local_change(LocalChange::page(3)).expect("propose");
        assert_eq!(proposal, Proposal::default());
    }

    #[test]
    fn remote_snapshot_overrides_optimistic_state() {
        let mut engine = loaded_presenter(false);
        engine.propose_local_change(LocalChange::page(6)).expect("propose");
        let step = engine.on_remote_snapshot(state("intro", 3));
        assert_eq!(step.page_applied, Some(page(3)));
    }

    #[test]
    fn steps_stay_within_the_deck() {
        let mut engine = loaded_presenter(true);
        engine.propose_local_change(LocalChange::page(10)).expect("last page");
        let next = engine.step_change(PageStep::Next).expect("next");
        assert_eq!(next.page, Some(10));
        let previous = engine.step_change(PageStep::Previous).expect("previous");
        assert_eq!(previous.page, Some(9));
    }

    #[test]
    fn steps_start_from_the_page_actually_shown() {
        let mut engine = presenter(true);
        let request = engine.on_remote_snapshot(state("intro", 50)).load.expect("load");
        assert_eq!(settle(&mut engine, &request, 10), Some(page(10)));

        let previous = engine.step_change(PageStep::Previous).expect("previous");
        assert_eq!(previous.page, Some(9));
        let proposal = engine.propose_local_change(previous).expect("propose");
        assert_eq!(proposal.page_applied, Some(page(9)));

        engine.on_remote_snapshot(state("intro", 50));
        let next = engine.step_change(PageStep::Next).expect("next");
        assert_eq!(next.page, Some(10));
    }

    #[test]
    fn page_for_loading_deck_is_written_once_clamped() {
        let mut engine = loaded_presenter(true);
        let outro = DeckName::from("outro");
        let proposal = engine
            .propose_local_change(LocalChange {
                deck: Some(outro.clone()),
                page: Some(500),
            })
            .expect("propose");
        let patch = proposal.publish.expect("deck switch");
        assert_eq!(patch.current_deck, Some(outro.clone()));
        assert!(!patch.current_page_number.contains_key(&outro));
        assert_eq!(engine.take_deferred_write(), None);

        // Echo of the deck switch keeps the held page and reissues nothing.
        let echo = engine.on_remote_snapshot(state("intro", 3).tap_deck("outro"));
        assert_eq!(echo, Reconciliation::default());

        let load = proposal.load.expect("load outro");
        assert_eq!(settle(&mut engine, &load, 12), Some(page(12)));
        assert_eq!(
            engine.take_deferred_write(),
            Some(StatePatch::default().with_page(outro.clone(), page(12)))
        );
        assert_eq!(engine.take_deferred_write(), None);
        assert_eq!(engine.target_state().recorded_page(&outro), Some(page(12)));
    }

    #[test]
    fn held_page_within_range_is_written_unchanged() {
        let mut engine = loaded_presenter(true);
        let proposal = engine
            .propose_local_change(LocalChange {
                deck: Some(DeckName::from("outro")),
                page: Some(4),
            })
            .expect("propose");
        let load = proposal.load.expect("load outro");
        assert_eq!(settle(&mut engine, &load, 12), Some(page(4)));
        let write = engine.take_deferred_write().expect("page write");
        assert_eq!(write.current_page_number[&DeckName::from("outro")], page(4));
    }

    #[test]
    fn held_page_is_dropped_when_leaving_the_deck() {
        let mut engine = loaded_presenter(true);
        let outro = DeckName::from("outro");
        engine
            .propose_local_change(LocalChange {
                deck: Some(outro.clone()),
                page: Some(500),
            })
            .expect("propose");
        engine.on_remote_snapshot(state("intro", 3).tap_deck("outro"));

        let back = engine
            .propose_local_change(LocalChange::deck("intro"))
            .expect("back");
        let patch = back.publish.expect("deck switch");
        assert!(!patch.current_page_number.contains_key(&outro));
        assert_eq!(engine.target_state().recorded_page(&outro), None);
        assert_eq!(engine.take_deferred_write(), None);
    }

    #[test]
    fn remote_page_for_held_deck_wins() {
        let mut engine = loaded_presenter(true);
        let outro = DeckName::from("outro");
        let proposal = engine
            .propose_local_change(LocalChange {
                deck: Some(outro.clone()),
                page: Some(500),
            })
            .expect("propose");

        let mut remote = state("intro", 3).tap_deck("outro");
        remote.current_page_number.insert(outro.clone(), page(2));
        engine.on_remote_snapshot(remote);

        let load = proposal.load.expect("load outro");
        assert_eq!(settle(&mut engine, &load, 12), Some(page(2)));
        assert_eq!(engine.take_deferred_write(), None);
    }

    #[test]
    fn held_page_without_authority_is_not_written() {
        let mut engine = loaded_presenter(false);
        let proposal = engine
            .propose_local_change(LocalChange {
                deck: Some(DeckName::from("outro")),
                page: Some(500),
            })
            .expect("propose");
        assert_eq!(proposal.publish, None);
        let load = proposal.load.expect("load outro");
        assert_eq!(settle(&mut engine, &load, 12), Some(page(12)));
        assert_eq!(engine.take_deferred_write(), None);
    }

    #[test]
    fn step_without_deck_is_an_error() {
        let engine = presenter(true);
        assert!(matches!(
            engine.step_change(PageStep::Next),
            Err(SyncError::NoDeckSelected)
        ));
    }

    #[test]
    fn identity_changes_toggle_publishing() {
        let mut engine = loaded_presenter(true);
        assert_eq!(engine.on_identity_changed(None), AuthorityChange::Revoked);
        let proposal = engine.propose_local_change(LocalChange::page(5)).expect("propose");
        assert_eq!(proposal.publish, None);

        let mut viewer = ReconciliationEngine::viewer(ScriptedViewer::default());
        assert!(viewer.subscribe_authority().is_none());
        assert_eq!(
            viewer.on_identity_changed(Some(Identity {
                user: "mallory".to_string()
            })),
            AuthorityChange::Unchanged
        );
        assert!(!viewer.can_write());
    }

    trait TapDeck {
        fn tap_deck(self, deck: &str) -> Self;
    }

    impl TapDeck for SharedPresentationState {
        fn tap_deck(mut self, deck: &str) -> Self {
            self.current_deck = Some(DeckName::from(deck));
            self
        }
    }
}
