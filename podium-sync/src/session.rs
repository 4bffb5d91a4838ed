//! Async driver around a [`ReconciliationEngine`].
//!
//! A [`Session`] owns the engine and runs one select loop over four inputs:
//! snapshots from the shared record, viewer events, finished background work
//! and commands from [`SessionHandle`]s. Loads run as spawned tasks (resolve
//! on the blocking pool, then the loader); writes go through a single
//! publisher task so they reach the record in the order they were made.

use std::sync::Arc;

use tokio::sync::{broadcast, mpsc, oneshot};

use podium_core::{
    DeckLocator, DeckName, DeckRecord, Identity, PageNumber, SharedPresentationState, StatePatch,
};

use crate::authority::AuthorityChange;
use crate::channel::RemoteStateChannel;
use crate::engine::{
    LoadOutcome, LoadRequest, LocalChange, LocalViewerState, PageStep, Proposal, Reconciliation,
    ReconciliationEngine,
};
use crate::error::{ChannelError, LoadError, SyncError};
use crate::loader::{Document, DocumentLoader};
use crate::viewer::{LoadToken, ViewerAdapter, ViewerEvent, ViewerEventReceiver};

const COMMAND_QUEUE: usize = 64;
const EVENT_BUFFER: usize = 256;

/// Something observers of a session may want to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// A deck is in the viewer and its page tree is known.
    DeckLoaded { deck: DeckName, pages_count: u32 },
    PageShown { deck: DeckName, page: PageNumber },
    /// No deck is selected any more.
    DeckClosed,
    LoadFailed { deck: DeckName, error: String },
    Published(StatePatch),
    PublishFailed { error: ChannelError },
    AuthorityChanged { can_write: bool },
}

/// Point-in-time view of a session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub local: LocalViewerState,
    pub shared: SharedPresentationState,
    pub target: SharedPresentationState,
    pub can_write: bool,
}

enum Command {
    Propose {
        change: LocalChange,
        respond_to: oneshot::Sender<Result<Proposal, SyncError>>,
    },
    Step {
        step: PageStep,
        respond_to: oneshot::Sender<Result<Proposal, SyncError>>,
    },
    Identity {
        identity: Option<Identity>,
        respond_to: oneshot::Sender<AuthorityChange>,
    },
    Inspect {
        respond_to: oneshot::Sender<SessionStatus>,
    },
    Shutdown,
}

enum Completion {
    Loaded {
        token: LoadToken,
        deck: DeckName,
        result: Result<Document, SyncError>,
    },
    Published {
        patch: StatePatch,
        result: Result<(), ChannelError>,
    },
}

// ---------------------------------------------------------------------------
// Handle
// ---------------------------------------------------------------------------

/// Cloneable front end to a running [`Session`].
#[derive(Debug, Clone)]
pub struct SessionHandle {
    commands: mpsc::Sender<Command>,
    events: broadcast::Sender<SessionEvent>,
}

impl SessionHandle {
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Apply a presenter change locally and publish it when allowed.
    pub async fn propose(&self, change: LocalChange) -> Result<Proposal, SyncError> {
        self.request(|respond_to| Command::Propose { change, respond_to })
            .await?
    }

    pub async fn goto(&self, page: i64) -> Result<Proposal, SyncError> {
        self.propose(LocalChange::page(page)).await
    }

    pub async fn switch_deck(&self, deck: impl Into<DeckName>) -> Result<Proposal, SyncError> {
        self.propose(LocalChange::deck(deck)).await
    }

    pub async fn next_page(&self) -> Result<Proposal, SyncError> {
        self.request(|respond_to| Command::Step {
            step: PageStep::Next,
            respond_to,
        })
        .await?
    }

    pub async fn previous_page(&self) -> Result<Proposal, SyncError> {
        self.request(|respond_to| Command::Step {
            step: PageStep::Previous,
            respond_to,
        })
        .await?
    }

    /// Forward a sign-in, sign-out or expiry.
    pub async fn set_identity(
        &self,
        identity: Option<Identity>,
    ) -> Result<AuthorityChange, SyncError> {
        self.request(|respond_to| Command::Identity {
            identity,
            respond_to,
        })
        .await
    }

    pub async fn status(&self) -> Result<SessionStatus, SyncError> {
        self.request(|respond_to| Command::Inspect { respond_to })
            .await
    }

    /// Ask the session loop to stop. Returns once the request is queued.
    pub async fn shutdown(&self) -> Result<(), SyncError> {
        self.commands
            .send(Command::Shutdown)
            .await
            .map_err(|_| SyncError::ChannelClosed("session commands"))
    }

    async fn request<T>(
        &self,
        command: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, SyncError> {
        let (respond_to, response) = oneshot::channel();
        self.commands
            .send(command(respond_to))
            .await
            .map_err(|_| SyncError::ChannelClosed("session commands"))?;
        response
            .await
            .map_err(|_| SyncError::ChannelClosed("session response"))
    }
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

struct Inbox {
    commands: mpsc::Receiver<Command>,
    viewer_events: ViewerEventReceiver,
    completions: mpsc::UnboundedReceiver<Completion>,
}

struct Driver<C, D, L, V> {
    engine: ReconciliationEngine<V>,
    channel: Arc<C>,
    locator: Arc<D>,
    loader: Arc<L>,
    completions: mpsc::UnboundedSender<Completion>,
    publisher: Option<mpsc::UnboundedSender<StatePatch>>,
    events: broadcast::Sender<SessionEvent>,
}

pub struct Session<C, D, L, V> {
    driver: Driver<C, D, L, V>,
    inbox: Inbox,
}

impl<C, D, L, V> Session<C, D, L, V>
where
    C: RemoteStateChannel,
    D: DeckLocator + 'static,
    L: DocumentLoader,
    V: ViewerAdapter,
{
    /// `viewer_events` must be the receiving end of the channel the engine's
    /// viewer reports to.
    pub fn new(
        engine: ReconciliationEngine<V>,
        viewer_events: ViewerEventReceiver,
        channel: Arc<C>,
        locator: Arc<D>,
        loader: Arc<L>,
    ) -> (Self, SessionHandle) {
        let (commands_tx, commands) = mpsc::channel(COMMAND_QUEUE);
        let (completions_tx, completions) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        let handle = SessionHandle {
            commands: commands_tx,
            events: events.clone(),
        };
        let session = Self {
            driver: Driver {
                engine,
                channel,
                locator,
                loader,
                completions: completions_tx,
                publisher: None,
                events,
            },
            inbox: Inbox {
                commands,
                viewer_events,
                completions,
            },
        };
        (session, handle)
    }

    /// Run until shut down, every handle is dropped, or the shared record's
    /// stream ends (an error).
    pub async fn run(self) -> Result<(), SyncError> {
        let Session {
            mut driver,
            mut inbox,
        } = self;

        let mut snapshots = driver
            .channel
            .subscribe()
            .await
            .map_err(SyncError::Subscribe)?;
        let (patches_tx, patches_rx) = mpsc::unbounded_channel();
        driver.publisher = Some(patches_tx);
        let publisher = tokio::spawn(publisher_task(
            Arc::clone(&driver.channel),
            patches_rx,
            driver.completions.clone(),
        ));

        let result = loop {
            tokio::select! {
                // Remote state first: a command never sees a snapshot that
                // was already queued when it arrived.
                biased;

                snapshot = snapshots.recv() => {
                    let Some(state) = snapshot else {
                        tracing::warn!("shared state stream ended");
                        break Err(SyncError::ChannelClosed("snapshot stream"));
                    };
                    driver.on_snapshot(state);
                }
                Some(completion) = inbox.completions.recv() => driver.on_completion(completion),
                Some(event) = inbox.viewer_events.recv() => driver.on_viewer_event(event),
                command = inbox.commands.recv() => match command {
                    None | Some(Command::Shutdown) => break Ok(()),
                    Some(command) => driver.on_command(command).await,
                },
            }
        };

        driver.publisher = None;
        if let Err(err) = publisher.await {
            tracing::warn!("publisher task ended abnormally: {err}");
        }
        tracing::debug!("session stopped");
        result
    }
}

impl<C, D, L, V> Driver<C, D, L, V>
where
    C: RemoteStateChannel,
    D: DeckLocator + 'static,
    L: DocumentLoader,
    V: ViewerAdapter,
{
    fn emit(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn on_snapshot(&mut self, state: SharedPresentationState) {
        tracing::debug!(
            "snapshot: deck={:?} page={:?}",
            state.current_deck.as_ref().map(DeckName::as_str),
            state.active_page().map(PageNumber::get)
        );
        let had_deck = self.engine.local_state().loaded_deck.is_some();
        let step = self.engine.on_remote_snapshot(state);
        if had_deck && self.engine.target_state().current_deck.is_none() {
            self.emit(SessionEvent::DeckClosed);
        }
        self.after_reconcile(step);
    }

    fn after_reconcile(&mut self, step: Reconciliation) {
        if let Some(request) = step.load {
            self.spawn_load(request, None);
        }
        if let Some(page) = step.page_applied {
            self.emit_page_shown(page);
        }
    }

    fn emit_page_shown(&self, page: PageNumber) {
        if let Some(deck) = self.engine.local_state().loaded_deck.clone() {
            self.emit(SessionEvent::PageShown { deck, page });
        }
    }

    /// Start loading `request`. A `resolved` record for the same deck skips
    /// the second lookup.
    fn spawn_load(&self, request: LoadRequest, resolved: Option<DeckRecord>) {
        let locator = Arc::clone(&self.locator);
        let loader = Arc::clone(&self.loader);
        let completions = self.completions.clone();
        let resolved = resolved.filter(|record| record.name == request.deck);
        tokio::spawn(async move {
            let LoadRequest { token, deck } = request;
            let result = load_deck(locator, loader, deck.clone(), resolved).await;
            let _ = completions.send(Completion::Loaded {
                token,
                deck,
                result,
            });
        });
    }

    fn on_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Loaded {
                token,
                deck,
                result,
            } => match self.engine.on_load_finished(token, result) {
                Ok(LoadOutcome::DocumentSet | LoadOutcome::Superseded) => {}
                Err(err) => self.emit(SessionEvent::LoadFailed {
                    deck,
                    error: err.to_string(),
                }),
            },
            Completion::Published { patch, result } => match result {
                Ok(()) => {
                    tracing::debug!("published {patch:?}");
                    self.emit(SessionEvent::Published(patch));
                }
                Err(ChannelError::Unauthorized) => {
                    tracing::warn!("write rejected as unauthorized, dropping identity");
                    self.emit(SessionEvent::PublishFailed {
                        error: ChannelError::Unauthorized,
                    });
                    self.set_identity(None);
                }
                Err(error) => {
                    let err = SyncError::PublishFailure(error.clone());
                    tracing::warn!("{err}");
                    self.emit(SessionEvent::PublishFailed { error });
                }
            },
        }
    }

    fn on_viewer_event(&mut self, event: ViewerEvent) {
        match event {
            ViewerEvent::PagesReady { token } => {
                let was_ready = self.engine.local_state().loaded_page_count.is_some();
                let applied = self.engine.on_viewer_ready(token);
                let local = self.engine.local_state();
                if let (false, Some(deck), Some(pages_count)) =
                    (was_ready, local.loaded_deck.clone(), local.loaded_page_count)
                {
                    self.emit(SessionEvent::DeckLoaded { deck, pages_count });
                }
                if let Some(page) = applied {
                    self.emit_page_shown(page);
                }
                if let Some(patch) = self.engine.take_deferred_write() {
                    self.enqueue_publish(patch);
                }
            }
            ViewerEvent::Resized => self.engine.on_viewer_resized(),
        }
    }

    async fn on_command(&mut self, command: Command) {
        match command {
            Command::Propose { change, respond_to } => {
                let result = self.propose(change).await;
                let _ = respond_to.send(result);
            }
            Command::Step { step, respond_to } => {
                let result = match self.engine.step_change(step) {
                    Ok(change) => self.propose(change).await,
                    Err(err) => Err(err),
                };
                let _ = respond_to.send(result);
            }
            Command::Identity {
                identity,
                respond_to,
            } => {
                let change = self.set_identity(identity);
                let _ = respond_to.send(change);
            }
            Command::Inspect { respond_to } => {
                let _ = respond_to.send(SessionStatus {
                    local: self.engine.local_state().clone(),
                    shared: self.engine.shared_state().clone(),
                    target: self.engine.target_state().clone(),
                    can_write: self.engine.can_write(),
                });
            }
            Command::Shutdown => {}
        }
    }

    async fn propose(&mut self, change: LocalChange) -> Result<Proposal, SyncError> {
        let resolved = match change.deck.clone() {
            Some(deck) => {
                let locator = Arc::clone(&self.locator);
                Some(
                    tokio::task::spawn_blocking(move || locator.resolve(&deck))
                        .await
                        .map_err(|err| SyncError::ChannelClosed(join_error_kind(&err)))??,
                )
            }
            None => None,
        };
        let proposal = self.engine.propose_local_change(change)?;
        if let Some(request) = proposal.load.clone() {
            self.spawn_load(request, resolved);
        }
        if let Some(page) = proposal.page_applied {
            self.emit_page_shown(page);
        }
        if let Some(patch) = proposal.publish.clone() {
            self.enqueue_publish(patch);
        }
        Ok(proposal)
    }

    fn enqueue_publish(&self, patch: StatePatch) {
        let queued = self
            .publisher
            .as_ref()
            .is_some_and(|publisher| publisher.send(patch).is_ok());
        if !queued {
            tracing::warn!("publisher is not running, write dropped");
            self.emit(SessionEvent::PublishFailed {
                error: ChannelError::Closed,
            });
        }
    }

    fn set_identity(&mut self, identity: Option<Identity>) -> AuthorityChange {
        let change = self.engine.on_identity_changed(identity);
        if change != AuthorityChange::Unchanged {
            self.emit(SessionEvent::AuthorityChanged {
                can_write: self.engine.can_write(),
            });
        }
        change
    }
}

// ---------------------------------------------------------------------------
// Background work
// ---------------------------------------------------------------------------

async fn load_deck<D, L>(
    locator: Arc<D>,
    loader: Arc<L>,
    deck: DeckName,
    resolved: Option<DeckRecord>,
) -> Result<Document, SyncError>
where
    D: DeckLocator + 'static,
    L: DocumentLoader,
{
    let record = match resolved {
        Some(record) => record,
        None => {
            let name = deck.clone();
            tokio::task::spawn_blocking(move || locator.resolve(&name))
                .await
                .map_err(|err| SyncError::LoadFailure {
                    deck: deck.clone(),
                    source: LoadError::Transport(format!("resolve task failed: {err}")),
                })??
        }
    };
    loader
        .load(&record.address)
        .await
        .map_err(|source| SyncError::LoadFailure { deck, source })
}

/// Applies writes one at a time, in submission order.
async fn publisher_task<C: RemoteStateChannel>(
    channel: Arc<C>,
    mut patches: mpsc::UnboundedReceiver<StatePatch>,
    completions: mpsc::UnboundedSender<Completion>,
) {
    while let Some(patch) = patches.recv().await {
        let result = channel.publish(patch.clone()).await;
        if completions
            .send(Completion::Published { patch, result })
            .is_err()
        {
            break;
        }
    }
}

fn join_error_kind(err: &tokio::task::JoinError) -> &'static str {
    if err.is_cancelled() {
        "resolve task cancelled"
    } else {
        "resolve task panicked"
    }
}
