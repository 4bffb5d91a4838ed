//! The shared state record as seen from one client.
//!
//! A subscription yields the current record first, then every later record
//! in the order the transport accepted the writes. [`MemoryChannel`] keeps
//! the record in process so several sessions can share it.

use std::future::Future;
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;

use podium_core::{SharedPresentationState, StatePatch};

use crate::error::ChannelError;

pub type SnapshotReceiver = mpsc::UnboundedReceiver<SharedPresentationState>;

pub trait RemoteStateChannel: Send + Sync + 'static {
    /// Start receiving snapshots of the shared record.
    fn subscribe(&self) -> impl Future<Output = Result<SnapshotReceiver, ChannelError>> + Send;

    /// Merge `patch` into the shared record. Each call is applied atomically.
    fn publish(&self, patch: StatePatch) -> impl Future<Output = Result<(), ChannelError>> + Send;
}

#[derive(Debug, Default)]
struct Hub {
    state: SharedPresentationState,
    subscribers: Vec<mpsc::UnboundedSender<SharedPresentationState>>,
}

/// In-process shared record. Clones share the same record.
#[derive(Debug, Clone, Default)]
pub struct MemoryChannel {
    hub: Arc<Mutex<Hub>>,
}

impl MemoryChannel {
    pub fn new(initial: SharedPresentationState) -> Self {
        Self {
            hub: Arc::new(Mutex::new(Hub {
                state: initial,
                subscribers: vec![],
            })),
        }
    }

    /// Current value of the record.
    pub fn snapshot(&self) -> SharedPresentationState {
        self.lock().state.clone()
    }

    /// Replace the whole record, as an external writer would.
    pub fn replace(&self, state: SharedPresentationState) {
        let mut hub = self.lock();
        hub.state = state;
        broadcast(&mut hub);
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Hub> {
        self.hub.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn broadcast(hub: &mut Hub) {
    let state = hub.state.clone();
    hub.subscribers.retain(|tx| tx.send(state.clone()).is_ok());
}

impl RemoteStateChannel for MemoryChannel {
    fn subscribe(&self) -> impl Future<Output = Result<SnapshotReceiver, ChannelError>> + Send {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut hub = self.lock();
        let result = match tx.send(hub.state.clone()) {
            Ok(()) => {
                hub.subscribers.push(tx);
                Ok(rx)
            }
            Err(_) => Err(ChannelError::Closed),
        };
        drop(hub);
        std::future::ready(result)
    }

    fn publish(&self, patch: StatePatch) -> impl Future<Output = Result<(), ChannelError>> + Send {
        {
            let mut hub = self.lock();
            hub.state.apply(&patch);
            broadcast(&mut hub);
        }
        std::future::ready(Ok(()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use podium_core::{DeckName, PageNumber};

    #[tokio::test]
    async fn subscribers_receive_current_then_updates() {
        let channel = MemoryChannel::new(SharedPresentationState::new("intro", PageNumber::FIRST));
        let mut rx = channel.subscribe().await.expect("subscribe");
        assert_eq!(rx.recv().await.expect("initial"), channel.snapshot());

        let page = PageNumber::new(4).expect("page");
        channel
            .publish(StatePatch::default().with_page(DeckName::from("intro"), page))
            .await
            .expect("publish");
        let next = rx.recv().await.expect("update");
        assert_eq!(next.page_for(&DeckName::from("intro")), page);
    }

    #[tokio::test]
    async fn dropped_subscribers_are_pruned() {
        let channel = MemoryChannel::default();
        let rx = channel.subscribe().await.expect("subscribe");
        drop(rx);
        channel.publish(StatePatch::default()).await.expect("publish");
        assert!(channel.lock().subscribers.is_empty());
    }
}
