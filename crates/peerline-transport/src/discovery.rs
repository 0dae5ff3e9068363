//! Discovery event subscriptions.

use std::sync::{Arc, Mutex, PoisonError};

use peerline_types::PeerInfo;
use tokio::sync::mpsc;
use tracing::trace;

/// Capacity of each subscriber's event queue.
const SUBSCRIPTION_CAPACITY: usize = 256;

/// Identifies one registered discovery subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A registered stream of discovery-found events.
///
/// The stream ends once the subscription is removed with
/// [`Transport::unsubscribe_discovery`](crate::Transport::unsubscribe_discovery).
#[derive(Debug)]
pub struct DiscoverySubscription {
    pub id: SubscriptionId,
    pub events: mpsc::Receiver<Arc<PeerInfo>>,
}

#[derive(Debug, Default)]
struct SubscriberTable {
    next_id: u64,
    entries: Vec<(SubscriptionId, mpsc::Sender<Arc<PeerInfo>>)>,
}

/// Subscriber bookkeeping shared by the transport backends.
#[derive(Debug, Clone, Default)]
pub struct Subscribers {
    table: Arc<Mutex<SubscriberTable>>,
}

impl Subscribers {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new subscriber.
    pub fn subscribe(&self) -> DiscoverySubscription {
        let (tx, rx) = mpsc::channel(SUBSCRIPTION_CAPACITY);
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.next_id += 1;
        let id = SubscriptionId(table.next_id);
        table.entries.push((id, tx));
        trace!(%id, "discovery subscription registered");
        DiscoverySubscription { id, events: rx }
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let before = table.entries.len();
        table.entries.retain(|(entry, _)| *entry != id);
        let removed = table.entries.len() != before;
        if removed {
            trace!(%id, "discovery subscription released");
        }
        removed
    }

    /// Deliver a found peer to every live subscriber.
    ///
    /// Never blocks: a subscriber whose queue is full misses the event, and
    /// subscribers whose receiver was dropped are pruned.
    pub fn publish(&self, peer: &Arc<PeerInfo>) {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        table.entries.retain(|(id, tx)| match tx.try_send(Arc::clone(peer)) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                trace!(%id, address = %peer.address, "subscriber queue full, event dropped");
                true
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
    }

    /// Number of registered subscriptions.
    pub fn count(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .entries
            .len()
    }
}
