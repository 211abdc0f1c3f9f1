//! Registry: tracks connected viewers and fans readings out to them

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use sensorcast_proto::Event;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::{RwLock, mpsc};
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum SubscriberSendError {
    #[error("subscriber {0} is gone")]
    Closed(SubscriberId),
    #[error("subscriber {0} is not keeping up")]
    Full(SubscriberId),
}

impl SubscriberSendError {
    pub fn subscriber(&self) -> SubscriberId {
        match self {
            SubscriberSendError::Closed(id) | SubscriberSendError::Full(id) => *id,
        }
    }
}

/// Result of one broadcast pass
#[derive(Debug, Default)]
pub struct BroadcastReport {
    pub delivered: usize,
    pub dropped: Vec<SubscriberId>,
}

/// Registry of live viewer channels
///
/// Delivery never waits on a viewer: each event is offered with `try_send`
/// and a closed or full channel gets its subscriber removed.
pub struct Registry {
    subscribers: RwLock<HashMap<SubscriberId, mpsc::Sender<Event>>>,
    next_id: AtomicU64,
}

impl Registry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            subscribers: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        })
    }

    /// Allocate a fresh subscriber identity
    pub fn next_id(&self) -> SubscriberId {
        SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    /// Add a subscriber. Returns false (and keeps the existing channel) if
    /// `id` is already registered.
    pub async fn register(&self, id: SubscriberId, sender: mpsc::Sender<Event>) -> bool {
        let mut subscribers = self.subscribers.write().await;
        if subscribers.contains_key(&id) {
            return false;
        }
        subscribers.insert(id, sender);
        info!("registered subscriber {id} ({} total)", subscribers.len());
        true
    }

    /// Remove a subscriber. Unknown ids are ignored.
    pub async fn unregister(&self, id: SubscriberId) -> bool {
        let mut subscribers = self.subscribers.write().await;
        let removed = subscribers.remove(&id).is_some();
        if removed {
            info!("unregistered subscriber {id} ({} left)", subscribers.len());
        }
        removed
    }

    pub async fn len(&self) -> usize {
        self.subscribers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.subscribers.read().await.is_empty()
    }

    /// Offer `event` to every subscriber registered when the pass starts.
    ///
    /// The read lock is held for the whole pass, so a concurrent `register`
    /// lands either entirely before it or entirely after it.
    pub async fn broadcast(&self, event: &Event) -> BroadcastReport {
        let mut report = BroadcastReport::default();
        let mut failed = Vec::new();

        {
            let subscribers = self.subscribers.read().await;
            for (id, sender) in subscribers.iter() {
                match sender.try_send(event.clone()) {
                    Ok(()) => report.delivered += 1,
                    Err(TrySendError::Closed(_)) => failed.push(SubscriberSendError::Closed(*id)),
                    Err(TrySendError::Full(_)) => failed.push(SubscriberSendError::Full(*id)),
                }
            }
        }

        if !failed.is_empty() {
            let mut subscribers = self.subscribers.write().await;
            for e in failed {
                warn!("{e}, dropping it");
                subscribers.remove(&e.subscriber());
                report.dropped.push(e.subscriber());
            }
        }

        debug!(
            "broadcast {}: {} delivered, {} dropped",
            event.name(),
            report.delivered,
            report.dropped.len()
        );
        report
    }

    /// Register a new viewer with its own queue of `capacity` events.
    ///
    /// The welcome acknowledgement is queued before registration, so it is
    /// always the first event the viewer sees.
    pub async fn subscribe(self: &Arc<Self>, capacity: usize) -> Subscription {
        // one extra slot for the welcome
        let (tx, rx) = mpsc::channel(capacity.max(1) + 1);
        if let Err(e) = tx.try_send(Event::welcome()) {
            // the queue is fresh and we hold the receiver
            warn!("welcome not queued: {e}");
        }

        let id = self.next_id();
        self.register(id, tx).await;

        Subscription {
            id,
            receiver: rx,
            registry: self.clone(),
        }
    }
}

/// Receiving side of one viewer. Unregisters itself when dropped.
pub struct Subscription {
    id: SubscriberId,
    receiver: mpsc::Receiver<Event>,
    registry: Arc<Registry>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Next event, or `None` once the registry has dropped this subscriber
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        // without a runtime the next broadcast finds the channel closed instead
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let registry = self.registry.clone();
            let id = self.id;
            handle.spawn(async move {
                registry.unregister(id).await;
            });
        }
    }
}
