use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::debug;
use uuid::Uuid;

use parley_types::Id;
use parley_types::models::MessageView;

/// One live connection's interest in a thread.
///
/// The receiving half of the channel belongs to the stream session; the
/// registry only ever holds this sending handle.
#[derive(Debug, Clone)]
pub struct Subscription {
    pub id: Uuid,
    pub thread_id: Id,
    pub user_id: Id,
    tx: mpsc::Sender<MessageView>,
}

/// Why a delivery could not be enqueued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryFailure {
    /// Bounded outbound channel is full
    Full,
    /// Session side already dropped its receiver
    Closed,
}

impl Subscription {
    pub fn new(thread_id: Id, user_id: Id, capacity: usize) -> (Self, mpsc::Receiver<MessageView>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        let subscription = Self {
            id: Uuid::new_v4(),
            thread_id,
            user_id,
            tx,
        };
        (subscription, rx)
    }

    /// Non-blocking enqueue.
    pub fn try_deliver(&self, message: &MessageView) -> Result<(), DeliveryFailure> {
        self.tx.try_send(message.clone()).map_err(|err| match err {
            TrySendError::Full(_) => DeliveryFailure::Full,
            TrySendError::Closed(_) => DeliveryFailure::Closed,
        })
    }
}

/// Process-wide map from thread id to its live subscriptions.
///
/// Every operation takes the one lock for a short list operation and releases
/// it before returning. A thread with no subscriptions has no entry.
#[derive(Clone, Default)]
pub struct SubscriberRegistry {
    inner: Arc<Mutex<HashMap<Id, Vec<Subscription>>>>,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<Id, Vec<Subscription>>> {
        // Each critical section leaves the map consistent, so a poisoned lock is still usable.
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Append a subscription. Registering the same user twice yields two entries.
    pub fn register(&self, subscription: Subscription) {
        let thread_id = subscription.thread_id;
        let mut threads = self.lock();
        let entry = threads.entry(thread_id).or_default();
        entry.push(subscription);
        debug!("Registered subscription on thread {} ({} live)", thread_id, entry.len());
    }

    /// Register and get a guard that unregisters when dropped.
    pub fn register_guarded(&self, subscription: Subscription) -> Registration {
        let registration = Registration {
            registry: self.clone(),
            thread_id: subscription.thread_id,
            id: subscription.id,
        };
        self.register(subscription);
        registration
    }

    /// Remove one subscription by id. Returns false if it was already gone.
    pub fn unregister(&self, thread_id: Id, id: Uuid) -> bool {
        self.unregister_many(thread_id, &[id]) == 1
    }

    /// Remove a batch of subscriptions from one thread; returns how many were present.
    pub fn unregister_many(&self, thread_id: Id, ids: &[Uuid]) -> usize {
        let mut threads = self.lock();
        let Some(entry) = threads.get_mut(&thread_id) else {
            return 0;
        };

        let before = entry.len();
        entry.retain(|s| !ids.contains(&s.id));
        let removed = before - entry.len();

        if entry.is_empty() {
            threads.remove(&thread_id);
            debug!("Thread {} has no live subscriptions, entry dropped", thread_id);
        }
        removed
    }

    /// Copy of the thread's subscriptions, so delivery can happen without the lock.
    pub fn snapshot(&self, thread_id: Id) -> Vec<Subscription> {
        self.lock().get(&thread_id).cloned().unwrap_or_default()
    }

    pub fn subscriber_count(&self, thread_id: Id) -> usize {
        self.lock().get(&thread_id).map_or(0, Vec::len)
    }

    pub fn thread_count(&self) -> usize {
        self.lock().len()
    }

    pub fn contains_thread(&self, thread_id: Id) -> bool {
        self.lock().contains_key(&thread_id)
    }
}

/// Keeps a subscription registered for as long as it lives.
///
/// Dropping it (normal return, early error, task abort or unwind) removes the
/// entry. Removal is idempotent, so a subscription already pruned by the
/// broadcaster is fine.
#[must_use = "dropping the registration unregisters immediately"]
pub struct Registration {
    registry: SubscriberRegistry,
    thread_id: Id,
    id: Uuid,
}

impl Registration {
    pub fn id(&self) -> Uuid {
        self.id
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        self.registry.unregister(self.thread_id, self.id);
    }
}
