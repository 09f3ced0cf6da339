use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::{debug, warn};

use parley_types::Id;
use parley_types::models::MessageView;

use crate::registry::SubscriberRegistry;

/// Outcome of one fan-out pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: usize,
    pub dropped: usize,
}

type OrderLocks = HashMap<Id, Arc<Mutex<()>>>;

/// Fans committed messages out to a thread's live subscriptions.
#[derive(Clone)]
pub struct Broadcaster {
    registry: SubscriberRegistry,
    /// One lock per thread with a publish in flight, held across commit + fan-out.
    commit_order: Arc<std::sync::Mutex<OrderLocks>>,
}

impl Broadcaster {
    pub fn new(registry: SubscriberRegistry) -> Self {
        Self {
            registry,
            commit_order: Arc::default(),
        }
    }

    pub fn registry(&self) -> &SubscriberRegistry {
        &self.registry
    }

    /// Deliver `message` to every subscription on the thread except the sender's.
    ///
    /// Delivery is a non-blocking enqueue against a snapshot. Subscriptions
    /// that cannot take the message are pruned in one batch afterwards.
    pub fn broadcast(&self, thread_id: Id, message: &MessageView, sender_id: Id) -> DeliveryReport {
        let subscriptions = self.registry.snapshot(thread_id);
        let mut report = DeliveryReport::default();
        let mut dead = Vec::new();

        for subscription in &subscriptions {
            if subscription.user_id == sender_id {
                continue;
            }

            match subscription.try_deliver(message) {
                Ok(()) => report.delivered += 1,
                Err(failure) => {
                    warn!(
                        "Dropping subscription {} (user {}) on thread {}: {:?}",
                        subscription.id, subscription.user_id, thread_id, failure
                    );
                    dead.push(subscription.id);
                }
            }
        }
        drop(subscriptions);

        if !dead.is_empty() {
            self.registry.unregister_many(thread_id, &dead);
            report.dropped = dead.len();
        }

        debug!(
            "Broadcast message {} on thread {}: {} delivered, {} dropped",
            message.id, thread_id, report.delivered, report.dropped
        );
        report
    }

    /// Run `commit`, then broadcast what it committed to `thread_id`.
    ///
    /// Nothing is fanned out unless the commit succeeded. Publishes on the same
    /// thread are serialized so listeners see messages in commit order;
    /// publishes on different threads do not wait for each other.
    pub async fn publish<F, E>(
        &self,
        thread_id: Id,
        sender_id: Id,
        commit: F,
    ) -> Result<(MessageView, DeliveryReport), E>
    where
        F: Future<Output = Result<MessageView, E>>,
    {
        let lock = self.order_lock(thread_id);
        let result = {
            let _order = lock.lock().await;
            match commit.await {
                Ok(message) => {
                    let report = self.broadcast(thread_id, &message, sender_id);
                    Ok((message, report))
                }
                Err(e) => Err(e),
            }
        };
        self.release_order_lock(thread_id, lock);
        result
    }

    #[cfg(test)]
    fn ordered_threads(&self) -> usize {
        self.locks().len()
    }

    fn locks(&self) -> std::sync::MutexGuard<'_, OrderLocks> {
        self.commit_order
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn order_lock(&self, thread_id: Id) -> Arc<Mutex<()>> {
        self.locks().entry(thread_id).or_default().clone()
    }

    fn release_order_lock(&self, thread_id: Id, lock: Arc<Mutex<()>>) {
        let mut locks = self.locks();
        drop(lock);
        // Clones are only handed out under this lock, so a count of one means nobody is waiting
        if locks.get(&thread_id).is_some_and(|l| Arc::strong_count(l) == 1) {
            locks.remove(&thread_id);
        }
    }
}
