use std::future::Future;
use std::time::Duration;

use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use parley_types::Id;
use parley_types::events::StreamEvent;

use crate::access::AccessGate;
use crate::error::ChatError;
use crate::identity::Identity;
use crate::registry::{SubscriberRegistry, Subscription};

/// Liveness poll interval: how long a dead connection can linger before teardown.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Outbound channel capacity per subscription.
pub const DEFAULT_BUFFER: usize = 64;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    pub poll_interval: Duration,
    pub buffer: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            buffer: DEFAULT_BUFFER,
        }
    }
}

/// Where a session writes its events. Implemented by the WebSocket adapter and by tests.
pub trait EventSink: Send {
    fn send(&mut self, event: StreamEvent) -> impl Future<Output = anyhow::Result<()>> + Send;

    /// Polled on every liveness tick.
    fn is_open(&self) -> bool;

    /// Called once on entering `Closed`.
    fn close(&mut self) -> impl Future<Output = ()> + Send {
        async {}
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Connecting,
    Active,
    Closed,
}

/// Why a session reached `Closed`.
#[derive(Debug)]
pub enum CloseReason {
    /// Failed identity or membership check; never registered
    Rejected(ChatError),
    /// Remote end went away, seen on a liveness tick
    RemoteClosed,
    /// The broadcaster pruned this subscription and its channel drained
    SubscriptionDropped,
    /// Writing to the connection failed
    SinkFailed,
}

/// One streaming connection: `Connecting → Active → Closed`.
pub struct StreamSession<S> {
    gate: AccessGate,
    registry: SubscriberRegistry,
    config: SessionConfig,
    thread_id: Id,
    sink: S,
    state: SessionState,
}

impl<S: EventSink> StreamSession<S> {
    pub fn new(
        gate: AccessGate,
        registry: SubscriberRegistry,
        config: SessionConfig,
        thread_id: Id,
        sink: S,
    ) -> Self {
        Self {
            gate,
            registry,
            config,
            thread_id,
            sink,
            state: SessionState::Connecting,
        }
    }

    /// Drive the session to completion. Returns once `Closed` is reached, with
    /// the subscription (if any) already gone from the registry.
    pub async fn run(mut self, token: &str) -> CloseReason {
        let reason = match self.gate.authorize(token, self.thread_id).await {
            Ok(identity) => self.serve(&identity).await,
            Err(err) => {
                if let ChatError::Internal(cause) = &err {
                    tracing::error!("Stream authorization failed on thread {}: {:#}", self.thread_id, cause);
                }
                info!("Stream rejected on thread {}: {}", self.thread_id, err);
                let _ = self.sink.send(StreamEvent::error(err.to_string())).await;
                CloseReason::Rejected(err)
            }
        };

        self.transition(SessionState::Closed);
        self.sink.close().await;
        reason
    }

    async fn serve(&mut self, identity: &Identity) -> CloseReason {
        let (subscription, mut deliveries) =
            Subscription::new(self.thread_id, identity.user_id, self.config.buffer);
        // Dropped on every way out of this function, including cancellation
        let _registration = self.registry.register_guarded(subscription);
        self.transition(SessionState::Active);

        info!(
            "{} ({}) streaming thread {}",
            identity.username, identity.user_id, self.thread_id
        );

        if self.sink.send(StreamEvent::connected(self.thread_id)).await.is_err() {
            return CloseReason::SinkFailed;
        }

        let mut liveness = tokio::time::interval(self.config.poll_interval);
        liveness.set_missed_tick_behavior(MissedTickBehavior::Delay);
        liveness.tick().await;

        let reason = loop {
            tokio::select! {
                delivery = deliveries.recv() => match delivery {
                    Some(message) => {
                        if let Err(e) = self.sink.send(StreamEvent::NewMessage(message)).await {
                            warn!("Stream write failed on thread {}: {}", self.thread_id, e);
                            break CloseReason::SinkFailed;
                        }
                    }
                    None => {
                        let _ = self
                            .sink
                            .send(StreamEvent::error("Subscription dropped: client is not keeping up"))
                            .await;
                        break CloseReason::SubscriptionDropped;
                    }
                },
                _ = liveness.tick() => {
                    if !self.sink.is_open() {
                        break CloseReason::RemoteClosed;
                    }
                }
            }
        };

        info!(
            "{} ({}) stopped streaming thread {}: {:?}",
            identity.username, identity.user_id, self.thread_id, reason
        );
        reason
    }

    fn transition(&mut self, next: SessionState) {
        debug!("Stream on thread {}: {:?} -> {:?}", self.thread_id, self.state, next);
        self.state = next;
    }
}
