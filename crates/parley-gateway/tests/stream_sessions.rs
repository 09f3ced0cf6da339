//! End-to-end behaviour of stream sessions against an in-memory store: fan-out,
//! sender exclusion, teardown on disconnect, and slow-consumer pruning.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::{Semaphore, mpsc};
use tokio::task::JoinHandle;

use parley_db::Database;
use parley_gateway::ChatError;
use parley_gateway::access::AccessGate;
use parley_gateway::broadcaster::Broadcaster;
use parley_gateway::directory::ThreadDirectory;
use parley_gateway::identity::{Identity, TokenConfig, TokenVerifier};
use parley_gateway::registry::SubscriberRegistry;
use parley_gateway::session::{CloseReason, EventSink, SessionConfig, StreamSession};
use parley_types::Id;
use parley_types::events::StreamEvent;
use parley_types::models::MessageView;

const POLL: Duration = Duration::from_millis(25);
const WAIT: Duration = Duration::from_secs(2);

/// Records events; optionally stalls on message delivery until permits are added.
struct ChannelSink {
    events: mpsc::UnboundedSender<StreamEvent>,
    open: Arc<AtomicBool>,
    stall: Option<Arc<Semaphore>>,
}

impl EventSink for ChannelSink {
    async fn send(&mut self, event: StreamEvent) -> anyhow::Result<()> {
        if let (Some(stall), StreamEvent::NewMessage(_)) = (&self.stall, &event) {
            stall.acquire().await?.forget();
        }
        self.events
            .send(event)
            .map_err(|_| anyhow::anyhow!("test receiver dropped"))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

struct Client {
    events: mpsc::UnboundedReceiver<StreamEvent>,
    open: Arc<AtomicBool>,
    handle: JoinHandle<CloseReason>,
}

impl Client {
    async fn next(&mut self) -> StreamEvent {
        tokio::time::timeout(WAIT, self.events.recv())
            .await
            .expect("timed out waiting for stream event")
            .expect("stream ended")
    }

    async fn expect_connected(&mut self) {
        match self.next().await {
            StreamEvent::Status { connected: true, .. } => {}
            other => panic!("expected connected status, got {:?}", other),
        }
    }

    async fn expect_message(&mut self) -> MessageView {
        match self.next().await {
            StreamEvent::NewMessage(message) => message,
            other => panic!("expected new_message, got {:?}", other),
        }
    }

    async fn finished(self) -> CloseReason {
        tokio::time::timeout(WAIT, self.handle)
            .await
            .expect("session did not close")
            .expect("session task panicked")
    }
}

struct Harness {
    gate: AccessGate,
    registry: SubscriberRegistry,
    broadcaster: Broadcaster,
    directory: ThreadDirectory,
    thread: Id,
    alice: Identity,
    bob: Identity,
    carol: Identity,
}

impl Harness {
    fn new() -> Self {
        let db = Database::open_in_memory().unwrap();
        let identity = |name: &str| Identity {
            user_id: db.create_user(name, "x").unwrap(),
            username: name.to_string(),
        };
        let (alice, bob, carol) = (identity("alice"), identity("bob"), identity("carol"));
        let thread = db
            .create_group_thread("Team", &[alice.user_id, bob.user_id])
            .unwrap()
            .id;

        let verifier = TokenVerifier::new(&TokenConfig {
            secret: "stream-tests".into(),
            lifetime: chrono::Duration::hours(1),
        });
        let gate = AccessGate::new(Arc::new(db), verifier);
        let registry = SubscriberRegistry::new();

        Self {
            directory: ThreadDirectory::new(gate.clone()),
            broadcaster: Broadcaster::new(registry.clone()),
            gate,
            registry,
            thread,
            alice,
            bob,
            carol,
        }
    }

    fn token(&self, who: &Identity) -> String {
        self.gate.verifier().issue(who.user_id, &who.username).unwrap()
    }

    fn open_with(&self, token: String, buffer: usize, stall: Option<Arc<Semaphore>>) -> Client {
        let (tx, rx) = mpsc::unbounded_channel();
        let open = Arc::new(AtomicBool::new(true));
        let sink = ChannelSink {
            events: tx,
            open: open.clone(),
            stall,
        };
        let config = SessionConfig {
            poll_interval: POLL,
            buffer,
        };
        let session = StreamSession::new(
            self.gate.clone(),
            self.registry.clone(),
            config,
            self.thread,
            sink,
        );
        let handle = tokio::spawn(async move { session.run(&token).await });
        Client {
            events: rx,
            open,
            handle,
        }
    }

    async fn connect(&self, who: &Identity) -> Client {
        let mut client = self.open_with(self.token(who), 64, None);
        client.expect_connected().await;
        client
    }

    async fn send(&self, who: &Identity, content: &str) -> MessageView {
        let (message, _) = self
            .broadcaster
            .publish(
                self.thread,
                who.user_id,
                self.directory.commit_message(who, self.thread, content.to_string()),
            )
            .await
            .unwrap();
        message
    }

    fn subscribers_for(&self, who: &Identity) -> usize {
        self.registry
            .snapshot(self.thread)
            .iter()
            .filter(|s| s.user_id == who.user_id)
            .count()
    }
}

#[tokio::test]
async fn recipient_sees_message_once_and_sender_sees_nothing() {
    let h = Harness::new();
    let mut alice = h.connect(&h.alice).await;
    let mut bob = h.connect(&h.bob).await;

    let sent = h.send(&h.alice, "hi").await;

    let got = bob.expect_message().await;
    assert_eq!(got.content, "hi");
    assert_eq!(got.sender_id, h.alice.user_id);
    assert_eq!(got.id, sent.id);

    tokio::time::sleep(POLL * 2).await;
    assert!(bob.events.try_recv().is_err(), "bob got a duplicate");
    assert!(alice.events.try_recv().is_err(), "alice saw her own message");
}

#[tokio::test]
async fn messages_arrive_in_commit_order() {
    let h = Harness::new();
    let mut bob = h.connect(&h.bob).await;

    let mut sent = Vec::new();
    for i in 0..10 {
        sent.push(h.send(&h.alice, &format!("m{}", i)).await.id);
    }

    let mut received = Vec::new();
    for _ in 0..10 {
        received.push(bob.expect_message().await.id);
    }
    assert_eq!(received, sent);
}

#[tokio::test]
async fn every_session_of_a_user_is_independent() {
    let h = Harness::new();
    let mut phone = h.connect(&h.bob).await;
    let mut laptop = h.connect(&h.bob).await;
    assert_eq!(h.subscribers_for(&h.bob), 2);

    h.send(&h.alice, "both").await;
    assert_eq!(phone.expect_message().await.content, "both");
    assert_eq!(laptop.expect_message().await.content, "both");

    phone.open.store(false, Ordering::SeqCst);
    assert!(matches!(phone.finished().await, CloseReason::RemoteClosed));
    assert_eq!(h.subscribers_for(&h.bob), 1);

    h.send(&h.alice, "laptop only").await;
    assert_eq!(laptop.expect_message().await.content, "laptop only");
}

#[tokio::test]
async fn abrupt_close_is_noticed_within_a_poll_interval() {
    let h = Harness::new();
    let bob = h.connect(&h.bob).await;
    assert!(h.registry.contains_thread(h.thread));

    let started = Instant::now();
    bob.open.store(false, Ordering::SeqCst);
    let reason = bob.finished().await;

    assert!(matches!(reason, CloseReason::RemoteClosed));
    // One interval plus scheduling slack
    assert!(started.elapsed() < POLL * 8, "took {:?}", started.elapsed());
    assert!(h.registry.snapshot(h.thread).is_empty());
    assert!(!h.registry.contains_thread(h.thread));
}

#[tokio::test]
async fn aborted_session_still_unregisters() {
    let h = Harness::new();
    let bob = h.connect(&h.bob).await;
    assert_eq!(h.subscribers_for(&h.bob), 1);

    bob.handle.abort();
    let _ = bob.handle.await;

    assert!(!h.registry.contains_thread(h.thread));
}

#[tokio::test]
async fn bad_token_gets_one_error_and_never_registers() {
    let h = Harness::new();
    let mut client = h.open_with("not-a-token".into(), 64, None);

    match client.next().await {
        StreamEvent::Error { message } => assert_eq!(message, "Invalid or expired token"),
        other => panic!("expected error, got {:?}", other),
    }
    let reason = tokio::time::timeout(WAIT, &mut client.handle).await.unwrap().unwrap();
    assert!(matches!(reason, CloseReason::Rejected(ChatError::Unauthenticated)));
    assert!(client.events.recv().await.is_none(), "nothing may follow the error");
    assert_eq!(h.registry.thread_count(), 0);
}

#[tokio::test]
async fn non_participant_is_denied_in_band() {
    let h = Harness::new();
    let mut carol = h.open_with(h.token(&h.carol), 64, None);

    match carol.next().await {
        StreamEvent::Error { message } => {
            assert_eq!(message, "You are not a participant in this thread")
        }
        other => panic!("expected error, got {:?}", other),
    }
    assert!(matches!(
        carol.finished().await,
        CloseReason::Rejected(ChatError::PermissionDenied)
    ));
    assert_eq!(h.registry.thread_count(), 0);
}

#[tokio::test]
async fn no_backlog_after_reconnect() {
    let h = Harness::new();
    let bob = h.connect(&h.bob).await;
    bob.open.store(false, Ordering::SeqCst);
    bob.finished().await;

    h.send(&h.alice, "while away").await;

    let mut bob = h.connect(&h.bob).await;
    h.send(&h.alice, "after return").await;
    assert_eq!(bob.expect_message().await.content, "after return");

    // The gap is still available through history
    let history = h.directory.history(&h.bob, h.thread, None, None).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[1].content, "while away");
}

#[tokio::test]
async fn slow_consumer_is_pruned_and_told() {
    let h = Harness::new();
    let stall = Arc::new(Semaphore::new(0));
    let mut bob = h.open_with(h.token(&h.bob), 1, Some(stall.clone()));
    bob.expect_connected().await;

    // First message is taken by the stalled session, second fills the buffer,
    // third finds it full.
    let first = h.send(&h.alice, "one").await;
    tokio::time::sleep(POLL).await;
    let second = h.send(&h.alice, "two").await;
    let (_, report) = h
        .broadcaster
        .publish(
            h.thread,
            h.alice.user_id,
            h.directory.commit_message(&h.alice, h.thread, "three".into()),
        )
        .await
        .unwrap();
    assert_eq!(report.dropped, 1);
    assert!(!h.registry.contains_thread(h.thread));

    stall.add_permits(10);
    assert_eq!(bob.expect_message().await.id, first.id);
    assert_eq!(bob.expect_message().await.id, second.id);
    match bob.next().await {
        StreamEvent::Error { message } => assert!(message.contains("Subscription dropped")),
        other => panic!("expected error, got {:?}", other),
    }
    assert!(matches!(bob.finished().await, CloseReason::SubscriptionDropped));
}
