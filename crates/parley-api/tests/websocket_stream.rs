//! The stream endpoint over a real socket: the server is bound to an ephemeral
//! port and a WebSocket client talks to it.

use std::net::SocketAddr;
use std::time::{Duration, Instant};

use futures_util::StreamExt;
use serde_json::Value;
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use parley_api::auth::{AppState, AppStateInner};
use parley_db::Database;
use parley_gateway::identity::{Identity, TokenConfig};
use parley_gateway::session::SessionConfig;
use parley_types::Id;

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

const POLL: Duration = Duration::from_millis(50);
const WAIT: Duration = Duration::from_secs(3);

struct Server {
    addr: SocketAddr,
    state: AppState,
    thread: Id,
    alice: Identity,
    bob: Identity,
    carol: Identity,
}

impl Server {
    async fn start() -> Self {
        let tokens = TokenConfig {
            secret: "ws-tests".into(),
            lifetime: chrono::Duration::hours(1),
        };
        let session = SessionConfig {
            poll_interval: POLL,
            buffer: 16,
        };
        let state = AppStateInner::new(Database::open_in_memory().unwrap(), &tokens, session);

        let identity = |name: &str| Identity {
            user_id: state.db.create_user(name, "x").unwrap(),
            username: name.to_string(),
        };
        let (alice, bob, carol) = (identity("alice"), identity("bob"), identity("carol"));
        let thread = state
            .db
            .create_group_thread("Team", &[alice.user_id, bob.user_id])
            .unwrap()
            .id;

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let app = parley_api::router(state.clone());
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });

        Self {
            addr,
            state,
            thread,
            alice,
            bob,
            carol,
        }
    }

    fn token(&self, who: &Identity) -> String {
        self.state.gate.verifier().issue(who.user_id, &who.username).unwrap()
    }

    fn stream_url(&self, query_token: &str) -> String {
        format!("ws://{}/threads/{}/stream?token={}", self.addr, self.thread, query_token)
    }

    async fn connect(&self, query_token: &str) -> Socket {
        let (socket, _) = connect_async(self.stream_url(query_token)).await.unwrap();
        socket
    }
}

async fn next_event(socket: &mut Socket) -> Value {
    loop {
        let frame = tokio::time::timeout(WAIT, socket.next())
            .await
            .expect("timed out waiting for a frame")
            .expect("socket ended")
            .expect("socket error");
        match frame {
            Message::Text(text) => return serde_json::from_str(&text).unwrap(),
            Message::Ping(_) | Message::Pong(_) => continue,
            other => panic!("expected a text frame, got {:?}", other),
        }
    }
}

/// The server must end the socket: a close frame, end of stream, or a reset.
async fn expect_closed(socket: &mut Socket) {
    loop {
        match tokio::time::timeout(WAIT, socket.next()).await.expect("socket left open") {
            Some(Ok(Message::Close(_))) | None | Some(Err(_)) => return,
            Some(Ok(Message::Ping(_) | Message::Pong(_))) => continue,
            Some(Ok(other)) => panic!("expected close, got {:?}", other),
        }
    }
}

async fn wait_until(what: &str, condition: impl Fn() -> bool) -> Duration {
    let started = Instant::now();
    while !condition() {
        assert!(started.elapsed() < WAIT, "timed out waiting until {}", what);
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    started.elapsed()
}

#[tokio::test]
async fn first_frame_is_status_and_drop_unregisters() {
    let server = Server::start().await;
    let mut socket = server.connect(&server.token(&server.bob)).await;

    let status = next_event(&mut socket).await;
    assert_eq!(status["type"], "status");
    assert_eq!(status["data"]["connected"], true);
    assert_eq!(server.state.registry.subscriber_count(server.thread), 1);

    // No close handshake; the TCP connection just goes away
    drop(socket);
    let registry = server.state.registry.clone();
    let thread = server.thread;
    let took = wait_until("the registry is empty", || !registry.contains_thread(thread)).await;

    // One poll interval plus scheduling slack
    assert!(took < POLL * 10, "teardown took {:?}", took);
}

#[tokio::test]
async fn messages_arrive_as_json_frames() {
    let server = Server::start().await;
    let mut alice = server.connect(&server.token(&server.alice)).await;
    assert_eq!(next_event(&mut alice).await["type"], "status");

    let state = &server.state;
    state
        .broadcaster
        .publish(
            server.thread,
            server.bob.user_id,
            state.directory.commit_message(&server.bob, server.thread, "over the wire".into()),
        )
        .await
        .unwrap();

    let event = next_event(&mut alice).await;
    assert_eq!(event["type"], "new_message");
    assert_eq!(event["data"]["content"], "over the wire");
    assert_eq!(event["data"]["sender_username"], "bob");
}

#[tokio::test]
async fn bad_query_token_gets_one_error_then_close() {
    let server = Server::start().await;
    let mut socket = server.connect("garbage").await;

    let event = next_event(&mut socket).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["data"]["message"], "Invalid or expired token");

    expect_closed(&mut socket).await;
    assert_eq!(server.state.registry.thread_count(), 0);
}

#[tokio::test]
async fn non_participant_is_refused_in_band() {
    let server = Server::start().await;
    let mut socket = server.connect(&server.token(&server.carol)).await;

    let event = next_event(&mut socket).await;
    assert_eq!(event["type"], "error");
    assert_eq!(event["data"]["message"], "You are not a participant in this thread");

    expect_closed(&mut socket).await;
    assert_eq!(server.state.registry.thread_count(), 0);
}

#[tokio::test]
async fn bearer_header_wins_over_query_token() {
    let server = Server::start().await;
    let mut request = server.stream_url("garbage").into_client_request().unwrap();
    request.headers_mut().insert(
        header::AUTHORIZATION,
        format!("Bearer {}", server.token(&server.alice)).parse().unwrap(),
    );

    let (mut socket, _) = connect_async(request).await.unwrap();
    let status = next_event(&mut socket).await;
    assert_eq!(status["type"], "status");
    assert_eq!(server.state.registry.subscriber_count(server.thread), 1);
}
