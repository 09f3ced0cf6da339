use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::SplitSink;
use futures_util::{SinkExt, StreamExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use parley_types::Id;
use parley_types::events::StreamEvent;

use crate::access::AccessGate;
use crate::registry::SubscriberRegistry;
use crate::session::{CloseReason, EventSink, SessionConfig, StreamSession};

/// Session sink over the write half of a WebSocket.
pub struct WsSink {
    sender: SplitSink<WebSocket, Message>,
    closed: CancellationToken,
}

impl EventSink for WsSink {
    async fn send(&mut self, event: StreamEvent) -> anyhow::Result<()> {
        let text = serde_json::to_string(&event)?;
        self.sender.send(Message::Text(text.into())).await?;
        Ok(())
    }

    fn is_open(&self) -> bool {
        !self.closed.is_cancelled()
    }

    async fn close(&mut self) {
        if !self.closed.is_cancelled() {
            let _ = self.sender.send(Message::Close(None)).await;
        }
        let _ = self.sender.close().await;
    }
}

/// Serve one thread stream over an upgraded WebSocket.
///
/// The token is checked inside the session so a bad token is reported in-band
/// as a single `error` event. Inbound frames are ignored; the reader task only
/// watches for the remote end going away.
pub async fn handle_stream_connection(
    socket: WebSocket,
    gate: AccessGate,
    registry: SubscriberRegistry,
    config: SessionConfig,
    thread_id: Id,
    token: String,
) -> CloseReason {
    let (sender, mut receiver) = socket.split();
    let closed = CancellationToken::new();

    let watcher = closed.clone();
    let reader = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Close(_) => break,
                other => trace!("Ignoring inbound stream frame: {:?}", other),
            }
        }
        watcher.cancel();
    });

    let sink = WsSink {
        sender,
        closed: closed.clone(),
    };
    let reason = StreamSession::new(gate, registry, config, thread_id, sink)
        .run(&token)
        .await;

    reader.abort();
    debug!("Stream socket on thread {} finished: {:?}", thread_id, reason);
    reason
}
