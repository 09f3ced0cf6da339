use axum::{
    extract::{Path, Query, State, WebSocketUpgrade},
    http::HeaderMap,
    response::IntoResponse,
};
use serde::Deserialize;

use parley_gateway::connection;
use parley_types::Id;

use crate::auth::AppState;
use crate::middleware::bearer_token;

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    /// Browsers cannot set headers on a WebSocket upgrade.
    pub token: Option<String>,
}

/// Upgrade unconditionally; the session authenticates and reports failures in-band.
pub async fn stream_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<Id>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
    ws: WebSocketUpgrade,
) -> impl IntoResponse {
    let token = bearer_token(&headers)
        .map(str::to_string)
        .or(query.token)
        .unwrap_or_default();

    ws.on_upgrade(move |socket| async move {
        connection::handle_stream_connection(
            socket,
            state.gate.clone(),
            state.registry.clone(),
            state.session,
            thread_id,
            token,
        )
        .await;
    })
}
