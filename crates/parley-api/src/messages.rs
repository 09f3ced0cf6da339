use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::debug;

use parley_gateway::identity::Identity;
use parley_types::Id;
use parley_types::api::{MessagesResponse, SendMessageRequest, SendMessageResponse};

use crate::auth::AppState;
use crate::error::ApiError;

#[derive(Debug, Deserialize)]
pub struct MessageQuery {
    /// Defaults to 50, capped at 200.
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Commit a message, then fan it out to the thread's other live streams.
pub async fn send_message(
    State(state): State<AppState>,
    Path(thread_id): Path<Id>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<SendMessageRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let (message, report) = state
        .broadcaster
        .publish(
            thread_id,
            identity.user_id,
            state.directory.commit_message(&identity, thread_id, req.content),
        )
        .await?;

    debug!(
        "Message {} on thread {} reached {} stream(s), {} dropped",
        message.id, thread_id, report.delivered, report.dropped
    );

    Ok((
        StatusCode::CREATED,
        Json(SendMessageResponse {
            success: true,
            message: "Message sent successfully".into(),
            sent_message: Some(message),
        }),
    ))
}

pub async fn get_messages(
    State(state): State<AppState>,
    Path(thread_id): Path<Id>,
    Query(query): Query<MessageQuery>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let messages = state
        .directory
        .history(&identity, thread_id, query.limit, query.offset)
        .await?;

    Ok(Json(MessagesResponse { messages }))
}
