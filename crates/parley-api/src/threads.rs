use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::info;

use parley_gateway::identity::Identity;
use parley_types::Id;
use parley_types::api::{CreateThreadRequest, CreateThreadResponse, StatusResponse, ThreadsResponse};

use crate::auth::AppState;
use crate::error::ApiError;

pub async fn list_threads(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    let threads = state.directory.list_threads(&identity).await?;
    Ok(Json(ThreadsResponse { threads }))
}

/// 201 for a new thread; 200 when an existing direct thread is handed back.
pub async fn create_thread(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    Json(req): Json<CreateThreadRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let created = state
        .directory
        .create_thread(&identity, req.participant_usernames, req.name)
        .await?;

    let (status, message) = if created.created {
        (StatusCode::CREATED, "Thread created successfully")
    } else {
        (StatusCode::OK, "Existing direct thread returned")
    };

    Ok((
        status,
        Json(CreateThreadResponse {
            success: true,
            message: message.into(),
            thread: Some(created.thread),
        }),
    ))
}

/// Participant sets are fixed at creation, so joining only confirms membership.
pub async fn join_thread(
    State(state): State<AppState>,
    Path(thread_id): Path<Id>,
    Extension(identity): Extension<Identity>,
) -> Result<impl IntoResponse, ApiError> {
    state.gate.require_participant(&identity, thread_id).await?;
    info!("JoinThread - user_id: {}, thread_id: {}", identity.user_id, thread_id);
    Ok(Json(StatusResponse::ok(format!("Joined thread {}", thread_id))))
}

/// Advisory only: does not remove membership or touch live streams.
pub async fn leave_thread(
    Path(thread_id): Path<Id>,
    Extension(identity): Extension<Identity>,
) -> impl IntoResponse {
    info!("LeaveThread - user_id: {}, thread_id: {}", identity.user_id, thread_id);
    Json(StatusResponse::ok(format!("Left thread {}", thread_id)))
}
