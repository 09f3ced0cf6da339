//! HTTP and WebSocket surface over the Parley delivery core.

pub mod auth;
pub mod error;
pub mod messages;
pub mod middleware;
pub mod stream;
pub mod threads;

use axum::{
    Router, middleware as axum_middleware,
    routing::{get, post},
};

use auth::AppState;

/// All routes, with state applied. Cross-cutting layers (CORS, tracing) are left to the binary.
pub fn router(state: AppState) -> Router {
    let public_routes = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/auth/register", post(auth::register))
        .route("/auth/login", post(auth::login))
        .route("/auth/validate", get(auth::validate_token));

    let protected_routes = Router::new()
        .route("/threads", get(threads::list_threads).post(threads::create_thread))
        .route(
            "/threads/{thread_id}/messages",
            get(messages::get_messages).post(messages::send_message),
        )
        .route("/threads/{thread_id}/join", post(threads::join_thread))
        .route("/threads/{thread_id}/leave", post(threads::leave_thread))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            middleware::require_auth,
        ));

    // Authenticates in-band once upgraded
    let stream_routes = Router::new().route("/threads/{thread_id}/stream", get(stream::stream_thread));

    Router::new()
        .merge(public_routes)
        .merge(protected_routes)
        .merge(stream_routes)
        .with_state(state)
}
