use std::sync::Arc;

use argon2::{Argon2, PasswordHash, PasswordHasher, PasswordVerifier, password_hash::{SaltString, rand_core::OsRng}};
use axum::{
    Json,
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::Deserialize;
use tracing::{info, warn};

use parley_db::Database;
use parley_gateway::access::AccessGate;
use parley_gateway::broadcaster::Broadcaster;
use parley_gateway::directory::ThreadDirectory;
use parley_gateway::identity::{TokenConfig, TokenVerifier};
use parley_gateway::registry::SubscriberRegistry;
use parley_gateway::session::SessionConfig;
use parley_types::api::{AuthResponse, LoginRequest, RegisterRequest, ValidateTokenResponse};

use crate::error::ApiError;
use crate::middleware::bearer_token;

pub type AppState = Arc<AppStateInner>;

pub struct AppStateInner {
    pub db: Arc<Database>,
    pub gate: AccessGate,
    pub directory: ThreadDirectory,
    pub registry: SubscriberRegistry,
    pub broadcaster: Broadcaster,
    pub session: SessionConfig,
}

impl AppStateInner {
    pub fn new(db: Database, tokens: &TokenConfig, session: SessionConfig) -> AppState {
        let db = Arc::new(db);
        let gate = AccessGate::new(db.clone(), TokenVerifier::new(tokens));
        let registry = SubscriberRegistry::new();
        Arc::new(Self {
            directory: ThreadDirectory::new(gate.clone()),
            broadcaster: Broadcaster::new(registry.clone()),
            db,
            gate,
            registry,
            session,
        })
    }
}

pub async fn register(
    State(state): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let username = req.username.trim().to_string();
    if username.chars().count() < 3 || username.chars().count() > 32 {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "Username must be between 3 and 32 characters",
        ));
    }
    if req.password.len() < 8 {
        return Err(ApiError::new(
            StatusCode::BAD_REQUEST,
            "Password must be at least 8 characters",
        ));
    }

    let password = req.password;
    let db = state.db.clone();
    let name = username.clone();
    let user_id = tokio::task::spawn_blocking(move || -> anyhow::Result<Option<i64>> {
        if db.get_user_by_username(&name)?.is_some() {
            return Ok(None);
        }
        let password_hash = hash_password(&password)?;
        match db.create_user(&name, &password_hash) {
            Ok(id) => Ok(Some(id)),
            // Lost a race with a concurrent registration of the same name
            Err(_) if db.get_user_by_username(&name)?.is_some() => Ok(None),
            Err(e) => Err(e),
        }
    })
    .await
    .map_err(anyhow::Error::from)??;

    let Some(user_id) = user_id else {
        info!("Register rejected - username taken: {}", username);
        return Err(ApiError::new(StatusCode::CONFLICT, "Username already taken"));
    };

    let token = state.gate.verifier().issue(user_id, &username)?;
    info!("Register successful - user_id: {}, username: {}", user_id, username);

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            success: true,
            message: "Registration successful".into(),
            token: Some(token),
            user_id: Some(user_id),
            username: Some(username),
        }),
    ))
}

pub async fn login(
    State(state): State<AppState>,
    Json(req): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let db = state.db.clone();
    let username = req.username.trim().to_string();
    let lookup = username.clone();
    let user = tokio::task::spawn_blocking(move || db.get_user_by_username(&lookup))
        .await
        .map_err(anyhow::Error::from)??;

    let verified = match &user {
        Some(user) => verify_password(&req.password, &user.password)?,
        None => false,
    };
    let Some(user) = user.filter(|_| verified) else {
        warn!("Login failed for username: {}", username);
        return Err(ApiError::new(
            StatusCode::UNAUTHORIZED,
            "Invalid username or password",
        ));
    };

    let token = state.gate.verifier().issue(user.id, &user.username)?;
    info!("Login successful - user_id: {}, username: {}", user.id, user.username);

    Ok(Json(AuthResponse {
        success: true,
        message: "Login successful".into(),
        token: Some(token),
        user_id: Some(user.id),
        username: Some(user.username),
    }))
}

#[derive(Debug, Deserialize)]
pub struct ValidateQuery {
    pub token: Option<String>,
}

/// Check a token from the Bearer header or `?token=`. Always 200.
pub async fn validate_token(
    State(state): State<AppState>,
    headers: HeaderMap,
    Query(query): Query<ValidateQuery>,
) -> impl IntoResponse {
    let token = bearer_token(&headers)
        .map(str::to_string)
        .or(query.token)
        .unwrap_or_default();

    let response = match state.gate.authenticate(&token) {
        Ok(identity) => ValidateTokenResponse {
            valid: true,
            user_id: Some(identity.user_id),
            username: Some(identity.username),
        },
        Err(_) => ValidateTokenResponse {
            valid: false,
            user_id: None,
            username: None,
        },
    };
    Json(response)
}

/// Argon2id hash in PHC string form.
pub fn hash_password(password: &str) -> anyhow::Result<String> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("password hashing failed: {}", e))?;
    Ok(hash.to_string())
}

/// False on mismatch; errors only when the stored hash is unreadable.
pub fn verify_password(password: &str, stored: &str) -> anyhow::Result<bool> {
    let parsed = PasswordHash::new(stored)
        .map_err(|e| anyhow::anyhow!("stored password hash is invalid: {}", e))?;
    Ok(Argon2::default()
        .verify_password(password.as_bytes(), &parsed)
        .is_ok())
}
