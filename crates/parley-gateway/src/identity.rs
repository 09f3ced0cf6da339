use std::fmt;
use std::sync::Arc;

use anyhow::Context;
use jsonwebtoken::errors::ErrorKind;
use jsonwebtoken::{DecodingKey, EncodingKey, Header, Validation, decode, encode};

use parley_types::Id;
use parley_types::api::Claims;

/// Token signing secret and lifetime, passed in explicitly at startup.
#[derive(Clone)]
pub struct TokenConfig {
    pub secret: String,
    pub lifetime: chrono::Duration,
}

impl fmt::Debug for TokenConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenConfig")
            .field("secret", &"<redacted>")
            .field("lifetime", &self.lifetime)
            .finish()
    }
}

/// The authenticated subject behind a bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: Id,
    pub username: String,
}

/// Why a token was refused. Only used for logging; callers all see `Unauthenticated`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Rejection {
    #[error("no token supplied")]
    Missing,
    #[error("malformed token")]
    Malformed,
    #[error("token expired")]
    Expired,
    #[error("bad signature")]
    BadSignature,
    #[error("token failed validation")]
    Invalid,
}

impl From<jsonwebtoken::errors::Error> for Rejection {
    fn from(err: jsonwebtoken::errors::Error) -> Self {
        match err.kind() {
            ErrorKind::ExpiredSignature => Self::Expired,
            ErrorKind::InvalidSignature => Self::BadSignature,
            ErrorKind::InvalidToken | ErrorKind::Base64(_) | ErrorKind::Json(_) | ErrorKind::Utf8(_) => {
                Self::Malformed
            }
            _ => Self::Invalid,
        }
    }
}

/// Issues and verifies HS256 bearer tokens.
#[derive(Clone)]
pub struct TokenVerifier {
    inner: Arc<VerifierInner>,
}

struct VerifierInner {
    encoding: EncodingKey,
    decoding: DecodingKey,
    validation: Validation,
    lifetime: chrono::Duration,
}

impl TokenVerifier {
    pub fn new(config: &TokenConfig) -> Self {
        Self {
            inner: Arc::new(VerifierInner {
                encoding: EncodingKey::from_secret(config.secret.as_bytes()),
                decoding: DecodingKey::from_secret(config.secret.as_bytes()),
                validation: Validation::default(),
                lifetime: config.lifetime,
            }),
        }
    }

    pub fn issue(&self, user_id: Id, username: &str) -> anyhow::Result<String> {
        let exp = chrono::Utc::now()
            .checked_add_signed(self.inner.lifetime)
            .context("token expiry is out of range")?
            .timestamp()
            .max(0) as usize;
        let claims = Claims {
            sub: user_id,
            username: username.to_string(),
            exp,
        };

        let token = encode(&Header::default(), &claims, &self.inner.encoding)?;
        Ok(token)
    }

    pub fn verify(&self, token: &str) -> Result<Identity, Rejection> {
        if token.trim().is_empty() {
            return Err(Rejection::Missing);
        }

        let data = decode::<Claims>(token, &self.inner.decoding, &self.inner.validation)?;
        Ok(Identity {
            user_id: data.claims.sub,
            username: data.claims.username,
        })
    }
}
