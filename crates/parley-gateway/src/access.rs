use std::sync::Arc;

use tracing::{info, warn};

use parley_db::Database;
use parley_types::Id;

use crate::error::{ChatError, Result};
use crate::identity::{Identity, TokenVerifier};
use crate::store::blocking;

/// Membership gate in front of every thread read, write and subscribe.
#[derive(Clone)]
pub struct AccessGate {
    db: Arc<Database>,
    verifier: TokenVerifier,
}

impl AccessGate {
    pub fn new(db: Arc<Database>, verifier: TokenVerifier) -> Self {
        Self { db, verifier }
    }

    pub fn db(&self) -> &Arc<Database> {
        &self.db
    }

    pub fn verifier(&self) -> &TokenVerifier {
        &self.verifier
    }

    /// Every rejection collapses to `Unauthenticated`; the reason is only logged.
    pub fn authenticate(&self, token: &str) -> Result<Identity> {
        self.verifier.verify(token).map_err(|rejection| {
            warn!("Rejected bearer token: {}", rejection);
            ChatError::Unauthenticated
        })
    }

    pub async fn require_participant(&self, identity: &Identity, thread_id: Id) -> Result<()> {
        let user_id = identity.user_id;
        blocking(&self.db, move |db| check_membership(db, thread_id, user_id)).await
    }

    /// Authenticate then check membership, as the stream path needs both.
    pub async fn authorize(&self, token: &str, thread_id: Id) -> Result<Identity> {
        let identity = self.authenticate(token)?;
        self.require_participant(&identity, thread_id).await?;
        Ok(identity)
    }
}

/// Synchronous membership check for use inside an existing blocking section.
pub(crate) fn check_membership(db: &Database, thread_id: Id, user_id: Id) -> Result<()> {
    if db.is_participant(thread_id, user_id)? {
        Ok(())
    } else {
        info!("Permission denied - user_id: {}, thread_id: {}", user_id, thread_id);
        Err(ChatError::PermissionDenied)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::TokenConfig;

    fn gate() -> (AccessGate, Id, Id, Id) {
        let db = Database::open_in_memory().unwrap();
        let alice = db.create_user("alice", "x").unwrap();
        let bob = db.create_user("bob", "x").unwrap();
        let thread = db.create_group_thread("solo", &[alice]).unwrap();
        let verifier = TokenVerifier::new(&TokenConfig {
            secret: "test".into(),
            lifetime: chrono::Duration::hours(1),
        });
        (AccessGate::new(Arc::new(db), verifier), alice, bob, thread.id)
    }

    #[tokio::test]
    async fn participant_is_authorized() {
        let (gate, alice, _, thread) = gate();
        let token = gate.verifier().issue(alice, "alice").unwrap();
        let identity = gate.authorize(&token, thread).await.unwrap();
        assert_eq!(identity.user_id, alice);
    }

    #[tokio::test]
    async fn non_participant_is_denied() {
        let (gate, _, bob, thread) = gate();
        let token = gate.verifier().issue(bob, "bob").unwrap();
        assert!(matches!(
            gate.authorize(&token, thread).await,
            Err(ChatError::PermissionDenied)
        ));
        assert!(matches!(
            gate.authorize(&token, thread + 99).await,
            Err(ChatError::PermissionDenied)
        ));
    }

    #[tokio::test]
    async fn bad_token_is_unauthenticated() {
        let (gate, _, _, thread) = gate();
        assert!(matches!(
            gate.authorize("garbage", thread).await,
            Err(ChatError::Unauthenticated)
        ));
    }
}
