use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::Id;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: Id,
    pub username: String,
}

/// A committed message as it leaves the server, both in history pages and on streams.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MessageView {
    pub id: Id,
    pub thread_id: Id,
    pub content: String,
    pub sender_id: Id,
    pub sender_username: String,
    pub created_at: DateTime<Utc>,
}

/// A thread with its fixed participant set. `name` is `None` for direct messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreadView {
    pub id: Id,
    pub name: Option<String>,
    pub participants: Vec<UserSummary>,
    pub last_message: Option<MessageView>,
    pub updated_at: DateTime<Utc>,
}

impl ThreadView {
    pub fn is_direct(&self) -> bool {
        self.name.is_none()
    }
}
