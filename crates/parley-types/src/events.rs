use serde::{Deserialize, Serialize};

use crate::models::MessageView;

/// Events sent to a client over a thread stream.
///
/// The first event of a healthy stream is always `Status { connected: true }`.
/// A stream that fails emits exactly one `Error` and then ends.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum StreamEvent {
    /// Connection state change
    Status { connected: bool, message: String },

    /// A message was committed to the thread by another participant
    NewMessage(MessageView),

    /// Terminal failure; nothing follows
    Error { message: String },
}

impl StreamEvent {
    pub fn connected(thread_id: crate::Id) -> Self {
        Self::Status {
            connected: true,
            message: format!("Connected to thread {}", thread_id),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }
}
