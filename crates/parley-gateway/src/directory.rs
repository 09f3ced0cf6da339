use tracing::info;

use parley_types::Id;
use parley_types::models::{MessageView, ThreadView};

use crate::access::{AccessGate, check_membership};
use crate::error::{ChatError, Result};
use crate::identity::Identity;
use crate::store::{blocking, message_view, thread_view};

pub const MAX_CONTENT_CHARS: usize = 4000;
pub const MAX_THREAD_NAME_CHARS: usize = 100;
pub const DEFAULT_PAGE_SIZE: u32 = 50;
pub const MAX_PAGE_SIZE: u32 = 200;

/// Result of a create-thread request.
#[derive(Debug, Clone)]
pub struct CreatedThread {
    pub thread: ThreadView,
    /// False when an existing direct thread was returned.
    pub created: bool,
}

/// Membership-gated access to threads and their history.
#[derive(Clone)]
pub struct ThreadDirectory {
    gate: AccessGate,
}

impl ThreadDirectory {
    pub fn new(gate: AccessGate) -> Self {
        Self { gate }
    }

    pub fn gate(&self) -> &AccessGate {
        &self.gate
    }

    /// Create a group thread, or resolve the direct thread with one other user.
    ///
    /// A blank name with exactly one other participant means a direct message;
    /// asking for the same pair again returns the existing thread.
    pub async fn create_thread(
        &self,
        caller: &Identity,
        participant_usernames: Vec<String>,
        name: Option<String>,
    ) -> Result<CreatedThread> {
        let name = name
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty());
        if let Some(n) = &name {
            if n.chars().count() > MAX_THREAD_NAME_CHARS {
                return Err(ChatError::invalid(format!(
                    "Thread name must be at most {} characters",
                    MAX_THREAD_NAME_CHARS
                )));
            }
        }

        let mut usernames: Vec<String> = participant_usernames
            .into_iter()
            .map(|u| u.trim().to_string())
            .filter(|u| !u.is_empty())
            .collect();
        usernames.sort();
        usernames.dedup();

        let caller_id = caller.user_id;
        let created = blocking(self.gate.db(), move |db| {
            let users = db.get_users_by_usernames(&usernames)?;
            if users.len() != usernames.len() {
                return Err(ChatError::not_found("One or more users not found"));
            }

            let others: Vec<Id> = users
                .iter()
                .map(|u| u.id)
                .filter(|id| *id != caller_id)
                .collect();

            let (row, created) = match (name, others.as_slice()) {
                (Some(name), _) => {
                    let mut ids = vec![caller_id];
                    ids.extend(&others);
                    (db.create_group_thread(&name, &ids)?, true)
                }
                (None, [other]) => match db.find_direct_thread(caller_id, *other)? {
                    Some(existing) => (existing, false),
                    None => db.get_or_create_direct_thread(caller_id, *other)?,
                },
                (None, []) => {
                    return Err(ChatError::invalid(
                        "A direct message needs one other participant",
                    ));
                }
                (None, _) => {
                    return Err(ChatError::invalid("Group threads need a name"));
                }
            };

            Ok(CreatedThread {
                thread: thread_view(db, row)?,
                created,
            })
        })
        .await?;

        info!(
            "CreateThread successful - user_id: {}, thread_id: {}, created: {}, participants: {:?}",
            caller.user_id,
            created.thread.id,
            created.created,
            created
                .thread
                .participants
                .iter()
                .map(|p| p.username.as_str())
                .collect::<Vec<_>>()
        );
        Ok(created)
    }

    /// Every thread the caller is in, most recently active first.
    pub async fn list_threads(&self, caller: &Identity) -> Result<Vec<ThreadView>> {
        let user_id = caller.user_id;
        let threads = blocking(self.gate.db(), move |db| {
            db.get_threads_for_user(user_id)?
                .into_iter()
                .map(|row| thread_view(db, row).map_err(ChatError::from))
                .collect::<Result<Vec<_>>>()
        })
        .await?;

        info!(
            "GetThreads successful - user_id: {}, threads_count: {}",
            user_id,
            threads.len()
        );
        Ok(threads)
    }

    /// A page of history, newest first. Non-positive limits fall back to the default.
    pub async fn history(
        &self,
        caller: &Identity,
        thread_id: Id,
        limit: Option<i64>,
        offset: Option<i64>,
    ) -> Result<Vec<MessageView>> {
        let limit = match limit {
            Some(l) if l > 0 => (l.min(MAX_PAGE_SIZE as i64)) as u32,
            _ => DEFAULT_PAGE_SIZE,
        };
        let offset = offset.unwrap_or(0).clamp(0, u32::MAX as i64) as u32;

        let user_id = caller.user_id;
        let messages = blocking(self.gate.db(), move |db| {
            check_membership(db, thread_id, user_id)?;
            db.get_messages(thread_id, limit, offset)?
                .into_iter()
                .map(|row| message_view(row).map_err(ChatError::from))
                .collect::<Result<Vec<_>>>()
        })
        .await?;

        info!(
            "GetMessages successful - user_id: {}, thread_id: {}, messages_count: {}",
            user_id,
            thread_id,
            messages.len()
        );
        Ok(messages)
    }

    /// Persist a message after validating content and membership. Does not broadcast.
    pub async fn commit_message(&self, caller: &Identity, thread_id: Id, content: String) -> Result<MessageView> {
        if content.trim().is_empty() {
            return Err(ChatError::invalid("Message content must not be empty"));
        }
        if content.chars().count() > MAX_CONTENT_CHARS {
            return Err(ChatError::invalid(format!(
                "Message content must be at most {} characters",
                MAX_CONTENT_CHARS
            )));
        }

        let user_id = caller.user_id;
        let message = blocking(self.gate.db(), move |db| {
            check_membership(db, thread_id, user_id)?;
            let row = db.insert_message(thread_id, user_id, &content)?;
            Ok(message_view(row)?)
        })
        .await?;

        info!(
            "SendMessage committed - user_id: {}, thread_id: {}, message_id: {}, content_length: {}",
            user_id,
            thread_id,
            message.id,
            message.content.len()
        );
        Ok(message)
    }
}
