use std::sync::Arc;

use parley_db::models::{MessageRow, ThreadRow, UserRow};
use parley_db::{Database, parse_timestamp};
use parley_types::models::{MessageView, ThreadView, UserSummary};

use crate::error::Result;

/// Run blocking DB work off the async runtime.
pub(crate) async fn blocking<F, T>(db: &Arc<Database>, f: F) -> Result<T>
where
    F: FnOnce(&Database) -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    let db = db.clone();
    tokio::task::spawn_blocking(move || f(&db)).await?
}

pub(crate) fn user_summary(row: UserRow) -> UserSummary {
    UserSummary {
        id: row.id,
        username: row.username,
    }
}

pub(crate) fn message_view(row: MessageRow) -> anyhow::Result<MessageView> {
    Ok(MessageView {
        created_at: parse_timestamp(&row.created_at)?,
        id: row.id,
        thread_id: row.thread_id,
        content: row.content,
        sender_id: row.sender_id,
        sender_username: row.sender_username,
    })
}

/// Assemble the full view (participants and last message) for one thread row.
pub(crate) fn thread_view(db: &Database, row: ThreadRow) -> anyhow::Result<ThreadView> {
    let participants = db
        .get_participants(row.id)?
        .into_iter()
        .map(user_summary)
        .collect();
    let last_message = db.get_last_message(row.id)?.map(message_view).transpose()?;

    Ok(ThreadView {
        updated_at: parse_timestamp(&row.updated_at)?,
        id: row.id,
        name: row.name,
        participants,
        last_message,
    })
}
