use crate::models::{MessageRow, ThreadRow, UserRow};
use crate::{Database, timestamp_now};
use anyhow::{Result, anyhow, bail};
use rusqlite::{Connection, OptionalExtension, Row, params};
use tracing::debug;

/// Canonical key for the direct thread between two users, independent of order.
pub fn dm_key(a: i64, b: i64) -> String {
    let (low, high) = if a <= b { (a, b) } else { (b, a) };
    format!("{}:{}", low, high)
}

impl Database {
    // -- Users --

    pub fn create_user(&self, username: &str, password_hash: &str) -> Result<i64> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO users (username, password, created_at) VALUES (?1, ?2, ?3)",
                params![username, password_hash, timestamp_now()],
            )?;
            Ok(conn.last_insert_rowid())
        })
    }

    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRow>> {
        self.with_conn(|conn| query_user(conn, "username = ?1", username))
    }

    /// Resolve a batch of usernames. Unknown names are simply absent from the result.
    pub fn get_users_by_usernames(&self, usernames: &[String]) -> Result<Vec<UserRow>> {
        if usernames.is_empty() {
            return Ok(vec![]);
        }

        self.with_conn(|conn| {
            let placeholders: Vec<String> = (1..=usernames.len()).map(|i| format!("?{}", i)).collect();
            let sql = format!(
                "SELECT id, username, password, created_at FROM users WHERE username IN ({})",
                placeholders.join(", ")
            );

            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt
                .query_map(rusqlite::params_from_iter(usernames.iter()), user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Threads --

    /// Create a named group thread. Duplicate participant ids are ignored.
    pub fn create_group_thread(&self, name: &str, participant_ids: &[i64]) -> Result<ThreadRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = timestamp_now();

            tx.execute(
                "INSERT INTO threads (name, dm_key, created_at, updated_at) VALUES (?1, NULL, ?2, ?2)",
                params![name, now],
            )?;
            let thread_id = tx.last_insert_rowid();

            for user_id in participant_ids {
                insert_participant(&tx, thread_id, *user_id, &now)?;
            }

            let thread = query_thread(&tx, thread_id)?
                .ok_or_else(|| anyhow!("Thread {} vanished during creation", thread_id))?;
            tx.commit()?;
            Ok(thread)
        })
    }

    /// Fetch the direct thread between two users, creating it if none exists.
    ///
    /// The `dm_key` UNIQUE constraint makes this idempotent even against another
    /// writer racing on the same file. Returns `(thread, created)`.
    pub fn get_or_create_direct_thread(&self, a: i64, b: i64) -> Result<(ThreadRow, bool)> {
        if a == b {
            bail!("Direct thread needs two distinct users (got {} twice)", a);
        }

        let key = dm_key(a, b);
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = timestamp_now();

            let inserted = tx.execute(
                "INSERT INTO threads (name, dm_key, created_at, updated_at) VALUES (NULL, ?1, ?2, ?2)
                 ON CONFLICT(dm_key) DO NOTHING",
                params![key, now],
            )?;

            if inserted == 1 {
                let thread_id = tx.last_insert_rowid();
                insert_participant(&tx, thread_id, a, &now)?;
                insert_participant(&tx, thread_id, b, &now)?;
                debug!("Created direct thread {} for {}", thread_id, key);
            }

            let thread_id: i64 = tx.query_row(
                "SELECT id FROM threads WHERE dm_key = ?1",
                [&key],
                |row| row.get(0),
            )?;
            let thread = query_thread(&tx, thread_id)?
                .ok_or_else(|| anyhow!("Direct thread {} vanished", key))?;

            tx.commit()?;
            Ok((thread, inserted == 1))
        })
    }

    pub fn find_direct_thread(&self, a: i64, b: i64) -> Result<Option<ThreadRow>> {
        let key = dm_key(a, b);
        self.with_conn(|conn| {
            let id: Option<i64> = conn
                .query_row("SELECT id FROM threads WHERE dm_key = ?1", [&key], |row| row.get(0))
                .optional()?;
            match id {
                Some(id) => query_thread(conn, id),
                None => Ok(None),
            }
        })
    }

    /// Threads the user participates in, most recently active first.
    pub fn get_threads_for_user(&self, user_id: i64) -> Result<Vec<ThreadRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT t.id, t.name, t.created_at, t.updated_at
                 FROM threads t
                 JOIN thread_participants p ON p.thread_id = t.id
                 WHERE p.user_id = ?1
                 ORDER BY t.updated_at DESC, t.id DESC",
            )?;

            let rows = stmt
                .query_map([user_id], thread_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn is_participant(&self, thread_id: i64, user_id: i64) -> Result<bool> {
        self.with_conn(|conn| {
            let found: Option<i64> = conn
                .query_row(
                    "SELECT 1 FROM thread_participants WHERE thread_id = ?1 AND user_id = ?2",
                    params![thread_id, user_id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
    }

    pub fn get_participants(&self, thread_id: i64) -> Result<Vec<UserRow>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT u.id, u.username, u.password, u.created_at
                 FROM users u
                 JOIN thread_participants p ON p.user_id = u.id
                 WHERE p.thread_id = ?1
                 ORDER BY p.joined_at, u.id",
            )?;

            let rows = stmt
                .query_map([thread_id], user_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    // -- Messages --

    /// Commit a message and bump the thread's activity timestamp in one transaction.
    pub fn insert_message(&self, thread_id: i64, sender_id: i64, content: &str) -> Result<MessageRow> {
        self.with_conn_mut(|conn| {
            let tx = conn.transaction()?;
            let now = timestamp_now();

            tx.execute(
                "INSERT INTO messages (thread_id, sender_id, content, created_at) VALUES (?1, ?2, ?3, ?4)",
                params![thread_id, sender_id, content, now],
            )?;
            let message_id = tx.last_insert_rowid();

            let touched = tx.execute(
                "UPDATE threads SET updated_at = ?1 WHERE id = ?2",
                params![now, thread_id],
            )?;
            if touched == 0 {
                bail!("Thread {} not found", thread_id);
            }

            let row = query_message(&tx, message_id)?
                .ok_or_else(|| anyhow!("Message {} vanished during insert", message_id))?;
            tx.commit()?;
            Ok(row)
        })
    }

    /// A page of history, newest first by (created_at, id).
    pub fn get_messages(&self, thread_id: i64, limit: u32, offset: u32) -> Result<Vec<MessageRow>> {
        self.with_conn(|conn| {
            // JOIN users to fetch sender_username in a single query
            let mut stmt = conn.prepare(
                "SELECT m.id, m.thread_id, m.sender_id, u.username, m.content, m.created_at
                 FROM messages m
                 LEFT JOIN users u ON m.sender_id = u.id
                 WHERE m.thread_id = ?1
                 ORDER BY m.created_at DESC, m.id DESC
                 LIMIT ?2 OFFSET ?3",
            )?;

            let rows = stmt
                .query_map(params![thread_id, limit, offset], message_from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;

            Ok(rows)
        })
    }

    pub fn get_last_message(&self, thread_id: i64) -> Result<Option<MessageRow>> {
        Ok(self.get_messages(thread_id, 1, 0)?.into_iter().next())
    }
}

fn insert_participant(conn: &Connection, thread_id: i64, user_id: i64, joined_at: &str) -> Result<()> {
    conn.execute(
        "INSERT OR IGNORE INTO thread_participants (thread_id, user_id, joined_at) VALUES (?1, ?2, ?3)",
        params![thread_id, user_id, joined_at],
    )?;
    Ok(())
}

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<UserRow> {
    Ok(UserRow {
        id: row.get(0)?,
        username: row.get(1)?,
        password: row.get(2)?,
        created_at: row.get(3)?,
    })
}

fn thread_from_row(row: &Row<'_>) -> rusqlite::Result<ThreadRow> {
    Ok(ThreadRow {
        id: row.get(0)?,
        name: row.get(1)?,
        created_at: row.get(2)?,
        updated_at: row.get(3)?,
    })
}

fn message_from_row(row: &Row<'_>) -> rusqlite::Result<MessageRow> {
    Ok(MessageRow {
        id: row.get(0)?,
        thread_id: row.get(1)?,
        sender_id: row.get(2)?,
        sender_username: row
            .get::<_, Option<String>>(3)?
            .unwrap_or_else(|| "unknown".to_string()),
        content: row.get(4)?,
        created_at: row.get(5)?,
    })
}

fn query_user<P: rusqlite::ToSql>(conn: &Connection, filter: &str, value: P) -> Result<Option<UserRow>> {
    let sql = format!("SELECT id, username, password, created_at FROM users WHERE {}", filter);
    let row = conn.query_row(&sql, [value], user_from_row).optional()?;
    Ok(row)
}

fn query_thread(conn: &Connection, id: i64) -> Result<Option<ThreadRow>> {
    let row = conn
        .query_row(
            "SELECT id, name, created_at, updated_at FROM threads WHERE id = ?1",
            [id],
            thread_from_row,
        )
        .optional()?;
    Ok(row)
}

fn query_message(conn: &Connection, id: i64) -> Result<Option<MessageRow>> {
    let row = conn
        .query_row(
            "SELECT m.id, m.thread_id, m.sender_id, u.username, m.content, m.created_at
             FROM messages m
             LEFT JOIN users u ON m.sender_id = u.id
             WHERE m.id = ?1",
            [id],
            message_from_row,
        )
        .optional()?;
    Ok(row)
}
