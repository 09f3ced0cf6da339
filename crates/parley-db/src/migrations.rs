use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        CREATE TABLE IF NOT EXISTS users (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            username    TEXT NOT NULL UNIQUE,
            password    TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        -- name IS NULL marks a direct-message thread; dm_key is '<low id>:<high id>'
        -- for direct threads and NULL for groups
        CREATE TABLE IF NOT EXISTS threads (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            name        TEXT,
            dm_key      TEXT UNIQUE,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            CHECK ((name IS NULL) = (dm_key IS NOT NULL))
        );

        CREATE INDEX IF NOT EXISTS idx_threads_updated
            ON threads(updated_at);

        CREATE TABLE IF NOT EXISTS thread_participants (
            thread_id   INTEGER NOT NULL REFERENCES threads(id),
            user_id     INTEGER NOT NULL REFERENCES users(id),
            joined_at   TEXT NOT NULL,
            PRIMARY KEY (thread_id, user_id)
        );

        CREATE INDEX IF NOT EXISTS idx_participants_user
            ON thread_participants(user_id);

        CREATE TABLE IF NOT EXISTS messages (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            thread_id   INTEGER NOT NULL REFERENCES threads(id),
            sender_id   INTEGER NOT NULL REFERENCES users(id),
            content     TEXT NOT NULL,
            created_at  TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_messages_thread
            ON messages(thread_id, created_at, id);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
