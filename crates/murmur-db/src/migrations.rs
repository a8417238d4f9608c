use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL);")?;

    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |r| r.get(0),
    )?;

    if version < 1 {
        info!("Running migration v1 (initial schema)");
        conn.execute_batch(
            "
            CREATE TABLE users (
                id                      TEXT PRIMARY KEY,
                username                TEXT NOT NULL UNIQUE,
                email                   TEXT NOT NULL UNIQUE,
                password_hash           TEXT NOT NULL,
                about_me                TEXT,
                last_seen               TEXT,
                last_message_read_time  TEXT,
                created_at              TEXT NOT NULL
            );

            CREATE TABLE followers (
                follower_id  TEXT NOT NULL REFERENCES users(id),
                followed_id  TEXT NOT NULL REFERENCES users(id),
                PRIMARY KEY (follower_id, followed_id),
                CHECK (follower_id <> followed_id)
            );

            CREATE INDEX idx_followers_followed ON followers(followed_id);

            CREATE TABLE posts (
                id          TEXT PRIMARY KEY,
                body        TEXT NOT NULL,
                language    TEXT NOT NULL DEFAULT '',
                timestamp   TEXT NOT NULL,
                user_id     TEXT NOT NULL REFERENCES users(id)
            );

            CREATE INDEX idx_posts_timestamp ON posts(timestamp);
            CREATE INDEX idx_posts_user ON posts(user_id, timestamp);

            CREATE TABLE messages (
                id            TEXT PRIMARY KEY,
                sender_id     TEXT NOT NULL REFERENCES users(id),
                recipient_id  TEXT NOT NULL REFERENCES users(id),
                body          TEXT NOT NULL,
                timestamp     TEXT NOT NULL
            );

            CREATE INDEX idx_messages_recipient ON messages(recipient_id, timestamp);

            CREATE TABLE notifications (
                id            TEXT PRIMARY KEY,
                name          TEXT NOT NULL,
                user_id       TEXT NOT NULL REFERENCES users(id),
                timestamp     REAL NOT NULL,
                payload_json  TEXT NOT NULL
            );

            CREATE INDEX idx_notifications_user ON notifications(user_id, timestamp);

            CREATE TABLE tasks (
                id           TEXT PRIMARY KEY,
                name         TEXT NOT NULL,
                description  TEXT,
                user_id      TEXT NOT NULL REFERENCES users(id),
                complete     INTEGER NOT NULL DEFAULT 0
            );

            CREATE INDEX idx_tasks_user ON tasks(user_id, name, complete);

            CREATE VIRTUAL TABLE search_index USING fts5(
                idx UNINDEXED,
                doc_id UNINDEXED,
                content
            );

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
