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
        info!("Running migration v1 (public keys + messages)");
        conn.execute_batch(
            "
            CREATE TABLE public_keys (
                uid         TEXT PRIMARY KEY,
                public_key  TEXT NOT NULL,
                created_at  TEXT NOT NULL DEFAULT (datetime('now'))
            );

            -- message_s / message_r are nullable: legacy rows may lack one.
            CREATE TABLE messages (
                id              TEXT PRIMARY KEY,
                uid_low         TEXT NOT NULL,
                uid_high        TEXT NOT NULL,
                sender_uid      TEXT NOT NULL,
                receiver_uid    TEXT NOT NULL,
                message_s       TEXT,
                message_r       TEXT,
                sequence        INTEGER NOT NULL,
                created_at      TEXT NOT NULL,
                UNIQUE(uid_low, uid_high, sequence)
            );

            CREATE INDEX idx_messages_conversation
                ON messages(uid_low, uid_high, sequence DESC);

            INSERT INTO schema_version (version) VALUES (1);
            ",
        )?;
    }

    info!("Database migrations complete");
    Ok(())
}
