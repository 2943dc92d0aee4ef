use anyhow::Result;
use rusqlite::Connection;
use tracing::info;

pub fn run(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "
        -- Written by the application-intake flow; read-only to messaging.
        CREATE TABLE IF NOT EXISTS relationships (
            poster_id        TEXT NOT NULL,
            respondent_id    TEXT NOT NULL,
            poster_name      TEXT NOT NULL,
            poster_email     TEXT NOT NULL,
            respondent_name  TEXT NOT NULL,
            respondent_email TEXT NOT NULL,
            job_ref          TEXT,
            job_title        TEXT,
            created_at       TEXT NOT NULL DEFAULT (datetime('now')),
            PRIMARY KEY (poster_id, respondent_id)
        );

        CREATE TABLE IF NOT EXISTS messages (
            id                  TEXT PRIMARY KEY,
            poster_id           TEXT NOT NULL,
            respondent_id       TEXT NOT NULL,
            job_ref             TEXT,
            sender_role         TEXT NOT NULL CHECK (sender_role IN ('poster', 'respondent')),
            sender_id           TEXT NOT NULL,
            body                TEXT NOT NULL DEFAULT '',
            attachments         TEXT NOT NULL DEFAULT '[]',
            read_by_poster      INTEGER NOT NULL DEFAULT 0,
            read_by_respondent  INTEGER NOT NULL DEFAULT 0,
            created_at          TEXT NOT NULL,
            FOREIGN KEY (poster_id, respondent_id)
                REFERENCES relationships(poster_id, respondent_id)
        );

        CREATE INDEX IF NOT EXISTS idx_messages_conversation
            ON messages(poster_id, respondent_id, created_at);
        ",
    )?;

    info!("Database migrations complete");
    Ok(())
}
