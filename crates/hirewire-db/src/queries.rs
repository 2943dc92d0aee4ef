use anyhow::Result;
use chrono::{SecondsFormat, SubsecRound, Utc};
use rusqlite::Connection;
use uuid::Uuid;

use hirewire_types::models::{Role, StoredMessage, ThreadSummary};

use crate::Database;
use crate::models::{MessageRow, NewMessage, RelationshipRow, ThreadRow};

impl Database {
    // -- Relationships --
    //
    // Rows are written by the application-intake flow. The messaging core
    // treats this table as read-only: existence of a row is the sole
    // authorization predicate for the pair.

    pub fn insert_relationship(&self, rel: &RelationshipRow) -> Result<()> {
        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO relationships
                     (poster_id, respondent_id, poster_name, poster_email,
                      respondent_name, respondent_email, job_ref, job_title)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
                rusqlite::params![
                    rel.poster_id,
                    rel.respondent_id,
                    rel.poster_name,
                    rel.poster_email,
                    rel.respondent_name,
                    rel.respondent_email,
                    rel.job_ref,
                    rel.job_title,
                ],
            )?;
            Ok(())
        })
    }

    /// The relationship gate. `Ok(None)` means no application record exists
    /// for the pair and the caller must refuse the operation.
    pub fn get_relationship(
        &self,
        poster_id: &str,
        respondent_id: &str,
    ) -> Result<Option<RelationshipRow>> {
        self.with_conn(|conn| query_relationship(conn, poster_id, respondent_id))
    }

    // -- Messages --

    /// Append one message. The store assigns the id and timestamp and
    /// returns the canonical record — the exact row to echo to clients.
    pub fn append_message(&self, new: NewMessage) -> Result<StoredMessage> {
        let id = Uuid::new_v4();
        // Truncate to stored precision so the echoed record equals the row.
        let created_at = Utc::now().trunc_subsecs(6);
        let attachments_json = serde_json::to_string(&new.attachments)?;

        self.with_conn(|conn| {
            conn.execute(
                "INSERT INTO messages
                     (id, poster_id, respondent_id, job_ref, sender_role, sender_id,
                      body, attachments, read_by_poster, read_by_respondent, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, 0, 0, ?9)",
                rusqlite::params![
                    id.to_string(),
                    new.key.poster_id.to_string(),
                    new.key.respondent_id.to_string(),
                    new.job_ref.map(|j| j.to_string()),
                    new.sender_role.as_str(),
                    new.sender_id.to_string(),
                    new.body,
                    attachments_json,
                    created_at.to_rfc3339_opts(SecondsFormat::Micros, true),
                ],
            )?;
            Ok(())
        })?;

        Ok(StoredMessage {
            id,
            poster_id: new.key.poster_id,
            respondent_id: new.key.respondent_id,
            job_ref: new.job_ref,
            sender_role: new.sender_role,
            sender_id: new.sender_id,
            body: new.body,
            attachments: new.attachments,
            read_by_poster: false,
            read_by_respondent: false,
            created_at,
        })
    }

    /// Full message log for one conversation, ascending by creation time
    /// with a stable id tie-break.
    pub fn list_conversation(
        &self,
        poster_id: &str,
        respondent_id: &str,
    ) -> Result<Vec<StoredMessage>> {
        let rows = self.with_conn(|conn| query_conversation(conn, poster_id, respondent_id))?;
        rows.into_iter().map(MessageRow::into_message).collect()
    }

    /// Flip the viewer's read flag on every counterpart-sent message in the
    /// conversation. Repeat calls are no-ops; returns rows flipped.
    pub fn mark_read(&self, poster_id: &str, respondent_id: &str, viewer: Role) -> Result<usize> {
        let (flag, counterpart) = match viewer {
            Role::Poster => ("read_by_poster", "respondent"),
            Role::Respondent => ("read_by_respondent", "poster"),
        };
        let sql = format!(
            "UPDATE messages SET {flag} = 1
              WHERE poster_id = ?1 AND respondent_id = ?2
                AND sender_role = ?3 AND {flag} = 0"
        );

        self.with_conn(|conn| {
            let flipped =
                conn.execute(&sql, rusqlite::params![poster_id, respondent_id, counterpart])?;
            Ok(flipped)
        })
    }

    /// One thread row per counterpart the actor has exchanged messages with,
    /// most recent conversation first.
    pub fn aggregate_threads(&self, actor_id: &str, role: Role) -> Result<Vec<ThreadSummary>> {
        let rows = self.with_conn(|conn| query_threads(conn, actor_id, role))?;
        rows.into_iter().map(ThreadRow::into_summary).collect()
    }
}

fn query_relationship(
    conn: &Connection,
    poster_id: &str,
    respondent_id: &str,
) -> Result<Option<RelationshipRow>> {
    let mut stmt = conn.prepare(
        "SELECT poster_id, respondent_id, poster_name, poster_email,
                respondent_name, respondent_email, job_ref, job_title, created_at
           FROM relationships
          WHERE poster_id = ?1 AND respondent_id = ?2",
    )?;

    let row = stmt
        .query_row([poster_id, respondent_id], |row| {
            Ok(RelationshipRow {
                poster_id: row.get(0)?,
                respondent_id: row.get(1)?,
                poster_name: row.get(2)?,
                poster_email: row.get(3)?,
                respondent_name: row.get(4)?,
                respondent_email: row.get(5)?,
                job_ref: row.get(6)?,
                job_title: row.get(7)?,
                created_at: row.get(8)?,
            })
        })
        .optional()?;

    Ok(row)
}

fn query_conversation(
    conn: &Connection,
    poster_id: &str,
    respondent_id: &str,
) -> Result<Vec<MessageRow>> {
    let mut stmt = conn.prepare(
        "SELECT id, poster_id, respondent_id, job_ref, sender_role, sender_id,
                body, attachments, read_by_poster, read_by_respondent, created_at
           FROM messages
          WHERE poster_id = ?1 AND respondent_id = ?2
          ORDER BY created_at ASC, id ASC",
    )?;

    let rows = stmt
        .query_map([poster_id, respondent_id], |row| {
            Ok(MessageRow {
                id: row.get(0)?,
                poster_id: row.get(1)?,
                respondent_id: row.get(2)?,
                job_ref: row.get(3)?,
                sender_role: row.get(4)?,
                sender_id: row.get(5)?,
                body: row.get(6)?,
                attachments: row.get(7)?,
                read_by_poster: row.get(8)?,
                read_by_respondent: row.get(9)?,
                created_at: row.get(10)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

fn query_threads(conn: &Connection, actor_id: &str, role: Role) -> Result<Vec<ThreadRow>> {
    // Last message per counterpart via NOT EXISTS on any later
    // (created_at, id); unread as a correlated count of counterpart-sent
    // rows the viewer has not read. Relationship join supplies the display
    // metadata in the same pass.
    let sql = match role {
        Role::Poster => {
            "SELECT m.respondent_id, r.respondent_name, r.respondent_email, r.job_title,
                    m.body, m.attachments, m.created_at, m.sender_role,
                    (SELECT COUNT(*) FROM messages u
                      WHERE u.poster_id = m.poster_id AND u.respondent_id = m.respondent_id
                        AND u.sender_role = 'respondent' AND u.read_by_poster = 0) AS unread
               FROM messages m
               JOIN relationships r
                 ON r.poster_id = m.poster_id AND r.respondent_id = m.respondent_id
              WHERE m.poster_id = ?1
                AND NOT EXISTS (
                    SELECT 1 FROM messages n
                     WHERE n.poster_id = m.poster_id AND n.respondent_id = m.respondent_id
                       AND (n.created_at > m.created_at
                            OR (n.created_at = m.created_at AND n.id > m.id)))
              ORDER BY m.created_at DESC, m.id DESC"
        }
        Role::Respondent => {
            "SELECT m.poster_id, r.poster_name, r.poster_email, r.job_title,
                    m.body, m.attachments, m.created_at, m.sender_role,
                    (SELECT COUNT(*) FROM messages u
                      WHERE u.poster_id = m.poster_id AND u.respondent_id = m.respondent_id
                        AND u.sender_role = 'poster' AND u.read_by_respondent = 0) AS unread
               FROM messages m
               JOIN relationships r
                 ON r.poster_id = m.poster_id AND r.respondent_id = m.respondent_id
              WHERE m.respondent_id = ?1
                AND NOT EXISTS (
                    SELECT 1 FROM messages n
                     WHERE n.poster_id = m.poster_id AND n.respondent_id = m.respondent_id
                       AND (n.created_at > m.created_at
                            OR (n.created_at = m.created_at AND n.id > m.id)))
              ORDER BY m.created_at DESC, m.id DESC"
        }
    };

    let mut stmt = conn.prepare(sql)?;

    let rows = stmt
        .query_map([actor_id], |row| {
            Ok(ThreadRow {
                counterpart_id: row.get(0)?,
                counterpart_name: row.get(1)?,
                counterpart_email: row.get(2)?,
                job_title: row.get(3)?,
                last_body: row.get(4)?,
                last_attachments: row.get(5)?,
                last_created_at: row.get(6)?,
                last_sender_role: row.get(7)?,
                unread_count: row.get(8)?,
            })
        })?
        .collect::<std::result::Result<Vec<_>, _>>()?;

    Ok(rows)
}

/// Extension trait for optional query results
trait OptionalExt<T> {
    fn optional(self) -> Result<Option<T>>;
}

impl<T> OptionalExt<T> for std::result::Result<T, rusqlite::Error> {
    fn optional(self) -> Result<Option<T>> {
        match self {
            Ok(val) => Ok(Some(val)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hirewire_types::models::{Attachment, ConversationKey};

    fn seed_relationship(db: &Database, poster: Uuid, respondent: Uuid) {
        db.insert_relationship(&RelationshipRow {
            poster_id: poster.to_string(),
            respondent_id: respondent.to_string(),
            poster_name: "Acme Robotics".into(),
            poster_email: "jobs@acme.test".into(),
            respondent_name: "Dana Flores".into(),
            respondent_email: "dana@mail.test".into(),
            job_ref: Some(Uuid::new_v4().to_string()),
            job_title: Some("Firmware Engineer".into()),
            created_at: String::new(),
        })
        .unwrap();
    }

    fn text_message(key: ConversationKey, sender: Role, body: &str) -> NewMessage {
        NewMessage {
            key,
            job_ref: None,
            sender_role: sender,
            sender_id: key.side(sender),
            body: body.into(),
            attachments: vec![],
        }
    }

    #[test]
    fn relationship_gate_answers_existence() {
        let db = Database::open_in_memory().unwrap();
        let poster = Uuid::new_v4();
        let respondent = Uuid::new_v4();
        seed_relationship(&db, poster, respondent);

        let found = db
            .get_relationship(&poster.to_string(), &respondent.to_string())
            .unwrap()
            .expect("seeded relationship");
        assert_eq!(found.poster_name, "Acme Robotics");
        assert_eq!(found.respondent_email, "dana@mail.test");

        // Reversed pair or unknown pair: no relationship, hard refusal.
        assert!(
            db.get_relationship(&respondent.to_string(), &poster.to_string())
                .unwrap()
                .is_none()
        );
        assert!(
            db.get_relationship(&Uuid::new_v4().to_string(), &respondent.to_string())
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn append_returns_the_canonical_row() {
        let db = Database::open_in_memory().unwrap();
        let key = ConversationKey::new(Uuid::new_v4(), Uuid::new_v4());
        seed_relationship(&db, key.poster_id, key.respondent_id);

        let stored = db
            .append_message(text_message(key, Role::Poster, "Are you still interested?"))
            .unwrap();
        assert_eq!(stored.sender_role, Role::Poster);
        assert!(!stored.read_by_poster);
        assert!(!stored.read_by_respondent);

        let listed = db
            .list_conversation(&key.poster_id.to_string(), &key.respondent_id.to_string())
            .unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, stored.id);
        assert_eq!(listed[0].created_at, stored.created_at);
        assert_eq!(listed[0].body, stored.body);
    }

    #[test]
    fn list_conversation_is_ascending_by_creation() {
        let db = Database::open_in_memory().unwrap();
        let key = ConversationKey::new(Uuid::new_v4(), Uuid::new_v4());
        seed_relationship(&db, key.poster_id, key.respondent_id);

        let first = db
            .append_message(text_message(key, Role::Poster, "one"))
            .unwrap();
        let second = db
            .append_message(text_message(key, Role::Respondent, "two"))
            .unwrap();
        let third = db
            .append_message(text_message(key, Role::Poster, "three"))
            .unwrap();

        let listed = db
            .list_conversation(&key.poster_id.to_string(), &key.respondent_id.to_string())
            .unwrap();
        let ids: Vec<Uuid> = listed.iter().map(|m| m.id).collect();
        assert_eq!(ids, vec![first.id, second.id, third.id]);
        assert!(listed.windows(2).all(|w| {
            (w[0].created_at, w[0].id.to_string()) <= (w[1].created_at, w[1].id.to_string())
        }));
    }

    #[test]
    fn mark_read_is_viewer_scoped_and_idempotent() {
        let db = Database::open_in_memory().unwrap();
        let key = ConversationKey::new(Uuid::new_v4(), Uuid::new_v4());
        seed_relationship(&db, key.poster_id, key.respondent_id);

        db.append_message(text_message(key, Role::Poster, "hello")).unwrap();
        db.append_message(text_message(key, Role::Respondent, "hi")).unwrap();
        db.append_message(text_message(key, Role::Respondent, "still here")).unwrap();

        let poster = key.poster_id.to_string();
        let respondent = key.respondent_id.to_string();

        // Poster reads: only the two respondent-sent messages flip.
        assert_eq!(db.mark_read(&poster, &respondent, Role::Poster).unwrap(), 2);
        assert_eq!(db.mark_read(&poster, &respondent, Role::Poster).unwrap(), 0);

        let listed = db.list_conversation(&poster, &respondent).unwrap();
        for msg in &listed {
            match msg.sender_role {
                Role::Respondent => assert!(msg.read_by_poster),
                Role::Poster => {
                    assert!(!msg.read_by_poster);
                    assert!(!msg.read_by_respondent);
                }
            }
        }
    }

    #[test]
    fn aggregate_threads_counts_and_orders() {
        let db = Database::open_in_memory().unwrap();
        let poster = Uuid::new_v4();
        let older = ConversationKey::new(poster, Uuid::new_v4());
        let newer = ConversationKey::new(poster, Uuid::new_v4());
        seed_relationship(&db, poster, older.respondent_id);
        seed_relationship(&db, poster, newer.respondent_id);

        db.append_message(text_message(older, Role::Respondent, "application follow-up"))
            .unwrap();
        db.append_message(text_message(newer, Role::Respondent, "thanks!")).unwrap();
        db.append_message(text_message(newer, Role::Respondent, "one more thing")).unwrap();

        let threads = db.aggregate_threads(&poster.to_string(), Role::Poster).unwrap();
        assert_eq!(threads.len(), 2);

        // Most recent conversation first.
        assert_eq!(threads[0].counterpart_id, newer.respondent_id);
        assert_eq!(threads[0].last_message, "one more thing");
        assert_eq!(threads[0].last_sender_role, Role::Respondent);
        assert_eq!(threads[0].unread_count, 2);
        assert_eq!(threads[0].counterpart_name, "Dana Flores");

        assert_eq!(threads[1].counterpart_id, older.respondent_id);
        assert_eq!(threads[1].unread_count, 1);

        // Reading the newer conversation zeroes only that counter.
        db.mark_read(
            &poster.to_string(),
            &newer.respondent_id.to_string(),
            Role::Poster,
        )
        .unwrap();
        let threads = db.aggregate_threads(&poster.to_string(), Role::Poster).unwrap();
        assert_eq!(threads[0].unread_count, 0);
        assert_eq!(threads[1].unread_count, 1);
    }

    #[test]
    fn attachment_only_message_previews_filename() {
        let db = Database::open_in_memory().unwrap();
        let key = ConversationKey::new(Uuid::new_v4(), Uuid::new_v4());
        seed_relationship(&db, key.poster_id, key.respondent_id);

        db.append_message(NewMessage {
            key,
            job_ref: None,
            sender_role: Role::Respondent,
            sender_id: key.respondent_id,
            body: String::new(),
            attachments: vec![Attachment {
                name: "portfolio.pdf".into(),
                reference: "blob-7".into(),
                mime_type: "application/pdf".into(),
                size_bytes: 2 * 1024 * 1024,
            }],
        })
        .unwrap();

        let threads = db
            .aggregate_threads(&key.poster_id.to_string(), Role::Poster)
            .unwrap();
        assert_eq!(threads[0].last_message, "Attachment: portfolio.pdf");

        let listed = db
            .list_conversation(&key.poster_id.to_string(), &key.respondent_id.to_string())
            .unwrap();
        assert_eq!(listed[0].attachments.len(), 1);
        assert_eq!(listed[0].attachments[0].mime_type, "application/pdf");
    }

    #[test]
    fn threads_view_is_role_symmetric() {
        let db = Database::open_in_memory().unwrap();
        let key = ConversationKey::new(Uuid::new_v4(), Uuid::new_v4());
        seed_relationship(&db, key.poster_id, key.respondent_id);

        db.append_message(text_message(key, Role::Poster, "Are you still interested?"))
            .unwrap();

        let respondent_view = db
            .aggregate_threads(&key.respondent_id.to_string(), Role::Respondent)
            .unwrap();
        assert_eq!(respondent_view.len(), 1);
        assert_eq!(respondent_view[0].counterpart_id, key.poster_id);
        assert_eq!(respondent_view[0].counterpart_name, "Acme Robotics");
        assert_eq!(respondent_view[0].unread_count, 1);

        let poster_view = db
            .aggregate_threads(&key.poster_id.to_string(), Role::Poster)
            .unwrap();
        assert_eq!(poster_view[0].unread_count, 0, "own messages are never unread");
    }
}
