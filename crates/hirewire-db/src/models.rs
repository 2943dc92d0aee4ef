//! Database row types — these map directly to SQLite rows.
//! Row structs stay string-typed; [`queries`](crate::queries) converts them
//! into `hirewire-types` values exactly once at the adapter boundary, so the
//! rest of the system never re-parses ids or timestamps.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use uuid::Uuid;

use hirewire_types::models::{
    Attachment, ConversationKey, ConversationContext, Role, StoredMessage, ThreadSummary,
    message_preview,
};

pub struct RelationshipRow {
    pub poster_id: String,
    pub respondent_id: String,
    pub poster_name: String,
    pub poster_email: String,
    pub respondent_name: String,
    pub respondent_email: String,
    pub job_ref: Option<String>,
    pub job_title: Option<String>,
    pub created_at: String,
}

impl RelationshipRow {
    pub fn context(&self) -> ConversationContext {
        ConversationContext {
            poster_name: self.poster_name.clone(),
            poster_email: self.poster_email.clone(),
            respondent_name: self.respondent_name.clone(),
            respondent_email: self.respondent_email.clone(),
            job_title: self.job_title.clone(),
        }
    }

    pub fn job_ref(&self) -> Result<Option<Uuid>> {
        parse_opt_uuid(self.job_ref.as_deref(), "relationship job_ref")
    }
}

pub struct MessageRow {
    pub id: String,
    pub poster_id: String,
    pub respondent_id: String,
    pub job_ref: Option<String>,
    pub sender_role: String,
    pub sender_id: String,
    pub body: String,
    pub attachments: String,
    pub read_by_poster: bool,
    pub read_by_respondent: bool,
    pub created_at: String,
}

impl MessageRow {
    pub fn into_message(self) -> Result<StoredMessage> {
        let attachments: Vec<Attachment> = serde_json::from_str(&self.attachments)
            .with_context(|| format!("corrupt attachments on message {}", self.id))?;

        Ok(StoredMessage {
            id: parse_uuid(&self.id, "message id")?,
            poster_id: parse_uuid(&self.poster_id, "message poster_id")?,
            respondent_id: parse_uuid(&self.respondent_id, "message respondent_id")?,
            job_ref: parse_opt_uuid(self.job_ref.as_deref(), "message job_ref")?,
            sender_role: parse_role(&self.sender_role)?,
            sender_id: parse_uuid(&self.sender_id, "message sender_id")?,
            body: self.body,
            attachments,
            read_by_poster: self.read_by_poster,
            read_by_respondent: self.read_by_respondent,
            created_at: parse_timestamp(&self.created_at)?,
        })
    }
}

pub struct ThreadRow {
    pub counterpart_id: String,
    pub counterpart_name: String,
    pub counterpart_email: String,
    pub job_title: Option<String>,
    pub last_body: String,
    pub last_attachments: String,
    pub last_created_at: String,
    pub last_sender_role: String,
    pub unread_count: i64,
}

impl ThreadRow {
    pub fn into_summary(self) -> Result<ThreadSummary> {
        let attachments: Vec<Attachment> = serde_json::from_str(&self.last_attachments)
            .with_context(|| {
                format!("corrupt attachments in thread with {}", self.counterpart_id)
            })?;

        Ok(ThreadSummary {
            counterpart_id: parse_uuid(&self.counterpart_id, "thread counterpart_id")?,
            counterpart_name: self.counterpart_name,
            counterpart_email: self.counterpart_email,
            job_title: self.job_title,
            last_message: message_preview(&self.last_body, &attachments),
            last_message_at: parse_timestamp(&self.last_created_at)?,
            last_sender_role: parse_role(&self.last_sender_role)?,
            unread_count: u32::try_from(self.unread_count).unwrap_or(0),
        })
    }
}

/// Input to an append. The store assigns id and timestamp; everything else
/// was validated by the caller after the relationship gate passed.
pub struct NewMessage {
    pub key: ConversationKey,
    pub job_ref: Option<Uuid>,
    pub sender_role: Role,
    pub sender_id: Uuid,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

fn parse_uuid(raw: &str, what: &str) -> Result<Uuid> {
    raw.parse()
        .map_err(|e| anyhow!("corrupt {} '{}': {}", what, raw, e))
}

fn parse_opt_uuid(raw: Option<&str>, what: &str) -> Result<Option<Uuid>> {
    raw.map(|r| parse_uuid(r, what)).transpose()
}

fn parse_role(raw: &str) -> Result<Role> {
    Role::parse(raw).ok_or_else(|| anyhow!("corrupt sender_role '{}'", raw))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .or_else(|_| {
            // Intake-flow rows use SQLite's "YYYY-MM-DD HH:MM:SS" default.
            chrono::NaiveDateTime::parse_from_str(raw, "%Y-%m-%d %H:%M:%S")
                .map(|ndt| ndt.and_utc())
        })
        .map_err(|e| anyhow!("corrupt timestamp '{}': {}", raw, e))
}
