use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which side of a conversation an actor is on. Posters are organization
/// accounts (they publish jobs), respondents are applicant accounts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Poster,
    Respondent,
}

impl Role {
    /// The other side of the conversation.
    pub fn counterpart(self) -> Role {
        match self {
            Role::Poster => Role::Respondent,
            Role::Respondent => Role::Poster,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Poster => "poster",
            Role::Respondent => "respondent",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "poster" => Some(Role::Poster),
            "respondent" => Some(Role::Respondent),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Metadata for a file already uploaded to the attachment store. The
/// reference is opaque; clients resolve it against the store directly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub name: String,
    pub reference: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

/// Canonical message record as persisted. The row the store hands back from
/// an append is the one echoed to clients, both in the REST response and in
/// the `message:new` event — never a locally reconstructed copy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredMessage {
    pub id: Uuid,
    pub poster_id: Uuid,
    pub respondent_id: Uuid,
    /// Job the underlying application was for, copied from the relationship.
    pub job_ref: Option<Uuid>,
    pub sender_role: Role,
    pub sender_id: Uuid,
    pub body: String,
    pub attachments: Vec<Attachment>,
    pub read_by_poster: bool,
    pub read_by_respondent: bool,
    pub created_at: DateTime<Utc>,
}

impl StoredMessage {
    pub fn key(&self) -> ConversationKey {
        ConversationKey::new(self.poster_id, self.respondent_id)
    }

    /// One-line preview for thread lists.
    pub fn preview(&self) -> String {
        message_preview(&self.body, &self.attachments)
    }
}

/// Preview line for a message: the body, or `Attachment: <filename>` when
/// the message carries only a file.
pub fn message_preview(body: &str, attachments: &[Attachment]) -> String {
    if body.is_empty() {
        match attachments.first() {
            Some(att) => format!("Attachment: {}", att.name),
            None => String::new(),
        }
    } else {
        body.to_string()
    }
}

/// The ordered pair identifying one poster–respondent conversation. Not a
/// stored entity: derived from messages and relationship rows on demand.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConversationKey {
    pub poster_id: Uuid,
    pub respondent_id: Uuid,
}

impl ConversationKey {
    pub fn new(poster_id: Uuid, respondent_id: Uuid) -> Self {
        Self {
            poster_id,
            respondent_id,
        }
    }

    /// Derive the key from the authenticated viewer plus the counterpart
    /// they named. The viewer's own id always fills their side of the pair,
    /// so a client can never address a conversation it is not a party to.
    pub fn from_viewer(role: Role, actor_id: Uuid, counterpart_id: Uuid) -> Self {
        match role {
            Role::Poster => Self::new(actor_id, counterpart_id),
            Role::Respondent => Self::new(counterpart_id, actor_id),
        }
    }

    pub fn side(&self, role: Role) -> Uuid {
        match role {
            Role::Poster => self.poster_id,
            Role::Respondent => self.respondent_id,
        }
    }

    /// Stable room identifier for this conversation.
    pub fn room(&self) -> String {
        format!("convo:{}:{}", self.poster_id, self.respondent_id)
    }
}

impl fmt::Display for ConversationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.poster_id, self.respondent_id)
    }
}

/// Room key for an actor's personal channel. Every connection for that actor
/// joins it at registration; thread-list updates land here so clients stay
/// current without having the conversation room open.
pub fn personal_room(role: Role, actor_id: Uuid) -> String {
    format!("{}:{}", role, actor_id)
}

/// Relationship display metadata, resolved once per operation and attached
/// to live events so either side can render the conversation header without
/// a second fetch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConversationContext {
    pub poster_name: String,
    pub poster_email: String,
    pub respondent_name: String,
    pub respondent_email: String,
    pub job_title: Option<String>,
}

impl ConversationContext {
    /// Display name/email of the viewer's counterpart.
    pub fn counterpart_of(&self, viewer: Role) -> (&str, &str) {
        match viewer {
            Role::Poster => (&self.respondent_name, &self.respondent_email),
            Role::Respondent => (&self.poster_name, &self.poster_email),
        }
    }
}

/// One row of an actor's thread list: the aggregated view of a single
/// conversation, distinct from the raw message log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub counterpart_id: Uuid,
    pub counterpart_name: String,
    pub counterpart_email: String,
    pub job_title: Option<String>,
    pub last_message: String,
    pub last_message_at: DateTime<Utc>,
    pub last_sender_role: Role,
    pub unread_count: u32,
}
