use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{Attachment, Role, StoredMessage};

// -- JWT Claims --

/// JWT claims shared by the REST middleware and the gateway handshake.
/// Canonical definition lives here so both sides stay in agreement. Tokens
/// are minted by the credential service; this workspace only verifies them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claims {
    pub sub: Uuid,
    pub name: String,
    pub role: Role,
    pub exp: usize,
}

// -- Messaging --

/// Body of a send. A message is either text or a single attachment that was
/// already uploaded to the attachment store — exactly one of the two.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SendMessageRequest {
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub attachment: Option<Attachment>,
}

/// Counterpart display block returned with a conversation fetch.
#[derive(Debug, Clone, Serialize)]
pub struct CounterpartProfile {
    pub id: Uuid,
    pub name: String,
    pub email: String,
    pub job_title: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ConversationResponse {
    pub counterpart: CounterpartProfile,
    pub messages: Vec<StoredMessage>,
}
