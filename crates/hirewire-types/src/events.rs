use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::models::{ConversationContext, Role, StoredMessage, ThreadSummary};

/// Events sent over the WebSocket gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayEvent {
    /// Server accepted the identify handshake
    #[serde(rename = "ready")]
    Ready {
        actor_id: Uuid,
        name: String,
        role: Role,
    },

    /// Who is online right now, pushed once right after `ready`. Transition
    /// events may race this snapshot; clients treat it as a baseline and
    /// apply `presence:update` diffs on top.
    #[serde(rename = "presence:bootstrap")]
    PresenceBootstrap {
        posters: Vec<Uuid>,
        respondents: Vec<Uuid>,
    },

    /// A message was appended to a conversation this connection has joined
    #[serde(rename = "message:new")]
    MessageNew {
        conversation_key: String,
        message: StoredMessage,
        context: ConversationContext,
    },

    /// Thread-list refresh for one conversation, delivered on the actor's
    /// personal room regardless of which rooms are open
    #[serde(rename = "conversation:updated")]
    ConversationUpdated(ThreadSummary),

    /// An actor crossed the offline/online edge (never emitted per tab)
    #[serde(rename = "presence:update")]
    PresenceUpdate { role: Role, id: Uuid, online: bool },

    /// Terminal error sent before the server closes the socket
    #[serde(rename = "error")]
    Error { message: String },
}

/// Commands sent from client to server over the WebSocket.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum GatewayCommand {
    /// Authenticate the connection; must be the first frame
    #[serde(rename = "identify")]
    Identify { token: String, role: Role },

    /// Join the room for the conversation with the named counterpart.
    /// Fails closed and silently when no relationship exists; the REST
    /// fetch is the authoritative error channel.
    #[serde(rename = "join_conversation")]
    JoinConversation { counterpart_id: Uuid },

    /// Leave that room. A no-op when not joined.
    #[serde(rename = "leave_conversation")]
    LeaveConversation { counterpart_id: Uuid },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_use_wire_names() {
        let event = GatewayEvent::PresenceUpdate {
            role: Role::Poster,
            id: Uuid::nil(),
            online: true,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "presence:update");
        assert_eq!(json["data"]["role"], "poster");
        assert_eq!(json["data"]["online"], true);
    }

    #[test]
    fn commands_round_trip() {
        let raw = r#"{"type":"join_conversation","data":{"counterpart_id":"00000000-0000-0000-0000-000000000001"}}"#;
        let cmd: GatewayCommand = serde_json::from_str(raw).unwrap();
        match cmd {
            GatewayCommand::JoinConversation { counterpart_id } => {
                assert_eq!(counterpart_id, "00000000-0000-0000-0000-000000000001".parse::<Uuid>().unwrap());
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
