use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::sync::{Mutex, RwLock, mpsc};
use uuid::Uuid;

use hirewire_types::events::GatewayEvent;
use hirewire_types::models::{Role, personal_room};

/// One live connection: who it belongs to, how to reach it, and which rooms
/// it has joined.
struct ConnectionHandle {
    actor_id: Uuid,
    role: Role,
    tx: mpsc::UnboundedSender<GatewayEvent>,
    rooms: HashSet<String>,
}

#[derive(Default)]
struct RouterState {
    /// conn_id -> handle
    conns: HashMap<Uuid, ConnectionHandle>,
    /// room key -> member conn_ids
    rooms: HashMap<String, HashSet<Uuid>>,
}

/// Manages room membership and event fan-out for all live connections.
///
/// Rooms are plain keyed sets of connection ids: conversation rooms
/// (`convo:{poster}:{respondent}`) that clients join and leave explicitly,
/// and per-actor personal rooms (`poster:{id}` / `respondent:{id}`) that
/// every connection joins at registration. Membership and connection
/// handles live under one lock so the two tables never diverge.
#[derive(Clone)]
pub struct ConversationRouter {
    inner: Arc<RouterInner>,
}

struct RouterInner {
    state: RwLock<RouterState>,
    /// One guard per conversation key. The send path holds it across
    /// append → publish, which is what makes room delivery order equal
    /// persistence order for a conversation. Guards are never held while
    /// touching `state`.
    send_guards: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl ConversationRouter {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RouterInner {
                state: RwLock::new(RouterState::default()),
                send_guards: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Register a connection for an authenticated actor. Returns the
    /// connection id and the outbound event receiver; the connection is
    /// already a member of the actor's personal room when this returns.
    pub async fn register(
        &self,
        role: Role,
        actor_id: Uuid,
    ) -> (Uuid, mpsc::UnboundedReceiver<GatewayEvent>) {
        let conn_id = Uuid::new_v4();
        let (tx, rx) = mpsc::unbounded_channel();
        let personal = personal_room(role, actor_id);

        let mut state = self.inner.state.write().await;
        state.rooms.entry(personal.clone()).or_default().insert(conn_id);
        state.conns.insert(
            conn_id,
            ConnectionHandle {
                actor_id,
                role,
                tx,
                rooms: HashSet::from([personal]),
            },
        );

        (conn_id, rx)
    }

    /// Remove a connection and drop it from every room it joined. Called
    /// synchronously on disconnect so a dead connection never lingers in a
    /// membership set.
    pub async fn unregister(&self, conn_id: Uuid) {
        let mut state = self.inner.state.write().await;
        let Some(handle) = state.conns.remove(&conn_id) else {
            return;
        };
        for room in &handle.rooms {
            if let Some(members) = state.rooms.get_mut(room) {
                members.remove(&conn_id);
                if members.is_empty() {
                    state.rooms.remove(room);
                }
            }
        }
    }

    /// Add the connection to a room. Idempotent; unknown connections are
    /// ignored. Authorization happened before this call — the router does
    /// not re-check relationships.
    pub async fn join(&self, conn_id: Uuid, room: &str) {
        let mut state = self.inner.state.write().await;
        let Some(handle) = state.conns.get_mut(&conn_id) else {
            return;
        };
        handle.rooms.insert(room.to_string());
        state.rooms.entry(room.to_string()).or_default().insert(conn_id);
    }

    /// Drop the connection from a room. A no-op when not joined.
    pub async fn leave(&self, conn_id: Uuid, room: &str) {
        let mut state = self.inner.state.write().await;
        if let Some(handle) = state.conns.get_mut(&conn_id) {
            handle.rooms.remove(room);
        }
        if let Some(members) = state.rooms.get_mut(room) {
            members.remove(&conn_id);
            if members.is_empty() {
                state.rooms.remove(room);
            }
        }
    }

    /// Deliver an event to every connection currently in the room.
    pub async fn publish(&self, room: &str, event: GatewayEvent) {
        let state = self.inner.state.read().await;
        let Some(members) = state.rooms.get(room) else {
            return;
        };
        for conn_id in members {
            if let Some(handle) = state.conns.get(conn_id) {
                let _ = handle.tx.send(event.clone());
            }
        }
    }

    /// Deliver an event on the actor's personal room, regardless of which
    /// conversation rooms their connections have open.
    pub async fn publish_to_actor(&self, role: Role, actor_id: Uuid, event: GatewayEvent) {
        self.publish(&personal_room(role, actor_id), event).await;
    }

    /// Deliver an event to every live connection (presence transitions).
    pub async fn broadcast(&self, event: GatewayEvent) {
        let state = self.inner.state.read().await;
        for handle in state.conns.values() {
            let _ = handle.tx.send(event.clone());
        }
    }

    /// Queue an event for one connection (handshake replies).
    pub async fn send_to_conn(&self, conn_id: Uuid, event: GatewayEvent) {
        let state = self.inner.state.read().await;
        if let Some(handle) = state.conns.get(&conn_id) {
            let _ = handle.tx.send(event);
        }
    }

    /// Whether any of the actor's connections currently has the room open.
    /// The thread aggregator uses this to decide if a new message should
    /// count as unread for that actor.
    pub async fn actor_in_room(&self, role: Role, actor_id: Uuid, room: &str) -> bool {
        let state = self.inner.state.read().await;
        let Some(members) = state.rooms.get(room) else {
            return false;
        };
        members.iter().any(|conn_id| {
            state
                .conns
                .get(conn_id)
                .is_some_and(|h| h.role == role && h.actor_id == actor_id)
        })
    }

    /// The serialization guard for one conversation's send path.
    pub async fn send_guard(&self, conversation_room: &str) -> Arc<Mutex<()>> {
        let mut guards = self.inner.send_guards.lock().await;
        guards
            .entry(conversation_room.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Number of connections in a room (diagnostics and tests).
    pub async fn room_size(&self, room: &str) -> usize {
        let state = self.inner.state.read().await;
        state.rooms.get(room).map_or(0, |members| members.len())
    }
}
