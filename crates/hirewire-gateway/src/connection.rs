use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket};
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use uuid::Uuid;

use hirewire_db::Database;
use hirewire_types::api::Claims;
use hirewire_types::events::{GatewayCommand, GatewayEvent};
use hirewire_types::models::{ConversationKey, Role};

use crate::presence::PresenceRegistry;
use crate::rooms::ConversationRouter;

/// Heartbeat interval: server sends a Ping every 15 seconds.
/// If 2 consecutive Pongs are missed (~30s), the connection is dropped, so a
/// half-open socket cannot hold its presence refcount indefinitely.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(15);

/// How long a fresh connection may take to send its identify frame.
const IDENTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a live connection needs: shared registries plus the secret for
/// verifying identify tokens.
#[derive(Clone)]
pub struct GatewayContext {
    pub db: Arc<Database>,
    pub router: ConversationRouter,
    pub presence: PresenceRegistry,
    pub jwt_secret: String,
}

/// Handle a single WebSocket connection end to end: identify handshake,
/// registration, command loop, teardown. Until the handshake passes, nothing
/// is registered anywhere; after this function returns, nothing remains.
pub async fn handle_connection(socket: WebSocket, ctx: GatewayContext) {
    let (mut sender, mut receiver) = socket.split();

    let (actor_id, name, role) = match wait_for_identify(&mut receiver, &ctx.jwt_secret).await {
        Ok(identity) => identity,
        Err(reason) => {
            warn!("gateway client failed to identify: {}", reason);
            let error = GatewayEvent::Error {
                message: "unauthorized".into(),
            };
            let _ = sender
                .send(Message::Text(serde_json::to_string(&error).unwrap().into()))
                .await;
            return;
        }
    };

    info!("{} {} ({}) connected to gateway", role, name, actor_id);

    // Register with the router before snapshotting presence: a transition
    // broadcast after the snapshot always reaches this connection, so the
    // bootstrap is a safe baseline for the client to layer diffs on.
    let (conn_id, outbound_rx) = ctx.router.register(role, actor_id).await;
    if ctx.presence.acquire(role, actor_id) {
        ctx.router
            .broadcast(GatewayEvent::PresenceUpdate {
                role,
                id: actor_id,
                online: true,
            })
            .await;
    }

    let ready = GatewayEvent::Ready {
        actor_id,
        name: name.clone(),
        role,
    };
    let bootstrap = GatewayEvent::PresenceBootstrap {
        posters: ctx.presence.snapshot(Role::Poster),
        respondents: ctx.presence.snapshot(Role::Respondent),
    };

    let mut handshake_ok = true;
    for event in [ready, bootstrap] {
        if sender
            .send(Message::Text(serde_json::to_string(&event).unwrap().into()))
            .await
            .is_err()
        {
            handshake_ok = false;
            break;
        }
    }

    if handshake_ok {
        run_connection_loop(sender, receiver, outbound_rx, ctx.clone(), conn_id, actor_id, role)
            .await;
    }

    // Synchronous teardown: room membership and the presence refcount are
    // gone by the time this returns, whatever ended the connection.
    ctx.router.unregister(conn_id).await;
    if ctx.presence.release(role, actor_id) {
        ctx.router
            .broadcast(GatewayEvent::PresenceUpdate {
                role,
                id: actor_id,
                online: false,
            })
            .await;
    }

    info!("{} {} ({}) disconnected from gateway", role, name, actor_id);
}

/// Pump outbound events to the socket and inbound commands off it until
/// either side ends, with the heartbeat riding on the send side.
async fn run_connection_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut outbound_rx: mpsc::UnboundedReceiver<GatewayEvent>,
    ctx: GatewayContext,
    conn_id: Uuid,
    actor_id: Uuid,
    role: Role,
) {
    let pong_received = Arc::new(AtomicBool::new(true));
    let pong_flag_send = pong_received.clone();
    let pong_flag_recv = pong_received.clone();

    let mut send_task = tokio::spawn(async move {
        let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
        heartbeat.tick().await;
        let mut missed_heartbeats: u8 = 0;

        loop {
            tokio::select! {
                event = outbound_rx.recv() => {
                    let Some(event) = event else { break };
                    let text = serde_json::to_string(&event).unwrap();
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                _ = heartbeat.tick() => {
                    if pong_flag_send.swap(false, Ordering::Acquire) {
                        missed_heartbeats = 0;
                    } else {
                        missed_heartbeats += 1;
                        if missed_heartbeats >= 2 {
                            warn!(
                                "heartbeat timeout (missed {} pongs), dropping connection",
                                missed_heartbeats
                            );
                            break;
                        }
                    }
                    if sender.send(Message::Ping(vec![].into())).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let mut recv_task = tokio::spawn(async move {
        while let Some(Ok(msg)) = receiver.next().await {
            match msg {
                Message::Text(text) => match serde_json::from_str::<GatewayCommand>(&text) {
                    Ok(cmd) => handle_command(&ctx, conn_id, actor_id, role, cmd).await,
                    Err(e) => warn!(
                        "{} ({}) bad command: {} -- raw: {}",
                        role,
                        actor_id,
                        e,
                        &text[..text.len().min(200)]
                    ),
                },
                Message::Pong(_) => pong_flag_recv.store(true, Ordering::Release),
                Message::Close(_) => break,
                _ => {}
            }
        }
    });

    tokio::select! {
        _ = &mut send_task => recv_task.abort(),
        _ = &mut recv_task => send_task.abort(),
    }
}

/// First frame must be `identify {token, role}` within the timeout. The
/// declared role has to agree with the token's role claim; disagreement is
/// reported as plain "unauthorized" like any bad token.
async fn wait_for_identify(
    receiver: &mut SplitStream<WebSocket>,
    jwt_secret: &str,
) -> Result<(Uuid, String, Role), &'static str> {
    use jsonwebtoken::{DecodingKey, Validation, decode};

    let first_frame = tokio::time::timeout(IDENTIFY_TIMEOUT, async {
        while let Some(Ok(msg)) = receiver.next().await {
            if let Message::Text(text) = msg {
                return Some(serde_json::from_str::<GatewayCommand>(&text));
            }
        }
        None
    })
    .await
    .map_err(|_| "identify timeout")?
    .ok_or("closed before identify")?;

    let Ok(GatewayCommand::Identify { token, role }) = first_frame else {
        return Err("first frame was not identify");
    };

    let token_data = decode::<Claims>(
        &token,
        &DecodingKey::from_secret(jwt_secret.as_bytes()),
        &Validation::default(),
    )
    .map_err(|_| "invalid token")?;

    if token_data.claims.role != role {
        return Err("declared role disagrees with token");
    }

    Ok((token_data.claims.sub, token_data.claims.name, role))
}

/// Dispatch one inbound control message. Join and leave fail closed and
/// silently; the REST fetch is the authoritative error channel for a missing
/// relationship.
async fn handle_command(
    ctx: &GatewayContext,
    conn_id: Uuid,
    actor_id: Uuid,
    role: Role,
    cmd: GatewayCommand,
) {
    match cmd {
        GatewayCommand::Identify { .. } => {
            debug!("{} ({}) duplicate identify ignored", role, actor_id);
        }

        GatewayCommand::JoinConversation { counterpart_id } => {
            let key = ConversationKey::from_viewer(role, actor_id, counterpart_id);
            let db = ctx.db.clone();
            let gate = tokio::task::spawn_blocking(move || {
                db.get_relationship(&key.poster_id.to_string(), &key.respondent_id.to_string())
            })
            .await;

            match gate {
                Ok(Ok(Some(_))) => {
                    debug!("{} ({}) joined {}", role, actor_id, key.room());
                    ctx.router.join(conn_id, &key.room()).await;
                }
                Ok(Ok(None)) => {
                    warn!(
                        "{} ({}) join refused: no relationship with {}",
                        role, actor_id, counterpart_id
                    );
                }
                Ok(Err(e)) => {
                    warn!("{} ({}) join gate failed: {:#}", role, actor_id, e);
                }
                Err(e) => {
                    warn!("spawn_blocking join error: {}", e);
                }
            }
        }

        GatewayCommand::LeaveConversation { counterpart_id } => {
            let key = ConversationKey::from_viewer(role, actor_id, counterpart_id);
            debug!("{} ({}) left {}", role, actor_id, key.room());
            ctx.router.leave(conn_id, &key.room()).await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hirewire_db::models::RelationshipRow;

    fn test_ctx() -> GatewayContext {
        GatewayContext {
            db: Arc::new(Database::open_in_memory().unwrap()),
            router: ConversationRouter::new(),
            presence: PresenceRegistry::new(),
            jwt_secret: "test-secret".into(),
        }
    }

    fn seed_relationship(ctx: &GatewayContext, poster: Uuid, respondent: Uuid) {
        ctx.db
            .insert_relationship(&RelationshipRow {
                poster_id: poster.to_string(),
                respondent_id: respondent.to_string(),
                poster_name: "Acme Robotics".into(),
                poster_email: "jobs@acme.test".into(),
                respondent_name: "Dana Flores".into(),
                respondent_email: "dana@mail.test".into(),
                job_ref: None,
                job_title: None,
                created_at: String::new(),
            })
            .unwrap();
    }

    #[tokio::test]
    async fn join_passes_only_with_a_relationship() {
        let ctx = test_ctx();
        let poster = Uuid::new_v4();
        let respondent = Uuid::new_v4();
        let stranger = Uuid::new_v4();
        seed_relationship(&ctx, poster, respondent);

        let (conn_id, _rx) = ctx.router.register(Role::Poster, poster).await;
        let key = ConversationKey::new(poster, respondent);

        handle_command(
            &ctx,
            conn_id,
            poster,
            Role::Poster,
            GatewayCommand::JoinConversation { counterpart_id: respondent },
        )
        .await;
        assert_eq!(ctx.router.room_size(&key.room()).await, 1);

        // No relationship with the stranger: silent refusal, no membership.
        handle_command(
            &ctx,
            conn_id,
            poster,
            Role::Poster,
            GatewayCommand::JoinConversation { counterpart_id: stranger },
        )
        .await;
        let refused = ConversationKey::new(poster, stranger);
        assert_eq!(ctx.router.room_size(&refused.room()).await, 0);
    }

    #[tokio::test]
    async fn leave_is_a_silent_noop_when_not_joined() {
        let ctx = test_ctx();
        let respondent = Uuid::new_v4();
        let (conn_id, _rx) = ctx.router.register(Role::Respondent, respondent).await;

        handle_command(
            &ctx,
            conn_id,
            respondent,
            Role::Respondent,
            GatewayCommand::LeaveConversation { counterpart_id: Uuid::new_v4() },
        )
        .await;
    }

    #[tokio::test]
    async fn join_key_is_derived_from_the_authenticated_actor() {
        let ctx = test_ctx();
        let poster = Uuid::new_v4();
        let respondent = Uuid::new_v4();
        seed_relationship(&ctx, poster, respondent);

        // The respondent names the poster; the room must be the same one the
        // poster side addresses.
        let (conn_id, _rx) = ctx.router.register(Role::Respondent, respondent).await;
        handle_command(
            &ctx,
            conn_id,
            respondent,
            Role::Respondent,
            GatewayCommand::JoinConversation { counterpart_id: poster },
        )
        .await;

        let key = ConversationKey::new(poster, respondent);
        assert_eq!(ctx.router.room_size(&key.room()).await, 1);
    }
}
