use anyhow::anyhow;
use axum::{
    Extension, Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::warn;
use uuid::Uuid;

use hirewire_db::models::NewMessage;
use hirewire_types::api::{Claims, SendMessageRequest};
use hirewire_types::events::GatewayEvent;
use hirewire_types::models::{
    Attachment, ConversationKey, Role, StoredMessage, personal_room,
};

use crate::attachment::check_policy;
use crate::error::{ApiError, store_err};
use crate::state::AppState;

/// Longest accepted message body, in characters.
const MAX_BODY_CHARS: usize = 4000;

/// POST /conversations/{counterpart_id}/messages — gate, validate, persist,
/// fan out, in that order. The conversation's send guard is held across
/// append → publish so every subscriber sees `message:new` events in
/// persistence order; nothing is published unless the append succeeded.
pub async fn send_message(
    State(state): State<AppState>,
    Path(counterpart_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
    Json(req): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<StoredMessage>), ApiError> {
    let key = ConversationKey::from_viewer(claims.role, claims.sub, counterpart_id);
    let (body, attachments) = validate_send(req)?;

    let room = key.room();
    let guard = state.router.send_guard(&room).await;
    let _ordered = guard.lock().await;

    let db = state.db.clone();
    let sender_role = claims.role;
    let sender_id = claims.sub;
    let appended = tokio::task::spawn_blocking(move || {
        let Some(rel) =
            db.get_relationship(&key.poster_id.to_string(), &key.respondent_id.to_string())?
        else {
            return Ok::<_, anyhow::Error>(None);
        };
        let stored = db.append_message(NewMessage {
            key,
            job_ref: rel.job_ref()?,
            sender_role,
            sender_id,
            body,
            attachments,
        })?;
        Ok(Some((rel, stored)))
    })
    .await
    .map_err(|e| store_err(anyhow!("spawn_blocking join error: {e}")))?
    .map_err(store_err)?;

    let (rel, stored) = appended.ok_or(ApiError::Unauthorized)?;
    let context = rel.context();

    // Raw message to the conversation room, with display context so clients
    // render it without a second fetch.
    state
        .router
        .publish(
            &room,
            GatewayEvent::MessageNew {
                conversation_key: key.to_string(),
                message: stored.clone(),
                context: context.clone(),
            },
        )
        .await;

    // Compact summary to both personal channels so thread lists stay current
    // even for actors not viewing this conversation.
    for viewer in [Role::Poster, Role::Respondent] {
        let viewer_id = key.side(viewer);
        let in_room = state.router.actor_in_room(viewer, viewer_id, &room).await;

        if let Some(summary) =
            state
                .threads
                .apply_message(viewer, viewer_id, &stored, &context, in_room)
        {
            state
                .router
                .publish_to_actor(viewer, viewer_id, GatewayEvent::ConversationUpdated(summary))
                .await;
        } else if state.router.room_size(&personal_room(viewer, viewer_id)).await > 0 {
            // Connected but never listed threads: build the row from the
            // store for this one fan-out.
            let db = state.db.clone();
            let actor = viewer_id.to_string();
            match tokio::task::spawn_blocking(move || db.aggregate_threads(&actor, viewer)).await {
                Ok(Ok(rows)) => {
                    let wanted = key.side(viewer.counterpart());
                    if let Some(summary) = rows.into_iter().find(|t| t.counterpart_id == wanted) {
                        state
                            .router
                            .publish_to_actor(
                                viewer,
                                viewer_id,
                                GatewayEvent::ConversationUpdated(summary),
                            )
                            .await;
                    }
                }
                Ok(Err(e)) => {
                    warn!("thread fan-out for {} {} failed: {:#}", viewer, viewer_id, e);
                }
                Err(e) => warn!("spawn_blocking join error: {}", e),
            }
        }
    }

    Ok((StatusCode::CREATED, Json(stored)))
}

/// Enforce the arity rule: a message is text or a single attachment, exactly
/// one of the two. Attachment metadata must also pass the store's policy.
fn validate_send(req: SendMessageRequest) -> Result<(String, Vec<Attachment>), ApiError> {
    let text = req
        .text
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty());

    match (text, req.attachment) {
        (Some(_), Some(_)) => Err(ApiError::ValidationFailed(
            "message must carry text or an attachment, not both".into(),
        )),
        (None, None) => Err(ApiError::ValidationFailed(
            "message must carry text or an attachment".into(),
        )),
        (Some(body), None) => {
            if body.chars().count() > MAX_BODY_CHARS {
                return Err(ApiError::ValidationFailed(format!(
                    "message body exceeds {MAX_BODY_CHARS} characters"
                )));
            }
            Ok((body, vec![]))
        }
        (None, Some(attachment)) => {
            check_policy(&attachment)?;
            Ok((String::new(), vec![attachment]))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(text: Option<&str>, attachment: Option<Attachment>) -> SendMessageRequest {
        SendMessageRequest {
            text: text.map(str::to_string),
            attachment,
        }
    }

    fn attachment(mime_type: &str, size_bytes: u64) -> Attachment {
        Attachment {
            name: "resume.pdf".into(),
            reference: "blob-1".into(),
            mime_type: mime_type.into(),
            size_bytes,
        }
    }

    #[test]
    fn exactly_one_of_text_or_attachment() {
        assert!(matches!(
            validate_send(request(None, None)),
            Err(ApiError::ValidationFailed(_))
        ));
        assert!(matches!(
            validate_send(request(Some("   "), None)),
            Err(ApiError::ValidationFailed(_)),
        ));
        assert!(matches!(
            validate_send(request(Some("hi"), Some(attachment("application/pdf", 1024)))),
            Err(ApiError::ValidationFailed(_))
        ));

        let (body, attachments) = validate_send(request(Some(" hello "), None)).unwrap();
        assert_eq!(body, "hello");
        assert!(attachments.is_empty());

        let (body, attachments) =
            validate_send(request(None, Some(attachment("application/pdf", 1024)))).unwrap();
        assert!(body.is_empty());
        assert_eq!(attachments.len(), 1);
    }

    #[test]
    fn body_length_is_capped() {
        let long = "x".repeat(MAX_BODY_CHARS + 1);
        assert!(matches!(
            validate_send(request(Some(&long), None)),
            Err(ApiError::ValidationFailed(_))
        ));
        let at_limit = "x".repeat(MAX_BODY_CHARS);
        assert!(validate_send(request(Some(&at_limit), None)).is_ok());
    }

    #[test]
    fn attachment_policy_is_applied() {
        assert!(matches!(
            validate_send(request(None, Some(attachment("application/pdf", 11 * 1024 * 1024)))),
            Err(ApiError::AttachmentRejected(_))
        ));
        assert!(matches!(
            validate_send(request(None, Some(attachment("application/x-msdownload", 1024)))),
            Err(ApiError::AttachmentRejected(_))
        ));
    }
}
