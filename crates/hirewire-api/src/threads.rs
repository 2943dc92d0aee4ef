use anyhow::anyhow;
use axum::{
    Extension, Json,
    extract::{Path, State},
};
use uuid::Uuid;

use hirewire_types::api::{Claims, ConversationResponse, CounterpartProfile};
use hirewire_types::models::{ConversationKey, ThreadSummary};

use crate::error::{ApiError, store_err};
use crate::state::AppState;

/// GET /threads — the viewer's aggregated conversation list, most recent
/// first. Served from the aggregator cache once primed; the first request
/// (and any request after a restart) aggregates from the store.
pub async fn list_threads(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<Vec<ThreadSummary>>, ApiError> {
    if let Some(cached) = state.threads.cached(claims.role, claims.sub) {
        return Ok(Json(cached));
    }

    let db = state.db.clone();
    let actor = claims.sub.to_string();
    let role = claims.role;
    let rows = tokio::task::spawn_blocking(move || db.aggregate_threads(&actor, role))
        .await
        .map_err(|e| store_err(anyhow!("spawn_blocking join error: {e}")))?
        .map_err(store_err)?;

    state.threads.prime(claims.role, claims.sub, rows.clone());
    Ok(Json(rows))
}

/// GET /conversations/{counterpart_id} — counterpart metadata plus the full
/// ascending message log. Fetching is what "reads" a conversation: every
/// counterpart-sent message is marked read and the viewer's unread counter
/// for this thread drops to zero.
pub async fn get_conversation(
    State(state): State<AppState>,
    Path(counterpart_id): Path<Uuid>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<ConversationResponse>, ApiError> {
    let key = ConversationKey::from_viewer(claims.role, claims.sub, counterpart_id);
    let viewer = claims.role;

    let db = state.db.clone();
    let fetched = tokio::task::spawn_blocking(move || {
        let poster = key.poster_id.to_string();
        let respondent = key.respondent_id.to_string();

        let Some(rel) = db.get_relationship(&poster, &respondent)? else {
            return Ok::<_, anyhow::Error>(None);
        };
        // Mark before listing so the returned rows carry the flipped flags.
        db.mark_read(&poster, &respondent, viewer)?;
        let messages = db.list_conversation(&poster, &respondent)?;
        Ok(Some((rel, messages)))
    })
    .await
    .map_err(|e| store_err(anyhow!("spawn_blocking join error: {e}")))?
    .map_err(store_err)?;

    let (rel, messages) = fetched.ok_or(ApiError::Unauthorized)?;
    state.threads.reset_unread(claims.role, claims.sub, counterpart_id);

    let context = rel.context();
    let (name, email) = context.counterpart_of(claims.role);
    Ok(Json(ConversationResponse {
        counterpart: CounterpartProfile {
            id: counterpart_id,
            name: name.to_string(),
            email: email.to_string(),
            job_title: context.job_title.clone(),
        },
        messages,
    }))
}
