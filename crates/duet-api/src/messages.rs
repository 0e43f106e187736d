use axum::{
    Json,
    extract::{Query, State},
    http::StatusCode,
    response::IntoResponse,
};
use tracing::{debug, error, warn};

use duet_db::AppendOutcome;
use duet_types::ConversationId;
use duet_types::api::{MessagePage, MessagesQuery, OutgoingMessage};

use crate::state::AppState;

/// `GET /api/messages?userId1=..&userId2=..&page=..&limit=..`
///
/// Stateless backward pagination: page 1 is the newest `limit` messages,
/// each page newest-first.
pub async fn get_messages(
    State(state): State<AppState>,
    Query(query): Query<MessagesQuery>,
) -> Result<impl IntoResponse, StatusCode> {
    if query.user_id1.is_empty() || query.user_id2.is_empty() {
        return Err(StatusCode::BAD_REQUEST);
    }

    let conversation = ConversationId::new(query.user_id1, query.user_id2);
    let limit = query.limit.min(state.page_limit_max);
    let page = query.page;

    // Run blocking DB query off the async runtime
    let db = state.db.clone();
    let (rows, has_more) =
        tokio::task::spawn_blocking(move || db.page_messages(&conversation, page, limit))
            .await
            .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
            .map_err(|e| { error!("History query failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    Ok(Json(MessagePage {
        messages: rows.into_iter().map(|row| row.into_message()).collect(),
        has_more,
    }))
}

/// `POST /api/messages`
///
/// Persist only; live relay happens over the gateway. Idempotent on `id`:
/// `201` for a new message, `200` for a replay, `409` if the id belongs to
/// a different message.
pub async fn append_message(
    State(state): State<AppState>,
    Json(req): Json<OutgoingMessage>,
) -> Result<impl IntoResponse, StatusCode> {
    if !req.is_well_formed() {
        warn!("Rejected message with missing fields from {}", req.sender_id);
        return Err(StatusCode::BAD_REQUEST);
    }

    let new_message = req.into_new_message();
    let db = state.db.clone();
    let outcome = tokio::task::spawn_blocking(move || db.append_message(&new_message))
        .await
        .map_err(|e| { error!("spawn_blocking join error: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?
        .map_err(|e| { error!("Message append failed: {}", e); StatusCode::INTERNAL_SERVER_ERROR })?;

    let (status, row) = match outcome {
        AppendOutcome::Inserted(row) => (StatusCode::CREATED, row),
        AppendOutcome::Replayed(row) => (StatusCode::OK, row),
        AppendOutcome::IdConflict => return Err(StatusCode::CONFLICT),
    };
    let message = row.into_message();
    debug!("Stored message {} (seq {}) in {}", message.id, message.sequence, message.conversation());

    Ok((status, Json(message)))
}
