use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use std::sync::Arc;
use uuid::Uuid;

use crate::context::AppContext;
use crate::distribution;
use crate::error::AppError;
use crate::frame::NewDirectMessage;
use crate::routes::channels::PageQuery;
use crate::routes::extractors::AuthenticatedUser;

/// GET /api/direct-messages/:user_id
///
/// Marks everything inbound from the peer as read, then returns the page.
/// The mark step is `distribution::mark_conversation_read`, a separately
/// tested operation; repeating the read is idempotent.
pub async fn conversation(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Path(peer_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    distribution::mark_conversation_read(&ctx, user.0, peer_id).await?;
    let messages =
        distribution::conversation_page(&ctx, user.0, peer_id, page.before, page.limit()).await?;
    Ok(Json(messages))
}

/// POST /api/direct-messages/:user_id
pub async fn send(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Path(peer_id): Path<Uuid>,
    Json(body): Json<NewDirectMessage>,
) -> Result<impl IntoResponse, AppError> {
    let view = distribution::send_direct_message(&ctx, user.0, peer_id, body).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

/// GET /api/direct-messages/conversations
pub async fn conversations(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, AppError> {
    let summaries = distribution::list_conversations(&ctx, user.0).await?;
    Ok(Json(summaries))
}

/// GET /api/messages/unread
pub async fn unread(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, AppError> {
    let counts = distribution::unread_counts(&ctx, user.0).await?;
    Ok(Json(counts))
}
