use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use crate::config::{DEFAULT_PAGE_SIZE, MAX_PAGE_SIZE};
use crate::context::AppContext;
use crate::distribution;
use crate::error::AppError;
use crate::frame::NewChannelMessage;
use crate::routes::extractors::AuthenticatedUser;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageQuery {
    pub before: Option<DateTime<Utc>>,
    pub limit: Option<i64>,
}

impl PageQuery {
    pub fn limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_PAGE_SIZE)
            .clamp(1, MAX_PAGE_SIZE)
    }
}

/// GET /api/channels
pub async fn list_channels(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
) -> Result<impl IntoResponse, AppError> {
    let channels = distribution::list_channels(&ctx, user.0).await?;
    Ok(Json(channels))
}

/// GET /api/channels/:id
pub async fn get_channel(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Path(channel_id): Path<Uuid>,
) -> Result<impl IntoResponse, AppError> {
    let channel = distribution::get_channel_for(&ctx, user.0, channel_id).await?;
    Ok(Json(channel))
}

/// GET /api/channels/:id/messages
pub async fn channel_messages(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Path(channel_id): Path<Uuid>,
    Query(page): Query<PageQuery>,
) -> Result<impl IntoResponse, AppError> {
    let messages =
        distribution::channel_history(&ctx, user.0, channel_id, page.before, page.limit()).await?;
    Ok(Json(messages))
}

/// GET /api/channels/:id/messages/:message_id/replies
pub async fn message_replies(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Path((channel_id, message_id)): Path<(Uuid, Uuid)>,
) -> Result<impl IntoResponse, AppError> {
    let replies = distribution::message_replies(&ctx, user.0, channel_id, message_id).await?;
    Ok(Json(replies))
}

/// POST /api/channels/:id/messages
pub async fn post_channel_message(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Path(channel_id): Path<Uuid>,
    Json(body): Json<NewChannelMessage>,
) -> Result<impl IntoResponse, AppError> {
    let view = distribution::send_channel_message(&ctx, user.0, channel_id, body).await?;
    Ok((StatusCode::CREATED, Json(view)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EditMessageBody {
    pub content: String,
}

/// PATCH /api/channels/:channel_id/messages/:message_id
pub async fn edit_message(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Path((channel_id, message_id)): Path<(Uuid, Uuid)>,
    Json(body): Json<EditMessageBody>,
) -> Result<impl IntoResponse, AppError> {
    let view =
        distribution::edit_channel_message(&ctx, user.0, channel_id, message_id, body.content)
            .await?;
    Ok(Json(view))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberBody {
    pub user_id: Uuid,
}

/// POST /api/channels/:id/members
pub async fn add_member(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Path(channel_id): Path<Uuid>,
    Json(body): Json<MemberBody>,
) -> Result<impl IntoResponse, AppError> {
    let membership =
        distribution::add_channel_member(&ctx, user.0, channel_id, body.user_id).await?;
    Ok((StatusCode::CREATED, Json(membership)))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RemoveMemberQuery {
    pub user_id: Option<Uuid>,
}

/// DELETE /api/channels/:id/members — removes `userId` or, without one,
/// the caller leaves the channel
pub async fn remove_member(
    State(ctx): State<Arc<AppContext>>,
    user: AuthenticatedUser,
    Path(channel_id): Path<Uuid>,
    Query(query): Query<RemoveMemberQuery>,
) -> Result<impl IntoResponse, AppError> {
    let target = query.user_id.unwrap_or(user.0);
    distribution::remove_channel_member(&ctx, user.0, channel_id, target).await?;
    Ok(StatusCode::NO_CONTENT)
}
