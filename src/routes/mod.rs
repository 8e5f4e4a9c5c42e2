pub mod channels;
pub mod direct_messages;
pub mod extractors;
pub mod health;

use axum::{
    routing::{get, patch},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::context::AppContext;

/// The messaging HTTP surface. Every handler is a thin adapter over the
/// shared operations in `distribution`.
pub fn create_router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .route("/api/health", get(health::health))
        .route("/metrics", get(health::metrics_endpoint))
        .route("/api/channels", get(channels::list_channels))
        .route("/api/channels/:id", get(channels::get_channel))
        .route(
            "/api/channels/:id/messages",
            get(channels::channel_messages).post(channels::post_channel_message),
        )
        .route(
            "/api/channels/:id/messages/:message_id",
            patch(channels::edit_message),
        )
        .route(
            "/api/channels/:id/messages/:message_id/replies",
            get(channels::message_replies),
        )
        .route(
            "/api/channels/:id/members",
            axum::routing::post(channels::add_member).delete(channels::remove_member),
        )
        .route(
            "/api/direct-messages/conversations",
            get(direct_messages::conversations),
        )
        .route(
            "/api/direct-messages/:user_id",
            get(direct_messages::conversation).post(direct_messages::send),
        )
        .route("/api/messages/unread", get(direct_messages::unread))
        .layer(TraceLayer::new_for_http())
        .with_state(ctx)
}
