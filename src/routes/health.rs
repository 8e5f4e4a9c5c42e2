use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;
use serde_json::json;
use std::sync::Arc;

use crate::context::AppContext;
use crate::metrics;

/// GET /api/health — current AvailabilityState, probing if the debounce
/// window has elapsed
pub async fn health(State(ctx): State<Arc<AppContext>>) -> impl IntoResponse {
    let connected = ctx.availability.check_availability().await;
    let snapshot = ctx.availability.snapshot().await;

    let status = if connected {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    let body = json!({
        "status": if connected { "ok" } else { "degraded" },
        "database": {
            "connected": snapshot.is_available,
            "lastCheckedAt": snapshot.last_checked_at,
        },
        "onlineConnections": ctx.registry.online_count().await,
    });

    (status, Json(body))
}

/// GET /metrics — prometheus text exposition
pub async fn metrics_endpoint() -> impl IntoResponse {
    match metrics::gather_metrics() {
        Ok(body) => (
            StatusCode::OK,
            [("Content-Type", "text/plain; version=0.0.4")],
            body,
        )
            .into_response(),
        Err(e) => {
            tracing::error!("Failed to gather metrics: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
