pub mod auth;
pub mod channel_run;
pub mod channels;
pub mod health;
pub mod plugins;
pub mod runtime;
pub mod webhooks;

use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde_json::json;

use rb_domain::error::Error;

use crate::state::AppState;

/// `rb-domain` stays framework-agnostic, so the HTTP status mapping for
/// `Error` lives here rather than on the type itself — the teacher keeps
/// the same split (`sa-domain::error` has no web-framework awareness;
/// `sa-gateway::api::*` handlers own the status mapping).
pub struct ApiError(pub Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::Validation(_) | Error::Config(_) => StatusCode::BAD_REQUEST,
            Error::NotFound(_) => StatusCode::NOT_FOUND,
            Error::IdempotencyConflict(_) => StatusCode::CONFLICT,
            Error::Auth(_) => StatusCode::UNAUTHORIZED,
            Error::PluginGuard(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Upstream(_) => StatusCode::BAD_GATEWAY,
            Error::Io(_) | Error::Json(_) | Error::Other(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = Json(json!({ "error": self.0.to_string(), "code": self.0.code() }));
        (status, body).into_response()
    }
}

/// The full HTTP surface: health probe, channel-run ingress, the runtime
/// create/stream/cancel triad, plugin sync, and the channel pipeline's
/// webhook/send pair.
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health::health))
        .route("/channel-run", post(channel_run::channel_run))
        .route("/runtime/ws/:workspace_id/runs", post(runtime::create_run))
        .route("/runtime/runs/:run_id/stream", get(runtime::stream_run))
        .route("/runtime/runs/:run_id/cancel", post(runtime::cancel_run))
        .route("/runtime/plugins/sync", post(plugins::sync))
        .route("/webhooks/:channel_id", post(webhooks::webhook))
        .route("/channels/:channel_id/send", post(channels::send))
}
