//! `GET /health` — liveness plus a lightweight readiness signal. The
//! sweeper task doesn't expose a public alive-check, so readiness here
//! just reflects that the shared state constructed successfully; it's
//! informational only and doesn't gate anything.

use axum::extract::State;
use axum::response::{IntoResponse, Json};

use crate::state::AppState;

pub async fn health(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "ready": true,
        "channels": state.core.channels.len(),
    }))
}
