//! `POST /webhooks/<channelId>` — inbound webhook ingress. Delegates to
//! `rb_channels::handle_webhook`, passing the gateway's own dispatcher so a
//! matched message turns into a run without looping back over HTTP.

use std::collections::HashMap;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};

use rb_channels::{handle_webhook, PipelineOutcome};

use crate::state::AppState;

pub async fn webhook(
    State(state): State<AppState>,
    Path(channel_id): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some((plugin, config)) = state.core.channels.get(&channel_id) else {
        return (StatusCode::NOT_FOUND, format!("no channel registered for {channel_id}")).into_response();
    };

    let header_map: HashMap<String, String> =
        headers.iter().map(|(k, v)| (k.as_str().to_ascii_lowercase(), v.to_str().unwrap_or("").to_owned())).collect();

    let outcome = handle_webhook(
        plugin.as_ref(),
        &channel_id,
        &body,
        &header_map,
        &config,
        &state.core.config.channels.routing_rules,
        &state.core.sessions,
        state.dispatcher.as_ref(),
    )
    .await;

    match outcome {
        PipelineOutcome::Challenge(value) => value.into_response(),
        PipelineOutcome::Unauthorized => StatusCode::UNAUTHORIZED.into_response(),
        PipelineOutcome::NoRoute | PipelineOutcome::Ignored => StatusCode::OK.into_response(),
        PipelineOutcome::Accepted => {
            axum::Json(serde_json::json!({ "accepted": true })).into_response()
        }
    }
}
