//! `POST /channel-run` — the runtime-facing counterpart to the webhook
//! pipeline: some other process (typically the gateway's own webhook
//! ingress, but any authenticated caller) hands us a parsed inbound message
//! and we run a turn in the background.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use rb_channels::ChannelRunRequest;
use rb_domain::error::Error;

use crate::api::auth::check_runtime_secret;
use crate::api::ApiError;
use crate::dispatcher::run_channel_turn;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelRunBody {
    session_id: String,
    channel_id: String,
    agent_id: String,
    workspace_id: String,
    message: String,
    chat_id: String,
    thread_id: Option<String>,
    message_id: Option<String>,
    sender: Option<String>,
}

pub async fn channel_run(State(state): State<AppState>, headers: HeaderMap, Json(body): Json<ChannelRunBody>) -> Response {
    if let Err(e) = check_runtime_secret(&headers, &state.core.config.channels.runtime_secret) {
        return ApiError(e).into_response();
    }

    if body.session_id.is_empty()
        || body.channel_id.is_empty()
        || body.agent_id.is_empty()
        || body.workspace_id.is_empty()
        || body.message.is_empty()
        || body.chat_id.is_empty()
    {
        return ApiError(Error::Validation(
            "sessionId, channelId, agentId, workspaceId, message, and chatId are required".into(),
        ))
        .into_response();
    }

    let request = ChannelRunRequest {
        session_id: body.session_id,
        channel_id: body.channel_id,
        agent_id: body.agent_id,
        workspace_id: body.workspace_id,
        message: body.message,
        sender: body.sender.unwrap_or_default(),
        chat_id: body.chat_id,
        thread_id: body.thread_id,
        message_id: body.message_id,
    };

    tokio::spawn(run_channel_turn(state.core.clone(), request));

    (StatusCode::ACCEPTED, Json(serde_json::json!({ "accepted": true }))).into_response()
}
