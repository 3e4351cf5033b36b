//! `POST /channels/<channelId>/send` — direct outbound send, used by
//! callers that already have a reply in hand and just need it delivered
//! through a channel plugin (as opposed to `/channel-run`, which also runs
//! the turn that produces the reply).

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json, Response};
use serde::Deserialize;

use rb_channels::ChannelError;
use rb_domain::error::Error;

use crate::api::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendBody {
    chat_id: String,
    text: String,
    thread_id: Option<String>,
}

pub async fn send(State(state): State<AppState>, Path(channel_id): Path<String>, Json(body): Json<SendBody>) -> Response {
    let Some((plugin, config)) = state.core.channels.get(&channel_id) else {
        return ApiError(Error::NotFound(format!("no channel registered for {channel_id}"))).into_response();
    };

    if !plugin.supports_send() {
        return ApiError(Error::Validation(format!("channel {channel_id} does not support sending"))).into_response();
    }

    match plugin.send_message(&body.chat_id, &body.text, &config, body.thread_id.as_deref()).await {
        Ok(()) => Json(serde_json::json!({ "ok": true })).into_response(),
        Err(ChannelError::Unimplemented) => ApiError(Error::Validation("channel does not implement SendMessage".into())).into_response(),
        Err(ChannelError::SendFailed(message)) => ApiError(Error::Upstream(message)).into_response(),
    }
}
