//! The `/runtime/*` surface: create a run, stream its events over SSE,
//! cancel it. This is the direct, synchronous counterpart to `/channel-run`
//! — the caller gets a `runId` back immediately and drives the rest
//! itself instead of waiting for a reply to be delivered somewhere else.

use std::convert::Infallible;
use std::time::Duration;

use async_stream::stream;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Json, Response};
use futures_util::Stream;
use serde::Deserialize;
use uuid::Uuid;

use rb_broker::{run_coordinator, RunParams};
use rb_domain::error::Error;
use rb_rpc::persistence::CreateRunParams;

use crate::api::ApiError;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRunBody {
    session_id: String,
    user_request: String,
    coordinator_agent_id: String,
    idempotency_key: Option<String>,
    start_candidate_offset: Option<usize>,
    resume_from_message_id: Option<String>,
    resume_from_run_id: Option<String>,
}

pub async fn create_run(
    State(state): State<AppState>,
    Path(workspace_id): Path<String>,
    headers: HeaderMap,
    Json(body): Json<CreateRunBody>,
) -> Response {
    if body.session_id.is_empty() || body.user_request.is_empty() || body.coordinator_agent_id.is_empty() {
        return ApiError(Error::Validation("sessionId, userRequest, and coordinatorAgentId are required".into())).into_response();
    }

    let idempotency_key =
        body.idempotency_key.clone().or_else(|| headers.get("idempotency-key").and_then(|v| v.to_str().ok()).map(String::from));

    let resume_messages = if let Some(message_id) = &body.resume_from_message_id {
        match state.core.rpc.get_continue_context_by_message(message_id).await {
            Ok(ctx) => Some(ctx.messages),
            Err(e) => return ApiError(Error::NotFound(e.message)).into_response(),
        }
    } else if let Some(run_id) = &body.resume_from_run_id {
        match state.core.rpc.get_continue_context_by_run(run_id).await {
            Ok(ctx) => Some(ctx.messages),
            Err(e) => return ApiError(Error::NotFound(e.message)).into_response(),
        }
    } else {
        None
    };

    let params = RunParams {
        session_id: body.session_id.clone(),
        workspace_id: workspace_id.clone(),
        user_request: body.user_request.clone(),
        coordinator_agent_id: body.coordinator_agent_id.clone(),
        start_candidate_offset: body.start_candidate_offset,
        resume_messages,
    };

    let fingerprint = format!("{}:{}:{}", body.session_id, body.coordinator_agent_id, body.user_request);
    let rpc = state.core.rpc.clone();
    let create_params =
        CreateRunParams { workspace_id: workspace_id.clone(), agent_id: body.coordinator_agent_id.clone(), input: body.user_request };

    let created = state
        .core
        .broker
        .create_runtime_run(params, idempotency_key, fingerprint, move |_run_id| async move {
            rpc.create_run(create_params).await.map(|_| ()).map_err(|e| Error::Upstream(e.message))
        })
        .await;

    let (run_id, deduplicated) = match created {
        Ok(v) => v,
        Err(e) => return ApiError(e).into_response(),
    };

    if !deduplicated {
        let agent_runtime = state.core.build_runtime(&workspace_id);
        if let Err(e) = state
            .core
            .broker
            .start_run(run_id, move |params, emitter| async move { run_coordinator(agent_runtime, params, emitter).await })
        {
            return ApiError(e).into_response();
        }
    }

    Json(serde_json::json!({ "runId": run_id, "deduplicated": deduplicated })).into_response()
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    #[serde(default)]
    cursor: u64,
}

pub async fn stream_run(
    State(state): State<AppState>,
    Path(run_id): Path<Uuid>,
    Query(query): Query<StreamQuery>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let sub = state.core.broker.subscribe(run_id, query.cursor).ok_or_else(|| ApiError(Error::NotFound(format!("run {run_id}"))))?;
    let (replayed, mut rx, handle, lagged) = (sub.replayed, sub.receiver, sub.handle, sub.lagged);

    let broker = state.core.broker.clone();
    let events = stream! {
        if lagged {
            yield Ok(to_lagged_event());
        }
        for envelope in replayed {
            let terminal = envelope.is_terminal();
            yield Ok(to_sse_event(&envelope));
            if terminal {
                broker.unsubscribe(handle);
                return;
            }
        }
        while let Some(envelope) = rx.recv().await {
            let terminal = envelope.is_terminal();
            yield Ok(to_sse_event(&envelope));
            if terminal {
                break;
            }
        }
        broker.unsubscribe(handle);
    };

    Ok(Sse::new(events).keep_alive(KeepAlive::new().interval(Duration::from_secs(15))))
}

/// A synthetic event ahead of the replay when `cursor` pointed past events
/// the ring had already evicted — the caller's `lastEventId` skipped
/// straight into a gap it can never be shown.
fn to_lagged_event() -> Event {
    Event::default().event("lagged").data(serde_json::json!({ "lagged": true }).to_string())
}

fn to_sse_event(envelope: &rb_domain::envelope::Envelope) -> Event {
    let data = serde_json::to_string(envelope).unwrap_or_default();
    Event::default().id(envelope.seq.to_string()).data(data)
}

pub async fn cancel_run(State(state): State<AppState>, Path(run_id): Path<Uuid>) -> Response {
    if state.core.broker.get_snapshot(run_id).is_none() {
        return ApiError(Error::NotFound(format!("run {run_id}"))).into_response();
    }
    state.core.broker.cancel(run_id, Some("Run cancelled by user".into()));
    (StatusCode::OK, Json(serde_json::json!({ "ok": true }))).into_response()
}
