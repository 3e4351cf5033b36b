//! Drives a channel-originated turn end to end: start a run on the broker,
//! collect the reply text as it streams, then hand it back to the
//! originating channel plugin. Shared by the in-process webhook pipeline
//! (`GatewayDispatcher`) and the `/channel-run` HTTP handler — both describe
//! the same operation, one invoked directly and one over the wire.

use std::sync::Arc;
use std::time::Duration;

use rb_broker::{run_coordinator, RunParams};
use rb_channels::{ChannelRunRequest, RunDispatcher};
use rb_domain::envelope::Envelope;
use rb_rpc::persistence::CreateRunParams;

use crate::state::GatewayCore;

pub struct GatewayDispatcher {
    core: Arc<GatewayCore>,
}

impl GatewayDispatcher {
    pub fn new(core: Arc<GatewayCore>) -> Self {
        Self { core }
    }
}

#[async_trait::async_trait]
impl RunDispatcher for GatewayDispatcher {
    async fn dispatch(&self, request: ChannelRunRequest) {
        run_channel_turn(self.core.clone(), request).await;
    }
}

/// Starts a run for `request`, waits for it to go terminal, and delivers
/// whatever text accumulated to the originating channel — errors at any
/// point are logged and swallowed, never surfaced back to the platform.
pub async fn run_channel_turn(core: Arc<GatewayCore>, request: ChannelRunRequest) {
    let agent_runtime = core.build_runtime(&request.workspace_id);

    let params = RunParams {
        session_id: request.session_id.clone(),
        workspace_id: request.workspace_id.clone(),
        user_request: request.message.clone(),
        coordinator_agent_id: request.agent_id.clone(),
        start_candidate_offset: None,
        resume_messages: None,
    };

    let fingerprint = format!("{}:{}:{}", request.channel_id, request.chat_id, request.message);
    let rpc = core.rpc.clone();
    let create_params =
        CreateRunParams { workspace_id: request.workspace_id.clone(), agent_id: request.agent_id.clone(), input: request.message.clone() };

    let created = core
        .broker
        .create_runtime_run(params, request.message_id.clone(), fingerprint, move |_run_id| async move {
            rpc.create_run(create_params).await.map(|_persistence_run_id| ()).map_err(|e| rb_domain::error::Error::Upstream(e.to_string()))
        })
        .await;

    let (run_id, deduplicated) = match created {
        Ok(v) => v,
        Err(e) => {
            tracing::warn!(error = %e, channel_id = %request.channel_id, "channel-run: failed to create run");
            return;
        }
    };
    if deduplicated {
        tracing::debug!(run_id = %run_id, "channel-run: idempotency key already served, not starting a second worker");
        return;
    }

    // Subscribe before starting the worker so a run that completes on its
    // very first poll can never race ahead of our attachment.
    let Some(sub) = core.broker.subscribe(run_id, 0) else {
        tracing::warn!(%run_id, "channel-run: run vanished before subscribe");
        return;
    };
    let (snapshot, replayed, mut rx, handle) = (sub.snapshot, sub.replayed, sub.receiver, sub.handle);

    if let Err(e) = core.broker.start_run(run_id, move |params, emitter| async move { run_coordinator(agent_runtime, params, emitter).await })
    {
        tracing::warn!(error = %e, %run_id, "channel-run: failed to start run");
        core.broker.unsubscribe(handle);
        return;
    }

    let mut reply = String::new();
    let mut terminal = snapshot.terminal;
    for event in &replayed {
        accumulate_reply(&mut reply, event);
        terminal = terminal || event.is_terminal();
    }
    while !terminal {
        match rx.recv().await {
            Some(event) => {
                terminal = event.is_terminal();
                accumulate_reply(&mut reply, &event);
            }
            None => break,
        }
    }
    core.broker.unsubscribe(handle);

    deliver_reply(&core, &request, reply).await;
}

fn accumulate_reply(reply: &mut String, event: &Envelope) {
    if let rb_domain::envelope::EventPayload::TextDelta { delta, .. } = &event.payload {
        reply.push_str(delta);
    }
}

async fn deliver_reply(core: &GatewayCore, request: &ChannelRunRequest, reply: String) {
    if reply.is_empty() {
        return;
    }
    let Some((plugin, config)) = core.channels.get(&request.channel_id) else {
        tracing::warn!(channel_id = %request.channel_id, "channel-run: no channel registered to deliver the reply");
        return;
    };
    if !plugin.supports_send() {
        tracing::debug!(channel_id = %request.channel_id, "channel-run: channel plugin does not support outbound sends");
        return;
    }

    let send_timeout = Duration::from_millis(core.config.channels.channel_send_timeout_ms);
    let outcome =
        tokio::time::timeout(send_timeout, plugin.send_message(&request.chat_id, &reply, &config, request.thread_id.as_deref())).await;

    match outcome {
        Ok(Ok(())) => {}
        Ok(Err(e)) => tracing::warn!(error = %e, channel_id = %request.channel_id, "channel-run: reply delivery failed"),
        Err(_elapsed) => tracing::warn!(channel_id = %request.channel_id, "channel-run: reply delivery timed out"),
    }
}
