//! Webhook ingress → parse → route → session bind → fire-and-forget
//! dispatch, per §4.5. Reply delivery back out through the originating
//! plugin is the gateway's job (it owns the HTTP client and the shared
//! runtime secret); this module stops at handing off a `ChannelRunRequest`
//! to whatever `RunDispatcher` the gateway wires in.

use std::collections::HashMap;

use rb_domain::config::RoutingRule;
use rb_sessions::SessionStore;

use crate::plugin::{ChannelPlugin, PluginConfig};

#[derive(Debug, Clone)]
pub struct ChannelRunRequest {
    pub session_id: String,
    pub channel_id: String,
    pub agent_id: String,
    pub workspace_id: String,
    pub message: String,
    pub sender: String,
    pub chat_id: String,
    pub thread_id: Option<String>,
    pub message_id: Option<String>,
}

/// Fire-and-forget dispatch target. Errors are the dispatcher's own
/// problem to log — the pipeline never surfaces them to the webhook
/// response, which has already returned `{accepted: true}` by the time
/// dispatch happens.
#[async_trait::async_trait]
pub trait RunDispatcher: Send + Sync {
    async fn dispatch(&self, request: ChannelRunRequest);
}

#[derive(Debug, PartialEq, Eq)]
pub enum PipelineOutcome {
    /// Webhook subscription handshake — reply with this value verbatim.
    Challenge(String),
    /// Signature/token verification failed.
    Unauthorized,
    /// Parsed successfully but no routing rule matched the channel.
    NoRoute,
    /// Payload carried no actionable message.
    Ignored,
    /// Dispatched; the HTTP layer should answer `{accepted: true}`.
    Accepted,
}

/// Evaluate routing rules in priority order; the first rule whose
/// `channel_id` matches wins.
fn route<'a>(channel_id: &str, rules: &'a [RoutingRule]) -> Option<&'a RoutingRule> {
    let mut ordered: Vec<&RoutingRule> = rules.iter().collect();
    ordered.sort_by_key(|r| r.priority);
    ordered.into_iter().find(|r| r.channel_id == channel_id)
}

pub async fn handle_webhook(
    plugin: &dyn ChannelPlugin,
    channel_id: &str,
    body: &[u8],
    headers: &HashMap<String, String>,
    config: &PluginConfig,
    routing_rules: &[RoutingRule],
    sessions: &SessionStore,
    dispatcher: &dyn RunDispatcher,
) -> PipelineOutcome {
    if let Some(challenge) = plugin.handle_challenge(body, config) {
        return PipelineOutcome::Challenge(challenge);
    }

    if !plugin.verify_webhook(body, headers, config) {
        return PipelineOutcome::Unauthorized;
    }

    let Some(parsed) = plugin.parse_message(body) else {
        return PipelineOutcome::Ignored;
    };

    let Some(rule) = route(channel_id, routing_rules) else {
        tracing::info!(channel_id, "no routing rule matched inbound message");
        return PipelineOutcome::NoRoute;
    };

    let (session, _is_new) =
        sessions.resolve_or_touch(channel_id, &parsed.sender, &parsed.chat_id, &rule.agent_id, &rule.workspace_id);

    dispatcher
        .dispatch(ChannelRunRequest {
            session_id: session.id,
            channel_id: channel_id.to_owned(),
            agent_id: session.agent_id,
            workspace_id: session.workspace_id,
            message: parsed.content,
            sender: parsed.sender,
            chat_id: parsed.chat_id,
            thread_id: parsed.thread_id,
            message_id: parsed.message_id,
        })
        .await;

    PipelineOutcome::Accepted
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::webchat::WebchatPlugin;
    use hmac::{Hmac, Mac};
    use parking_lot::Mutex;
    use sha2::Sha256;

    struct RecordingDispatcher {
        requests: Mutex<Vec<ChannelRunRequest>>,
    }

    #[async_trait::async_trait]
    impl RunDispatcher for RecordingDispatcher {
        async fn dispatch(&self, request: ChannelRunRequest) {
            self.requests.lock().push(request);
        }
    }

    fn signed(secret: &str, body: &[u8]) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
        mac.update(body);
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn rules() -> Vec<RoutingRule> {
        vec![RoutingRule { priority: 1, channel_id: "webchat".into(), agent_id: "agent-a".into(), workspace_id: "ws1".into() }]
    }

    #[tokio::test]
    async fn full_pipeline_dispatches_on_match() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionStore::new(dir.path()).unwrap();
        let dispatcher = RecordingDispatcher { requests: Mutex::new(vec![]) };
        let plugin = WebchatPlugin::new();
        let config = serde_json::json!({"webhook_secret": "s3cr3t"});
        let body = br#"{"sender":"u1","chat_id":"c1","text":"ping"}"#;
        let mut headers = HashMap::new();
        headers.insert("x-hub-signature-256".into(), signed("s3cr3t", body));

        let outcome =
            handle_webhook(&plugin, "webchat", body, &headers, &config, &rules(), &sessions, &dispatcher).await;

        assert_eq!(outcome, PipelineOutcome::Accepted);
        let requests = dispatcher.requests.lock();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].agent_id, "agent-a");
    }

    #[tokio::test]
    async fn unauthorized_when_signature_missing() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionStore::new(dir.path()).unwrap();
        let dispatcher = RecordingDispatcher { requests: Mutex::new(vec![]) };
        let plugin = WebchatPlugin::new();
        let config = serde_json::json!({"webhook_secret": "s3cr3t"});
        let body = br#"{"sender":"u1","chat_id":"c1","text":"ping"}"#;

        let outcome =
            handle_webhook(&plugin, "webchat", body, &HashMap::new(), &config, &rules(), &sessions, &dispatcher)
                .await;

        assert_eq!(outcome, PipelineOutcome::Unauthorized);
        assert!(dispatcher.requests.lock().is_empty());
    }

    #[tokio::test]
    async fn no_route_when_channel_unmatched() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionStore::new(dir.path()).unwrap();
        let dispatcher = RecordingDispatcher { requests: Mutex::new(vec![]) };
        let plugin = WebchatPlugin::new();
        let config = serde_json::json!({"webhook_secret": "s3cr3t"});
        let body = br#"{"sender":"u1","chat_id":"c1","text":"ping"}"#;
        let mut headers = HashMap::new();
        headers.insert("x-hub-signature-256".into(), signed("s3cr3t", body));

        let outcome =
            handle_webhook(&plugin, "discord", body, &headers, &config, &rules(), &sessions, &dispatcher).await;

        assert_eq!(outcome, PipelineOutcome::NoRoute);
    }

    #[tokio::test]
    async fn ignored_when_message_has_no_content() {
        let dir = tempfile::tempdir().unwrap();
        let sessions = SessionStore::new(dir.path()).unwrap();
        let dispatcher = RecordingDispatcher { requests: Mutex::new(vec![]) };
        let plugin = WebchatPlugin::new();
        let config = serde_json::json!({"webhook_secret": "s3cr3t"});
        let body = br#"{"sender":"u1","chat_id":"c1","text":"  "}"#;
        let mut headers = HashMap::new();
        headers.insert("x-hub-signature-256".into(), signed("s3cr3t", body));

        let outcome =
            handle_webhook(&plugin, "webchat", body, &headers, &config, &rules(), &sessions, &dispatcher).await;

        assert_eq!(outcome, PipelineOutcome::Ignored);
    }
}
