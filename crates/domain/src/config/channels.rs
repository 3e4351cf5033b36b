use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Channel pipeline
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelsConfig {
    /// Shared secret the gateway and runtime authenticate `/channel-run`
    /// and `/runtime/plugins/sync` with (`X-Runtime-Secret`).
    #[serde(default = "d_runtime_secret")]
    pub runtime_secret: String,
    /// Timeout for delivering a reply through a channel plugin.
    #[serde(default = "d_send_timeout_ms")]
    pub channel_send_timeout_ms: u64,
    /// Ordered routing rules evaluated on every parsed inbound message.
    #[serde(default)]
    pub routing_rules: Vec<RoutingRule>,
    /// Per-channel plugin config (e.g. a webhook secret), keyed by
    /// `channel_id`. Handed to `ChannelPlugin::verify_webhook`/`parse_message`
    /// as-is; shape is plugin-defined.
    #[serde(default)]
    pub channel_plugins: HashMap<String, Value>,
}

impl Default for ChannelsConfig {
    fn default() -> Self {
        Self {
            runtime_secret: d_runtime_secret(),
            channel_send_timeout_ms: d_send_timeout_ms(),
            routing_rules: Vec::new(),
            channel_plugins: HashMap::new(),
        }
    }
}

/// A single routing rule: the first rule (in priority order) whose
/// `channel_id` matches an inbound message's channel wins and supplies the
/// `agent_id` and `workspace_id` the session binds to.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoutingRule {
    pub priority: i32,
    pub channel_id: String,
    pub agent_id: String,
    pub workspace_id: String,
}

fn d_runtime_secret() -> String {
    std::env::var("RUNTIME_SECRET").unwrap_or_default()
}
fn d_send_timeout_ms() -> u64 {
    std::env::var("CHANNEL_SEND_TIMEOUT_MS")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(15_000)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_send_timeout_is_15s() {
        std::env::remove_var("CHANNEL_SEND_TIMEOUT_MS");
        assert_eq!(ChannelsConfig::default().channel_send_timeout_ms, 15_000);
    }

    #[test]
    fn routing_rules_sort_by_priority() {
        let mut rules = vec![
            RoutingRule { priority: 10, channel_id: "b".into(), agent_id: "a2".into(), workspace_id: "w".into() },
            RoutingRule { priority: 1, channel_id: "a".into(), agent_id: "a1".into(), workspace_id: "w".into() },
        ];
        rules.sort_by_key(|r| r.priority);
        assert_eq!(rules[0].channel_id, "a");
    }
}
