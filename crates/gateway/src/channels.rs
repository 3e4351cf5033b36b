//! Channel registry: which `ChannelPlugin` backs each configured channel id,
//! and the plugin config (e.g. webhook secret) it was handed at bootstrap.

use std::collections::HashMap;
use std::sync::Arc;

use rb_channels::{ChannelPlugin, PluginConfig, WebchatPlugin};
use rb_domain::config::ChannelsConfig;

pub struct ChannelRegistry {
    channels: HashMap<String, (Arc<dyn ChannelPlugin>, PluginConfig)>,
}

impl ChannelRegistry {
    /// Registers a `webchat` channel for every channel id that appears in
    /// `routing_rules` with a `kind` of `webchat` (the only plugin this
    /// deployment ships). Additional kinds (`slack`, `discord`, ...) plug in
    /// the same way once their crates exist; none are wired today.
    pub fn from_config(config: &ChannelsConfig) -> Self {
        let mut channels: HashMap<String, (Arc<dyn ChannelPlugin>, PluginConfig)> = HashMap::new();
        for rule in &config.routing_rules {
            if channels.contains_key(&rule.channel_id) {
                continue;
            }
            let plugin_config = config.channel_plugins.get(&rule.channel_id).cloned().unwrap_or_else(|| serde_json::json!({}));
            channels.insert(rule.channel_id.clone(), (Arc::new(WebchatPlugin::new()) as Arc<dyn ChannelPlugin>, plugin_config));
        }
        Self { channels }
    }

    pub fn get(&self, channel_id: &str) -> Option<(Arc<dyn ChannelPlugin>, PluginConfig)> {
        self.channels.get(channel_id).cloned()
    }

    pub fn len(&self) -> usize {
        self.channels.len()
    }
}
