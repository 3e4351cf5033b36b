//! `ChannelPlugin`: the capability interface a chat-channel connector
//! (Slack, Discord, Telegram, Feishu, webchat, …) implements. Not every
//! plugin can send — `supports_send` gates the outbound path so the
//! pipeline can fail with `Unimplemented` instead of calling a method that
//! doesn't exist for that channel.

use std::collections::HashMap;

use serde_json::Value;

/// Per-channel plugin configuration (webhook secret, bot token, …), opaque
/// to the pipeline — only the plugin knows its own schema.
pub type PluginConfig = Value;

#[derive(Debug, Clone)]
pub struct ParsedMessage {
    pub content: String,
    pub sender: String,
    pub chat_id: String,
    pub thread_id: Option<String>,
    pub message_id: Option<String>,
}

#[derive(thiserror::Error, Debug)]
pub enum ChannelError {
    #[error("plugin does not implement SendMessage")]
    Unimplemented,
    #[error("send failed: {0}")]
    SendFailed(String),
}

/// A chat-channel connector. Headers are passed as a case-insensitive-keyed
/// map (the gateway lowercases header names before calling in) so plugins
/// never depend on the HTTP framework's header type directly.
#[async_trait::async_trait]
pub trait ChannelPlugin: Send + Sync {
    fn channel_kind(&self) -> &'static str;

    /// Verify the webhook's authenticity (signature, token, etc).
    fn verify_webhook(&self, body: &[u8], headers: &HashMap<String, String>, config: &PluginConfig) -> bool;

    /// Some platforms (Slack, Feishu) require echoing a challenge value
    /// back during webhook subscription setup. `None` means "not a
    /// challenge request, continue the normal pipeline."
    fn handle_challenge(&self, _body: &[u8], _config: &PluginConfig) -> Option<String> {
        None
    }

    /// Parse an inbound webhook body into a normalized message. `None`
    /// means the payload carried no actionable message (e.g. a delivery
    /// receipt) and the pipeline should stop without dispatching a run.
    fn parse_message(&self, body: &[u8]) -> Option<ParsedMessage>;

    async fn test_connection(&self, config: &PluginConfig) -> bool;

    fn supports_send(&self) -> bool {
        false
    }

    async fn send_message(
        &self,
        _chat_id: &str,
        _text: &str,
        _config: &PluginConfig,
        _thread_id: Option<&str>,
    ) -> Result<(), ChannelError> {
        Err(ChannelError::Unimplemented)
    }
}
