//! `PluginToolHost`: the collaborator interface that actually executes a
//! workspace plugin's tool (a sandboxed JS function living outside this
//! process). The registry and guard only know the tool's name/schema; this
//! trait is the one door to invoking it.

use serde_json::Value;

#[derive(Debug, Clone)]
pub struct PluginToolCall {
    pub plugin_id: String,
    pub tool_name: String,
    pub arguments: Value,
}

#[derive(thiserror::Error, Debug)]
#[error("plugin tool host: {0}")]
pub struct PluginHostError(pub String);

#[async_trait::async_trait]
pub trait PluginToolHost: Send + Sync {
    async fn invoke(&self, call: PluginToolCall) -> Result<Value, PluginHostError>;
}
