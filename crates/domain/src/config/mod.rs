mod agent;
mod broker;
mod channels;
mod llm;
mod observability;
mod persistence;
mod plugin_guard;
mod server;
mod workspace;

pub use agent::*;
pub use broker::*;
pub use channels::*;
pub use llm::*;
pub use observability::*;
pub use persistence::*;
pub use plugin_guard::*;
pub use server::*;
pub use workspace::*;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub broker: BrokerConfig,
    #[serde(default)]
    pub channels: ChannelsConfig,
    #[serde(default)]
    pub plugin_guard: PluginGuardConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub observability: ObservabilityConfig,
    #[serde(default)]
    pub workspace: WorkspaceConfig,
    #[serde(default)]
    pub persistence: PersistenceConfig,
    /// Agent definitions keyed by agent id. In production these are served
    /// by the persistence RPC; config-file entries are for local dev/tests.
    #[serde(default)]
    pub agents: HashMap<String, AgentConfig>,
}

impl Config {
    pub fn validate(&self) -> Vec<ConfigError> {
        let mut errors = Vec::new();

        if self.server.port == 0 {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be greater than 0".into(),
            });
        }
        if self.server.host.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }
        if self.channels.runtime_secret.is_empty() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "channels.runtime_secret".into(),
                message: "RUNTIME_SECRET is unset; /channel-run and /runtime/plugins/sync accept any caller".into(),
            });
        }
        if self.llm.base_url.is_none() {
            errors.push(ConfigError {
                severity: ConfigSeverity::Warning,
                field: "llm.base_url".into(),
                message: "LLM_BASE_URL is unset; coordinator/executor runs will fail to reach a model".into(),
            });
        }
        for (id, agent) in &self.agents {
            if agent.agent_id != *id {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Error,
                    field: format!("agents.{id}.agent_id"),
                    message: format!("agent_id {:?} does not match map key {id:?}", agent.agent_id),
                });
            }
            if agent.limits.max_spawn_depth == 0 && !agent.leaf_deny.is_empty() {
                errors.push(ConfigError {
                    severity: ConfigSeverity::Warning,
                    field: format!("agents.{id}.leaf_deny"),
                    message: "leaf_deny is set but max_spawn_depth is 0; delegation is already fully denied".into(),
                });
            }
        }

        errors
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConfigSeverity {
    Error,
    Warning,
}

/// A single configuration validation issue.
#[derive(Debug, Clone)]
pub struct ConfigError {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Error => "error",
            ConfigSeverity::Warning => "warning",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}
