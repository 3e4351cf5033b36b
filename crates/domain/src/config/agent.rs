use std::collections::HashMap;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Agent configuration
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Declarative configuration for one agent, as returned by
/// `PersistenceRpc::get_agent_config`. The Coordinator/Executor Loop turns
/// this into a `PolicySandbox` at the start of every run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    pub agent_id: String,
    pub system_prompt: String,
    /// Model candidates tried in order (executor only; see LLM candidate
    /// fallback). The first entry is used by the coordinator.
    #[serde(default)]
    pub model_candidates: Vec<String>,
    #[serde(default)]
    pub tool_policy: ToolPolicyConfig,
    #[serde(default)]
    pub fs_policy: FsPolicyConfig,
    #[serde(default)]
    pub limits: AgentLimits,
    /// Tool names always denied once a sub-agent reaches `max_spawn_depth`.
    #[serde(default)]
    pub leaf_deny: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct ToolPolicyConfig {
    #[serde(default)]
    pub allow: Vec<String>,
    #[serde(default)]
    pub deny: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FsPolicyConfig {
    #[serde(default = "d_true")]
    pub workspace_only: bool,
    #[serde(default)]
    pub allowed_paths: Vec<String>,
}

impl Default for FsPolicyConfig {
    fn default() -> Self {
        Self {
            workspace_only: true,
            allowed_paths: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AgentLimits {
    #[serde(default = "d_max_turns")]
    pub max_turns: u32,
    #[serde(default = "d_max_spawn_depth")]
    pub max_spawn_depth: u32,
    #[serde(default = "d_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for AgentLimits {
    fn default() -> Self {
        Self {
            max_turns: d_max_turns(),
            max_spawn_depth: d_max_spawn_depth(),
            timeout_ms: d_timeout_ms(),
        }
    }
}

fn d_true() -> bool {
    true
}
fn d_max_turns() -> u32 {
    10
}
fn d_max_spawn_depth() -> u32 {
    3
}
fn d_timeout_ms() -> u64 {
    30_000
}

/// Agent definitions keyed by agent id, as loaded from config for local
/// development / tests (production deployments fetch these from the
/// persistence RPC instead).
pub type AgentConfigMap = HashMap<String, AgentConfig>;
