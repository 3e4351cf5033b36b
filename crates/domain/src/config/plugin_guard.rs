use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Plugin execution guard tuning
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PluginGuardConfig {
    #[serde(default = "d_max_concurrency")]
    pub max_concurrency_per_plugin: usize,
    #[serde(default = "d_queue_timeout_ms")]
    pub queue_timeout_ms: u64,
    #[serde(default = "d_execution_timeout_ms")]
    pub execution_timeout_ms: u64,
    #[serde(default = "d_failure_threshold")]
    pub failure_threshold: u32,
    #[serde(default = "d_failure_cooldown_ms")]
    pub failure_cooldown_ms: u64,
}

impl Default for PluginGuardConfig {
    fn default() -> Self {
        Self {
            max_concurrency_per_plugin: d_max_concurrency(),
            queue_timeout_ms: d_queue_timeout_ms(),
            execution_timeout_ms: d_execution_timeout_ms(),
            failure_threshold: d_failure_threshold(),
            failure_cooldown_ms: d_failure_cooldown_ms(),
        }
    }
}

fn d_max_concurrency() -> usize {
    4
}
fn d_queue_timeout_ms() -> u64 {
    5_000
}
fn d_execution_timeout_ms() -> u64 {
    30_000
}
fn d_failure_threshold() -> u32 {
    5
}
fn d_failure_cooldown_ms() -> u64 {
    60_000
}
