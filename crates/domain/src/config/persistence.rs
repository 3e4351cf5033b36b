use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Persistence RPC connection
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where the canonical runs/tasks/messages/usage/plugin-registry tables
/// live. `base_url` unset means no persistence service is reachable; the
/// gateway falls back to an in-memory `PersistenceRpc` seeded from
/// `Config.agents`, which is enough for local development and tests but
/// drops everything else (usage, task tracking, plugin registry) on the
/// floor.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct PersistenceConfig {
    #[serde(default = "d_base_url")]
    pub base_url: Option<String>,
}

fn d_base_url() -> Option<String> {
    std::env::var("PERSISTENCE_BASE_URL").ok()
}
