//! Delegated sub-agent bookkeeping. Distinct from `rb_rpc::persistence`'s
//! `CreateTaskParams`/`TaskStatus` — those are the wire shapes for the
//! Persistence RPC; `DelegateArgs` is just the `delegate_to_agent` tool's
//! own argument schema.

use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct DelegateArgs {
    #[serde(rename = "agentId")]
    pub agent_id: String,
    pub instruction: String,
}
