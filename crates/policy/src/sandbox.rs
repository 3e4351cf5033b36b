use rb_domain::config::AgentConfig;

use crate::fs_policy::FsPolicy;
use crate::tool_policy::ToolPolicy;

/// Immutable per-run snapshot of tool/fs/exec/turn/depth limits, derived
/// from agent configuration once at run start. Never mutated in place —
/// delegation produces a narrowed copy for the sub-agent.
#[derive(Debug, Clone)]
pub struct PolicySandbox {
    pub tool_policy: ToolPolicy,
    pub fs_policy: FsPolicy,
    pub exec_allow_list: Vec<String>,
    pub max_turns: u32,
    pub max_spawn_depth: u32,
    pub timeout_ms: u64,
    pub leaf_deny: Vec<String>,
}

impl PolicySandbox {
    pub fn from_agent_config(cfg: &AgentConfig) -> Self {
        Self {
            tool_policy: ToolPolicy::from(&cfg.tool_policy),
            fs_policy: FsPolicy::from(&cfg.fs_policy),
            exec_allow_list: Vec::new(),
            max_turns: cfg.limits.max_turns,
            max_spawn_depth: cfg.limits.max_spawn_depth,
            timeout_ms: cfg.limits.timeout_ms,
            leaf_deny: cfg.leaf_deny.clone(),
        }
    }

    /// Build the sandbox a sub-agent spawned at `depth` (the child's depth,
    /// i.e. parent depth + 1) receives.
    pub fn narrow_for_subagent(&self, depth: u32) -> PolicySandbox {
        PolicySandbox {
            tool_policy: self
                .tool_policy
                .narrow_for_subagent(depth, self.max_spawn_depth, &self.leaf_deny),
            fs_policy: self.fs_policy.clone(),
            exec_allow_list: self.exec_allow_list.clone(),
            max_turns: self.max_turns,
            max_spawn_depth: self.max_spawn_depth,
            timeout_ms: self.timeout_ms,
            leaf_deny: self.leaf_deny.clone(),
        }
    }

    pub fn can_delegate(&self, depth: u32) -> bool {
        depth < self.max_spawn_depth
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rb_domain::config::{AgentLimits, FsPolicyConfig, ToolPolicyConfig};

    fn cfg(max_spawn_depth: u32) -> AgentConfig {
        AgentConfig {
            agent_id: "a1".into(),
            system_prompt: "you are helpful".into(),
            model_candidates: vec!["gpt-4o".into()],
            tool_policy: ToolPolicyConfig::default(),
            fs_policy: FsPolicyConfig::default(),
            limits: AgentLimits { max_turns: 10, max_spawn_depth, timeout_ms: 30_000 },
            leaf_deny: vec!["web.search".into()],
        }
    }

    #[test]
    fn can_delegate_below_max_depth() {
        let sandbox = PolicySandbox::from_agent_config(&cfg(1));
        assert!(sandbox.can_delegate(0));
        assert!(!sandbox.can_delegate(1));
    }

    #[test]
    fn narrowed_sandbox_denies_delegate_to_agent_at_depth_cap() {
        let sandbox = PolicySandbox::from_agent_config(&cfg(2));
        let child = sandbox.narrow_for_subagent(2);
        assert!(!child.tool_policy.is_allowed("delegate_to_agent"));
    }

    #[test]
    fn narrowed_sandbox_keeps_delegate_to_agent_below_depth_cap() {
        let sandbox = PolicySandbox::from_agent_config(&cfg(2));
        let child = sandbox.narrow_for_subagent(1);
        assert!(child.tool_policy.is_allowed("delegate_to_agent"));
    }

    #[test]
    fn narrowed_sandbox_applies_leaf_deny_at_cap() {
        let sandbox = PolicySandbox::from_agent_config(&cfg(2));
        let child = sandbox.narrow_for_subagent(2);
        assert!(!child.tool_policy.is_allowed("web.search"));
    }
}
