use rb_domain::config::ToolPolicyConfig;

/// Runtime tool allow/deny policy. Glob grammar: a literal `*` matches any
/// name, `foo*` is a prefix match, `*foo` is a suffix match, anything else
/// must match exactly.
#[derive(Debug, Clone, Default)]
pub struct ToolPolicy {
    pub allow: Vec<String>,
    pub deny: Vec<String>,
}

impl From<&ToolPolicyConfig> for ToolPolicy {
    fn from(cfg: &ToolPolicyConfig) -> Self {
        Self {
            allow: cfg.allow.clone(),
            deny: cfg.deny.clone(),
        }
    }
}

fn glob_matches(pattern: &str, name: &str) -> bool {
    if pattern == "*" {
        return true;
    }
    if let Some(prefix) = pattern.strip_suffix('*') {
        return name.starts_with(prefix);
    }
    if let Some(suffix) = pattern.strip_prefix('*') {
        return name.ends_with(suffix);
    }
    pattern == name
}

impl ToolPolicy {
    /// Deny-wins: any deny match rejects outright; an empty allow list
    /// admits everything else; a non-empty allow list requires a match.
    pub fn is_allowed(&self, name: &str) -> bool {
        if self.deny.iter().any(|p| glob_matches(p, name)) {
            return false;
        }
        if self.allow.is_empty() {
            return true;
        }
        self.allow.iter().any(|p| glob_matches(p, name))
    }

    /// Build the sandbox a delegated sub-agent receives at `depth`
    /// (child depth, i.e. parent depth + 1). Once `depth` has reached the
    /// spawn cap the child can never delegate again, so `delegate_to_agent`
    /// is denied and the configured leaf-deny set additionally applies;
    /// below the cap the child keeps `delegate_to_agent` so nesting can
    /// continue. `allow` is never widened.
    pub fn narrow_for_subagent(&self, depth: u32, max_depth: u32, leaf_deny: &[String]) -> ToolPolicy {
        let mut deny = self.deny.clone();
        if depth >= max_depth {
            deny.push("delegate_to_agent".to_string());
            deny.extend(leaf_deny.iter().cloned());
        }
        ToolPolicy {
            allow: self.allow.clone(),
            deny,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(allow: &[&str], deny: &[&str]) -> ToolPolicy {
        ToolPolicy {
            allow: allow.iter().map(|s| s.to_string()).collect(),
            deny: deny.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn empty_allow_permits_everything_not_denied() {
        let p = policy(&[], &[]);
        assert!(p.is_allowed("fs.read"));
    }

    #[test]
    fn deny_wins_over_allow() {
        let p = policy(&["*"], &["exec"]);
        assert!(!p.is_allowed("exec"));
        assert!(p.is_allowed("fs.read"));
    }

    #[test]
    fn prefix_glob() {
        let p = policy(&["fs.*"], &[]);
        assert!(p.is_allowed("fs.read"));
        assert!(!p.is_allowed("web.search"));
    }

    #[test]
    fn suffix_glob() {
        let p = policy(&["*.write"], &[]);
        assert!(p.is_allowed("fs.write"));
        assert!(!p.is_allowed("fs.read"));
    }

    #[test]
    fn exact_match_when_no_wildcard() {
        let p = policy(&["knowledge_search"], &[]);
        assert!(p.is_allowed("knowledge_search"));
        assert!(!p.is_allowed("knowledge_search_v2"));
    }

    #[test]
    fn narrow_for_subagent_denies_delegation_only_at_depth_cap() {
        let p = policy(&[], &[]);
        let mid_nesting = p.narrow_for_subagent(0, 3, &[]);
        assert!(mid_nesting.is_allowed("delegate_to_agent"));

        let at_cap = p.narrow_for_subagent(3, 3, &[]);
        assert!(!at_cap.is_allowed("delegate_to_agent"));
    }

    #[test]
    fn narrow_for_subagent_applies_leaf_deny_at_max_depth() {
        let p = policy(&[], &[]);
        let leaf_deny = vec!["web.search".to_string()];
        let narrowed = p.narrow_for_subagent(2, 2, &leaf_deny);
        assert!(!narrowed.is_allowed("web.search"));

        let not_yet = p.narrow_for_subagent(1, 2, &leaf_deny);
        assert!(not_yet.is_allowed("web.search"));
    }

    #[test]
    fn narrow_for_subagent_never_widens_allow() {
        let p = policy(&["fs.*"], &[]);
        let narrowed = p.narrow_for_subagent(0, 3, &[]);
        assert_eq!(narrowed.allow, p.allow);
    }
}
