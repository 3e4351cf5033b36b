use std::path::PathBuf;

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Workspace
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Where this process keeps its local state: the channel-session store and
/// the root every agent's `fs_read`/`fs_write` and synced plugins are
/// sandboxed under.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkspaceConfig {
    #[serde(default = "d_root")]
    pub root: PathBuf,
}

impl Default for WorkspaceConfig {
    fn default() -> Self {
        Self { root: d_root() }
    }
}

fn d_root() -> PathBuf {
    std::env::var("RUNTIME_WORKSPACE_ROOT").map(PathBuf::from).unwrap_or_else(|_| PathBuf::from("./workspace"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_root_falls_back_to_workspace_dir() {
        std::env::remove_var("RUNTIME_WORKSPACE_ROOT");
        assert_eq!(WorkspaceConfig::default().root, PathBuf::from("./workspace"));
    }
}
