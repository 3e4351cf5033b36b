use std::path::{Component, Path};

use rb_domain::config::FsPolicyConfig;

/// Filesystem sandbox for tool calls. Paths are normalized (no actual
/// filesystem access — purely lexical) before any prefix check, and any
/// path containing a `..` segment is rejected outright regardless of where
/// it would lexically resolve.
#[derive(Debug, Clone)]
pub struct FsPolicy {
    pub workspace_only: bool,
    pub allowed_paths: Vec<String>,
}

impl From<&FsPolicyConfig> for FsPolicy {
    fn from(cfg: &FsPolicyConfig) -> Self {
        Self {
            workspace_only: cfg.workspace_only,
            allowed_paths: cfg.allowed_paths.clone(),
        }
    }
}

impl FsPolicy {
    pub fn is_path_allowed(&self, raw: &str) -> bool {
        let path = Path::new(raw);
        if path.components().any(|c| c == Component::ParentDir) {
            return false;
        }
        let normalized = normalize(path);

        if !self.allowed_paths.is_empty() {
            return self
                .allowed_paths
                .iter()
                .any(|prefix| normalized.starts_with(Path::new(prefix)));
        }

        if self.workspace_only {
            return normalized.is_absolute();
        }

        true
    }
}

fn normalize(path: &Path) -> std::path::PathBuf {
    let mut out = std::path::PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_any_parent_dir_segment() {
        let p = FsPolicy { workspace_only: true, allowed_paths: vec![] };
        assert!(!p.is_path_allowed("/workspace/../etc/passwd"));
        assert!(!p.is_path_allowed("a/../../b"));
    }

    #[test]
    fn workspace_only_requires_absolute_path() {
        let p = FsPolicy { workspace_only: true, allowed_paths: vec![] };
        assert!(p.is_path_allowed("/workspace/file.txt"));
        assert!(!p.is_path_allowed("relative/file.txt"));
    }

    #[test]
    fn allowed_paths_require_prefix_match() {
        let p = FsPolicy {
            workspace_only: false,
            allowed_paths: vec!["/workspace".into()],
        };
        assert!(p.is_path_allowed("/workspace/sub/file.txt"));
        assert!(!p.is_path_allowed("/etc/passwd"));
    }

    #[test]
    fn non_workspace_only_with_no_allowed_paths_permits_relative() {
        let p = FsPolicy { workspace_only: false, allowed_paths: vec![] };
        assert!(p.is_path_allowed("relative/file.txt"));
    }
}
