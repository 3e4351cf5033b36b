//! Plugin manifest (`openclaw.plugin.json`) validation. Every workspace tool
//! plugin synced via `/runtime/plugins/sync` carries one of these; the
//! gateway parses and validates it before handing the plugin's tool
//! definitions to the registry.

use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PluginManifest {
    pub id: String,
    pub kind: String,
    pub name: String,
    pub version: String,
    #[serde(rename = "configSchema")]
    pub config_schema: Value,
    pub runtime: RuntimeSection,
    #[serde(default)]
    pub permissions: Option<Permissions>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeSection {
    pub tool: ToolRuntime,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolRuntime {
    pub entry: String,
    #[serde(rename = "exportName")]
    pub export_name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Permissions {
    #[serde(default)]
    pub network: bool,
    #[serde(default, rename = "fsRead")]
    pub fs_read: Vec<String>,
    #[serde(default, rename = "fsWrite")]
    pub fs_write: Vec<String>,
    #[serde(default)]
    pub exec: Vec<String>,
}

#[derive(thiserror::Error, Debug, PartialEq, Eq)]
pub enum ManifestError {
    #[error("invalid manifest kind '{0}': only 'tool' is supported")]
    UnsupportedKind(String),
    #[error("manifest field '{0}' must not be empty")]
    EmptyField(&'static str),
    #[error("entry '{0}' is not a safe relative path ending in .js/.mjs/.cjs")]
    UnsafeEntry(String),
    #[error("entry '{0}' does not resolve to an existing file under the plugin root")]
    MissingEntry(String),
    #[error("exportName '{0}' must be 'default' or a valid identifier")]
    InvalidExportName(String),
}

impl PluginManifest {
    pub fn parse(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    /// Validates manifest field shape and the entry path against `plugin_root`.
    /// Resolution of `entry` to an existing file is required both at install
    /// and at every later load, so callers invoke this on each sync.
    pub fn validate(&self, plugin_root: &Path) -> Result<(), ManifestError> {
        if self.kind != "tool" {
            return Err(ManifestError::UnsupportedKind(self.kind.clone()));
        }
        if self.id.is_empty() {
            return Err(ManifestError::EmptyField("id"));
        }
        if self.name.is_empty() {
            return Err(ManifestError::EmptyField("name"));
        }
        if self.version.is_empty() {
            return Err(ManifestError::EmptyField("version"));
        }

        let entry = &self.runtime.tool.entry;
        let resolved = safe_entry_path(plugin_root, entry)
            .ok_or_else(|| ManifestError::UnsafeEntry(entry.clone()))?;
        if !resolved.is_file() {
            return Err(ManifestError::MissingEntry(entry.clone()));
        }

        let export_name = &self.runtime.tool.export_name;
        if export_name != "default" && !is_valid_identifier(export_name) {
            return Err(ManifestError::InvalidExportName(export_name.clone()));
        }

        Ok(())
    }
}

/// Rejects absolute paths and `..`/`.` segments, requires one of the
/// supported JS extensions, then joins onto `plugin_root`. Mirrors
/// `file_ops::validate_path`'s containment discipline but for a path that
/// need not exist yet when the manifest is first parsed.
fn safe_entry_path(plugin_root: &Path, entry: &str) -> Option<PathBuf> {
    let has_supported_extension =
        entry.ends_with(".js") || entry.ends_with(".mjs") || entry.ends_with(".cjs");
    if !has_supported_extension {
        return None;
    }

    let candidate = Path::new(entry);
    if candidate.is_absolute() {
        return None;
    }
    for component in candidate.components() {
        match component {
            Component::Normal(_) => {}
            _ => return None,
        }
    }

    Some(plugin_root.join(candidate))
}

fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' || c == '$' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn manifest_json(entry: &str, export_name: &str) -> String {
        format!(
            r#"{{
                "id": "demo-plugin",
                "kind": "tool",
                "name": "Demo Plugin",
                "version": "1.0.0",
                "configSchema": {{}},
                "runtime": {{"tool": {{"entry": "{entry}", "exportName": "{export_name}"}}}}
            }}"#
        )
    }

    #[test]
    fn valid_manifest_with_existing_entry_passes() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.js"), b"module.exports = () => {};").unwrap();

        let manifest = PluginManifest::parse(&manifest_json("index.js", "default")).unwrap();
        assert!(manifest.validate(dir.path()).is_ok());
    }

    #[test]
    fn nested_entry_under_subdirectory_resolves() {
        let dir = tempfile::tempdir().unwrap();
        fs::create_dir(dir.path().join("dist")).unwrap();
        fs::write(dir.path().join("dist/main.mjs"), b"export default () => {};").unwrap();

        let manifest = PluginManifest::parse(&manifest_json("dist/main.mjs", "default")).unwrap();
        assert!(manifest.validate(dir.path()).is_ok());
    }

    #[test]
    fn missing_entry_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = PluginManifest::parse(&manifest_json("index.js", "default")).unwrap();
        assert_eq!(manifest.validate(dir.path()), Err(ManifestError::MissingEntry("index.js".into())));
    }

    #[test]
    fn parent_traversal_in_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = PluginManifest::parse(&manifest_json("../escape.js", "default")).unwrap();
        assert_eq!(manifest.validate(dir.path()), Err(ManifestError::UnsafeEntry("../escape.js".into())));
    }

    #[test]
    fn absolute_entry_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let manifest = PluginManifest::parse(&manifest_json("/etc/passwd.js", "default")).unwrap();
        assert!(matches!(manifest.validate(dir.path()), Err(ManifestError::UnsafeEntry(_))));
    }

    #[test]
    fn unsupported_extension_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.ts"), b"export default () => {};").unwrap();
        let manifest = PluginManifest::parse(&manifest_json("index.ts", "default")).unwrap();
        assert!(matches!(manifest.validate(dir.path()), Err(ManifestError::UnsafeEntry(_))));
    }

    #[test]
    fn invalid_export_name_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("index.js"), b"").unwrap();
        let manifest = PluginManifest::parse(&manifest_json("index.js", "123bad")).unwrap();
        assert!(matches!(manifest.validate(dir.path()), Err(ManifestError::InvalidExportName(_))));
    }

    #[test]
    fn unsupported_kind_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let raw = r#"{
            "id": "demo",
            "kind": "resource",
            "name": "Demo",
            "version": "1.0.0",
            "configSchema": {},
            "runtime": {"tool": {"entry": "index.js", "exportName": "default"}}
        }"#;
        let manifest = PluginManifest::parse(raw).unwrap();
        assert_eq!(manifest.validate(dir.path()), Err(ManifestError::UnsupportedKind("resource".into())));
    }

    #[test]
    fn permissions_default_to_empty_when_absent() {
        let manifest = PluginManifest::parse(&manifest_json("index.js", "default")).unwrap();
        assert!(manifest.permissions.is_none());
    }

    #[test]
    fn permissions_parse_when_present() {
        let raw = format!(
            r#"{{
                "id": "demo",
                "kind": "tool",
                "name": "Demo",
                "version": "1.0.0",
                "configSchema": {{}},
                "runtime": {{"tool": {{"entry": "index.js", "exportName": "default"}}}},
                "permissions": {{"network": true, "fsRead": ["workspace/"], "exec": []}}
            }}"#
        );
        let manifest = PluginManifest::parse(&raw).unwrap();
        let perms = manifest.permissions.unwrap();
        assert!(perms.network);
        assert_eq!(perms.fs_read, vec!["workspace/".to_string()]);
        assert!(perms.fs_write.is_empty());
    }
}
