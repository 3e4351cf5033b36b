//! Tool Registry: built-in tools, the plugin execution guard, and the
//! `PluginToolHost` collaborator interface.

pub mod file_ops;
pub mod guard;
pub mod manifest;
pub mod plugin;
pub mod registry;

pub use guard::{GuardConfig, GuardMeta, GuardedToolResult, PluginExecutionGuard};
pub use manifest::{ManifestError, PluginManifest, Permissions, RuntimeSection, ToolRuntime};
pub use plugin::{PluginHostError, PluginToolCall, PluginToolHost};
pub use registry::{build_toolset, build_toolset_with_dispatch, PluginToolSpec, DELEGATE_TO_AGENT};
