//! `PluginToolHost` backed by Node.js child processes.
//!
//! A workspace plugin's tool entry (`runtime.tool.entry` in its manifest) is
//! a `.js`/`.mjs`/`.cjs` file exporting a function under `exportName`. Each
//! call spawns a fresh `node` process, writes one JSON request line to its
//! stdin, and reads one JSON response line from its stdout. Tool calls are
//! not sessions — there is nothing worth keeping a process alive between
//! calls for, and a fresh process per call sidesteps having to multiplex
//! concurrent calls over one child's stdio.

use std::collections::HashMap;
use std::path::PathBuf;
use std::process::Stdio;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;

use rb_tools::{PluginHostError, PluginToolCall, PluginToolHost};

#[derive(Debug, Clone)]
struct LoadedPlugin {
    entry_path: PathBuf,
    export_name: String,
}

/// Tracks which installed plugins are currently loaded, keyed by
/// `installed_plugin_id`. `/runtime/plugins/sync` drives this registry;
/// `PluginExecutionGuard` drives `invoke`.
pub struct NodePluginToolHost {
    loaded: Mutex<HashMap<String, LoadedPlugin>>,
}

impl NodePluginToolHost {
    pub fn new() -> Self {
        Self { loaded: Mutex::new(HashMap::new()) }
    }

    pub fn load(&self, installed_plugin_id: String, entry_path: PathBuf, export_name: String) {
        self.loaded.lock().insert(installed_plugin_id, LoadedPlugin { entry_path, export_name });
    }

    pub fn unload(&self, installed_plugin_id: &str) {
        self.loaded.lock().remove(installed_plugin_id);
    }

    pub fn is_loaded(&self, installed_plugin_id: &str) -> bool {
        self.loaded.lock().contains_key(installed_plugin_id)
    }
}

impl Default for NodePluginToolHost {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait::async_trait]
impl PluginToolHost for NodePluginToolHost {
    async fn invoke(&self, call: PluginToolCall) -> Result<Value, PluginHostError> {
        let plugin = self
            .loaded
            .lock()
            .get(&call.plugin_id)
            .cloned()
            .ok_or_else(|| PluginHostError(format!("plugin '{}' is not loaded", call.plugin_id)))?;

        let request = json!({
            "exportName": plugin.export_name,
            "toolName": call.tool_name,
            "arguments": call.arguments,
        });
        let line = serde_json::to_string(&request).map_err(|e| PluginHostError(format!("failed to encode tool call: {e}")))?;

        let mut child = Command::new("node")
            .arg(&plugin.entry_path)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| PluginHostError(format!("failed to spawn plugin process: {e}")))?;

        {
            let mut stdin = child.stdin.take().ok_or_else(|| PluginHostError("failed to capture plugin stdin".into()))?;
            stdin.write_all(line.as_bytes()).await.map_err(|e| PluginHostError(format!("failed to write to plugin stdin: {e}")))?;
            stdin.write_all(b"\n").await.map_err(|e| PluginHostError(format!("failed to write to plugin stdin: {e}")))?;
            stdin.shutdown().await.map_err(|e| PluginHostError(format!("failed to close plugin stdin: {e}")))?;
        }

        let stdout = child.stdout.take().ok_or_else(|| PluginHostError("failed to capture plugin stdout".into()))?;
        let mut reader = BufReader::new(stdout);
        let mut response_line = String::new();
        loop {
            let mut line = String::new();
            let bytes_read =
                reader.read_line(&mut line).await.map_err(|e| PluginHostError(format!("failed to read plugin stdout: {e}")))?;
            if bytes_read == 0 {
                break;
            }
            let trimmed = line.trim();
            if trimmed.starts_with('{') || trimmed.starts_with('[') {
                response_line = trimmed.to_string();
                break;
            }
        }

        let status = child.wait().await.map_err(|e| PluginHostError(format!("plugin process wait failed: {e}")))?;
        if response_line.is_empty() {
            return Err(PluginHostError(format!("plugin '{}' produced no JSON output (exit: {status})", call.plugin_id)));
        }

        serde_json::from_str(&response_line).map_err(|e| PluginHostError(format!("plugin '{}' produced invalid JSON: {e}", call.plugin_id)))
    }
}
