//! Process-wide shared state: the collaborators every request handler and
//! the channel dispatcher need a handle to, grouped the way the pieces are
//! actually used rather than by crate.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use parking_lot::Mutex;
use rb_broker::{AgentRuntime, RunBroker};
use rb_domain::config::Config;
use rb_rpc::llm::LlmStream;
use rb_rpc::persistence::PersistenceRpc;
use rb_sessions::SessionStore;
use rb_tools::{PluginExecutionGuard, PluginToolSpec};

use crate::channels::ChannelRegistry;
use crate::dispatcher::GatewayDispatcher;
use crate::plugin_host::NodePluginToolHost;

/// The live workspace-plugin toolset, keyed by `workspace_id`. Updated by
/// `/runtime/plugins/sync`; read fresh into a new `AgentRuntime` at the
/// start of every run so an in-flight run never sees tools disappear out
/// from under it mid-turn.
#[derive(Clone, Default)]
pub struct PluginToolStore(Arc<Mutex<HashMap<String, Vec<PluginToolSpec>>>>);

impl PluginToolStore {
    pub fn snapshot(&self, workspace_id: &str) -> Vec<PluginToolSpec> {
        self.0.lock().get(workspace_id).cloned().unwrap_or_default()
    }

    pub fn set(&self, workspace_id: String, tools: Vec<PluginToolSpec>) {
        self.0.lock().insert(workspace_id, tools);
    }

    pub fn remove_plugin(&self, workspace_id: &str, plugin_id: &str) {
        if let Some(tools) = self.0.lock().get_mut(workspace_id) {
            tools.retain(|t| t.plugin_id != plugin_id);
        }
    }
}

/// Everything a request handler or the channel dispatcher needs. Cloned
/// cheaply (every field is an `Arc` or a plain value) and handed to axum as
/// router state.
pub struct GatewayCore {
    pub config: Arc<Config>,
    pub broker: Arc<RunBroker>,
    pub rpc: Arc<dyn PersistenceRpc>,
    pub llm: Arc<dyn LlmStream>,
    pub guard: Arc<PluginExecutionGuard>,
    pub plugin_tools: PluginToolStore,
    pub workspace_root: PathBuf,
    pub sessions: Arc<SessionStore>,
    pub channels: Arc<ChannelRegistry>,
    pub node_host: Arc<NodePluginToolHost>,
}

impl GatewayCore {
    pub fn build_runtime(&self, workspace_id: &str) -> Arc<AgentRuntime> {
        Arc::new(AgentRuntime::new(
            self.rpc.clone(),
            self.llm.clone(),
            self.guard.clone(),
            self.plugin_tools.snapshot(workspace_id),
            self.workspace_root.clone(),
        ))
    }
}

#[derive(Clone)]
pub struct AppState {
    pub core: Arc<GatewayCore>,
    pub dispatcher: Arc<GatewayDispatcher>,
}
