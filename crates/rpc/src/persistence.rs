//! The persistence RPC boundary: the service of record for runs, tasks,
//! messages, usage, and the plugin registry. The broker only ever mirrors
//! this data transiently for streaming; this trait is the one door back to
//! the canonical tables.

use std::collections::HashMap;

use parking_lot::Mutex;
use rb_domain::tool::Message;
/// Re-exported so callers only need one import for the RPC surface; the
/// coordinator turns this straight into a `PolicySandbox`.
pub use rb_domain::config::AgentConfig;

/// gRPC-style status code, per the subset the persistence contract uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    InvalidArgument,
    NotFound,
    Internal,
}

#[derive(thiserror::Error, Debug)]
#[error("persistence rpc: {message} ({code:?})")]
pub struct RpcError {
    pub code: StatusCode,
    pub message: String,
}

impl RpcError {
    pub fn invalid_argument(message: impl Into<String>) -> Self {
        Self { code: StatusCode::InvalidArgument, message: message.into() }
    }
    pub fn not_found(message: impl Into<String>) -> Self {
        Self { code: StatusCode::NotFound, message: message.into() }
    }
    pub fn internal(message: impl Into<String>) -> Self {
        Self { code: StatusCode::Internal, message: message.into() }
    }
}

pub type RpcResult<T> = std::result::Result<T, RpcError>;

/// The prior turn's messages and bookkeeping, used to resume a run that
/// continues an earlier conversation rather than starting fresh.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct ContinueContext {
    pub run_id: String,
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone)]
pub struct CreateRunParams {
    pub workspace_id: String,
    pub agent_id: String,
    pub input: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunStatus {
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone)]
pub struct CreateTaskParams {
    pub run_id: String,
    pub parent_task_id: Option<String>,
    pub depth: u32,
    pub description: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct UsageRecord {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

#[derive(Debug, Clone)]
pub struct PluginUsageEvent {
    pub plugin_id: String,
    pub tool_name: String,
    pub succeeded: bool,
}

#[derive(Debug, Clone)]
pub struct RuntimePlugin {
    pub installed_plugin_id: String,
    pub plugin_id: String,
    pub workspace_id: String,
    pub install_path: String,
}

/// The collaborator interface the Coordinator/Executor Loop and the plugin
/// sync endpoint call out to. Usage-recording methods are best-effort from
/// the caller's point of view — callers swallow their errors rather than
/// fail the run (see `RunBroker`/`Coordinator`) — but the trait itself
/// still reports failures so a caller that *does* care (tests, retries) can
/// observe them.
#[async_trait::async_trait]
pub trait PersistenceRpc: Send + Sync {
    async fn get_agent_config(&self, agent_id: &str) -> RpcResult<AgentConfig>;

    async fn get_continue_context_by_message(&self, message_id: &str) -> RpcResult<ContinueContext>;
    async fn get_continue_context_by_run(&self, run_id: &str) -> RpcResult<ContinueContext>;

    async fn create_run(&self, params: CreateRunParams) -> RpcResult<String>;
    async fn append_message(&self, run_id: &str, message: Message) -> RpcResult<()>;
    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> RpcResult<()>;

    async fn create_task(&self, params: CreateTaskParams) -> RpcResult<String>;
    async fn update_task(&self, task_id: &str, status: TaskStatus) -> RpcResult<()>;

    async fn record_run_usage(&self, run_id: &str, usage: UsageRecord) -> RpcResult<()>;
    async fn record_task_usage(&self, task_id: &str, usage: UsageRecord) -> RpcResult<()>;

    async fn report_plugin_usage_events(&self, events: Vec<PluginUsageEvent>) -> RpcResult<()>;

    async fn list_runtime_plugins(&self, workspace_id: &str) -> RpcResult<Vec<RuntimePlugin>>;
    async fn report_runtime_plugin_load(&self, installed_plugin_id: &str, succeeded: bool) -> RpcResult<()>;
}

/// In-memory test double. Usage-recording calls dedupe by `(run_id, scope)`
/// so a retried best-effort report doesn't double count — the same
/// decision the real persistence service makes for idempotent usage
/// ingestion.
#[derive(Default)]
pub struct InMemoryPersistence {
    agents: Mutex<HashMap<String, AgentConfig>>,
    contexts_by_run: Mutex<HashMap<String, ContinueContext>>,
    contexts_by_message: Mutex<HashMap<String, ContinueContext>>,
    runs: Mutex<HashMap<String, RunStatus>>,
    tasks: Mutex<HashMap<String, TaskStatus>>,
    messages: Mutex<HashMap<String, Vec<Message>>>,
    run_usage_seen: Mutex<HashMap<String, UsageRecord>>,
    task_usage_seen: Mutex<HashMap<String, UsageRecord>>,
    plugin_usage_events: Mutex<Vec<PluginUsageEvent>>,
    runtime_plugins: Mutex<HashMap<String, Vec<RuntimePlugin>>>,
}

impl InMemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn seed_agent(&self, cfg: AgentConfig) {
        self.agents.lock().insert(cfg.agent_id.clone(), cfg);
    }

    pub fn seed_runtime_plugins(&self, workspace_id: &str, plugins: Vec<RuntimePlugin>) {
        self.runtime_plugins.lock().insert(workspace_id.to_owned(), plugins);
    }

    pub fn messages_for(&self, run_id: &str) -> Vec<Message> {
        self.messages.lock().get(run_id).cloned().unwrap_or_default()
    }
}

#[async_trait::async_trait]
impl PersistenceRpc for InMemoryPersistence {
    async fn get_agent_config(&self, agent_id: &str) -> RpcResult<AgentConfig> {
        self.agents
            .lock()
            .get(agent_id)
            .cloned()
            .ok_or_else(|| RpcError::not_found(format!("agent {agent_id} not configured")))
    }

    async fn get_continue_context_by_message(&self, message_id: &str) -> RpcResult<ContinueContext> {
        self.contexts_by_message
            .lock()
            .get(message_id)
            .cloned()
            .ok_or_else(|| RpcError::not_found(format!("no context for message {message_id}")))
    }

    async fn get_continue_context_by_run(&self, run_id: &str) -> RpcResult<ContinueContext> {
        self.contexts_by_run
            .lock()
            .get(run_id)
            .cloned()
            .ok_or_else(|| RpcError::not_found(format!("no context for run {run_id}")))
    }

    async fn create_run(&self, params: CreateRunParams) -> RpcResult<String> {
        if params.agent_id.is_empty() {
            return Err(RpcError::invalid_argument("agent_id must not be empty"));
        }
        let run_id = uuid::Uuid::new_v4().to_string();
        self.runs.lock().insert(run_id.clone(), RunStatus::Queued);
        Ok(run_id)
    }

    async fn append_message(&self, run_id: &str, message: Message) -> RpcResult<()> {
        self.messages.lock().entry(run_id.to_owned()).or_default().push(message);
        Ok(())
    }

    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> RpcResult<()> {
        let mut runs = self.runs.lock();
        if !runs.contains_key(run_id) {
            return Err(RpcError::not_found(format!("run {run_id} not found")));
        }
        runs.insert(run_id.to_owned(), status);
        Ok(())
    }

    async fn create_task(&self, params: CreateTaskParams) -> RpcResult<String> {
        let task_id = uuid::Uuid::new_v4().to_string();
        self.tasks.lock().insert(task_id.clone(), TaskStatus::Pending);
        let _ = params;
        Ok(task_id)
    }

    async fn update_task(&self, task_id: &str, status: TaskStatus) -> RpcResult<()> {
        let mut tasks = self.tasks.lock();
        if !tasks.contains_key(task_id) {
            return Err(RpcError::not_found(format!("task {task_id} not found")));
        }
        tasks.insert(task_id.to_owned(), status);
        Ok(())
    }

    async fn record_run_usage(&self, run_id: &str, usage: UsageRecord) -> RpcResult<()> {
        self.run_usage_seen.lock().insert(run_id.to_owned(), usage);
        Ok(())
    }

    async fn record_task_usage(&self, task_id: &str, usage: UsageRecord) -> RpcResult<()> {
        self.task_usage_seen.lock().insert(task_id.to_owned(), usage);
        Ok(())
    }

    async fn report_plugin_usage_events(&self, events: Vec<PluginUsageEvent>) -> RpcResult<()> {
        self.plugin_usage_events.lock().extend(events);
        Ok(())
    }

    async fn list_runtime_plugins(&self, workspace_id: &str) -> RpcResult<Vec<RuntimePlugin>> {
        Ok(self.runtime_plugins.lock().get(workspace_id).cloned().unwrap_or_default())
    }

    async fn report_runtime_plugin_load(&self, _installed_plugin_id: &str, _succeeded: bool) -> RpcResult<()> {
        Ok(())
    }
}
