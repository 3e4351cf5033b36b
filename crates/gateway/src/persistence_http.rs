//! A `PersistenceRpc` backed by the persistence service's HTTP API. Used
//! whenever `persistence.base_url` is configured; falls back to
//! `InMemoryPersistence` (seeded from `Config.agents`) otherwise, which is
//! enough for local development but keeps nothing durable.

use std::time::Duration;

use rb_domain::tool::Message;
use rb_rpc::persistence::{
    AgentConfig, ContinueContext, CreateRunParams, CreateTaskParams, PersistenceRpc, PluginUsageEvent, RpcError,
    RpcResult, RunStatus, RuntimePlugin, TaskStatus, UsageRecord,
};
use serde::Deserialize;
use serde_json::json;

pub struct HttpPersistenceRpc {
    base_url: String,
    client: reqwest::Client,
}

impl HttpPersistenceRpc {
    pub fn new(base_url: impl Into<String>) -> Self {
        let client = reqwest::Client::builder().timeout(Duration::from_secs(10)).build().expect("reqwest client");
        Self { base_url: base_url.into(), client }
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), path.trim_start_matches('/'))
    }

    async fn get_json<T: for<'de> Deserialize<'de>>(&self, path: &str) -> RpcResult<T> {
        let response = self.client.get(self.url(path)).send().await.map_err(|e| RpcError::internal(e.to_string()))?;
        handle_response(response).await
    }

    async fn post_json<T: for<'de> Deserialize<'de>>(&self, path: &str, body: serde_json::Value) -> RpcResult<T> {
        let response =
            self.client.post(self.url(path)).json(&body).send().await.map_err(|e| RpcError::internal(e.to_string()))?;
        handle_response(response).await
    }

    async fn post_unit(&self, path: &str, body: serde_json::Value) -> RpcResult<()> {
        let response =
            self.client.post(self.url(path)).json(&body).send().await.map_err(|e| RpcError::internal(e.to_string()))?;
        if response.status().is_success() {
            Ok(())
        } else {
            Err(status_to_error(response.status(), response.text().await.unwrap_or_default()))
        }
    }
}

async fn handle_response<T: for<'de> Deserialize<'de>>(response: reqwest::Response) -> RpcResult<T> {
    let status = response.status();
    let text = response.text().await.map_err(|e| RpcError::internal(e.to_string()))?;
    if !status.is_success() {
        return Err(status_to_error(status, text));
    }
    serde_json::from_str(&text).map_err(|e| RpcError::internal(format!("decoding persistence response: {e}")))
}

fn status_to_error(status: reqwest::StatusCode, body: String) -> RpcError {
    if status == reqwest::StatusCode::NOT_FOUND {
        RpcError::not_found(body)
    } else if status == reqwest::StatusCode::BAD_REQUEST || status == reqwest::StatusCode::UNPROCESSABLE_ENTITY {
        RpcError::invalid_argument(body)
    } else {
        RpcError::internal(format!("persistence returned {status}: {body}"))
    }
}

fn run_status_str(status: RunStatus) -> &'static str {
    match status {
        RunStatus::Queued => "queued",
        RunStatus::Running => "running",
        RunStatus::Completed => "completed",
        RunStatus::Failed => "failed",
        RunStatus::Cancelled => "cancelled",
    }
}

fn task_status_str(status: TaskStatus) -> &'static str {
    match status {
        TaskStatus::Pending => "pending",
        TaskStatus::InProgress => "in_progress",
        TaskStatus::Completed => "completed",
        TaskStatus::Failed => "failed",
    }
}

#[derive(Deserialize)]
struct RunIdResponse {
    #[serde(rename = "runId")]
    run_id: String,
}

#[derive(Deserialize)]
struct TaskIdResponse {
    #[serde(rename = "taskId")]
    task_id: String,
}

#[async_trait::async_trait]
impl PersistenceRpc for HttpPersistenceRpc {
    async fn get_agent_config(&self, agent_id: &str) -> RpcResult<AgentConfig> {
        self.get_json(&format!("agents/{agent_id}")).await
    }

    async fn get_continue_context_by_message(&self, message_id: &str) -> RpcResult<ContinueContext> {
        self.get_json(&format!("continue-context/by-message/{message_id}")).await
    }

    async fn get_continue_context_by_run(&self, run_id: &str) -> RpcResult<ContinueContext> {
        self.get_json(&format!("continue-context/by-run/{run_id}")).await
    }

    async fn create_run(&self, params: CreateRunParams) -> RpcResult<String> {
        let body = json!({
            "workspaceId": params.workspace_id,
            "agentId": params.agent_id,
            "input": params.input,
        });
        let response: RunIdResponse = self.post_json("runs", body).await?;
        Ok(response.run_id)
    }

    async fn append_message(&self, run_id: &str, message: Message) -> RpcResult<()> {
        self.post_unit(&format!("runs/{run_id}/messages"), serde_json::to_value(&message).unwrap_or_default()).await
    }

    async fn update_run_status(&self, run_id: &str, status: RunStatus) -> RpcResult<()> {
        self.post_unit(&format!("runs/{run_id}/status"), json!({ "status": run_status_str(status) })).await
    }

    async fn create_task(&self, params: CreateTaskParams) -> RpcResult<String> {
        let body = json!({
            "runId": params.run_id,
            "parentTaskId": params.parent_task_id,
            "depth": params.depth,
            "description": params.description,
        });
        let response: TaskIdResponse = self.post_json("tasks", body).await?;
        Ok(response.task_id)
    }

    async fn update_task(&self, task_id: &str, status: TaskStatus) -> RpcResult<()> {
        self.post_unit(&format!("tasks/{task_id}/status"), json!({ "status": task_status_str(status) })).await
    }

    async fn record_run_usage(&self, run_id: &str, usage: UsageRecord) -> RpcResult<()> {
        self.post_unit(&format!("runs/{run_id}/usage"), usage_json(usage)).await
    }

    async fn record_task_usage(&self, task_id: &str, usage: UsageRecord) -> RpcResult<()> {
        self.post_unit(&format!("tasks/{task_id}/usage"), usage_json(usage)).await
    }

    async fn report_plugin_usage_events(&self, events: Vec<PluginUsageEvent>) -> RpcResult<()> {
        let events: Vec<_> = events
            .into_iter()
            .map(|e| json!({ "pluginId": e.plugin_id, "toolName": e.tool_name, "succeeded": e.succeeded }))
            .collect();
        self.post_unit("plugin-usage-events", json!({ "events": events })).await
    }

    async fn list_runtime_plugins(&self, workspace_id: &str) -> RpcResult<Vec<RuntimePlugin>> {
        #[derive(Deserialize)]
        struct Wire {
            #[serde(rename = "installedPluginId")]
            installed_plugin_id: String,
            #[serde(rename = "pluginId")]
            plugin_id: String,
            #[serde(rename = "workspaceId")]
            workspace_id: String,
            #[serde(rename = "installPath")]
            install_path: String,
        }
        let wire: Vec<Wire> = self.get_json(&format!("workspaces/{workspace_id}/runtime-plugins")).await?;
        Ok(wire
            .into_iter()
            .map(|w| RuntimePlugin {
                installed_plugin_id: w.installed_plugin_id,
                plugin_id: w.plugin_id,
                workspace_id: w.workspace_id,
                install_path: w.install_path,
            })
            .collect())
    }

    async fn report_runtime_plugin_load(&self, installed_plugin_id: &str, succeeded: bool) -> RpcResult<()> {
        self.post_unit(&format!("runtime-plugins/{installed_plugin_id}/load-report"), json!({ "succeeded": succeeded }))
            .await
    }
}

fn usage_json(usage: UsageRecord) -> serde_json::Value {
    json!({
        "promptTokens": usage.prompt_tokens,
        "completionTokens": usage.completion_tokens,
        "totalTokens": usage.total_tokens,
    })
}
