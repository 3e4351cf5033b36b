//! `GatewayCore`/`AppState` construction and background-task spawning,
//! extracted from `main.rs` so the `serve` and `doctor` commands can share
//! the same boot path.

use std::sync::Arc;

use anyhow::Context;
use rb_broker::RunBroker;
use rb_domain::config::{Config, ConfigSeverity};
use rb_rpc::llm::LlmStream;
use rb_rpc::persistence::{InMemoryPersistence, PersistenceRpc};
use rb_sessions::SessionStore;
use rb_tools::{GuardConfig, PluginExecutionGuard};
use std::time::Duration;

use crate::channels::ChannelRegistry;
use crate::dispatcher::GatewayDispatcher;
use crate::llm_http::HttpLlmStream;
use crate::persistence_http::HttpPersistenceRpc;
use crate::plugin_host::NodePluginToolHost;
use crate::state::{AppState, GatewayCore, PluginToolStore};

/// Validate config and wire up every collaborator. Shared by `serve` and
/// any future one-shot command that needs a live `AppState` without
/// binding an HTTP listener.
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    let issues = config.validate();
    for issue in &issues {
        match issue.severity {
            ConfigSeverity::Warning => tracing::warn!("config: {issue}"),
            ConfigSeverity::Error => tracing::error!("config: {issue}"),
        }
    }
    if issues.iter().any(|i| i.severity == ConfigSeverity::Error) {
        anyhow::bail!(
            "config validation failed with {} error(s)",
            issues.iter().filter(|i| i.severity == ConfigSeverity::Error).count()
        );
    }

    // ── Workspace root ────────────────────────────────────────────────
    std::fs::create_dir_all(&config.workspace.root)
        .with_context(|| format!("creating workspace root {}", config.workspace.root.display()))?;
    tracing::info!(path = %config.workspace.root.display(), "workspace root ready");

    // ── LLM stream ────────────────────────────────────────────────────
    let llm: Arc<dyn LlmStream> = match &config.llm.base_url {
        Some(base_url) => {
            tracing::info!(url = %base_url, "LLM stream ready");
            Arc::new(HttpLlmStream::new(base_url.clone(), config.llm.api_key()))
        }
        None => {
            tracing::warn!("llm.base_url unset — runs will fail to reach a model");
            Arc::new(HttpLlmStream::new(String::new(), None))
        }
    };

    // ── Persistence RPC ───────────────────────────────────────────────
    let rpc: Arc<dyn PersistenceRpc> = match &config.persistence.base_url {
        Some(base_url) => {
            tracing::info!(url = %base_url, "persistence RPC ready");
            Arc::new(HttpPersistenceRpc::new(base_url.clone()))
        }
        None => {
            tracing::warn!(
                "persistence.base_url unset — falling back to an in-memory store seeded from config.agents \
                 (usage, task tracking, and the plugin registry are not durable in this mode)"
            );
            let fallback = InMemoryPersistence::new();
            for agent in config.agents.values() {
                fallback.seed_agent(agent.clone());
            }
            Arc::new(fallback)
        }
    };

    // ── Plugin execution guard ────────────────────────────────────────
    let node_host = Arc::new(NodePluginToolHost::new());
    let guard_cfg = GuardConfig {
        max_concurrency: config.plugin_guard.max_concurrency_per_plugin,
        queue_timeout: Duration::from_millis(config.plugin_guard.queue_timeout_ms),
        execution_timeout: Duration::from_millis(config.plugin_guard.execution_timeout_ms),
        failure_threshold: config.plugin_guard.failure_threshold,
        failure_cooldown: Duration::from_millis(config.plugin_guard.failure_cooldown_ms),
    };
    let guard = Arc::new(PluginExecutionGuard::new(guard_cfg, node_host.clone()));
    tracing::info!("plugin execution guard ready");

    // ── Run broker ────────────────────────────────────────────────────
    let broker = Arc::new(RunBroker::new(config.broker.clone()));
    tracing::info!("run broker ready");

    // ── Session store ─────────────────────────────────────────────────
    let sessions = Arc::new(SessionStore::new(&config.workspace.root).context("initializing session store")?);
    tracing::info!("session store ready");

    // ── Channel registry ──────────────────────────────────────────────
    let channels = Arc::new(ChannelRegistry::from_config(&config.channels));
    tracing::info!(channels = config.channels.routing_rules.len(), "channel registry ready");

    let core = Arc::new(GatewayCore {
        config: config.clone(),
        broker,
        rpc,
        llm,
        guard,
        plugin_tools: PluginToolStore::default(),
        workspace_root: config.workspace.root.clone(),
        sessions,
        channels,
        node_host,
    });

    let dispatcher = Arc::new(GatewayDispatcher::new(core.clone()));

    Ok(AppState { core, dispatcher })
}

/// Spawn the long-running background tasks: periodic session-store flush
/// and the broker's own retention sweep runs inside `RunBroker::new`
/// already, so this is currently just the session flush.
pub fn spawn_background_tasks(state: &AppState) {
    let sessions = state.core.sessions.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(30));
        loop {
            interval.tick().await;
            if let Err(e) = sessions.flush() {
                tracing::warn!(error = %e, "session store flush failed");
            }
        }
    });
}
