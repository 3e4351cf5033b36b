//! Plugin Execution Guard: wraps every plugin tool call with a
//! per-installed-plugin concurrency cap, queue/execution timeouts, and a
//! failure-streak cooldown. Never lets a plugin error (or panic path)
//! propagate into the LLM loop — everything comes back as a structured
//! result.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use parking_lot::Mutex;
use tokio::sync::Semaphore;
use tokio::time::timeout;

use crate::plugin::{PluginHostError, PluginToolCall, PluginToolHost};

#[derive(Debug, Clone, Copy)]
pub struct GuardConfig {
    pub max_concurrency: usize,
    pub queue_timeout: Duration,
    pub execution_timeout: Duration,
    pub failure_threshold: u32,
    pub failure_cooldown: Duration,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 4,
            queue_timeout: Duration::from_millis(5_000),
            execution_timeout: Duration::from_millis(30_000),
            failure_threshold: 5,
            failure_cooldown: Duration::from_millis(60_000),
        }
    }
}

struct PluginState {
    semaphore: Arc<Semaphore>,
    failure_streak: u32,
    cooldown_until: Option<Instant>,
}

impl PluginState {
    fn new(max_concurrency: usize) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(max_concurrency)),
            failure_streak: 0,
            cooldown_until: None,
        }
    }
}

/// Meta reported alongside every guarded call, win or lose.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GuardMeta {
    pub queue_wait_ms: u64,
    pub execution_ms: u64,
    pub timeout_ms: u64,
    pub max_concurrency: usize,
    pub failure_streak: u32,
    pub cooldown_until_ms: Option<u64>,
    pub cooldown_remaining_ms: Option<u64>,
}

/// Structured result returned instead of ever throwing into the LLM loop.
#[derive(Debug, Clone, serde::Serialize)]
pub struct GuardedToolResult {
    pub ok: bool,
    pub error: Option<String>,
    pub error_code: Option<&'static str>,
    pub plugin_id: String,
    pub tool_name: String,
    pub result: Option<serde_json::Value>,
    pub meta: GuardMeta,
}

pub struct PluginExecutionGuard {
    config: GuardConfig,
    host: Arc<dyn PluginToolHost>,
    plugins: Mutex<HashMap<String, PluginState>>,
}

impl PluginExecutionGuard {
    pub fn new(config: GuardConfig, host: Arc<dyn PluginToolHost>) -> Self {
        Self { config, host, plugins: Mutex::new(HashMap::new()) }
    }

    fn cooldown_remaining(&self, plugin_id: &str) -> Option<Duration> {
        let plugins = self.plugins.lock();
        let state = plugins.get(plugin_id)?;
        let until = state.cooldown_until?;
        let now = Instant::now();
        if until > now {
            Some(until - now)
        } else {
            None
        }
    }

    pub async fn call(&self, call: PluginToolCall) -> GuardedToolResult {
        let plugin_id = call.plugin_id.clone();
        let tool_name = call.tool_name.clone();

        if let Some(remaining) = self.cooldown_remaining(&plugin_id) {
            let failure_streak = self.plugins.lock().get(&plugin_id).map(|s| s.failure_streak).unwrap_or(0);
            let now_epoch_ms = SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64;
            return GuardedToolResult {
                ok: false,
                error: Some(format!("plugin '{plugin_id}' is cooling down after repeated failures")),
                error_code: Some("plugin_cooldown_active"),
                plugin_id,
                tool_name,
                result: None,
                meta: GuardMeta {
                    queue_wait_ms: 0,
                    execution_ms: 0,
                    timeout_ms: self.config.execution_timeout.as_millis() as u64,
                    max_concurrency: self.config.max_concurrency,
                    failure_streak,
                    cooldown_until_ms: Some(now_epoch_ms + remaining.as_millis() as u64),
                    cooldown_remaining_ms: Some(remaining.as_millis() as u64),
                },
            };
        }

        let semaphore = {
            let mut plugins = self.plugins.lock();
            let state = plugins
                .entry(plugin_id.clone())
                .or_insert_with(|| PluginState::new(self.config.max_concurrency));
            state.semaphore.clone()
        };

        let queue_start = Instant::now();
        let permit = match timeout(self.config.queue_timeout, semaphore.acquire_owned()).await {
            Ok(Ok(permit)) => permit,
            _ => {
                let queue_wait_ms = queue_start.elapsed().as_millis() as u64;
                let failure_streak = self.plugins.lock().get(&plugin_id).map(|s| s.failure_streak).unwrap_or(0);
                return GuardedToolResult {
                    ok: false,
                    error: Some(format!("timed out waiting for a free slot on plugin '{plugin_id}'")),
                    error_code: Some("plugin_queue_timeout"),
                    plugin_id,
                    tool_name,
                    result: None,
                    meta: GuardMeta {
                        queue_wait_ms,
                        execution_ms: 0,
                        timeout_ms: self.config.queue_timeout.as_millis() as u64,
                        max_concurrency: self.config.max_concurrency,
                        failure_streak,
                        cooldown_until_ms: None,
                        cooldown_remaining_ms: None,
                    },
                };
            }
        };
        let queue_wait_ms = queue_start.elapsed().as_millis() as u64;

        let exec_start = Instant::now();
        let call_result = timeout(self.config.execution_timeout, self.host.invoke(call)).await;
        drop(permit);
        let execution_ms = exec_start.elapsed().as_millis() as u64;

        match call_result {
            Ok(Ok(value)) => {
                let failure_streak = self.record_success(&plugin_id);
                GuardedToolResult {
                    ok: true,
                    error: None,
                    error_code: None,
                    plugin_id,
                    tool_name,
                    result: Some(value),
                    meta: GuardMeta {
                        queue_wait_ms,
                        execution_ms,
                        timeout_ms: self.config.execution_timeout.as_millis() as u64,
                        max_concurrency: self.config.max_concurrency,
                        failure_streak,
                        cooldown_until_ms: None,
                        cooldown_remaining_ms: None,
                    },
                }
            }
            Ok(Err(PluginHostError(message))) => {
                let failure_streak = self.record_failure(&plugin_id);
                GuardedToolResult {
                    ok: false,
                    error: Some(message),
                    error_code: Some("plugin_execution_error"),
                    plugin_id,
                    tool_name,
                    result: None,
                    meta: GuardMeta {
                        queue_wait_ms,
                        execution_ms,
                        timeout_ms: self.config.execution_timeout.as_millis() as u64,
                        max_concurrency: self.config.max_concurrency,
                        failure_streak,
                        cooldown_until_ms: None,
                        cooldown_remaining_ms: None,
                    },
                }
            }
            Err(_elapsed) => {
                let failure_streak = self.record_failure(&plugin_id);
                GuardedToolResult {
                    ok: false,
                    error: Some(format!("plugin '{plugin_id}' tool call timed out")),
                    error_code: Some("plugin_execution_timeout"),
                    plugin_id,
                    tool_name,
                    result: None,
                    meta: GuardMeta {
                        queue_wait_ms,
                        execution_ms,
                        timeout_ms: self.config.execution_timeout.as_millis() as u64,
                        max_concurrency: self.config.max_concurrency,
                        failure_streak,
                        cooldown_until_ms: None,
                        cooldown_remaining_ms: None,
                    },
                }
            }
        }
    }

    fn record_success(&self, plugin_id: &str) -> u32 {
        let mut plugins = self.plugins.lock();
        let state = plugins.entry(plugin_id.to_owned()).or_insert_with(|| PluginState::new(self.config.max_concurrency));
        state.failure_streak = 0;
        state.cooldown_until = None;
        0
    }

    fn record_failure(&self, plugin_id: &str) -> u32 {
        let mut plugins = self.plugins.lock();
        let state = plugins.entry(plugin_id.to_owned()).or_insert_with(|| PluginState::new(self.config.max_concurrency));
        state.failure_streak += 1;
        if state.failure_streak >= self.config.failure_threshold {
            state.cooldown_until = Some(Instant::now() + self.config.failure_cooldown);
        }
        state.failure_streak
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyHost {
        fail_times: AtomicU32,
    }

    #[async_trait]
    impl PluginToolHost for FlakyHost {
        async fn invoke(&self, call: PluginToolCall) -> Result<serde_json::Value, PluginHostError> {
            if self.fail_times.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(PluginHostError("boom".into()));
            }
            Ok(serde_json::json!({"tool": call.tool_name}))
        }
    }

    struct SlowHost;

    #[async_trait]
    impl PluginToolHost for SlowHost {
        async fn invoke(&self, _call: PluginToolCall) -> Result<serde_json::Value, PluginHostError> {
            tokio::time::sleep(Duration::from_millis(50)).await;
            Ok(serde_json::json!({}))
        }
    }

    fn call(plugin_id: &str) -> PluginToolCall {
        PluginToolCall { plugin_id: plugin_id.into(), tool_name: "do_thing".into(), arguments: serde_json::json!({}) }
    }

    #[tokio::test]
    async fn success_resets_failure_streak() {
        let host = Arc::new(FlakyHost { fail_times: AtomicU32::new(0) });
        let guard = PluginExecutionGuard::new(GuardConfig::default(), host);
        let result = guard.call(call("p1")).await;
        assert!(result.ok);
        assert_eq!(result.meta.failure_streak, 0);
    }

    #[tokio::test]
    async fn failures_enter_cooldown_after_threshold() {
        let host = Arc::new(FlakyHost { fail_times: AtomicU32::new(10) });
        let config = GuardConfig { failure_threshold: 2, ..GuardConfig::default() };
        let guard = PluginExecutionGuard::new(config, host);

        let first = guard.call(call("p1")).await;
        assert_eq!(first.error_code, Some("plugin_execution_error"));
        let second = guard.call(call("p1")).await;
        assert_eq!(second.error_code, Some("plugin_execution_error"));

        let third = guard.call(call("p1")).await;
        assert_eq!(third.error_code, Some("plugin_cooldown_active"));
    }

    #[tokio::test]
    async fn execution_timeout_reports_timeout_error_code() {
        let host = Arc::new(SlowHost);
        let config = GuardConfig { execution_timeout: Duration::from_millis(5), ..GuardConfig::default() };
        let guard = PluginExecutionGuard::new(config, host);
        let result = guard.call(call("p1")).await;
        assert_eq!(result.error_code, Some("plugin_execution_timeout"));
    }

    #[tokio::test]
    async fn queue_timeout_when_all_slots_busy() {
        let host = Arc::new(SlowHost);
        let config = GuardConfig {
            max_concurrency: 1,
            queue_timeout: Duration::from_millis(5),
            execution_timeout: Duration::from_millis(200),
            ..GuardConfig::default()
        };
        let guard = Arc::new(PluginExecutionGuard::new(config, host));

        let g1 = guard.clone();
        let first = tokio::spawn(async move { g1.call(call("p1")).await });
        tokio::time::sleep(Duration::from_millis(2)).await;
        let second = guard.call(call("p1")).await;

        assert_eq!(second.error_code, Some("plugin_queue_timeout"));
        let first = first.await.unwrap();
        assert!(first.ok);
    }
}
