//! The Coordinator/Executor Loop: drives one agent's turn against an
//! `LlmStream`, executing tool calls between model steps and recursing into
//! a narrowed sandbox for `delegate_to_agent`. The coordinator (depth 0,
//! `task_id: None`) and every delegated executor (depth > 0, `task_id:
//! Some`) share this same function — the only difference is which
//! lifecycle events and task bookkeeping apply at the end of the turn.

use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::path::PathBuf;
use std::pin::Pin;
use std::sync::Arc;

use futures_util::StreamExt;
use rb_domain::envelope::EventPayload;
use rb_domain::stream::{StreamChunk, Usage};
use rb_domain::tool::{ContentPart, Message, MessageContent, Role, ToolCall, ToolDefinition};
use rb_policy::PolicySandbox;
use rb_rpc::llm::{ChatRequest, LlmStream};
use rb_rpc::persistence::{CreateTaskParams, PersistenceRpc, PluginUsageEvent, TaskStatus, UsageRecord};
use rb_tools::file_ops::{self, FsReadRequest, FsWriteRequest};
use rb_tools::guard::PluginExecutionGuard;
use rb_tools::plugin::PluginToolCall;
use rb_tools::registry::{build_toolset_with_dispatch, PluginToolSpec, DELEGATE_TO_AGENT};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::broker::RunEmitter;
use crate::run::RunParams;
use crate::task::DelegateArgs;

/// The collaborators one run's worker needs: the persistence store, the
/// model-call boundary, the plugin execution guard, the workspace plugin
/// toolset, and the filesystem root built-in tools are sandboxed to.
pub struct AgentRuntime {
    pub rpc: Arc<dyn PersistenceRpc>,
    pub llm: Arc<dyn LlmStream>,
    pub guard: Arc<PluginExecutionGuard>,
    pub plugin_tools: Vec<PluginToolSpec>,
    pub workspace_root: PathBuf,
}

impl AgentRuntime {
    pub fn new(
        rpc: Arc<dyn PersistenceRpc>,
        llm: Arc<dyn LlmStream>,
        guard: Arc<PluginExecutionGuard>,
        plugin_tools: Vec<PluginToolSpec>,
        workspace_root: PathBuf,
    ) -> Self {
        Self { rpc, llm, guard, plugin_tools, workspace_root }
    }
}

struct AgentTurn {
    runtime: Arc<AgentRuntime>,
    emitter: RunEmitter,
    agent_id: String,
    model_candidates: Vec<String>,
    start_candidate_offset: Option<usize>,
    sandbox: PolicySandbox,
    depth: u32,
    task_id: Option<String>,
    messages: Vec<Message>,
}

/// Entry point handed to `RunBroker::start_run` for the coordinator agent.
pub async fn run_coordinator(runtime: Arc<AgentRuntime>, params: RunParams, emitter: RunEmitter) -> Result<(), String> {
    let agent_cfg = runtime
        .rpc
        .get_agent_config(&params.coordinator_agent_id)
        .await
        .map_err(|e| format!("failed to load coordinator agent config: {e}"))?;

    let sandbox = PolicySandbox::from_agent_config(&agent_cfg);
    let mut messages = vec![Message::system(&agent_cfg.system_prompt)];
    if let Some(resumed) = &params.resume_messages {
        messages.extend(resumed.iter().cloned());
    }
    messages.push(Message::user(&params.user_request));

    run_agent_turn(AgentTurn {
        runtime,
        emitter,
        agent_id: params.coordinator_agent_id,
        model_candidates: agent_cfg.model_candidates,
        start_candidate_offset: params.start_candidate_offset,
        sandbox,
        depth: 0,
        task_id: None,
        messages,
    })
    .await
    .map(|_value| ())
}

/// One agent's turn: message-start, the model step loop with tool
/// execution, usage recording, message persistence, then task
/// completion/failure (executor only) and message-end. Recurses into
/// itself through `handle_delegate` for nested sub-agents, so it returns a
/// boxed future rather than a plain `async fn`.
fn run_agent_turn(turn: AgentTurn) -> Pin<Box<dyn Future<Output = Result<Value, String>> + Send>> {
    Box::pin(async move {
        let AgentTurn {
            runtime,
            emitter,
            agent_id,
            model_candidates,
            start_candidate_offset,
            sandbox,
            depth,
            task_id,
            mut messages,
        } = turn;

        tracing::debug!(agent_id = %agent_id, depth, task_id = ?task_id, "starting agent turn");

        let message_id = Uuid::new_v4().to_string();
        emitter.emit(EventPayload::MessageStart { message_id: message_id.clone() });

        let outcome =
            run_turn_steps(&runtime, &emitter, &sandbox, depth, &task_id, model_candidates, start_candidate_offset, &mut messages)
                .await;

        if let Some(task_id) = &task_id {
            match &outcome {
                Ok(value) => {
                    let _ = runtime.rpc.update_task(task_id, TaskStatus::Completed).await;
                    emitter.emit(EventPayload::TaskProgress { task_id: task_id.clone(), progress: 100 });
                    emitter.emit(EventPayload::TaskComplete { task_id: task_id.clone(), result: value.clone() });
                }
                Err(message) => {
                    let _ = runtime.rpc.update_task(task_id, TaskStatus::Failed).await;
                    emitter.emit(EventPayload::TaskFailed { task_id: task_id.clone(), error: message.clone() });
                }
            }
        }
        emitter.emit(EventPayload::MessageEnd { message_id });

        outcome
    })
}

fn build_chat_request(model: &str, messages: &[Message], tools: &[ToolDefinition]) -> ChatRequest {
    ChatRequest { model: model.to_string(), messages: messages.to_vec(), tools: tools.to_vec(), temperature: None, max_tokens: None }
}

/// The model step loop bounded by `sandbox.max_turns`: each iteration calls
/// `chat_stream` once, consumes the chunks, and — if the model requested
/// tool calls — executes them and loops back with the results appended.
/// Candidate fallback only runs before the first successfully opened
/// stream; once one candidate streams data, it is locked in for the rest
/// of the turn, and the coordinator (no `task_id`) never tries more than
/// its first configured candidate.
async fn run_turn_steps(
    runtime: &Arc<AgentRuntime>,
    emitter: &RunEmitter,
    sandbox: &PolicySandbox,
    depth: u32,
    task_id: &Option<String>,
    model_candidates: Vec<String>,
    start_candidate_offset: Option<usize>,
    messages: &mut Vec<Message>,
) -> Result<Value, String> {
    if model_candidates.is_empty() {
        return Err("agent has no configured model candidates".to_string());
    }
    let is_executor = task_id.is_some();
    let offset = start_candidate_offset.unwrap_or(0).min(model_candidates.len() - 1);
    let try_order: Vec<String> =
        if is_executor { model_candidates[offset..].to_vec() } else { vec![model_candidates[offset].clone()] };

    let include_delegate = sandbox.can_delegate(depth);
    let (tool_map, dispatch) = build_toolset_with_dispatch(runtime.plugin_tools.clone(), &sandbox.tool_policy, include_delegate);
    let tools: Vec<ToolDefinition> = tool_map.into_values().collect();

    let run_id = emitter.run_id().to_string();
    let mut locked_idx: Option<usize> = None;
    let mut total_usage = Usage::default();
    let mut final_text = String::new();

    for _step in 0..sandbox.max_turns.max(1) {
        let mut stream = match locked_idx {
            Some(idx) => {
                let request = build_chat_request(&try_order[idx], messages, &tools);
                runtime.llm.chat_stream(request).await.map_err(|e| format!("llm stream failed: {e}"))?
            }
            None => {
                let mut opened = None;
                let mut last_err = None;
                for (idx, model) in try_order.iter().enumerate() {
                    let request = build_chat_request(model, messages, &tools);
                    match runtime.llm.chat_stream(request).await {
                        Ok(s) => {
                            opened = Some(s);
                            locked_idx = Some(idx);
                            break;
                        }
                        Err(e) => last_err = Some(e.to_string()),
                    }
                }
                opened.ok_or_else(|| {
                    format!(
                        "all model candidates exhausted: {}",
                        last_err.unwrap_or_else(|| "no candidates configured".to_string())
                    )
                })?
            }
        };

        let mut step_text = String::new();
        let mut pending_calls: Vec<ToolCall> = Vec::new();
        let mut fifo: HashMap<String, VecDeque<String>> = HashMap::new();

        while let Some(chunk) = stream.next().await {
            match chunk {
                StreamChunk::TextDelta { delta } => {
                    step_text.push_str(&delta);
                    final_text.push_str(&delta);
                    emitter.emit(EventPayload::TextDelta { text: final_text.clone(), delta });
                }
                StreamChunk::Reasoning { text } => {
                    if !text.is_empty() {
                        emitter.emit(EventPayload::Reasoning { text });
                    }
                }
                StreamChunk::ReasoningDelta { delta } => {
                    if !delta.is_empty() {
                        emitter.emit(EventPayload::ReasoningDelta { delta });
                    }
                }
                StreamChunk::ToolCall { call_id, tool_name, arguments } => {
                    let id = call_id.unwrap_or_else(|| Uuid::new_v4().to_string());
                    fifo.entry(tool_name.clone()).or_default().push_back(id.clone());
                    emitter.emit(EventPayload::ToolCall { tool_call_id: id.clone(), tool_name: tool_name.clone(), args: arguments.clone() });
                    pending_calls.push(ToolCall { call_id: id, tool_name, arguments });
                }
                StreamChunk::ToolResult { call_id, tool_name, result } => {
                    let id = call_id
                        .or_else(|| fifo.get_mut(&tool_name).and_then(VecDeque::pop_front))
                        .unwrap_or_else(|| Uuid::new_v4().to_string());
                    emitter.emit(EventPayload::ToolResult { tool_call_id: id, tool_name, result, status: "success".to_string() });
                }
                StreamChunk::Error { message } => return Err(message),
                StreamChunk::Done { usage, finish_reason: _ } => {
                    if let Some(usage) = usage {
                        total_usage = total_usage.combine(usage);
                    }
                }
            }
        }

        if pending_calls.is_empty() {
            break;
        }

        let mut parts: Vec<ContentPart> = Vec::new();
        if !step_text.is_empty() {
            parts.push(ContentPart::Text { text: step_text });
        }
        for call in &pending_calls {
            parts.push(ContentPart::ToolUse { id: call.call_id.clone(), name: call.tool_name.clone(), input: call.arguments.clone() });
        }
        messages.push(Message { role: Role::Assistant, content: MessageContent::Parts(parts) });

        for call in pending_calls {
            let result = execute_tool_call(runtime, &dispatch, sandbox, depth, task_id, emitter, &call).await;
            let status = if result.get("error").is_some() { "error" } else { "success" };
            emitter.emit(EventPayload::ToolResult {
                tool_call_id: call.call_id.clone(),
                tool_name: call.tool_name.clone(),
                result: result.clone(),
                status: status.to_string(),
            });
            messages.push(Message::tool_result(call.call_id, result.to_string()));
        }
    }

    emitter.emit(EventPayload::Usage { scope: task_id.clone().unwrap_or_else(|| run_id.clone()), usage: total_usage });
    let usage_record = UsageRecord {
        prompt_tokens: total_usage.prompt_tokens,
        completion_tokens: total_usage.completion_tokens,
        total_tokens: total_usage.total_tokens,
    };
    if let Some(task_id) = task_id {
        let _ = runtime.rpc.record_task_usage(task_id, usage_record).await;
    } else {
        let _ = runtime.rpc.record_run_usage(&run_id, usage_record).await;
    }

    if !final_text.is_empty() {
        let _ = runtime.rpc.append_message(&run_id, Message::assistant(final_text.clone())).await;
    }

    Ok(json!({ "text": final_text }))
}

async fn execute_tool_call(
    runtime: &Arc<AgentRuntime>,
    dispatch: &HashMap<String, String>,
    sandbox: &PolicySandbox,
    depth: u32,
    task_id: &Option<String>,
    emitter: &RunEmitter,
    call: &ToolCall,
) -> Value {
    match call.tool_name.as_str() {
        "fs_read" => {
            if !sandbox.tool_policy.is_allowed("fs_read") {
                return policy_denied("fs_read");
            }
            match serde_json::from_value::<FsReadRequest>(call.arguments.clone()) {
                Ok(req) => {
                    if !sandbox.fs_policy.is_path_allowed(&req.path) {
                        return policy_denied_path(&req.path);
                    }
                    match file_ops::fs_read(&runtime.workspace_root, req).await {
                        Ok(v) => v,
                        Err(e) => json!({ "error": e }),
                    }
                }
                Err(e) => json!({ "error": format!("invalid fs_read arguments: {e}") }),
            }
        }
        "fs_write" => {
            if !sandbox.tool_policy.is_allowed("fs_write") {
                return policy_denied("fs_write");
            }
            match serde_json::from_value::<FsWriteRequest>(call.arguments.clone()) {
                Ok(req) => {
                    if !sandbox.fs_policy.is_path_allowed(&req.path) {
                        return policy_denied_path(&req.path);
                    }
                    match file_ops::fs_write(&runtime.workspace_root, req).await {
                        Ok(v) => v,
                        Err(e) => json!({ "error": e }),
                    }
                }
                Err(e) => json!({ "error": format!("invalid fs_write arguments: {e}") }),
            }
        }
        DELEGATE_TO_AGENT => match serde_json::from_value::<DelegateArgs>(call.arguments.clone()) {
            Ok(args) => handle_delegate(runtime.clone(), emitter.clone(), sandbox.clone(), depth, task_id.clone(), args).await,
            Err(e) => json!({ "error": format!("invalid delegate_to_agent arguments: {e}") }),
        },
        name if dispatch.contains_key(name) => {
            let plugin_id = dispatch.get(name).cloned().unwrap_or_default();
            let guarded = runtime
                .guard
                .call(PluginToolCall { plugin_id: plugin_id.clone(), tool_name: name.to_string(), arguments: call.arguments.clone() })
                .await;

            let rpc = runtime.rpc.clone();
            let event = PluginUsageEvent { plugin_id, tool_name: name.to_string(), succeeded: guarded.ok };
            tokio::spawn(async move {
                let _ = rpc.report_plugin_usage_events(vec![event]).await;
            });

            if guarded.ok {
                guarded.result.unwrap_or(Value::Null)
            } else {
                json!({
                    "error": guarded.error,
                    "errorCode": guarded.error_code,
                    "pluginId": guarded.plugin_id,
                    "toolName": guarded.tool_name,
                })
            }
        }
        name => json!({ "error": format!("tool '{name}' is not available in this deployment") }),
    }
}

fn policy_denied(tool_name: &str) -> Value {
    json!({ "error": format!("tool '{tool_name}' denied by tool policy"), "errorCode": "POLICY_DENIED" })
}

fn policy_denied_path(path: &str) -> Value {
    json!({ "error": format!("path '{path}' denied by fs policy"), "errorCode": "POLICY_DENIED" })
}

/// Preconditions: `depth < sandbox.max_spawn_depth`, checked against the
/// *parent's* current depth before any RPC call — a denied delegation never
/// creates a task. On success, recurses into `run_agent_turn` as the
/// executor; that call owns its own task-complete/task-failed emission.
async fn handle_delegate(
    runtime: Arc<AgentRuntime>,
    emitter: RunEmitter,
    sandbox: PolicySandbox,
    depth: u32,
    parent_task_id: Option<String>,
    args: DelegateArgs,
) -> Value {
    if !sandbox.can_delegate(depth) {
        return json!({ "error": format!("Max spawn depth ({}) reached; cannot delegate further", sandbox.max_spawn_depth) });
    }

    emitter.emit(EventPayload::AgentSwitch { agent_id: args.agent_id.clone(), task_id: None });

    let task_id = match runtime
        .rpc
        .create_task(CreateTaskParams {
            run_id: emitter.run_id().to_string(),
            parent_task_id,
            depth: depth + 1,
            description: args.instruction.clone(),
        })
        .await
    {
        Ok(id) => id,
        Err(e) => return json!({ "error": format!("failed to create delegated task: {e}") }),
    };

    emitter.emit(EventPayload::AgentSwitch { agent_id: args.agent_id.clone(), task_id: Some(task_id.clone()) });

    let child_agent_cfg = match runtime.rpc.get_agent_config(&args.agent_id).await {
        Ok(cfg) => cfg,
        Err(e) => return json!({ "error": format!("failed to load sub-agent config: {e}") }),
    };

    if runtime.rpc.update_task(&task_id, TaskStatus::InProgress).await.is_err() {
        tracing::warn!(task_id = %task_id, "failed to mark delegated task in-progress");
    }
    emitter.emit(EventPayload::TaskProgress { task_id: task_id.clone(), progress: 0 });

    let child_sandbox = sandbox.narrow_for_subagent(depth + 1);
    let messages = vec![Message::system(&child_agent_cfg.system_prompt), Message::user(&args.instruction)];

    let outcome = run_agent_turn(AgentTurn {
        runtime,
        emitter,
        agent_id: args.agent_id,
        model_candidates: child_agent_cfg.model_candidates,
        start_candidate_offset: None,
        sandbox: child_sandbox,
        depth: depth + 1,
        task_id: Some(task_id),
        messages,
    })
    .await;

    match outcome {
        Ok(value) => json!({ "result": value }),
        Err(message) => json!({ "error": message }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PLMutex;
    use rb_domain::config::{AgentConfig as DomainAgentConfig, AgentLimits, FsPolicyConfig, ToolPolicyConfig};
    use rb_rpc::persistence::InMemoryPersistence;
    use rb_tools::guard::GuardConfig;
    use rb_tools::plugin::{PluginHostError, PluginToolHost};

    struct ScriptedLlmStream {
        id: String,
        steps: PLMutex<VecDeque<Vec<StreamChunk>>>,
    }

    impl ScriptedLlmStream {
        fn new(steps: Vec<Vec<StreamChunk>>) -> Self {
            Self { id: "scripted".into(), steps: PLMutex::new(steps.into()) }
        }
    }

    #[async_trait::async_trait]
    impl LlmStream for ScriptedLlmStream {
        async fn chat_stream(&self, _request: ChatRequest) -> rb_rpc::llm::LlmResult<rb_domain::stream::BoxStream<'static, StreamChunk>> {
            let chunks = self.steps.lock().pop_front().unwrap_or_default();
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }
        fn stream_id(&self) -> &str {
            &self.id
        }
    }

    struct NoopPluginHost;

    #[async_trait::async_trait]
    impl PluginToolHost for NoopPluginHost {
        async fn invoke(&self, _call: PluginToolCall) -> Result<Value, PluginHostError> {
            Ok(json!({}))
        }
    }

    fn domain_agent_cfg(agent_id: &str, model: &str, max_spawn_depth: u32) -> DomainAgentConfig {
        DomainAgentConfig {
            agent_id: agent_id.into(),
            system_prompt: "you are a test agent".into(),
            model_candidates: vec![model.into()],
            tool_policy: ToolPolicyConfig::default(),
            fs_policy: FsPolicyConfig::default(),
            limits: AgentLimits { max_turns: 5, max_spawn_depth, timeout_ms: 5_000 },
            leaf_deny: vec![],
        }
    }

    fn runtime_with(llm: ScriptedLlmStream, rpc: InMemoryPersistence) -> (Arc<AgentRuntime>, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let guard = Arc::new(PluginExecutionGuard::new(GuardConfig::default(), Arc::new(NoopPluginHost)));
        let runtime = Arc::new(AgentRuntime::new(Arc::new(rpc), Arc::new(llm), guard, vec![], dir.path().to_path_buf()));
        (runtime, dir)
    }

    fn test_broker() -> crate::broker::RunBroker {
        crate::broker::RunBroker::new(rb_domain::config::BrokerConfig {
            run_event_buffer_size: 200,
            run_retention_ms: 60_000,
            run_store_cleanup_interval_ms: 30_000,
            run_idempotency_ttl_ms: 60_000,
        })
    }

    fn run_params() -> RunParams {
        RunParams {
            session_id: "s1".into(),
            workspace_id: "ws1".into(),
            user_request: "say hello".into(),
            coordinator_agent_id: "coord".into(),
            start_candidate_offset: None,
            resume_messages: None,
        }
    }

    /// Starts `run_coordinator` against `runtime` on a fresh broker entry
    /// and drains every envelope until `done`, returning them in order.
    async fn drive_to_completion(
        broker: &crate::broker::RunBroker,
        runtime: Arc<AgentRuntime>,
        params: RunParams,
    ) -> (Uuid, Vec<EventPayload>) {
        let (run_id, _) = broker.create_runtime_run(params, None, "fp".into(), |_| async { Ok(()) }).await.unwrap();
        let crate::broker::Subscription { receiver: mut rx, handle: _handle, .. } = broker.subscribe(run_id, 0).unwrap();
        broker.start_run(run_id, move |params, emitter| run_coordinator(runtime, params, emitter)).unwrap();

        let mut payloads = Vec::new();
        while let Some(env) = rx.recv().await {
            let done = env.payload.is_done();
            payloads.push(env.payload);
            if done {
                break;
            }
        }
        (run_id, payloads)
    }

    #[tokio::test]
    async fn text_only_turn_emits_no_tool_events_and_completes() {
        let rpc = InMemoryPersistence::new();
        rpc.seed_agent(domain_agent_cfg("coord", "model-a", 0));

        let llm = ScriptedLlmStream::new(vec![vec![
            StreamChunk::TextDelta { delta: "hello".into() },
            StreamChunk::Done {
                usage: Some(Usage { prompt_tokens: 3, completion_tokens: 2, total_tokens: 5 }),
                finish_reason: Some("stop".into()),
            },
        ]]);
        let (runtime, _dir) = runtime_with(llm, rpc);

        let broker = test_broker();
        let (run_id, payloads) = drive_to_completion(&broker, runtime, run_params()).await;

        assert!(payloads.iter().any(|p| matches!(p, EventPayload::TextDelta { .. })));
        assert!(!payloads.iter().any(|p| matches!(p, EventPayload::ToolCall { .. } | EventPayload::ToolResult { .. })));
        assert_eq!(broker.get_snapshot(run_id).unwrap().state, crate::run::RunState::Completed);
    }

    #[tokio::test]
    async fn tool_call_step_executes_fs_write_then_final_step_answers() {
        let rpc = InMemoryPersistence::new();
        rpc.seed_agent(domain_agent_cfg("coord", "model-a", 0));

        let llm = ScriptedLlmStream::new(vec![
            vec![
                StreamChunk::ToolCall {
                    call_id: None,
                    tool_name: "fs_write".into(),
                    arguments: json!({"path": "note.txt", "content": "hi"}),
                },
                StreamChunk::Done { usage: None, finish_reason: Some("tool_calls".into()) },
            ],
            vec![
                StreamChunk::TextDelta { delta: "done".into() },
                StreamChunk::Done {
                    usage: Some(Usage { prompt_tokens: 1, completion_tokens: 1, total_tokens: 2 }),
                    finish_reason: Some("stop".into()),
                },
            ],
        ]);
        let (runtime, dir) = runtime_with(llm, rpc);

        let broker = test_broker();
        let (run_id, payloads) = drive_to_completion(&broker, runtime, run_params()).await;

        assert!(payloads.iter().any(|p| matches!(p, EventPayload::ToolCall { tool_name, .. } if tool_name == "fs_write")));
        assert!(payloads.iter().any(|p| matches!(p, EventPayload::ToolResult { tool_name, .. } if tool_name == "fs_write")));
        assert_eq!(broker.get_snapshot(run_id).unwrap().state, crate::run::RunState::Completed);
        assert!(dir.path().join("note.txt").exists());
    }

    #[tokio::test]
    async fn delegation_beyond_max_spawn_depth_returns_structured_error_without_creating_task() {
        let rpc = InMemoryPersistence::new();
        rpc.seed_agent(domain_agent_cfg("coord", "model-a", 1));
        rpc.seed_agent(domain_agent_cfg("sub", "model-a", 1));

        let llm = ScriptedLlmStream::new(vec![
            // coordinator delegates once (depth 0 -> 1, allowed)
            vec![
                StreamChunk::ToolCall {
                    call_id: None,
                    tool_name: DELEGATE_TO_AGENT.into(),
                    arguments: json!({"agentId": "sub", "instruction": "nested work"}),
                },
                StreamChunk::Done { usage: None, finish_reason: Some("tool_calls".into()) },
            ],
            // the delegated sub-agent immediately tries to delegate again (depth 1, denied)
            vec![
                StreamChunk::ToolCall {
                    call_id: None,
                    tool_name: DELEGATE_TO_AGENT.into(),
                    arguments: json!({"agentId": "sub", "instruction": "go deeper"}),
                },
                StreamChunk::Done { usage: None, finish_reason: Some("tool_calls".into()) },
            ],
            // sub-agent's final answer after its delegate attempt is rejected
            vec![
                StreamChunk::TextDelta { delta: "gave up".into() },
                StreamChunk::Done { usage: None, finish_reason: Some("stop".into()) },
            ],
            // coordinator's final answer after its own delegation resolves
            vec![
                StreamChunk::TextDelta { delta: "finished".into() },
                StreamChunk::Done { usage: None, finish_reason: Some("stop".into()) },
            ],
        ]);
        let (runtime, _dir) = runtime_with(llm, rpc);

        let broker = test_broker();
        let (run_id, payloads) = drive_to_completion(&broker, runtime, run_params()).await;

        assert_eq!(broker.get_snapshot(run_id).unwrap().state, crate::run::RunState::Completed);
        assert!(payloads.iter().any(|p| matches!(
            p,
            EventPayload::ToolResult { tool_name, result, .. }
                if tool_name == DELEGATE_TO_AGENT && result.get("error").map(|e| e.as_str().unwrap_or("").contains("Max spawn depth")).unwrap_or(false)
        )));
    }

    struct CapturingLlmStream {
        id: String,
        last_request: PLMutex<Option<ChatRequest>>,
    }

    #[async_trait::async_trait]
    impl LlmStream for CapturingLlmStream {
        async fn chat_stream(&self, request: ChatRequest) -> rb_rpc::llm::LlmResult<rb_domain::stream::BoxStream<'static, StreamChunk>> {
            *self.last_request.lock() = Some(request);
            let chunks = vec![
                StreamChunk::TextDelta { delta: "ok".into() },
                StreamChunk::Done { usage: None, finish_reason: Some("stop".into()) },
            ];
            Ok(Box::pin(futures_util::stream::iter(chunks)))
        }
        fn stream_id(&self) -> &str {
            &self.id
        }
    }

    #[tokio::test]
    async fn resume_messages_are_spliced_between_system_prompt_and_user_request() {
        let rpc = InMemoryPersistence::new();
        rpc.seed_agent(domain_agent_cfg("coord", "model-a", 0));

        let dir = tempfile::tempdir().unwrap();
        let guard = Arc::new(PluginExecutionGuard::new(GuardConfig::default(), Arc::new(NoopPluginHost)));
        let llm = Arc::new(CapturingLlmStream { id: "capture".into(), last_request: PLMutex::new(None) });
        let runtime = Arc::new(AgentRuntime::new(Arc::new(rpc), llm.clone(), guard, vec![], dir.path().to_path_buf()));

        let mut params = run_params();
        params.resume_messages = Some(vec![
            Message::user("earlier question"),
            Message::assistant("earlier answer"),
        ]);

        let broker = test_broker();
        drive_to_completion(&broker, runtime, params).await;

        let request = llm.last_request.lock().clone().expect("llm was called");
        assert_eq!(request.messages.len(), 4, "system + 2 resumed + fresh user request");
        assert!(matches!(request.messages[0].role, Role::System));
        assert_eq!(request.messages[1].content.extract_all_text(), "earlier question");
        assert_eq!(request.messages[2].content.extract_all_text(), "earlier answer");
        assert_eq!(request.messages[3].content.extract_all_text(), "say hello");
        assert!(matches!(request.messages[3].role, Role::User));
    }
}
