//! The two outward RPC boundaries the Coordinator/Executor Loop depends on:
//! the model-call stream (`llm`) and the canonical data store (`persistence`).

pub mod llm;
pub mod persistence;

pub use llm::{ChatRequest, FakeLlmStream, LlmError, LlmResult, LlmStream};
pub use persistence::{
    AgentConfig, ContinueContext, CreateRunParams, CreateTaskParams, InMemoryPersistence, PersistenceRpc,
    PluginUsageEvent, RpcError, RpcResult, RunStatus, RuntimePlugin, StatusCode, TaskStatus, UsageRecord,
};
