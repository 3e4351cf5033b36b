//! The Run Broker: owns run lifecycle, event fan-out, and the Coordinator/
//! Executor Loop that drives an agent's turn against an `LlmStream`.

pub mod broker;
pub mod coordinator;
pub mod run;
pub mod task;

pub use broker::{RunBroker, RunEmitter, Subscription, SubscriptionHandle};
pub use coordinator::{run_coordinator, AgentRuntime};
pub use run::{IdempotencyEntry, RunEntry, RunParams, RunSnapshot, RunState, StoredEvent};
pub use task::DelegateArgs;
