use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::stream::Usage;

/// A stream event decorated with `seq` and `emitted_at` by the Run Broker.
/// `seq` is strictly monotonic per run, starting at 1.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    pub seq: u64,
    pub emitted_at: DateTime<Utc>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Envelope {
    pub fn is_terminal(&self) -> bool {
        matches!(self.payload, EventPayload::Done | EventPayload::Error { .. })
    }
}

/// The closed set of SSE event variants the Coordinator/Executor Loop may
/// admit into a run's event log. Every handler over this type must be
/// exhaustive — there is no open-ended catch-all.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum EventPayload {
    #[serde(rename = "message-start")]
    MessageStart { message_id: String },

    #[serde(rename = "text-delta")]
    TextDelta { text: String, delta: String },

    #[serde(rename = "reasoning")]
    Reasoning { text: String },

    #[serde(rename = "reasoning-delta")]
    ReasoningDelta { delta: String },

    #[serde(rename = "tool-call")]
    ToolCall {
        tool_call_id: String,
        tool_name: String,
        args: Value,
    },

    #[serde(rename = "tool-result")]
    ToolResult {
        tool_call_id: String,
        tool_name: String,
        result: Value,
        status: String,
    },

    #[serde(rename = "agent-switch")]
    AgentSwitch {
        agent_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        task_id: Option<String>,
    },

    #[serde(rename = "task-progress")]
    TaskProgress { task_id: String, progress: u8 },

    #[serde(rename = "task-complete")]
    TaskComplete { task_id: String, result: Value },

    #[serde(rename = "task-failed")]
    TaskFailed { task_id: String, error: String },

    #[serde(rename = "approval-request")]
    ApprovalRequest { approval_id: String, summary: String },

    #[serde(rename = "usage")]
    Usage {
        scope: String,
        #[serde(flatten)]
        usage: Usage,
    },

    #[serde(rename = "message-end")]
    MessageEnd { message_id: String },

    #[serde(rename = "done")]
    Done,

    #[serde(rename = "error")]
    Error { message: String },
}

impl EventPayload {
    pub fn is_error(&self) -> bool {
        matches!(self, EventPayload::Error { .. })
    }

    pub fn is_done(&self) -> bool {
        matches!(self, EventPayload::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn done_and_error_are_terminal() {
        let env = Envelope {
            seq: 1,
            emitted_at: Utc::now(),
            payload: EventPayload::Done,
        };
        assert!(env.is_terminal());

        let env = Envelope {
            seq: 2,
            emitted_at: Utc::now(),
            payload: EventPayload::Error { message: "boom".into() },
        };
        assert!(env.is_terminal());
    }

    #[test]
    fn text_delta_is_not_terminal() {
        let env = Envelope {
            seq: 1,
            emitted_at: Utc::now(),
            payload: EventPayload::TextDelta { text: "hi".into(), delta: "hi".into() },
        };
        assert!(!env.is_terminal());
    }

    #[test]
    fn serializes_with_type_tag() {
        let env = Envelope {
            seq: 3,
            emitted_at: Utc::now(),
            payload: EventPayload::MessageStart { message_id: "m1".into() },
        };
        let json = serde_json::to_value(&env).unwrap();
        assert_eq!(json["type"], "message-start");
        assert_eq!(json["seq"], 3);
    }
}
