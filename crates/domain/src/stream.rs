use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for LLM streaming responses.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Chunks emitted by an `LLMStream` implementation while a coordinator or
/// executor drives one model turn. This is the internal vocabulary the
/// Coordinator/Executor Loop consumes — distinct from the broker's outward
/// `EventPayload`, which the loop derives from these chunks plus its own
/// bookkeeping (message-start/end, agent-switch, task lifecycle).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type")]
pub enum StreamChunk {
    #[serde(rename = "text-delta")]
    TextDelta { delta: String },

    #[serde(rename = "reasoning")]
    Reasoning { text: String },

    #[serde(rename = "reasoning-delta")]
    ReasoningDelta { delta: String },

    /// A tool invocation requested by the model. `call_id` may be absent;
    /// the loop assigns one and tracks it in a per-tool-name FIFO queue.
    #[serde(rename = "tool-call")]
    ToolCall {
        call_id: Option<String>,
        tool_name: String,
        arguments: serde_json::Value,
    },

    /// The result of a previously requested tool call. `call_id` may be
    /// absent, in which case the loop re-attaches the FIFO head for
    /// `tool_name`.
    #[serde(rename = "tool-result")]
    ToolResult {
        call_id: Option<String>,
        tool_name: String,
        result: serde_json::Value,
    },

    #[serde(rename = "error")]
    Error { message: String },

    #[serde(rename = "done")]
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },
}

/// Token usage for a completion.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default)]
pub struct Usage {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
}

impl Usage {
    pub fn combine(self, other: Usage) -> Usage {
        Usage {
            prompt_tokens: self.prompt_tokens + other.prompt_tokens,
            completion_tokens: self.completion_tokens + other.completion_tokens,
            total_tokens: self.total_tokens + other.total_tokens,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn usage_combine_sums_fields() {
        let a = Usage { prompt_tokens: 10, completion_tokens: 5, total_tokens: 15 };
        let b = Usage { prompt_tokens: 2, completion_tokens: 3, total_tokens: 5 };
        let c = a.combine(b);
        assert_eq!(c.prompt_tokens, 12);
        assert_eq!(c.completion_tokens, 8);
        assert_eq!(c.total_tokens, 20);
    }
}
