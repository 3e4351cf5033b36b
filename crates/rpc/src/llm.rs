//! The model-call boundary. The Coordinator/Executor Loop drives one model
//! turn at a time through an `LlmStream` implementation and only ever sees
//! `StreamChunk`s — it has no idea whether the call landed on a real
//! provider, a local model server, or (in tests) a scripted fixture.

use rb_domain::stream::BoxStream;
use rb_domain::stream::StreamChunk;
use rb_domain::tool::{Message, ToolDefinition};

#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub model: String,
    pub messages: Vec<Message>,
    pub tools: Vec<ToolDefinition>,
    pub temperature: Option<f32>,
    pub max_tokens: Option<u32>,
}

#[derive(thiserror::Error, Debug)]
pub enum LlmError {
    #[error("model candidate exhausted: {0}")]
    Exhausted(String),
    #[error("upstream: {0}")]
    Upstream(String),
}

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// A streaming chat completion source. One call == one model turn.
///
/// Implementations are expected to be cheap to clone/share (`Arc`-wrapped by
/// callers) since the Coordinator/Executor Loop holds one per run and may
/// retry against the next model candidate in `model_candidates` on failure.
#[async_trait::async_trait]
pub trait LlmStream: Send + Sync {
    async fn chat_stream(&self, request: ChatRequest) -> LlmResult<BoxStream<'static, StreamChunk>>;

    /// Identifies this backend in logs and error messages (e.g. the model
    /// name or provider id), not necessarily unique across instances.
    fn stream_id(&self) -> &str;
}

/// A scripted `LlmStream` for tests: replays a fixed chunk sequence,
/// ignoring the request entirely.
pub struct FakeLlmStream {
    pub id: String,
    pub chunks: Vec<StreamChunk>,
}

impl FakeLlmStream {
    pub fn new(id: impl Into<String>, chunks: Vec<StreamChunk>) -> Self {
        Self { id: id.into(), chunks }
    }
}

#[async_trait::async_trait]
impl LlmStream for FakeLlmStream {
    async fn chat_stream(&self, _request: ChatRequest) -> LlmResult<BoxStream<'static, StreamChunk>> {
        let chunks = self.chunks.clone();
        let stream = async_stream::stream! {
            for chunk in chunks {
                yield chunk;
            }
        };
        Ok(Box::pin(stream))
    }

    fn stream_id(&self) -> &str {
        &self.id
    }
}
