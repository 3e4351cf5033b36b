//! An `LlmStream` backed by an OpenAI-compatible chat-completions endpoint.
//! The only implementation the Run Broker's coordinator ever drives in
//! production; tests drive `FakeLlmStream` instead.

use std::collections::HashMap;
use std::time::Duration;

use rb_domain::stream::{BoxStream, StreamChunk, Usage};
use rb_domain::tool::{ContentPart, Message, MessageContent, Role, ToolDefinition};
use rb_rpc::llm::{ChatRequest, LlmError, LlmResult, LlmStream};
use serde_json::{json, Value};

pub struct HttpLlmStream {
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
    id: String,
}

impl HttpLlmStream {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let base_url = base_url.into();
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(120))
            .build()
            .expect("reqwest client");
        let id = base_url.clone();
        Self { base_url, api_key, client, id }
    }

    fn endpoint(&self) -> String {
        format!("{}/chat/completions", self.base_url.trim_end_matches('/'))
    }
}

#[async_trait::async_trait]
impl LlmStream for HttpLlmStream {
    async fn chat_stream(&self, request: ChatRequest) -> LlmResult<BoxStream<'static, StreamChunk>> {
        let body = build_chat_body(&request);

        let mut req = self.client.post(self.endpoint()).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let response = req
            .send()
            .await
            .map_err(|e| LlmError::Upstream(format!("request failed: {e}")))?;

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Upstream(format!("upstream returned {status}: {text}")));
        }

        Ok(sse_chunk_stream(response))
    }

    fn stream_id(&self) -> &str {
        &self.id
    }
}

fn build_chat_body(request: &ChatRequest) -> Value {
    let messages: Vec<Value> = request.messages.iter().map(message_to_openai).collect();

    let mut body = json!({
        "model": request.model,
        "messages": messages,
        "stream": true,
    });

    if !request.tools.is_empty() {
        let tools: Vec<Value> = request.tools.iter().map(tool_to_openai).collect();
        body["tools"] = json!(tools);
    }
    if let Some(temperature) = request.temperature {
        body["temperature"] = json!(temperature);
    }
    if let Some(max_tokens) = request.max_tokens {
        body["max_tokens"] = json!(max_tokens);
    }

    body
}

fn role_to_str(role: Role) -> &'static str {
    match role {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

fn message_to_openai(message: &Message) -> Value {
    match &message.content {
        MessageContent::Text(text) => json!({
            "role": role_to_str(message.role),
            "content": text,
        }),
        MessageContent::Parts(parts) => match message.role {
            Role::Assistant => assistant_parts_to_openai(parts),
            Role::Tool => tool_result_parts_to_openai(parts),
            _ => json!({
                "role": role_to_str(message.role),
                "content": MessageContent::Parts(parts.clone()).extract_all_text(),
            }),
        },
    }
}

fn assistant_parts_to_openai(parts: &[ContentPart]) -> Value {
    let text: String = parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::Text { text } => Some(text.as_str()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("\n");

    let tool_calls: Vec<Value> = parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::ToolUse { id, name, input } => Some(json!({
                "id": id,
                "type": "function",
                "function": {
                    "name": name,
                    "arguments": input.to_string(),
                },
            })),
            _ => None,
        })
        .collect();

    let mut msg = json!({ "role": "assistant" });
    if !text.is_empty() {
        msg["content"] = json!(text);
    } else {
        msg["content"] = Value::Null;
    }
    if !tool_calls.is_empty() {
        msg["tool_calls"] = json!(tool_calls);
    }
    msg
}

fn tool_result_parts_to_openai(parts: &[ContentPart]) -> Value {
    // A tool-result message carries exactly one part in practice (see
    // `Message::tool_result`); fold defensively if more ever appear.
    let (tool_call_id, content) = parts
        .iter()
        .find_map(|p| match p {
            ContentPart::ToolResult { tool_use_id, content, .. } => Some((tool_use_id.clone(), content.clone())),
            _ => None,
        })
        .unwrap_or_default();

    json!({
        "role": "tool",
        "tool_call_id": tool_call_id,
        "content": content,
    })
}

fn tool_to_openai(tool: &ToolDefinition) -> Value {
    json!({
        "type": "function",
        "function": {
            "name": tool.name,
            "description": tool.description,
            "parameters": tool.parameters,
        },
    })
}

/// Accumulates per-index tool-call argument fragments across SSE deltas; the
/// upstream splits a tool call into a start event (id + name) followed by a
/// run of argument-string fragments keyed by array index, not call id.
#[derive(Default)]
struct PendingToolCall {
    call_id: Option<String>,
    tool_name: String,
    arguments: String,
}

fn sse_chunk_stream(response: reqwest::Response) -> BoxStream<'static, StreamChunk> {
    let stream = async_stream::stream! {
        let mut response = response;
        let mut buffer = String::new();
        let mut pending: HashMap<u64, PendingToolCall> = HashMap::new();
        let mut done_emitted = false;

        loop {
            let chunk = match response.chunk().await {
                Ok(Some(bytes)) => bytes,
                Ok(None) => break,
                Err(e) => {
                    yield StreamChunk::Error { message: format!("stream read failed: {e}") };
                    return;
                }
            };
            buffer.push_str(&String::from_utf8_lossy(&chunk));

            for data in drain_data_lines(&mut buffer) {
                for out in parse_sse_data(&data, &mut pending) {
                    if matches!(out, StreamChunk::Done { .. }) {
                        done_emitted = true;
                    }
                    yield out;
                }
            }
        }

        for data in drain_data_lines(&mut buffer) {
            for out in parse_sse_data(&data, &mut pending) {
                if matches!(out, StreamChunk::Done { .. }) {
                    done_emitted = true;
                }
                yield out;
            }
        }

        if !done_emitted {
            yield StreamChunk::Done { usage: None, finish_reason: None };
        }
    };

    Box::pin(stream)
}

/// Splits a byte buffer on `\n\n`, extracting the `data:` payload from each
/// complete SSE event and leaving any trailing partial event in `buffer`.
fn drain_data_lines(buffer: &mut String) -> Vec<String> {
    let mut out = Vec::new();
    loop {
        let Some(boundary) = buffer.find("\n\n") else { break };
        let event: String = buffer.drain(..boundary + 2).collect();
        for line in event.lines() {
            if let Some(data) = line.strip_prefix("data:") {
                out.push(data.trim().to_string());
            }
        }
    }
    out
}

fn parse_sse_data(data: &str, pending: &mut HashMap<u64, PendingToolCall>) -> Vec<StreamChunk> {
    if data == "[DONE]" {
        return vec![StreamChunk::Done { usage: None, finish_reason: None }];
    }

    let parsed: Value = match serde_json::from_str(data) {
        Ok(v) => v,
        Err(e) => return vec![StreamChunk::Error { message: format!("malformed SSE payload: {e}") }],
    };

    let mut out = Vec::new();

    let usage = parsed.get("usage").and_then(parse_usage);

    let Some(choice) = parsed.get("choices").and_then(|c| c.as_array()).and_then(|a| a.first()) else {
        if let Some(usage) = usage {
            out.push(StreamChunk::Done { usage: Some(usage), finish_reason: None });
        }
        return out;
    };

    let delta = choice.get("delta");
    let finish_reason = choice.get("finish_reason").and_then(|v| v.as_str()).map(str::to_owned);

    if let Some(text) = delta.and_then(|d| d.get("content")).and_then(|v| v.as_str()) {
        if !text.is_empty() {
            out.push(StreamChunk::TextDelta { delta: text.to_owned() });
        }
    }

    if let Some(text) = delta.and_then(|d| d.get("reasoning_content")).and_then(|v| v.as_str()) {
        if !text.is_empty() {
            out.push(StreamChunk::ReasoningDelta { delta: text.to_owned() });
        }
    }

    if let Some(tool_calls) = delta.and_then(|d| d.get("tool_calls")).and_then(|v| v.as_array()) {
        for tc in tool_calls {
            let index = tc.get("index").and_then(|v| v.as_u64()).unwrap_or(0);
            let entry = pending.entry(index).or_default();

            if let Some(id) = tc.get("id").and_then(|v| v.as_str()) {
                entry.call_id = Some(id.to_owned());
            }
            if let Some(name) = tc.get("function").and_then(|f| f.get("name")).and_then(|v| v.as_str()) {
                entry.tool_name = name.to_owned();
            }
            if let Some(args) = tc.get("function").and_then(|f| f.get("arguments")).and_then(|v| v.as_str()) {
                entry.arguments.push_str(args);
            }
        }
    }

    if let Some(reason) = finish_reason {
        if reason == "tool_calls" {
            for (_, call) in pending.drain() {
                let arguments: Value = serde_json::from_str(&call.arguments).unwrap_or_else(|_| json!({}));
                out.push(StreamChunk::ToolCall {
                    call_id: call.call_id,
                    tool_name: call.tool_name,
                    arguments,
                });
            }
        }
        out.push(StreamChunk::Done { usage, finish_reason: Some(reason) });
    } else if let Some(usage) = usage {
        out.push(StreamChunk::Done { usage: Some(usage), finish_reason: None });
    }

    out
}

fn parse_usage(value: &Value) -> Option<Usage> {
    Some(Usage {
        prompt_tokens: value.get("prompt_tokens")?.as_u64().unwrap_or(0),
        completion_tokens: value.get("completion_tokens")?.as_u64().unwrap_or(0),
        total_tokens: value.get("total_tokens")?.as_u64().unwrap_or(0),
    })
}
