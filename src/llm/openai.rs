use std::collections::{BTreeMap, VecDeque};
use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{self, BoxStream};
use futures::{StreamExt, TryStreamExt};
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;
use crate::error::{RelayError, RelayResult};
use crate::tools::ToolDefinition;
use super::{ChatMessage, ChatRole, EventStream, LanguageModel, ModelRequest, ModelResponse, StreamEvent, ToolCall};

/// Client for OpenAI-compatible `/chat/completions` endpoints
#[derive(Debug, Clone)]
pub struct OpenAiModel {
    client: Client,
    base_url: String,
    api_key: String,
}

#[derive(Debug, Serialize)]
struct WireRequest<'a> {
    model: &'a str,
    messages: Vec<WireMessage>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tools: Vec<WireTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stream: Option<bool>,
}

#[derive(Debug, Serialize)]
struct WireMessage {
    role: ChatRole,
    content: Option<String>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<WireToolCall>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<String>,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireToolCall {
    id: String,
    #[serde(rename = "type")]
    call_type: String,
    function: WireFunctionCall,
}

#[derive(Debug, Serialize, Deserialize)]
struct WireFunctionCall {
    name: String,
    arguments: String,
}

#[derive(Debug, Serialize)]
struct WireTool<'a> {
    #[serde(rename = "type")]
    tool_type: &'static str,
    function: WireFunction<'a>,
}

#[derive(Debug, Serialize)]
struct WireFunction<'a> {
    name: &'a str,
    description: &'a str,
    parameters: &'a Value,
}

#[derive(Debug, Deserialize)]
struct WireResponse {
    choices: Vec<WireChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChoice {
    message: WireResponseMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WireResponseMessage {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCall>,
}

#[derive(Debug, Deserialize)]
struct WireChunk {
    #[serde(default)]
    choices: Vec<WireChunkChoice>,
}

#[derive(Debug, Deserialize)]
struct WireChunkChoice {
    #[serde(default)]
    delta: WireDelta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct WireDelta {
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    tool_calls: Vec<WireToolCallDelta>,
}

#[derive(Debug, Deserialize)]
struct WireToolCallDelta {
    index: usize,
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    function: Option<WireFunctionDelta>,
}

#[derive(Debug, Deserialize)]
struct WireFunctionDelta {
    #[serde(default)]
    name: Option<String>,
    #[serde(default)]
    arguments: Option<String>,
}

impl OpenAiModel {
    pub fn new(base_url: String, api_key: String) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn api_url(&self) -> String {
        if self.base_url.ends_with("/chat/completions") {
            self.base_url.clone()
        } else {
            format!("{}/chat/completions", self.base_url)
        }
    }

    async fn send(&self, req: &ModelRequest, stream: bool) -> RelayResult<reqwest::Response> {
        let body = WireRequest {
            model: &req.model,
            messages: req.messages.iter().map(to_wire_message).collect(),
            tools: req.tools.iter().map(to_wire_tool).collect(),
            stream: stream.then_some(true),
        };

        let response = self
            .client
            .post(self.api_url())
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| RelayError::Provider(format!("request failed: {}", e)))?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            return Err(RelayError::Provider(format!("{}: {}", status, error_text)));
        }
        Ok(response)
    }
}

#[async_trait]
impl LanguageModel for OpenAiModel {
    async fn complete(&self, req: ModelRequest) -> RelayResult<ModelResponse> {
        let response = self.send(&req, false).await?;
        let wire: WireResponse = response
            .json()
            .await
            .map_err(|e| RelayError::Provider(format!("invalid response: {}", e)))?;

        let choice = wire
            .choices
            .into_iter()
            .next()
            .ok_or_else(|| RelayError::Provider("response contained no choices".to_string()))?;

        Ok(ModelResponse {
            text: choice.message.content.unwrap_or_default(),
            tool_calls: choice.message.tool_calls.into_iter().map(from_wire_tool_call).collect(),
            finish_reason: choice.finish_reason.unwrap_or_else(|| "stop".to_string()),
        })
    }

    async fn stream(&self, req: ModelRequest) -> RelayResult<EventStream> {
        let response = self.send(&req, true).await?;
        let bytes = response.bytes_stream().map_err(|e| e.to_string()).boxed();
        Ok(parse_sse(bytes))
    }

    fn name(&self) -> &str {
        "openai"
    }
}

fn to_wire_message(msg: &ChatMessage) -> WireMessage {
    // Assistant turns that only carry tool calls are sent with null content
    let content = if msg.role == ChatRole::Assistant && msg.content.is_empty() && !msg.tool_calls.is_empty() {
        None
    } else {
        Some(msg.content.clone())
    };
    WireMessage {
        role: msg.role,
        content,
        tool_calls: msg
            .tool_calls
            .iter()
            .map(|call| WireToolCall {
                id: call.id.clone(),
                call_type: "function".to_string(),
                function: WireFunctionCall {
                    name: call.name.clone(),
                    arguments: call.arguments.to_string(),
                },
            })
            .collect(),
        tool_call_id: msg.tool_call_id.clone(),
    }
}

fn to_wire_tool(def: &ToolDefinition) -> WireTool<'_> {
    WireTool {
        tool_type: "function",
        function: WireFunction {
            name: &def.name,
            description: &def.description,
            parameters: &def.input_schema,
        },
    }
}

/// Unparseable argument strings are passed through as a JSON string so the
/// tool's own validation reports them back to the model.
fn parse_arguments(raw: &str) -> Value {
    if raw.trim().is_empty() {
        return Value::Object(Default::default());
    }
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}

fn from_wire_tool_call(call: WireToolCall) -> ToolCall {
    ToolCall {
        id: call.id,
        name: call.function.name,
        arguments: parse_arguments(&call.function.arguments),
    }
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: String,
    name: String,
    arguments: String,
}

struct SseState {
    inner: BoxStream<'static, Result<Bytes, String>>,
    buffer: Vec<u8>,
    pending: VecDeque<RelayResult<StreamEvent>>,
    calls: BTreeMap<usize, PartialToolCall>,
    finish_sent: bool,
    done: bool,
}

impl SseState {
    fn drain_lines(&mut self) {
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            let line = line.trim();
            let Some(data) = line.strip_prefix("data:") else {
                continue;
            };
            let data = data.trim();
            if data == "[DONE]" {
                self.finish("stop");
                self.done = true;
                return;
            }
            match serde_json::from_str::<WireChunk>(data) {
                Ok(chunk) => self.apply(chunk),
                Err(e) => {
                    self.pending
                        .push_back(Err(RelayError::Provider(format!("failed to parse stream chunk: {}", e))));
                    self.done = true;
                    return;
                }
            }
        }
    }

    fn apply(&mut self, chunk: WireChunk) {
        for choice in chunk.choices {
            if let Some(content) = choice.delta.content.filter(|c| !c.is_empty()) {
                self.pending.push_back(Ok(StreamEvent::TextDelta(content)));
            }
            for delta in choice.delta.tool_calls {
                let call = self.calls.entry(delta.index).or_default();
                if let Some(id) = delta.id {
                    call.id = id;
                }
                if let Some(function) = delta.function {
                    if let Some(name) = function.name {
                        call.name.push_str(&name);
                    }
                    if let Some(arguments) = function.arguments {
                        call.arguments.push_str(&arguments);
                    }
                }
            }
            if let Some(reason) = choice.finish_reason {
                self.finish(&reason);
            }
        }
    }

    /// Emit assembled tool calls in index order, then the finish marker
    fn finish(&mut self, reason: &str) {
        if self.finish_sent {
            return;
        }
        for (_, call) in std::mem::take(&mut self.calls) {
            debug!(tool = %call.name, "assembled streamed tool call");
            self.pending.push_back(Ok(StreamEvent::ToolCall(ToolCall {
                id: call.id,
                name: call.name,
                arguments: parse_arguments(&call.arguments),
            })));
        }
        self.pending.push_back(Ok(StreamEvent::Finish {
            finish_reason: reason.to_string(),
        }));
        self.finish_sent = true;
    }
}

/// Turn a raw SSE byte stream into [`StreamEvent`]s
fn parse_sse(inner: BoxStream<'static, Result<Bytes, String>>) -> EventStream {
    let state = SseState {
        inner,
        buffer: Vec::new(),
        pending: VecDeque::new(),
        calls: BTreeMap::new(),
        finish_sent: false,
        done: false,
    };

    Box::pin(stream::unfold(state, |mut state| async move {
        loop {
            if let Some(item) = state.pending.pop_front() {
                return Some((item, state));
            }
            if state.done {
                return None;
            }
            match state.inner.next().await {
                Some(Ok(bytes)) => {
                    state.buffer.extend_from_slice(&bytes);
                    state.drain_lines();
                }
                Some(Err(e)) => {
                    state.pending.push_back(Err(RelayError::Provider(format!("stream error: {}", e))));
                    state.done = true;
                }
                None => {
                    // A final line may arrive without its newline
                    if !state.buffer.is_empty() {
                        state.buffer.push(b'\n');
                        state.drain_lines();
                    }
                    if !state.finish_sent && !state.done {
                        state.pending.push_back(Err(RelayError::Provider(
                            "stream ended before the model finished".to_string(),
                        )));
                    }
                    state.done = true;
                }
            }
        }
    }))
}
