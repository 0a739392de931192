//! Language-model bindings
//!
//! [`LanguageModel`] is the seam between agents and a provider. It has a
//! buffered `complete` entry point and an incremental `stream` entry point;
//! both may answer with text, tool-call requests, or both.

mod openai;
mod scripted;

pub use openai::OpenAiModel;
pub use scripted::ScriptedModel;

use std::pin::Pin;
use std::sync::Arc;
use async_trait::async_trait;
use futures::Stream;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use crate::error::{RelayError, RelayResult};
use crate::tools::ToolDefinition;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// A tool call requested by the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ToolCall {
    pub id: String,
    pub name: String,
    pub arguments: Value,
}

/// One entry of the context sent to the model
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::plain(ChatRole::Assistant, content)
    }

    pub fn assistant_tool_calls(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
            tool_calls,
            tool_call_id: None,
        }
    }

    pub fn tool_result(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: Some(call_id.into()),
        }
    }

    fn plain(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            tool_calls: Vec::new(),
            tool_call_id: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ModelRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub tools: Vec<ToolDefinition>,
}

/// Result of one buffered model call
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelResponse {
    pub text: String,
    pub tool_calls: Vec<ToolCall>,
    pub finish_reason: String,
}

/// Incremental output of a streaming model call
#[derive(Debug, Clone, PartialEq)]
pub enum StreamEvent {
    TextDelta(String),
    /// A fully assembled tool call
    ToolCall(ToolCall),
    Finish { finish_reason: String },
}

pub type EventStream = Pin<Box<dyn Stream<Item = RelayResult<StreamEvent>> + Send>>;

/// A language-model provider
#[async_trait]
pub trait LanguageModel: Send + Sync {
    /// Send a request and wait for the full response
    async fn complete(&self, req: ModelRequest) -> RelayResult<ModelResponse>;

    /// Send a request and receive its output incrementally
    async fn stream(&self, req: ModelRequest) -> RelayResult<EventStream>;

    fn name(&self) -> &str;
}

/// A provider plus the model id an agent talks to
#[derive(Clone)]
pub struct ModelBinding {
    pub provider: Arc<dyn LanguageModel>,
    pub model_id: String,
}

impl ModelBinding {
    pub fn new(provider: Arc<dyn LanguageModel>, model_id: impl Into<String>) -> Self {
        Self {
            provider,
            model_id: model_id.into(),
        }
    }
}

impl std::fmt::Debug for ModelBinding {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.provider.name(), self.model_id)
    }
}

/// Which provider to construct at startup
#[derive(Debug, Clone, PartialEq)]
pub enum ProviderConfig {
    OpenAi { base_url: String, api_key: Option<String> },
    Scripted,
}

impl ProviderConfig {
    pub fn build(&self) -> RelayResult<Arc<dyn LanguageModel>> {
        match self {
            ProviderConfig::OpenAi { base_url, api_key } => {
                let key = api_key.clone().filter(|k| !k.is_empty()).ok_or_else(|| {
                    RelayError::Configuration("OPENAI_API_KEY is required for the openai provider".to_string())
                })?;
                Ok(Arc::new(OpenAiModel::new(base_url.clone(), key)))
            }
            ProviderConfig::Scripted => Ok(Arc::new(ScriptedModel::new())),
        }
    }
}

impl Default for ProviderConfig {
    fn default() -> Self {
        ProviderConfig::OpenAi {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
        }
    }
}
