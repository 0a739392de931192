//! Agents: a model binding, instruction text, tools and a memory handle
//!
//! This module provides:
//! - **AgentConfig**: immutable, validated construction parameters
//! - **Agent**: buffered (`generate_text`) and streaming (`stream_text`) entry points
//! - **AgentHost**: the set of named agents built once at startup
//! - **roster**: the supervisor, its three workers and the standalone assistant
//!
//! # Example
//!
//! ```rust,ignore
//! use agentrelay::agent::{Agent, AgentConfig, AgentRequest};
//! use agentrelay::llm::{ModelBinding, ScriptedModel};
//! use agentrelay::tools::builtin;
//! use std::sync::Arc;
//!
//! let config = AgentConfig::builder("UppercaseAgent")
//!     .instructions("Use the uppercase tool.")
//!     .model(ModelBinding::new(Arc::new(ScriptedModel::new()), "gpt-4o-mini"))
//!     .tool(builtin::uppercase())
//!     .build()?;
//! let agent = Agent::new(config);
//! let reply = agent.generate_text(AgentRequest::new("hello world")).await?;
//! ```

pub mod types;
pub mod stream;
mod dispatch;
mod host;
pub mod roster;

pub use types::{conversation_key, Role, Message, AgentName, ConversationId, MessageId, AgentRequest, AgentReply, ToolInvocation};
pub use stream::{StreamPart, TextStream, GENERIC_FAILURE};
pub use dispatch::DispatchState;
pub use host::{AgentHost, AgentSummary};

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{error, instrument};
use crate::error::{RelayError, RelayResult};
use crate::llm::ModelBinding;
use crate::memory::MemoryStore;
use crate::tools::{Tool, ToolRegistry};
use dispatch::Dispatch;
use stream::Sink;

/// Default cap on model planning rounds per request
pub const DEFAULT_MAX_ROUNDS: usize = 8;

/// Default time budget for a single tool call
pub const DEFAULT_TOOL_TIMEOUT: Duration = Duration::from_secs(10);

const STREAM_BUFFER: usize = 64;

/// What to do when the model answers without using some of its tools
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ToolPolicy {
    /// Accept whatever the model did
    #[default]
    TrustModel,
    /// Run every tool the model skipped, in registration order, with the
    /// user message as `text`, then let the model answer again
    RequireAll,
}

/// Construction parameters for an agent. Immutable once built.
#[derive(Clone)]
pub struct AgentConfig {
    pub name: AgentName,
    pub instructions: String,
    pub model: ModelBinding,
    pub tools: ToolRegistry,
    pub memory: Option<Arc<dyn MemoryStore>>,
    pub policy: ToolPolicy,
    pub max_rounds: usize,
    pub tool_timeout: Duration,
}

impl AgentConfig {
    pub fn builder(name: &str) -> AgentConfigBuilder {
        AgentConfigBuilder {
            name: name.to_string(),
            instructions: None,
            model: None,
            tools: Vec::new(),
            memory: None,
            policy: ToolPolicy::default(),
            max_rounds: DEFAULT_MAX_ROUNDS,
            tool_timeout: DEFAULT_TOOL_TIMEOUT,
        }
    }
}

impl std::fmt::Debug for AgentConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentConfig")
            .field("name", &self.name)
            .field("model", &self.model)
            .field("tools", &self.tools)
            .field("memory", &self.memory.as_ref().map(|m| m.backing()))
            .field("policy", &self.policy)
            .field("max_rounds", &self.max_rounds)
            .finish()
    }
}

pub struct AgentConfigBuilder {
    name: String,
    instructions: Option<String>,
    model: Option<ModelBinding>,
    tools: Vec<Arc<dyn Tool>>,
    memory: Option<Arc<dyn MemoryStore>>,
    policy: ToolPolicy,
    max_rounds: usize,
    tool_timeout: Duration,
}

impl AgentConfigBuilder {
    pub fn instructions(mut self, instructions: impl Into<String>) -> Self {
        self.instructions = Some(instructions.into());
        self
    }

    pub fn model(mut self, model: ModelBinding) -> Self {
        self.model = Some(model);
        self
    }

    pub fn tool(mut self, tool: Arc<dyn Tool>) -> Self {
        self.tools.push(tool);
        self
    }

    pub fn tools(mut self, tools: impl IntoIterator<Item = Arc<dyn Tool>>) -> Self {
        self.tools.extend(tools);
        self
    }

    pub fn memory(mut self, memory: Arc<dyn MemoryStore>) -> Self {
        self.memory = Some(memory);
        self
    }

    pub fn policy(mut self, policy: ToolPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn max_rounds(mut self, max_rounds: usize) -> Self {
        self.max_rounds = max_rounds;
        self
    }

    pub fn tool_timeout(mut self, timeout: Duration) -> Self {
        self.tool_timeout = timeout;
        self
    }

    pub fn build(self) -> RelayResult<AgentConfig> {
        if self.name.trim().is_empty() {
            return Err(RelayError::Configuration("agent name must not be empty".to_string()));
        }
        let instructions = self
            .instructions
            .filter(|i| !i.trim().is_empty())
            .ok_or_else(|| RelayError::Configuration(format!("agent '{}' has no instructions", self.name)))?;
        let model = self
            .model
            .ok_or_else(|| RelayError::Configuration(format!("agent '{}' has no model binding", self.name)))?;
        if self.max_rounds == 0 {
            return Err(RelayError::Configuration(format!("agent '{}' needs at least one round", self.name)));
        }
        if self.tool_timeout.is_zero() {
            return Err(RelayError::Configuration(format!("agent '{}' has a zero tool timeout", self.name)));
        }

        let mut tools = ToolRegistry::new();
        for tool in self.tools {
            tools.register(tool)?;
        }
        if self.policy == ToolPolicy::RequireAll && tools.is_empty() {
            return Err(RelayError::Configuration(format!(
                "agent '{}' requires all tools but has none",
                self.name
            )));
        }

        Ok(AgentConfig {
            name: self.name,
            instructions,
            model,
            tools,
            memory: self.memory,
            policy: self.policy,
            max_rounds: self.max_rounds,
            tool_timeout: self.tool_timeout,
        })
    }
}

/// A configured agent, shared read-only across requests
#[derive(Debug)]
pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn config(&self) -> &AgentConfig {
        &self.config
    }

    /// Run the request to completion and return the final text
    #[instrument(skip(self, request), fields(agent = %self.config.name))]
    pub async fn generate_text(&self, request: AgentRequest) -> RelayResult<AgentReply> {
        let mut sink = Sink::Buffered;
        Dispatch::new(&self.config, request).run(&mut sink).await
    }

    /// Start generation in the background and return its parts as they arrive.
    ///
    /// The first part is either `Start` or, when generation fails before
    /// producing anything, a lone `Error`. A failure after output has begun
    /// ends the stream with an `Error` part. Dropping the stream stops
    /// generation at the next emitted part.
    pub fn stream_text(self: &Arc<Self>, request: AgentRequest) -> TextStream {
        let (tx, rx) = mpsc::channel(STREAM_BUFFER);
        let agent = Arc::clone(self);
        tokio::spawn(async move {
            let mut sink = Sink::streaming(tx);
            let result = Dispatch::new(&agent.config, request).run(&mut sink).await;
            match result {
                Ok(_) | Err(RelayError::Cancelled) => {}
                Err(e) => {
                    error!(agent = %agent.config.name, started = sink.has_started(), "stream failed: {}", e);
                    sink.fail().await;
                }
            }
        });
        ReceiverStream::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::tools::builtin;

    fn binding() -> ModelBinding {
        ModelBinding::new(Arc::new(ScriptedModel::new()), "gpt-4o-mini")
    }

    #[test]
    fn test_builder_validates() {
        assert!(AgentConfig::builder("").instructions("x").model(binding()).build().is_err());
        assert!(AgentConfig::builder("a").model(binding()).build().is_err());
        assert!(AgentConfig::builder("a").instructions("x").build().is_err());
        assert!(AgentConfig::builder("a").instructions("x").model(binding()).max_rounds(0).build().is_err());
        assert!(AgentConfig::builder("a")
            .instructions("x")
            .model(binding())
            .policy(ToolPolicy::RequireAll)
            .build()
            .is_err());

        let err = AgentConfig::builder("a")
            .instructions("x")
            .model(binding())
            .tool(builtin::uppercase())
            .tool(builtin::uppercase())
            .build()
            .unwrap_err();
        assert!(matches!(err, RelayError::DuplicateTool(_)));
    }

    #[test]
    fn test_builder_keeps_tool_order() {
        let config = AgentConfig::builder("Supervisor")
            .instructions("use them all")
            .model(binding())
            .tools([builtin::uppercase(), builtin::count_words(), builtin::write_story()])
            .policy(ToolPolicy::RequireAll)
            .build()
            .unwrap();
        assert_eq!(config.tools.names(), vec!["uppercase", "countWords", "writeStory"]);
        assert_eq!(config.max_rounds, DEFAULT_MAX_ROUNDS);
    }
}
