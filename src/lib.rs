//! agentrelay: an HTTP relay between chat clients and tool-using agents.
//!
//! This library provides:
//! - Agents with instructions, a model binding, tools and conversation memory
//! - A bounded planning loop that invokes tools the model asks for
//! - Volatile and fjall-backed conversation memory
//! - An OpenAI-compatible model client and a scripted offline model
//! - Buffered and streaming HTTP endpoints
//!
//! # Example
//!
//! ```rust,ignore
//! use agentrelay::{AgentRelay, Config};
//! use agentrelay::agent::AgentRequest;
//!
//! let relay = AgentRelay::start(Config::default())?;
//! let reply = relay.chat_agent()?.generate_text(AgentRequest::new("hello world")).await?;
//! println!("{}", reply.text);
//! ```

pub mod agent;
pub mod error;
pub mod llm;
pub mod memory;
pub mod tools;
#[cfg(feature = "persistent")]
pub mod core;
#[cfg(feature = "server")]
pub mod server;

pub use crate::agent::{Agent, AgentConfig, AgentHost, AgentReply, AgentRequest, StreamPart, ToolPolicy};
pub use crate::error::{RelayError, RelayResult};
pub use crate::llm::{LanguageModel, ModelBinding, ProviderConfig, ScriptedModel};
pub use crate::memory::{MemoryBacking, MemoryStore};
pub use crate::tools::{Tool, ToolDefinition, ToolRegistry};

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Configuration for the relay
#[derive(Debug, Clone)]
pub struct Config {
    pub data_dir: PathBuf,
    /// Backing shared by the supervisor and its workers
    pub memory: MemoryBacking,
    /// Turn limit of the assistant's private memory
    pub chat_capacity: usize,
    pub provider: ProviderConfig,
    pub worker_model: String,
    pub assistant_model: String,
    /// Agent behind `POST /api/chat`
    pub chat_agent: String,
    pub max_rounds: usize,
    pub tool_timeout: Duration,
}

impl Default for Config {
    fn default() -> Self {
        let data_dir = PathBuf::from("./data");
        Self {
            memory: MemoryBacking::Persistent { path: data_dir.join("memory") },
            data_dir,
            chat_capacity: memory::DEFAULT_CAPACITY,
            provider: ProviderConfig::default(),
            worker_model: "gpt-4o-mini".to_string(),
            assistant_model: "gpt-4o".to_string(),
            chat_agent: agent::roster::SUPERVISOR.to_string(),
            max_rounds: agent::DEFAULT_MAX_ROUNDS,
            tool_timeout: agent::DEFAULT_TOOL_TIMEOUT,
        }
    }
}

/// Everything built once at startup: the provider, the memory stores and
/// the agent roster. Shared behind an `Arc` by request handlers.
pub struct AgentRelay {
    config: Config,
    memory: Arc<dyn MemoryStore>,
    host: AgentHost,
}

impl std::fmt::Debug for AgentRelay {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AgentRelay")
            .field("config", &self.config)
            .field("memory", &self.memory.backing())
            .field("host", &self.host)
            .finish()
    }
}

impl AgentRelay {
    /// Build the relay with the provider named in `config`
    pub fn start(config: Config) -> RelayResult<Self> {
        let provider = config.provider.build()?;
        Self::with_provider(config, provider)
    }

    /// Build the relay against an already constructed provider
    pub fn with_provider(config: Config, provider: Arc<dyn LanguageModel>) -> RelayResult<Self> {
        let memory = config.memory.open()?;
        info!(backing = memory.backing(), "opened shared memory");
        let host = agent::roster::build_roster(&config, provider, Arc::clone(&memory))?;
        // Fail at startup rather than on the first request
        host.get(&config.chat_agent)?;
        info!(agents = host.len(), chat_agent = %config.chat_agent, "agent relay started");
        Ok(Self { config, memory, host })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn host(&self) -> &AgentHost {
        &self.host
    }

    /// Store shared by the supervisor and the workers
    pub fn memory(&self) -> &Arc<dyn MemoryStore> {
        &self.memory
    }

    pub fn chat_agent(&self) -> RelayResult<Arc<Agent>> {
        self.host.get(&self.config.chat_agent)
    }
}
