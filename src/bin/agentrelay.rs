//! agentrelay - chat relay for tool-using agents
//!
//! Serves the chat and agent endpoints over HTTP, or talks to an agent
//! once from the command line.

use std::io::Write;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand, ValueEnum};
use futures::StreamExt;
use tracing_subscriber::EnvFilter;
use agentrelay::agent::{conversation_key, AgentRequest, StreamPart};
use agentrelay::{AgentRelay, Config, MemoryBacking, ProviderConfig};

#[cfg(feature = "server")]
use agentrelay::server::run_server;

/// agentrelay - route chat messages to tool-using agents
#[derive(Parser)]
#[command(
    name = "agentrelay",
    author,
    version,
    about = "Route chat messages to tool-using agents with shared conversation memory",
    long_about = r#"
agentrelay hosts a supervisor agent, three single-tool workers
(uppercase, countWords, writeStory) and a standalone assistant, and
exposes them over HTTP.

Examples:
  agentrelay                              Start the HTTP server on 127.0.0.1:3000
  agentrelay serve --port 8080            Start the server on a custom port
  agentrelay chat "hello world"           Ask the chat agent once
  agentrelay chat -a WordCountAgent "the quick brown fox"
  agentrelay --provider scripted chat --stream "hi"
  agentrelay agents                       List the configured agents
  agentrelay forget -u alice 42           Drop alice's conversation 42
"#
)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Data directory for persistence
    #[arg(short, long, global = true, env = "AGENTRELAY_DATA_DIR", default_value = "./data")]
    data_dir: PathBuf,

    /// Shared memory backing: memory, memory:<capacity> or file:<path>
    /// [default: file:<data-dir>/memory]
    #[arg(short, long, global = true, env = "AGENTRELAY_MEMORY")]
    memory: Option<String>,

    /// Language-model provider
    #[arg(long, global = true, env = "AGENTRELAY_PROVIDER", value_enum, default_value_t = ProviderKind::Openai)]
    provider: ProviderKind,

    /// Base URL of the OpenAI-compatible API
    #[arg(long, global = true, env = "OPENAI_BASE_URL", default_value = "https://api.openai.com/v1")]
    base_url: String,

    /// API key for the OpenAI-compatible API
    #[arg(long, global = true, env = "OPENAI_API_KEY", hide_env_values = true)]
    api_key: Option<String>,

    /// Model used by the supervisor and the workers
    #[arg(long, global = true, env = "AGENTRELAY_WORKER_MODEL", default_value = "gpt-4o-mini")]
    worker_model: String,

    /// Model used by the standalone assistant
    #[arg(long, global = true, env = "AGENTRELAY_ASSISTANT_MODEL", default_value = "gpt-4o")]
    assistant_model: String,

    /// Agent behind POST /api/chat
    #[arg(long, global = true, env = "AGENTRELAY_CHAT_AGENT", default_value = "Supervisor")]
    chat_agent: String,

    /// Turn limit of the assistant's private memory
    #[arg(long, global = true, default_value_t = 100)]
    chat_capacity: usize,

    /// Planning rounds allowed per request
    #[arg(long, global = true, default_value_t = 8)]
    max_rounds: usize,

    /// Seconds a single tool call may run
    #[arg(long, global = true, default_value_t = 10)]
    tool_timeout: u64,
}

#[derive(Clone, Copy, ValueEnum)]
enum ProviderKind {
    Openai,
    Scripted,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server (default)
    #[command(alias = "server")]
    Serve(ServeArgs),

    /// Send one message to an agent and print the reply
    #[command(alias = "ask")]
    Chat(ChatArgs),

    /// List the configured agents
    Agents,

    /// List conversations in the shared memory
    Conversations,

    /// Delete a conversation from the shared memory
    Forget(ForgetArgs),

    /// Display version and build information
    Info,
}

#[derive(Args)]
struct ServeArgs {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value = "3000")]
    port: u16,

    /// Host to bind to
    #[arg(short = 'H', long, default_value = "127.0.0.1")]
    host: String,
}

impl Default for ServeArgs {
    fn default() -> Self {
        Self {
            port: 3000,
            host: "127.0.0.1".to_string(),
        }
    }
}

#[derive(Args)]
struct ChatArgs {
    /// Message to send
    message: String,

    /// Agent to ask instead of the chat agent
    #[arg(short, long)]
    agent: Option<String>,

    /// Conversation to continue
    #[arg(short, long)]
    conversation: Option<String>,

    /// User the conversation belongs to
    #[arg(short, long)]
    user: Option<String>,

    /// Print the reply as it is generated
    #[arg(short, long)]
    stream: bool,
}

#[derive(Args)]
struct ForgetArgs {
    /// Conversation to delete
    conversation: String,

    /// User the conversation belongs to
    #[arg(short, long)]
    user: Option<String>,
}

impl Cli {
    fn config(&self) -> Result<Config> {
        let memory = match &self.memory {
            Some(value) => MemoryBacking::parse(value)?,
            None => MemoryBacking::Persistent {
                path: self.data_dir.join("memory"),
            },
        };
        let provider = match self.provider {
            ProviderKind::Openai => ProviderConfig::OpenAi {
                base_url: self.base_url.clone(),
                api_key: self.api_key.clone(),
            },
            ProviderKind::Scripted => ProviderConfig::Scripted,
        };

        Ok(Config {
            data_dir: self.data_dir.clone(),
            memory,
            chat_capacity: self.chat_capacity,
            provider,
            worker_model: self.worker_model.clone(),
            assistant_model: self.assistant_model.clone(),
            chat_agent: self.chat_agent.clone(),
            max_rounds: self.max_rounds,
            tool_timeout: Duration::from_secs(self.tool_timeout),
        })
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    // Handle commands that don't need the relay first
    if let Some(Commands::Info) = &cli.command {
        println!("agentrelay");
        println!("Version: {}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Features:");
        #[cfg(feature = "server")]
        println!("  - HTTP server (axum)");
        #[cfg(not(feature = "server"))]
        println!("  - HTTP server: disabled");
        #[cfg(feature = "persistent")]
        println!("  - Persistent memory (fjall)");
        #[cfg(not(feature = "persistent"))]
        println!("  - Persistent memory: disabled");
        println!();
        println!("Data directory: {}", cli.data_dir.display());
        return Ok(());
    }

    let config = cli.config()?;
    let relay = Arc::new(AgentRelay::start(config).context("failed to start agent relay")?);

    match cli.command {
        None => serve(ServeArgs::default(), relay).await?,
        Some(Commands::Serve(args)) => serve(args, relay).await?,
        Some(Commands::Chat(args)) => chat(args, &relay).await?,
        Some(Commands::Agents) => {
            for summary in relay.host().summaries() {
                let tools = if summary.tools.is_empty() {
                    "-".to_string()
                } else {
                    summary.tools.join(", ")
                };
                println!("{:<18} {:<12} tools: {}", summary.name, summary.model, tools);
            }
        }
        Some(Commands::Conversations) => {
            for id in relay.memory().conversations()? {
                println!("{}", id);
            }
        }
        Some(Commands::Forget(args)) => {
            let key = conversation_key(args.user.as_deref(), &args.conversation);
            relay.memory().clear(&key)?;
            println!("Forgot conversation {}", args.conversation);
        }
        Some(Commands::Info) => {
            // Handled before the relay is built
            unreachable!()
        }
    }

    Ok(())
}

#[cfg(feature = "server")]
async fn serve(args: ServeArgs, relay: Arc<AgentRelay>) -> Result<()> {
    let addr: SocketAddr = format!("{}:{}", args.host, args.port)
        .parse()
        .with_context(|| format!("invalid listen address {}:{}", args.host, args.port))?;
    run_server(addr, relay).await
}

#[cfg(not(feature = "server"))]
async fn serve(_args: ServeArgs, _relay: Arc<AgentRelay>) -> Result<()> {
    bail!("server feature not enabled; rebuild with `cargo build --features server`")
}

async fn chat(args: ChatArgs, relay: &AgentRelay) -> Result<()> {
    let agent = match &args.agent {
        Some(name) => relay.host().get(name)?,
        None => relay.chat_agent()?,
    };
    let mut request = AgentRequest::new(args.message);
    if let Some(user) = args.user {
        request = request.from_user(user);
    }
    if let Some(conversation) = args.conversation {
        request = request.in_conversation(conversation);
    }

    if !args.stream {
        let reply = agent.generate_text(request).await?;
        for invocation in &reply.tool_invocations {
            eprintln!("[{}] {} -> {}", invocation.tool_name, invocation.input, invocation.output);
        }
        println!("{}", reply.text);
        return Ok(());
    }

    let mut parts = agent.stream_text(request);
    let mut stdout = std::io::stdout();
    while let Some(part) = parts.next().await {
        match part {
            StreamPart::TextDelta { delta, .. } => {
                write!(stdout, "{}", delta)?;
                stdout.flush()?;
            }
            StreamPart::ToolInputAvailable { tool_name, input, .. } => eprintln!("[{}] {}", tool_name, input),
            StreamPart::ToolOutputAvailable { output, .. } => eprintln!("  -> {}", output),
            StreamPart::Error { error_text } => bail!("{}", error_text),
            StreamPart::Start { .. } | StreamPart::Finish => {}
        }
    }
    println!();
    Ok(())
}
