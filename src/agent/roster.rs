//! The configured agents: three single-tool workers, the supervisor that
//! holds all of their tools, and a tool-less assistant with its own memory.

use std::sync::Arc;
use crate::error::RelayResult;
use crate::llm::{LanguageModel, ModelBinding};
use crate::memory::{InMemoryStore, MemoryStore};
use crate::tools::builtin;
use crate::Config;
use super::{Agent, AgentConfig, AgentHost, ToolPolicy};

pub const SUPERVISOR: &str = "Supervisor";
pub const UPPERCASE_AGENT: &str = "UppercaseAgent";
pub const WORD_COUNT_AGENT: &str = "WordCountAgent";
pub const STORY_WRITER_AGENT: &str = "StoryWriterAgent";
pub const ASSISTANT: &str = "Assistant";

pub const UPPERCASE_INSTRUCTIONS: &str = "You are a text transformer. When given text, use the uppercase tool to convert it to uppercase and return the result.";

pub const WORD_COUNT_INSTRUCTIONS: &str = "You are a text analyzer. When given text, use the countWords tool to count the words and return the count.";

pub const STORY_WRITER_INSTRUCTIONS: &str = "You are a creative story writer. When given text, use the writeStory tool to acknowledge the topic, then write EXACTLY a 50-word story about or inspired by that text. Be creative and engaging. Make sure your story is exactly 50 words, no more, no less.";

pub const SUPERVISOR_INSTRUCTIONS: &str = "You are a text processing supervisor. When given any text input, you MUST use ALL THREE tools: uppercase, countWords, and writeStory. Use all of them to process the text.

Present the results in this exact format:

**🔤 Uppercase Version:**
[Uppercase result here]

**📊 Word Analysis:**
[Word count and analysis here]

**📖 Creative Story:**
[50-word story here]

Make sure to format each section clearly with bold headers and proper spacing.";

pub const ASSISTANT_INSTRUCTIONS: &str = "A helpful and friendly assistant that can answer questions clearly and concisely.";

/// Build every agent against one provider.
///
/// The supervisor and the workers share `shared`; the assistant gets a
/// private volatile store.
pub fn build_roster(
    config: &Config,
    provider: Arc<dyn LanguageModel>,
    shared: Arc<dyn MemoryStore>,
) -> RelayResult<AgentHost> {
    let worker = |name: &str, instructions: &str| {
        AgentConfig::builder(name)
            .instructions(instructions)
            .model(ModelBinding::new(Arc::clone(&provider), config.worker_model.clone()))
            .memory(Arc::clone(&shared))
            .max_rounds(config.max_rounds)
            .tool_timeout(config.tool_timeout)
    };

    let mut host = AgentHost::new();
    host.register(Agent::new(
        worker(UPPERCASE_AGENT, UPPERCASE_INSTRUCTIONS)
            .tool(builtin::uppercase())
            .build()?,
    ))?;
    host.register(Agent::new(
        worker(WORD_COUNT_AGENT, WORD_COUNT_INSTRUCTIONS)
            .tool(builtin::count_words())
            .build()?,
    ))?;
    host.register(Agent::new(
        worker(STORY_WRITER_AGENT, STORY_WRITER_INSTRUCTIONS)
            .tool(builtin::write_story())
            .build()?,
    ))?;
    host.register(Agent::new(
        worker(SUPERVISOR, SUPERVISOR_INSTRUCTIONS)
            .tools([builtin::uppercase(), builtin::count_words(), builtin::write_story()])
            .policy(ToolPolicy::RequireAll)
            .build()?,
    ))?;

    let private: Arc<dyn MemoryStore> = Arc::new(InMemoryStore::new(config.chat_capacity)?);
    host.register(Agent::new(
        AgentConfig::builder(ASSISTANT)
            .instructions(ASSISTANT_INSTRUCTIONS)
            .model(ModelBinding::new(provider, config.assistant_model.clone()))
            .memory(private)
            .max_rounds(config.max_rounds)
            .tool_timeout(config.tool_timeout)
            .build()?,
    ))?;

    Ok(host)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedModel;
    use crate::memory::MemoryBacking;

    fn config() -> Config {
        Config {
            memory: MemoryBacking::Volatile { capacity: 50 },
            ..Config::default()
        }
    }

    fn roster() -> AgentHost {
        let config = config();
        let shared = config.memory.open().unwrap();
        build_roster(&config, Arc::new(ScriptedModel::new()), shared).unwrap()
    }

    #[test]
    fn test_roster_contents() {
        let host = roster();
        assert_eq!(
            host.list(),
            vec![ASSISTANT, STORY_WRITER_AGENT, SUPERVISOR, UPPERCASE_AGENT, WORD_COUNT_AGENT]
        );

        let supervisor = host.get(SUPERVISOR).unwrap();
        assert_eq!(supervisor.config().tools.names(), vec!["uppercase", "countWords", "writeStory"]);
        assert_eq!(supervisor.config().policy, ToolPolicy::RequireAll);
        assert_eq!(supervisor.config().model.model_id, "gpt-4o-mini");

        let assistant = host.get(ASSISTANT).unwrap();
        assert!(assistant.config().tools.is_empty());
        assert_eq!(assistant.config().model.model_id, "gpt-4o");
    }

    #[test]
    fn test_workers_share_memory_assistant_does_not() {
        let host = roster();
        let memory_of = |name: &str| host.get(name).unwrap().config().memory.clone().unwrap();

        assert!(Arc::ptr_eq(&memory_of(SUPERVISOR), &memory_of(UPPERCASE_AGENT)));
        assert!(Arc::ptr_eq(&memory_of(WORD_COUNT_AGENT), &memory_of(STORY_WRITER_AGENT)));
        assert!(!Arc::ptr_eq(&memory_of(SUPERVISOR), &memory_of(ASSISTANT)));
    }

    #[test]
    fn test_supervisor_instructions_name_sections() {
        for header in ["**🔤 Uppercase Version:**", "**📊 Word Analysis:**", "**📖 Creative Story:**"] {
            assert!(SUPERVISOR_INSTRUCTIONS.contains(header));
        }
    }
}
