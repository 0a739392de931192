use std::collections::BTreeMap;
use std::sync::Arc;
use serde::Serialize;
use tracing::info;
use crate::error::{RelayError, RelayResult};
use super::Agent;

/// Public description of a registered agent
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct AgentSummary {
    pub name: String,
    pub instructions: String,
    pub model: String,
    pub tools: Vec<String>,
    pub memory: Option<String>,
}

/// Named agents, built once at startup and shared read-only afterwards
#[derive(Debug, Default)]
pub struct AgentHost {
    agents: BTreeMap<String, Arc<Agent>>,
}

impl AgentHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, agent: Agent) -> RelayResult<Arc<Agent>> {
        let name = agent.name().to_string();
        if self.agents.contains_key(&name) {
            return Err(RelayError::Configuration(format!("agent '{}' is already registered", name)));
        }
        info!(agent = %name, model = ?agent.config().model, tools = ?agent.config().tools, "registered agent");
        let agent = Arc::new(agent);
        self.agents.insert(name, Arc::clone(&agent));
        Ok(agent)
    }

    pub fn get(&self, name: &str) -> RelayResult<Arc<Agent>> {
        self.agents
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::AgentNotFound(name.to_string()))
    }

    /// Agent names in sorted order
    pub fn list(&self) -> Vec<&str> {
        self.agents.keys().map(String::as_str).collect()
    }

    pub fn len(&self) -> usize {
        self.agents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.agents.is_empty()
    }

    pub fn summaries(&self) -> Vec<AgentSummary> {
        self.agents
            .values()
            .map(|agent| {
                let config = agent.config();
                AgentSummary {
                    name: config.name.clone(),
                    instructions: config.instructions.clone(),
                    model: config.model.model_id.clone(),
                    tools: config.tools.names().into_iter().map(str::to_string).collect(),
                    memory: config.memory.as_ref().map(|m| m.backing().to_string()),
                }
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::AgentConfig;
    use crate::llm::{ModelBinding, ScriptedModel};
    use crate::tools::builtin;

    fn agent(name: &str) -> Agent {
        let config = AgentConfig::builder(name)
            .instructions("test")
            .model(ModelBinding::new(Arc::new(ScriptedModel::new()), "gpt-4o-mini"))
            .tool(builtin::count_words())
            .build()
            .unwrap();
        Agent::new(config)
    }

    #[test]
    fn test_register_and_lookup() {
        let mut host = AgentHost::new();
        host.register(agent("WordCountAgent")).unwrap();
        host.register(agent("Another")).unwrap();

        assert_eq!(host.list(), vec!["Another", "WordCountAgent"]);
        assert_eq!(host.get("WordCountAgent").unwrap().name(), "WordCountAgent");
        assert!(matches!(host.get("Nobody"), Err(RelayError::AgentNotFound(_))));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut host = AgentHost::new();
        host.register(agent("A")).unwrap();
        assert!(matches!(host.register(agent("A")), Err(RelayError::Configuration(_))));
        assert_eq!(host.len(), 1);
    }

    #[test]
    fn test_summaries() {
        let mut host = AgentHost::new();
        host.register(agent("A")).unwrap();
        let summary = &host.summaries()[0];
        assert_eq!(summary.tools, vec!["countWords"]);
        assert_eq!(summary.model, "gpt-4o-mini");
        assert!(summary.memory.is_none());
    }
}
