use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use serde_json::Value;
use crate::error::{RelayError, RelayResult};
use super::{Tool, ToolDefinition};

/// Ordered set of uniquely named tools belonging to one agent
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: Vec<Arc<dyn Tool>>,
    index: HashMap<String, usize>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a tool; fails if the name is taken
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> RelayResult<()> {
        let name = tool.name().to_string();
        if self.index.contains_key(&name) {
            return Err(RelayError::DuplicateTool(name));
        }
        self.index.insert(name, self.tools.len());
        self.tools.push(tool);
        Ok(())
    }

    pub fn get(&self, name: &str) -> Option<&Arc<dyn Tool>> {
        self.index.get(name).map(|&i| &self.tools[i])
    }

    /// Tool names in registration order
    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name()).collect()
    }

    /// Definitions in registration order
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        self.tools.iter().map(|t| t.definition().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Invoke a tool on the current thread
    pub fn invoke(&self, name: &str, args: Value) -> RelayResult<Value> {
        let tool = self
            .get(name)
            .ok_or_else(|| RelayError::UnknownTool(name.to_string()))?;
        tool.invoke(args)
    }

    /// Invoke a tool on the blocking pool, giving up after `timeout`.
    ///
    /// A timed-out call keeps running to completion in the background; only
    /// its result is discarded.
    pub async fn invoke_bounded(&self, name: &str, args: Value, timeout: Duration) -> RelayResult<Value> {
        let tool = self
            .get(name)
            .cloned()
            .ok_or_else(|| RelayError::UnknownTool(name.to_string()))?;

        let handle = tokio::task::spawn_blocking(move || tool.invoke(args));
        match tokio::time::timeout(timeout, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) => Err(RelayError::ToolExecution {
                tool: name.to_string(),
                source: anyhow::anyhow!("tool task aborted: {}", join_err),
            }),
            Err(_) => Err(RelayError::ToolTimeout(name.to_string(), timeout)),
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.names()).finish()
    }
}
