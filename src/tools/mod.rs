//! Tools agents can call mid-generation
//!
//! A tool is a named, described, synchronous function with a declared input
//! schema. Arguments arrive as JSON from the model; [`FnTool`] validates them
//! by deserializing into the tool's typed input before `execute` runs, so a
//! schema violation never reaches the tool body.

pub mod builtin;
mod registry;

pub use registry::ToolRegistry;

use std::marker::PhantomData;
use serde::{de::DeserializeOwned, Serialize};
use serde_json::Value;
use crate::error::{RelayError, RelayResult};

/// Name, description and JSON schema advertised to the model
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

impl ToolDefinition {
    pub fn new(name: &str, description: &str, input_schema: Value) -> Self {
        Self {
            name: name.to_string(),
            description: description.to_string(),
            input_schema,
        }
    }
}

/// A unit of deterministic computation an agent may invoke
pub trait Tool: Send + Sync {
    fn definition(&self) -> &ToolDefinition;

    fn name(&self) -> &str {
        &self.definition().name
    }

    /// Validate `args` and run the tool.
    ///
    /// Fails with [`RelayError::Validation`] on a schema mismatch and with
    /// [`RelayError::ToolExecution`] when the body itself fails.
    fn invoke(&self, args: Value) -> RelayResult<Value>;
}

/// Tool backed by a closure over a typed input
pub struct FnTool<I, O, F> {
    definition: ToolDefinition,
    execute: F,
    _marker: PhantomData<fn(I) -> O>,
}

impl<I, O, F> FnTool<I, O, F>
where
    I: DeserializeOwned,
    O: Serialize,
    F: Fn(I) -> anyhow::Result<O> + Send + Sync,
{
    pub fn new(definition: ToolDefinition, execute: F) -> Self {
        Self {
            definition,
            execute,
            _marker: PhantomData,
        }
    }
}

impl<I, O, F> Tool for FnTool<I, O, F>
where
    I: DeserializeOwned,
    O: Serialize,
    F: Fn(I) -> anyhow::Result<O> + Send + Sync,
{
    fn definition(&self) -> &ToolDefinition {
        &self.definition
    }

    fn invoke(&self, args: Value) -> RelayResult<Value> {
        let input: I = serde_json::from_value(args).map_err(|e| {
            RelayError::Validation(format!("invalid arguments for '{}': {}", self.definition.name, e))
        })?;
        let output = (self.execute)(input).map_err(|source| RelayError::ToolExecution {
            tool: self.definition.name.clone(),
            source,
        })?;
        Ok(serde_json::to_value(output)?)
    }
}
