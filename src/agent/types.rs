//! Core types for the agent module

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Unique name of an agent within the host
pub type AgentName = String;

/// Identifier for a conversation in the memory store
pub type ConversationId = String;

/// Opaque identifier for a stored message
pub type MessageId = String;

/// Role of a message sender
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// User message
    User,
    /// Assistant/AI response
    Assistant,
    /// Tool call result, tagged with the tool name
    Tool(String),
}

/// A single conversation turn. Immutable once stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub id: MessageId,
    pub role: Role,
    pub content: String,
    pub timestamp: u64,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            role,
            content: content.into(),
            timestamp: current_timestamp(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }
}

/// A message to send to an agent, optionally bound to a conversation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentRequest {
    pub message: String,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<ConversationId>,
}

impl AgentRequest {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            ..Default::default()
        }
    }

    pub fn in_conversation(mut self, conversation_id: impl Into<String>) -> Self {
        self.conversation_id = Some(conversation_id.into());
        self
    }

    pub fn from_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Memory key of the conversation this request continues, if any
    pub fn memory_key(&self) -> Option<ConversationId> {
        self.conversation_id
            .as_deref()
            .map(|conversation| conversation_key(self.user_id.as_deref(), conversation))
    }
}

/// Memory key for a user's conversation. Conversation ids are chosen by
/// clients, so they are scoped by user; anonymous requests share the empty
/// user. The user part is length-prefixed so no two pairs collide.
pub fn conversation_key(user_id: Option<&str>, conversation_id: &str) -> ConversationId {
    let user = user_id.unwrap_or_default();
    format!("{}:{}/{}", user.len(), user, conversation_id)
}

/// Record of one tool invocation made while answering a request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ToolInvocation {
    pub call_id: String,
    pub tool_name: String,
    pub input: serde_json::Value,
    pub output: serde_json::Value,
    pub is_error: bool,
}

/// Buffered result of a generation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgentReply {
    pub text: String,
    pub tool_invocations: Vec<ToolInvocation>,
    pub rounds: usize,
}

pub(crate) fn current_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_key_is_scoped_by_user() {
        let alice = AgentRequest::new("hi").from_user("alice").in_conversation("1");
        let bob = AgentRequest::new("hi").from_user("bob").in_conversation("1");
        assert_ne!(alice.memory_key(), bob.memory_key());
        assert_eq!(alice.memory_key().unwrap(), "5:alice/1");
        assert_eq!(AgentRequest::new("hi").in_conversation("1").memory_key().unwrap(), "0:/1");
        assert_eq!(AgentRequest::new("hi").from_user("alice").memory_key(), None);
    }

    #[test]
    fn test_conversation_key_has_no_collisions_across_separators() {
        assert_ne!(conversation_key(Some("a/b"), "c"), conversation_key(Some("a"), "b/c"));
        assert_ne!(conversation_key(Some("1:x"), "y"), conversation_key(None, "1:x/y"));
    }
}
