//! Conversation memory shared by agents
//!
//! A [`MemoryStore`] is an append log of conversation turns keyed by
//! conversation id. Two backings exist:
//! - **Volatile**: [`InMemoryStore`], a bounded ring per conversation that
//!   evicts the oldest turns once `capacity` is exceeded
//! - **Persistent**: [`FjallStore`], a fjall-backed log that never evicts and
//!   survives restarts
//!
//! `append` and `read` on the same conversation are serialized against each
//! other; different conversations proceed in parallel.

mod volatile;
#[cfg(feature = "persistent")]
mod persistent;

pub use volatile::InMemoryStore;
#[cfg(feature = "persistent")]
pub use persistent::FjallStore;

use std::path::PathBuf;
use std::sync::Arc;
use crate::agent::{Message, ConversationId};
use crate::error::{RelayError, RelayResult};

/// Default turn limit for the volatile backing
pub const DEFAULT_CAPACITY: usize = 100;

/// Storage for conversation turns
pub trait MemoryStore: Send + Sync {
    /// Append a turn to the end of a conversation
    fn append(&self, conversation_id: &str, message: Message) -> RelayResult<()>;

    /// All retained turns of a conversation in insertion order.
    /// Unknown ids yield an empty list.
    fn read(&self, conversation_id: &str) -> RelayResult<Vec<Message>>;

    /// Drop every turn of a conversation
    fn clear(&self, conversation_id: &str) -> RelayResult<()>;

    /// Ids of all conversations with at least one stored turn
    fn conversations(&self) -> RelayResult<Vec<ConversationId>>;

    /// Short label for logs
    fn backing(&self) -> &'static str;
}

/// Which backing to build at startup
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryBacking {
    Volatile { capacity: usize },
    Persistent { path: PathBuf },
}

impl MemoryBacking {
    /// Open the configured backing
    pub fn open(&self) -> RelayResult<Arc<dyn MemoryStore>> {
        match self {
            MemoryBacking::Volatile { capacity } => Ok(Arc::new(InMemoryStore::new(*capacity)?)),
            #[cfg(feature = "persistent")]
            MemoryBacking::Persistent { path } => Ok(Arc::new(FjallStore::open(path)?)),
            #[cfg(not(feature = "persistent"))]
            MemoryBacking::Persistent { .. } => Err(RelayError::Configuration(
                "persistent memory requires the `persistent` feature".to_string(),
            )),
        }
    }

    /// Parse `memory`, `memory:<capacity>` or `file:<path>`
    pub fn parse(value: &str) -> RelayResult<Self> {
        if let Some(path) = value.strip_prefix("file:") {
            if path.is_empty() {
                return Err(RelayError::Configuration("empty memory file path".to_string()));
            }
            return Ok(MemoryBacking::Persistent { path: PathBuf::from(path) });
        }
        match value.split_once(':') {
            None if value == "memory" => Ok(MemoryBacking::Volatile { capacity: DEFAULT_CAPACITY }),
            Some(("memory", cap)) => {
                let capacity = cap.parse::<usize>().map_err(|e| {
                    RelayError::Configuration(format!("invalid memory capacity '{}': {}", cap, e))
                })?;
                Ok(MemoryBacking::Volatile { capacity })
            }
            _ => Err(RelayError::Configuration(format!(
                "unknown memory backing '{}' (expected memory, memory:<n> or file:<path>)",
                value
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_backing() {
        assert_eq!(
            MemoryBacking::parse("memory").unwrap(),
            MemoryBacking::Volatile { capacity: DEFAULT_CAPACITY }
        );
        assert_eq!(
            MemoryBacking::parse("memory:5").unwrap(),
            MemoryBacking::Volatile { capacity: 5 }
        );
        assert_eq!(
            MemoryBacking::parse("file:./memory.db").unwrap(),
            MemoryBacking::Persistent { path: PathBuf::from("./memory.db") }
        );
        assert!(MemoryBacking::parse("memory:lots").is_err());
        assert!(MemoryBacking::parse("redis://localhost").is_err());
        assert!(MemoryBacking::parse("file:").is_err());
    }
}
