use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, RwLock};
use crate::agent::{ConversationId, Message};
use crate::error::{RelayError, RelayResult};
use super::MemoryStore;

type Turns = Arc<Mutex<VecDeque<Message>>>;

/// Process-local memory with a per-conversation turn limit
///
/// Each conversation owns its own lock, so concurrent requests on different
/// conversations never contend beyond the brief map lookup.
pub struct InMemoryStore {
    capacity: usize,
    conversations: RwLock<HashMap<ConversationId, Turns>>,
}

impl InMemoryStore {
    pub fn new(capacity: usize) -> RelayResult<Self> {
        if capacity == 0 {
            return Err(RelayError::Configuration(
                "volatile memory capacity must be at least 1".to_string(),
            ));
        }
        Ok(Self {
            capacity,
            conversations: RwLock::new(HashMap::new()),
        })
    }

    fn turns(&self, conversation_id: &str) -> RelayResult<Turns> {
        if let Some(turns) = self.conversations.read()?.get(conversation_id) {
            return Ok(turns.clone());
        }
        let mut conversations = self.conversations.write()?;
        Ok(conversations
            .entry(conversation_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(VecDeque::with_capacity(self.capacity))))
            .clone())
    }
}

impl MemoryStore for InMemoryStore {
    fn append(&self, conversation_id: &str, message: Message) -> RelayResult<()> {
        let turns = self.turns(conversation_id)?;
        let mut turns = turns.lock()?;
        turns.push_back(message);
        while turns.len() > self.capacity {
            turns.pop_front();
        }
        Ok(())
    }

    fn read(&self, conversation_id: &str) -> RelayResult<Vec<Message>> {
        let turns = match self.conversations.read()?.get(conversation_id) {
            Some(turns) => turns.clone(),
            None => return Ok(Vec::new()),
        };
        let turns = turns.lock()?;
        Ok(turns.iter().cloned().collect())
    }

    /// Empties the conversation in place, under its own lock, so an append
    /// racing with the clear lands in the live conversation
    fn clear(&self, conversation_id: &str) -> RelayResult<()> {
        let turns = match self.conversations.read()?.get(conversation_id) {
            Some(turns) => turns.clone(),
            None => return Ok(()),
        };
        turns.lock()?.clear();
        Ok(())
    }

    fn conversations(&self) -> RelayResult<Vec<ConversationId>> {
        let conversations = self.conversations.read()?;
        let mut ids = Vec::new();
        for (id, turns) in conversations.iter() {
            if !turns.lock()?.is_empty() {
                ids.push(id.clone());
            }
        }
        ids.sort();
        Ok(ids)
    }

    fn backing(&self) -> &'static str {
        "volatile"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_append_then_read_returns_message_last() {
        let store = InMemoryStore::new(10).unwrap();
        store.append("c1", Message::user("first")).unwrap();
        let second = Message::assistant("second");
        store.append("c1", second.clone()).unwrap();

        let turns = store.read("c1").unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns.last(), Some(&second));
    }

    #[test]
    fn test_fifo_eviction_keeps_last_capacity_turns() {
        let store = InMemoryStore::new(3).unwrap();
        for i in 0..7 {
            store.append("c1", Message::user(format!("turn {}", i))).unwrap();
        }

        let contents: Vec<String> = store.read("c1").unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["turn 4", "turn 5", "turn 6"]);
    }

    #[test]
    fn test_unknown_conversation_reads_empty() {
        let store = InMemoryStore::new(3).unwrap();
        assert!(store.read("nope").unwrap().is_empty());
        assert!(store.conversations().unwrap().is_empty());
    }

    #[test]
    fn test_clear_removes_only_target() {
        let store = InMemoryStore::new(3).unwrap();
        store.append("a", Message::user("x")).unwrap();
        store.append("b", Message::user("y")).unwrap();
        store.clear("a").unwrap();

        assert!(store.read("a").unwrap().is_empty());
        assert_eq!(store.read("b").unwrap().len(), 1);
        assert_eq!(store.conversations().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_append_holding_turns_across_clear_is_kept() {
        let store = InMemoryStore::new(3).unwrap();
        store.append("c1", Message::user("before")).unwrap();

        let held = store.turns("c1").unwrap();
        store.clear("c1").unwrap();
        held.lock().unwrap().push_back(Message::user("during"));

        let contents: Vec<String> = store.read("c1").unwrap().into_iter().map(|m| m.content).collect();
        assert_eq!(contents, vec!["during"]);
        assert_eq!(store.conversations().unwrap(), vec!["c1".to_string()]);
    }

    #[test]
    fn test_zero_capacity_rejected() {
        assert!(InMemoryStore::new(0).is_err());
    }

    #[test]
    fn test_concurrent_conversations_do_not_mix() {
        let store = Arc::new(InMemoryStore::new(1000).unwrap());
        let handles: Vec<_> = (0..8)
            .map(|t| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let id = format!("conv-{}", t);
                    for i in 0..100 {
                        store.append(&id, Message::user(format!("{}:{}", t, i))).unwrap();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }

        for t in 0..8 {
            let turns = store.read(&format!("conv-{}", t)).unwrap();
            assert_eq!(turns.len(), 100);
            let prefix = format!("{}:", t);
            assert!(turns.iter().all(|m| m.content.starts_with(&prefix)));
        }
    }
}
