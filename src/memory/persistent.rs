use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::path::Path;
use std::sync::Mutex;
use crate::agent::{ConversationId, Message};
use crate::core::FjallWrapper;
use crate::error::{RelayError, RelayResult};
use super::MemoryStore;

const PARTITION: &str = "conversations";
const INDEX_PREFIX: &str = "idx:";
/// Fixed number of conversation locks; ids hash onto them
const LOCK_STRIPES: usize = 64;

/// Durable conversation log on top of a fjall keyspace
///
/// Layout per conversation (ids are length-prefixed so one id can never be a
/// key prefix of another):
/// - `conv:<len>:<id>:msg:<seq hex>` -> JSON message
/// - `conv:<len>:<id>:next` -> next sequence number (u64 LE)
/// - `idx:<id>` -> empty marker used to list conversations
pub struct FjallStore {
    db: FjallWrapper,
    locks: Vec<Mutex<()>>,
}

impl FjallStore {
    pub fn open<P: AsRef<Path>>(path: P) -> RelayResult<Self> {
        std::fs::create_dir_all(path.as_ref())?;
        let db = FjallWrapper::new(path.as_ref(), PARTITION)?;
        tracing::info!("Opened persistent memory at {}", path.as_ref().display());
        Ok(Self {
            db,
            locks: (0..LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
        })
    }

    fn lock_for(&self, conversation_id: &str) -> &Mutex<()> {
        let mut hasher = DefaultHasher::new();
        conversation_id.hash(&mut hasher);
        &self.locks[(hasher.finish() % self.locks.len() as u64) as usize]
    }

    fn conversation_prefix(conversation_id: &str) -> String {
        format!("conv:{}:{}:", conversation_id.len(), conversation_id)
    }

    fn next_seq(&self, prefix: &str) -> RelayResult<u64> {
        let key = format!("{}next", prefix);
        match self.db.get(key.as_bytes())? {
            Some(data) => {
                let bytes: [u8; 8] = data
                    .try_into()
                    .map_err(|_| RelayError::Store(format!("corrupt sequence counter at '{}'", key)))?;
                Ok(u64::from_le_bytes(bytes))
            }
            None => Ok(0),
        }
    }
}

impl MemoryStore for FjallStore {
    fn append(&self, conversation_id: &str, message: Message) -> RelayResult<()> {
        let _guard = self.lock_for(conversation_id).lock()?;

        let prefix = Self::conversation_prefix(conversation_id);
        let seq = self.next_seq(&prefix)?;

        let msg_key = format!("{}msg:{:016x}", prefix, seq); // Zero-padded for lexicographic ordering
        let next_key = format!("{}next", prefix);
        let index_key = format!("{}{}", INDEX_PREFIX, conversation_id);
        let msg_bytes = serde_json::to_vec(&message)?;
        let next_bytes = (seq + 1).to_le_bytes();

        self.db.batch_put(vec![
            (msg_key.as_bytes(), msg_bytes.as_slice()),
            (next_key.as_bytes(), next_bytes.as_slice()),
            (index_key.as_bytes(), b"".as_slice()),
        ])?;
        self.db.flush()?;
        Ok(())
    }

    fn read(&self, conversation_id: &str) -> RelayResult<Vec<Message>> {
        let _guard = self.lock_for(conversation_id).lock()?;

        let msg_prefix = format!("{}msg:", Self::conversation_prefix(conversation_id));
        self.db
            .scan_prefix(msg_prefix.as_bytes())?
            .into_iter()
            .map(|(_, value)| serde_json::from_slice(&value).map_err(RelayError::from))
            .collect()
    }

    fn clear(&self, conversation_id: &str) -> RelayResult<()> {
        let _guard = self.lock_for(conversation_id).lock()?;

        let prefix = Self::conversation_prefix(conversation_id);
        let mut keys: Vec<Vec<u8>> = self
            .db
            .scan_prefix(prefix.as_bytes())?
            .into_iter()
            .map(|(key, _)| key)
            .collect();
        keys.push(format!("{}{}", INDEX_PREFIX, conversation_id).into_bytes());
        self.db.batch_delete(keys)?;
        self.db.flush()?;
        Ok(())
    }

    fn conversations(&self) -> RelayResult<Vec<ConversationId>> {
        self.db
            .scan_prefix(INDEX_PREFIX.as_bytes())?
            .into_iter()
            .map(|(key, _)| {
                String::from_utf8(key[INDEX_PREFIX.len()..].to_vec())
                    .map_err(|e| RelayError::Store(format!("invalid conversation id in index: {}", e)))
            })
            .collect()
    }

    fn backing(&self) -> &'static str {
        "persistent"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_append_and_read_in_order() {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path()).unwrap();

        for i in 0..20 {
            store.append("c1", Message::user(format!("turn {}", i))).unwrap();
        }
        let turns = store.read("c1").unwrap();
        assert_eq!(turns.len(), 20);
        assert_eq!(turns.first().unwrap().content, "turn 0");
        assert_eq!(turns.last().unwrap().content, "turn 19");
    }

    #[test]
    fn test_survives_reopen() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().to_path_buf();

        {
            let store = FjallStore::open(&path).unwrap();
            store.append("c1", Message::user("hello")).unwrap();
            store.append("c1", Message::assistant("hi")).unwrap();
        }

        {
            let store = FjallStore::open(&path).unwrap();
            let turns = store.read("c1").unwrap();
            assert_eq!(turns.len(), 2);
            assert_eq!(turns[1].content, "hi");
            assert_eq!(store.conversations().unwrap(), vec!["c1".to_string()]);
        }
    }

    #[test]
    fn test_prefix_ids_do_not_collide() {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path()).unwrap();

        store.append("a", Message::user("short")).unwrap();
        store.append("a:msg:x", Message::user("long")).unwrap();

        let turns = store.read("a").unwrap();
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].content, "short");
    }

    #[test]
    fn test_unknown_reads_do_not_grow_locks() {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path()).unwrap();

        for i in 0..10_000 {
            assert!(store.read(&format!("unknown-{}", i)).unwrap().is_empty());
        }
        assert_eq!(store.locks.len(), LOCK_STRIPES);
        assert!(std::ptr::eq(store.lock_for("c1"), store.lock_for("c1")));
    }

    #[test]
    fn test_clear_and_unknown() {
        let temp_dir = TempDir::new().unwrap();
        let store = FjallStore::open(temp_dir.path()).unwrap();

        assert!(store.read("missing").unwrap().is_empty());

        store.append("c1", Message::user("x")).unwrap();
        store.clear("c1").unwrap();
        assert!(store.read("c1").unwrap().is_empty());
        assert!(store.conversations().unwrap().is_empty());

        store.append("c1", Message::user("again")).unwrap();
        assert_eq!(store.read("c1").unwrap().len(), 1);
    }
}
