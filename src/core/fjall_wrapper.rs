use fjall::{Config, Keyspace, PartitionCreateOptions, PartitionHandle, PersistMode};
use std::path::Path;
use crate::error::{RelayError, RelayResult};

/// Thin handle over a single fjall partition.
pub struct FjallWrapper {
    keyspace: Keyspace,
    partition: PartitionHandle,
}

impl FjallWrapper {
    pub fn new<P: AsRef<Path>>(path: P, partition: &str) -> RelayResult<Self> {
        let keyspace = Config::new(path)
            .open()
            .map_err(|e| RelayError::Store(format!("Failed to open Fjall keyspace: {}", e)))?;

        let partition = keyspace
            .open_partition(partition, PartitionCreateOptions::default())
            .map_err(|e| RelayError::Store(format!("Failed to open partition '{}': {}", partition, e)))?;

        Ok(Self {
            keyspace,
            partition,
        })
    }

    pub fn get(&self, key: &[u8]) -> RelayResult<Option<Vec<u8>>> {
        let res = self.partition.get(key)?;
        Ok(res.map(|slice| slice.to_vec()))
    }

    /// All entries whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &[u8]) -> RelayResult<Vec<(Vec<u8>, Vec<u8>)>> {
        let mut out = Vec::new();
        for item in self.partition.prefix(prefix) {
            let (key, value) = item?;
            out.push((key.to_vec(), value.to_vec()));
        }
        Ok(out)
    }

    /// Write several entries atomically
    pub fn batch_put(&self, items: Vec<(&[u8], &[u8])>) -> RelayResult<()> {
        let mut batch = self.keyspace.batch();
        for (key, value) in items {
            batch.insert(&self.partition, key, value);
        }
        batch.commit()?;
        Ok(())
    }

    /// Remove several entries atomically
    pub fn batch_delete(&self, keys: Vec<Vec<u8>>) -> RelayResult<()> {
        let mut batch = self.keyspace.batch();
        for key in keys {
            batch.remove(&self.partition, key);
        }
        batch.commit()?;
        Ok(())
    }

    /// Flush the journal so writes survive a crash
    pub fn flush(&self) -> RelayResult<()> {
        self.keyspace.persist(PersistMode::SyncAll)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_prefix_scan_is_ordered_and_scoped() {
        let temp_dir = TempDir::new().unwrap();
        let db = FjallWrapper::new(temp_dir.path(), "test").unwrap();

        db.batch_put(vec![(b"a:2".as_slice(), b"two".as_slice()), (b"b:1".as_slice(), b"other".as_slice())])
            .unwrap();
        db.batch_put(vec![(b"a:1".as_slice(), b"one".as_slice())]).unwrap();

        let entries = db.scan_prefix(b"a:").unwrap();
        let values: Vec<&[u8]> = entries.iter().map(|(_, v)| v.as_slice()).collect();
        assert_eq!(values, vec![b"one".as_slice(), b"two".as_slice()]);
    }

    #[test]
    fn test_batch_put_and_delete() {
        let temp_dir = TempDir::new().unwrap();
        let db = FjallWrapper::new(temp_dir.path(), "test").unwrap();

        db.batch_put(vec![
            (b"k1".as_slice(), b"v1".as_slice()),
            (b"k2".as_slice(), b"v2".as_slice()),
        ])
        .unwrap();
        assert_eq!(db.get(b"k2").unwrap(), Some(b"v2".to_vec()));

        db.batch_delete(vec![b"k1".to_vec(), b"k2".to_vec()]).unwrap();
        assert!(db.get(b"k1").unwrap().is_none());
        assert!(db.get(b"k2").unwrap().is_none());
    }
}
