//! Ordered key-value persistence behind the [`BatchStore`] seam.
//!
//! The ledger only needs three things from its store: atomic multi-key
//! batches, a full scan in ascending key order, and exclusive ownership of
//! the path. Production uses lmdb; tests substitute in-memory and
//! fault-injecting implementations.

use std::path::Path;

use lmdb::{Cursor, Database, DatabaseFlags, Environment, Transaction, WriteFlags};

use crate::error::StoreError;

const MAP_SIZE: usize = 256 * 1024 * 1024;

/// One operation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put { key: Vec<u8>, value: Vec<u8> },
    Delete { key: Vec<u8> },
}

impl BatchOp {
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        Self::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        Self::Delete { key: key.into() }
    }
}

/// Minimal ordered store contract the ledger consumes.
pub trait BatchStore: Send + Sync {
    /// Apply every operation or none of them.
    fn write_batch(&self, ops: &[BatchOp]) -> Result<(), StoreError>;

    /// Every key/value pair in ascending key order.
    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError>;
}

impl<T: BatchStore + ?Sized> BatchStore for std::sync::Arc<T> {
    fn write_batch(&self, ops: &[BatchOp]) -> Result<(), StoreError> {
        (**self).write_batch(ops)
    }

    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        (**self).scan()
    }
}

/// lmdb-backed store, one unnamed-environment database per identity.
pub struct LmdbStore {
    env: Environment,
    db: Database,
}

impl LmdbStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let p = path.as_ref();
        std::fs::create_dir_all(p)?;

        let env = Environment::new()
            .set_max_dbs(1)
            .set_map_size(MAP_SIZE)
            .open(p)?;
        let db = env.create_db(Some("ledger"), DatabaseFlags::empty())?;

        Ok(Self { env, db })
    }
}

impl BatchStore for LmdbStore {
    fn write_batch(&self, ops: &[BatchOp]) -> Result<(), StoreError> {
        let mut wtxn = self.env.begin_rw_txn()?;
        for op in ops {
            match op {
                BatchOp::Put { key, value } => {
                    wtxn.put(self.db, key, value, WriteFlags::empty())?;
                }
                BatchOp::Delete { key } => match wtxn.del(self.db, key, None) {
                    Ok(()) | Err(lmdb::Error::NotFound) => {}
                    Err(e) => return Err(e.into()),
                },
            }
        }
        wtxn.commit()?;
        Ok(())
    }

    fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
        let rtxn = self.env.begin_ro_txn()?;
        let mut out = Vec::new();
        {
            let mut cursor = rtxn.open_ro_cursor(self.db)?;
            for (key, val) in cursor.iter() {
                out.push((key.to_vec(), val.to_vec()));
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
pub mod testing {
    //! Store doubles shared by ledger and client tests.

    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use super::*;

    /// BTreeMap-backed store with a failure switch.
    #[derive(Default)]
    pub struct MemoryStore {
        data: Mutex<BTreeMap<Vec<u8>, Vec<u8>>>,
        fail_next: AtomicBool,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        /// Make the next `write_batch` fail without applying anything.
        pub fn fail_next_batch(&self) {
            self.fail_next.store(true, Ordering::SeqCst);
        }
    }

    impl BatchStore for MemoryStore {
        fn write_batch(&self, ops: &[BatchOp]) -> Result<(), StoreError> {
            if self.fail_next.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Backend("injected batch failure".into()));
            }
            let mut data = self.data.lock().unwrap();
            for op in ops {
                match op {
                    BatchOp::Put { key, value } => {
                        data.insert(key.clone(), value.clone());
                    }
                    BatchOp::Delete { key } => {
                        data.remove(key);
                    }
                }
            }
            Ok(())
        }

        fn scan(&self) -> Result<Vec<(Vec<u8>, Vec<u8>)>, StoreError> {
            let data = self.data.lock().unwrap();
            Ok(data.iter().map(|(k, v)| (k.clone(), v.clone())).collect())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_lmdb_batch_and_sorted_scan() {
        let dir = TempDir::new().unwrap();
        let store = LmdbStore::open(dir.path()).unwrap();

        store
            .write_batch(&[
                BatchOp::put(b"counter".to_vec(), 1u32.to_le_bytes().to_vec()),
                BatchOp::put(1u32.to_be_bytes().to_vec(), b"one".to_vec()),
                BatchOp::put(2u32.to_be_bytes().to_vec(), b"two".to_vec()),
            ])
            .unwrap();

        let all = store.scan().unwrap();
        assert_eq!(all.len(), 3);
        // numeric 4-byte BE keys sort before the ascii scalar keys
        assert_eq!(all[0].0, 1u32.to_be_bytes().to_vec());
        assert_eq!(all[1].0, 2u32.to_be_bytes().to_vec());
        assert_eq!(all[2].0, b"counter".to_vec());
    }

    #[test]
    fn test_lmdb_delete_in_batch() {
        let dir = TempDir::new().unwrap();
        let store = LmdbStore::open(dir.path()).unwrap();

        store
            .write_batch(&[BatchOp::put(b"k".to_vec(), b"v".to_vec())])
            .unwrap();
        store
            .write_batch(&[
                BatchOp::delete(b"k".to_vec()),
                BatchOp::put(b"k2".to_vec(), b"v2".to_vec()),
            ])
            .unwrap();

        let all = store.scan().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].0, b"k2".to_vec());

        // deleting a missing key is not an error
        store
            .write_batch(&[BatchOp::delete(b"missing".to_vec())])
            .unwrap();
    }

    #[test]
    fn test_memory_store_failure_injection() {
        let store = testing::MemoryStore::new();
        store
            .write_batch(&[BatchOp::put(b"a".to_vec(), b"1".to_vec())])
            .unwrap();

        store.fail_next_batch();
        assert!(store
            .write_batch(&[BatchOp::put(b"b".to_vec(), b"2".to_vec())])
            .is_err());

        // nothing from the failed batch landed, next batch works again
        assert_eq!(store.scan().unwrap().len(), 1);
        store
            .write_batch(&[BatchOp::put(b"c".to_vec(), b"3".to_vec())])
            .unwrap();
    }
}
