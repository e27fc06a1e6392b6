//! Durable state store implementations
//!
//! Both stores keep one versioned blob per key. A write only lands when the caller's expected
//! version matches what is stored, so two activations of the same actor can never silently
//! overwrite each other.

use std::{collections::BTreeMap, path::Path, sync::Arc};

use async_trait::async_trait;
use rocksdb::{DB, Options};
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{Level, event};

use crate::{
    domain::{constant::adapter, error::OrchestratorError},
    port::state::{DurableState, SaveOutcome, VersionedBlob}
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum, Default)]
pub enum StateStoreType {
    #[default]
    #[serde(rename = "inmemory")]
    #[value(name = "inmemory")]
    InMemory,
    #[serde(rename = "rocksdb")]
    #[value(name = "rocksdb")]
    RocksDb
}

impl StateStoreType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StateStoreType::InMemory => "inmemory",
            StateStoreType::RocksDb => "rocksdb"
        }
    }
}

fn check_version(key: &str, current: Option<u64>, expected: Option<u64>) -> Option<SaveOutcome> {
    if current == expected {
        None
    } else {
        event!(Level::DEBUG, event = adapter::STATE_CONFLICT, key = %key, current = ?current, expected = ?expected);
        Some(SaveOutcome::Conflict { current })
    }
}

/// In-memory state store, lost on restart; used for tests and the default CLI profile
#[derive(Debug, Default, Clone)]
pub struct InMemoryStateStore {
    slots: Arc<RwLock<BTreeMap<String, VersionedBlob>>>
}

impl InMemoryStateStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableState for InMemoryStateStore {
    async fn load(&self, key: &str) -> Result<Option<VersionedBlob>, OrchestratorError> {
        Ok(self.slots.read().await.get(key).cloned())
    }

    async fn save(
        &self,
        key: &str,
        data: Vec<u8>,
        expected_version: Option<u64>
    ) -> Result<SaveOutcome, OrchestratorError> {
        let mut slots = self.slots.write().await;
        let current = slots.get(key).map(|blob| blob.version);
        if let Some(conflict) = check_version(key, current, expected_version) {
            return Ok(conflict);
        }

        let version = current.map_or(1, |version| version + 1);
        slots.insert(key.to_string(), VersionedBlob { version, data });
        Ok(SaveOutcome::Saved { version })
    }

    async fn delete(&self, key: &str) -> Result<(), OrchestratorError> {
        self.slots.write().await.remove(key);
        Ok(())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, OrchestratorError> {
        let slots = self.slots.read().await;
        Ok(slots
            .range(prefix.to_string()..)
            .map(|(key, _)| key)
            .take_while(|key| key.starts_with(prefix))
            .cloned()
            .collect())
    }
}

/// On-disk layout of a RocksDB slot
#[derive(Serialize, Deserialize)]
struct StoredBlob {
    version: u64,
    data:    Vec<u8>
}

/// RocksDB-backed state store
///
/// RocksDB has no compare-and-swap, so writes are serialized through `write_lock` and the version
/// check happens inside the same blocking section as the put.
pub struct RocksDbStateStore {
    db:         Arc<DB>,
    write_lock: Arc<Mutex<()>>
}

impl RocksDbStateStore {
    pub fn from_db(db: Arc<DB>) -> Self {
        Self { db, write_lock: Arc::new(Mutex::new(())) }
    }

    pub fn open(path: &Path) -> Result<Self, OrchestratorError> {
        let mut opts = Options::default();
        opts.create_if_missing(true);
        opts.set_compression_type(rocksdb::DBCompressionType::Snappy);
        let db = DB::open(&opts, path)
            .map_err(|e| OrchestratorError::Storage(format!("Failed to open RocksDB at {}: {}", path.display(), e)))?;
        Ok(Self::from_db(Arc::new(db)))
    }

    fn read_slot(db: &DB, key: &str) -> Result<Option<StoredBlob>, OrchestratorError> {
        match db.get(key.as_bytes()) {
            Ok(Some(bytes)) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Ok(None) => Ok(None),
            Err(e) => Err(OrchestratorError::Storage(format!("Failed to read {} from RocksDB: {}", key, e)))
        }
    }
}

#[async_trait]
impl DurableState for RocksDbStateStore {
    async fn load(&self, key: &str) -> Result<Option<VersionedBlob>, OrchestratorError> {
        let db = self.db.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || -> Result<Option<VersionedBlob>, OrchestratorError> {
            Ok(Self::read_slot(&db, &key)?.map(|stored| VersionedBlob { version: stored.version, data: stored.data }))
        })
        .await
        .map_err(|e| OrchestratorError::Generic(format!("Failed to load state: {}", e)))?
    }

    async fn save(
        &self,
        key: &str,
        data: Vec<u8>,
        expected_version: Option<u64>
    ) -> Result<SaveOutcome, OrchestratorError> {
        let _guard = self.write_lock.lock().await;
        let db = self.db.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || -> Result<SaveOutcome, OrchestratorError> {
            let current = Self::read_slot(&db, &key)?.map(|stored| stored.version);
            if let Some(conflict) = check_version(&key, current, expected_version) {
                return Ok(conflict);
            }

            let version = current.map_or(1, |version| version + 1);
            let bytes = serde_json::to_vec(&StoredBlob { version, data })?;
            db.put(key.as_bytes(), bytes)?;
            Ok(SaveOutcome::Saved { version })
        })
        .await
        .map_err(|e| OrchestratorError::Generic(format!("Failed to save state: {}", e)))?
    }

    async fn delete(&self, key: &str) -> Result<(), OrchestratorError> {
        let _guard = self.write_lock.lock().await;
        let db = self.db.clone();
        let key = key.to_string();

        tokio::task::spawn_blocking(move || -> Result<(), OrchestratorError> { Ok(db.delete(key.as_bytes())?) })
            .await
            .map_err(|e| OrchestratorError::Generic(format!("Failed to delete state: {}", e)))?
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>, OrchestratorError> {
        let db = self.db.clone();
        let prefix = prefix.to_string();

        tokio::task::spawn_blocking(move || -> Result<Vec<String>, OrchestratorError> {
            let mut keys = Vec::new();
            let iter = db.iterator(rocksdb::IteratorMode::From(prefix.as_bytes(), rocksdb::Direction::Forward));
            for item in iter {
                let (key, _) =
                    item.map_err(|e| OrchestratorError::Storage(format!("Failed to iterate RocksDB: {}", e)))?;
                let key = String::from_utf8_lossy(&key);
                if !key.starts_with(&prefix) {
                    break;
                }
                keys.push(key.into_owned());
            }
            Ok(keys)
        })
        .await
        .map_err(|e| OrchestratorError::Generic(format!("Failed to list keys: {}", e)))?
    }
}

/// Factory for creating state stores based on configuration
pub struct StateStoreFactory;

impl StateStoreFactory {
    pub fn create(store_type: StateStoreType, db_path: Option<&Path>) -> Result<Arc<dyn DurableState>, OrchestratorError> {
        match store_type {
            StateStoreType::InMemory => Ok(Arc::new(InMemoryStateStore::new())),
            StateStoreType::RocksDb => {
                let path = db_path.ok_or_else(|| {
                    OrchestratorError::Configuration("rocksdb storage requires a path".to_string())
                })?;
                Ok(Arc::new(RocksDbStateStore::open(path)?))
            }
        }
    }
}
