//! Versioned handle on one actor's durable state slot

use std::{marker::PhantomData, sync::Arc};

use serde::{Serialize, de::DeserializeOwned};

use crate::{
    domain::error::OrchestratorError,
    port::state::{DurableState, SaveOutcome}
};

pub struct StateCell<T> {
    key:     String,
    version: Option<u64>,
    store:   Arc<dyn DurableState>,
    _state:  PhantomData<fn() -> T>
}

impl<T: Serialize + DeserializeOwned> StateCell<T> {
    /// Read the slot; `None` when nothing was ever written for `key`
    pub async fn load(store: Arc<dyn DurableState>, key: String) -> Result<(Self, Option<T>), OrchestratorError> {
        let (version, value) = match store.load(&key).await? {
            Some(blob) => (Some(blob.version), Some(serde_json::from_slice(&blob.data)?)),
            None => (None, None)
        };
        Ok((Self { key, version, store, _state: PhantomData }, value))
    }

    pub async fn save(&mut self, value: &T) -> Result<(), OrchestratorError> {
        let data = serde_json::to_vec(value)?;
        match self.store.save(&self.key, data, self.version).await? {
            SaveOutcome::Saved { version } => {
                self.version = Some(version);
                Ok(())
            }
            SaveOutcome::Conflict { current } => Err(OrchestratorError::Conflict(format!(
                "{} (expected {:?}, found {:?})",
                self.key, self.version, current
            )))
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}
