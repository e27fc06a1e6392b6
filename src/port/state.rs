use async_trait::async_trait;

use crate::domain::error::OrchestratorError;

/// A stored blob together with the version it was written at
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VersionedBlob {
    pub version: u64,
    pub data:    Vec<u8>
}

/// Result of an optimistic write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    /// Written; the slot is now at `version`
    Saved { version: u64 },
    /// Someone else wrote first; `current` is the stored version (None if the slot is empty)
    Conflict { current: Option<u64> }
}

/// Port for the per-actor durable state cell
///
/// Each key holds one versioned blob. `expected_version` is `None` when the caller believes the
/// slot is still empty.
#[async_trait]
pub trait DurableState: Send + Sync {
    /// Read the blob stored under `key`
    async fn load(&self, key: &str) -> Result<Option<VersionedBlob>, OrchestratorError>;

    /// Write `data` if the stored version still equals `expected_version`
    async fn save(
        &self,
        key: &str,
        data: Vec<u8>,
        expected_version: Option<u64>
    ) -> Result<SaveOutcome, OrchestratorError>;

    /// Remove the slot (no-op when absent)
    async fn delete(&self, key: &str) -> Result<(), OrchestratorError>;

    /// List keys starting with `prefix`
    async fn keys(&self, prefix: &str) -> Result<Vec<String>, OrchestratorError>;
}
