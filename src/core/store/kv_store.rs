// Key-value store port.
//
// The moderation core only speaks in hashes, sets and counters. Backends live in
// `infra/kv/` and decide how those map onto SQLite tables, Redis keys or memory.

use async_trait::async_trait;
use std::collections::HashMap;
use thiserror::Error;

// ============================================================================
// ERRORS
// ============================================================================

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Storage error: {0}")]
    Backend(String),

    /// The key exists but holds a different kind of value.
    #[error("Key {key} holds a value of the wrong type")]
    WrongType { key: String },

    /// A persisted field could not be parsed.
    #[error("Corrupt value {value:?} in field {field} of {key}")]
    Corrupt {
        key: String,
        field: String,
        value: String,
    },
}

// ============================================================================
// BATCHES
// ============================================================================

/// One mutation inside an atomic batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    /// Write every given field of a hash, keeping fields not mentioned.
    HashSetAll {
        key: String,
        fields: Vec<(String, String)>,
    },
    SetAdd { key: String, member: String },
    SetRemove { key: String, member: String },
    /// Drop the key whatever kind of value it holds.
    Delete { key: String },
}

impl BatchOp {
    pub fn key(&self) -> &str {
        match self {
            BatchOp::HashSetAll { key, .. }
            | BatchOp::SetAdd { key, .. }
            | BatchOp::SetRemove { key, .. }
            | BatchOp::Delete { key } => key,
        }
    }
}

// ============================================================================
// STORAGE TRAIT (PORT)
// ============================================================================

/// Typed operations over a hash/set/counter store.
///
/// Every call is a suspension point; implementations must not rely on callers
/// serializing access. `exec_batch` is all-or-nothing.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// All fields of a hash. A missing key yields an empty map.
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError>;

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError>;

    /// Overwrite one field of an existing hash. Returns `false`, writing nothing, if
    /// the hash does not exist. New hashes are only created through `exec_batch`.
    async fn hash_update(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError>;

    /// Add `member` to the set at `key`, but only while the hash at `guard` exists.
    /// The check and the write are one atomic step.
    ///
    /// `None` if the guard is missing, otherwise whether the member was newly added.
    async fn set_add_guarded(
        &self,
        guard: &str,
        key: &str,
        member: &str,
    ) -> Result<Option<bool>, StoreError>;

    /// Returns `true` if the member was present.
    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool, StoreError>;

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError>;

    /// Atomically increment a counter (absent counts as 0) without letting it exceed
    /// `cap`. Returns the stored value after the increment.
    async fn incr_capped(&self, key: &str, cap: i64) -> Result<i64, StoreError>;

    /// Reads a counter; absent counts as 0.
    async fn counter(&self, key: &str) -> Result<i64, StoreError>;

    /// Returns `true` if the key existed.
    async fn delete(&self, key: &str) -> Result<bool, StoreError>;

    /// Apply every operation or none of them.
    async fn exec_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError>;
}
