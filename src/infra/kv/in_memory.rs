// In-memory implementation of KvStore.
//
// Values live in a DashMap so concurrent event tasks can touch different keys
// without contending. Batches need to be all-or-nothing across keys, so every
// operation also passes through `gate`: single operations share it, batches take
// it exclusively. The gate is never held across anything but map access.

use crate::core::store::{BatchOp, KvStore, StoreError};
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use tokio::sync::RwLock;

#[derive(Clone, Debug)]
enum Value {
    Hash(HashMap<String, String>),
    Set(HashSet<String>),
    Counter(i64),
}

#[derive(Clone, Copy, PartialEq)]
enum Kind {
    Hash,
    Set,
}

pub struct InMemoryKvStore {
    data: DashMap<String, Value>,
    gate: RwLock<()>,
}

impl InMemoryKvStore {
    pub fn new() -> Self {
        Self {
            data: DashMap::new(),
            gate: RwLock::new(()),
        }
    }

    fn wrong_type(key: &str) -> StoreError {
        StoreError::WrongType {
            key: key.to_string(),
        }
    }

    fn check_kind(&self, key: &str, kind: Kind) -> Result<(), StoreError> {
        match (self.data.get(key).as_deref(), kind) {
            (None, _) | (Some(Value::Hash(_)), Kind::Hash) | (Some(Value::Set(_)), Kind::Set) => {
                Ok(())
            }
            _ => Err(Self::wrong_type(key)),
        }
    }

    fn hash_set_fields(
        &self,
        key: &str,
        fields: impl IntoIterator<Item = (String, String)>,
    ) -> Result<(), StoreError> {
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::Hash(HashMap::new()));
        match entry.value_mut() {
            Value::Hash(hash) => {
                hash.extend(fields);
                Ok(())
            }
            _ => Err(Self::wrong_type(key)),
        }
    }

    fn add_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert_with(|| Value::Set(HashSet::new()));
        match entry.value_mut() {
            Value::Set(set) => Ok(set.insert(member.to_string())),
            _ => Err(Self::wrong_type(key)),
        }
    }

    fn remove_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let removed = match self.data.get_mut(key).as_deref_mut() {
            Some(Value::Set(set)) => set.remove(member),
            Some(_) => return Err(Self::wrong_type(key)),
            None => false,
        };
        // Like Redis, an emptied set stops existing.
        self.data
            .remove_if(key, |_, v| matches!(v, Value::Set(set) if set.is_empty()));
        Ok(removed)
    }
}

impl Default for InMemoryKvStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KvStore for InMemoryKvStore {
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let _gate = self.gate.read().await;
        match self.data.get(key).as_deref() {
            Some(Value::Hash(hash)) => Ok(hash.clone()),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(HashMap::new()),
        }
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let _gate = self.gate.read().await;
        match self.data.get(key).as_deref() {
            Some(Value::Hash(hash)) => Ok(hash.get(field).cloned()),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(None),
        }
    }

    async fn hash_update(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let _gate = self.gate.read().await;
        // get_mut holds the shard lock, so a concurrent delete cannot slip in between.
        match self.data.get_mut(key).as_deref_mut() {
            Some(Value::Hash(hash)) => {
                hash.insert(field.to_string(), value.to_string());
                Ok(true)
            }
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(false),
        }
    }

    async fn set_add_guarded(
        &self,
        guard: &str,
        key: &str,
        member: &str,
    ) -> Result<Option<bool>, StoreError> {
        // Two keys are involved, so take the gate exclusively like a batch.
        let _gate = self.gate.write().await;
        match self.data.get(guard).as_deref() {
            Some(Value::Hash(_)) => {}
            Some(_) => return Err(Self::wrong_type(guard)),
            None => return Ok(None),
        }
        self.add_member(key, member).map(Some)
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let _gate = self.gate.read().await;
        self.remove_member(key, member)
    }

    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let _gate = self.gate.read().await;
        match self.data.get(key).as_deref() {
            Some(Value::Set(set)) => Ok(set.contains(member)),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(false),
        }
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let _gate = self.gate.read().await;
        match self.data.get(key).as_deref() {
            Some(Value::Set(set)) => Ok(set.iter().cloned().collect()),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(Vec::new()),
        }
    }

    async fn incr_capped(&self, key: &str, cap: i64) -> Result<i64, StoreError> {
        let _gate = self.gate.read().await;
        // The entry guard holds the shard lock, so the read-modify-write is atomic.
        let mut entry = self
            .data
            .entry(key.to_string())
            .or_insert(Value::Counter(0));
        match entry.value_mut() {
            Value::Counter(count) => {
                *count = count.saturating_add(1).min(cap);
                Ok(*count)
            }
            _ => Err(Self::wrong_type(key)),
        }
    }

    async fn counter(&self, key: &str) -> Result<i64, StoreError> {
        let _gate = self.gate.read().await;
        match self.data.get(key).as_deref() {
            Some(Value::Counter(count)) => Ok(*count),
            Some(_) => Err(Self::wrong_type(key)),
            None => Ok(0),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let _gate = self.gate.read().await;
        Ok(self.data.remove(key).is_some())
    }

    async fn exec_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        let _gate = self.gate.write().await;

        // Validate everything first so a type error leaves no partial writes.
        // Ops within one batch touching the same key with different kinds are
        // not supported.
        for op in &ops {
            match op {
                BatchOp::HashSetAll { key, .. } => self.check_kind(key, Kind::Hash)?,
                BatchOp::SetAdd { key, .. } | BatchOp::SetRemove { key, .. } => {
                    self.check_kind(key, Kind::Set)?
                }
                BatchOp::Delete { .. } => {}
            }
        }

        for op in ops {
            match op {
                BatchOp::HashSetAll { key, fields } => self.hash_set_fields(&key, fields)?,
                BatchOp::SetAdd { key, member } => {
                    self.add_member(&key, &member)?;
                }
                BatchOp::SetRemove { key, member } => {
                    self.remove_member(&key, &member)?;
                }
                BatchOp::Delete { key } => {
                    self.data.remove(&key);
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A store holding one hash at `key`.
    async fn hash_store(key: &str) -> InMemoryKvStore {
        let store = InMemoryKvStore::new();
        store
            .exec_batch(vec![BatchOp::HashSetAll {
                key: key.to_string(),
                fields: vec![("f".to_string(), "v".to_string())],
            }])
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_in_memory_sets() {
        let store = hash_store("g").await;

        assert_eq!(store.set_add_guarded("g", "s", "a").await.unwrap(), Some(true));
        assert_eq!(store.set_add_guarded("g", "s", "a").await.unwrap(), Some(false));
        assert!(store.set_is_member("s", "a").await.unwrap());

        assert!(store.set_remove("s", "a").await.unwrap());
        assert!(!store.set_remove("s", "a").await.unwrap());
        // Emptied sets disappear
        assert!(!store.delete("s").await.unwrap());
    }

    #[tokio::test]
    async fn test_incr_capped() {
        let store = InMemoryKvStore::new();

        assert_eq!(store.incr_capped("c", 2).await.unwrap(), 1);
        assert_eq!(store.incr_capped("c", 2).await.unwrap(), 2);
        assert_eq!(store.incr_capped("c", 2).await.unwrap(), 2);
        assert_eq!(store.counter("c").await.unwrap(), 2);
        assert_eq!(store.counter("missing").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_wrong_type_is_rejected() {
        let store = hash_store("h").await;

        let err = store.set_add_guarded("h", "h", "x").await.unwrap_err();
        assert!(matches!(err, StoreError::WrongType { .. }));
        let err = store.incr_capped("h", 3).await.unwrap_err();
        assert!(matches!(err, StoreError::WrongType { .. }));
    }

    #[tokio::test]
    async fn test_guarded_writes_need_existing_hash() {
        let store = InMemoryKvStore::new();

        assert!(!store.hash_update("h", "f", "v").await.unwrap());
        assert_eq!(store.set_add_guarded("h", "s", "a").await.unwrap(), None);
        assert!(store.hash_get_all("h").await.unwrap().is_empty());
        assert!(store.set_members("s").await.unwrap().is_empty());

        let store = hash_store("h").await;
        assert!(store.hash_update("h", "f", "w").await.unwrap());
        assert_eq!(store.hash_get("h", "f").await.unwrap(), Some("w".to_string()));
    }

    #[tokio::test]
    async fn test_failed_batch_leaves_no_partial_writes() {
        let store = hash_store("taken").await;

        let result = store
            .exec_batch(vec![
                BatchOp::SetAdd {
                    key: "fresh".to_string(),
                    member: "1".to_string(),
                },
                BatchOp::SetAdd {
                    key: "taken".to_string(),
                    member: "1".to_string(),
                },
            ])
            .await;

        assert!(result.is_err());
        assert!(store.set_members("fresh").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_batch_applies_all_ops() {
        let store = hash_store("g").await;
        store.set_add_guarded("g", "wl", "5").await.unwrap();

        store
            .exec_batch(vec![
                BatchOp::HashSetAll {
                    key: "h".to_string(),
                    fields: vec![("a".to_string(), "1".to_string())],
                },
                BatchOp::Delete {
                    key: "wl".to_string(),
                },
            ])
            .await
            .unwrap();

        assert_eq!(store.hash_get("h", "a").await.unwrap(), Some("1".to_string()));
        assert!(store.set_members("wl").await.unwrap().is_empty());
    }
}
