// Redis-backed key-value store.
//
// Hashes, sets and counters map directly onto Redis types. Batches are sent as a
// MULTI/EXEC pipeline. The capped counter increment and the guarded writes run as
// Lua scripts so each stays a single atomic step on the server.
//
// MULTI/EXEC does not roll back a command that fails at runtime, so batches check
// key types up front. A key changing type between that check and EXEC can still
// leave a partial batch; nothing in this crate writes the same key as two types.

use crate::core::store::{BatchOp, KvStore, StoreError};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::{AsyncCommands, Client, Script};
use std::collections::HashMap;

const INCR_CAPPED: &str = r#"
local value = redis.call('INCR', KEYS[1])
local cap = tonumber(ARGV[1])
if value > cap then
    redis.call('SET', KEYS[1], cap)
    value = cap
end
return value
"#;

const HASH_UPDATE: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return 0
end
redis.call('HSET', KEYS[1], ARGV[1], ARGV[2])
return 1
"#;

// Returns -1 when the guard hash is missing, otherwise the SADD reply.
const SET_ADD_GUARDED: &str = r#"
if redis.call('EXISTS', KEYS[1]) == 0 then
    return -1
end
return redis.call('SADD', KEYS[2], ARGV[1])
"#;

fn storage_err(e: redis::RedisError) -> StoreError {
    StoreError::Backend(e.to_string())
}

pub struct RedisKvStore {
    // ConnectionManager is a cheap handle that reconnects on its own.
    conn: ConnectionManager,
    incr_script: Script,
    hash_update_script: Script,
    set_add_script: Script,
}

impl RedisKvStore {
    pub async fn new(url: &str) -> anyhow::Result<Self> {
        let client = Client::open(url)?;
        let conn = ConnectionManager::new(client).await?;
        tracing::info!("connected to Redis store");
        Ok(Self {
            conn,
            incr_script: Script::new(INCR_CAPPED),
            hash_update_script: Script::new(HASH_UPDATE),
            set_add_script: Script::new(SET_ADD_GUARDED),
        })
    }

    /// Redis type an op needs its key to have, if any.
    fn expected_type(op: &BatchOp) -> Option<&'static str> {
        match op {
            BatchOp::HashSetAll { .. } => Some("hash"),
            BatchOp::SetAdd { .. } | BatchOp::SetRemove { .. } => Some("set"),
            BatchOp::Delete { .. } => None,
        }
    }

    /// Match the `TYPE` replies for each op's key against what the op needs.
    fn check_types(ops: &[BatchOp], types: &[String]) -> Result<(), StoreError> {
        for (op, actual) in ops.iter().zip(types) {
            match Self::expected_type(op) {
                Some(expected) if actual != "none" && actual != expected => {
                    return Err(StoreError::WrongType {
                        key: op.key().to_string(),
                    });
                }
                _ => {}
            }
        }
        Ok(())
    }

    fn pipeline(ops: &[BatchOp]) -> redis::Pipeline {
        let mut pipe = redis::pipe();
        pipe.atomic();
        for op in ops {
            match op {
                BatchOp::HashSetAll { key, fields } => {
                    pipe.hset_multiple(key, fields.as_slice()).ignore();
                }
                BatchOp::SetAdd { key, member } => {
                    pipe.sadd(key, member).ignore();
                }
                BatchOp::SetRemove { key, member } => {
                    pipe.srem(key, member).ignore();
                }
                BatchOp::Delete { key } => {
                    pipe.del(key).ignore();
                }
            }
        }
        pipe
    }
}

#[async_trait]
impl KvStore for RedisKvStore {
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.hgetall(key).await.map_err(storage_err)
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.hget(key, field).await.map_err(storage_err)
    }

    async fn hash_update(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let written: i64 = self
            .hash_update_script
            .key(key)
            .arg(field)
            .arg(value)
            .invoke_async(&mut conn)
            .await
            .map_err(storage_err)?;
        Ok(written == 1)
    }

    async fn set_add_guarded(
        &self,
        guard: &str,
        key: &str,
        member: &str,
    ) -> Result<Option<bool>, StoreError> {
        let mut conn = self.conn.clone();
        let added: i64 = self
            .set_add_script
            .key(guard)
            .key(key)
            .arg(member)
            .invoke_async(&mut conn)
            .await
            .map_err(storage_err)?;
        Ok((added >= 0).then_some(added > 0))
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.srem(key, member).await.map_err(storage_err)?;
        Ok(removed > 0)
    }

    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        conn.sismember(key, member).await.map_err(storage_err)
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let mut conn = self.conn.clone();
        conn.smembers(key).await.map_err(storage_err)
    }

    async fn incr_capped(&self, key: &str, cap: i64) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let value: i64 = self
            .incr_script
            .key(key)
            .arg(cap)
            .invoke_async(&mut conn)
            .await
            .map_err(storage_err)?;
        Ok(value)
    }

    async fn counter(&self, key: &str) -> Result<i64, StoreError> {
        let mut conn = self.conn.clone();
        let value: Option<i64> = conn.get(key).await.map_err(storage_err)?;
        Ok(value.unwrap_or(0))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await.map_err(storage_err)?;
        Ok(removed > 0)
    }

    async fn exec_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        if ops.is_empty() {
            return Ok(());
        }
        let mut conn = self.conn.clone();

        let mut type_query = redis::pipe();
        for op in &ops {
            type_query.cmd("TYPE").arg(op.key());
        }
        let types: Vec<String> = type_query
            .query_async(&mut conn)
            .await
            .map_err(storage_err)?;
        Self::check_types(&ops, &types)?;

        let _: () = Self::pipeline(&ops)
            .query_async(&mut conn)
            .await
            .map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pipeline_is_transactional() {
        let ops = vec![
            BatchOp::SetAdd {
                key: "admin:1".to_string(),
                member: "-100".to_string(),
            },
            BatchOp::Delete {
                key: "group:-100".to_string(),
            },
        ];

        let packed = String::from_utf8_lossy(&RedisKvStore::pipeline(&ops).get_packed_pipeline())
            .to_string();

        assert!(packed.contains("MULTI"));
        assert!(packed.contains("SADD"));
        assert!(packed.contains("DEL"));
        assert!(packed.contains("EXEC"));
    }

    #[test]
    fn test_type_check_rejects_clashing_keys() {
        let ops = vec![
            BatchOp::SetAdd {
                key: "admin:1".to_string(),
                member: "-100".to_string(),
            },
            BatchOp::HashSetAll {
                key: "group:-100".to_string(),
                fields: vec![("limit".to_string(), "3".to_string())],
            },
            BatchOp::Delete {
                key: "whitelist:-100".to_string(),
            },
        ];

        let fresh = vec!["none".to_string(), "hash".to_string(), "string".to_string()];
        assert!(RedisKvStore::check_types(&ops, &fresh).is_ok());

        let clash = vec!["hash".to_string(), "hash".to_string(), "none".to_string()];
        let err = RedisKvStore::check_types(&ops, &clash).unwrap_err();
        assert!(matches!(err, StoreError::WrongType { key } if key == "admin:1"));
    }
}
