// SQLite-backed key-value store.
//
// Tables:
// - kv_hash: (key, field) -> value
// - kv_set: (key, member)
// - kv_counter: key -> integer
//
// A key lives in exactly one table; writing a key that already lives in another
// table is rejected as a wrong-type error. Batches run inside one transaction.

use crate::core::store::{BatchOp, KvStore, StoreError};
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnection, SqlitePoolOptions};
use sqlx::{Pool, Row, Sqlite};
use std::collections::HashMap;
use std::path::Path;

fn storage_err(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

pub struct SqliteKvStore {
    pool: Pool<Sqlite>,
}

impl SqliteKvStore {
    /// Open (creating if needed) the database at `database_url`, which may be a bare
    /// file path or a `sqlite:` URL, and run migrations.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        // Make sure the directory for the database file exists
        let path_str = database_url
            .trim_start_matches("sqlite://")
            .trim_start_matches("sqlite:")
            .split('?')
            .next()
            .unwrap_or_default();
        if !path_str.contains(":memory:") {
            if let Some(parent) = Path::new(path_str).parent() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn_str = if database_url.starts_with("sqlite:") {
            database_url.to_string()
        } else {
            format!("sqlite://{}?mode=rwc", database_url)
        };

        let pool = SqlitePoolOptions::new().connect(&conn_str).await?;

        let store = Self { pool };
        store.migrate().await?;
        Ok(store)
    }

    async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_hash (
                key TEXT NOT NULL,
                field TEXT NOT NULL,
                value TEXT NOT NULL,
                PRIMARY KEY (key, field)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_set (
                key TEXT NOT NULL,
                member TEXT NOT NULL,
                PRIMARY KEY (key, member)
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS kv_counter (
                key TEXT PRIMARY KEY,
                value INTEGER NOT NULL
            );
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(())
    }

    /// Reject writing `key` as `table` if it already exists in another table.
    async fn ensure_kind(
        conn: &mut SqliteConnection,
        key: &str,
        table: &str,
    ) -> Result<(), StoreError> {
        let row = sqlx::query(
            r#"
            SELECT
                EXISTS(SELECT 1 FROM kv_hash WHERE key = ?1) AS in_hash,
                EXISTS(SELECT 1 FROM kv_set WHERE key = ?1) AS in_set,
                EXISTS(SELECT 1 FROM kv_counter WHERE key = ?1) AS in_counter
            "#,
        )
        .bind(key)
        .fetch_one(&mut *conn)
        .await
        .map_err(storage_err)?;

        let present = |column: &str| row.get::<i64, _>(column) != 0;
        let clash = match table {
            "kv_hash" => present("in_set") || present("in_counter"),
            "kv_set" => present("in_hash") || present("in_counter"),
            _ => present("in_hash") || present("in_set"),
        };
        if clash {
            return Err(StoreError::WrongType {
                key: key.to_string(),
            });
        }
        Ok(())
    }

    /// Apply one batch operation. Returns the number of rows changed.
    async fn apply(conn: &mut SqliteConnection, op: &BatchOp) -> Result<u64, StoreError> {
        match op {
            BatchOp::HashSetAll { key, fields } => {
                Self::ensure_kind(conn, key, "kv_hash").await?;
                let mut changed = 0;
                for (field, value) in fields {
                    changed += sqlx::query(
                        r#"
                        INSERT INTO kv_hash (key, field, value)
                        VALUES (?, ?, ?)
                        ON CONFLICT(key, field) DO UPDATE SET
                            value = excluded.value
                        "#,
                    )
                    .bind(key)
                    .bind(field)
                    .bind(value)
                    .execute(&mut *conn)
                    .await
                    .map_err(storage_err)?
                    .rows_affected();
                }
                Ok(changed)
            }
            BatchOp::SetAdd { key, member } => {
                Self::ensure_kind(conn, key, "kv_set").await?;
                let result = sqlx::query("INSERT OR IGNORE INTO kv_set (key, member) VALUES (?, ?)")
                    .bind(key)
                    .bind(member)
                    .execute(&mut *conn)
                    .await
                    .map_err(storage_err)?;
                Ok(result.rows_affected())
            }
            BatchOp::SetRemove { key, member } => {
                let result = sqlx::query("DELETE FROM kv_set WHERE key = ? AND member = ?")
                    .bind(key)
                    .bind(member)
                    .execute(&mut *conn)
                    .await
                    .map_err(storage_err)?;
                Ok(result.rows_affected())
            }
            BatchOp::Delete { key } => {
                let mut changed = 0;
                for sql in [
                    "DELETE FROM kv_hash WHERE key = ?",
                    "DELETE FROM kv_set WHERE key = ?",
                    "DELETE FROM kv_counter WHERE key = ?",
                ] {
                    changed += sqlx::query(sql)
                        .bind(key)
                        .execute(&mut *conn)
                        .await
                        .map_err(storage_err)?
                        .rows_affected();
                }
                Ok(changed)
            }
        }
    }

    async fn apply_single(&self, op: BatchOp) -> Result<u64, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        Self::apply(&mut conn, &op).await
    }
}

#[async_trait]
impl KvStore for SqliteKvStore {
    async fn hash_get_all(&self, key: &str) -> Result<HashMap<String, String>, StoreError> {
        let rows = sqlx::query("SELECT field, value FROM kv_hash WHERE key = ?")
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(rows
            .into_iter()
            .map(|row| (row.get::<String, _>("field"), row.get::<String, _>("value")))
            .collect())
    }

    async fn hash_get(&self, key: &str, field: &str) -> Result<Option<String>, StoreError> {
        let row = sqlx::query("SELECT value FROM kv_hash WHERE key = ? AND field = ?")
            .bind(key)
            .bind(field)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(row.map(|r| r.get("value")))
    }

    async fn hash_update(&self, key: &str, field: &str, value: &str) -> Result<bool, StoreError> {
        // One statement: the existence check and the write cannot be split by a
        // concurrent batch deleting the hash.
        let result = sqlx::query(
            r#"
            INSERT INTO kv_hash (key, field, value)
            SELECT ?1, ?2, ?3
            WHERE EXISTS (SELECT 1 FROM kv_hash WHERE key = ?1)
            ON CONFLICT(key, field) DO UPDATE SET
                value = excluded.value
            "#,
        )
        .bind(key)
        .bind(field)
        .bind(value)
        .execute(&self.pool)
        .await
        .map_err(storage_err)?;

        Ok(result.rows_affected() > 0)
    }

    async fn set_add_guarded(
        &self,
        guard: &str,
        key: &str,
        member: &str,
    ) -> Result<Option<bool>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        Self::ensure_kind(&mut conn, key, "kv_set").await?;

        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO kv_set (key, member)
            SELECT ?1, ?2
            WHERE EXISTS (SELECT 1 FROM kv_hash WHERE key = ?3)
            "#,
        )
        .bind(key)
        .bind(member)
        .bind(guard)
        .execute(&mut *conn)
        .await
        .map_err(storage_err)?;

        if result.rows_affected() > 0 {
            return Ok(Some(true));
        }

        // Nothing inserted: either already a member or the guard is gone.
        let guard_exists = sqlx::query("SELECT 1 FROM kv_hash WHERE key = ? LIMIT 1")
            .bind(guard)
            .fetch_optional(&mut *conn)
            .await
            .map_err(storage_err)?
            .is_some();
        Ok(guard_exists.then_some(false))
    }

    async fn set_remove(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let changed = self
            .apply_single(BatchOp::SetRemove {
                key: key.to_string(),
                member: member.to_string(),
            })
            .await?;
        Ok(changed > 0)
    }

    async fn set_is_member(&self, key: &str, member: &str) -> Result<bool, StoreError> {
        let row = sqlx::query("SELECT 1 FROM kv_set WHERE key = ? AND member = ?")
            .bind(key)
            .bind(member)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(row.is_some())
    }

    async fn set_members(&self, key: &str) -> Result<Vec<String>, StoreError> {
        let rows = sqlx::query("SELECT member FROM kv_set WHERE key = ? ORDER BY member")
            .bind(key)
            .fetch_all(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(rows
            .into_iter()
            .map(|r| r.get::<String, _>("member"))
            .collect())
    }

    async fn incr_capped(&self, key: &str, cap: i64) -> Result<i64, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(storage_err)?;
        Self::ensure_kind(&mut conn, key, "kv_counter").await?;

        // Single statement, so concurrent increments cannot lose updates.
        let row = sqlx::query(
            r#"
            INSERT INTO kv_counter (key, value)
            VALUES (?1, MIN(1, ?2))
            ON CONFLICT(key) DO UPDATE SET
                value = MIN(value + 1, ?2)
            RETURNING value
            "#,
        )
        .bind(key)
        .bind(cap)
        .fetch_one(&mut *conn)
        .await
        .map_err(storage_err)?;

        Ok(row.get("value"))
    }

    async fn counter(&self, key: &str) -> Result<i64, StoreError> {
        let row = sqlx::query("SELECT value FROM kv_counter WHERE key = ?")
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(storage_err)?;

        Ok(row.map(|r| r.get::<i64, _>("value")).unwrap_or(0))
    }

    async fn delete(&self, key: &str) -> Result<bool, StoreError> {
        let changed = self
            .apply_single(BatchOp::Delete {
                key: key.to_string(),
            })
            .await?;
        Ok(changed > 0)
    }

    async fn exec_batch(&self, ops: Vec<BatchOp>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(storage_err)?;
        for op in &ops {
            // Dropping `tx` on error rolls the whole batch back.
            Self::apply(&mut tx, op).await?;
        }
        tx.commit().await.map_err(storage_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    async fn open(dir: &tempfile::TempDir) -> SqliteKvStore {
        let path = dir.path().join("kv.db");
        SqliteKvStore::new(path.to_str().unwrap()).await.unwrap()
    }

    async fn seed_hash(store: &SqliteKvStore, key: &str) {
        store
            .exec_batch(vec![BatchOp::HashSetAll {
                key: key.to_string(),
                fields: vec![("limit".to_string(), "3".to_string())],
            }])
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_sqlite_hash_and_set_operations() {
        let dir = tempdir().unwrap();
        let store = open(&dir).await;
        seed_hash(&store, "group:1").await;

        assert!(store.hash_update("group:1", "limit", "5").await.unwrap());
        assert_eq!(
            store.hash_get("group:1", "limit").await.unwrap(),
            Some("5".to_string())
        );
        assert_eq!(store.hash_get_all("group:1").await.unwrap().len(), 1);

        for expected in [Some(true), Some(false)] {
            let added = store
                .set_add_guarded("group:1", "whitelist:1", "9")
                .await
                .unwrap();
            assert_eq!(added, expected);
        }
        assert_eq!(store.set_members("whitelist:1").await.unwrap(), vec!["9"]);
        assert!(store.set_remove("whitelist:1", "9").await.unwrap());
        assert!(!store.set_is_member("whitelist:1", "9").await.unwrap());
    }

    #[tokio::test]
    async fn test_sqlite_incr_capped_and_delete() {
        let dir = tempdir().unwrap();
        let store = open(&dir).await;

        assert_eq!(store.incr_capped("warns:1:2", 2).await.unwrap(), 1);
        assert_eq!(store.incr_capped("warns:1:2", 2).await.unwrap(), 2);
        assert_eq!(store.incr_capped("warns:1:2", 2).await.unwrap(), 2);

        assert!(store.delete("warns:1:2").await.unwrap());
        assert_eq!(store.counter("warns:1:2").await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_sqlite_batch_rolls_back_on_type_clash() {
        let dir = tempdir().unwrap();
        let store = open(&dir).await;
        seed_hash(&store, "taken").await;

        let result = store
            .exec_batch(vec![
                BatchOp::SetAdd {
                    key: "admin:1".to_string(),
                    member: "-100".to_string(),
                },
                BatchOp::SetAdd {
                    key: "taken".to_string(),
                    member: "x".to_string(),
                },
            ])
            .await;

        assert!(matches!(result, Err(StoreError::WrongType { .. })));
        assert!(store.set_members("admin:1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_guarded_writes_need_existing_hash() {
        let dir = tempdir().unwrap();
        let store = open(&dir).await;

        assert!(!store.hash_update("group:1", "is_active", "false").await.unwrap());
        assert_eq!(
            store
                .set_add_guarded("group:1", "whitelist:1", "9")
                .await
                .unwrap(),
            None
        );
        assert!(store.hash_get_all("group:1").await.unwrap().is_empty());
        assert!(store.set_members("whitelist:1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_sqlite_data_survives_reopen() {
        let dir = tempdir().unwrap();
        {
            let store = open(&dir).await;
            store
                .exec_batch(vec![
                    BatchOp::SetAdd {
                        key: "admin:1".to_string(),
                        member: "-100".to_string(),
                    },
                    BatchOp::HashSetAll {
                        key: "group:-100".to_string(),
                        fields: vec![("creator".to_string(), "1".to_string())],
                    },
                ])
                .await
                .unwrap();
            store.pool.close().await;
        }

        let store = open(&dir).await;
        assert_eq!(
            store.hash_get("group:-100", "creator").await.unwrap(),
            Some("1".to_string())
        );
        assert!(store.set_is_member("admin:1", "-100").await.unwrap());
    }
}
