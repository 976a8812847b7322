// Key-value store backends.
// - `in_memory.rs` keeps everything in DashMaps (tests, throwaway runs).
// - `sqlite_store.rs` persists to a local SQLite file.
// - `redis_store.rs` talks to a Redis server.

pub mod in_memory;
pub mod redis_store;
pub mod sqlite_store;

pub use in_memory::InMemoryKvStore;
pub use redis_store::RedisKvStore;
pub use sqlite_store::SqliteKvStore;
