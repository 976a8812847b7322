// Core store module - the key-value port and the group state built on it.

pub mod group_state;
pub mod kv_store;

pub use group_state::*;
pub use kv_store::*;
