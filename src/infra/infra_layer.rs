// The infra module contains implementations of core traits.
// Each backend goes in its own submodule.

#[path = "kv/mod.rs"]
pub mod kv;

#[path = "telegram/mod.rs"]
pub mod telegram;
