// The core module contains all business logic.
// Each concern gets its own submodule; none of them know about Telegram.

#[path = "moderation/mod.rs"]
pub mod moderation;

#[path = "store/mod.rs"]
pub mod store;

#[path = "gateway/mod.rs"]
pub mod gateway;
