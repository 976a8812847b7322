// Core moderation module - the anti-spam engine for group chats.

pub mod moderation_models;
pub mod moderation_service;

pub use moderation_models::*;
pub use moderation_service::*;

#[cfg(test)]
pub mod testing;
