// Core gateway module - the chat platform operations the engine depends on.

pub mod chat_gateway;

pub use chat_gateway::*;
