// Telegram layer - turns platform updates into engine calls.

#[path = "dispatcher.rs"]
pub mod dispatcher;

#[path = "poller.rs"]
pub mod poller;
