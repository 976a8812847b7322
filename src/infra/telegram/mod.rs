// Telegram infra layer.
// - `telegram_client.rs` talks to the Bot HTTP API and implements ChatGateway.
// - `api_types.rs` mirrors the API payloads and converts them to core events.
// - `notices.rs` renders core notices into message text.

pub mod api_types;
pub mod notices;
pub mod telegram_client;

pub use api_types::Update;
pub use telegram_client::TelegramClient;
