// This is the entry point of the moderation bot.
//
// **Architecture Overview:**
// - `core/` = Business logic (platform-agnostic): engine, store port, gateway port
// - `infra/` = Implementations of core traits (SQLite, Redis, in-memory, Telegram HTTP)
// - `telegram/` = Telegram-specific plumbing (update polling, event dispatch)
//
// This file's job is to:
// 1. Load configuration
// 2. Initialize the store and gateway (dependency injection)
// 3. Wire the poller to the dispatcher and run until the stream ends or Ctrl-C

// These attrs point each module declaration at a more descriptive root file
// so we don't end up with several mod.rs files that all look the same.
#[path = "core/core_layer.rs"]
mod core;
#[path = "infra/infra_layer.rs"]
mod infra;
#[path = "telegram/telegram_layer.rs"]
mod telegram;

mod config;

use std::sync::Arc;

use anyhow::Context;
use tokio::sync::mpsc;

use crate::config::{BotConfig, StoreBackend};
use crate::core::moderation::{Account, ModerationEngine};
use crate::core::store::KvStore;
use crate::infra::kv::{InMemoryKvStore, RedisKvStore, SqliteKvStore};
use crate::infra::telegram::TelegramClient;
use crate::telegram::dispatcher::Dispatcher;
use crate::telegram::poller::poll_updates;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging so we can see what's happening
    tracing_subscriber::fmt::init();

    // Load environment variables from .env file (if it exists)
    dotenv::dotenv().ok();

    let config = BotConfig::from_env()?;

    let client = Arc::new(
        TelegramClient::new(&config.telegram_api_url, &config.telegram_token)
            .context("Failed to create Telegram client")?,
    );
    let me = client
        .get_me()
        .await
        .context("Failed to fetch the bot account, is TELEGRAM_TOKEN valid?")?;

    // ========================================================================
    // DEPENDENCY INJECTION
    // ========================================================================
    // The store backend is picked at runtime, so each arm hands a concrete store
    // to the same generic composition root.
    match &config.store {
        StoreBackend::Memory => {
            tracing::warn!("using the in-memory store, state is lost on exit");
            serve(InMemoryKvStore::new(), client, me, &config).await
        }
        StoreBackend::Sqlite(url) => {
            let store = SqliteKvStore::new(url)
                .await
                .context("Failed to initialize SQLite store")?;
            serve(store, client, me, &config).await
        }
        StoreBackend::Redis(url) => {
            let store = RedisKvStore::new(url)
                .await
                .context("Failed to connect to Redis")?;
            serve(store, client, me, &config).await
        }
    }
}

async fn serve<S: KvStore + 'static>(
    store: S,
    client: Arc<TelegramClient>,
    me: Account,
    config: &BotConfig,
) -> anyhow::Result<()> {
    let engine = Arc::new(ModerationEngine::new(store, Arc::clone(&client), me.id));
    let dispatcher = Dispatcher::new(engine);

    let (tx, rx) = mpsc::channel(config.event_queue_size);
    let timeout_secs = config.poll_timeout_secs;
    let poller = tokio::spawn(async move { poll_updates(&*client, tx, timeout_secs).await });

    tracing::info!(bot = me.id, username = ?me.username, "bot is ready");

    let run = dispatcher.run(rx);
    tokio::pin!(run);

    let signal = tokio::select! {
        _ = &mut run => None,
        signal = tokio::signal::ctrl_c() => Some(signal),
    };

    match signal {
        None => tracing::info!("event stream ended"),
        Some(Ok(())) => {
            // Stopping the poller closes the stream; let in-flight events finish.
            tracing::info!("shutting down");
            poller.abort();
            run.await;
        }
        Some(Err(e)) => {
            tracing::error!("cannot listen for shutdown signal: {}", e);
            run.await;
        }
    }

    Ok(())
}
