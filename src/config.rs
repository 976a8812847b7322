// Runtime configuration, read from the environment (a `.env` file is honoured).

use anyhow::{bail, Context};

use crate::infra::telegram::telegram_client::DEFAULT_API_URL;

const DEFAULT_STORE_URL: &str = "sqlite://data/botguard.db?mode=rwc";
const DEFAULT_POLL_TIMEOUT_SECS: u64 = 30;
const DEFAULT_EVENT_QUEUE_SIZE: usize = 256;

/// Which key-value backend to run against.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreBackend {
    Memory,
    Sqlite(String),
    Redis(String),
}

impl StoreBackend {
    pub fn parse(url: &str) -> anyhow::Result<Self> {
        if url == "memory" {
            Ok(StoreBackend::Memory)
        } else if url.starts_with("redis://") || url.starts_with("rediss://") {
            Ok(StoreBackend::Redis(url.to_string()))
        } else if url.starts_with("sqlite:") {
            Ok(StoreBackend::Sqlite(url.to_string()))
        } else {
            bail!("unsupported STORE_URL {:?}: expected sqlite:, redis:// or memory", url)
        }
    }
}

#[derive(Debug, Clone)]
pub struct BotConfig {
    pub telegram_token: String,
    pub telegram_api_url: String,
    pub store: StoreBackend,
    pub poll_timeout_secs: u64,
    pub event_queue_size: usize,
}

impl BotConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> anyhow::Result<Self> {
        let telegram_token = lookup("TELEGRAM_TOKEN").context(
            "Missing TELEGRAM_TOKEN environment variable! Create a .env file with your bot token.",
        )?;

        let telegram_api_url =
            lookup("TELEGRAM_API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string());

        let store_url = lookup("STORE_URL").unwrap_or_else(|| DEFAULT_STORE_URL.to_string());
        let store = StoreBackend::parse(&store_url)?;

        let poll_timeout_secs = match lookup("POLL_TIMEOUT_SECS") {
            Some(v) => v
                .parse()
                .with_context(|| format!("POLL_TIMEOUT_SECS is not a number: {:?}", v))?,
            None => DEFAULT_POLL_TIMEOUT_SECS,
        };

        let event_queue_size = match lookup("EVENT_QUEUE_SIZE") {
            Some(v) => v
                .parse()
                .with_context(|| format!("EVENT_QUEUE_SIZE is not a number: {:?}", v))?,
            None => DEFAULT_EVENT_QUEUE_SIZE,
        };
        if event_queue_size == 0 {
            bail!("EVENT_QUEUE_SIZE must be at least 1");
        }

        Ok(Self {
            telegram_token,
            telegram_api_url,
            store,
            poll_timeout_secs,
            event_queue_size,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config(vars: &[(&str, &str)]) -> anyhow::Result<BotConfig> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        BotConfig::from_lookup(|name| vars.get(name).cloned())
    }

    #[test]
    fn test_defaults() {
        let config = config(&[("TELEGRAM_TOKEN", "123:abc")]).unwrap();

        assert_eq!(config.telegram_api_url, DEFAULT_API_URL);
        assert_eq!(
            config.store,
            StoreBackend::Sqlite(DEFAULT_STORE_URL.to_string())
        );
        assert_eq!(config.poll_timeout_secs, 30);
        assert_eq!(config.event_queue_size, 256);
    }

    #[test]
    fn test_token_is_required() {
        assert!(config(&[]).is_err());
    }

    #[test]
    fn test_store_selection() {
        let config = config(&[
            ("TELEGRAM_TOKEN", "123:abc"),
            ("STORE_URL", "redis://127.0.0.1:6379"),
        ])
        .unwrap();
        assert_eq!(
            config.store,
            StoreBackend::Redis("redis://127.0.0.1:6379".to_string())
        );

        assert_eq!(StoreBackend::parse("memory").unwrap(), StoreBackend::Memory);
        assert!(StoreBackend::parse("postgres://localhost").is_err());
    }

    #[test]
    fn test_bad_numbers_are_rejected() {
        assert!(config(&[("TELEGRAM_TOKEN", "t"), ("POLL_TIMEOUT_SECS", "soon")]).is_err());
        assert!(config(&[("TELEGRAM_TOKEN", "t"), ("EVENT_QUEUE_SIZE", "0")]).is_err());
    }
}
