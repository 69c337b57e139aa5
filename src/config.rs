//! Client configuration, read from the environment

use di::{inject, injectable};
use log::warn;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const DEFAULT_OLLAMA_HOST: &str = "http://127.0.0.1:11434";
pub const DEFAULT_MODEL: &str = "llama3.2";
pub const DEFAULT_DATABASE_URL: &str = "sqlite::memory:";
pub const DEFAULT_LISTEN_ADDR: &str = "0.0.0.0:3000";
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the inference server, without a trailing slash.
    pub ollama_host: String,
    /// Model used when a request doesn't select one.
    pub default_model: String,
    pub database_url: String,
    pub listen_addr: String,
    pub probe_interval: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            ollama_host: DEFAULT_OLLAMA_HOST.to_owned(),
            default_model: DEFAULT_MODEL.to_owned(),
            database_url: DEFAULT_DATABASE_URL.to_owned(),
            listen_addr: DEFAULT_LISTEN_ADDR.to_owned(),
            probe_interval: DEFAULT_PROBE_INTERVAL,
        }
    }
}

#[injectable]
impl ClientConfig {
    #[inject]
    pub fn create() -> ClientConfig {
        dotenvy::dotenv().ok();
        Self::from_lookup(|key| env::var(key).ok())
    }
}

impl ClientConfig {
    /// Builds a config from an arbitrary key lookup, falling back to defaults for anything
    /// missing or malformed.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> ClientConfig {
        let defaults = ClientConfig::default();

        let probe_interval = match lookup("PROBE_INTERVAL_SECS") {
            Some(raw) => match u64::from_str(raw.trim()) {
                Ok(secs) if secs > 0 => Duration::from_secs(secs),
                _ => {
                    warn!("ignoring invalid PROBE_INTERVAL_SECS={raw:?}");
                    defaults.probe_interval
                }
            },
            None => defaults.probe_interval,
        };

        ClientConfig {
            ollama_host: lookup("OLLAMA_HOST")
                .map(|host| host.trim_end_matches('/').to_owned())
                .unwrap_or(defaults.ollama_host),
            default_model: lookup("DEFAULT_MODEL").unwrap_or(defaults.default_model),
            database_url: lookup("DATABASE_URL").unwrap_or(defaults.database_url),
            listen_addr: lookup("LISTEN_ADDR").unwrap_or(defaults.listen_addr),
            probe_interval,
        }
    }

    /// Resolves an optional per-request model selection.
    pub fn model_or_default(&self, model: Option<String>) -> String {
        model
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| self.default_model.clone())
    }
}
