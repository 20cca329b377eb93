//! Client configuration
//!
//! Layered with the `config` crate: built-in defaults, then an optional
//! `huddle.toml` in the working directory, then `HUDDLE_*` environment
//! variables (`HUDDLE_SERVER_URL`, `HUDDLE_CHANNEL`, ...).

use config::{Config, ConfigBuilder, ConfigError, Environment, File, Source, builder::DefaultState};
use huddle_protocol::Uid;
use rand::Rng;
use serde::Deserialize;
use std::time::Duration;

use crate::session::SessionConfig;

/// Base name of the optional config file (`huddle.toml`, `huddle.json`, ...)
pub const CONFIG_FILE: &str = "huddle";

/// Upper bound (exclusive) for generated identities
pub const MAX_GENERATED_UID: Uid = 100_000;

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct ClientConfig {
    /// Base URL of the credential service
    pub server_url: String,
    pub app_id: String,
    pub channel: String,
    pub display_name: String,
    pub credential_timeout_ms: u64,
    pub join_timeout_ms: u64,
    pub leave_timeout_ms: u64,
}

impl ClientConfig {
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from(File::with_name(CONFIG_FILE).required(false))
    }

    /// Load with `file` in place of `huddle.toml`
    pub fn load_from<S>(file: S) -> Result<Self, ConfigError>
    where
        S: Source + Send + Sync + 'static,
    {
        let config: ClientConfig = defaults()?
            .add_source(file)
            .add_source(Environment::with_prefix("HUDDLE"))
            .build()?
            .try_deserialize()?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::Message("server_url must not be empty".to_string()));
        }
        if self.channel.trim().is_empty() {
            return Err(ConfigError::Message("channel must not be empty".to_string()));
        }
        if self.credential_timeout_ms == 0 || self.join_timeout_ms == 0 || self.leave_timeout_ms == 0 {
            return Err(ConfigError::Message("timeouts must be positive".to_string()));
        }
        Ok(())
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            app_id: self.app_id.clone(),
            credential_timeout: Duration::from_millis(self.credential_timeout_ms),
            join_timeout: Duration::from_millis(self.join_timeout_ms),
            leave_timeout: Duration::from_millis(self.leave_timeout_ms),
        }
    }
}

fn defaults() -> Result<ConfigBuilder<DefaultState>, ConfigError> {
    Config::builder()
        .set_default("server_url", "http://localhost:8080")?
        .set_default("app_id", "huddle-dev")?
        .set_default("channel", "lobby")?
        .set_default("display_name", "guest")?
        .set_default("credential_timeout_ms", 5_000)?
        .set_default("join_timeout_ms", 10_000)?
        .set_default("leave_timeout_ms", 5_000)
}

/// Random local identity; never 0, which the credential service treats as missing
pub fn generate_uid() -> Uid {
    rand::thread_rng().gen_range(1..MAX_GENERATED_UID)
}
