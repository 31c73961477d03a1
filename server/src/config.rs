//! Server configuration.
//!
//! Owned by the surrounding process: the binary fills it from command line
//! flags and environment variables, tests build it directly.

use crate::ratelimit::RateLimit;
use crate::utils::random_instance_id;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("signing secret must not be empty")]
    EmptySecret,
    #[error("max clients must be at least 1")]
    ZeroCapacity,
    #[error("{0} must be greater than zero")]
    ZeroDuration(&'static str),
    #[error("{0} limit must allow at least one action")]
    ZeroRateLimit(&'static str),
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Shared HMAC secret, identical to the token issuer's.
    pub secret: Vec<u8>,
    /// Maximum concurrently Joined clients.
    pub max_clients: usize,
    pub tick_interval: Duration,
    pub snapshot_interval: Duration,
    pub handshake_timeout: Duration,
    /// How long shutdown waits for close frames to flush.
    pub shutdown_grace: Duration,
    pub motd: String,
    pub instance_id: String,
    pub chat_limit: RateLimit,
    pub emote_limit: RateLimit,
    pub blocked_words: Vec<String>,
}

impl ServerConfig {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            ..Self::default()
        }
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.secret.is_empty() {
            return Err(ConfigError::EmptySecret);
        }
        if self.max_clients == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        for (name, value) in [
            ("tick interval", self.tick_interval),
            ("snapshot interval", self.snapshot_interval),
            ("handshake timeout", self.handshake_timeout),
        ] {
            if value.is_zero() {
                return Err(ConfigError::ZeroDuration(name));
            }
        }
        for (name, limit) in [("chat", self.chat_limit), ("emote", self.emote_limit)] {
            if limit.max_actions == 0 || limit.window.is_zero() {
                return Err(ConfigError::ZeroRateLimit(name));
            }
        }
        Ok(())
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            secret: Vec::new(),
            max_clients: 64,
            tick_interval: Duration::from_millis(50),
            snapshot_interval: Duration::from_millis(100),
            handshake_timeout: Duration::from_millis(5000),
            shutdown_grace: Duration::from_millis(250),
            motd: "Welcome to the plaza!".to_string(),
            instance_id: random_instance_id(),
            chat_limit: RateLimit::CHAT,
            emote_limit: RateLimit::EMOTE,
            blocked_words: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ServerConfig::new("secret");
        assert_eq!(config.bind_address(), "127.0.0.1:8080");
        assert_eq!(config.tick_interval, Duration::from_millis(50));
        assert_eq!(config.snapshot_interval, Duration::from_millis(100));
        assert_eq!(config.handshake_timeout, Duration::from_millis(5000));
        assert_eq!(config.chat_limit, RateLimit::CHAT);
        assert_eq!(config.emote_limit, RateLimit::EMOTE);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_secret() {
        let config = ServerConfig::default();
        assert_eq!(config.validate(), Err(ConfigError::EmptySecret));
    }

    #[test]
    fn test_validate_rejects_zero_values() {
        let mut config = ServerConfig::new("secret");
        config.max_clients = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroCapacity));

        let mut config = ServerConfig::new("secret");
        config.snapshot_interval = Duration::ZERO;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroDuration("snapshot interval"))
        );

        let mut config = ServerConfig::new("secret");
        config.emote_limit.max_actions = 0;
        assert_eq!(config.validate(), Err(ConfigError::ZeroRateLimit("emote")));
    }
}
