//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;

/// Log output format
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Reliable (TCP) channel binding address
    pub server_addr: SocketAddr,
    /// Unreliable (UDP) channel binding address
    pub udp_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Human readable or JSON log lines
    pub log_format: LogFormat,

    /// Connections beyond this are refused at accept time
    pub max_players: usize,
    /// Seed for spawn point selection; random when unset
    pub world_seed: u64,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from an arbitrary key lookup
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Some(port) = lookup("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:7777".to_string())
        };
        let server_addr: SocketAddr = server_addr
            .parse()
            .map_err(|_| ConfigError::InvalidAddress("SERVER_ADDR"))?;

        let udp_addr = match lookup("UDP_ADDR") {
            Some(addr) => addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress("UDP_ADDR"))?,
            None => server_addr,
        };

        let log_format = match lookup("LOG_FORMAT").as_deref() {
            Some("json") => LogFormat::Json,
            _ => LogFormat::Text,
        };

        let max_players = match lookup("MAX_PLAYERS") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("MAX_PLAYERS"))?,
            None => 32,
        };

        let world_seed = match lookup("WORLD_SEED") {
            Some(raw) => raw
                .parse()
                .map_err(|_| ConfigError::InvalidNumber("WORLD_SEED"))?,
            None => rand::random(),
        };

        Ok(Self {
            server_addr,
            udp_addr,
            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
            log_format,
            max_players,
            world_seed,
        })
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid socket address in {0}")]
    InvalidAddress(&'static str),

    #[error("Invalid number in {0}")]
    InvalidNumber(&'static str),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = Config::from_lookup(lookup(&[])).unwrap();
        assert_eq!(config.server_addr.port(), 7777);
        assert_eq!(config.udp_addr, config.server_addr);
        assert_eq!(config.log_level, "info");
        assert_eq!(config.log_format, LogFormat::Text);
        assert_eq!(config.max_players, 32);
    }

    #[test]
    fn port_takes_precedence_over_server_addr() {
        let config = Config::from_lookup(lookup(&[
            ("PORT", "9000"),
            ("SERVER_ADDR", "127.0.0.1:1234"),
            ("WORLD_SEED", "42"),
            ("LOG_FORMAT", "json"),
        ]))
        .unwrap();
        assert_eq!(config.server_addr.port(), 9000);
        assert_eq!(config.world_seed, 42);
        assert_eq!(config.log_format, LogFormat::Json);
    }

    #[test]
    fn bad_values_are_rejected() {
        assert!(matches!(
            Config::from_lookup(lookup(&[("SERVER_ADDR", "nope")])),
            Err(ConfigError::InvalidAddress("SERVER_ADDR"))
        ));
        assert!(matches!(
            Config::from_lookup(lookup(&[("MAX_PLAYERS", "lots")])),
            Err(ConfigError::InvalidNumber("MAX_PLAYERS"))
        ));
    }
}
