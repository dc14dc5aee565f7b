use std::env;
use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// Runtime environment the process believes it is running in.
///
/// This is this proxy's equivalent of Node's `NODE_ENV`, read from `APP_ENV`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Environment {
    Development,
    Production,
    Test,
}

impl fmt::Display for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Environment::Development => "development",
            Environment::Production => "production",
            Environment::Test => "test",
        };
        f.write_str(s)
    }
}

impl std::str::FromStr for Environment {
    type Err = ConfigError;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "development" => Ok(Environment::Development),
            "production" => Ok(Environment::Production),
            "test" => Ok(Environment::Test),
            other => Err(ConfigError::InvalidValue {
                key: "APP_ENV",
                value: other.to_string(),
            }),
        }
    }
}

/// Validated process configuration, loaded once at startup from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub shutdown_timeout: Duration,
    pub max_reconnect_attempts: u32,
    pub heartbeat_interval: Duration,
    pub connection_timeout: Duration,
    pub log_level: log::LevelFilter,
    pub environment: Environment,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{key} must be an integer, got {value:?}")]
    NotAnInteger { key: &'static str, value: String },
    #[error("PORT must be between 1 and 65535, got {0}")]
    PortOutOfRange(i64),
    #[error("{key} must not be negative, got {value}")]
    Negative { key: &'static str, value: i64 },
    #[error("{key} has an invalid value: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

fn env_var(key: &'static str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_i64(key: &'static str, raw: &str) -> Result<i64, ConfigError> {
    raw.trim()
        .parse::<i64>()
        .map_err(|_| ConfigError::NotAnInteger {
            key,
            value: raw.to_string(),
        })
}

impl Config {
    /// Load configuration from the process environment, applying the defaults and validation
    /// rules in the external interfaces spec. Loads a `.env` file first, if one is present,
    /// without overriding already-set environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let port_raw = env_var("PORT", "3001");
        let port_num = parse_i64("PORT", &port_raw)?;
        if !(1..=65535).contains(&port_num) {
            return Err(ConfigError::PortOutOfRange(port_num));
        }
        let port = port_num as u16;

        let shutdown_ms = parse_i64(
            "SHUTDOWN_TIMEOUT_MS",
            &env_var("SHUTDOWN_TIMEOUT_MS", "30000"),
        )?;
        if shutdown_ms < 0 {
            return Err(ConfigError::Negative {
                key: "SHUTDOWN_TIMEOUT_MS",
                value: shutdown_ms,
            });
        }

        let max_reconnect_attempts = parse_i64(
            "MAX_RECONNECT_ATTEMPTS",
            &env_var("MAX_RECONNECT_ATTEMPTS", "5"),
        )?;
        if max_reconnect_attempts < 0 {
            return Err(ConfigError::Negative {
                key: "MAX_RECONNECT_ATTEMPTS",
                value: max_reconnect_attempts,
            });
        }

        let heartbeat_ms = parse_i64(
            "HEARTBEAT_INTERVAL",
            &env_var("HEARTBEAT_INTERVAL", "30000"),
        )?;
        if heartbeat_ms < 0 {
            return Err(ConfigError::Negative {
                key: "HEARTBEAT_INTERVAL",
                value: heartbeat_ms,
            });
        }

        let connection_timeout_ms = parse_i64(
            "CONNECTION_TIMEOUT",
            &env_var("CONNECTION_TIMEOUT", "10000"),
        )?;
        if connection_timeout_ms < 0 {
            return Err(ConfigError::Negative {
                key: "CONNECTION_TIMEOUT",
                value: connection_timeout_ms,
            });
        }

        let log_level_raw = env_var("LOG_LEVEL", "info");
        let log_level = log_level_raw
            .parse::<log::LevelFilter>()
            .map_err(|_| ConfigError::InvalidValue {
                key: "LOG_LEVEL",
                value: log_level_raw.clone(),
            })?;

        let environment = env_var("APP_ENV", "development").parse::<Environment>()?;

        Ok(Config {
            port,
            shutdown_timeout: Duration::from_millis(shutdown_ms as u64),
            max_reconnect_attempts: max_reconnect_attempts as u32,
            heartbeat_interval: Duration::from_millis(heartbeat_ms as u64),
            connection_timeout: Duration::from_millis(connection_timeout_ms as u64),
            log_level,
            environment,
        })
    }

    /// Initialize the global logger from this configuration. Call exactly once, before any
    /// other component starts.
    pub fn init_logging(&self) {
        env_logger::Builder::new()
            .filter_level(self.log_level)
            .format_timestamp_millis()
            .init();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_out_of_range_port() {
        let err = parse_i64("PORT", "70000").unwrap();
        assert_eq!(err, 70000);
        assert!(!(1..=65535).contains(&err));
    }

    #[test]
    fn rejects_non_integer_port() {
        let err = parse_i64("PORT", "not-a-number").unwrap_err();
        assert!(matches!(err, ConfigError::NotAnInteger { .. }));
    }

    #[test]
    fn environment_parses_known_values() {
        assert_eq!("production".parse::<Environment>().unwrap(), Environment::Production);
        assert_eq!("test".parse::<Environment>().unwrap(), Environment::Test);
        assert!("staging".parse::<Environment>().is_err());
    }
}
