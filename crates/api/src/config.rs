//! Process configuration, read from environment variables at startup.
//!
//! | Variable | Default | Meaning |
//! |---|---|---|
//! | `STOCKFLOW_BIND_ADDR` | `0.0.0.0:8080` | listen address |
//! | `DATABASE_URL` | unset | Postgres connection string; unset selects the in-memory store |
//! | `STOCKFLOW_DB_MAX_CONNECTIONS` | `10` | Postgres pool size |
//! | `STOCKFLOW_LOG_FORMAT` | `json` | `json` or `pretty` |
//! | `STOCKFLOW_SEED_DEMO` | `false` | load the demo catalog and stock on startup |

use std::net::SocketAddr;

use thiserror::Error;

use stockflow_observability::LogFormat;

pub const DEFAULT_BIND_ADDR: &str = "0.0.0.0:8080";
pub const DEFAULT_DB_MAX_CONNECTIONS: u32 = 10;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {name}: {message}")]
    Invalid { name: &'static str, message: String },
}

impl ConfigError {
    fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            message: message.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub bind_addr: SocketAddr,
    pub database_url: Option<String>,
    pub db_max_connections: u32,
    pub log_format: LogFormat,
    pub seed_demo: bool,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let bind_addr = get("STOCKFLOW_BIND_ADDR")
            .unwrap_or_else(|| DEFAULT_BIND_ADDR.to_string())
            .trim()
            .parse::<SocketAddr>()
            .map_err(|e| ConfigError::invalid("STOCKFLOW_BIND_ADDR", e.to_string()))?;

        let db_max_connections = match get("STOCKFLOW_DB_MAX_CONNECTIONS") {
            None => DEFAULT_DB_MAX_CONNECTIONS,
            Some(raw) => match raw.trim().parse::<u32>() {
                Ok(0) => {
                    return Err(ConfigError::invalid(
                        "STOCKFLOW_DB_MAX_CONNECTIONS",
                        "must be at least 1",
                    ));
                }
                Ok(n) => n,
                Err(e) => {
                    return Err(ConfigError::invalid(
                        "STOCKFLOW_DB_MAX_CONNECTIONS",
                        e.to_string(),
                    ));
                }
            },
        };

        let log_format = match get("STOCKFLOW_LOG_FORMAT") {
            None => LogFormat::default(),
            Some(raw) => raw
                .parse::<LogFormat>()
                .map_err(|e| ConfigError::invalid("STOCKFLOW_LOG_FORMAT", e.to_string()))?,
        };

        let seed_demo = match get("STOCKFLOW_SEED_DEMO") {
            None => false,
            Some(raw) => parse_flag(&raw)
                .ok_or_else(|| ConfigError::invalid("STOCKFLOW_SEED_DEMO", "expected true or false"))?,
        };

        Ok(Self {
            bind_addr,
            database_url: get("DATABASE_URL"),
            db_max_connections,
            log_format,
            seed_demo,
        })
    }
}

fn parse_flag(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
