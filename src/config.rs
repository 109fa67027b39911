//! Server configuration parsed from environment variables.
//!
//! All settings are optional. Unset variables fall back to defaults; set but
//! unparseable values are rejected so a typo never silently changes limits.

use std::str::FromStr;

pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_PORT: u16 = 8000;
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:3000";
pub const DEFAULT_CLIENT_QUEUE_CAPACITY: usize = 256;
pub const DEFAULT_MAX_BOARD_OBJECTS: usize = 1000;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for {key}: {value:?}")]
    Invalid { key: &'static str, value: String },
    #[error("{key} must be greater than zero")]
    Zero { key: &'static str },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Config {
    pub host: String,
    pub port: u16,
    /// Allowed browser origins. A single `*` allows any origin.
    pub cors_allowed_origins: Vec<String>,
    /// Outbound frames buffered per connection before it counts as stalled.
    pub client_queue_capacity: usize,
    /// Object log cap per board; oldest objects are evicted first.
    pub max_board_objects: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_owned(),
            port: DEFAULT_PORT,
            cors_allowed_origins: vec![DEFAULT_CORS_ORIGIN.to_owned()],
            client_queue_capacity: DEFAULT_CLIENT_QUEUE_CAPACITY,
            max_board_objects: DEFAULT_MAX_BOARD_OBJECTS,
        }
    }
}

impl Config {
    /// Build config from the process environment.
    ///
    /// - `HOST`: bind address, default `0.0.0.0`
    /// - `PORT`: default 8000
    /// - `CORS_ALLOWED_ORIGINS`: comma-separated, default `http://localhost:3000`
    /// - `CLIENT_QUEUE_CAPACITY`: default 256
    /// - `MAX_BOARD_OBJECTS`: default 1000
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set to an unparseable or zero value.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    ///
    /// # Errors
    ///
    /// Returns an error if a value is unparseable or zero where a positive
    /// number is required.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let host = lookup("HOST")
            .map(|v| v.trim().to_owned())
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.host);
        let port = parse_var(&lookup, "PORT", defaults.port)?;
        let cors_allowed_origins = lookup("CORS_ALLOWED_ORIGINS")
            .map(|raw| parse_origins(&raw))
            .filter(|origins| !origins.is_empty())
            .unwrap_or(defaults.cors_allowed_origins);
        let client_queue_capacity = parse_positive(&lookup, "CLIENT_QUEUE_CAPACITY", defaults.client_queue_capacity)?;
        let max_board_objects = parse_positive(&lookup, "MAX_BOARD_OBJECTS", defaults.max_board_objects)?;

        Ok(Self { host, port, cors_allowed_origins, client_queue_capacity, max_board_objects })
    }

    /// `host:port` string for binding the listener.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    #[must_use]
    pub fn allows_any_origin(&self) -> bool {
        self.cors_allowed_origins.iter().any(|o| o == "*")
    }
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|o| !o.is_empty())
        .map(str::to_owned)
        .collect()
}

fn parse_var<F, T>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
{
    match lookup(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse::<T>()
            .map_err(|_| ConfigError::Invalid { key, value: raw }),
    }
}

fn parse_positive<F>(lookup: &F, key: &'static str, default: usize) -> Result<usize, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    let value = parse_var(lookup, key, default)?;
    if value == 0 {
        return Err(ConfigError::Zero { key });
    }
    Ok(value)
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
