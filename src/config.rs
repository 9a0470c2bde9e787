use crate::session::{DEFAULT_RECONNECT_DELAY, DEFAULT_STREAM_END_DELAY};
use crate::shape_fetcher::RetryPolicy;
use std::time::Duration;

pub const DEFAULT_BASE_URL: &str = "https://api-v3.mbta.com";

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be a non-negative integer, got {value:?}")]
    NotANumber { name: &'static str, value: String },
    #[error("{name} must be at least 1")]
    Zero { name: &'static str },
}

#[derive(Debug, Clone, PartialEq)]
pub struct OverlayConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub reconnect_delay: Duration,
    /// wait after the server ends the stream cleanly
    pub stream_end_delay: Duration,
    pub shape_retry: RetryPolicy,
}

impl Default for OverlayConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key: None,
            reconnect_delay: DEFAULT_RECONNECT_DELAY,
            stream_end_delay: DEFAULT_STREAM_END_DELAY,
            shape_retry: RetryPolicy::default(),
        }
    }
}

impl OverlayConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the config from any name -> value lookup. Unset and empty values take defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let millis = |name: &'static str, default: Duration| -> Result<Duration, ConfigError> {
            match get(name) {
                Some(value) => parse_u64(name, &value).map(Duration::from_millis),
                None => Ok(default),
            }
        };

        let defaults = RetryPolicy::default();

        let max_attempts = match get("LIVEMAP_SHAPE_MAX_ATTEMPTS") {
            Some(value) => {
                let attempts = parse_u64("LIVEMAP_SHAPE_MAX_ATTEMPTS", &value)?;
                if attempts == 0 {
                    return Err(ConfigError::Zero {
                        name: "LIVEMAP_SHAPE_MAX_ATTEMPTS",
                    });
                }
                u32::try_from(attempts).unwrap_or(u32::MAX)
            }
            None => defaults.max_attempts,
        };

        Ok(Self {
            base_url: get("MBTA_API_BASE_URL").unwrap_or_else(|| DEFAULT_BASE_URL.to_string()),
            api_key: get("MBTA_API_KEY"),
            reconnect_delay: millis("LIVEMAP_RECONNECT_DELAY_MS", DEFAULT_RECONNECT_DELAY)?,
            stream_end_delay: millis("LIVEMAP_STREAM_END_DELAY_MS", DEFAULT_STREAM_END_DELAY)?,
            shape_retry: RetryPolicy {
                initial_delay: millis("LIVEMAP_SHAPE_RETRY_DELAY_MS", defaults.initial_delay)?,
                max_attempts,
                pacing: millis("LIVEMAP_SHAPE_PACING_MS", defaults.pacing)?,
            },
        })
    }
}

fn parse_u64(name: &'static str, value: &str) -> Result<u64, ConfigError> {
    value
        .trim()
        .parse::<u64>()
        .map_err(|_| ConfigError::NotANumber {
            name,
            value: value.to_string(),
        })
}
