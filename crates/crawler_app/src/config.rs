use std::str::FromStr;
use std::time::Duration;

use crawler_engine::{FetchSettings, ServiceSettings};
use log::LevelFilter;

pub const PORT: &str = "PORT";
pub const LOG_LEVEL: &str = "LOG_LEVEL";
pub const RATE_LIMIT_MAX_REQUESTS: &str = "RATE_LIMIT_MAX_REQUESTS";
pub const RATE_LIMIT_WINDOW_MS: &str = "RATE_LIMIT_WINDOW_MS";
pub const CACHE_TTL_MS: &str = "CACHE_TTL_MS";
pub const CACHE_MAX_SIZE: &str = "CACHE_MAX_SIZE";
pub const CRAWL_TIMEOUT_MS: &str = "CRAWL_TIMEOUT_MS";
pub const FETCH_TIMEOUT_MS: &str = "FETCH_TIMEOUT_MS";
pub const TRUST_PROXY_HEADERS: &str = "TRUST_PROXY_HEADERS";

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{key} must be {expected}, got {value:?}")]
    Invalid {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Process configuration, read once at startup.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppConfig {
    pub port: u16,
    pub log_level: LevelFilter,
    pub rate_limit_max_requests: usize,
    pub rate_limit_window: Duration,
    pub cache_ttl: Duration,
    pub cache_max_size: usize,
    /// Overall deadline for one crawl.
    pub crawl_timeout: Duration,
    /// Bound on a single fetch attempt.
    pub fetch_timeout: Duration,
    /// Key the rate limiter on `X-Forwarded-For` / `X-Real-IP`. Only safe
    /// behind a proxy that overwrites those headers.
    pub trust_proxy_headers: bool,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            port: 3000,
            log_level: LevelFilter::Info,
            rate_limit_max_requests: 10,
            rate_limit_window: Duration::from_millis(60_000),
            cache_ttl: Duration::from_millis(300_000),
            cache_max_size: 100,
            crawl_timeout: Duration::from_millis(30_000),
            fetch_timeout: Duration::from_millis(15_000),
            trust_proxy_headers: false,
        }
    }
}

impl AppConfig {
    /// Reads the configuration from the process environment.
    ///
    /// Unset or blank variables keep their defaults; a value that does not
    /// parse is an error naming the variable.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let read = |key: &str| {
            lookup(key)
                .map(|value| value.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let log_level = match read(LOG_LEVEL) {
            Some(raw) => crawler_logging::parse_level(&raw).ok_or(ConfigError::Invalid {
                key: LOG_LEVEL,
                value: raw,
                expected: "one of off, error, warn, info, debug, trace",
            })?,
            None => defaults.log_level,
        };

        Ok(Self {
            port: parse(read(PORT), PORT, "a port number")?.unwrap_or(defaults.port),
            log_level,
            rate_limit_max_requests: parse(
                read(RATE_LIMIT_MAX_REQUESTS),
                RATE_LIMIT_MAX_REQUESTS,
                "a non-negative integer",
            )?
            .unwrap_or(defaults.rate_limit_max_requests),
            rate_limit_window: millis(read(RATE_LIMIT_WINDOW_MS), RATE_LIMIT_WINDOW_MS)?
                .unwrap_or(defaults.rate_limit_window),
            cache_ttl: millis(read(CACHE_TTL_MS), CACHE_TTL_MS)?.unwrap_or(defaults.cache_ttl),
            cache_max_size: parse(read(CACHE_MAX_SIZE), CACHE_MAX_SIZE, "a non-negative integer")?
                .unwrap_or(defaults.cache_max_size),
            crawl_timeout: millis(read(CRAWL_TIMEOUT_MS), CRAWL_TIMEOUT_MS)?
                .unwrap_or(defaults.crawl_timeout),
            fetch_timeout: millis(read(FETCH_TIMEOUT_MS), FETCH_TIMEOUT_MS)?
                .unwrap_or(defaults.fetch_timeout),
            trust_proxy_headers: flag(read(TRUST_PROXY_HEADERS), TRUST_PROXY_HEADERS)?
                .unwrap_or(defaults.trust_proxy_headers),
        })
    }

    pub fn service_settings(&self) -> ServiceSettings {
        ServiceSettings {
            rate_limit_max_requests: self.rate_limit_max_requests,
            rate_limit_window: self.rate_limit_window,
            crawl_deadline: self.crawl_timeout,
        }
    }

    pub fn fetch_settings(&self) -> FetchSettings {
        FetchSettings {
            request_timeout: self.fetch_timeout,
            ..FetchSettings::default()
        }
    }
}

fn parse<T: FromStr>(
    raw: Option<String>,
    key: &'static str,
    expected: &'static str,
) -> Result<Option<T>, ConfigError> {
    raw.map(|value| {
        value.parse::<T>().map_err(|_| ConfigError::Invalid {
            key,
            value,
            expected,
        })
    })
    .transpose()
}

fn millis(raw: Option<String>, key: &'static str) -> Result<Option<Duration>, ConfigError> {
    Ok(parse::<u64>(raw, key, "a duration in milliseconds")?.map(Duration::from_millis))
}

fn flag(raw: Option<String>, key: &'static str) -> Result<Option<bool>, ConfigError> {
    raw.map(|value| match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::Invalid {
            key,
            value,
            expected: "a boolean (true/false)",
        }),
    })
    .transpose()
}
