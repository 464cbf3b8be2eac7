use std::env;
use std::time::Duration;

use url::Url;

use crate::arbiter::{ArbiterConfig, DEFAULT_CACHE_VERSION};
use crate::error::ConfigError;
use crate::gateway::{
    DEFAULT_API_PREFIX, DEFAULT_MAX_RETRIES, DEFAULT_RETRY_BASE_MS, DEFAULT_TIMEOUT_MS,
    GatewayConfig,
};
use crate::scheduler::{
    DEFAULT_ORDER_POLL_MS, DEFAULT_QUEUE_RELOAD_INTERVAL_MS, DEFAULT_REFRESH_INTERVAL_MS,
};
use crate::search::DEFAULT_SEARCH_DEBOUNCE_MS;

pub const DEFAULT_API_BASE_URL: &str = "http://127.0.0.1:5000";

#[derive(Clone, Debug)]
pub struct SyncConfig {
    pub api_base_url: Url,
    pub max_retries: u32,
    pub retry_base_interval: Duration,
    pub request_timeout: Duration,
    pub refresh_interval: Duration,
    pub queue_reload_interval: Duration,
    pub order_poll_delay: Duration,
    pub search_debounce: Duration,
    pub cache_version: String,
    pub poison_threshold: Option<u32>,
}

impl SyncConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let api_base_url = env::var("SPOTWASH_API_BASE_URL")
            .ok()
            .map(|value| value.trim().to_string())
            .filter(|value| !value.is_empty())
            .unwrap_or_else(|| DEFAULT_API_BASE_URL.to_string());
        let api_base_url = parse_base_url(&api_base_url)?;
        let max_retries = env::var("SPOTWASH_MAX_RETRIES")
            .unwrap_or_else(|_| DEFAULT_MAX_RETRIES.to_string())
            .parse::<u32>()
            .map_err(|error| ConfigError::InvalidMaxRetries(error.to_string()))?;
        let retry_base_ms = env::var("SPOTWASH_RETRY_BASE_MS")
            .unwrap_or_else(|_| DEFAULT_RETRY_BASE_MS.to_string())
            .parse::<u64>()
            .map_err(|error| ConfigError::InvalidRetryBaseMs(error.to_string()))?;
        let request_timeout_ms = env::var("SPOTWASH_REQUEST_TIMEOUT_MS")
            .unwrap_or_else(|_| DEFAULT_TIMEOUT_MS.to_string())
            .parse::<u64>()
            .map_err(|error| ConfigError::InvalidRequestTimeoutMs(error.to_string()))?;
        let refresh_interval_ms = positive_ms(
            "SPOTWASH_REFRESH_INTERVAL_MS",
            DEFAULT_REFRESH_INTERVAL_MS,
            ConfigError::InvalidRefreshIntervalMs,
        )?;
        let queue_reload_interval_ms = positive_ms(
            "SPOTWASH_QUEUE_RELOAD_INTERVAL_MS",
            DEFAULT_QUEUE_RELOAD_INTERVAL_MS,
            ConfigError::InvalidQueueReloadIntervalMs,
        )?;
        let order_poll_ms = positive_ms(
            "SPOTWASH_ORDER_POLL_MS",
            DEFAULT_ORDER_POLL_MS,
            ConfigError::InvalidOrderPollMs,
        )?;
        let search_debounce_ms = env::var("SPOTWASH_SEARCH_DEBOUNCE_MS")
            .unwrap_or_else(|_| DEFAULT_SEARCH_DEBOUNCE_MS.to_string())
            .parse::<u64>()
            .map_err(|error| ConfigError::InvalidSearchDebounceMs(error.to_string()))?;
        let cache_version = env::var("SPOTWASH_CACHE_VERSION")
            .unwrap_or_else(|_| DEFAULT_CACHE_VERSION.to_string());
        let cache_version = cache_version.trim().to_string();
        if cache_version.is_empty() || cache_version.contains(char::is_whitespace) {
            return Err(ConfigError::InvalidCacheVersion(cache_version));
        }
        let poison_threshold = match env::var("SPOTWASH_POISON_THRESHOLD") {
            Ok(value) if !value.trim().is_empty() => {
                let threshold = value
                    .trim()
                    .parse::<u32>()
                    .map_err(|error| ConfigError::InvalidPoisonThreshold(error.to_string()))?;
                Some(threshold).filter(|threshold| *threshold > 0)
            }
            _ => None,
        };

        Ok(Self {
            api_base_url,
            max_retries,
            retry_base_interval: Duration::from_millis(retry_base_ms),
            request_timeout: Duration::from_millis(request_timeout_ms),
            refresh_interval: Duration::from_millis(refresh_interval_ms),
            queue_reload_interval: Duration::from_millis(queue_reload_interval_ms),
            order_poll_delay: Duration::from_millis(order_poll_ms),
            search_debounce: Duration::from_millis(search_debounce_ms),
            cache_version,
            poison_threshold,
        })
    }

    #[must_use]
    pub fn gateway_config(&self) -> GatewayConfig {
        GatewayConfig {
            base_url: self.api_base_url.to_string(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            max_retries: self.max_retries,
            retry_base_interval: self.retry_base_interval,
        }
    }

    /// Arbiter scoped to the API host's origin.
    #[must_use]
    pub fn arbiter_config(&self) -> ArbiterConfig {
        ArbiterConfig::new(self.api_base_url.clone(), &self.cache_version)
    }
}

fn parse_base_url(raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|error| ConfigError::InvalidApiBaseUrl(error.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidApiBaseUrl(format!(
            "unsupported scheme {}",
            url.scheme()
        )));
    }
    Ok(url)
}

fn positive_ms(
    key: &str,
    default: u64,
    invalid: fn(String) -> ConfigError,
) -> Result<u64, ConfigError> {
    let value = env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .parse::<u64>()
        .map_err(|error| invalid(error.to_string()))?;
    if value == 0 {
        return Err(invalid("must be greater than zero".to_string()));
    }
    Ok(value)
}
