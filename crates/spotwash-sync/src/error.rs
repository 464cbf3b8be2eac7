//! Error types shared across the sync layer.

use thiserror::Error;

use crate::transport::NetworkFailure;

/// Failure surfaced by the request gateway.
///
/// `Transport` and `Application` are never retried; only `NetworkUnavailable`
/// is recovered locally, and only while the page believes it is online.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GatewayError {
    #[error("gateway_base_url_missing")]
    BaseUrlMissing,
    #[error("gateway_invalid_endpoint")]
    InvalidEndpoint,
    #[error("http_{status}:{body}")]
    Transport { status: u16, body: String },
    #[error("network_unavailable:{message}")]
    NetworkUnavailable { message: String },
    #[error("application_error:{message}")]
    Application { message: String },
    #[error("json_decode_failed:{message}")]
    Decode { message: String },
}

impl GatewayError {
    /// Whether a caller may park the failed call in the replay queue.
    #[must_use]
    pub fn is_offline_eligible(&self) -> bool {
        matches!(self, Self::NetworkUnavailable { .. })
    }

    #[must_use]
    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Transport { status, .. } => Some(*status),
            _ => None,
        }
    }
}

impl From<NetworkFailure> for GatewayError {
    fn from(failure: NetworkFailure) -> Self {
        Self::NetworkUnavailable {
            message: failure.to_string(),
        }
    }
}

/// Failure surfaced by the cache arbiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ArbiterError {
    #[error("network error: {0}")]
    Network(#[from] NetworkFailure),
    #[error("no cached response for {0}")]
    NoCachedResponse(String),
    #[error("precache failed for {url}: {reason}")]
    Precache { url: String, reason: String },
    #[error("invalid request url: {0}")]
    InvalidUrl(String),
    #[error("worker is gone")]
    WorkerGone,
}

/// Configuration error raised while reading the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid SPOTWASH_API_BASE_URL: {0}")]
    InvalidApiBaseUrl(String),
    #[error("invalid SPOTWASH_MAX_RETRIES: {0}")]
    InvalidMaxRetries(String),
    #[error("invalid SPOTWASH_RETRY_BASE_MS: {0}")]
    InvalidRetryBaseMs(String),
    #[error("invalid SPOTWASH_REQUEST_TIMEOUT_MS: {0}")]
    InvalidRequestTimeoutMs(String),
    #[error("invalid SPOTWASH_REFRESH_INTERVAL_MS: {0}")]
    InvalidRefreshIntervalMs(String),
    #[error("invalid SPOTWASH_QUEUE_RELOAD_INTERVAL_MS: {0}")]
    InvalidQueueReloadIntervalMs(String),
    #[error("invalid SPOTWASH_ORDER_POLL_MS: {0}")]
    InvalidOrderPollMs(String),
    #[error("invalid SPOTWASH_SEARCH_DEBOUNCE_MS: {0}")]
    InvalidSearchDebounceMs(String),
    #[error("invalid SPOTWASH_CACHE_VERSION: {0}")]
    InvalidCacheVersion(String),
    #[error("invalid SPOTWASH_POISON_THRESHOLD: {0}")]
    InvalidPoisonThreshold(String),
}
