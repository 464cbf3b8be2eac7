//! Request gateway: the single chokepoint for JSON API calls.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};
use url::Url;

use crate::connectivity::ConnectivityHandle;
use crate::envelope::ApiEnvelope;
use crate::error::GatewayError;
use crate::models::{DashboardStats, OrderDetail, OrderQueue, SearchResults};
use crate::queue::{ActionReplayer, PendingAction};
use crate::transport::{HttpMethod, HttpRequest, HttpResponse, HttpTransport};

pub const DEFAULT_API_PREFIX: &str = "/api";
pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_RETRY_BASE_MS: u64 = 1_000;
pub const DEFAULT_TIMEOUT_MS: u64 = 10_000;

#[derive(Debug, Clone)]
pub struct GatewayConfig {
    pub base_url: String,
    pub api_prefix: String,
    pub max_retries: u32,
    pub retry_base_interval: Duration,
}

impl GatewayConfig {
    #[must_use]
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into(),
            api_prefix: DEFAULT_API_PREFIX.to_string(),
            max_retries: DEFAULT_MAX_RETRIES,
            retry_base_interval: Duration::from_millis(DEFAULT_RETRY_BASE_MS),
        }
    }
}

/// Retry allowance owned by one call chain.
///
/// Each `call` starts with a fresh budget, so a struggling endpoint cannot
/// spend the retries of an unrelated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryBudget {
    max_retries: u32,
    used: u32,
}

impl RetryBudget {
    #[must_use]
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            used: 0,
        }
    }

    #[must_use]
    pub fn used(&self) -> u32 {
        self.used
    }

    /// Claim the next retry, returning its 1-based number.
    pub fn next_retry(&mut self) -> Option<u32> {
        if self.used >= self.max_retries {
            return None;
        }
        self.used += 1;
        Some(self.used)
    }

    /// Linear backoff: retry `k` waits `k × base`.
    #[must_use]
    pub fn delay_for(retry: u32, base: Duration) -> Duration {
        base.saturating_mul(retry)
    }
}

pub struct RequestGateway<T> {
    base_url: Url,
    api_prefix: String,
    max_retries: u32,
    retry_base_interval: Duration,
    transport: T,
    connectivity: ConnectivityHandle,
}

impl<T> RequestGateway<T>
where
    T: HttpTransport,
{
    pub fn new(
        config: GatewayConfig,
        transport: T,
        connectivity: ConnectivityHandle,
    ) -> Result<Self, GatewayError> {
        let trimmed = config.base_url.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(GatewayError::BaseUrlMissing);
        }
        let base_url = Url::parse(trimmed).map_err(|_| GatewayError::BaseUrlMissing)?;
        let api_prefix = format!("/{}", config.api_prefix.trim().trim_matches('/'));
        Ok(Self {
            base_url,
            api_prefix,
            max_retries: config.max_retries,
            retry_base_interval: config.retry_base_interval,
            transport,
            connectivity,
        })
    }

    #[must_use]
    pub fn connectivity(&self) -> &ConnectivityHandle {
        &self.connectivity
    }

    /// Resolve an API endpoint (`/orders/5/start`) to an absolute URL.
    pub fn endpoint_url(&self, endpoint: &str) -> Result<Url, GatewayError> {
        let trimmed = endpoint.trim();
        if trimmed.is_empty() {
            return Err(GatewayError::InvalidEndpoint);
        }
        let path = if trimmed.starts_with('/') {
            format!("{}{}", self.api_prefix, trimmed)
        } else {
            format!("{}/{}", self.api_prefix, trimmed)
        };
        self.base_url
            .join(&path)
            .map_err(|_| GatewayError::InvalidEndpoint)
    }

    #[must_use]
    pub fn search_path(query: &str) -> String {
        let encoded: String = url::form_urlencoded::byte_serialize(query.trim().as_bytes()).collect();
        format!("/search?q={encoded}")
    }

    #[must_use]
    pub fn order_path(order_id: u64) -> String {
        format!("/orders/{order_id}")
    }

    #[must_use]
    pub fn order_start_path(order_id: u64) -> String {
        format!("/orders/{order_id}/start")
    }

    #[must_use]
    pub fn order_finish_path(order_id: u64) -> String {
        format!("/orders/{order_id}/finish")
    }

    #[must_use]
    pub fn dashboard_stats_path() -> &'static str {
        "/dashboard-stats"
    }

    /// Issue one API call, retrying transient network failures while online.
    pub async fn call(
        &self,
        endpoint: &str,
        method: HttpMethod,
        payload: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<Value, GatewayError> {
        let request = self.build_request(endpoint, method, payload, headers)?;
        let mut budget = RetryBudget::new(self.max_retries);

        loop {
            let attempt = budget.used() + 1;
            let error = match self.attempt(request.clone()).await {
                Ok(value) => {
                    debug!(endpoint, %method, attempt, "api call succeeded");
                    return Ok(value);
                }
                Err(error) => error,
            };

            if !error.is_offline_eligible() {
                debug!(endpoint, %method, attempt, error = %error, "api call failed");
                return Err(error);
            }
            if !self.connectivity.is_online() {
                debug!(endpoint, %method, "api call failed while offline; not retrying");
                return Err(error);
            }
            let Some(retry) = budget.next_retry() else {
                warn!(endpoint, %method, attempts = attempt, error = %error, "api call retries exhausted");
                return Err(error);
            };

            let delay = RetryBudget::delay_for(retry, self.retry_base_interval);
            warn!(endpoint, %method, retry, delay_ms = delay.as_millis() as u64, "network unavailable; retrying");
            tokio::time::sleep(delay).await;
            if !self.connectivity.is_online() {
                debug!(endpoint, %method, retry, "went offline during backoff; not retrying");
                return Err(error);
            }
        }
    }

    pub async fn get_json<R>(&self, endpoint: &str) -> Result<R, GatewayError>
    where
        R: DeserializeOwned,
    {
        let value = self.call(endpoint, HttpMethod::Get, None, &[]).await?;
        decode_value(value)
    }

    pub async fn search(&self, query: &str) -> Result<SearchResults, GatewayError> {
        self.get_json(&Self::search_path(query)).await
    }

    pub async fn dashboard_stats(&self) -> Result<DashboardStats, GatewayError> {
        self.get_json(Self::dashboard_stats_path()).await
    }

    pub async fn profile(&self) -> Result<Value, GatewayError> {
        self.call("/auth/profile", HttpMethod::Get, None, &[]).await
    }

    pub async fn logout(&self) -> Result<Value, GatewayError> {
        self.call("/auth/logout", HttpMethod::Post, None, &[]).await
    }

    pub async fn order(&self, order_id: u64) -> Result<OrderDetail, GatewayError> {
        self.get_json(&Self::order_path(order_id)).await
    }

    pub async fn start_order(&self, order_id: u64) -> Result<Value, GatewayError> {
        self.call(&Self::order_start_path(order_id), HttpMethod::Post, None, &[])
            .await
    }

    pub async fn finish_order(&self, order_id: u64) -> Result<Value, GatewayError> {
        self.call(&Self::order_finish_path(order_id), HttpMethod::Post, None, &[])
            .await
    }

    pub async fn order_queue(&self) -> Result<OrderQueue, GatewayError> {
        self.get_json("/orders/queue").await
    }

    pub async fn daily_payments(&self) -> Result<Value, GatewayError> {
        self.call("/payments/daily", HttpMethod::Get, None, &[]).await
    }

    pub async fn health(&self) -> Result<Value, GatewayError> {
        self.call("/health", HttpMethod::Get, None, &[]).await
    }

    fn build_request(
        &self,
        endpoint: &str,
        method: HttpMethod,
        payload: Option<&Value>,
        headers: &[(&str, &str)],
    ) -> Result<HttpRequest, GatewayError> {
        let url = self.endpoint_url(endpoint)?;
        let mut request = HttpRequest::new(method, url)
            .with_header("content-type", "application/json")
            .with_header("accept", "application/json");
        for (name, value) in headers {
            request = request.with_header(*name, *value);
        }
        if method.is_mutating() {
            let body = payload.cloned().unwrap_or(Value::Object(Default::default()));
            request = request.with_body(body.to_string().into_bytes());
        }
        Ok(request)
    }

    async fn attempt(&self, request: HttpRequest) -> Result<Value, GatewayError> {
        let response = self.transport.send(request).await?;
        decode_response(&response)
    }
}

#[async_trait]
impl<T> ActionReplayer for RequestGateway<T>
where
    T: HttpTransport,
{
    async fn replay(&self, action: &PendingAction) -> Result<Value, GatewayError> {
        self.call(&action.endpoint, action.method, action.payload.as_ref(), &[])
            .await
    }

    fn can_replay(&self) -> bool {
        self.connectivity.is_online()
    }
}

/// Map a raw response onto the gateway's error taxonomy.
///
/// Bodies carrying a boolean `success` field are treated as the API envelope;
/// anything else (the dashboard stats endpoint) is returned as-is.
pub fn decode_response(response: &HttpResponse) -> Result<Value, GatewayError> {
    if !response.ok() {
        let body = response.body_text();
        let body = body.trim();
        return Err(GatewayError::Transport {
            status: response.status,
            body: if body.is_empty() {
                "<empty>".to_string()
            } else {
                body.to_string()
            },
        });
    }
    if response.body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Null);
    }

    let value: Value =
        serde_json::from_slice(&response.body).map_err(|error| GatewayError::Decode {
            message: error.to_string(),
        })?;
    if value.get("success").is_some_and(Value::is_boolean) {
        let envelope: ApiEnvelope =
            serde_json::from_value(value).map_err(|error| GatewayError::Decode {
                message: error.to_string(),
            })?;
        return envelope.into_data();
    }
    Ok(value)
}

fn decode_value<R>(value: Value) -> Result<R, GatewayError>
where
    R: DeserializeOwned,
{
    serde_json::from_value(value).map_err(|error| GatewayError::Decode {
        message: error.to_string(),
    })
}
