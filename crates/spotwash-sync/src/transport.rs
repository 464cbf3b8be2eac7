//! HTTP transport seam shared by the page-side gateway and the worker.

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use url::Url;
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Get => "GET",
            Self::Post => "POST",
            Self::Put => "PUT",
            Self::Delete => "DELETE",
        }
    }

    /// Mutating methods carry a JSON body and are never cached as responses.
    #[must_use]
    pub fn is_mutating(self) -> bool {
        !matches!(self, Self::Get)
    }
}

impl std::fmt::Display for HttpMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What kind of resource the page asked for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestDestination {
    Document,
    Style,
    Script,
    Image,
    Font,
    Empty,
}

impl RequestDestination {
    #[must_use]
    pub fn is_document(self) -> bool {
        matches!(self, Self::Document)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: Url,
    pub destination: RequestDestination,
    pub headers: BTreeMap<String, String>,
    pub body: Option<Vec<u8>>,
    /// Skip any intermediate HTTP cache and revalidate with the origin.
    pub bypass_http_cache: bool,
}

impl HttpRequest {
    #[must_use]
    pub fn new(method: HttpMethod, url: Url) -> Self {
        Self {
            method,
            url,
            destination: RequestDestination::Empty,
            headers: BTreeMap::new(),
            body: None,
            bypass_http_cache: false,
        }
    }

    #[must_use]
    pub fn get(url: Url) -> Self {
        Self::new(HttpMethod::Get, url)
    }

    /// Top-level page navigation.
    #[must_use]
    pub fn navigate(url: Url) -> Self {
        Self::get(url).with_destination(RequestDestination::Document)
    }

    #[must_use]
    pub fn with_destination(mut self, destination: RequestDestination) -> Self {
        self.destination = destination;
        self
    }

    #[must_use]
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    #[must_use]
    pub fn with_body(mut self, body: Vec<u8>) -> Self {
        self.body = Some(body);
        self
    }
}

/// How the response came to be, mirroring the fetch response types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseKind {
    Basic,
    Cors,
    Opaque,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub kind: ResponseKind,
}

impl HttpResponse {
    #[must_use]
    pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            headers: BTreeMap::new(),
            body: body.into(),
            kind: ResponseKind::Basic,
        }
    }

    #[must_use]
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        let mut response = Self::new(status, value.to_string());
        response
            .headers
            .insert("content-type".to_string(), "application/json".to_string());
        response
    }

    #[must_use]
    pub fn with_kind(mut self, kind: ResponseKind) -> Self {
        self.kind = kind;
        self
    }

    #[must_use]
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Only a plain 200 from the origin may populate a cache partition.
    #[must_use]
    pub fn is_cacheable(&self) -> bool {
        self.status == 200 && !matches!(self.kind, ResponseKind::Error | ResponseKind::Opaque)
    }

    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).to_string()
    }
}

/// The fetch itself did not complete; there is no HTTP status to report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct NetworkFailure {
    pub message: String,
}

impl NetworkFailure {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

#[async_trait]
pub trait HttpTransport: Send + Sync {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NetworkFailure>;
}

#[async_trait]
impl<T> HttpTransport for std::sync::Arc<T>
where
    T: HttpTransport + ?Sized,
{
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NetworkFailure> {
        (**self).send(request).await
    }
}

/// Transport backed by a shared `reqwest::Client`.
#[derive(Debug, Clone)]
pub struct ReqwestTransport {
    http: reqwest::Client,
    timeout: Duration,
}

impl ReqwestTransport {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self::with_client(reqwest::Client::new(), timeout)
    }

    #[must_use]
    pub fn with_client(http: reqwest::Client, timeout: Duration) -> Self {
        Self {
            http,
            timeout: timeout.max(Duration::from_millis(250)),
        }
    }
}

#[async_trait]
impl HttpTransport for ReqwestTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NetworkFailure> {
        let method = match request.method {
            HttpMethod::Get => reqwest::Method::GET,
            HttpMethod::Post => reqwest::Method::POST,
            HttpMethod::Put => reqwest::Method::PUT,
            HttpMethod::Delete => reqwest::Method::DELETE,
        };

        let mut builder = self
            .http
            .request(method, request.url.as_str())
            .header(REQUEST_ID_HEADER, format!("req_{}", Uuid::new_v4().simple()))
            .timeout(self.timeout);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if request.bypass_http_cache {
            builder = builder
                .header("cache-control", "no-cache")
                .header("pragma", "no-cache");
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder
            .send()
            .await
            .map_err(|error| NetworkFailure::new(error.to_string()))?;
        let status = response.status().as_u16();
        let headers = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|value| (name.as_str().to_string(), value.to_string()))
            })
            .collect();
        let body = response
            .bytes()
            .await
            .map_err(|error| NetworkFailure::new(error.to_string()))?
            .to_vec();

        Ok(HttpResponse {
            status,
            headers,
            body,
            kind: ResponseKind::Basic,
        })
    }
}
