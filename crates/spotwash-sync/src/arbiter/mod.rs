//! Request-interception layer: versioned caches and per-class fetch strategies.
//!
//! The arbiter runs in its own task (see [`worker`]) and shares no memory with
//! the page side. Page code reaches it only through [`ArbiterHandle`].

mod cache;
mod policy;
mod worker;

use std::sync::{Arc, Mutex};

use tokio::sync::RwLock;
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ArbiterError;
use crate::transport::{HttpRequest, HttpResponse, HttpTransport};

pub use cache::{CacheKey, CachePartition, CacheStorage, CachedResponse};
pub use policy::RequestClass;
pub use worker::{ArbiterHandle, ArbiterWorker, ControlMessage, WorkerMessage};

pub const DEFAULT_CACHE_VERSION: &str = "v1";
pub const OFFLINE_FALLBACK_PATH: &str = "/static/offline.html";
pub const DEFAULT_STATIC_MANIFEST: &[&str] = &[
    "/",
    "/dashboard",
    "/queue",
    "/new-order",
    "/static/css/style.css",
    "/static/js/app.js",
    OFFLINE_FALLBACK_PATH,
];

#[derive(Debug, Clone)]
pub struct ArbiterConfig {
    pub origin: Url,
    pub api_prefix: String,
    pub static_cache: String,
    pub runtime_cache: String,
    pub static_manifest: Vec<String>,
    pub offline_fallback: String,
}

impl ArbiterConfig {
    /// Partition names embed `version`; bumping it retires the old caches on
    /// the next activation.
    #[must_use]
    pub fn new(origin: Url, version: &str) -> Self {
        Self {
            origin,
            api_prefix: crate::gateway::DEFAULT_API_PREFIX.to_string(),
            static_cache: format!("shell-{version}"),
            runtime_cache: format!("runtime-{version}"),
            static_manifest: DEFAULT_STATIC_MANIFEST
                .iter()
                .map(ToString::to_string)
                .collect(),
            offline_fallback: OFFLINE_FALLBACK_PATH.to_string(),
        }
    }

    #[must_use]
    pub fn with_manifest(mut self, manifest: Vec<String>) -> Self {
        self.static_manifest = manifest;
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerLifecycle {
    Parsed,
    Installed { skip_waiting: bool },
    Activated { clients_claimed: bool },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstallReport {
    pub precached: usize,
    pub skip_waiting: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActivateReport {
    pub deleted: Vec<String>,
    pub clients_claimed: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResponseSource {
    Network,
    Cache,
    OfflineFallback,
    Passthrough,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchOutcome {
    pub response: HttpResponse,
    pub source: ResponseSource,
}

impl FetchOutcome {
    fn new(response: HttpResponse, source: ResponseSource) -> Self {
        Self { response, source }
    }
}

pub struct CacheArbiter<T> {
    config: ArbiterConfig,
    transport: Arc<T>,
    caches: Arc<RwLock<CacheStorage>>,
    lifecycle: Mutex<WorkerLifecycle>,
}

impl<T> CacheArbiter<T>
where
    T: HttpTransport + 'static,
{
    pub fn new(config: ArbiterConfig, transport: Arc<T>) -> Self {
        Self::with_storage(config, transport, CacheStorage::default())
    }

    /// Start from caches left behind by a previous version.
    pub fn with_storage(config: ArbiterConfig, transport: Arc<T>, storage: CacheStorage) -> Self {
        Self {
            config,
            transport,
            caches: Arc::new(RwLock::new(storage)),
            lifecycle: Mutex::new(WorkerLifecycle::Parsed),
        }
    }

    #[must_use]
    pub fn config(&self) -> &ArbiterConfig {
        &self.config
    }

    #[must_use]
    pub fn lifecycle(&self) -> WorkerLifecycle {
        *self
            .lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub async fn cache_keys(&self) -> Vec<String> {
        self.caches.read().await.keys()
    }

    pub async fn cached(&self, partition: &str, key: &CacheKey) -> Option<CachedResponse> {
        self.caches.read().await.match_in(partition, key)
    }

    /// Precache the static manifest, bypassing intermediate HTTP caches.
    ///
    /// All-or-nothing: a single failed entry leaves the static partition
    /// untouched and installation fails.
    pub async fn install(&self) -> Result<InstallReport, ArbiterError> {
        let fetches = self
            .config
            .static_manifest
            .iter()
            .map(|path| self.precache_entry(path));
        let fetched = futures::future::try_join_all(fetches).await?;

        let precached = fetched.len();
        {
            let mut caches = self.caches.write().await;
            let partition = caches.open(&self.config.static_cache);
            for (key, response) in fetched {
                partition.put(key, response);
            }
        }
        self.set_lifecycle(WorkerLifecycle::Installed { skip_waiting: true });
        info!(cache = %self.config.static_cache, precached, "installed static shell");
        Ok(InstallReport {
            precached,
            skip_waiting: true,
        })
    }

    async fn precache_entry(&self, path: &str) -> Result<(CacheKey, CachedResponse), ArbiterError> {
        let url = self
            .config
            .origin
            .join(path)
            .map_err(|error| ArbiterError::InvalidUrl(format!("{path}: {error}")))?;
        let mut request = HttpRequest::get(url.clone());
        request.bypass_http_cache = true;
        let key = CacheKey::for_request(&request);
        let response = self
            .transport
            .send(request)
            .await
            .map_err(|failure| ArbiterError::Precache {
                url: url.to_string(),
                reason: failure.to_string(),
            })?;
        if !response.is_cacheable() {
            return Err(ArbiterError::Precache {
                url: url.to_string(),
                reason: format!("status {}", response.status),
            });
        }
        Ok((key, CachedResponse::from_response(&response)))
    }

    /// Drop every partition whose name is not current, then claim clients.
    pub async fn activate(&self) -> ActivateReport {
        let deleted = self.caches.write().await.retain_only(&[
            self.config.static_cache.as_str(),
            self.config.runtime_cache.as_str(),
        ]);
        for name in &deleted {
            info!(cache = %name, "deleted stale cache");
        }
        self.set_lifecycle(WorkerLifecycle::Activated {
            clients_claimed: true,
        });
        ActivateReport {
            deleted,
            clients_claimed: true,
        }
    }

    pub async fn handle_fetch(&self, request: HttpRequest) -> Result<FetchOutcome, ArbiterError> {
        match RequestClass::classify(&request, &self.config.origin, &self.config.api_prefix) {
            RequestClass::CrossOrigin => {
                let response = self.transport.send(request).await?;
                Ok(FetchOutcome::new(response, ResponseSource::Passthrough))
            }
            RequestClass::Api => self.network_first(request).await,
            RequestClass::Static if request.method.is_mutating() => {
                let response = self.transport.send(request).await?;
                Ok(FetchOutcome::new(response, ResponseSource::Passthrough))
            }
            RequestClass::Static => self.cache_first(request).await,
        }
    }

    async fn network_first(&self, request: HttpRequest) -> Result<FetchOutcome, ArbiterError> {
        let key = CacheKey::for_request(&request);
        let cacheable_method = !request.method.is_mutating();
        match self.transport.send(request).await {
            Ok(response) => {
                if cacheable_method && response.is_cacheable() {
                    self.caches
                        .write()
                        .await
                        .open(&self.config.runtime_cache)
                        .put(key, CachedResponse::from_response(&response));
                }
                Ok(FetchOutcome::new(response, ResponseSource::Network))
            }
            Err(failure) => {
                let cached = self
                    .caches
                    .read()
                    .await
                    .match_in(&self.config.runtime_cache, &key);
                match cached {
                    Some(cached) => {
                        debug!(url = %key.url, "network failed; serving cached api response");
                        Ok(FetchOutcome::new(cached.to_response(), ResponseSource::Cache))
                    }
                    None => Err(ArbiterError::Network(failure)),
                }
            }
        }
    }

    async fn cache_first(&self, request: HttpRequest) -> Result<FetchOutcome, ArbiterError> {
        let key = CacheKey::for_request(&request);
        let cached = self
            .caches
            .read()
            .await
            .match_in(&self.config.static_cache, &key);
        if let Some(cached) = cached {
            self.revalidate(request, key);
            return Ok(FetchOutcome::new(cached.to_response(), ResponseSource::Cache));
        }

        let is_document = request.destination.is_document();
        match self.transport.send(request).await {
            Ok(response) => {
                if response.is_cacheable() {
                    self.caches
                        .write()
                        .await
                        .open(&self.config.static_cache)
                        .put(key, CachedResponse::from_response(&response));
                }
                Ok(FetchOutcome::new(response, ResponseSource::Network))
            }
            Err(failure) => {
                if is_document {
                    if let Some(fallback) = self.offline_fallback().await {
                        debug!(url = %key.url, "serving offline fallback");
                        return Ok(FetchOutcome::new(
                            fallback.to_response(),
                            ResponseSource::OfflineFallback,
                        ));
                    }
                }
                Err(ArbiterError::Network(failure))
            }
        }
    }

    /// Refresh a static entry in the background; the caller already has the
    /// cached copy.
    fn revalidate(&self, request: HttpRequest, key: CacheKey) {
        let transport = Arc::clone(&self.transport);
        let caches = Arc::clone(&self.caches);
        let partition = self.config.static_cache.clone();
        tokio::spawn(async move {
            match transport.send(request).await {
                Ok(response) if response.is_cacheable() => {
                    caches
                        .write()
                        .await
                        .open(&partition)
                        .put(key, CachedResponse::from_response(&response));
                }
                Ok(response) => {
                    debug!(url = %key.url, status = response.status, "revalidation not cacheable");
                }
                Err(failure) => {
                    debug!(url = %key.url, error = %failure, "revalidation failed");
                }
            }
        });
    }

    async fn offline_fallback(&self) -> Option<CachedResponse> {
        let url = match self.config.origin.join(&self.config.offline_fallback) {
            Ok(url) => url,
            Err(error) => {
                warn!(path = %self.config.offline_fallback, error = %error, "bad offline fallback path");
                return None;
            }
        };
        let key = CacheKey::for_request(&HttpRequest::get(url));
        self.caches
            .read()
            .await
            .match_in(&self.config.static_cache, &key)
    }

    fn set_lifecycle(&self, next: WorkerLifecycle) {
        *self
            .lifecycle
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = next;
    }
}
