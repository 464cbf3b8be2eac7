//! Debounced global search and the result-selection handler registry.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::GatewayError;
use crate::gateway::RequestGateway;
use crate::models::SearchResults;
use crate::transport::HttpTransport;

pub const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 300;
pub const MIN_QUERY_CHARS: usize = 2;

#[async_trait]
pub trait SearchSource: Send + Sync {
    async fn search(&self, query: &str) -> Result<SearchResults, GatewayError>;
}

#[async_trait]
impl<T> SearchSource for RequestGateway<T>
where
    T: HttpTransport,
{
    async fn search(&self, query: &str) -> Result<SearchResults, GatewayError> {
        RequestGateway::search(self, query).await
    }
}

pub trait SearchSink: Send + Sync {
    fn show_results(&self, query: &str, results: &SearchResults);
    fn clear_results(&self);
    fn search_failed(&self, query: &str, error: &GatewayError);
}

/// Runs a search only once typing pauses for the debounce window.
pub struct SearchDebouncer {
    debounce: Duration,
    source: Arc<dyn SearchSource>,
    sink: Arc<dyn SearchSink>,
    pending: Mutex<Option<JoinHandle<()>>>,
}

impl SearchDebouncer {
    pub fn new(debounce: Duration, source: Arc<dyn SearchSource>, sink: Arc<dyn SearchSink>) -> Self {
        Self {
            debounce,
            source,
            sink,
            pending: Mutex::new(None),
        }
    }

    /// Feed the latest input. Supersedes any pending or in-flight search.
    pub fn input(&self, raw: &str) {
        self.cancel();

        let query = raw.trim().to_string();
        if query.chars().count() < MIN_QUERY_CHARS {
            self.sink.clear_results();
            return;
        }

        let debounce = self.debounce;
        let source = Arc::clone(&self.source);
        let sink = Arc::clone(&self.sink);
        let task = tokio::spawn(async move {
            tokio::time::sleep(debounce).await;
            debug!(query = %query, "running search");
            match source.search(&query).await {
                Ok(results) => sink.show_results(&query, &results),
                Err(error) => sink.search_failed(&query, &error),
            }
        });
        *self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(task);
    }

    pub fn cancel(&self) {
        let pending = self
            .pending
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = pending {
            task.abort();
        }
    }
}

impl Drop for SearchDebouncer {
    fn drop(&mut self) {
        self.cancel();
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ResultKind {
    Customer,
    Vehicle,
    Order,
    Service,
}

pub type SelectHandler = Arc<dyn Fn(u64) + Send + Sync>;

/// Explicit map from result kind to the navigation it triggers.
#[derive(Clone, Default)]
pub struct NavigationRegistry {
    handlers: HashMap<ResultKind, SelectHandler>,
}

impl NavigationRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_handler(mut self, kind: ResultKind, handler: impl Fn(u64) + Send + Sync + 'static) -> Self {
        self.handlers.insert(kind, Arc::new(handler));
        self
    }

    /// Run the handler for `kind`. Returns `false` when none is registered.
    pub fn select(&self, kind: ResultKind, id: u64) -> bool {
        match self.handlers.get(&kind) {
            Some(handler) => {
                handler(id);
                true
            }
            None => {
                debug!(?kind, id, "no handler registered for search result");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectivity::ConnectivityMonitor;
    use crate::gateway::GatewayConfig;
    use crate::test_support::MockTransport;
    use crate::transport::HttpResponse;
    use serde_json::json;

    #[derive(Default)]
    struct RecordingSink {
        shown: Mutex<Vec<String>>,
        cleared: Mutex<usize>,
        failed: Mutex<Vec<String>>,
    }

    impl SearchSink for RecordingSink {
        fn show_results(&self, query: &str, _results: &SearchResults) {
            self.shown.lock().expect("lock").push(query.to_string());
        }

        fn clear_results(&self) {
            *self.cleared.lock().expect("lock") += 1;
        }

        fn search_failed(&self, query: &str, _error: &GatewayError) {
            self.failed.lock().expect("lock").push(query.to_string());
        }
    }

    fn debouncer(transport: Arc<MockTransport>, sink: Arc<RecordingSink>) -> (SearchDebouncer, ConnectivityMonitor) {
        let monitor = ConnectivityMonitor::default();
        let gateway = RequestGateway::new(
            GatewayConfig::new("https://wash.example.com"),
            transport,
            monitor.subscribe(),
        )
        .expect("gateway");
        (
            SearchDebouncer::new(
                Duration::from_millis(DEFAULT_SEARCH_DEBOUNCE_MS),
                Arc::new(gateway),
                sink,
            ),
            monitor,
        )
    }

    fn search_transport() -> Arc<MockTransport> {
        let transport = Arc::new(MockTransport::default());
        transport.respond(
            "/api/search",
            Ok(HttpResponse::json(
                200,
                &json!({"success": true, "data": {"query": "kca", "results": {}, "total_results": 0}}),
            )),
        );
        transport
    }

    #[tokio::test(start_paused = true)]
    async fn rapid_typing_issues_one_search() {
        let transport = search_transport();
        let sink = Arc::new(RecordingSink::default());
        let (debouncer, _monitor) = debouncer(transport.clone(), sink.clone());

        for partial in ["kc", "kca", "kca 1", "kca 12"] {
            debouncer.input(partial);
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        tokio::time::sleep(Duration::from_millis(500)).await;

        assert_eq!(transport.calls_to("/api/search"), 1);
        assert_eq!(*sink.shown.lock().expect("lock"), vec!["kca 12".to_string()]);
        let sent = transport.last_request("/api/search").expect("request");
        assert_eq!(sent.url.query(), Some("q=kca+12"));
    }

    #[tokio::test(start_paused = true)]
    async fn short_queries_clear_instead_of_searching() {
        let transport = search_transport();
        let sink = Arc::new(RecordingSink::default());
        let (debouncer, _monitor) = debouncer(transport.clone(), sink.clone());

        debouncer.input("kca");
        debouncer.input(" k ");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(transport.calls_to("/api/search"), 0);
        assert_eq!(*sink.cleared.lock().expect("lock"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn failures_reach_the_sink() {
        let transport = Arc::new(MockTransport::default());
        transport.respond("/api/search", Ok(HttpResponse::new(400, "bad query")));
        let sink = Arc::new(RecordingSink::default());
        let (debouncer, _monitor) = debouncer(transport.clone(), sink.clone());

        debouncer.input("toyota");
        tokio::time::sleep(Duration::from_secs(1)).await;

        assert_eq!(*sink.failed.lock().expect("lock"), vec!["toyota".to_string()]);
    }

    #[test]
    fn registry_dispatches_by_kind() {
        let opened = Arc::new(Mutex::new(Vec::new()));
        let log = Arc::clone(&opened);
        let registry = NavigationRegistry::new().with_handler(ResultKind::Order, move |id| {
            log.lock().expect("lock").push(format!("/orders/{id}"));
        });

        assert!(registry.select(ResultKind::Order, 42));
        assert!(!registry.select(ResultKind::Vehicle, 7));
        assert_eq!(*opened.lock().expect("lock"), vec!["/orders/42".to_string()]);
    }
}
