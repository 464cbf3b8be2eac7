use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use crate::transport::{HttpRequest, HttpResponse, HttpTransport, NetworkFailure};

type Scripted = Result<HttpResponse, String>;

/// Transport answering from per-path scripts. The last scripted answer for a
/// path repeats forever.
#[derive(Default)]
pub(crate) struct MockTransport {
    routes: Mutex<HashMap<String, VecDeque<Scripted>>>,
    latency: Mutex<HashMap<String, Duration>>,
    log: Mutex<Vec<(Instant, HttpRequest)>>,
    offline: AtomicBool,
}

impl MockTransport {
    pub(crate) fn respond(&self, path: &str, answer: Scripted) {
        self.routes
            .lock()
            .expect("routes lock")
            .entry(path.to_string())
            .or_default()
            .push_back(answer);
    }

    pub(crate) fn set_latency(&self, path: &str, latency: Duration) {
        self.latency
            .lock()
            .expect("latency lock")
            .insert(path.to_string(), latency);
    }

    pub(crate) fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    pub(crate) fn calls_to(&self, path: &str) -> usize {
        self.call_times(path).len()
    }

    pub(crate) fn call_times(&self, path: &str) -> Vec<Instant> {
        self.log
            .lock()
            .expect("log lock")
            .iter()
            .filter(|(_, request)| request.url.path() == path)
            .map(|(at, _)| *at)
            .collect()
    }

    pub(crate) fn paths(&self) -> Vec<String> {
        self.log
            .lock()
            .expect("log lock")
            .iter()
            .map(|(_, request)| request.url.path().to_string())
            .collect()
    }

    pub(crate) fn last_request(&self, path: &str) -> Option<HttpRequest> {
        self.log
            .lock()
            .expect("log lock")
            .iter()
            .rev()
            .find(|(_, request)| request.url.path() == path)
            .map(|(_, request)| request.clone())
    }

    fn next_answer(&self, path: &str) -> Scripted {
        let mut routes = self.routes.lock().expect("routes lock");
        let Some(script) = routes.get_mut(path) else {
            return Err(format!("no route for {path}"));
        };
        if script.len() > 1 {
            script
                .pop_front()
                .unwrap_or_else(|| Err("script drained".to_string()))
        } else {
            script
                .front()
                .cloned()
                .unwrap_or_else(|| Err("script drained".to_string()))
        }
    }
}

#[async_trait]
impl HttpTransport for MockTransport {
    async fn send(&self, request: HttpRequest) -> Result<HttpResponse, NetworkFailure> {
        let path = request.url.path().to_string();
        self.log
            .lock()
            .expect("log lock")
            .push((Instant::now(), request));

        let latency = self.latency.lock().expect("latency lock").get(&path).copied();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if self.offline.load(Ordering::SeqCst) {
            return Err(NetworkFailure::new("network down"));
        }
        self.next_answer(&path).map_err(NetworkFailure::new)
    }
}
