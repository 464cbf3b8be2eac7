//! Named cache partitions holding last-known responses.

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::transport::{HttpMethod, HttpRequest, HttpResponse, ResponseKind};

/// Normalized lookup key: method plus URL without fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey {
    pub method: HttpMethod,
    pub url: String,
}

impl CacheKey {
    #[must_use]
    pub fn for_request(request: &HttpRequest) -> Self {
        let mut url = request.url.clone();
        url.set_fragment(None);
        Self {
            method: request.method,
            url: url.to_string(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CachedResponse {
    pub status: u16,
    pub headers: BTreeMap<String, String>,
    pub body: Vec<u8>,
    pub stored_at: DateTime<Utc>,
}

impl CachedResponse {
    #[must_use]
    pub fn from_response(response: &HttpResponse) -> Self {
        Self {
            status: response.status,
            headers: response.headers.clone(),
            body: response.body.clone(),
            stored_at: Utc::now(),
        }
    }

    #[must_use]
    pub fn to_response(&self) -> HttpResponse {
        HttpResponse {
            status: self.status,
            headers: self.headers.clone(),
            body: self.body.clone(),
            kind: ResponseKind::Basic,
        }
    }
}

#[derive(Debug, Default)]
pub struct CachePartition {
    entries: HashMap<CacheKey, CachedResponse>,
}

impl CachePartition {
    /// Insert or overwrite.
    pub fn put(&mut self, key: CacheKey, response: CachedResponse) {
        self.entries.insert(key, response);
    }

    #[must_use]
    pub fn get(&self, key: &CacheKey) -> Option<&CachedResponse> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<CacheKey> {
        let mut keys: Vec<CacheKey> = self.entries.keys().cloned().collect();
        keys.sort();
        keys
    }
}

#[derive(Debug, Default)]
pub struct CacheStorage {
    partitions: BTreeMap<String, CachePartition>,
}

impl CacheStorage {
    /// Open a partition, creating it if needed.
    pub fn open(&mut self, name: &str) -> &mut CachePartition {
        self.partitions.entry(name.to_string()).or_default()
    }

    #[must_use]
    pub fn partition(&self, name: &str) -> Option<&CachePartition> {
        self.partitions.get(name)
    }

    /// Partition names in sorted order.
    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.partitions.keys().cloned().collect()
    }

    #[must_use]
    pub fn match_in(&self, name: &str, key: &CacheKey) -> Option<CachedResponse> {
        self.partitions.get(name)?.get(key).cloned()
    }

    /// Delete every partition not listed in `keep`; returns what was removed.
    pub fn retain_only(&mut self, keep: &[&str]) -> Vec<String> {
        let keep: BTreeSet<&str> = keep.iter().copied().collect();
        let stale: Vec<String> = self
            .partitions
            .keys()
            .filter(|name| !keep.contains(name.as_str()))
            .cloned()
            .collect();
        for name in &stale {
            self.partitions.remove(name);
        }
        stale
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use url::Url;

    fn key(url: &str) -> CacheKey {
        CacheKey::for_request(&HttpRequest::get(Url::parse(url).expect("url")))
    }

    #[test]
    fn keys_ignore_fragments() {
        assert_eq!(
            key("https://wash.example.com/queue#order-5"),
            key("https://wash.example.com/queue")
        );
        assert_ne!(
            key("https://wash.example.com/api/search?q=ab"),
            key("https://wash.example.com/api/search?q=abc")
        );
    }

    #[test]
    fn put_overwrites_per_key() {
        let mut storage = CacheStorage::default();
        let entry = key("https://wash.example.com/api/orders/queue");
        storage
            .open("runtime")
            .put(entry.clone(), CachedResponse::from_response(&HttpResponse::new(200, "old")));
        storage
            .open("runtime")
            .put(entry.clone(), CachedResponse::from_response(&HttpResponse::new(200, "new")));

        let cached = storage.match_in("runtime", &entry).expect("cached");
        assert_eq!(cached.body, b"new".to_vec());
        assert_eq!(storage.partition("runtime").map(CachePartition::len), Some(1));
    }

    #[test]
    fn retain_only_drops_everything_else() {
        let mut storage = CacheStorage::default();
        for name in ["shell-v1", "runtime-v1", "shell-v2", "runtime-v2", "other"] {
            storage.open(name);
        }

        let deleted = storage.retain_only(&["shell-v2", "runtime-v2"]);

        assert_eq!(deleted, vec!["other", "runtime-v1", "shell-v1"]);
        assert_eq!(storage.keys(), vec!["runtime-v2", "shell-v2"]);
    }
}
