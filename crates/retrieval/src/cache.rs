//! Process-wide caches
//!
//! - `QueryCache`: TTL map over full retrieval outputs, keyed by
//!   (normalized query, filter hash, mode). Expired entries are evicted on
//!   get; the size bound evicts oldest-first.
//! - `EmbeddingCache`: LRU-ish map from text to vector, dashmap-backed for
//!   the hot path, oldest-first eviction on insert.
//! - `LlmCache`: LRU map keyed by sha-256 prompt hash.
//!
//! All caches live for the process lifetime and are safe to share across
//! concurrent queries.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use dashmap::DashMap;
use parking_lot::Mutex;
use sha2::{Digest, Sha256};

use policy_engine_core::RetrievalOutput;

/// Stable hash of an optional filter value, for query-cache keying
pub fn filter_hash(filter: Option<&serde_json::Value>) -> String {
    match filter {
        None => "none".to_string(),
        Some(value) => {
            let canonical = value.to_string();
            let digest = Sha256::digest(canonical.as_bytes());
            hex::encode(&digest[..8])
        }
    }
}

fn prompt_hash(prompt: &str) -> String {
    hex::encode(Sha256::digest(prompt.as_bytes()))
}

struct QueryEntry {
    output: RetrievalOutput,
    inserted: Instant,
}

struct QueryCacheInner {
    map: HashMap<String, QueryEntry>,
    order: VecDeque<String>,
}

/// TTL cache over packaged retrieval outputs
pub struct QueryCache {
    ttl: Duration,
    max_size: usize,
    inner: Mutex<QueryCacheInner>,
}

impl QueryCache {
    pub fn new(ttl: Duration, max_size: usize) -> Self {
        Self {
            ttl,
            max_size,
            inner: Mutex::new(QueryCacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
        }
    }

    fn key(normalized_query: &str, filter_digest: &str, mode: &str) -> String {
        format!("{}|{}|{}", normalized_query, filter_digest, mode)
    }

    pub fn get(
        &self,
        normalized_query: &str,
        filter_digest: &str,
        mode: &str,
    ) -> Option<RetrievalOutput> {
        let key = Self::key(normalized_query, filter_digest, mode);
        let mut inner = self.inner.lock();

        let expired = match inner.map.get(&key) {
            Some(entry) => entry.inserted.elapsed() > self.ttl,
            None => return None,
        };

        if expired {
            inner.map.remove(&key);
            inner.order.retain(|k| k != &key);
            return None;
        }

        inner.map.get(&key).map(|e| e.output.clone())
    }

    pub fn set(
        &self,
        normalized_query: &str,
        filter_digest: &str,
        mode: &str,
        output: RetrievalOutput,
    ) {
        let key = Self::key(normalized_query, filter_digest, mode);
        let mut inner = self.inner.lock();

        while inner.map.len() >= self.max_size {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.map.remove(&oldest);
                }
                None => break,
            }
        }

        if inner.map.contains_key(&key) {
            inner.order.retain(|k| k != &key);
        }
        inner.order.push_back(key.clone());
        inner.map.insert(
            key,
            QueryEntry {
                output,
                inserted: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// LRU-ish text -> embedding cache
///
/// The map itself is lock-free for reads; only the eviction order takes a
/// small mutex. Writes are small and non-recursive.
pub struct EmbeddingCache {
    map: DashMap<String, Vec<f32>>,
    order: Mutex<VecDeque<String>>,
    max_size: usize,
}

impl EmbeddingCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            map: DashMap::new(),
            order: Mutex::new(VecDeque::new()),
            max_size,
        }
    }

    pub fn get(&self, text: &str) -> Option<Vec<f32>> {
        self.map.get(text).map(|v| v.clone())
    }

    pub fn insert(&self, text: &str, embedding: Vec<f32>) {
        let mut order = self.order.lock();
        while self.map.len() >= self.max_size {
            match order.pop_front() {
                Some(oldest) => {
                    self.map.remove(&oldest);
                }
                None => break,
            }
        }

        if self.map.insert(text.to_string(), embedding).is_some() {
            order.retain(|k| k != text);
        }
        order.push_back(text.to_string());
    }

    pub fn len(&self) -> usize {
        self.map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.map.is_empty()
    }
}

struct LlmCacheInner {
    map: HashMap<String, String>,
    order: VecDeque<String>,
}

/// LRU cache over LLM completions, keyed by prompt hash
pub struct LlmCache {
    inner: Mutex<LlmCacheInner>,
    max_size: usize,
}

impl LlmCache {
    pub fn new(max_size: usize) -> Self {
        Self {
            inner: Mutex::new(LlmCacheInner {
                map: HashMap::new(),
                order: VecDeque::new(),
            }),
            max_size,
        }
    }

    pub fn get(&self, prompt: &str) -> Option<String> {
        let key = prompt_hash(prompt);
        self.inner.lock().map.get(&key).cloned()
    }

    pub fn insert(&self, prompt: &str, response: &str) {
        let key = prompt_hash(prompt);
        let mut inner = self.inner.lock();

        while inner.map.len() >= self.max_size {
            match inner.order.pop_front() {
                Some(oldest) => {
                    inner.map.remove(&oldest);
                }
                None => break,
            }
        }

        if inner.map.insert(key.clone(), response.to_string()).is_some() {
            inner.order.retain(|k| k != &key);
        }
        inner.order.push_back(key);
    }

    pub fn len(&self) -> usize {
        self.inner.lock().map.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
