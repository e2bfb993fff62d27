//! Deterministic embedding provider used in place of a real vendor binding.
//!
//! `FAKE_EMBEDDINGS=true` (the only mode this tree ships) wires this
//! adapter in as `EmbeddingPort`: embeddings are a pure hash of
//! `(provider, model, normalized_text)`, so the same text always embeds to
//! the same vector without a network call, which is what lets the
//! retrieval and ingestion tests run deterministically.

use ragcore_core::model::EMBEDDING_DIMENSIONS;
use ragcore_core::ports::{EmbeddingPort, PortError};
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};
use tokio::sync::Mutex as AsyncMutex;

/// Hashes `text` into a unit vector of `dims` floats. Each dimension is
/// one byte of a rolling SHA-256 digest over `provider|model|dim|text`,
/// so changing the model id or provider changes every embedding even for
/// identical text.
pub fn deterministic_embedding(provider: &str, model: &str, text: &str, dims: usize) -> Vec<f32> {
    let mut out = Vec::with_capacity(dims);
    let mut seed = 0u32;
    while out.len() < dims {
        let mut hasher = Sha256::new();
        hasher.update(provider.as_bytes());
        hasher.update(b"|");
        hasher.update(model.as_bytes());
        hasher.update(b"|");
        hasher.update(seed.to_le_bytes());
        hasher.update(b"|");
        hasher.update(text.as_bytes());
        let digest = hasher.finalize();
        for byte in digest.iter() {
            if out.len() == dims {
                break;
            }
            // map byte into [-1, 1]
            out.push((*byte as f32 / 127.5) - 1.0);
        }
        seed += 1;
    }

    let norm: f32 = out.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in out.iter_mut() {
            *v /= norm;
        }
    }
    out
}

/// Process-level token bucket. Batches beyond the budget wait for
/// refill rather than failing — §5's "rate-limited at the process level".
pub struct TokenBucket {
    state: AsyncMutex<BucketState>,
    capacity: f64,
    refill_per_sec: f64,
}

struct BucketState {
    tokens: f64,
    last_refill: Instant,
}

impl TokenBucket {
    pub fn new(capacity: f64, refill_per_sec: f64) -> Self {
        Self {
            state: AsyncMutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
            capacity,
            refill_per_sec,
        }
    }

    /// Waits until `cost` tokens are available, then deducts them.
    pub async fn acquire(&self, cost: f64) {
        loop {
            let wait = {
                let mut state = self.state.lock().await;
                let elapsed = state.last_refill.elapsed().as_secs_f64();
                state.tokens = (state.tokens + elapsed * self.refill_per_sec).min(self.capacity);
                state.last_refill = Instant::now();

                if state.tokens >= cost {
                    state.tokens -= cost;
                    None
                } else {
                    let deficit = cost - state.tokens;
                    Some(Duration::from_secs_f64(deficit / self.refill_per_sec))
                }
            };

            match wait {
                None => return,
                Some(delay) => tokio::time::sleep(delay).await,
            }
        }
    }
}

struct CacheEntry {
    value: Vec<f32>,
    inserted_at: Instant,
}

/// Exact-key `(provider, model, normalized_text) -> embedding` memoization
/// cache with LRU eviction and an explicit TTL. Per-process, non-authoritative:
/// a cold restart is acceptable (spec §5). Generalized from the teacher's
/// `query::semantic_cache::SemanticCache` eviction machinery, narrowed from
/// similarity-fuzzed lookup to an exact key — this cache is memoization,
/// not approximate retrieval.
pub struct EmbeddingCache {
    capacity: usize,
    ttl: Duration,
    entries: Mutex<HashMap<String, CacheEntry>>,
    order: Mutex<VecDeque<String>>,
}

impl EmbeddingCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        Self {
            capacity,
            ttl,
            entries: Mutex::new(HashMap::new()),
            order: Mutex::new(VecDeque::new()),
        }
    }

    fn key(provider: &str, model: &str, text: &str) -> String {
        format!("{provider}\u{0}{model}\u{0}{text}")
    }

    pub fn get(&self, provider: &str, model: &str, text: &str) -> Option<Vec<f32>> {
        let key = Self::key(provider, model, text);
        let mut entries = self.entries.lock().unwrap();
        let hit = entries.get(&key)?;
        if hit.inserted_at.elapsed() > self.ttl {
            entries.remove(&key);
            return None;
        }
        let value = hit.value.clone();
        self.touch(&key);
        Some(value)
    }

    pub fn put(&self, provider: &str, model: &str, text: &str, value: Vec<f32>) {
        let key = Self::key(provider, model, text);
        let mut entries = self.entries.lock().unwrap();
        if !entries.contains_key(&key) && entries.len() >= self.capacity {
            self.evict_one(&mut entries);
        }
        entries.insert(
            key.clone(),
            CacheEntry {
                value,
                inserted_at: Instant::now(),
            },
        );
        drop(entries);
        self.touch(&key);
    }

    fn touch(&self, key: &str) {
        let mut order = self.order.lock().unwrap();
        order.retain(|k| k != key);
        order.push_back(key.to_string());
    }

    fn evict_one(&self, entries: &mut HashMap<String, CacheEntry>) {
        let mut order = self.order.lock().unwrap();
        if let Some(oldest) = order.pop_front() {
            entries.remove(&oldest);
        }
    }
}

/// The only `EmbeddingPort` adapter this tree ships. Real vendor bindings
/// are out of scope per the spec (§1); this is the deterministic stand-in
/// `FAKE_EMBEDDINGS=true` selects.
pub struct DeterministicEmbeddingProvider {
    provider_name: String,
    model: String,
    dims: usize,
    bucket: TokenBucket,
    cache: EmbeddingCache,
}

impl DeterministicEmbeddingProvider {
    pub fn new(model: impl Into<String>, cache_ttl: Duration) -> Self {
        Self {
            provider_name: "deterministic".to_string(),
            model: model.into(),
            dims: EMBEDDING_DIMENSIONS,
            bucket: TokenBucket::new(64.0, 32.0),
            cache: EmbeddingCache::new(4096, cache_ttl),
        }
    }
}

impl Default for DeterministicEmbeddingProvider {
    fn default() -> Self {
        Self::new("embedding-default-v1", Duration::from_secs(3600))
    }
}

#[async_trait::async_trait]
impl EmbeddingPort for DeterministicEmbeddingProvider {
    fn model_id(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dims
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, PortError> {
        self.bucket.acquire(texts.len().max(1) as f64).await;

        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            if let Some(cached) = self.cache.get(&self.provider_name, &self.model, text) {
                out.push(cached);
                continue;
            }
            let embedding = deterministic_embedding(&self.provider_name, &self.model, text, self.dims);
            self.cache.put(&self.provider_name, &self.model, text, embedding.clone());
            out.push(embedding);
        }
        Ok(out)
    }
}
