use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

/// Process-wide counters. Plain atomics rather than a metrics-exporter
/// crate: the `/metrics` HTTP surface and any Prometheus wiring are out of
/// scope for this core (they belong to the outer host), so this is the
/// in-process accumulator a host would scrape from.
#[derive(Default)]
pub struct Metrics {
    dedup_hits: AtomicU64,
    policy_refusals: AtomicU64,
    answers_without_sources: AtomicU64,
    inbound_injection_flagged: AtomicU64,
    ingestion_failures: AtomicU64,
    retrieval_fallbacks: Mutex<HashMap<String, u64>>,
    query_latencies_us: Mutex<Vec<u64>>,
}

impl Metrics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn record_dedup_hit(&self) {
        self.dedup_hits.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_policy_refusal(&self) {
        self.policy_refusals.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_answer_without_sources(&self) {
        self.answers_without_sources.fetch_add(1, Ordering::Relaxed);
    }

    /// Incremented when C4 step 4's non-fatal injection screen flags a
    /// document's extracted text during ingestion.
    pub fn record_inbound_injection_flagged(&self) {
        self.inbound_injection_flagged.fetch_add(1, Ordering::Relaxed);
    }

    /// Incremented whenever the worker transitions a document to FAILED.
    pub fn record_ingestion_failure(&self) {
        self.ingestion_failures.fetch_add(1, Ordering::Relaxed);
    }

    /// `retrieval_fallback{stage="sparse"|"rerank"}` — incremented whenever
    /// a retrieval sub-stage degrades gracefully instead of failing the
    /// whole request.
    pub fn record_retrieval_fallback(&self, stage: &str) {
        let mut map = self.retrieval_fallbacks.lock().unwrap();
        *map.entry(stage.to_string()).or_insert(0) += 1;
    }

    pub fn record_query_latency(&self, latency_us: u64) {
        let mut latencies = self.query_latencies_us.lock().unwrap();
        latencies.push(latency_us);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        let retrieval_fallback = self.retrieval_fallbacks.lock().unwrap().clone();
        let latencies = self.query_latencies_us.lock().unwrap();
        let mut sorted: Vec<u64> = latencies.clone();
        sorted.sort_unstable();

        MetricsSnapshot {
            dedup_hit_total: self.dedup_hits.load(Ordering::Relaxed),
            policy_refusal_total: self.policy_refusals.load(Ordering::Relaxed),
            answer_without_sources_total: self.answers_without_sources.load(Ordering::Relaxed),
            inbound_injection_flagged_total: self.inbound_injection_flagged.load(Ordering::Relaxed),
            ingestion_failure_total: self.ingestion_failures.load(Ordering::Relaxed),
            retrieval_fallback,
            query_p50_us: percentile(&sorted, 50.0),
            query_p95_us: percentile(&sorted, 95.0),
            query_p99_us: percentile(&sorted, 99.0),
        }
    }
}

fn percentile(sorted: &[u64], p: f32) -> u64 {
    if sorted.is_empty() {
        return 0;
    }
    let idx = ((p / 100.0) * (sorted.len() as f32)).ceil() as usize;
    sorted[idx.saturating_sub(1).min(sorted.len() - 1)]
}

#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct MetricsSnapshot {
    pub dedup_hit_total: u64,
    pub policy_refusal_total: u64,
    pub answer_without_sources_total: u64,
    pub inbound_injection_flagged_total: u64,
    pub ingestion_failure_total: u64,
    pub retrieval_fallback: HashMap<String, u64>,
    pub query_p50_us: u64,
    pub query_p95_us: u64,
    pub query_p99_us: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently() {
        let metrics = Metrics::new();
        metrics.record_dedup_hit();
        metrics.record_dedup_hit();
        metrics.record_policy_refusal();
        metrics.record_retrieval_fallback("sparse");

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.dedup_hit_total, 2);
        assert_eq!(snapshot.policy_refusal_total, 1);
        assert_eq!(snapshot.retrieval_fallback.get("sparse"), Some(&1));
    }

    #[test]
    fn latency_percentiles_reflect_recorded_samples() {
        let metrics = Metrics::new();
        for us in [10, 20, 30, 40, 100] {
            metrics.record_query_latency(us);
        }
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.query_p50_us, 30);
        assert_eq!(snapshot.query_p99_us, 100);
    }
}
