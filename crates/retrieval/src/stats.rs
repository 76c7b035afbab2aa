//! Engine statistics and per-stage latency tracking
//!
//! Also home of the circuit-breaker counter: stage timeouts increment
//! `recent_timeouts`, clean runs decrement it, and the expensive reranking
//! phases are skipped while the counter is above the limit.

use std::collections::{HashMap, VecDeque};

use parking_lot::Mutex;
use serde::Serialize;

use policy_engine_config::constants::retrieval::{CIRCUIT_BREAKER_LIMIT, STAGE_SAMPLES};

/// Stage names with latency histograms
pub const STAGES: [&str; 6] = [
    "query_understanding",
    "routing",
    "retrieval",
    "aggregation",
    "reranking",
    "total",
];

/// Summary of one stage's recent latencies (seconds)
#[derive(Debug, Clone, Default, Serialize)]
pub struct StageStats {
    pub count: usize,
    pub min: f64,
    pub max: f64,
    pub mean: f64,
    pub p50: f64,
    pub p95: f64,
}

/// Counter snapshot
#[derive(Debug, Clone, Serialize)]
pub struct StatsSnapshot {
    pub total_queries: u64,
    pub avg_processing_time: f64,
    pub cache_hits: u64,
    pub recent_timeouts: u32,
    pub validation_count: usize,
    pub avg_validation_score: f32,
}

struct StatsInner {
    total_queries: u64,
    avg_processing_time: f64,
    cache_hits: u64,
    recent_timeouts: u32,
    validation_scores: VecDeque<f32>,
    stage_timings: HashMap<&'static str, VecDeque<f64>>,
}

/// Shared engine statistics
pub struct EngineStats {
    inner: Mutex<StatsInner>,
}

impl Default for EngineStats {
    fn default() -> Self {
        Self::new()
    }
}

impl EngineStats {
    pub fn new() -> Self {
        let stage_timings = STAGES.iter().map(|s| (*s, VecDeque::new())).collect();
        Self {
            inner: Mutex::new(StatsInner {
                total_queries: 0,
                avg_processing_time: 0.0,
                cache_hits: 0,
                recent_timeouts: 0,
                validation_scores: VecDeque::new(),
                stage_timings,
            }),
        }
    }

    /// Fold one finished query into the running averages
    pub fn record_query(&self, processing_time_seconds: f64) {
        let mut inner = self.inner.lock();
        inner.total_queries += 1;
        let n = inner.total_queries as f64;
        inner.avg_processing_time =
            (inner.avg_processing_time * (n - 1.0) + processing_time_seconds) / n;
    }

    pub fn record_cache_hits(&self, hits: u64) {
        if hits > 0 {
            self.inner.lock().cache_hits += hits;
        }
    }

    /// Record a stage latency sample; only the last 100 are kept
    pub fn record_stage(&self, stage: &'static str, seconds: f64) {
        let mut inner = self.inner.lock();
        if let Some(samples) = inner.stage_timings.get_mut(stage) {
            samples.push_back(seconds);
            while samples.len() > STAGE_SAMPLES {
                samples.pop_front();
            }
        }
    }

    /// A gated stage timed out
    pub fn record_timeout(&self) {
        self.inner.lock().recent_timeouts += 1;
    }

    /// A gated stage completed cleanly; the breaker heals one step
    pub fn record_clean_success(&self) {
        let mut inner = self.inner.lock();
        inner.recent_timeouts = inner.recent_timeouts.saturating_sub(1);
    }

    /// Should expensive phases be skipped this query?
    pub fn breaker_open(&self) -> bool {
        self.inner.lock().recent_timeouts > CIRCUIT_BREAKER_LIMIT
    }

    pub fn recent_timeouts(&self) -> u32 {
        self.inner.lock().recent_timeouts
    }

    pub fn add_validation_score(&self, score: f32) {
        let mut inner = self.inner.lock();
        inner.validation_scores.push_back(score);
        while inner.validation_scores.len() > STAGE_SAMPLES {
            inner.validation_scores.pop_front();
        }
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        let inner = self.inner.lock();
        let validation_count = inner.validation_scores.len();
        let avg_validation_score = if validation_count == 0 {
            0.0
        } else {
            inner.validation_scores.iter().sum::<f32>() / validation_count as f32
        };
        StatsSnapshot {
            total_queries: inner.total_queries,
            avg_processing_time: inner.avg_processing_time,
            cache_hits: inner.cache_hits,
            recent_timeouts: inner.recent_timeouts,
            validation_count,
            avg_validation_score,
        }
    }

    /// Per-stage latency summaries over the retained samples
    pub fn stage_stats(&self) -> HashMap<String, StageStats> {
        let inner = self.inner.lock();
        inner
            .stage_timings
            .iter()
            .map(|(stage, samples)| {
                let stats = if samples.is_empty() {
                    StageStats::default()
                } else {
                    let mut sorted: Vec<f64> = samples.iter().copied().collect();
                    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                    let count = sorted.len();
                    let p50 = sorted[count / 2];
                    let p95_idx = (((count as f64) * 0.95) as usize).min(count - 1);
                    let p95 = sorted[p95_idx];
                    StageStats {
                        count,
                        min: sorted[0],
                        max: sorted[count - 1],
                        mean: sorted.iter().sum::<f64>() / count as f64,
                        p50,
                        p95,
                    }
                };
                (stage.to_string(), stats)
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_running_average() {
        let stats = EngineStats::new();
        stats.record_query(1.0);
        stats.record_query(3.0);
        let snap = stats.snapshot();
        assert_eq!(snap.total_queries, 2);
        assert!((snap.avg_processing_time - 2.0).abs() < 1e-9);
    }

    #[test]
    fn test_breaker_trips_and_heals() {
        let stats = EngineStats::new();
        for _ in 0..4 {
            stats.record_timeout();
        }
        assert!(stats.breaker_open());

        stats.record_clean_success();
        assert!(!stats.breaker_open());
        assert_eq!(stats.recent_timeouts(), 3);
    }

    #[test]
    fn test_clean_success_saturates_at_zero() {
        let stats = EngineStats::new();
        stats.record_clean_success();
        assert_eq!(stats.recent_timeouts(), 0);
    }

    #[test]
    fn test_stage_histogram_capped() {
        let stats = EngineStats::new();
        for i in 0..150 {
            stats.record_stage("retrieval", i as f64);
        }
        let all = stats.stage_stats();
        let retrieval = &all["retrieval"];
        assert_eq!(retrieval.count, 100);
        assert!((retrieval.min - 50.0).abs() < 1e-9);
        assert!((retrieval.max - 149.0).abs() < 1e-9);
        assert!(retrieval.p95 >= retrieval.p50);
    }

    #[test]
    fn test_validation_scores_bounded() {
        let stats = EngineStats::new();
        for _ in 0..150 {
            stats.add_validation_score(0.8);
        }
        let snap = stats.snapshot();
        assert_eq!(snap.validation_count, 100);
        assert!((snap.avg_validation_score - 0.8).abs() < 1e-6);
    }
}
