//! Result processing: deduplication, score normalization, fusion

use policy_engine_core::RetrievalResult;

use policy_engine_config::constants::retrieval::RRF_K;

/// Score normalization strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NormalizeMethod {
    /// Fast default; preserves relative ordering
    MinMax,
    /// For wide score distributions
    ZScore,
    /// Pick z-score only when the range exceeds twice the mean
    Auto,
}

/// Stateless result transformations
#[derive(Debug, Default)]
pub struct ResultProcessor;

impl ResultProcessor {
    pub fn new() -> Self {
        Self
    }

    /// Deduplicate by chunk id, keeping the highest-score occurrence, then
    /// sort by score descending
    pub fn deduplicate(&self, results: Vec<RetrievalResult>) -> Vec<RetrievalResult> {
        let mut seen: Vec<RetrievalResult> = Vec::with_capacity(results.len());

        for result in results {
            match seen.iter_mut().find(|r| r.chunk_id == result.chunk_id) {
                Some(existing) => {
                    if result.score > existing.score {
                        *existing = result;
                    }
                }
                None => seen.push(result),
            }
        }

        seen.sort_by(|a, b| b.score.partial_cmp(&a.score).unwrap_or(std::cmp::Ordering::Equal));
        seen
    }

    /// Normalize scores into [0, 1], preserving the pre-normalization score
    /// into `metadata.raw_score` exactly once
    pub fn normalize_scores(
        &self,
        mut results: Vec<RetrievalResult>,
        method: NormalizeMethod,
    ) -> Vec<RetrievalResult> {
        if results.is_empty() {
            return results;
        }

        let scores: Vec<f32> = results.iter().map(|r| r.score).collect();
        let min = scores.iter().copied().fold(f32::INFINITY, f32::min);
        let max = scores.iter().copied().fold(f32::NEG_INFINITY, f32::max);
        let mean = scores.iter().sum::<f32>() / scores.len() as f32;

        let method = match method {
            NormalizeMethod::Auto => {
                let range = max - min;
                if range > 2.0 * mean && scores.len() > 5 {
                    NormalizeMethod::ZScore
                } else {
                    NormalizeMethod::MinMax
                }
            }
            other => other,
        };

        match method {
            NormalizeMethod::MinMax => {
                if (max - min).abs() < f32::EPSILON {
                    for r in &mut results {
                        r.preserve_raw_score();
                        r.score = 1.0;
                    }
                    return results;
                }
                for r in &mut results {
                    r.preserve_raw_score();
                    r.score = (r.score - min) / (max - min);
                }
            }
            NormalizeMethod::ZScore => {
                let variance = scores
                    .iter()
                    .map(|s| (s - mean) * (s - mean))
                    .sum::<f32>()
                    / (scores.len().max(2) - 1) as f32;
                let stdev = variance.sqrt().max(f32::EPSILON);

                for r in &mut results {
                    r.preserve_raw_score();
                    let z = (r.score - mean) / stdev;
                    // Shift a 3-sigma range into [0, 1]
                    r.score = ((z + 3.0) / 6.0).clamp(0.0, 1.0);
                }
            }
            NormalizeMethod::Auto => unreachable!(),
        }

        results
    }

    /// Reciprocal rank fusion across multiple ranked lists
    ///
    /// score(d) = sum over lists of 1/(k + rank). Documents appearing in
    /// several lists get a consensus boost; the fused score replaces the
    /// result score and is recorded as `metadata.rrf_score`.
    pub fn rrf_fuse(&self, lists: Vec<Vec<RetrievalResult>>) -> Vec<RetrievalResult> {
        let mut fused: Vec<(RetrievalResult, f32)> = Vec::new();

        for list in lists {
            for (rank, result) in list.into_iter().enumerate() {
                let contribution = 1.0 / (RRF_K + (rank + 1) as f32);
                match fused.iter_mut().find(|(r, _)| r.chunk_id == result.chunk_id) {
                    Some((existing, score)) => {
                        *score += contribution;
                        if result.score > existing.score {
                            *existing = result;
                        }
                    }
                    None => fused.push((result, contribution)),
                }
            }
        }

        fused.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        fused
            .into_iter()
            .map(|(mut result, rrf_score)| {
                result.set_meta("rrf_score", rrf_score as f64);
                result.set_meta("fusion_method", "rrf");
                result.set_meta("original_score", result.score as f64);
                result.score = rrf_score;
                result
            })
            .collect()
    }
}
