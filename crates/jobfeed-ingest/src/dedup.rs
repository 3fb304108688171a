//! Three-layer duplicate filter: in-batch exact, windowed exact against
//! history, fuzzy similarity against the same windowed history.

use std::collections::HashSet;

use chrono::{DateTime, Duration, Utc};
use jobfeed_core::{NormalizedPosting, PersistedJob};
use tracing::debug;

use crate::normalize::history_comparison_text;

/// Pluggable text-similarity strategy for the fuzzy layer. `None` means the
/// pair could not be scored and is treated as non-matching (fail open: an
/// occasional duplicate beats silently dropping a unique posting).
pub trait SimilarityScorer: Send + Sync {
    fn score(&self, a: &str, b: &str) -> Option<f64>;
}

/// Default scorer: Jaro-Winkler over the canonical title/company/location
/// text. Empty text on either side is unscorable.
#[derive(Debug, Clone, Copy, Default)]
pub struct JaroWinklerScorer;

impl SimilarityScorer for JaroWinklerScorer {
    fn score(&self, a: &str, b: &str) -> Option<f64> {
        if a.is_empty() || b.is_empty() {
            return None;
        }
        Some(strsim::jaro_winkler(a, b))
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DedupConfig {
    /// History older than this many days is eligible to reappear; covers
    /// legitimately reposted listings. Boundary is exclusive: a record first
    /// seen exactly `lookback_days` ago is outside the window.
    pub lookback_days: i64,
    /// Inclusive: a score exactly at the threshold counts as a duplicate.
    pub similarity_threshold: f64,
    pub exact_history_enabled: bool,
    pub fuzzy_enabled: bool,
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            similarity_threshold: 0.85,
            exact_history_enabled: true,
            fuzzy_enabled: true,
        }
    }
}

#[derive(Debug, Default)]
pub struct DedupOutcome {
    pub survivors: Vec<NormalizedPosting>,
    pub dropped_in_batch: usize,
    pub dropped_exact: usize,
    pub dropped_fuzzy: usize,
}

impl DedupOutcome {
    pub fn dropped_total(&self) -> usize {
        self.dropped_in_batch + self.dropped_exact + self.dropped_fuzzy
    }
}

pub struct Deduplicator {
    config: DedupConfig,
    scorer: Box<dyn SimilarityScorer>,
}

impl Deduplicator {
    pub fn new(config: DedupConfig, scorer: Box<dyn SimilarityScorer>) -> Self {
        Self { config, scorer }
    }

    pub fn with_defaults() -> Self {
        Self::new(DedupConfig::default(), Box::new(JaroWinklerScorer))
    }

    pub fn config(&self) -> DedupConfig {
        self.config
    }

    /// Filters `candidates` (already merged in registration order — that
    /// order is the first-seen-wins tie break) against themselves and the
    /// windowed slice of `history`. Layers run cheapest first so each one
    /// sees fewer candidates than the last.
    pub fn filter(
        &self,
        candidates: Vec<NormalizedPosting>,
        history: &[PersistedJob],
        now: DateTime<Utc>,
    ) -> DedupOutcome {
        let cutoff = now - Duration::days(self.config.lookback_days);
        let windowed: Vec<&PersistedJob> = history
            .iter()
            .filter(|job| job.first_seen > cutoff)
            .collect();

        let mut outcome = DedupOutcome::default();

        // Layer 1: in-batch exact fingerprints, first occurrence wins.
        let mut seen: HashSet<&str> = HashSet::new();
        let mut batch_unique = Vec::with_capacity(candidates.len());
        for candidate in &candidates {
            if seen.insert(candidate.fingerprint.as_str()) {
                batch_unique.push(candidate);
            } else {
                outcome.dropped_in_batch += 1;
            }
        }

        // Layer 2: exact fingerprint match inside the lookback window.
        let history_fingerprints: HashSet<&str> = if self.config.exact_history_enabled {
            windowed.iter().map(|job| job.fingerprint.as_str()).collect()
        } else {
            HashSet::new()
        };

        // Layer 3 comparison text, canonicalized once per history row.
        let history_texts: Vec<String> = if self.config.fuzzy_enabled {
            windowed
                .iter()
                .map(|job| history_comparison_text(&job.title, &job.company, &job.location))
                .collect()
        } else {
            Vec::new()
        };

        for candidate in batch_unique {
            if history_fingerprints.contains(candidate.fingerprint.as_str()) {
                outcome.dropped_exact += 1;
                continue;
            }

            if self.config.fuzzy_enabled {
                let near_match = history_texts.iter().any(|text| {
                    self.scorer
                        .score(&candidate.comparison_text, text)
                        .is_some_and(|score| score >= self.config.similarity_threshold)
                });
                if near_match {
                    debug!(fingerprint = %candidate.fingerprint, "near-duplicate dropped");
                    outcome.dropped_fuzzy += 1;
                    continue;
                }
            }

            outcome.survivors.push(candidate.clone());
        }

        outcome
    }
}
