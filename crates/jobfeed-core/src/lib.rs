//! Core domain model for the jobfeed ingestion pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobfeed-core";

/// A posting exactly as a source adapter hands it off: mapped into the
/// common shape at the source boundary, not yet canonicalized. Ephemeral;
/// lives only for the duration of one ingestion run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawPosting {
    pub source: String,
    pub title: String,
    pub company: Option<String>,
    pub location: Option<String>,
    pub description: Option<String>,
    pub url: Option<String>,
    pub posted_at: Option<DateTime<Utc>>,
    pub salary_min: Option<f64>,
    pub salary_max: Option<f64>,
    pub salary_currency: Option<String>,
}

/// A raw posting plus its derived fingerprint and the canonical text the
/// fuzzy dedup layer compares against. Immutable once built.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NormalizedPosting {
    pub raw: RawPosting,
    pub fingerprint: String,
    pub comparison_text: String,
}

/// Durable job record owned by the storage collaborator. The pipeline
/// creates these for dedup survivors and never mutates or deletes them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedJob {
    pub id: Uuid,
    pub fingerprint: String,
    pub source: String,
    pub title: String,
    pub company: String,
    pub location: String,
    pub description: Option<String>,
    pub url: Option<String>,
    pub first_seen: DateTime<Utc>,
}

/// User search parameters for one ingestion run, shared by every adapter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchQuery {
    pub keywords: Vec<String>,
    pub locations: Vec<String>,
    pub remote: bool,
    pub max_results: usize,
}

pub const REMOTE_LOCATION: &str = "remote";

impl SearchQuery {
    /// Locations to filter upstream queries by. Blank entries and the
    /// `"remote"` sentinel are dropped; an empty result means no location
    /// filter. Adapters issue one upstream pass per filter and merge the
    /// passes into the run's single candidate batch.
    pub fn location_filters(&self) -> Vec<&str> {
        self.locations
            .iter()
            .map(|loc| loc.trim())
            .filter(|loc| !loc.is_empty() && !loc.eq_ignore_ascii_case(REMOTE_LOCATION))
            .collect()
    }

    pub fn keyword_phrase(&self) -> String {
        self.keywords
            .iter()
            .map(|k| k.trim())
            .filter(|k| !k.is_empty())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Outcome of one coordinator invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub fetched: usize,
    pub deduplicated: usize,
    pub persisted: usize,
    pub persist_failures: usize,
    pub failed_sources: Vec<String>,
}

impl IngestionSummary {
    /// Every source failed. Distinguishes "degraded run" from "no new jobs".
    pub fn fully_degraded(&self, total_sources: usize) -> bool {
        self.fetched == 0 && total_sources > 0 && self.failed_sources.len() == total_sources
    }
}

/// Trim, lowercase, and collapse whitespace runs to single spaces.
pub fn canonical(input: &str) -> String {
    input
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Deterministic fingerprint over the canonical (title, company, location)
/// triple. Deliberately coarse: identical triples from different sources
/// collapse to one posting. Missing fields hash as empty strings so the
/// fingerprint is total.
pub fn fingerprint(title: &str, company: &str, location: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(canonical(title).as_bytes());
    hasher.update([0x1f]);
    hasher.update(canonical(company).as_bytes());
    hasher.update([0x1f]);
    hasher.update(canonical(location).as_bytes());
    hex::encode(hasher.finalize())
}
