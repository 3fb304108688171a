//! HTTP fetch utilities and the job-store boundary for the jobfeed pipeline.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobfeed_core::{NormalizedPosting, PersistedJob};
use reqwest::StatusCode;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::sync::{Mutex, Semaphore};
use tracing::info_span;
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobfeed-storage";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

#[derive(Debug, Clone, Copy)]
pub struct BackoffPolicy {
    pub max_retries: usize,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl BackoffPolicy {
    pub fn delay_for_attempt(&self, attempt_index: usize) -> Duration {
        let factor = 1u32.checked_shl(attempt_index as u32).unwrap_or(u32::MAX);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TokenBucketConfig {
    pub capacity: u32,
    pub refill_every: Duration,
}

/// Coarse request pacing shared across all sources that opt in.
#[derive(Debug)]
pub struct RequestBucket {
    capacity: u32,
    refill_every: Duration,
    state: Mutex<BucketState>,
}

#[derive(Debug, Clone, Copy)]
struct BucketState {
    tokens: u32,
    last_refill: Instant,
}

impl RequestBucket {
    pub fn new(capacity: u32, refill_every: Duration) -> Self {
        Self {
            capacity,
            refill_every,
            state: Mutex::new(BucketState {
                tokens: capacity,
                last_refill: Instant::now(),
            }),
        }
    }

    pub async fn take(&self) {
        loop {
            let mut state = self.state.lock().await;
            let elapsed = state.last_refill.elapsed();
            if elapsed >= self.refill_every && self.refill_every.as_millis() > 0 {
                let refills = (elapsed.as_millis() / self.refill_every.as_millis()) as u32;
                state.tokens = state.tokens.saturating_add(refills).min(self.capacity);
                state.last_refill = Instant::now();
            }
            if state.tokens > 0 {
                state.tokens -= 1;
                return;
            }
            let sleep_for = self.refill_every;
            drop(state);
            tokio::time::sleep(sleep_for).await;
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
    pub global_concurrency: usize,
    pub per_source_concurrency: usize,
    pub backoff: BackoffPolicy,
    pub token_bucket: Option<TokenBucketConfig>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
            global_concurrency: 16,
            per_source_concurrency: 4,
            backoff: BackoffPolicy::default(),
            token_bucket: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed after retries: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
    #[error("malformed response body from {url}: {reason}")]
    MalformedBody { url: String, reason: String },
    #[error("invalid request url {url}: {reason}")]
    InvalidUrl { url: String, reason: String },
}

/// Build a request URL with percent-encoded query parameters.
pub fn url_with_params(base: &str, params: &[(&str, String)]) -> Result<String, FetchError> {
    let url = reqwest::Url::parse_with_params(base, params.iter().map(|(k, v)| (*k, v.as_str())))
        .map_err(|err| FetchError::InvalidUrl {
            url: base.to_string(),
            reason: err.to_string(),
        })?;
    Ok(url.into())
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Clone, Copy)]
enum RequestKind<'a> {
    Get,
    PostJson(&'a JsonValue),
}

/// Shared HTTP client with retry/backoff, global and per-source concurrency
/// limits, and optional token-bucket pacing. Adapters add their own
/// inter-page delays on top of this.
#[derive(Debug)]
pub struct HttpFetcher {
    client: reqwest::Client,
    global_limit: Arc<Semaphore>,
    per_source_limit: usize,
    per_source: Mutex<HashMap<String, Arc<Semaphore>>>,
    token_bucket: Option<Arc<RequestBucket>>,
    backoff: BackoffPolicy,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);
        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }
        let client = builder.build().context("building reqwest client")?;
        let token_bucket = config
            .token_bucket
            .map(|c| Arc::new(RequestBucket::new(c.capacity, c.refill_every)));

        Ok(Self {
            client,
            global_limit: Arc::new(Semaphore::new(config.global_concurrency.max(1))),
            per_source_limit: config.per_source_concurrency.max(1),
            per_source: Mutex::new(HashMap::new()),
            token_bucket,
            backoff: config.backoff,
        })
    }

    async fn per_source_semaphore(&self, source: &str) -> Arc<Semaphore> {
        let mut map = self.per_source.lock().await;
        map.entry(source.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(self.per_source_limit)))
            .clone()
    }

    pub async fn fetch_bytes(
        &self,
        source: &str,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<FetchedResponse, FetchError> {
        self.request(source, url, headers, RequestKind::Get).await
    }

    /// GET `url` and parse the body as JSON.
    pub async fn fetch_json(
        &self,
        source: &str,
        url: &str,
        headers: &[(&str, &str)],
    ) -> Result<JsonValue, FetchError> {
        let response = self.request(source, url, headers, RequestKind::Get).await?;
        parse_json_body(&response)
    }

    /// POST a JSON body to `url` and parse the JSON response.
    pub async fn post_json(
        &self,
        source: &str,
        url: &str,
        headers: &[(&str, &str)],
        body: &JsonValue,
    ) -> Result<JsonValue, FetchError> {
        let response = self
            .request(source, url, headers, RequestKind::PostJson(body))
            .await?;
        parse_json_body(&response)
    }

    async fn request(
        &self,
        source: &str,
        url: &str,
        headers: &[(&str, &str)],
        kind: RequestKind<'_>,
    ) -> Result<FetchedResponse, FetchError> {
        let _global = self.global_limit.acquire().await.expect("semaphore not closed");
        let per_source = self.per_source_semaphore(source).await;
        let _source = per_source.acquire().await.expect("semaphore not closed");

        if let Some(bucket) = &self.token_bucket {
            bucket.take().await;
        }

        let span = info_span!("http_request", source, url);
        let _guard = span.enter();

        let mut last_request_error: Option<reqwest::Error> = None;

        for attempt in 0..=self.backoff.max_retries {
            let mut builder = match kind {
                RequestKind::Get => self.client.get(url),
                RequestKind::PostJson(body) => self.client.post(url).json(body),
            };
            for (name, value) in headers {
                builder = builder.header(*name, *value);
            }

            match builder.send().await {
                Ok(resp) => {
                    let status = resp.status();
                    let final_url = resp.url().to_string();

                    if status.is_success() {
                        let body = resp.bytes().await?.to_vec();
                        return Ok(FetchedResponse {
                            status,
                            final_url,
                            body,
                        });
                    }

                    if classify_status(status) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }

                    return Err(FetchError::HttpStatus {
                        status: status.as_u16(),
                        url: final_url,
                    });
                }
                Err(err) => {
                    if classify_reqwest_error(&err) == RetryDisposition::Retryable
                        && attempt < self.backoff.max_retries
                    {
                        last_request_error = Some(err);
                        tokio::time::sleep(self.backoff.delay_for_attempt(attempt)).await;
                        continue;
                    }
                    return Err(FetchError::Request(err));
                }
            }
        }

        Err(FetchError::Request(
            last_request_error.expect("retry loop should capture a request error"),
        ))
    }
}

fn parse_json_body(response: &FetchedResponse) -> Result<JsonValue, FetchError> {
    serde_json::from_slice(&response.body).map_err(|err| FetchError::MalformedBody {
        url: response.final_url.clone(),
        reason: err.to_string(),
    })
}

#[derive(Debug)]
pub enum StoreError {
    PersistenceFailed {
        fingerprint: String,
        source: String,
        reason: String,
    },
    Query(String),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreError::PersistenceFailed {
                fingerprint,
                source,
                reason,
            } => write!(f, "persisting {fingerprint} from {source} failed: {reason}"),
            StoreError::Query(reason) => write!(f, "history query failed: {reason}"),
        }
    }
}

impl std::error::Error for StoreError {}

/// Boundary to the durable job table. The pipeline only ever reads recent
/// history and inserts survivors; updates and deletes are not its concern.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// All jobs first seen after `now - window_days` (exclusive boundary).
    async fn query_recent(
        &self,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<PersistedJob>, StoreError>;

    async fn persist(
        &self,
        posting: &NormalizedPosting,
        first_seen: DateTime<Utc>,
    ) -> Result<PersistedJob, StoreError>;
}

pub const JOBS_SCHEMA_SQL: &str = "\
CREATE TABLE IF NOT EXISTS jobs (
    id UUID PRIMARY KEY,
    fingerprint TEXT NOT NULL,
    source TEXT NOT NULL,
    title TEXT NOT NULL,
    company TEXT NOT NULL,
    location TEXT NOT NULL,
    description TEXT,
    url TEXT,
    first_seen TIMESTAMPTZ NOT NULL
);
CREATE INDEX IF NOT EXISTS jobs_fingerprint_idx ON jobs (fingerprint);
CREATE INDEX IF NOT EXISTS jobs_first_seen_idx ON jobs (first_seen);
";

/// Postgres-backed job store using runtime sqlx queries.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .context("connecting to postgres")?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        for statement in JOBS_SCHEMA_SQL.split(';') {
            let statement = statement.trim();
            if statement.is_empty() {
                continue;
            }
            sqlx::query(statement)
                .execute(&self.pool)
                .await
                .with_context(|| format!("applying schema statement: {statement}"))?;
        }
        Ok(())
    }
}

fn row_to_job(row: &sqlx::postgres::PgRow) -> PersistedJob {
    PersistedJob {
        id: row.get("id"),
        fingerprint: row.get("fingerprint"),
        source: row.get("source"),
        title: row.get("title"),
        company: row.get("company"),
        location: row.get("location"),
        description: row.get("description"),
        url: row.get("url"),
        first_seen: row.get("first_seen"),
    }
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn query_recent(
        &self,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<PersistedJob>, StoreError> {
        let cutoff = now - chrono::Duration::days(window_days);
        let rows = sqlx::query(
            "SELECT id, fingerprint, source, title, company, location, description, url, first_seen \
             FROM jobs WHERE first_seen > $1 ORDER BY first_seen",
        )
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(|err| StoreError::Query(err.to_string()))?;

        Ok(rows.iter().map(row_to_job).collect())
    }

    async fn persist(
        &self,
        posting: &NormalizedPosting,
        first_seen: DateTime<Utc>,
    ) -> Result<PersistedJob, StoreError> {
        let job = PersistedJob {
            id: Uuid::new_v4(),
            fingerprint: posting.fingerprint.clone(),
            source: posting.raw.source.clone(),
            title: posting.raw.title.clone(),
            company: posting.raw.company.clone().unwrap_or_default(),
            location: posting.raw.location.clone().unwrap_or_default(),
            description: posting.raw.description.clone(),
            url: posting.raw.url.clone(),
            first_seen,
        };

        sqlx::query(
            "INSERT INTO jobs (id, fingerprint, source, title, company, location, description, url, first_seen) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)",
        )
        .bind(job.id)
        .bind(&job.fingerprint)
        .bind(&job.source)
        .bind(&job.title)
        .bind(&job.company)
        .bind(&job.location)
        .bind(&job.description)
        .bind(&job.url)
        .bind(job.first_seen)
        .execute(&self.pool)
        .await
        .map_err(|err| StoreError::PersistenceFailed {
            fingerprint: job.fingerprint.clone(),
            source: job.source.clone(),
            reason: err.to_string(),
        })?;

        Ok(job)
    }
}

const JOB_ID_NAMESPACE: Uuid = Uuid::NAMESPACE_URL;

/// In-memory job store for tests and dry runs. Ids are v5 UUIDs derived from
/// the fingerprint, so repeated persists of the same posting are observable.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    jobs: Mutex<Vec<PersistedJob>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-load a history row, e.g. a job "persisted" days before the run.
    pub async fn seed(&self, job: PersistedJob) {
        self.jobs.lock().await.push(job);
    }

    pub async fn all(&self) -> Vec<PersistedJob> {
        self.jobs.lock().await.clone()
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn query_recent(
        &self,
        window_days: i64,
        now: DateTime<Utc>,
    ) -> Result<Vec<PersistedJob>, StoreError> {
        let cutoff = now - chrono::Duration::days(window_days);
        Ok(self
            .jobs
            .lock()
            .await
            .iter()
            .filter(|job| job.first_seen > cutoff)
            .cloned()
            .collect())
    }

    async fn persist(
        &self,
        posting: &NormalizedPosting,
        first_seen: DateTime<Utc>,
    ) -> Result<PersistedJob, StoreError> {
        let job = PersistedJob {
            id: Uuid::new_v5(&JOB_ID_NAMESPACE, posting.fingerprint.as_bytes()),
            fingerprint: posting.fingerprint.clone(),
            source: posting.raw.source.clone(),
            title: posting.raw.title.clone(),
            company: posting.raw.company.clone().unwrap_or_default(),
            location: posting.raw.location.clone().unwrap_or_default(),
            description: posting.raw.description.clone(),
            url: posting.raw.url.clone(),
            first_seen,
        };
        self.jobs.lock().await.push(job.clone());
        Ok(job)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobfeed_core::{fingerprint, RawPosting};

    fn posting(title: &str, company: &str, location: &str) -> NormalizedPosting {
        let raw = RawPosting {
            source: "test".into(),
            title: title.into(),
            company: Some(company.into()),
            location: Some(location.into()),
            description: None,
            url: None,
            posted_at: None,
            salary_min: None,
            salary_max: None,
            salary_currency: None,
        };
        NormalizedPosting {
            fingerprint: fingerprint(title, company, location),
            comparison_text: format!("{title} {company} {location}").to_lowercase(),
            raw,
        }
    }

    fn response(body: &[u8]) -> FetchedResponse {
        FetchedResponse {
            status: StatusCode::OK,
            final_url: "https://api.example.com/jobs".into(),
            body: body.to_vec(),
        }
    }

    #[test]
    fn backoff_doubles_per_attempt_up_to_the_cap() {
        let policy = BackoffPolicy {
            max_retries: 4,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(1),
        };
        let delays: Vec<Duration> = (0..4).map(|i| policy.delay_for_attempt(i)).collect();
        assert_eq!(
            delays,
            vec![
                Duration::from_millis(250),
                Duration::from_millis(500),
                Duration::from_secs(1),
                Duration::from_secs(1),
            ]
        );
        // Huge attempt indices must saturate rather than overflow the shift.
        assert_eq!(policy.delay_for_attempt(64), Duration::from_secs(1));
    }

    #[test]
    fn url_params_are_percent_encoded() {
        let url = url_with_params(
            "https://api.example.com/search",
            &[
                ("what", "data scientist".to_string()),
                ("where", "köln".to_string()),
            ],
        )
        .unwrap();
        assert_eq!(
            url,
            "https://api.example.com/search?what=data+scientist&where=k%C3%B6ln"
        );
    }

    #[test]
    fn unparseable_base_url_is_reported_not_sent() {
        let err = url_with_params("not a url", &[("page", "1".to_string())]).unwrap_err();
        match err {
            FetchError::InvalidUrl { url, .. } => assert_eq!(url, "not a url"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn json_bodies_parse_and_html_error_pages_are_malformed() {
        let payload = parse_json_body(&response(br#"{"results": []}"#)).unwrap();
        assert!(payload.get("results").is_some());

        let err = parse_json_body(&response(b"<html>502 Bad Gateway</html>")).unwrap_err();
        match err {
            FetchError::MalformedBody { url, .. } => {
                assert_eq!(url, "https://api.example.com/jobs");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn http_status_classification() {
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
    }

    #[tokio::test]
    async fn memory_store_windowing_is_exclusive_at_cutoff() {
        let store = MemoryJobStore::new();
        let now = Utc::now();

        let inside = store
            .persist(&posting("Inside", "Acme", "Berlin"), now - chrono::Duration::days(10))
            .await
            .unwrap();
        store
            .persist(&posting("At Boundary", "Acme", "Berlin"), now - chrono::Duration::days(30))
            .await
            .unwrap();
        store
            .persist(&posting("Outside", "Acme", "Berlin"), now - chrono::Duration::days(40))
            .await
            .unwrap();

        let recent = store.query_recent(30, now).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].id, inside.id);
    }

    #[tokio::test]
    async fn memory_store_ids_are_deterministic_per_fingerprint() {
        let store = MemoryJobStore::new();
        let now = Utc::now();
        let a = store.persist(&posting("Dev", "Acme", "Berlin"), now).await.unwrap();
        let b = store.persist(&posting("DEV", "acme", " berlin"), now).await.unwrap();
        assert_eq!(a.id, b.id);
        let c = store.persist(&posting("Dev", "Other", "Berlin"), now).await.unwrap();
        assert_ne!(a.id, c.id);
    }
}
