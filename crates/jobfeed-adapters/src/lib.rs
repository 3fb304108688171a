//! Per-source job board adapters mapping upstream payloads into `RawPosting`.
//!
//! Each adapter owns its upstream quirks (auth, paging, pacing) and hands
//! nothing but the common record shape downstream. Payload mapping is kept in
//! pure `parse_*` functions so it can be tested against fixtures without a
//! network.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use jobfeed_core::{RawPosting, SearchQuery};
use jobfeed_storage::{url_with_params, HttpFetcher};
use scraper::{Html, Selector};
use serde::Deserialize;
use serde_json::Value as JsonValue;
use tracing::debug;

pub const CRATE_NAME: &str = "jobfeed-adapters";

#[derive(Debug)]
pub enum AdapterError {
    /// Upstream timeout, non-2xx after retries, or malformed payload. The
    /// coordinator converts this into an empty contribution for the source;
    /// it never blocks ingestion from the other sources.
    SourceUnavailable {
        source: &'static str,
        reason: String,
    },
}

impl std::fmt::Display for AdapterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AdapterError::SourceUnavailable { source, reason } => {
                write!(f, "source {source} unavailable: {reason}")
            }
        }
    }
}

impl std::error::Error for AdapterError {}

impl AdapterError {
    fn unavailable(source: &'static str, err: impl std::fmt::Display) -> Self {
        Self::SourceUnavailable {
            source,
            reason: err.to_string(),
        }
    }
}

/// One job board integration. `fetch` returns at most `query.max_results`
/// postings; an invalid location degrades to an unfiltered query rather than
/// erroring.
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    async fn fetch(
        &self,
        http: &HttpFetcher,
        query: &SearchQuery,
    ) -> Result<Vec<RawPosting>, AdapterError>;
}

fn json_str<'a>(value: &'a JsonValue, path: &[&str]) -> Option<&'a str> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    cur.as_str()
}

fn json_f64(value: &JsonValue, path: &[&str]) -> Option<f64> {
    let mut cur = value;
    for segment in path {
        cur = cur.get(*segment)?;
    }
    cur.as_f64()
}

fn parse_timestamp(value: Option<&str>) -> Option<DateTime<Utc>> {
    let text = value?;
    DateTime::parse_from_rfc3339(text)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn non_empty(value: Option<&str>) -> Option<String> {
    value.map(str::trim).filter(|s| !s.is_empty()).map(String::from)
}

/// Case-insensitive keyword screen for boards whose API cannot filter
/// server-side. Empty keyword sets pass everything (broad results are
/// allowed by contract).
fn matches_keywords(title: &str, description: Option<&str>, keywords: &[String]) -> bool {
    let terms: Vec<String> = keywords
        .iter()
        .map(|k| k.trim().to_lowercase())
        .filter(|k| !k.is_empty())
        .collect();
    if terms.is_empty() {
        return true;
    }
    let mut haystack = title.to_lowercase();
    if let Some(description) = description {
        haystack.push(' ');
        haystack.push_str(&description.to_lowercase());
    }
    terms.iter().any(|term| haystack.contains(term))
}

/// Case-insensitive location screen for boards whose API cannot filter
/// server-side. Substring match against any requested location; no filters
/// means everything passes, filters plus a location-less posting means drop.
fn matches_locations(location: Option<&str>, filters: &[&str]) -> bool {
    if filters.is_empty() {
        return true;
    }
    let Some(location) = location else {
        return false;
    };
    let haystack = location.to_lowercase();
    filters
        .iter()
        .any(|filter| haystack.contains(&filter.to_lowercase()))
}

fn clamp(mut postings: Vec<RawPosting>, max_results: usize) -> Vec<RawPosting> {
    postings.truncate(max_results);
    postings
}

// ---------------------------------------------------------------------------
// Adzuna
// ---------------------------------------------------------------------------

pub const ADZUNA_SOURCE: &str = "adzuna";
const ADZUNA_PAGE_SIZE: usize = 50;

#[derive(Debug, Clone)]
pub struct AdzunaAdapter {
    pub app_id: String,
    pub app_key: String,
    pub country: String,
    pub page_delay: Duration,
}

impl AdzunaAdapter {
    pub fn new(app_id: String, app_key: String, country: String, page_delay: Duration) -> Self {
        Self {
            app_id,
            app_key,
            country,
            page_delay,
        }
    }
}

pub fn parse_adzuna(payload: &JsonValue) -> Vec<RawPosting> {
    let Some(results) = payload.get("results").and_then(JsonValue::as_array) else {
        return Vec::new();
    };
    results
        .iter()
        .filter_map(|item| {
            let title = non_empty(json_str(item, &["title"]))?;
            Some(RawPosting {
                source: ADZUNA_SOURCE.to_string(),
                title,
                company: non_empty(json_str(item, &["company", "display_name"])),
                location: non_empty(json_str(item, &["location", "display_name"])),
                description: non_empty(json_str(item, &["description"])),
                url: non_empty(json_str(item, &["redirect_url"])),
                posted_at: parse_timestamp(json_str(item, &["created"])),
                salary_min: json_f64(item, &["salary_min"]),
                salary_max: json_f64(item, &["salary_max"]),
                salary_currency: None,
            })
        })
        .collect()
}

#[async_trait]
impl SourceAdapter for AdzunaAdapter {
    fn name(&self) -> &'static str {
        ADZUNA_SOURCE
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        query: &SearchQuery,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let pages = query.max_results.div_ceil(ADZUNA_PAGE_SIZE).max(1);
        // One upstream pass per requested location; no locations means one
        // unfiltered pass.
        let filters = query.location_filters();
        let passes: Vec<Option<String>> = if filters.is_empty() {
            vec![None]
        } else {
            filters.iter().map(|loc| Some((*loc).to_string())).collect()
        };
        let mut postings = Vec::new();

        'passes: for (pass, location) in passes.iter().enumerate() {
            if pass > 0 {
                tokio::time::sleep(self.page_delay).await;
            }
            for page in 1..=pages {
                let base = format!(
                    "https://api.adzuna.com/v1/api/jobs/{}/search/{}",
                    self.country, page
                );
                let mut params = vec![
                    ("app_id", self.app_id.clone()),
                    ("app_key", self.app_key.clone()),
                    (
                        "results_per_page",
                        ADZUNA_PAGE_SIZE.min(query.max_results).to_string(),
                    ),
                ];
                let phrase = query.keyword_phrase();
                if !phrase.is_empty() {
                    params.push(("what", phrase));
                }
                if let Some(location) = location {
                    params.push(("where", location.clone()));
                }

                let url = url_with_params(&base, &params)
                    .map_err(|err| AdapterError::unavailable(ADZUNA_SOURCE, err))?;
                let payload = http
                    .fetch_json(ADZUNA_SOURCE, &url, &[])
                    .await
                    .map_err(|err| AdapterError::unavailable(ADZUNA_SOURCE, err))?;

                let page_postings = parse_adzuna(&payload);
                let page_count = page_postings.len();
                postings.extend(page_postings);
                debug!(source = ADZUNA_SOURCE, page, fetched = page_count, "page fetched");

                if postings.len() >= query.max_results {
                    break 'passes;
                }
                if page_count < ADZUNA_PAGE_SIZE {
                    continue 'passes;
                }
                tokio::time::sleep(self.page_delay).await;
            }
        }

        Ok(clamp(postings, query.max_results))
    }
}

// ---------------------------------------------------------------------------
// JSearch (RapidAPI)
// ---------------------------------------------------------------------------

pub const JSEARCH_SOURCE: &str = "jsearch";
const JSEARCH_HOST: &str = "jsearch.p.rapidapi.com";

#[derive(Debug, Clone)]
pub struct JSearchAdapter {
    pub api_key: String,
    pub page_delay: Duration,
}

impl JSearchAdapter {
    pub fn new(api_key: String, page_delay: Duration) -> Self {
        Self { api_key, page_delay }
    }
}

/// One upstream search string per requested location ("keywords in
/// location"); no locations collapse to a single keyword-only search.
pub fn jsearch_search_terms(query: &SearchQuery) -> Vec<String> {
    let phrase = query.keyword_phrase();
    let filters = query.location_filters();
    if filters.is_empty() {
        return vec![if phrase.is_empty() {
            "jobs".to_string()
        } else {
            phrase
        }];
    }
    filters
        .iter()
        .map(|location| {
            if phrase.is_empty() {
                (*location).to_string()
            } else {
                format!("{phrase} in {location}")
            }
        })
        .collect()
}

pub fn parse_jsearch(payload: &JsonValue) -> Vec<RawPosting> {
    let Some(data) = payload.get("data").and_then(JsonValue::as_array) else {
        return Vec::new();
    };
    data.iter()
        .filter_map(|item| {
            let title = non_empty(json_str(item, &["job_title"]))?;
            let city = non_empty(json_str(item, &["job_city"]));
            let country = non_empty(json_str(item, &["job_country"]));
            let location = match (city, country) {
                (Some(city), Some(country)) => Some(format!("{city}, {country}")),
                (city, country) => city.or(country),
            };
            Some(RawPosting {
                source: JSEARCH_SOURCE.to_string(),
                title,
                company: non_empty(json_str(item, &["employer_name"])),
                location,
                description: non_empty(json_str(item, &["job_description"])),
                url: non_empty(json_str(item, &["job_apply_link"])),
                posted_at: parse_timestamp(json_str(item, &["job_posted_at_datetime_utc"])),
                salary_min: json_f64(item, &["job_min_salary"]),
                salary_max: json_f64(item, &["job_max_salary"]),
                salary_currency: non_empty(json_str(item, &["job_salary_currency"])),
            })
        })
        .collect()
}

#[async_trait]
impl SourceAdapter for JSearchAdapter {
    fn name(&self) -> &'static str {
        JSEARCH_SOURCE
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        query: &SearchQuery,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let headers = [
            ("x-rapidapi-key", self.api_key.as_str()),
            ("x-rapidapi-host", JSEARCH_HOST),
        ];
        let mut postings = Vec::new();

        for (pass, search) in jsearch_search_terms(query).into_iter().enumerate() {
            if pass > 0 {
                tokio::time::sleep(self.page_delay).await;
            }
            let params = vec![
                ("query", search),
                ("num_pages", "1".to_string()),
                ("remote_jobs_only", query.remote.to_string()),
            ];
            let url = url_with_params(&format!("https://{JSEARCH_HOST}/search"), &params)
                .map_err(|err| AdapterError::unavailable(JSEARCH_SOURCE, err))?;
            let payload = http
                .fetch_json(JSEARCH_SOURCE, &url, &headers)
                .await
                .map_err(|err| AdapterError::unavailable(JSEARCH_SOURCE, err))?;

            postings.extend(parse_jsearch(&payload));
            if postings.len() >= query.max_results {
                break;
            }
        }

        Ok(clamp(postings, query.max_results))
    }
}

// ---------------------------------------------------------------------------
// The Muse
// ---------------------------------------------------------------------------

pub const MUSE_SOURCE: &str = "themuse";
const MUSE_MAX_PAGES: usize = 3;

#[derive(Debug, Clone)]
pub struct MuseAdapter {
    pub api_key: Option<String>,
    pub page_delay: Duration,
}

impl MuseAdapter {
    pub fn new(api_key: Option<String>, page_delay: Duration) -> Self {
        Self { api_key, page_delay }
    }
}

pub fn parse_muse(payload: &JsonValue) -> Vec<RawPosting> {
    let Some(results) = payload.get("results").and_then(JsonValue::as_array) else {
        return Vec::new();
    };
    results
        .iter()
        .filter_map(|item| {
            let title = non_empty(json_str(item, &["name"]))?;
            let location = item
                .get("locations")
                .and_then(JsonValue::as_array)
                .and_then(|locations| locations.first())
                .and_then(|loc| non_empty(json_str(loc, &["name"])));
            Some(RawPosting {
                source: MUSE_SOURCE.to_string(),
                title,
                company: non_empty(json_str(item, &["company", "name"])),
                location,
                description: non_empty(json_str(item, &["contents"])),
                url: non_empty(json_str(item, &["refs", "landing_page"])),
                posted_at: parse_timestamp(json_str(item, &["publication_date"])),
                salary_min: None,
                salary_max: None,
                salary_currency: None,
            })
        })
        .collect()
}

/// One page of Muse results after the client-side keyword screen. The public
/// API has no keyword parameter, so a page can be non-empty upstream while
/// `kept` is empty; pagination must key off `upstream_empty`, not `kept`.
struct MusePage {
    kept: Vec<RawPosting>,
    upstream_empty: bool,
}

fn screen_muse_page(payload: &JsonValue, query: &SearchQuery) -> MusePage {
    let parsed = parse_muse(payload);
    let upstream_empty = parsed.is_empty();
    let kept = parsed
        .into_iter()
        .filter(|p| matches_keywords(&p.title, p.description.as_deref(), &query.keywords))
        .collect();
    MusePage {
        kept,
        upstream_empty,
    }
}

#[async_trait]
impl SourceAdapter for MuseAdapter {
    fn name(&self) -> &'static str {
        MUSE_SOURCE
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        query: &SearchQuery,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let mut postings = Vec::new();

        for page in 0..MUSE_MAX_PAGES {
            let mut params = vec![("page", page.to_string())];
            if let Some(api_key) = &self.api_key {
                params.push(("api_key", api_key.clone()));
            }
            // The API accepts the parameter repeatedly, one per location.
            for location in query.location_filters() {
                params.push(("location", location.to_string()));
            }

            let url = url_with_params("https://www.themuse.com/api/public/jobs", &params)
                .map_err(|err| AdapterError::unavailable(MUSE_SOURCE, err))?;
            let payload = http
                .fetch_json(MUSE_SOURCE, &url, &[])
                .await
                .map_err(|err| AdapterError::unavailable(MUSE_SOURCE, err))?;

            let screened = screen_muse_page(&payload, query);
            postings.extend(screened.kept);

            if postings.len() >= query.max_results || screened.upstream_empty {
                break;
            }
            tokio::time::sleep(self.page_delay).await;
        }

        Ok(clamp(postings, query.max_results))
    }
}

// ---------------------------------------------------------------------------
// Arbeitnow
// ---------------------------------------------------------------------------

pub const ARBEITNOW_SOURCE: &str = "arbeitnow";

#[derive(Debug, Clone, Default)]
pub struct ArbeitnowAdapter;

#[derive(Debug, Deserialize)]
struct ArbeitnowResponse {
    #[serde(default)]
    data: Vec<ArbeitnowJob>,
}

#[derive(Debug, Deserialize)]
struct ArbeitnowJob {
    title: String,
    #[serde(default)]
    company_name: Option<String>,
    #[serde(default)]
    location: Option<String>,
    #[serde(default)]
    description: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    remote: bool,
    #[serde(default)]
    created_at: Option<i64>,
}

pub fn parse_arbeitnow(payload: &JsonValue, remote_only: bool) -> Vec<RawPosting> {
    let Ok(response) = serde_json::from_value::<ArbeitnowResponse>(payload.clone()) else {
        return Vec::new();
    };
    response
        .data
        .into_iter()
        .filter(|job| !remote_only || job.remote)
        .filter(|job| !job.title.trim().is_empty())
        .map(|job| RawPosting {
            source: ARBEITNOW_SOURCE.to_string(),
            title: job.title.trim().to_string(),
            company: job.company_name.as_deref().and_then(|c| non_empty(Some(c))),
            location: job.location.as_deref().and_then(|l| non_empty(Some(l))),
            description: job.description,
            url: job.url,
            posted_at: job
                .created_at
                .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            salary_min: None,
            salary_max: None,
            salary_currency: None,
        })
        .collect()
}

#[async_trait]
impl SourceAdapter for ArbeitnowAdapter {
    fn name(&self) -> &'static str {
        ARBEITNOW_SOURCE
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        query: &SearchQuery,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let payload = http
            .fetch_json(
                ARBEITNOW_SOURCE,
                "https://www.arbeitnow.com/api/job-board-api",
                &[],
            )
            .await
            .map_err(|err| AdapterError::unavailable(ARBEITNOW_SOURCE, err))?;

        // Keyless full-feed endpoint: keyword, location and remote screening
        // all happen client-side.
        let filters = query.location_filters();
        let postings: Vec<RawPosting> = parse_arbeitnow(&payload, query.remote)
            .into_iter()
            .filter(|p| matches_keywords(&p.title, p.description.as_deref(), &query.keywords))
            .filter(|p| matches_locations(p.location.as_deref(), &filters))
            .collect();

        Ok(clamp(postings, query.max_results))
    }
}

// ---------------------------------------------------------------------------
// Firecrawl-scraped careers pages
// ---------------------------------------------------------------------------

pub const FIRECRAWL_SOURCE: &str = "firecrawl";

/// Scrapes configured careers-page URLs through the Firecrawl API and parses
/// the returned HTML with selectors.
#[derive(Debug, Clone)]
pub struct FirecrawlAdapter {
    pub api_key: String,
    pub targets: Vec<String>,
    pub page_delay: Duration,
}

impl FirecrawlAdapter {
    pub fn new(api_key: String, targets: Vec<String>, page_delay: Duration) -> Self {
        Self {
            api_key,
            targets,
            page_delay,
        }
    }
}

fn selector(css: &'static str) -> Result<Selector, AdapterError> {
    Selector::parse(css).map_err(|err| AdapterError::unavailable(FIRECRAWL_SOURCE, err))
}

fn select_first_text(fragment: scraper::ElementRef<'_>, sel: &Selector) -> Option<String> {
    fragment.select(sel).next().and_then(|node| {
        let text = node.text().collect::<String>();
        non_empty(Some(text.as_str()))
    })
}

pub fn parse_careers_html(html: &str) -> Result<Vec<RawPosting>, AdapterError> {
    let document = Html::parse_document(html);
    let listing = selector("li.job, div.job-listing, article.job")?;
    let title_sel = selector(".title, h2, h3")?;
    let company_sel = selector(".company")?;
    let location_sel = selector(".location")?;
    let description_sel = selector(".description, .summary")?;
    let link_sel = selector("a[href]")?;

    let mut postings = Vec::new();
    for node in document.select(&listing) {
        let Some(title) = select_first_text(node, &title_sel) else {
            continue;
        };
        let url = node
            .select(&link_sel)
            .next()
            .and_then(|n| n.value().attr("href"))
            .and_then(|href| non_empty(Some(href)));
        postings.push(RawPosting {
            source: FIRECRAWL_SOURCE.to_string(),
            title,
            company: select_first_text(node, &company_sel),
            location: select_first_text(node, &location_sel),
            description: select_first_text(node, &description_sel),
            url,
            posted_at: None,
            salary_min: None,
            salary_max: None,
            salary_currency: None,
        });
    }
    Ok(postings)
}

#[async_trait]
impl SourceAdapter for FirecrawlAdapter {
    fn name(&self) -> &'static str {
        FIRECRAWL_SOURCE
    }

    async fn fetch(
        &self,
        http: &HttpFetcher,
        query: &SearchQuery,
    ) -> Result<Vec<RawPosting>, AdapterError> {
        let auth = format!("Bearer {}", self.api_key);
        let headers = [("Authorization", auth.as_str())];
        let filters = query.location_filters();
        let mut postings = Vec::new();

        for (index, target) in self.targets.iter().enumerate() {
            if index > 0 {
                tokio::time::sleep(self.page_delay).await;
            }
            let body = serde_json::json!({ "url": target, "formats": ["html"] });
            let payload = http
                .post_json(
                    FIRECRAWL_SOURCE,
                    "https://api.firecrawl.dev/v1/scrape",
                    &headers,
                    &body,
                )
                .await
                .map_err(|err| AdapterError::unavailable(FIRECRAWL_SOURCE, err))?;

            let html = json_str(&payload, &["data", "html"]).ok_or_else(|| {
                AdapterError::unavailable(FIRECRAWL_SOURCE, "scrape response missing data.html")
            })?;
            postings.extend(
                parse_careers_html(html)?
                    .into_iter()
                    .filter(|p| matches_keywords(&p.title, p.description.as_deref(), &query.keywords))
                    .filter(|p| matches_locations(p.location.as_deref(), &filters)),
            );
            if postings.len() >= query.max_results {
                break;
            }
        }

        Ok(clamp(postings, query.max_results))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn adzuna_payload_maps_all_fields() {
        let payload = serde_json::json!({
            "results": [
                {
                    "title": "Data Scientist",
                    "company": { "display_name": "Acme" },
                    "location": { "display_name": "Berlin" },
                    "description": "Build models.",
                    "redirect_url": "https://adzuna.example/1",
                    "created": "2026-08-01T12:30:00Z",
                    "salary_min": 60000.0,
                    "salary_max": 80000.0
                },
                { "company": { "display_name": "No Title Inc" } }
            ]
        });
        let postings = parse_adzuna(&payload);
        assert_eq!(postings.len(), 1);
        let p = &postings[0];
        assert_eq!(p.title, "Data Scientist");
        assert_eq!(p.company.as_deref(), Some("Acme"));
        assert_eq!(p.location.as_deref(), Some("Berlin"));
        assert_eq!(p.salary_min, Some(60000.0));
        assert!(p.posted_at.is_some());
    }

    #[test]
    fn jsearch_payload_joins_city_and_country() {
        let payload = serde_json::json!({
            "data": [
                {
                    "job_title": "Rust Engineer",
                    "employer_name": "Ferrous",
                    "job_city": "Munich",
                    "job_country": "DE",
                    "job_apply_link": "https://jsearch.example/apply",
                    "job_min_salary": 70000.0,
                    "job_salary_currency": "EUR"
                },
                {
                    "job_title": "Remote Analyst",
                    "job_country": "US"
                }
            ]
        });
        let postings = parse_jsearch(&payload);
        assert_eq!(postings.len(), 2);
        assert_eq!(postings[0].location.as_deref(), Some("Munich, DE"));
        assert_eq!(postings[0].salary_currency.as_deref(), Some("EUR"));
        assert_eq!(postings[1].location.as_deref(), Some("US"));
        assert_eq!(postings[1].company, None);
    }

    #[test]
    fn muse_payload_takes_first_location() {
        let payload = serde_json::json!({
            "results": [
                {
                    "name": "Backend Developer",
                    "company": { "name": "Museco" },
                    "locations": [ { "name": "New York, NY" }, { "name": "Remote" } ],
                    "contents": "APIs all day.",
                    "refs": { "landing_page": "https://muse.example/job" },
                    "publication_date": "2026-07-15T00:00:00Z"
                }
            ]
        });
        let postings = parse_muse(&payload);
        assert_eq!(postings.len(), 1);
        assert_eq!(postings[0].location.as_deref(), Some("New York, NY"));
        assert_eq!(postings[0].company.as_deref(), Some("Museco"));
    }

    #[test]
    fn arbeitnow_remote_only_filters_onsite_jobs() {
        let payload = serde_json::json!({
            "data": [
                {
                    "title": "Remote Rust Dev",
                    "company_name": "Fernwork",
                    "location": "Berlin",
                    "url": "https://arbeitnow.example/1",
                    "remote": true,
                    "created_at": 1755000000
                },
                {
                    "title": "Onsite Clerk",
                    "company_name": "Deskbound",
                    "location": "Hamburg",
                    "remote": false
                }
            ]
        });
        let all = parse_arbeitnow(&payload, false);
        assert_eq!(all.len(), 2);
        let remote = parse_arbeitnow(&payload, true);
        assert_eq!(remote.len(), 1);
        assert_eq!(remote[0].title, "Remote Rust Dev");
        assert!(remote[0].posted_at.is_some());
    }

    #[test]
    fn careers_html_extracts_listings() {
        let html = r#"
            <html><body><ul>
              <li class="job">
                <h2 class="title">Platform Engineer</h2>
                <span class="company">Acme</span>
                <span class="location">Berlin</span>
                <p class="description">Keep the platform alive.</p>
                <a href="https://acme.example/jobs/42">Apply</a>
              </li>
              <li class="job"><span class="company">Titleless Co</span></li>
            </ul></body></html>
        "#;
        let postings = parse_careers_html(html).unwrap();
        assert_eq!(postings.len(), 1);
        let p = &postings[0];
        assert_eq!(p.title, "Platform Engineer");
        assert_eq!(p.company.as_deref(), Some("Acme"));
        assert_eq!(p.url.as_deref(), Some("https://acme.example/jobs/42"));
    }

    #[test]
    fn keyword_screen_is_case_insensitive_and_open_for_empty_sets() {
        assert!(matches_keywords("Senior Rust Engineer", None, &["rust".into()]));
        assert!(matches_keywords(
            "Analyst",
            Some("experience with Rust required"),
            &["RUST".into()]
        ));
        assert!(!matches_keywords("Analyst", None, &["rust".into()]));
        assert!(matches_keywords("Anything", None, &[]));
        assert!(matches_keywords("Anything", None, &["  ".into()]));
    }

    fn query_with_locations(locations: Vec<String>) -> SearchQuery {
        SearchQuery {
            keywords: vec!["rust".into()],
            locations,
            remote: false,
            max_results: 50,
        }
    }

    #[test]
    fn jsearch_issues_one_search_per_location() {
        let query = query_with_locations(vec!["Berlin".into(), "remote".into(), "Munich".into()]);
        assert_eq!(
            jsearch_search_terms(&query),
            vec!["rust in Berlin", "rust in Munich"]
        );

        let unlocated = query_with_locations(Vec::new());
        assert_eq!(jsearch_search_terms(&unlocated), vec!["rust"]);

        let bare = SearchQuery {
            keywords: Vec::new(),
            ..unlocated
        };
        assert_eq!(jsearch_search_terms(&bare), vec!["jobs"]);
    }

    #[test]
    fn location_screen_matches_any_requested_location() {
        assert!(matches_locations(Some("Berlin, Germany"), &["berlin", "munich"]));
        assert!(matches_locations(Some("Munich"), &["berlin", "munich"]));
        assert!(!matches_locations(Some("Hamburg"), &["berlin", "munich"]));
        assert!(!matches_locations(None, &["berlin"]));
        assert!(matches_locations(None, &[]));
    }

    #[test]
    fn muse_page_with_only_screened_out_postings_is_not_upstream_empty() {
        let payload = serde_json::json!({
            "results": [
                { "name": "Pastry Chef", "contents": "Croissants." },
                { "name": "Sous Chef", "contents": "Knife skills." }
            ]
        });
        // Every posting fails the keyword screen, but the feed still has
        // pages; only a page that is empty upstream ends pagination.
        let screened = screen_muse_page(&payload, &query_with_locations(Vec::new()));
        assert!(screened.kept.is_empty());
        assert!(!screened.upstream_empty);

        let exhausted = serde_json::json!({ "results": [] });
        let screened = screen_muse_page(&exhausted, &query_with_locations(Vec::new()));
        assert!(screened.kept.is_empty());
        assert!(screened.upstream_empty);
    }

    #[test]
    fn clamp_respects_max_results() {
        let payload = serde_json::json!({
            "data": [
                { "title": "A", "remote": true },
                { "title": "B", "remote": true },
                { "title": "C", "remote": true }
            ]
        });
        let postings = clamp(parse_arbeitnow(&payload, false), 2);
        assert_eq!(postings.len(), 2);
    }
}
