// src/ingest/providers/crossref.rs
// Crossref works API client. One filtered request per target venue, polite
// `mailto` identification, Retry-After honored on rate limiting.

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use serde::Deserialize;

use crate::ingest::types::{FetchWindow, Item, Source, SourceProvider};
use crate::ingest::{fallback_id, normalize_text};
use crate::retry::{RetryError, RetryPolicy};

const CROSSREF_URL: &str = "https://api.crossref.org/works";

/// Nature, Cell, Science and their family journals.
pub const DEFAULT_VENUES: &[&str] = &[
    // Nature family
    "Nature",
    "Nature Medicine",
    "Nature Immunology",
    "Nature Biotechnology",
    "Nature Genetics",
    "Nature Cancer",
    "Nature Communications",
    "Nature Cell Biology",
    "Nature Chemical Biology",
    // Cell family
    "Cell",
    "Cell Reports",
    "Immunity",
    "Cancer Cell",
    "Molecular Cell",
    "Cell Genomics",
    "Trends in Cancer",
    "Trends in Genetics",
    "Trends in Immunology",
    // Science family
    "Science",
    "Science Immunology",
    "Science Signaling",
    "Science Advances",
    "Science Translational Medicine",
];

pub struct CrossrefProvider {
    client: reqwest::Client,
    base_url: String,
    venues: Vec<String>,
    user_agent: String,
    contact_email: Option<String>,
    retry: RetryPolicy,
}

#[derive(Debug, Deserialize)]
struct Reply {
    message: Message,
}

#[derive(Debug, Default, Deserialize)]
struct Message {
    #[serde(default)]
    items: Vec<Work>,
}

#[derive(Debug, Deserialize)]
struct Work {
    #[serde(rename = "DOI")]
    doi: Option<String>,
    #[serde(default)]
    title: Vec<String>,
    #[serde(rename = "abstract")]
    abstract_raw: Option<String>,
    #[serde(rename = "URL")]
    url: Option<String>,
    #[serde(default)]
    author: Vec<WorkAuthor>,
    #[serde(rename = "published-print")]
    published_print: Option<PartialDate>,
    #[serde(rename = "published-online")]
    published_online: Option<PartialDate>,
    issued: Option<PartialDate>,
    created: Option<PartialDate>,
}

#[derive(Debug, Deserialize)]
struct WorkAuthor {
    given: Option<String>,
    family: Option<String>,
}

/// Crossref dates come as `date-parts` (possibly year-only, possibly with
/// nulls) or an RFC 3339 `date-time`.
#[derive(Debug, Default, Deserialize)]
struct PartialDate {
    #[serde(rename = "date-parts", default)]
    date_parts: Vec<Vec<Option<i64>>>,
    #[serde(rename = "date-time")]
    date_time: Option<String>,
}

fn partial_date_to_utc(date: &PartialDate) -> Option<DateTime<Utc>> {
    if let Some(parts) = date.date_parts.first() {
        if let Some(year) = parts.first().copied().flatten() {
            let month = parts.get(1).copied().flatten().unwrap_or(1);
            let day = parts.get(2).copied().flatten().unwrap_or(1);
            if let Some(dt) = Utc
                .with_ymd_and_hms(year as i32, month as u32, day as u32, 0, 0, 0)
                .single()
            {
                return Some(dt);
            }
        }
    }
    date.date_time
        .as_deref()
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn work_date(work: &Work) -> Option<DateTime<Utc>> {
    [
        &work.published_print,
        &work.published_online,
        &work.issued,
        &work.created,
    ]
    .into_iter()
    .flatten()
    .find_map(partial_date_to_utc)
}

/// Pure raw-record → `Item` mapping. Records missing a usable title or any
/// resolvable link are dropped.
fn normalize_work(work: &Work, venue: &str) -> Option<Item> {
    let title = normalize_text(work.title.first()?);
    if title.is_empty() {
        return None;
    }
    let published_at = work_date(work);
    let summary = work
        .abstract_raw
        .as_deref()
        .map(normalize_text)
        .filter(|s| !s.is_empty());
    let authors: Vec<String> = work
        .author
        .iter()
        .filter_map(|a| {
            let parts: Vec<&str> = [a.given.as_deref(), a.family.as_deref()]
                .into_iter()
                .flatten()
                .collect();
            (!parts.is_empty()).then(|| parts.join(" "))
        })
        .collect();

    let (id, url) = match &work.doi {
        Some(doi) => (
            doi.to_lowercase(),
            work.url
                .clone()
                .unwrap_or_else(|| format!("https://doi.org/{doi}")),
        ),
        None => {
            let date = published_at.map(|d| d.date_naive().to_string());
            (
                fallback_id(&title, Some(venue), date.as_deref()),
                work.url.clone()?,
            )
        }
    };

    Some(Item {
        source: Source::Crossref,
        id,
        title,
        summary,
        authors,
        journal: Some(venue.to_string()),
        published_at,
        url,
        matched_keywords: vec![],
    })
}

impl CrossrefProvider {
    pub fn new(user_agent: String, contact_email: Option<String>, venues: Option<Vec<String>>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: CROSSREF_URL.to_string(),
            venues: venues
                .unwrap_or_else(|| DEFAULT_VENUES.iter().map(|v| v.to_string()).collect()),
            user_agent,
            contact_email,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_venue(&self, venue: &str, window: FetchWindow) -> Result<Vec<Item>> {
        let filter = format!(
            "container-title:{venue},from-pub-date:{},until-pub-date:{}",
            window.start.date_naive(),
            window.end.date_naive()
        );
        let mut params: Vec<(&str, String)> = vec![
            ("filter", filter),
            ("rows", "200".to_string()),
            ("sort", "published".to_string()),
            ("order", "desc".to_string()),
            (
                "select",
                "DOI,title,abstract,container-title,issued,created,published-print,published-online,URL,author".to_string(),
            ),
        ];
        if let Some(email) = &self.contact_email {
            params.push(("mailto", email.clone()));
        }

        let reply: Reply = self
            .retry
            .run("crossref request", || async {
                let resp = self
                    .client
                    .get(&self.base_url)
                    .query(&params)
                    .header(reqwest::header::USER_AGENT, &self.user_agent)
                    .header(reqwest::header::ACCEPT, "application/json")
                    .send()
                    .await
                    .map_err(RetryError::transient)?;

                if resp.status().as_u16() == 429 {
                    // Honor Retry-After before the backoff kicks in.
                    let delay = resp
                        .headers()
                        .get(reqwest::header::RETRY_AFTER)
                        .and_then(|v| v.to_str().ok())
                        .and_then(|v| v.parse::<u64>().ok())
                        .unwrap_or(5);
                    tracing::warn!(source = "crossref", delay_secs = delay, "rate limited");
                    tokio::time::sleep(std::time::Duration::from_secs(delay)).await;
                    return Err(RetryError::transient(anyhow!("crossref rate limited")));
                }
                let resp = crate::retry::check_status(resp)?;
                resp.json::<Reply>().await.map_err(RetryError::transient)
            })
            .await
            .with_context(|| format!("crossref venue '{venue}'"))?;

        tracing::debug!(
            source = "crossref",
            venue,
            returned = reply.message.items.len(),
            "venue fetched"
        );

        Ok(reply
            .message
            .items
            .iter()
            .filter_map(|work| normalize_work(work, venue))
            .filter(|item| window.admits(item.published_at))
            .collect())
    }
}

#[async_trait]
impl SourceProvider for CrossrefProvider {
    async fn fetch(&self, window: FetchWindow) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        let mut failures = 0usize;
        for venue in &self.venues {
            match self.fetch_venue(venue, window).await {
                Ok(mut fetched) => items.append(&mut fetched),
                Err(e) => {
                    failures += 1;
                    tracing::warn!(stage = "fetch", source = "crossref", venue = %venue, error = ?e, "venue failed");
                }
            }
        }
        if failures == self.venues.len() {
            return Err(anyhow!("all {} crossref venues failed", failures));
        }
        Ok(items)
    }

    fn source(&self) -> Source {
        Source::Crossref
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn work_json(doi: Option<&str>) -> Work {
        let doi_field = doi
            .map(|d| format!(r#""DOI": "{d}","#))
            .unwrap_or_default();
        serde_json::from_str(&format!(
            r#"{{
                {doi_field}
                "title": ["ISG15 <i>conjugation</i> in cancer"],
                "abstract": "<jats:p>Ubiquitin-like signalling.</jats:p>",
                "URL": "https://example.test/work",
                "author": [{{"given": "Ada", "family": "Lovelace"}}, {{"family": "Curie"}}],
                "issued": {{"date-parts": [[2024, 3, 5]]}}
            }}"#
        ))
        .unwrap()
    }

    #[test]
    fn normalize_work_lowercases_doi_and_strips_markup() {
        let item = normalize_work(&work_json(Some("10.1000/ABC.5")), "Nature").unwrap();
        assert_eq!(item.id, "10.1000/abc.5");
        assert_eq!(item.title, "ISG15 conjugation in cancer");
        assert_eq!(item.summary.as_deref(), Some("Ubiquitin-like signalling."));
        assert_eq!(item.authors, vec!["Ada Lovelace", "Curie"]);
        assert_eq!(
            item.published_at.unwrap(),
            Utc.with_ymd_and_hms(2024, 3, 5, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn missing_doi_falls_back_to_content_hash() {
        let a = normalize_work(&work_json(None), "Nature").unwrap();
        let b = normalize_work(&work_json(None), "Nature").unwrap();
        assert_eq!(a.id, b.id); // deterministic
        assert_eq!(a.id.len(), 64);
    }

    #[test]
    fn year_only_date_parts_resolve_to_january_first() {
        let date: PartialDate = serde_json::from_str(r#"{"date-parts": [[2023]]}"#).unwrap();
        assert_eq!(
            partial_date_to_utc(&date).unwrap(),
            Utc.with_ymd_and_hms(2023, 1, 1, 0, 0, 0).unwrap()
        );
    }

    #[test]
    fn null_date_parts_fall_back_to_date_time() {
        let date: PartialDate = serde_json::from_str(
            r#"{"date-parts": [[null]], "date-time": "2024-06-01T10:00:00Z"}"#,
        )
        .unwrap();
        assert!(partial_date_to_utc(&date).is_some());
    }
}
