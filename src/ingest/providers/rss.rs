// src/ingest/providers/rss.rs
// Journal table-of-contents feeds, the fallback when the APIs lag. Covers the
// flagship titles only; the APIs carry the family journals.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use quick_xml::de::from_str;
use serde::Deserialize;
use time::{format_description::well_known::Rfc2822, OffsetDateTime, UtcOffset};

use crate::ingest::types::{FetchWindow, Item, Source, SourceProvider};
use crate::ingest::{fallback_id, normalize_text};
use crate::retry::{check_status, RetryError, RetryPolicy};

pub const DEFAULT_FEEDS: &[(&str, &str)] = &[
    ("Nature", "https://www.nature.com/nature.rss"),
    ("Cell", "https://www.cell.com/cell/current.rss"),
    (
        "Science",
        "https://www.science.org/action/showFeed?type=etoc&feed=rss&jc=science",
    ),
];

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    #[serde(rename = "item", default)]
    items: Vec<FeedEntry>,
}

#[derive(Debug, Deserialize)]
struct FeedEntry {
    title: Option<String>,
    link: Option<String>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    /// Dublin Core date, RFC 3339; some etoc feeds use it instead of pubDate.
    /// quick-xml's serde deserializer strips namespace prefixes, so `<dc:date>`
    /// is seen as `date`.
    #[serde(rename = "date")]
    dc_date: Option<String>,
    description: Option<String>,
    guid: Option<Guid>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$text")]
    value: Option<String>,
}

fn parse_rfc2822_utc(ts: &str) -> Option<DateTime<Utc>> {
    OffsetDateTime::parse(ts, &Rfc2822)
        .ok()
        .map(|dt| dt.to_offset(UtcOffset::UTC))
        .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.unix_timestamp(), 0))
}

fn entry_date(entry: &FeedEntry) -> Option<DateTime<Utc>> {
    if let Some(ts) = entry.pub_date.as_deref() {
        if let Some(dt) = parse_rfc2822_utc(ts) {
            return Some(dt);
        }
    }
    entry
        .dc_date
        .as_deref()
        .and_then(|ts| DateTime::parse_from_rfc3339(ts).ok())
        .map(|dt| dt.with_timezone(&Utc))
}

fn doi_from_identifier(identifier: &str) -> Option<String> {
    identifier
        .split_once("doi.org/")
        .map(|(_, doi)| doi.trim_end_matches('/').to_string())
        .filter(|doi| !doi.is_empty())
}

/// Pure feed-entry → `Item` mapping. Entries without a title drop; the id is
/// the DOI when one can be read off the guid or link, then the guid, then the
/// link, then a content hash.
fn normalize_entry(entry: &FeedEntry, journal: &str) -> Option<Item> {
    let title = normalize_text(entry.title.as_deref()?);
    if title.is_empty() {
        return None;
    }
    let published_at = entry_date(entry);
    let guid = entry
        .guid
        .as_ref()
        .and_then(|g| g.value.as_deref())
        .filter(|v| !v.trim().is_empty());
    let link = entry.link.as_deref().filter(|v| !v.trim().is_empty());

    let identifier = guid.or(link);
    let doi = identifier.and_then(doi_from_identifier);
    let id = match (&doi, identifier) {
        (Some(doi), _) => doi.to_lowercase(),
        (None, Some(ident)) => ident.to_string(),
        (None, None) => {
            let date = published_at.map(|d| d.date_naive().to_string());
            fallback_id(&title, Some(journal), date.as_deref())
        }
    };
    let url = link
        .map(String::from)
        .or_else(|| doi.as_ref().map(|d| format!("https://doi.org/{d}")))
        .or_else(|| identifier.map(String::from))?;

    let summary = entry
        .description
        .as_deref()
        .map(normalize_text)
        .filter(|s| !s.is_empty());

    Some(Item {
        source: Source::Rss,
        id,
        title,
        summary,
        authors: vec![],
        journal: Some(journal.to_string()),
        published_at,
        url,
        matched_keywords: vec![],
    })
}

pub struct RssProvider {
    client: reqwest::Client,
    feeds: Vec<(String, String)>,
    user_agent: String,
    retry: RetryPolicy,
}

impl RssProvider {
    pub fn new(user_agent: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            feeds: DEFAULT_FEEDS
                .iter()
                .map(|(journal, url)| (journal.to_string(), url.to_string()))
                .collect(),
            user_agent,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_feeds(mut self, feeds: Vec<(String, String)>) -> Self {
        self.feeds = feeds;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Parse one feed document into items; exposed for fixture tests.
    pub fn parse_feed(journal: &str, xml: &str) -> Result<Vec<Item>> {
        let rss: Rss = from_str(xml).with_context(|| format!("parsing {journal} rss xml"))?;
        Ok(rss
            .channel
            .items
            .iter()
            .filter_map(|entry| normalize_entry(entry, journal))
            .collect())
    }

    async fn download(&self, journal: &str, url: &str) -> Result<String> {
        self.retry
            .run("rss download", || async {
                let resp = self
                    .client
                    .get(url)
                    .header(reqwest::header::USER_AGENT, &self.user_agent)
                    .send()
                    .await
                    .map_err(RetryError::transient)?;
                let resp = check_status(resp)?;
                resp.text().await.map_err(RetryError::transient)
            })
            .await
            .with_context(|| format!("rss feed '{journal}'"))
    }
}

#[async_trait]
impl SourceProvider for RssProvider {
    async fn fetch(&self, window: FetchWindow) -> Result<Vec<Item>> {
        let mut items = Vec::new();
        let mut failures = 0usize;
        for (journal, url) in &self.feeds {
            let body = match self.download(journal, url).await {
                Ok(body) => body,
                Err(e) => {
                    failures += 1;
                    tracing::warn!(stage = "fetch", source = "rss", journal = %journal, error = ?e, "feed download failed");
                    continue;
                }
            };
            match Self::parse_feed(journal, &body) {
                Ok(parsed) => {
                    items.extend(
                        parsed
                            .into_iter()
                            .filter(|item| window.admits(item.published_at)),
                    );
                }
                Err(e) => {
                    failures += 1;
                    tracing::warn!(stage = "fetch", source = "rss", journal = %journal, error = ?e, "feed parse failed");
                }
            }
        }
        if failures == self.feeds.len() {
            anyhow::bail!("all {} feeds failed", failures);
        }
        Ok(items)
    }

    fn source(&self) -> Source {
        Source::Rss
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn doi_extraction_from_guid() {
        assert_eq!(
            doi_from_identifier("https://doi.org/10.1038/s41586-024-1").as_deref(),
            Some("10.1038/s41586-024-1")
        );
        assert!(doi_from_identifier("https://example.test/a").is_none());
    }

    #[test]
    fn rfc2822_dates_parse_to_utc() {
        let dt = parse_rfc2822_utc("Tue, 02 Apr 2024 09:30:00 +0200").unwrap();
        assert_eq!(dt.to_rfc3339(), "2024-04-02T07:30:00+00:00");
    }

    #[test]
    fn entry_identifier_fallback_chain() {
        let entry = FeedEntry {
            title: Some("A headline".into()),
            link: None,
            pub_date: None,
            dc_date: None,
            description: None,
            guid: None,
        };
        // No link at all: nothing to point the reader at, entry drops.
        assert!(normalize_entry(&entry, "Nature").is_none());

        let with_link = FeedEntry {
            link: Some("https://example.test/article".into()),
            ..entry
        };
        let item = normalize_entry(&with_link, "Nature").unwrap();
        assert_eq!(item.id, "https://example.test/article");
    }
}
