// src/ingest/types.rs
use anyhow::{bail, Result};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a configured publication source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Source {
    Crossref,
    Pubmed,
    Rss,
}

impl Source {
    pub const ALL: [Source; 3] = [Source::Crossref, Source::Pubmed, Source::Rss];

    pub fn as_str(&self) -> &'static str {
        match self {
            Source::Crossref => "crossref",
            Source::Pubmed => "pubmed",
            Source::Rss => "rss",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "crossref" => Ok(Source::Crossref),
            "pubmed" => Ok(Source::Pubmed),
            "rss" => Ok(Source::Rss),
            other => bail!("unknown source '{other}'"),
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Trailing time interval within which newly published items are eligible.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FetchWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl FetchWindow {
    pub fn trailing(hours: u32) -> Self {
        let end = Utc::now();
        Self {
            start: end - Duration::hours(i64::from(hours)),
            end,
        }
    }

    /// Items with an unknown publication date are kept; sources often
    /// report entries before a final date is assigned. Dated items must fall
    /// inside `[start, end]`; post-dated entries are just as out-of-window as
    /// stale ones.
    pub fn admits(&self, published_at: Option<DateTime<Utc>>) -> bool {
        match published_at {
            Some(ts) => ts >= self.start && ts <= self.end,
            None => true,
        }
    }
}

/// Canonical unit flowing through the pipeline. Created by a source adapter,
/// enriched by the keyword filter, read-only afterwards. `id` is
/// source-qualified and stable (lowercased DOI, feed GUID, or a content hash).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Item {
    pub source: Source,
    pub id: String,
    pub title: String,
    pub summary: Option<String>,
    pub authors: Vec<String>,
    pub journal: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub url: String,
    #[serde(default)]
    pub matched_keywords: Vec<String>,
}

/// One interface, three variants (Crossref, PubMed, RSS), selected by
/// configuration-driven construction. Adapters own their auth and pacing
/// policy and must not share mutable state.
#[async_trait::async_trait]
pub trait SourceProvider: Send + Sync {
    /// Fetch records believed to fall inside `window`. Retries transient
    /// failures internally; an `Err` here means retries were exhausted and
    /// the pipeline continues with zero items from this source.
    async fn fetch(&self, window: FetchWindow) -> Result<Vec<Item>>;

    fn source(&self) -> Source;
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn window_admits_only_the_closed_interval() {
        let window = FetchWindow {
            start: Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap(),
            end: Utc.with_ymd_and_hms(2024, 5, 2, 0, 0, 0).unwrap(),
        };
        let inside = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let stale = Utc.with_ymd_and_hms(2024, 4, 30, 0, 0, 0).unwrap();
        let post_dated = Utc.with_ymd_and_hms(2024, 5, 9, 0, 0, 0).unwrap();

        assert!(window.admits(Some(inside)));
        assert!(window.admits(Some(window.start)));
        assert!(window.admits(Some(window.end)));
        assert!(!window.admits(Some(stale)));
        assert!(!window.admits(Some(post_dated)));
        assert!(window.admits(None));
    }
}
