// src/ingest/providers/pubmed.rs
// PubMed E-utilities client: esearch (JSON) for ids in the window, efetch
// (XML) for the article payloads. Request pacing follows NCBI guidance:
// ~3 req/s with an API key, ~1 req/s without.
//
// efetch XML carries mixed content (italics inside titles, labelled abstract
// sections), so it is parsed with an event reader rather than serde.

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use quick_xml::events::Event;
use quick_xml::Reader;

use crate::ingest::types::{FetchWindow, Item, Source, SourceProvider};
use crate::ingest::normalize_text;
use crate::retry::{check_status, RetryError, RetryPolicy};

const ESEARCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/esearch.fcgi";
const EFETCH_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils/efetch.fcgi";
const MAX_BATCH: usize = 100;
const JOURNAL_TERM: &str = r#""Nature"[Journal] OR "Cell"[Journal] OR "Science"[Journal]"#;

pub struct PubmedProvider {
    client: reqwest::Client,
    esearch_url: String,
    efetch_url: String,
    user_agent: String,
    api_key: Option<String>,
    retry: RetryPolicy,
}

#[derive(Debug, serde::Deserialize)]
struct EsearchReply {
    esearchresult: EsearchResult,
}

#[derive(Debug, Default, serde::Deserialize)]
struct EsearchResult {
    #[serde(default)]
    idlist: Vec<String>,
}

/// Accumulated fields for one `<PubmedArticle>`.
#[derive(Debug, Default, Clone)]
struct RawArticle {
    pmid: String,
    title: String,
    abstract_parts: Vec<String>,
    authors: Vec<String>,
    doi: Option<String>,
    article_date: PartialYmd,
    pub_date: PartialYmd,
}

#[derive(Debug, Default, Clone)]
struct PartialYmd {
    year: Option<String>,
    month: Option<String>,
    day: Option<String>,
}

impl PartialYmd {
    fn to_utc(&self) -> Option<DateTime<Utc>> {
        let year: i32 = self.year.as_deref()?.trim().parse().ok()?;
        let month = self.month.as_deref().map(parse_month).unwrap_or(1);
        let day: u32 = self
            .day
            .as_deref()
            .and_then(|d| d.trim().parse().ok())
            .unwrap_or(1);
        Utc.with_ymd_and_hms(year, month, day, 0, 0, 0).single()
    }
}

fn parse_month(value: &str) -> u32 {
    let v = value.trim();
    if let Ok(n) = v.parse::<u32>() {
        return n.clamp(1, 12);
    }
    let months = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    months
        .iter()
        .position(|m| v.to_ascii_lowercase().starts_with(m))
        .map(|i| i as u32 + 1)
        .unwrap_or(1)
}

/// Event-based efetch parser. Element names are tracked on a stack so text
/// inside presentation markup (`<i>`, `<sup>`) still lands in the right field,
/// and a malformed article drops only that article.
fn parse_efetch(xml: &str) -> Result<Vec<RawArticle>> {
    let mut reader = Reader::from_str(xml);

    let mut articles = Vec::new();
    let mut stack: Vec<String> = Vec::new();
    let mut current: Option<RawArticle> = None;
    let mut abstract_buf = String::new();
    let mut author_last = String::new();
    let mut author_fore = String::new();
    let mut author_collective = String::new();
    let mut id_type = String::new();
    let mut id_buf = String::new();

    loop {
        match reader.read_event() {
            Ok(Event::Start(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if name == "PubmedArticle" {
                    current = Some(RawArticle::default());
                } else if name == "AbstractText" {
                    abstract_buf.clear();
                } else if name == "Author" {
                    author_last.clear();
                    author_fore.clear();
                    author_collective.clear();
                } else if name == "ArticleId" {
                    id_type = e
                        .attributes()
                        .flatten()
                        .find(|a| a.key.as_ref() == b"IdType")
                        .map(|a| String::from_utf8_lossy(&a.value).to_string())
                        .unwrap_or_default();
                    id_buf.clear();
                }
                stack.push(name);
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.name().as_ref()).to_string();
                if let Some(article) = current.as_mut() {
                    match name.as_str() {
                        "AbstractText" => {
                            let part = abstract_buf.trim().to_string();
                            if !part.is_empty() {
                                article.abstract_parts.push(part);
                            }
                        }
                        "Author" => {
                            let composed = if !author_collective.is_empty() {
                                author_collective.clone()
                            } else {
                                [author_fore.as_str(), author_last.as_str()]
                                    .iter()
                                    .filter(|p| !p.is_empty())
                                    .cloned()
                                    .collect::<Vec<_>>()
                                    .join(" ")
                            };
                            if !composed.is_empty() {
                                article.authors.push(composed);
                            }
                        }
                        "ArticleId" => {
                            if id_type == "doi" && !id_buf.trim().is_empty() {
                                article.doi = Some(id_buf.trim().to_string());
                            }
                        }
                        "PubmedArticle" => {
                            if let Some(done) = current.take() {
                                articles.push(done);
                            }
                        }
                        _ => {}
                    }
                }
                while let Some(top) = stack.pop() {
                    if top == name {
                        break;
                    }
                }
            }
            Ok(Event::Text(t)) => {
                let text = t.unescape().unwrap_or_default().to_string();
                if text.is_empty() {
                    continue;
                }
                let in_elem = |target: &str| stack.iter().any(|s| s == target);
                if let Some(article) = current.as_mut() {
                    if in_elem("ArticleTitle") {
                        article.title.push_str(&text);
                    } else if in_elem("AbstractText") {
                        abstract_buf.push_str(&text);
                    } else if in_elem("PMID") && in_elem("MedlineCitation") && article.pmid.is_empty()
                    {
                        article.pmid.push_str(text.trim());
                    } else if in_elem("ArticleId") {
                        id_buf.push_str(&text);
                    } else if in_elem("Author") {
                        if in_elem("LastName") {
                            author_last.push_str(text.trim());
                        } else if in_elem("ForeName") {
                            author_fore.push_str(text.trim());
                        } else if in_elem("CollectiveName") {
                            author_collective.push_str(text.trim());
                        }
                    } else if in_elem("ArticleDate") {
                        fill_ymd(&mut article.article_date, &stack, &text);
                    } else if in_elem("PubDate") {
                        fill_ymd(&mut article.pub_date, &stack, &text);
                    }
                }
            }
            Ok(Event::Eof) => break,
            Ok(_) => {}
            Err(e) => return Err(e).context("parsing pubmed efetch xml"),
        }
    }
    Ok(articles)
}

fn fill_ymd(date: &mut PartialYmd, stack: &[String], text: &str) {
    let last = stack.last().map(String::as_str);
    match last {
        Some("Year") => date.year = Some(text.trim().to_string()),
        Some("Month") => date.month = Some(text.trim().to_string()),
        Some("Day") => date.day = Some(text.trim().to_string()),
        Some("MedlineDate") => {
            // e.g. "2024 Jan-Feb"; take the leading year.
            if date.year.is_none() {
                date.year = text
                    .trim()
                    .split_whitespace()
                    .next()
                    .filter(|y| y.chars().all(|c| c.is_ascii_digit()))
                    .map(String::from);
            }
        }
        _ => {}
    }
}

/// Pure raw-record → `Item` mapping; articles without a PMID or title drop.
fn normalize_article(raw: &RawArticle) -> Option<Item> {
    let title = normalize_text(&raw.title);
    if raw.pmid.is_empty() || title.is_empty() {
        return None;
    }
    let summary = if raw.abstract_parts.is_empty() {
        None
    } else {
        Some(normalize_text(&raw.abstract_parts.join(" ")))
    };
    let published_at = raw.article_date.to_utc().or_else(|| raw.pub_date.to_utc());
    let (id, url) = match &raw.doi {
        Some(doi) => (doi.to_lowercase(), format!("https://doi.org/{doi}")),
        None => (
            raw.pmid.to_lowercase(),
            format!("https://pubmed.ncbi.nlm.nih.gov/{}/", raw.pmid),
        ),
    };
    Some(Item {
        source: Source::Pubmed,
        id,
        title,
        summary,
        authors: raw.authors.clone(),
        journal: None,
        published_at,
        url,
        matched_keywords: vec![],
    })
}

impl PubmedProvider {
    pub fn new(user_agent: String, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            esearch_url: ESEARCH_URL.to_string(),
            efetch_url: EFETCH_URL.to_string(),
            user_agent,
            api_key,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_urls(mut self, esearch_url: String, efetch_url: String) -> Self {
        self.esearch_url = esearch_url;
        self.efetch_url = efetch_url;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    async fn pace(&self) {
        let delay = if self.api_key.is_some() { 110 } else { 340 };
        tokio::time::sleep(std::time::Duration::from_millis(delay)).await;
    }

    async fn request(&self, url: &str, params: &[(&str, String)]) -> Result<reqwest::Response> {
        self.retry
            .run("pubmed request", || async {
                let resp = self
                    .client
                    .get(url)
                    .query(params)
                    .header(reqwest::header::USER_AGENT, &self.user_agent)
                    .send()
                    .await
                    .map_err(RetryError::transient)?;
                check_status(resp)
            })
            .await
    }

    async fn search_ids(&self, window: FetchWindow) -> Result<Vec<String>> {
        let mut params: Vec<(&str, String)> = vec![
            ("db", "pubmed".to_string()),
            ("term", JOURNAL_TERM.to_string()),
            ("datetype", "edat".to_string()),
            ("mindate", window.start.format("%Y/%m/%d").to_string()),
            ("maxdate", window.end.format("%Y/%m/%d").to_string()),
            ("retmax", "200".to_string()),
            ("retmode", "json".to_string()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        let resp = self.request(&self.esearch_url, &params).await?;
        self.pace().await;
        let reply: EsearchReply = resp.json().await.context("pubmed esearch payload")?;
        Ok(reply.esearchresult.idlist)
    }

    async fn fetch_batch(&self, ids: &[String]) -> Result<Vec<RawArticle>> {
        let mut params: Vec<(&str, String)> = vec![
            ("db", "pubmed".to_string()),
            ("id", ids.join(",")),
            ("retmode", "xml".to_string()),
        ];
        if let Some(key) = &self.api_key {
            params.push(("api_key", key.clone()));
        }
        let resp = self.request(&self.efetch_url, &params).await?;
        self.pace().await;
        let body = resp.text().await.context("pubmed efetch body")?;
        parse_efetch(&body)
    }
}

#[async_trait]
impl SourceProvider for PubmedProvider {
    async fn fetch(&self, window: FetchWindow) -> Result<Vec<Item>> {
        let ids = self.search_ids(window).await?;
        tracing::debug!(source = "pubmed", ids = ids.len(), "esearch complete");
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut items = Vec::new();
        for batch in ids.chunks(MAX_BATCH) {
            let articles = self.fetch_batch(batch).await?;
            items.extend(
                articles
                    .iter()
                    .filter_map(normalize_article)
                    .filter(|item| window.admits(item.published_at)),
            );
        }
        Ok(items)
    }

    fn source(&self) -> Source {
        Source::Pubmed
    }
}

// Fixture-facing hooks for integration tests.
pub fn parse_efetch_fixture(xml: &str) -> Result<Vec<Item>> {
    Ok(parse_efetch(xml)?
        .iter()
        .filter_map(normalize_article)
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"<?xml version="1.0" ?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation Status="Publisher">
      <PMID Version="1">38012345</PMID>
      <Article PubModel="Print-Electronic">
        <ArticleTitle>ISG15 governs <i>mitochondrial</i> function</ArticleTitle>
        <Abstract>
          <AbstractText Label="BACKGROUND">Interferon-stimulated gene 15.</AbstractText>
          <AbstractText Label="RESULTS">Conjugation alters metabolism.</AbstractText>
        </Abstract>
        <AuthorList>
          <Author><LastName>Doe</LastName><ForeName>Jane</ForeName></Author>
          <Author><CollectiveName>The ISG Consortium</CollectiveName></Author>
        </AuthorList>
        <ArticleDate DateType="Electronic">
          <Year>2024</Year><Month>02</Month><Day>10</Day>
        </ArticleDate>
      </Article>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList>
        <ArticleId IdType="pubmed">38012345</ArticleId>
        <ArticleId IdType="doi">10.1000/J.TEST.2024.01</ArticleId>
      </ArticleIdList>
    </PubmedData>
  </PubmedArticle>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">38099999</PMID>
      <Article>
        <ArticleTitle></ArticleTitle>
      </Article>
    </MedlineCitation>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn efetch_parse_handles_mixed_content_and_doi() {
        let articles = parse_efetch(SAMPLE).unwrap();
        assert_eq!(articles.len(), 2);
        let items: Vec<Item> = articles.iter().filter_map(normalize_article).collect();
        // The second article has no title and is dropped.
        assert_eq!(items.len(), 1);
        let item = &items[0];
        assert_eq!(item.id, "10.1000/j.test.2024.01");
        assert_eq!(item.title, "ISG15 governs mitochondrial function");
        assert_eq!(
            item.summary.as_deref(),
            Some("Interferon-stimulated gene 15. Conjugation alters metabolism.")
        );
        assert_eq!(item.authors, vec!["Jane Doe", "The ISG Consortium"]);
        assert_eq!(
            item.published_at.unwrap(),
            Utc.with_ymd_and_hms(2024, 2, 10, 0, 0, 0).unwrap()
        );
        assert_eq!(item.url, "https://doi.org/10.1000/J.TEST.2024.01");
    }

    #[test]
    fn parse_is_deterministic() {
        let a = parse_efetch_fixture(SAMPLE).unwrap();
        let b = parse_efetch_fixture(SAMPLE).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn month_names_parse() {
        assert_eq!(parse_month("Feb"), 2);
        assert_eq!(parse_month("11"), 11);
        assert_eq!(parse_month("bogus"), 1);
    }

    #[test]
    fn pmid_is_id_when_doi_missing() {
        let raw = RawArticle {
            pmid: "123".into(),
            title: "A title".into(),
            ..Default::default()
        };
        let item = normalize_article(&raw).unwrap();
        assert_eq!(item.id, "123");
        assert_eq!(item.url, "https://pubmed.ncbi.nlm.nih.gov/123/");
        assert!(item.published_at.is_none());
    }
}
