// tests/providers_pubmed.rs
// efetch XML parsing against a captured E-utilities fixture.

use chrono::{TimeZone, Utc};

use paper_watcher::ingest::providers::pubmed::parse_efetch_fixture;
use paper_watcher::Source;

const EFETCH: &str = include_str!("fixtures/pubmed_efetch.xml");

#[test]
fn fixture_parses_both_articles() {
    let items = parse_efetch_fixture(EFETCH).unwrap();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.source == Source::Pubmed));
}

#[test]
fn mixed_content_title_and_labelled_abstract_flatten() {
    let items = parse_efetch_fixture(EFETCH).unwrap();
    let full = &items[0];

    assert_eq!(full.id, "10.1038/s41586-024-1000");
    assert_eq!(full.url, "https://doi.org/10.1038/s41586-024-1000");
    assert_eq!(
        full.title,
        "Type I interferon drives ISG15 dependent responses"
    );
    assert_eq!(
        full.summary.as_deref(),
        Some("Interferon signalling is rapid. ISG15 conjugation was required.")
    );
    assert_eq!(full.authors, vec!["Ana Rivera", "Wei Chen"]);
    // Electronic ArticleDate wins over the journal-issue PubDate.
    assert_eq!(
        full.published_at.unwrap(),
        Utc.with_ymd_and_hms(2024, 5, 1, 0, 0, 0).unwrap()
    );
}

#[test]
fn medline_date_and_missing_doi_degrade_gracefully() {
    let items = parse_efetch_fixture(EFETCH).unwrap();
    let minimal = &items[1];

    assert_eq!(minimal.id, "38500002");
    assert_eq!(minimal.url, "https://pubmed.ncbi.nlm.nih.gov/38500002/");
    assert!(minimal.summary.is_none());
    assert!(minimal.authors.is_empty());
    // "2024 Apr-May" keeps only the year; month and day default to 1.
    assert_eq!(
        minimal.published_at.unwrap(),
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    );
}
