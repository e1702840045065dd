// src/ingest/mod.rs
pub mod providers;
pub mod types;

use std::sync::Arc;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_histogram, gauge};
use once_cell::sync::OnceCell;
use sha2::{Digest, Sha256};

use crate::ingest::types::{FetchWindow, Item, Source, SourceProvider};

/// One-time metrics registration (so series show up if the host installs a recorder).
fn ensure_metrics_described() {
    static ONCE: OnceCell<()> = OnceCell::new();
    ONCE.get_or_init(|| {
        describe_counter!("fetch_items_total", "Items parsed from source adapters.");
        describe_counter!("fetch_source_errors_total", "Adapter fetch/parse errors.");
        describe_counter!(
            "fetch_source_timeouts_total",
            "Adapters cut off by the per-source deadline."
        );
        describe_histogram!("fetch_parse_ms", "Adapter parse time in milliseconds.");
    });
}

/// Normalize text: decode HTML entities, strip tags, collapse whitespace.
/// Deterministic; the same raw text always yields the same output.
pub fn normalize_text(s: &str) -> String {
    // 1) HTML entity decode
    let mut out = html_escape::decode_html_entities(s).to_string();

    // 2) Strip HTML tags
    static RE_TAGS: OnceCell<regex::Regex> = OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    // 3) Normalize “ ” ‘ ’ « » to ASCII quotes
    out = out
        .replace(['\u{201C}', '\u{201D}', '\u{00AB}', '\u{00BB}'], "\"")
        .replace(['\u{2018}', '\u{2019}'], "'");

    // 4) Collapse whitespace
    static RE_WS: OnceCell<regex::Regex> = OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Stable identifier for records that carry no persistent identifier:
/// sha256 over normalized title, venue, and date.
pub fn fallback_id(title: &str, journal: Option<&str>, date: Option<&str>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(title).to_lowercase());
    hasher.update("|");
    hasher.update(journal.unwrap_or_default());
    hasher.update("|");
    hasher.update(date.unwrap_or_default());
    format!("{:x}", hasher.finalize())
}

/// Fetch from all adapters concurrently, one task per source, each bounded by
/// `per_source_timeout`. A failed or timed-out adapter contributes zero items;
/// partial source failure never aborts the run. The merged vec preserves
/// source-evaluation order (the order of `providers`), which later decides
/// dedup precedence.
pub async fn fetch_all(
    providers: &[Arc<dyn SourceProvider>],
    window: FetchWindow,
    per_source_timeout: Duration,
) -> (Vec<Item>, Vec<(Source, usize)>) {
    ensure_metrics_described();

    let mut handles = Vec::with_capacity(providers.len());
    for p in providers {
        let p = Arc::clone(p);
        handles.push((
            p.source(),
            tokio::spawn(
                async move { tokio::time::timeout(per_source_timeout, p.fetch(window)).await },
            ),
        ));
    }

    let mut items = Vec::new();
    let mut counts = Vec::with_capacity(handles.len());
    for (source, handle) in handles {
        match handle.await {
            Ok(Ok(Ok(mut fetched))) => {
                counter!("fetch_items_total").increment(fetched.len() as u64);
                tracing::info!(source = %source, count = fetched.len(), "source fetch complete");
                counts.push((source, fetched.len()));
                items.append(&mut fetched);
            }
            Ok(Ok(Err(e))) => {
                tracing::warn!(stage = "fetch", source = %source, error = ?e, "source fetch failed");
                counter!("fetch_source_errors_total").increment(1);
                counts.push((source, 0));
            }
            Ok(Err(_elapsed)) => {
                tracing::warn!(
                    stage = "fetch",
                    source = %source,
                    timeout_secs = per_source_timeout.as_secs(),
                    "source fetch timed out"
                );
                counter!("fetch_source_timeouts_total").increment(1);
                counts.push((source, 0));
            }
            Err(e) => {
                tracing::warn!(stage = "fetch", source = %source, error = ?e, "source task panicked");
                counter!("fetch_source_errors_total").increment(1);
                counts.push((source, 0));
            }
        }
    }

    gauge!("fetch_last_run_ts").set(chrono::Utc::now().timestamp() as f64);
    (items, counts)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_text_strips_tags_and_entities() {
        let s = "<p>Type&nbsp;I <b>interferon</b> &ldquo;response&rdquo;</p>";
        assert_eq!(normalize_text(s), r#"Type I interferon "response""#);
    }

    #[test]
    fn normalize_text_folds_whitespace() {
        assert_eq!(normalize_text("A\u{00A0}\n\tB   C"), "A B C");
    }

    #[test]
    fn fallback_id_is_deterministic_and_title_insensitive_to_case() {
        let a = fallback_id("ISG15 in cancer", Some("Nature"), Some("2024-01-02"));
        let b = fallback_id("isg15  in\tcancer", Some("Nature"), Some("2024-01-02"));
        let c = fallback_id("ISG15 in cancer", Some("Cell"), Some("2024-01-02"));
        assert_eq!(a, b);
        assert_ne!(a, c);
    }
}
