// src/notify/mod.rs
// Digest rendering and dispatch. One message per run, grouped by source,
// matched keywords wrapped in [brackets], header fields sanitized.

pub mod send_api;
pub mod smtp;

use anyhow::Result;
use regex::Regex;

use crate::filter::FilterStats;
use crate::ingest::types::{FetchWindow, Item, Source};
use crate::runtime::RuntimeOptions;

/// Fully rendered digest, ready for any transport.
#[derive(Debug, Clone, PartialEq)]
pub struct Digest {
    pub subject: String,
    pub body: String,
    pub sender: String,
    pub recipients: Vec<String>,
    pub reply_to: Vec<String>,
}

/// Delivery mechanism seam: managed send API or raw SMTP, selected by
/// configuration. A transport's `send` failing (after its own retries) is a
/// hard failure for the run.
#[async_trait::async_trait]
pub trait DigestTransport: Send + Sync {
    async fn send(&self, digest: &Digest) -> Result<()>;
    fn name(&self) -> &'static str;
}

/// Strip line-break characters from header-like fields (subject, addresses)
/// so configured or upstream content cannot inject extra headers.
pub fn sanitize_header(value: &str) -> String {
    value.replace(['\r', '\n'], " ").trim().to_string()
}

/// Wrap literal keyword occurrences with square brackets for emphasis.
/// Best-effort over the raw text; longer keywords win overlaps.
pub fn highlight(text: &str, keywords: &[String]) -> String {
    if text.is_empty() || keywords.is_empty() {
        return text.to_string();
    }
    let mut sorted: Vec<&String> = keywords
        .iter()
        .collect::<std::collections::BTreeSet<_>>()
        .into_iter()
        .collect();
    sorted.sort_by_key(|k| std::cmp::Reverse(k.len()));
    let pattern = format!(
        "(?i)({})",
        sorted
            .iter()
            .map(|k| regex::escape(k))
            .collect::<Vec<_>>()
            .join("|")
    );
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(text, "[$1]").to_string(),
        Err(_) => text.to_string(),
    }
}

/// Compact author line: at most `max_names` names plus a remainder count.
pub fn summarize_authors(authors: &[String], max_names: usize) -> String {
    let cleaned: Vec<&String> = authors.iter().filter(|a| !a.is_empty()).collect();
    if cleaned.is_empty() {
        return "Unknown".to_string();
    }
    if cleaned.len() <= max_names {
        return cleaned
            .iter()
            .map(|s| s.as_str())
            .collect::<Vec<_>>()
            .join(", ");
    }
    let shown: Vec<&str> = cleaned[..max_names].iter().map(|s| s.as_str()).collect();
    format!("{}, and {} more", shown.join(", "), cleaned.len() - max_names)
}

/// Inputs for rendering beyond the items themselves.
pub struct DigestContext<'a> {
    pub app_name: &'a str,
    pub subject_prefix: &'a str,
    pub sender: &'a str,
    pub recipients: &'a [String],
    pub reply_to: &'a [String],
    pub window: FetchWindow,
    pub options: &'a RuntimeOptions,
    pub fetch_counts: &'a [(Source, usize)],
    pub stats: FilterStats,
}

/// Render the single per-run digest. `groups` holds the new items grouped by
/// source in source-evaluation order, newest first within a group; every item
/// appears exactly once.
pub fn render_digest(groups: &[(Source, Vec<Item>)], ctx: &DigestContext<'_>) -> Digest {
    let total: usize = groups.iter().map(|(_, items)| items.len()).sum();
    let source_list = ctx
        .options
        .sources
        .iter()
        .map(Source::as_str)
        .collect::<Vec<_>>()
        .join(",");

    let subject = sanitize_header(&format!(
        "{} {} new papers (sources={}, window={}h)",
        ctx.subject_prefix, total, source_list, ctx.options.window_hours
    ));

    let mut lines: Vec<String> = vec![
        format!(
            "Search window: {} ~ {}",
            ctx.window.start.to_rfc3339(),
            ctx.window.end.to_rfc3339()
        ),
        format!("Sources: {source_list}"),
        format!(
            "Match mode: {} | {} keywords",
            ctx.options.match_mode.as_str(),
            ctx.options.keywords.len()
        ),
        String::new(),
    ];

    if total == 0 {
        lines.push("No new results matched in this window.".to_string());
    } else {
        lines.push(format!("Found {total} new papers."));
    }

    for (source, items) in groups {
        if items.is_empty() {
            continue;
        }
        lines.push(String::new());
        lines.push(format!(
            "[{}] {} items",
            source.as_str().to_uppercase(),
            items.len()
        ));
        for item in items {
            lines.push(format!("- {}", highlight(&item.title, &item.matched_keywords)));
            lines.push(format!("  Authors: {}", summarize_authors(&item.authors, 5)));
            if let Some(journal) = &item.journal {
                lines.push(format!("  Journal: {journal}"));
            }
            if let Some(published) = item.published_at {
                lines.push(format!("  Published: {}", published.to_rfc3339()));
            }
            if !item.matched_keywords.is_empty() {
                lines.push(format!("  Matched: {}", item.matched_keywords.join(", ")));
            }
            lines.push(format!("  Link: {}", item.url));
            if let Some(summary) = &item.summary {
                lines.push(format!(
                    "  Summary: {}",
                    highlight(&clip(summary, 600), &item.matched_keywords)
                ));
            }
        }
    }

    lines.push(String::new());
    lines.push("[Run summary]".to_string());
    let fetch_line = ctx
        .fetch_counts
        .iter()
        .map(|(source, count)| format!("{source}={count}"))
        .collect::<Vec<_>>()
        .join(", ");
    lines.push(format!(
        "- Fetch counts: {}",
        if fetch_line.is_empty() { "none".to_string() } else { fetch_line }
    ));
    lines.push(format!(
        "- Funnel: fetched={} post_keyword={} post_dedup={} post_seen={}",
        ctx.stats.fetched, ctx.stats.post_keyword, ctx.stats.post_dedup, ctx.stats.post_seen
    ));

    Digest {
        subject,
        body: lines.join("\n"),
        sender: sanitize_header(ctx.sender),
        recipients: ctx.recipients.iter().map(|r| sanitize_header(r)).collect(),
        reply_to: ctx.reply_to.iter().map(|r| sanitize_header(r)).collect(),
    }
}

fn clip(s: &str, max_chars: usize) -> String {
    if s.chars().count() <= max_chars {
        s.to_string()
    } else {
        let mut out: String = s.chars().take(max_chars).collect();
        out.push('…');
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_strips_line_breaks() {
        assert_eq!(
            sanitize_header("Subject\r\nBcc: evil@example.test"),
            "Subject Bcc: evil@example.test"
        );
    }

    #[test]
    fn highlight_brackets_matches_case_insensitively() {
        let out = highlight(
            "ISG15 drives interferon signalling",
            &["isg15".to_string(), "interferon".to_string()],
        );
        assert_eq!(out, "[ISG15] drives [interferon] signalling");
    }

    #[test]
    fn highlight_prefers_longer_keywords() {
        let out = highlight(
            "type I interferon response",
            &["interferon".to_string(), "type I interferon".to_string()],
        );
        assert_eq!(out, "[type I interferon] response");
    }

    #[test]
    fn author_summary_caps_names() {
        let authors: Vec<String> = (1..=7).map(|i| format!("Author {i}")).collect();
        let line = summarize_authors(&authors, 5);
        assert!(line.ends_with("and 2 more"));
        assert_eq!(summarize_authors(&[], 5), "Unknown");
    }
}
