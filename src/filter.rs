// src/filter.rs
// Keyword matching over canonical items. Literal, case-insensitive,
// punctuation-normalized substring/phrase matching only — no ranking, no NLP.

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};

use crate::ingest::normalize_text;
use crate::ingest::types::Item;

/// Policy for combining multiple configured keywords.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchMode {
    /// "OR": at least one keyword must match.
    Any,
    /// "AND": every keyword must match.
    All,
}

impl MatchMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "OR" | "ANY" => Ok(MatchMode::Any),
            "AND" | "ALL" => Ok(MatchMode::All),
            other => bail!("MATCH_MODE must be 'AND' or 'OR', got '{other}'"),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            MatchMode::Any => "OR",
            MatchMode::All => "AND",
        }
    }
}

/// One configured keyword. A bare term and a quoted phrase both match as a
/// substring of the normalized text; the quotes let a phrase keep internal
/// whitespace through configuration parsing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Keyword {
    /// As configured (quotes removed), used for display and highlighting.
    pub display: String,
    /// Punctuation-normalized lowercase needle searched in the haystack.
    needle: String,
    pub phrase: bool,
}

impl Keyword {
    pub fn new(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let (inner, phrase) = match trimmed.strip_prefix('"').and_then(|s| s.strip_suffix('"')) {
            Some(inner) if !inner.trim().is_empty() => (inner.trim(), true),
            _ => (trimmed, false),
        };
        if inner.is_empty() {
            return None;
        }
        let needle = normalize_match_text(inner);
        if needle.is_empty() {
            return None;
        }
        Some(Keyword {
            display: inner.to_string(),
            needle,
            phrase,
        })
    }
}

/// Split a comma-separated keyword list into parsed keywords, order preserved,
/// duplicates removed.
pub fn parse_keywords(raw: &str) -> Vec<Keyword> {
    let mut out: Vec<Keyword> = Vec::new();
    for part in raw.split(',') {
        if let Some(kw) = Keyword::new(part) {
            if !out.iter().any(|k| k.needle == kw.needle) {
                out.push(kw);
            }
        }
    }
    out
}

/// Matching haystack: strip HTML, lowercase, collapse punctuation to spaces.
/// "ISG-15" and "isg15" normalize to "isg 15" and "isg15" respectively, so a
/// keyword only matches what it literally contains after the same treatment.
pub fn normalize_match_text(s: &str) -> String {
    let stripped = normalize_text(s);
    let mut out = String::with_capacity(stripped.len());
    let mut last_space = true;
    for c in stripped.chars() {
        if c.is_alphanumeric() {
            out.extend(c.to_lowercase());
            last_space = false;
        } else if !last_space {
            out.push(' ');
            last_space = true;
        }
    }
    while out.ends_with(' ') {
        out.pop();
    }
    out
}

/// Evaluate one item. Returns the keywords that matched, in keyword
/// configuration order, or `None` when the item does not satisfy `mode`.
pub fn match_item(item: &Item, keywords: &[Keyword], mode: MatchMode) -> Option<Vec<String>> {
    let mut haystack = normalize_match_text(&item.title);
    if let Some(summary) = &item.summary {
        haystack.push(' ');
        haystack.push_str(&normalize_match_text(summary));
    }

    let hits: Vec<String> = keywords
        .iter()
        .filter(|kw| haystack.contains(kw.needle.as_str()))
        .map(|kw| kw.display.clone())
        .collect();

    let matched = match mode {
        MatchMode::Any => !hits.is_empty(),
        MatchMode::All => hits.len() == keywords.len(),
    };
    matched.then_some(hits)
}

/// Filter items, enriching survivors with their matched keywords.
pub fn apply(items: Vec<Item>, keywords: &[Keyword], mode: MatchMode) -> Vec<Item> {
    items
        .into_iter()
        .filter_map(|mut item| {
            let hits = match_item(&item, keywords, mode)?;
            item.matched_keywords = hits;
            Some(item)
        })
        .collect()
}

/// Per-run funnel counters, monotonically non-increasing across stages.
/// Observability only; never used for control flow.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FilterStats {
    pub fetched: usize,
    pub post_keyword: usize,
    pub post_dedup: usize,
    pub post_seen: usize,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::Source;

    fn item(title: &str, summary: Option<&str>) -> Item {
        Item {
            source: Source::Rss,
            id: "id".into(),
            title: title.into(),
            summary: summary.map(String::from),
            authors: vec![],
            journal: None,
            published_at: None,
            url: "https://example.test".into(),
            matched_keywords: vec![],
        }
    }

    #[test]
    fn parse_keeps_order_and_drops_empties() {
        let kws = parse_keywords(r#"ISG15, , "type I interferon", isg15"#);
        assert_eq!(kws.len(), 2);
        assert_eq!(kws[0].display, "ISG15");
        assert_eq!(kws[1].display, "type I interferon");
        assert!(kws[1].phrase);
    }

    #[test]
    fn punctuation_normalization_applies_to_both_sides() {
        let kws = parse_keywords("isg-15");
        let it = item("The role of ISG15 conjugation", None);
        // "isg-15" normalizes to "isg 15"; "ISG15" normalizes to "isg15".
        assert!(match_item(&it, &kws, MatchMode::Any).is_none());

        let it2 = item("The role of ISG-15 conjugation", None);
        assert!(match_item(&it2, &kws, MatchMode::Any).is_some());
    }

    #[test]
    fn quoted_phrase_requires_contiguity() {
        let kws = parse_keywords(r#""type I interferon""#);
        let hit = item("A type I interferon signature", None);
        let miss = item("Type of study: I. An interferon overview", Some("scattered words"));
        assert!(match_item(&hit, &kws, MatchMode::Any).is_some());
        assert!(match_item(&miss, &kws, MatchMode::Any).is_none());
    }

    #[test]
    fn all_mode_requires_every_keyword() {
        let kws = parse_keywords("isg15, ubiquitin");
        let both = item("ISG15 is a ubiquitin-like modifier", None);
        let one = item("ISG15 alone", None);
        assert_eq!(
            match_item(&both, &kws, MatchMode::All).unwrap(),
            vec!["isg15".to_string(), "ubiquitin".to_string()]
        );
        assert!(match_item(&one, &kws, MatchMode::All).is_none());
        assert!(match_item(&one, &kws, MatchMode::Any).is_some());
    }

    #[test]
    fn matched_terms_follow_configuration_order() {
        let kws = parse_keywords("zeta, alpha");
        let it = item("alpha then zeta", None);
        assert_eq!(
            match_item(&it, &kws, MatchMode::Any).unwrap(),
            vec!["zeta".to_string(), "alpha".to_string()]
        );
    }

    #[test]
    fn summary_html_is_stripped_before_matching() {
        let kws = parse_keywords("interferon");
        let it = item("Unrelated title", Some("<b>inter</b>feron signalling"));
        assert!(match_item(&it, &kws, MatchMode::Any).is_some());
    }
}
