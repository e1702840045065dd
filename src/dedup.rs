// src/dedup.rs
// Intra-run deduplication. Multiple sources regularly report the same
// publication (Crossref and PubMed both resolve to the DOI); the first
// occurrence in source-evaluation order wins. Stateless across runs.

use std::collections::HashSet;

use crate::ingest::types::Item;

/// Collapse items sharing the same id (case-insensitive). Returns the
/// surviving items and the number removed.
pub fn dedup_by_id(items: Vec<Item>) -> (Vec<Item>, usize) {
    let mut seen: HashSet<String> = HashSet::with_capacity(items.len());
    let mut kept = Vec::with_capacity(items.len());
    let mut dropped = 0usize;
    for item in items {
        if seen.insert(item.id.to_lowercase()) {
            kept.push(item);
        } else {
            dropped += 1;
        }
    }
    (kept, dropped)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::types::Source;

    fn item(source: Source, id: &str) -> Item {
        Item {
            source,
            id: id.into(),
            title: format!("{id} via {source}"),
            summary: None,
            authors: vec![],
            journal: None,
            published_at: None,
            url: "https://example.test".into(),
            matched_keywords: vec![],
        }
    }

    #[test]
    fn same_id_across_sources_collapses_to_first_occurrence() {
        let items = vec![
            item(Source::Crossref, "10.1000/abc"),
            item(Source::Pubmed, "10.1000/ABC"),
            item(Source::Rss, "10.1000/xyz"),
        ];
        let (kept, dropped) = dedup_by_id(items);
        assert_eq!(dropped, 1);
        assert_eq!(kept.len(), 2);
        assert_eq!(kept[0].source, Source::Crossref);
        assert_eq!(kept[1].id, "10.1000/xyz");
    }

    #[test]
    fn distinct_ids_pass_through() {
        let items = vec![item(Source::Rss, "a"), item(Source::Rss, "b")];
        let (kept, dropped) = dedup_by_id(items);
        assert_eq!(kept.len(), 2);
        assert_eq!(dropped, 0);
    }
}
