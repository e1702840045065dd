// src/pipeline.rs
// One run of fetch → normalize → filter → dedup → seen-check → notify.
//
// Ordering contract: the digest is dispatched BEFORE the seen-store is
// updated. A dispatch failure therefore leaves every item eligible for the
// next scheduled run; a store failure after dispatch is logged distinctly as
// "notified but not recorded" and accepted as a duplicate-digest risk.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Serialize;

use crate::config::AppConfig;
use crate::dedup::dedup_by_id;
use crate::filter::{self, FilterStats};
use crate::ingest;
use crate::ingest::types::{FetchWindow, Item, Source, SourceProvider};
use crate::notify::{render_digest, DigestContext, DigestTransport};
use crate::retry::RetryPolicy;
use crate::runtime::RuntimeOptions;
use crate::store::{SeenGateway, SeenStore};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RunStatus {
    /// Digest dispatched and new ids recorded.
    Sent,
    /// Nothing new and no summary forced; nothing dispatched.
    NoNewItems,
    /// Rendered and logged only; no dispatch, no store write.
    DryRun,
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub status: RunStatus,
    pub new_items: usize,
    pub stats: FilterStats,
    pub fetch_counts: Vec<(Source, usize)>,
}

/// Execute one pipeline run. Collaborators (providers, store, transport) are
/// injected so the scheduler wrapper and the tests wire them the same way.
pub async fn run(
    config: &AppConfig,
    options: &RuntimeOptions,
    providers: &[Arc<dyn SourceProvider>],
    store: &dyn SeenStore,
    transport: &dyn DigestTransport,
) -> Result<RunReport> {
    if options.keywords.is_empty() {
        bail!("keyword set is empty; refusing to run");
    }
    if options.window_hours == 0 {
        bail!("window_hours must be positive");
    }

    let window = FetchWindow::trailing(options.window_hours);
    tracing::info!(
        window_start = %window.start.to_rfc3339(),
        window_hours = options.window_hours,
        sources = providers.len(),
        match_mode = options.match_mode.as_str(),
        keywords = options.keywords.len(),
        dry_run = options.dry_run,
        "run starting"
    );

    // Fetch + normalize (adapters emit canonical items already).
    let stage_timeout = Duration::from_secs(config.per_source_timeout_secs);
    let (fetched, fetch_counts) = ingest::fetch_all(providers, window, stage_timeout).await;

    let mut stats = FilterStats {
        fetched: fetched.len(),
        ..Default::default()
    };

    // Keyword filter.
    let matched = filter::apply(fetched, &options.keywords, options.match_mode);
    stats.post_keyword = matched.len();

    // Intra-run dedup, first occurrence in source-evaluation order wins.
    let (unique, dropped) = dedup_by_id(matched);
    stats.post_dedup = unique.len();
    if dropped > 0 {
        tracing::debug!(dropped, "intra-run duplicates collapsed");
    }

    // Persistent dedup. Store read errors are fatal.
    let gateway = SeenGateway::new(store, RetryPolicy::default());
    let new_items = gateway.filter_unseen(unique).await?;
    stats.post_seen = new_items.len();

    tracing::info!(
        fetched = stats.fetched,
        post_keyword = stats.post_keyword,
        post_dedup = stats.post_dedup,
        post_seen = stats.post_seen,
        "pipeline funnel"
    );

    let groups = group_by_source(new_items, &options.sources);
    let recipients: &[String] = options
        .recipients_override
        .as_deref()
        .unwrap_or(&config.delivery.recipients);

    let digest = render_digest(
        &groups,
        &DigestContext {
            app_name: &config.app_name,
            subject_prefix: &config.delivery.subject_prefix,
            sender: &config.delivery.sender,
            recipients,
            reply_to: &config.delivery.reply_to,
            window,
            options,
            fetch_counts: &fetch_counts,
            stats,
        },
    );

    let total_new = stats.post_seen;
    if total_new == 0 && !options.force_send_summary {
        tracing::info!("no new items and no forced summary; nothing to send");
        return Ok(RunReport {
            status: RunStatus::NoNewItems,
            new_items: 0,
            stats,
            fetch_counts,
        });
    }

    if options.dry_run {
        tracing::info!(
            subject = %digest.subject,
            recipients = digest.recipients.len(),
            new_items = total_new,
            "dry run: skipping dispatch and store write"
        );
        tracing::info!(body = %digest.body, "dry run: rendered digest");
        return Ok(RunReport {
            status: RunStatus::DryRun,
            new_items: total_new,
            stats,
            fetch_counts,
        });
    }

    // Dispatch first; only a delivered digest may be recorded. Bounded by the
    // same stage deadline as the adapters, so a transport whose connection
    // stalls cannot hang the run past its retry budget.
    match tokio::time::timeout(stage_timeout, transport.send(&digest)).await {
        Ok(sent) => sent.context("digest dispatch failed")?,
        Err(_) => bail!(
            "digest dispatch timed out after {}s",
            stage_timeout.as_secs()
        ),
    }

    let flat: Vec<Item> = groups.into_iter().flat_map(|(_, items)| items).collect();
    if let Err(e) = gateway.mark_seen(&flat).await {
        // The digest went out but the ids were not durably recorded: the next
        // run may notify these again. Surface it loudly, still fail the run.
        tracing::error!(stage = "mark_seen", error = ?e, "notified but not recorded");
        return Err(e.context("seen-store update after successful dispatch"));
    }

    tracing::info!(new_items = total_new, "run complete, digest sent");
    Ok(RunReport {
        status: RunStatus::Sent,
        new_items: total_new,
        stats,
        fetch_counts,
    })
}

/// Group items by source in source-evaluation order, newest first within a
/// group. Sources with no items keep an empty group so rendering stays aligned
/// with the configured order.
fn group_by_source(items: Vec<Item>, order: &[Source]) -> Vec<(Source, Vec<Item>)> {
    let mut groups: Vec<(Source, Vec<Item>)> =
        order.iter().map(|s| (*s, Vec::new())).collect();
    for item in items {
        if let Some((_, bucket)) = groups.iter_mut().find(|(s, _)| *s == item.source) {
            bucket.push(item);
        } else {
            groups.push((item.source, vec![item]));
        }
    }
    for (_, bucket) in &mut groups {
        bucket.sort_by(|a, b| b.published_at.cmp(&a.published_at));
    }
    groups
}
