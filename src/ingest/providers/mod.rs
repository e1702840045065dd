// src/ingest/providers/mod.rs
pub mod crossref;
pub mod pubmed;
pub mod rss;

use std::sync::Arc;

use crate::config::AppConfig;
use crate::ingest::types::{Source, SourceProvider};
use crate::runtime::RuntimeOptions;

/// Configuration-driven construction: one adapter per enabled source, in the
/// order the options list them (which fixes dedup precedence downstream).
pub fn build(config: &AppConfig, options: &RuntimeOptions) -> Vec<Arc<dyn SourceProvider>> {
    let user_agent = config.user_agent();
    options
        .sources
        .iter()
        .map(|source| match source {
            Source::Crossref => Arc::new(crossref::CrossrefProvider::new(
                user_agent.clone(),
                config.credentials.contact_email.clone(),
                config.crossref_venues.clone(),
            )) as Arc<dyn SourceProvider>,
            Source::Pubmed => Arc::new(pubmed::PubmedProvider::new(
                user_agent.clone(),
                config.credentials.pubmed_api_key.clone(),
            )),
            Source::Rss => Arc::new(rss::RssProvider::new(user_agent.clone())),
        })
        .collect()
}
