// src/lib.rs
// Public library surface for integration tests (and potential reuse).

pub mod config;
pub mod dedup;
pub mod filter;
pub mod ingest;
pub mod notify;
pub mod pipeline;
pub mod retry;
pub mod runtime;
pub mod store;

// ---- Re-exports for stable public API ----
pub use crate::filter::{FilterStats, Keyword, MatchMode};
pub use crate::ingest::types::{FetchWindow, Item, Source, SourceProvider};
pub use crate::pipeline::{RunReport, RunStatus};
pub use crate::runtime::RuntimeOptions;
pub use crate::store::{SeenGateway, SeenRecord, SeenStore};
