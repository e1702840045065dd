//! paper-watcher — binary entrypoint.
//! Thin wrapper for local and scheduled runs: resolves configuration from the
//! environment, accepts an optional JSON override payload as the first
//! argument, runs the pipeline once, and exits non-zero on any fatal error.

use std::sync::Arc;

use anyhow::{Context, Result};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use paper_watcher::config::{AppConfig, DeliveryMechanism};
use paper_watcher::ingest::providers;
use paper_watcher::notify::send_api::SendApiTransport;
use paper_watcher::notify::smtp::SmtpSender;
use paper_watcher::notify::DigestTransport;
use paper_watcher::retry::RetryPolicy;
use paper_watcher::store::JsonFileStore;
use paper_watcher::{pipeline, runtime};

fn init_tracing() {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("paper_watcher=info,warn"));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().compact())
        .init();
}

#[tokio::main]
async fn main() {
    // Load .env in local runs; no-op elsewhere.
    let _ = dotenvy::dotenv();
    init_tracing();

    if let Err(e) = run().await {
        tracing::error!(error = ?e, "run failed");
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let config = AppConfig::from_env().context("configuration error")?;

    let payload: Option<serde_json::Value> = std::env::args()
        .nth(1)
        .map(|raw| serde_json::from_str(&raw))
        .transpose()
        .context("invocation payload must be a JSON object")?;
    let options = runtime::derive(&config, payload.as_ref());

    let providers = providers::build(&config, &options);
    let store = JsonFileStore::new(&config.seen_store_path);
    let transport: Box<dyn DigestTransport> = match &config.delivery.mechanism {
        DeliveryMechanism::SendApi { endpoint, token } => Box::new(SendApiTransport::new(
            endpoint.clone(),
            token.clone(),
            RetryPolicy::default(),
        )?),
        DeliveryMechanism::Smtp { host, port, user, pass } => {
            Box::new(SmtpSender::new(host, *port, user, pass)?)
        }
    };

    let report = pipeline::run(&config, &options, &providers, &store, transport.as_ref()).await?;
    tracing::info!(
        status = ?report.status,
        new_items = report.new_items,
        fetched = report.stats.fetched,
        "done"
    );
    Ok(())
}
