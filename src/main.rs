//! # news_sync
//!
//! Incrementally syncs news articles from a NewsAPI-compatible source,
//! optionally enriched with Tabula Lingua linguistic metrics, into a sink that
//! upserts by article id.
//!
//! ## Usage
//!
//! ```sh
//! NEWS_API_KEY=… TABULA_KEY=… news_sync sync -c sync.yaml -o ./sync_output
//! ```
//!
//! ## Architecture
//!
//! The sync is a single linear pipeline:
//! 1. **Cursor**: Read the last synced `published_at` from the state store
//! 2. **Fetching**: Page through every topic since the cursor
//! 3. **Enrichment**: Score each article concurrently; failures only null the metrics
//! 4. **Output**: Upsert rows by id, then advance the cursor on success

use chrono::Utc;
use clap::Parser;
use std::error::Error;
use tracing::{debug, error, info};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod deploy;
mod enrich;
mod error;
mod fetch;
mod models;
mod news_api;
mod retry;
mod store;
mod sync;
mod utils;

use cli::{Cli, Command, SyncArgs};
use config::{FileConfig, SyncConfig};
use enrich::TabulaClient;
use news_api::NewsApiClient;
use retry::RetryFetch;
use store::LocalStore;

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // --- Tracing init ---
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let args = Cli::parse();

    match args.command {
        Command::Schema => {
            println!("{}", serde_json::to_string_pretty(&models::article_schema())?);
            Ok(())
        }
        Command::Deploy(deploy_args) => {
            if let Err(e) = deploy::deploy(&deploy_args.into()).await {
                error!(error = %e, "Deployment failed");
                return Err(e.into());
            }
            Ok(())
        }
        Command::Sync(sync_args) => run(sync_args).await,
    }
}

async fn run(args: SyncArgs) -> Result<(), Box<dyn Error>> {
    let start_time = std::time::Instant::now();
    info!("news_sync starting up");
    debug!(config = ?args.config, output_dir = %args.output_dir.display(), "Parsed CLI arguments");

    // ---- Config: fatal before any request ----
    let file = match &args.config {
        Some(path) => FileConfig::load(path)?,
        None => FileConfig::default(),
    };
    let config = match SyncConfig::build(file, args.overrides()) {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    info!(
        topics = ?config.topics,
        page_size = config.page_size,
        max_pages = config.max_pages,
        enrichment = config.enrichment_api_key.is_some(),
        "Loaded configuration"
    );

    let http = config.http_client()?;
    let news = NewsApiClient::new(
        http.clone(),
        config.news_api_url.clone(),
        config.news_api_key.clone(),
        config.language.clone(),
    )
    .with_result_cap(config.result_cap);
    let source = RetryFetch::new(news, config.fetch_retries, config.retry_base_delay);
    let enricher = config
        .enrichment_api_key
        .clone()
        .map(|key| TabulaClient::new(http.clone(), config.enrichment_url.clone(), key));

    let mut store = LocalStore::open(&args.output_dir).await?;

    // ---- Sync ----
    let report = match sync::run_sync(&config, &source, &enricher, &mut store, Utc::now()).await {
        Ok(report) => report,
        Err(e) => {
            error!(error = %e, "Sync failed; cursor not advanced");
            return Err(e.into());
        }
    };

    let table_rows = store.rows(models::ARTICLE_TABLE).await?.len();
    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        pages = report.pages,
        rows = report.rows,
        duplicates = report.duplicates,
        pending_topics = report.pending_topics,
        enriched = report.enriched,
        enrichment_failures = report.enrichment_failures,
        cursor = ?report.cursor.last_published_at,
        table_rows,
        output_dir = %args.output_dir.display(),
        "Execution complete"
    );
    Ok(())
}
