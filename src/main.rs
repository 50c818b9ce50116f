//! # news_ingest
//!
//! Reads RSS/Atom/RDF feeds, fetches every linked article through a
//! configurable fetch strategy, validates and extracts its text, and stores
//! the result with per-run statistics.
//!
//! ## Usage
//!
//! ```sh
//! news_ingest -c ./config.yaml
//! ```
//!
//! ## Architecture
//!
//! 1. **Feeds**: download and parse each configured start URL
//! 2. **Fetching**: fetch article pages with retries (stealth scrapers only)
//! 3. **Validation**: CAPTCHA and blocked-content checks, then text extraction
//! 4. **Persistence**: dedup on `(domain, title)`, length policy, store
//! 5. **Finalize**: counts from storage decide the run status

use clap::Parser;
use std::error::Error;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, instrument};
use tracing_subscriber::{EnvFilter, fmt as tfmt};

mod cli;
mod config;
mod coordinator;
mod dates;
mod error;
mod extract;
mod feeds;
mod fetchers;
mod models;
mod orchestrator;
mod outputs;
mod persist;
mod retry;
mod storage;
mod utils;
mod validator;

#[cfg(test)]
mod testing;

use cli::Cli;
use config::IngestionConfig;
use coordinator::{CoordinatorSettings, IngestionRunCoordinator};
use extract::ReadableTextExtractor;
use fetchers::ScraperRegistry;
use orchestrator::ArticleFetchOrchestrator;
use storage::{MemoryStorage, SqliteStorage, Storage};
use utils::ensure_parent_writable;

#[tokio::main]
#[instrument]
async fn main() -> Result<(), Box<dyn Error>> {
    let args = Cli::parse();

    // Config first: its log level is the fallback when RUST_LOG is unset.
    let config = IngestionConfig::load(&args.config).and_then(|c| {
        c.with_overrides(
            args.db_path.clone(),
            args.articles_limit,
            args.date_threshold.clone(),
        )
    });

    // --- Tracing init ---
    let level = config.as_ref().map(|c| c.log_level.as_str()).unwrap_or("info");
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tfmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_file(false)
        .with_line_number(false)
        .with_timer(tracing_subscriber::fmt::time::UtcTime::rfc_3339())
        .init();

    let start_time = std::time::Instant::now();
    info!("news_ingest starting up");
    debug!(?args, "Parsed CLI arguments");

    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!(path = %args.config, error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };
    info!(config_path = %args.config, db_path = %config.db_path, "Loaded configuration");

    let storage: Arc<dyn Storage> = if args.dry_run {
        info!("Dry run: records are kept in memory only");
        Arc::new(MemoryStorage::new())
    } else {
        // Early check: ensure the storage directory is writable
        let db_path = Path::new(&config.db_path);
        if let Err(e) = ensure_parent_writable(db_path).await {
            error!(
                path = %config.db_path,
                error = %e,
                "Storage directory is not writable (fix perms or choose a different db_path)"
            );
            return Err(e);
        }
        let db = SqliteStorage::open(db_path).await?;
        info!(path = %config.db_path, "Using storage database");
        Arc::new(db)
    };

    let sources = config.feed_sources();
    let registry = ScraperRegistry::for_sources(&sources, config.browser.enabled).await?;
    debug!(?registry, "Scraper backends ready");

    let orchestrator = ArticleFetchOrchestrator::new(
        Arc::new(ReadableTextExtractor::new()),
        config.retry_policy(),
        config.date_threshold_utc()?,
    );
    let coordinator = Arc::new(IngestionRunCoordinator::new(
        storage,
        registry,
        orchestrator,
        config.content_policy,
        CoordinatorSettings {
            articles_limit: config.articles_limit,
            feed_concurrency: config.concurrency.feeds,
            article_concurrency: config.concurrency.articles,
            feed_timeout: Duration::from_secs(config.retry.per_attempt_timeout_secs),
        },
    ));

    info!(feeds = sources.len(), "Dispatching feeds");

    let summary = match coordinator.run(sources, config.parameters()).await {
        Ok(summary) => summary,
        Err(e) => {
            error!(error = %e, "Ingestion run aborted");
            return Err(e.into());
        }
    };

    info!(
        run_id = summary.run.id,
        status = %summary.run.status,
        processed = summary.run.num_processed,
        errors = summary.run.num_errors,
        duplicates = summary.tally.duplicates,
        date_rejected = summary.tally.date_rejected,
        error_statuses = ?summary.tally.error_statuses,
        "Run summary"
    );

    if let Some(path) = &args.summary_json {
        if let Err(e) = outputs::json::write_summary(&summary, Path::new(path)).await {
            error!(path = %path, error = %e, "Failed to write run summary");
        }
    }

    let elapsed = start_time.elapsed();
    info!(
        ?elapsed,
        secs = elapsed.as_secs(),
        millis = elapsed.subsec_millis(),
        "Execution complete"
    );

    Ok(())
}
