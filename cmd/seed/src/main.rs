//! # seed
//!
//! Bulk-enqueues discovered node ids into the crawl frontier. Ids come from
//! the command line, or from stdin (one per line) when no arguments are
//! given. `DATABASE_URL` selects the store.

use anyhow::Context;
use mc_core::traits::CrawlRepo;
use mc_db_sqlite::SqliteCrawlRepo;
use std::io::BufRead;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let url =
        std::env::var("DATABASE_URL").unwrap_or_else(|_| "sqlite:marketcrawl.db".to_string());

    let mut ids: Vec<String> = std::env::args().skip(1).collect();
    if ids.is_empty() {
        for line in std::io::stdin().lock().lines() {
            let line = line.context("reading seed ids from stdin")?;
            let id = line.trim();
            if !id.is_empty() {
                ids.push(id.to_string());
            }
        }
    }
    if ids.is_empty() {
        anyhow::bail!("no node ids given (pass them as arguments or on stdin)");
    }

    let repo = SqliteCrawlRepo::connect(&url)
        .await
        .with_context(|| format!("opening datastore at {url}"))?;
    repo.enqueue_discovered(&ids)
        .await
        .context("enqueueing discovered nodes")?;

    tracing::info!(count = ids.len(), "seeded crawl frontier");
    Ok(())
}
