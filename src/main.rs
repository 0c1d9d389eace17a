use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use rss_hub::config::{Config, DEFAULT_CONFIG_PATH};
use rss_hub::crawler::Crawler;
use rss_hub::db::{Database, DEFAULT_DATABASE_URL};
use rss_hub::export::Exporter;
use rss_hub::fetcher::Fetcher;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rss_hub=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::load(DEFAULT_CONFIG_PATH)?;
    info!("Loaded {} feeds from configuration", config.feeds.len());
    let tz = config.timezone()?;

    let fetcher = Fetcher::new(&config.fetch, tz)?;

    // Initialize database
    let db = Database::new(DEFAULT_DATABASE_URL).await?;
    db.initialize().await?;
    let db = Arc::new(db);

    let crawler = Crawler::new(
        fetcher,
        db.clone(),
        config.fetch.concurrency,
        config.retention_months,
    );
    crawler.run(&config.feeds, Utc::now().with_timezone(&tz)).await;

    let exporter = Exporter::new(
        db.clone(),
        &config.export,
        config.categories.clone(),
        config.denylist.clone(),
    );
    let report = exporter.run(Utc::now().with_timezone(&tz)).await;
    if report.is_complete() {
        info!(
            today = report.today_items,
            categories = report.categories.len(),
            "Export complete"
        );
    } else {
        warn!(
            today = report.today_items,
            categories = report.categories.len(),
            failed = report.failed.len(),
            "Export finished with unwritten snapshots"
        );
    }

    db.close().await;
    Ok(())
}
