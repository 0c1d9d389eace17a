use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, FixedOffset, Months};
use futures::stream::{self, StreamExt};
use tracing::{error, info};

use crate::config::FeedDescriptor;
use crate::db::Database;
use crate::fetcher::Fetcher;
use crate::normalize::canonical_timestamp;

/// Totals for one crawl pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CrawlReport {
    pub feeds_total: usize,
    pub feeds_failed: usize,
    pub items_fetched: usize,
    pub items_inserted: u64,
    pub insert_failures: usize,
    pub items_pruned: u64,
}

/// Outcome of a single feed within a pass.
struct FeedOutcome {
    fetched: Option<usize>,
    inserted: u64,
    insert_failed: bool,
}

pub struct Crawler {
    fetcher: Fetcher,
    db: Arc<Database>,
    concurrency: usize,
    retention_months: u32,
}

impl Crawler {
    pub fn new(fetcher: Fetcher, db: Arc<Database>, concurrency: usize, retention_months: u32) -> Self {
        Self {
            fetcher,
            db,
            concurrency: concurrency.max(1),
            retention_months,
        }
    }

    /// Fetch and store every feed, then prune items older than the
    /// retention horizon measured from `now`.
    pub async fn run(&self, feeds: &[FeedDescriptor], now: DateTime<FixedOffset>) -> CrawlReport {
        info!("Crawling {} feeds", feeds.len());

        let outcomes: Vec<FeedOutcome> = stream::iter(feeds)
            .map(|feed| self.crawl_feed(feed))
            .buffer_unordered(self.concurrency)
            .collect()
            .await;

        let mut report = CrawlReport {
            feeds_total: feeds.len(),
            ..Default::default()
        };
        for outcome in outcomes {
            match outcome.fetched {
                Some(count) => report.items_fetched += count,
                None => report.feeds_failed += 1,
            }
            report.items_inserted += outcome.inserted;
            if outcome.insert_failed {
                report.insert_failures += 1;
            }
        }

        match self.prune(now).await {
            Ok(removed) => report.items_pruned = removed,
            Err(e) => error!(error = %e, "Failed to delete old records"),
        }

        info!(
            feeds = report.feeds_total,
            failed = report.feeds_failed,
            fetched = report.items_fetched,
            inserted = report.items_inserted,
            pruned = report.items_pruned,
            "Crawl complete"
        );
        report
    }

    async fn crawl_feed(&self, feed: &FeedDescriptor) -> FeedOutcome {
        let items = match self.fetcher.fetch(feed).await {
            Ok(items) => items,
            Err(e) => {
                Fetcher::log_failure(feed, &e);
                return FeedOutcome {
                    fetched: None,
                    inserted: 0,
                    insert_failed: false,
                };
            }
        };

        let (inserted, insert_failed) = match self.db.insert_many(&items).await {
            Ok(inserted) => {
                info!("Added {} new items for feed '{}'", inserted, feed.display_name());
                (inserted, false)
            }
            Err(e) => {
                error!(feed = %feed.url, error = %e, "Failed to store items");
                (0, true)
            }
        };

        FeedOutcome {
            fetched: Some(items.len()),
            inserted,
            insert_failed,
        }
    }

    async fn prune(&self, now: DateTime<FixedOffset>) -> anyhow::Result<u64> {
        let cutoff = retention_cutoff(now, self.retention_months)?;
        let removed = self.db.delete_older_than(&cutoff).await?;
        info!("Deleted {} records published before {}", removed, cutoff);
        Ok(removed)
    }
}

/// `now` minus `months`, as canonical text in `now`'s timezone.
pub fn retention_cutoff(now: DateTime<FixedOffset>, months: u32) -> anyhow::Result<String> {
    let cutoff = now
        .checked_sub_months(Months::new(months))
        .with_context(|| format!("cannot subtract {} months from {}", months, now))?;
    Ok(canonical_timestamp(&cutoff, now.offset()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn shanghai() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    #[test]
    fn test_retention_cutoff_three_months() {
        let now = shanghai().with_ymd_and_hms(2024, 12, 15, 10, 30, 0).unwrap();
        assert_eq!(retention_cutoff(now, 3).unwrap(), "2024-09-15 10:30:00");
    }

    #[test]
    fn test_retention_cutoff_clamps_month_end() {
        let now = shanghai().with_ymd_and_hms(2024, 5, 31, 0, 0, 0).unwrap();
        assert_eq!(retention_cutoff(now, 3).unwrap(), "2024-02-29 00:00:00");
    }

    #[test]
    fn test_retention_cutoff_zero_months() {
        let now = shanghai().with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        assert_eq!(retention_cutoff(now, 0).unwrap(), "2024-01-01 00:00:00");
    }
}
