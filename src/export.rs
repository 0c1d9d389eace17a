//! Read-optimized JSON snapshots for the static front-end.
//!
//! `<output_dir>/data.json` holds the rolling "today" window and
//! `<output_dir>/<key>/data.json` holds the latest items per feed for each
//! mapped category. Every mapped category always gets a file, even when it
//! is an empty array.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, FixedOffset};
use indexmap::IndexMap;
use serde::Serialize;
use tracing::{error, info};

use crate::config::{Denylist, ExportSettings};
use crate::db::{Database, Item};
use crate::normalize::format_canonical;

const SNAPSHOT_FILE: &str = "data.json";

/// Reduced projection written to the "today" snapshot.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct TodayItem {
    pub id: i64,
    pub feed_name: String,
    pub category: String,
    pub title: String,
    pub link: String,
    pub pub_date: Option<String>,
}

impl From<Item> for TodayItem {
    fn from(item: Item) -> Self {
        Self {
            id: item.id,
            feed_name: item.feed_name,
            category: item.category,
            title: item.title,
            link: item.link,
            pub_date: item.pub_date,
        }
    }
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ExportReport {
    pub today_items: usize,
    /// (folder key, item count) for every category snapshot written
    pub categories: Vec<(String, usize)>,
    /// Snapshot files that could not be written
    pub failed: Vec<PathBuf>,
}

impl ExportReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Exporter {
    db: Arc<Database>,
    output_dir: PathBuf,
    per_feed_limit: i64,
    categories: IndexMap<String, String>,
    denylist: Denylist,
}

impl Exporter {
    pub fn new(
        db: Arc<Database>,
        settings: &ExportSettings,
        categories: IndexMap<String, String>,
        denylist: Denylist,
    ) -> Self {
        Self {
            db,
            output_dir: PathBuf::from(&settings.output_dir),
            per_feed_limit: settings.per_feed_limit,
            categories,
            denylist,
        }
    }

    pub fn today_path(&self) -> PathBuf {
        self.output_dir.join(SNAPSHOT_FILE)
    }

    pub fn category_path(&self, key: &str) -> PathBuf {
        self.output_dir.join(key).join(SNAPSHOT_FILE)
    }

    /// Write every snapshot. Query failures degrade to empty documents and a
    /// file that cannot be written is recorded without skipping the rest.
    pub async fn run(&self, now: DateTime<FixedOffset>) -> ExportReport {
        let mut report = ExportReport::default();

        match self.export_today(now).await {
            Ok(count) => report.today_items = count,
            Err(e) => {
                error!(error = %e, "Failed to write today snapshot");
                report.failed.push(self.today_path());
            }
        }

        for (label, key) in &self.categories {
            match self.export_category(label, key).await {
                Ok(count) => report.categories.push((key.clone(), count)),
                Err(e) => {
                    error!(category = %key, error = %e, "Failed to write category snapshot");
                    report.failed.push(self.category_path(key));
                }
            }
        }

        report
    }

    pub async fn export_today(&self, now: DateTime<FixedOffset>) -> anyhow::Result<usize> {
        let (start, end) = today_window(now);
        info!("Querying updates from {} to {}", start, end);

        let rows = match self.db.query_by_date_range(&start, &end).await {
            Ok(rows) => rows,
            Err(e) => {
                error!(error = %e, "Failed to query today's updates");
                Vec::new()
            }
        };

        let items: Vec<TodayItem> = rows
            .into_iter()
            .map(TodayItem::from)
            .filter(|item| !self.denylist.is_denied(&item.link, &item.category, &item.feed_name))
            .collect();

        write_json(&self.today_path(), &items).await?;
        info!("Today updates saved ({} items)", items.len());
        Ok(items.len())
    }

    pub async fn export_category(&self, label: &str, key: &str) -> anyhow::Result<usize> {
        let rows = match self
            .db
            .query_latest_per_feed_in_category(label, self.per_feed_limit)
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                error!(category = %label, error = %e, "Failed to query category");
                Vec::new()
            }
        };

        let path = self.category_path(key);
        write_json(&path, &rows).await?;
        info!(
            "Data for category {} has been written to {}",
            key,
            path.display()
        );
        Ok(rows.len())
    }
}

/// Inclusive bounds from yesterday 00:00:00 through today 23:59:59 in
/// `now`'s timezone.
pub fn today_window(now: DateTime<FixedOffset>) -> (String, String) {
    let today = now.date_naive();
    let yesterday = today.pred_opt().unwrap_or(today);

    let start = yesterday.and_hms_opt(0, 0, 0);
    let end = today.and_hms_opt(23, 59, 59);
    (
        start.map(|dt| format_canonical(&dt)).unwrap_or_default(),
        end.map(|dt| format_canonical(&dt)).unwrap_or_default(),
    )
}

async fn write_json<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    if let Some(parent) = path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let json = serde_json::to_string_pretty(value)?;
    tokio::fs::write(path, json)
        .await
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(())
}
