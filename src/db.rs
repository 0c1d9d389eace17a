use std::str::FromStr;
use std::time::Duration;

use serde::Serialize;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::{FromRow, SqlitePool};
use tokio::sync::Mutex;
use tracing::info;

use crate::normalize::NewItem;

pub const DEFAULT_DATABASE_URL: &str = "sqlite:rss.db";

#[derive(Debug, Clone, FromRow, Serialize, PartialEq)]
pub struct Item {
    pub id: i64,
    pub feed_name: String,
    pub feed_url: String,
    pub category: String,
    pub title: String,
    pub link: String,
    pub pub_date: Option<String>,
    pub author: Option<String>,
}

/// The `rss_items` table. Reads go straight to the pool; writes are
/// serialized through `writer` since SQLite allows a single writer.
pub struct Database {
    pool: SqlitePool,
    writer: Mutex<()>,
}

impl Database {
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        info!("Connected to the database");
        Ok(Self {
            pool,
            writer: Mutex::new(()),
        })
    }

    pub async fn initialize(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS rss_items (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                feed_name TEXT NOT NULL,
                feed_url TEXT NOT NULL,
                category TEXT NOT NULL,
                title TEXT NOT NULL,
                link TEXT NOT NULL,
                pub_date TEXT,
                author TEXT,
                UNIQUE(title, link)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_rss_items_pub_date ON rss_items(pub_date DESC)")
            .execute(&self.pool)
            .await?;

        sqlx::query(
            r#"
            CREATE INDEX IF NOT EXISTS idx_rss_items_category_feed
            ON rss_items(category, feed_name, pub_date DESC)
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Insert a batch in one transaction, skipping any (title, link) pair
    /// already present. Returns how many rows were actually added.
    pub async fn insert_many(&self, items: &[NewItem]) -> anyhow::Result<u64> {
        if items.is_empty() {
            return Ok(0);
        }

        let _guard = self.writer.lock().await;
        let mut tx = self.pool.begin().await?;
        let mut inserted = 0;

        for item in items {
            let result = sqlx::query(
                r#"
                INSERT OR IGNORE INTO rss_items
                    (feed_name, feed_url, category, title, link, pub_date, author)
                VALUES (?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(&item.feed_name)
            .bind(&item.feed_url)
            .bind(&item.category)
            .bind(&item.title)
            .bind(&item.link)
            .bind(item.pub_date())
            .bind(&item.author)
            .execute(&mut *tx)
            .await?;

            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    /// Items with `start <= pub_date <= end`, newest first. Null dates never match.
    pub async fn query_by_date_range(&self, start: &str, end: &str) -> anyhow::Result<Vec<Item>> {
        let items = sqlx::query_as::<_, Item>(
            r#"
            SELECT * FROM rss_items
            WHERE pub_date BETWEEN ? AND ?
            ORDER BY pub_date DESC, id DESC
            "#,
        )
        .bind(start)
        .bind(end)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    /// Distinct feed names in a category, in the order they were first stored.
    pub async fn feed_names_in_category(&self, category: &str) -> anyhow::Result<Vec<String>> {
        let rows: Vec<(String,)> = sqlx::query_as(
            r#"
            SELECT feed_name FROM rss_items
            WHERE category = ?
            GROUP BY feed_name
            ORDER BY MIN(id)
            "#,
        )
        .bind(category)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(name,)| name).collect())
    }

    /// Up to `limit` newest items for each feed in `category`, concatenated
    /// feed by feed.
    pub async fn query_latest_per_feed_in_category(
        &self,
        category: &str,
        limit: i64,
    ) -> anyhow::Result<Vec<Item>> {
        let mut all = Vec::new();

        for feed_name in self.feed_names_in_category(category).await? {
            let items = sqlx::query_as::<_, Item>(
                r#"
                SELECT * FROM rss_items
                WHERE category = ? AND feed_name = ?
                ORDER BY pub_date DESC NULLS LAST, id DESC
                LIMIT ?
                "#,
            )
            .bind(category)
            .bind(&feed_name)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
            all.extend(items);
        }

        Ok(all)
    }

    /// Remove rows whose `pub_date` sorts before `cutoff`. Rows without a
    /// date are kept.
    pub async fn delete_older_than(&self, cutoff: &str) -> anyhow::Result<u64> {
        let _guard = self.writer.lock().await;
        let result = sqlx::query("DELETE FROM rss_items WHERE pub_date < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn count_items(&self) -> anyhow::Result<i64> {
        let count: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM rss_items")
            .fetch_one(&self.pool)
            .await?;
        Ok(count.0)
    }

    /// Waits for in-flight writes, then closes every pooled connection.
    pub async fn close(&self) {
        let _guard = self.writer.lock().await;
        self.pool.close().await;
        info!("Database closed");
    }
}
