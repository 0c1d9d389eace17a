use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context};
use chrono::FixedOffset;
use indexmap::IndexMap;
use serde::Deserialize;

/// Where the process looks for its configuration when run without arguments
pub const DEFAULT_CONFIG_PATH: &str = "public/rss-feeds.json";

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub feeds: Vec<FeedDescriptor>,
    /// Source category label -> output folder key, in document order
    #[serde(default = "default_categories")]
    pub categories: IndexMap<String, String>,
    #[serde(default)]
    pub denylist: Denylist,
    #[serde(default)]
    pub fetch: FetchSettings,
    /// Items published before `now - retention_months` are pruned
    #[serde(default = "default_retention_months")]
    pub retention_months: u32,
    #[serde(default)]
    pub export: ExportSettings,
    /// Offset of the reference timezone used for every canonical timestamp
    #[serde(default = "default_utc_offset_hours")]
    pub utc_offset_hours: i32,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct FeedDescriptor {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    pub url: String,
    pub category: String,
}

impl FeedDescriptor {
    /// The display title if present, else the short name
    pub fn display_name(&self) -> &str {
        [self.title.as_deref(), self.name.as_deref()]
            .into_iter()
            .flatten()
            .map(str::trim)
            .find(|s| !s.is_empty())
            .unwrap_or_default()
    }
}

/// Substring lists applied to the "today" export.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Denylist {
    #[serde(default)]
    pub link: Vec<String>,
    #[serde(default)]
    pub category: Vec<String>,
    #[serde(default)]
    pub feed_name: Vec<String>,
}

impl Default for Denylist {
    fn default() -> Self {
        Self {
            link: vec!["66y".to_string(), "weibo".to_string()],
            category: vec!["论坛".to_string(), "财经".to_string()],
            feed_name: vec!["github".to_string()],
        }
    }
}

impl Denylist {
    pub fn is_denied(&self, link: &str, category: &str, feed_name: &str) -> bool {
        self.link.iter().any(|s| link.contains(s.as_str()))
            || self.category.iter().any(|s| category.contains(s.as_str()))
            || self.feed_name.iter().any(|s| feed_name.contains(s.as_str()))
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct FetchSettings {
    /// Request deadline in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    /// Additional request headers sent to every feed origin
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Maximum number of feeds fetched at the same time
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
}

impl Default for FetchSettings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            user_agent: default_user_agent(),
            headers: BTreeMap::new(),
            concurrency: default_concurrency(),
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExportSettings {
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
    /// Latest N items kept per feed in each category snapshot
    #[serde(default = "default_per_feed_limit")]
    pub per_feed_limit: i64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            per_feed_limit: default_per_feed_limit(),
        }
    }
}

fn default_categories() -> IndexMap<String, String> {
    [
        ("新闻", "news"),
        ("国外", "foreign"),
        ("科技", "tech"),
        ("技术", "code"),
        ("论坛", "forum"),
        ("娱乐", "funny"),
    ]
    .into_iter()
    .map(|(label, key)| (label.to_string(), key.to_string()))
    .collect()
}

fn default_retention_months() -> u32 {
    3
}

fn default_utc_offset_hours() -> i32 {
    8
}

fn default_timeout_secs() -> u64 {
    15
}

fn default_user_agent() -> String {
    "Mozilla/5.0 (compatible; RssHub/1.0; +RSS aggregator)".to_string()
}

fn default_concurrency() -> usize {
    8
}

fn default_output_dir() -> String {
    "src/app".to_string()
}

fn default_per_feed_limit() -> i64 {
    20
}

impl Config {
    /// Load from disk; `.toml` files are read as TOML, anything else as JSON.
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("reading config {}", path.display()))?;
        let is_toml = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("toml"));

        if is_toml {
            Self::from_toml_str(&content)
        } else {
            Self::from_json_str(&content)
        }
        .with_context(|| format!("loading config {}", path.display()))
    }

    pub fn from_json_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        for (idx, feed) in self.feeds.iter().enumerate() {
            if feed.url.trim().is_empty() {
                bail!("feed #{} has an empty url", idx);
            }
            if feed.category.trim().is_empty() {
                bail!("feed '{}' has an empty category", feed.url);
            }
            if feed.display_name().is_empty() {
                bail!("feed '{}' needs a title or name", feed.url);
            }
        }
        if self.fetch.concurrency == 0 {
            bail!("fetch.concurrency must be at least 1");
        }
        if self.export.per_feed_limit < 0 {
            bail!("export.per_feed_limit must not be negative");
        }
        self.timezone()?;
        Ok(())
    }

    /// The fixed reference timezone.
    pub fn timezone(&self) -> anyhow::Result<FixedOffset> {
        if !(-23..=23).contains(&self.utc_offset_hours) {
            bail!("utc_offset_hours {} is out of range", self.utc_offset_hours);
        }
        FixedOffset::east_opt(self.utc_offset_hours * 3600)
            .with_context(|| format!("invalid utc_offset_hours {}", self.utc_offset_hours))
    }
}
