use std::time::Duration;

use anyhow::Context;
use chrono::FixedOffset;
use feed_rs::parser;
use quick_xml::events::Event;
use quick_xml::Reader;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::Client;
use tracing::{error, info, warn};

use crate::config::{FeedDescriptor, FetchSettings};
use crate::error::FetchError;
use crate::normalize::{normalize_entry, NewItem};

const DEFAULT_ACCEPT: &str =
    "application/rss+xml, application/atom+xml, application/feed+json, application/xml;q=0.9, text/xml;q=0.9, */*;q=0.8";
const DEFAULT_ACCEPT_LANGUAGE: &str = "zh-CN,zh;q=0.9,en;q=0.8";

/// Downloads and parses a single feed into normalized items.
#[derive(Clone)]
pub struct Fetcher {
    client: Client,
    timeout: Duration,
    tz: FixedOffset,
}

impl Fetcher {
    pub fn new(settings: &FetchSettings, tz: FixedOffset) -> anyhow::Result<Self> {
        let timeout = Duration::from_secs(settings.timeout_secs);
        let client = Client::builder()
            .timeout(timeout)
            .user_agent(settings.user_agent.as_str())
            .default_headers(Self::build_headers(settings)?)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            client,
            timeout,
            tz,
        })
    }

    /// Configured headers override the accept defaults.
    pub fn build_headers(settings: &FetchSettings) -> anyhow::Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        headers.insert(ACCEPT, HeaderValue::from_static(DEFAULT_ACCEPT));
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static(DEFAULT_ACCEPT_LANGUAGE));

        for (name, value) in &settings.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .with_context(|| format!("invalid header name '{}'", name))?;
            let value = HeaderValue::from_str(value)
                .with_context(|| format!("invalid value for header '{}'", name))?;
            headers.insert(name, value);
        }

        Ok(headers)
    }

    /// Fetch a feed, logging any failure and returning no items for it.
    pub async fn fetch_items(&self, feed: &FeedDescriptor) -> Vec<NewItem> {
        match self.fetch(feed).await {
            Ok(items) => items,
            Err(e) => {
                Self::log_failure(feed, &e);
                Vec::new()
            }
        }
    }

    pub async fn fetch(&self, feed: &FeedDescriptor) -> Result<Vec<NewItem>, FetchError> {
        info!("Fetching feed: {} ({})", feed.display_name(), feed.url);

        // Dropping the download future on expiry aborts the request
        let bytes = tokio::time::timeout(self.timeout, self.download(&feed.url))
            .await
            .map_err(|_| FetchError::Timeout)??;

        let items = self.parse(feed, &bytes)?;
        info!("Fetched {} items from {}", items.len(), feed.url);
        Ok(items)
    }

    async fn download(&self, url: &str) -> Result<Vec<u8>, FetchError> {
        let response = self.client.get(url).send().await.map_err(map_reqwest)?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus(status.as_u16()));
        }

        let bytes = response.bytes().await.map_err(map_reqwest)?;
        Ok(bytes.to_vec())
    }

    /// Parse a raw RSS 1.0/2.0, Atom or JSON Feed document.
    pub fn parse(&self, feed: &FeedDescriptor, bytes: &[u8]) -> Result<Vec<NewItem>, FetchError> {
        if !looks_like_json(bytes) {
            check_well_formed(bytes)?;
        }
        let parsed = parser::parse(bytes)?;

        Ok(parsed
            .entries
            .iter()
            .filter_map(|entry| normalize_entry(entry, feed, &self.tz))
            .collect())
    }

    pub fn log_failure(feed: &FeedDescriptor, err: &FetchError) {
        match err {
            FetchError::Timeout => error!(feed = %feed.url, "Timeout fetching feed"),
            FetchError::Parse(msg) => warn!(feed = %feed.url, error = %msg, "Invalid feed format"),
            FetchError::HttpStatus(_) | FetchError::Network(_) => {
                error!(feed = %feed.url, error = %err, "Error fetching feed")
            }
        }
    }
}

fn looks_like_json(bytes: &[u8]) -> bool {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    matches!(
        bytes.iter().find(|b| !b.is_ascii_whitespace()),
        Some(b'{') | Some(b'[')
    )
}

/// feed-rs recovers from mismatched or missing end tags, so the raw
/// document is drained once with strict end-name checking first.
fn check_well_formed(bytes: &[u8]) -> Result<(), FetchError> {
    let mut reader = Reader::from_reader(bytes);
    reader.config_mut().check_end_names = true;

    let mut buf = Vec::new();
    let mut depth: usize = 0;
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(_)) => depth += 1,
            Ok(Event::End(_)) => depth = depth.saturating_sub(1),
            Ok(Event::Eof) => break,
            Err(e) => {
                return Err(FetchError::Parse(format!(
                    "malformed XML at byte {}: {}",
                    reader.error_position(),
                    e
                )))
            }
            _ => {}
        }
        buf.clear();
    }

    if depth > 0 {
        return Err(FetchError::Parse(format!(
            "malformed XML: {} element(s) left open",
            depth
        )));
    }
    Ok(())
}

fn map_reqwest(err: reqwest::Error) -> FetchError {
    if err.is_timeout() {
        FetchError::Timeout
    } else {
        FetchError::Network(err)
    }
}
