//! Mapping of parsed feed entries onto the canonical item shape.
//!
//! Timestamps are kept as wall-clock times in the configured reference
//! timezone and rendered as fixed-width `YYYY-MM-DD HH:MM:SS` text, so that
//! string order in the database equals chronological order.

use chrono::{DateTime, FixedOffset, NaiveDateTime, TimeZone, Utc};
use feed_rs::model::Entry;
use tracing::warn;

use crate::config::FeedDescriptor;

pub const CANONICAL_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// An item ready for insertion. It has no identity until the store assigns one.
#[derive(Debug, Clone, PartialEq)]
pub struct NewItem {
    pub feed_name: String,
    pub feed_url: String,
    pub category: String,
    pub title: String,
    pub link: String,
    /// Publish time in the reference timezone; `None` when the source had
    /// no usable date
    pub published: Option<NaiveDateTime>,
    pub author: Option<String>,
}

impl NewItem {
    pub fn pub_date(&self) -> Option<String> {
        self.published.map(|p| format_canonical(&p))
    }
}

pub fn format_canonical(dt: &NaiveDateTime) -> String {
    dt.format(CANONICAL_FORMAT).to_string()
}

/// Render any instant as canonical text in the reference timezone.
pub fn canonical_timestamp<Tz: TimeZone>(dt: &DateTime<Tz>, tz: &FixedOffset) -> String {
    format_canonical(&dt.with_timezone(tz).naive_local())
}

/// Parse canonical text back into a wall-clock time.
pub fn parse_canonical(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, CANONICAL_FORMAT).ok()
}

/// Normalize one entry. Returns `None` for entries without a link.
pub fn normalize_entry(entry: &Entry, feed: &FeedDescriptor, tz: &FixedOffset) -> Option<NewItem> {
    let title = entry
        .title
        .as_ref()
        .map(|t| t.content.trim().to_string())
        .filter(|t| !t.is_empty())
        .unwrap_or_else(|| "Untitled".to_string());

    // Atom entries may list replies/self/enclosure links before the page
    let link = entry
        .links
        .iter()
        .find(|l| matches!(l.rel.as_deref(), None | Some("alternate")))
        .or_else(|| entry.links.first())
        .map(|l| l.href.trim().to_string())
        .unwrap_or_default();

    if link.is_empty() {
        warn!(feed = %feed.url, title = %title, "Skipping entry with no link");
        return None;
    }

    let published = entry
        .published
        .or(entry.updated)
        .map(|dt: DateTime<Utc>| dt.with_timezone(tz).naive_local());

    let author = entry
        .authors
        .first()
        .map(|p| p.name.trim().to_string())
        .filter(|name| !name.is_empty());

    Some(NewItem {
        feed_name: feed.display_name().to_string(),
        feed_url: feed.url.clone(),
        category: feed.category.clone(),
        title,
        link,
        published,
        author,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn shanghai() -> FixedOffset {
        FixedOffset::east_opt(8 * 3600).unwrap()
    }

    fn create_feed(title: Option<&str>, name: Option<&str>) -> FeedDescriptor {
        FeedDescriptor {
            title: title.map(str::to_string),
            name: name.map(str::to_string),
            url: "https://example.com/rss".to_string(),
            category: "科技".to_string(),
        }
    }

    fn rss_entry(item: &str) -> Entry {
        let xml = format!(
            r#"<?xml version="1.0"?><rss version="2.0"><channel><title>T</title><link>https://example.com</link><description>D</description><item>{}</item></channel></rss>"#,
            item
        );
        let feed = feed_rs::parser::parse(xml.as_bytes()).unwrap();
        feed.entries.into_iter().next().unwrap()
    }

    fn atom_entry(entry: &str) -> Entry {
        let xml = format!(
            r#"<?xml version="1.0" encoding="utf-8"?><feed xmlns="http://www.w3.org/2005/Atom"><title>T</title><id>urn:feed</id><updated>2024-12-01T00:00:00Z</updated><entry>{}</entry></feed>"#,
            entry
        );
        let feed = feed_rs::parser::parse(xml.as_bytes()).unwrap();
        feed.entries.into_iter().next().unwrap()
    }

    mod timestamp_tests {
        use super::*;

        #[test]
        fn test_format_is_fixed_width() {
            let dt = NaiveDate::from_ymd_opt(2024, 3, 5)
                .unwrap()
                .and_hms_opt(7, 8, 9)
                .unwrap();
            assert_eq!(format_canonical(&dt), "2024-03-05 07:08:09");
        }

        #[test]
        fn test_canonical_timestamp_converts_timezone() {
            let utc = Utc.with_ymd_and_hms(2024, 12, 31, 20, 30, 0).unwrap();
            assert_eq!(canonical_timestamp(&utc, &shanghai()), "2025-01-01 04:30:00");
        }

        #[test]
        fn test_parse_canonical_round_trips() {
            let parsed = parse_canonical("2024-03-05 07:08:09").unwrap();
            assert_eq!(format_canonical(&parsed), "2024-03-05 07:08:09");
            assert!(parse_canonical("Tue, 05 Mar 2024 07:08:09 GMT").is_none());
        }

        #[test]
        fn test_lexicographic_order_matches_chronological() {
            let earlier = "2024-09-30 23:59:59";
            let later = "2024-10-01 00:00:00";
            assert!(earlier < later);
            assert!(parse_canonical(earlier).unwrap() < parse_canonical(later).unwrap());
        }
    }

    mod normalize_entry_tests {
        use super::*;

        #[test]
        fn test_maps_feed_level_fields() {
            let feed = create_feed(Some("Solidot"), Some("solidot"));
            let entry = rss_entry("<title>Hello</title><link>https://example.com/1</link>");

            let item = normalize_entry(&entry, &feed, &shanghai()).unwrap();

            assert_eq!(item.feed_name, "Solidot");
            assert_eq!(item.feed_url, "https://example.com/rss");
            assert_eq!(item.category, "科技");
            assert_eq!(item.title, "Hello");
            assert_eq!(item.link, "https://example.com/1");
        }

        #[test]
        fn test_feed_name_falls_back_to_short_name() {
            let feed = create_feed(None, Some("solidot"));
            let entry = rss_entry("<title>Hello</title><link>https://example.com/1</link>");

            let item = normalize_entry(&entry, &feed, &shanghai()).unwrap();
            assert_eq!(item.feed_name, "solidot");
        }

        #[test]
        fn test_published_converted_to_reference_timezone() {
            let feed = create_feed(Some("Feed"), None);
            let entry = rss_entry(
                "<title>Hello</title><link>https://example.com/1</link><pubDate>Mon, 09 Dec 2024 12:00:00 GMT</pubDate>",
            );

            let item = normalize_entry(&entry, &feed, &shanghai()).unwrap();
            assert_eq!(item.pub_date().as_deref(), Some("2024-12-09 20:00:00"));
        }

        #[test]
        fn test_updated_used_when_published_missing() {
            let feed = create_feed(Some("Feed"), None);
            let entry = atom_entry(
                r#"<id>urn:1</id><title>Hello</title><link href="https://example.com/1"/><updated>2024-12-09T00:00:00Z</updated>"#,
            );

            let item = normalize_entry(&entry, &feed, &shanghai()).unwrap();
            assert_eq!(item.pub_date().as_deref(), Some("2024-12-09 08:00:00"));
        }

        #[test]
        fn test_published_preferred_over_updated() {
            let feed = create_feed(Some("Feed"), None);
            let entry = atom_entry(
                r#"<id>urn:1</id><title>Hello</title><link href="https://example.com/1"/><published>2024-12-08T00:00:00Z</published><updated>2024-12-09T00:00:00Z</updated>"#,
            );

            let item = normalize_entry(&entry, &feed, &shanghai()).unwrap();
            assert_eq!(item.pub_date().as_deref(), Some("2024-12-08 08:00:00"));
        }

        #[test]
        fn test_missing_date_is_null() {
            let feed = create_feed(Some("Feed"), None);
            let entry = rss_entry("<title>Hello</title><link>https://example.com/1</link>");

            let item = normalize_entry(&entry, &feed, &shanghai()).unwrap();
            assert!(item.published.is_none());
            assert!(item.pub_date().is_none());
        }

        #[test]
        fn test_missing_title_becomes_untitled() {
            let feed = create_feed(Some("Feed"), None);
            let entry = rss_entry("<link>https://example.com/1</link><description>body</description>");

            let item = normalize_entry(&entry, &feed, &shanghai()).unwrap();
            assert_eq!(item.title, "Untitled");
        }

        #[test]
        fn test_alternate_link_preferred() {
            let feed = create_feed(Some("Feed"), None);
            let entry = atom_entry(
                r#"<id>urn:1</id><title>Hello</title><link rel="replies" href="https://example.com/1/comments"/><link rel="self" href="https://example.com/1.atom"/><link rel="alternate" href="https://example.com/1"/>"#,
            );

            let item = normalize_entry(&entry, &feed, &shanghai()).unwrap();
            assert_eq!(item.link, "https://example.com/1");
        }

        #[test]
        fn test_first_link_used_without_alternate() {
            let feed = create_feed(Some("Feed"), None);
            let entry = atom_entry(
                r#"<id>urn:1</id><title>Hello</title><link rel="related" href="https://example.com/related"/><link rel="replies" href="https://example.com/1/comments"/>"#,
            );

            let item = normalize_entry(&entry, &feed, &shanghai()).unwrap();
            assert_eq!(item.link, "https://example.com/related");
        }

        #[test]
        fn test_entry_without_link_skipped() {
            let feed = create_feed(Some("Feed"), None);
            let entry = rss_entry("<title>Hello</title><description>body</description>");

            assert!(normalize_entry(&entry, &feed, &shanghai()).is_none());
        }

        #[test]
        fn test_author_copied_when_present() {
            let feed = create_feed(Some("Feed"), None);
            let entry = atom_entry(
                r#"<id>urn:1</id><title>Hello</title><link href="https://example.com/1"/><author><name>Alice</name></author>"#,
            );

            let item = normalize_entry(&entry, &feed, &shanghai()).unwrap();
            assert_eq!(item.author.as_deref(), Some("Alice"));
        }

        #[test]
        fn test_author_absent_is_null() {
            let feed = create_feed(Some("Feed"), None);
            let entry = rss_entry("<title>Hello</title><link>https://example.com/1</link>");

            let item = normalize_entry(&entry, &feed, &shanghai()).unwrap();
            assert!(item.author.is_none());
        }
    }
}
