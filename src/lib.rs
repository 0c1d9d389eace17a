//! RSS Hub - a feed crawler that feeds a static site
//!
//! Each run pulls the configured RSS/Atom/JSON feeds, stores new items in
//! SQLite (deduplicated on title and link), prunes old records and writes
//! per-category JSON snapshots for the front-end build.

pub mod config;
pub mod crawler;
pub mod db;
pub mod error;
pub mod export;
pub mod fetcher;
pub mod normalize;
