//! Data models for fetched articles, their linguistic metrics, and emitted rows.
//!
//! This module defines the core data structures used throughout the sync:
//! - [`Article`]: A news article as returned by the news source
//! - [`LinguisticMetrics`]: Optional analysis scores for one article
//! - [`OutputRow`]: The flattened record handed to the sink
//! - [`SyncState`]: The resumption cursor persisted between runs
//! - [`TableSchema`]: The destination table definition
//!
//! [`merge`] is the only way an [`OutputRow`] is built, so null handling for
//! missing metrics lives in exactly one place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Name of the destination table.
pub const ARTICLE_TABLE: &str = "article";

/// Primary key column of [`ARTICLE_TABLE`].
pub const PRIMARY_KEY: &str = "id";

/// A news article as fetched for one topic.
///
/// `id` is the source-assigned identifier when the news API supplies one and
/// the article URL otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Article {
    pub id: String,
    pub topic: String,
    pub source_name: String,
    pub published_at: DateTime<Utc>,
    pub author: Option<String>,
    pub title: String,
    pub description: Option<String>,
    /// Article text, possibly truncated by the news API.
    pub body: Option<String>,
    pub url: String,
}

/// Linguistic analysis scores for a single article.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct LinguisticMetrics {
    pub red: f64,
    pub blue: f64,
    /// `1 - delta` of the analyzed document.
    pub clarity: f64,
    pub insecurity: f64,
    pub apathy: f64,
    pub disfunction: f64,
    pub regret: f64,
    /// Only reported by some analysis API versions.
    pub involvement: Option<f64>,
}

/// The flattened article + metrics record upserted into [`ARTICLE_TABLE`].
///
/// Metric columns are `None` when enrichment was disabled or failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputRow {
    pub id: String,
    pub topic: String,
    pub source: String,
    pub published_at: DateTime<Utc>,
    pub author: Option<String>,
    pub title: String,
    pub description: Option<String>,
    pub content: Option<String>,
    pub url: String,
    pub red: Option<f64>,
    pub blue: Option<f64>,
    pub clarity: Option<f64>,
    pub insecurity: Option<f64>,
    pub apathy: Option<f64>,
    pub disfunction: Option<f64>,
    pub regret: Option<f64>,
    pub involvement: Option<f64>,
}

/// Merge an article with its (optional) metrics into a flat row.
pub fn merge(article: Article, metrics: Option<&LinguisticMetrics>) -> OutputRow {
    OutputRow {
        id: article.id,
        topic: article.topic,
        source: article.source_name,
        published_at: article.published_at,
        author: article.author,
        title: article.title,
        description: article.description,
        content: article.body,
        url: article.url,
        red: metrics.map(|m| m.red),
        blue: metrics.map(|m| m.blue),
        clarity: metrics.map(|m| m.clarity),
        insecurity: metrics.map(|m| m.insecurity),
        apathy: metrics.map(|m| m.apathy),
        disfunction: metrics.map(|m| m.disfunction),
        regret: metrics.map(|m| m.regret),
        involvement: metrics.and_then(|m| m.involvement),
    }
}

/// Resumption cursor persisted by the state store between runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncState {
    /// Latest `published_at` covered by a fully drained window.
    #[serde(default)]
    pub last_published_at: Option<DateTime<Utc>>,
    /// Encoded [`ResumeToken`] of a window cut short by the page limit.
    #[serde(default)]
    pub last_page_token: Option<String>,
}

impl SyncState {
    /// Cursor after a run that drained its whole window and saw `max_seen` as
    /// its newest article.
    ///
    /// Never moves backward and keeps the old value when nothing was fetched.
    pub fn advance(&self, max_seen: Option<DateTime<Utc>>) -> SyncState {
        let last_published_at = match (self.last_published_at, max_seen) {
            (Some(old), Some(seen)) => Some(old.max(seen)),
            (old, seen) => old.or(seen),
        };
        SyncState {
            last_published_at,
            last_page_token: None,
        }
    }

    /// Cursor after a run that stopped on the page limit: the position stays
    /// put and the unread pages are remembered in `token`.
    pub fn suspend(&self, token: String) -> SyncState {
        SyncState {
            last_published_at: self.last_published_at,
            last_page_token: Some(token),
        }
    }
}

/// Where an unfinished window picks up again.
///
/// News sources page newest first, so pages left behind by the page limit
/// hold older articles than any seen so far. The window bounds stay fixed
/// until every topic is drained; only then does the cursor move.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResumeToken {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    /// Newest `published_at` seen in this window by earlier runs.
    #[serde(default)]
    pub max_seen: Option<DateTime<Utc>>,
    /// Next page token per topic that has pages left.
    pub pages: BTreeMap<String, String>,
}

impl ResumeToken {
    pub fn encode(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub fn decode(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }
}

/// Destination table definition, in the shape the connector platform expects.
#[derive(Debug, Clone, Serialize)]
pub struct TableSchema {
    pub table: &'static str,
    pub primary_key: Vec<&'static str>,
    pub columns: BTreeMap<&'static str, &'static str>,
}

/// Schema of [`ARTICLE_TABLE`].
pub fn article_schema() -> TableSchema {
    let columns = [
        ("id", "STRING"),
        ("topic", "STRING"),
        ("source", "STRING"),
        ("published_at", "UTC_DATETIME"),
        ("author", "STRING"),
        ("title", "STRING"),
        ("description", "STRING"),
        ("content", "STRING"),
        ("url", "STRING"),
        ("red", "FLOAT"),
        ("blue", "FLOAT"),
        ("clarity", "FLOAT"),
        ("insecurity", "FLOAT"),
        ("apathy", "FLOAT"),
        ("disfunction", "FLOAT"),
        ("regret", "FLOAT"),
        ("involvement", "FLOAT"),
    ];
    TableSchema {
        table: ARTICLE_TABLE,
        primary_key: vec![PRIMARY_KEY],
        columns: columns.into_iter().collect(),
    }
}
