//! The incremental sync loop.
//!
//! One call to [`run_sync`] walks every configured topic:
//!
//! 1. **Load cursor** from the state store (first run looks back
//!    `initial_lookback` from `now`)
//! 2. **Fetch** pages for the window `[cursor, now]`
//! 3. **Enrich** each new article concurrently, best effort
//! 4. **Upsert** the merged rows and flush the sink after every page
//! 5. **Advance cursor** to the newest `published_at` seen, once every topic
//!    is drained
//!
//! When the page limit stops a topic early, step 5 stores a
//! [`ResumeToken`] instead and leaves the cursor where it was. The next run
//! re-opens the same window and only continues the unfinished topics.
//!
//! A [`FetchError`](crate::error::FetchError) aborts the run before step 5, so
//! the next run re-covers the same window. Rows already flushed stay in the
//! sink; re-delivering them later is harmless because the sink upserts by id.

use crate::config::SyncConfig;
use crate::enrich::Enricher;
use crate::error::{StoreError, SyncError};
use crate::fetch::{Batch, PageQuery, PageSource, pages};
use crate::models::{
    ARTICLE_TABLE, Article, OutputRow, PRIMARY_KEY, ResumeToken, SyncState, merge,
};
use crate::store::{Sink, StateStore, load_cursor, save_cursor};
use chrono::{DateTime, TimeDelta, Utc};
use futures::stream::{self, StreamExt, TryStreamExt};
use std::collections::{BTreeMap, HashSet};
use std::pin::pin;
use tracing::{info, instrument, warn};

/// Counters for one completed run.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct SyncReport {
    pub pages: usize,
    pub rows: usize,
    pub enriched: usize,
    pub enrichment_failures: usize,
    /// Articles skipped because an earlier page or topic already emitted them.
    pub duplicates: usize,
    /// Topics stopped by the page limit; the next run resumes them.
    pub pending_topics: usize,
    pub cursor: SyncState,
}

enum Enrichment {
    Applied,
    Failed,
    Disabled,
}

/// Run one incremental sync.
///
/// # Arguments
///
/// * `config` - Validated sync settings (topics, paging, concurrency)
/// * `source` - Where pages come from, usually a [`RetryFetch`](crate::retry::RetryFetch)-wrapped client
/// * `enricher` - Linguistic scorer; `None::<T>` disables enrichment
/// * `store` - Sink for rows and state store for the cursor
/// * `now` - Upper bound of a fresh window and anchor of the first-run lookback
///
/// # Returns
///
/// The run's counters together with the cursor that was persisted.
///
/// # Example
///
/// ```ignore
/// let mut store = LocalStore::open(Path::new("./sync_output")).await?;
/// let report = run_sync(&config, &source, &enricher, &mut store, Utc::now()).await?;
/// info!(rows = report.rows, "done");
/// ```
///
/// # Errors
///
/// [`SyncError::Fetch`] when a page cannot be fetched after retries,
/// [`SyncError::Store`] when the sink or the state store fails. The cursor is
/// left untouched in both cases.
#[instrument(level = "info", skip_all, fields(topics = config.topics.len()))]
pub async fn run_sync<S, E, K>(
    config: &SyncConfig,
    source: &S,
    enricher: &E,
    store: &mut K,
    now: DateTime<Utc>,
) -> Result<SyncReport, SyncError>
where
    S: PageSource,
    E: Enricher,
    K: Sink + StateStore,
{
    let state = load_cursor(store).await?;
    let resume = state
        .last_page_token
        .as_deref()
        .and_then(|raw| match ResumeToken::decode(raw) {
            Ok(token) => Some(token),
            Err(e) => {
                warn!(error = %e, "Ignoring unreadable resume token; starting a fresh window");
                None
            }
        });

    // A resumed window keeps its bounds and only revisits unfinished topics.
    let (from, to, mut max_seen, work): (_, _, _, Vec<(&String, Option<String>)>) = match resume {
        Some(token) => {
            let work = config
                .topics
                .iter()
                .filter_map(|topic| token.pages.get(topic).map(|page| (topic, Some(page.clone()))))
                .collect();
            (token.from, token.to, token.max_seen, work)
        }
        None => {
            let from = state
                .last_published_at
                .unwrap_or_else(|| lookback_start(now, config.initial_lookback));
            (from, now, None, config.topics.iter().map(|topic| (topic, None)).collect())
        }
    };
    info!(
        %from,
        %to,
        cursor = ?state.last_published_at,
        resumed_topics = work.iter().filter(|(_, start)| start.is_some()).count(),
        enrichment = enricher.is_enabled(),
        "Starting sync"
    );

    let mut report = SyncReport::default();
    let mut seen_ids: HashSet<String> = HashSet::new();
    let mut pending: BTreeMap<String, String> = BTreeMap::new();

    for (topic, start) in work {
        let query = PageQuery {
            topic: topic.clone(),
            from,
            to,
            page_size: config.page_size,
        };
        let mut batches = pin!(pages(source, &query, start, config.max_pages));
        let mut topic_rows = 0usize;

        while let Some(batch) = batches
            .try_next()
            .await
            .map_err(|source| SyncError::Fetch {
                topic: topic.clone(),
                source,
            })?
        {
            let Batch {
                articles,
                resume_token,
            } = batch;
            if let Some(token) = resume_token {
                pending.insert(topic.clone(), token);
            }
            report.pages += 1;
            max_seen = articles
                .iter()
                .map(|a| a.published_at)
                .chain(max_seen)
                .max();

            let fetched = articles.len();
            let fresh: Vec<Article> = articles
                .into_iter()
                .filter(|a| seen_ids.insert(a.id.clone()))
                .collect();
            report.duplicates += fetched - fresh.len();

            let rows: Vec<(OutputRow, Enrichment)> = stream::iter(fresh)
                .map(|article| enrich_row(enricher, article))
                .buffer_unordered(config.enrichment_concurrency)
                .collect()
                .await;

            for (row, outcome) in rows {
                match outcome {
                    Enrichment::Applied => report.enriched += 1,
                    Enrichment::Failed => report.enrichment_failures += 1,
                    Enrichment::Disabled => {}
                }
                store.upsert(ARTICLE_TABLE, PRIMARY_KEY, &row).await?;
                topic_rows += 1;
            }
            store.flush().await?;
        }

        report.rows += topic_rows;
        info!(%topic, rows = topic_rows, "Topic synced");
    }

    report.pending_topics = pending.len();
    let cursor = if pending.is_empty() {
        state.advance(max_seen)
    } else {
        let token = ResumeToken {
            from,
            to,
            max_seen,
            pages: pending,
        };
        let encoded = token.encode().map_err(|source| StoreError::Serde {
            what: "resume token".to_string(),
            source,
        })?;
        state.suspend(encoded)
    };
    save_cursor(store, &cursor).await?;
    if report.pending_topics > 0 {
        info!(
            pending_topics = report.pending_topics,
            cursor = ?cursor.last_published_at,
            "Page limit reached; cursor held until the window is drained"
        );
    }
    info!(
        pages = report.pages,
        rows = report.rows,
        enriched = report.enriched,
        enrichment_failures = report.enrichment_failures,
        duplicates = report.duplicates,
        cursor = ?cursor.last_published_at,
        "Sync complete"
    );
    report.cursor = cursor;
    Ok(report)
}

/// Start of the first-run window, clamped to the earliest representable time.
fn lookback_start(now: DateTime<Utc>, lookback: TimeDelta) -> DateTime<Utc> {
    now.checked_sub_signed(lookback)
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

async fn enrich_row<E: Enricher>(enricher: &E, article: Article) -> (OutputRow, Enrichment) {
    if !enricher.is_enabled() {
        return (merge(article, None), Enrichment::Disabled);
    }
    let text = article.body.as_deref().unwrap_or_default();
    let result = enricher.analyze(text).await;
    match result {
        Ok(metrics) => (merge(article, Some(&metrics)), Enrichment::Applied),
        Err(e) => {
            warn!(id = %article.id, error = %e, "Enrichment failed; emitting row without metrics");
            (merge(article, None), Enrichment::Failed)
        }
    }
}
