//! Pagination over a news source.
//!
//! A [`PageSource`] answers one page at a time; [`pages`] turns it into a lazy,
//! finite stream of article batches for a single topic and time window.
//!
//! ```text
//! Idle ──► Fetching(1) ──► Fetching(2) ──► … ──► Done
//!               │               │
//!               └──── Err ──────┴──► stream yields the FetchError and ends
//! ```
//!
//! The stream ends when the source returns no next token, returns an empty
//! batch, or `max_pages` pages have been fetched. In the last case the unused
//! token rides on the final [`Batch`] so the caller can resume from it.

use crate::error::FetchError;
use crate::models::Article;
use chrono::{DateTime, Utc};
use futures::stream::{self, Stream};
use tracing::{debug, warn};

/// One topic's time window and paging parameters.
#[derive(Debug, Clone)]
pub struct PageQuery {
    pub topic: String,
    /// Inclusive lower bound on `published_at`.
    pub from: DateTime<Utc>,
    /// Upper bound on `published_at`, the start time of the run.
    pub to: DateTime<Utc>,
    pub page_size: usize,
}

/// One page of results.
#[derive(Debug, Default)]
pub struct Page {
    pub articles: Vec<Article>,
    /// Token for the following page, `None` once the window is drained.
    pub next_page_token: Option<String>,
}

/// Anything that can return one page of articles for a query.
pub trait PageSource {
    /// Fetch the page identified by `page_token`, or the first page when `None`.
    async fn fetch_page(
        &self,
        query: &PageQuery,
        page_token: Option<&str>,
    ) -> Result<Page, FetchError>;
}

/// One fetched page as seen by the sync loop.
#[derive(Debug)]
pub struct Batch {
    pub articles: Vec<Article>,
    /// Set on the last batch when the page limit stopped the stream while the
    /// source still had a next page.
    pub resume_token: Option<String>,
}

enum PagerState {
    Idle(Option<String>),
    Fetching { page: usize, token: String },
    Done,
}

/// Stream article batches for `query`, starting at `start_token` (the first
/// page when `None`), at most `max_pages` of them.
///
/// The first error is yielded and ends the stream; the caller decides whether
/// it is fatal.
pub fn pages<'a, S: PageSource>(
    source: &'a S,
    query: &'a PageQuery,
    start_token: Option<String>,
    max_pages: usize,
) -> impl Stream<Item = Result<Batch, FetchError>> + 'a {
    stream::try_unfold(PagerState::Idle(start_token), move |state| {
        next_page(source, query, max_pages, state)
    })
}

async fn next_page<S: PageSource>(
    source: &S,
    query: &PageQuery,
    max_pages: usize,
    state: PagerState,
) -> Result<Option<(Batch, PagerState)>, FetchError> {
    let (page, token) = match state {
        PagerState::Idle(token) => (1, token),
        PagerState::Fetching { page, token } => (page, Some(token)),
        PagerState::Done => return Ok(None),
    };
    if page > max_pages {
        return Ok(None);
    }

    let fetched = source.fetch_page(query, token.as_deref()).await?;
    debug!(
        topic = %query.topic,
        page,
        count = fetched.articles.len(),
        next = ?fetched.next_page_token,
        "Fetched page"
    );
    if fetched.articles.is_empty() {
        return Ok(None);
    }

    let (next, resume_token) = match fetched.next_page_token {
        Some(token) if page < max_pages => (
            PagerState::Fetching {
                page: page + 1,
                token,
            },
            None,
        ),
        Some(token) => {
            warn!(topic = %query.topic, max_pages, next = %token, "Page limit reached; next run resumes from the unread page");
            (PagerState::Done, Some(token))
        }
        None => (PagerState::Done, None),
    };
    Ok(Some((
        Batch {
            articles: fetched.articles,
            resume_token,
        },
        next,
    )))
}
