//! Exponential backoff for transient news source failures.
//!
//! [`RetryFetch`] wraps any [`PageSource`] and re-requests the *same* page when
//! the error is transient (5xx, timeout, connection failure). Anything else is
//! returned immediately.
//!
//! # Retry Strategy
//!
//! ```text
//! delay = min(base_delay * 2^(attempt-1), max_delay) + random_jitter(0..=max_jitter)
//! ```
//!
//! After `max_retries` failed retries the last error is surfaced to the caller.

use crate::error::FetchError;
use crate::fetch::{Page, PageQuery, PageSource};
use rand::{Rng, rng};
use std::fmt;
use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{error, instrument, warn};

/// Wrapper that adds exponential backoff retry logic to any [`PageSource`].
pub struct RetryFetch<T> {
    /// The underlying page source.
    inner: T,
    /// Retries after the first attempt before giving up.
    max_retries: usize,
    /// Initial delay between retries (doubles with each attempt).
    base_delay: Duration,
    /// Upper bound for the exponential part of the delay.
    max_delay: Duration,
    /// Upper bound for the random jitter added on top.
    max_jitter: Duration,
}

impl<T> RetryFetch<T>
where
    T: PageSource,
{
    /// Wrap `inner`, retrying transient failures up to `max_retries` times.
    ///
    /// The delay cap defaults to 30 seconds and the jitter to 250 ms.
    ///
    /// # Arguments
    ///
    /// * `inner` - The page source to wrap
    /// * `max_retries` - Retries after the first attempt (`fetch_retries`, default 3)
    /// * `base_delay` - Delay before the first retry (`retry_base_delay_ms`, default 1 s)
    ///
    /// # Example
    ///
    /// ```ignore
    /// let news = NewsApiClient::new(http, url, api_key, "en".to_string());
    /// let source = RetryFetch::new(news, 3, Duration::from_secs(1));
    /// let page = source.fetch_page(&query, None).await?;
    /// ```
    pub fn new(inner: T, max_retries: usize, base_delay: Duration) -> Self {
        Self {
            inner,
            max_retries,
            base_delay,
            max_delay: Duration::from_secs(30),
            max_jitter: Duration::from_millis(250),
        }
    }

    #[cfg(test)]
    #[must_use]
    pub fn with_max_jitter(mut self, max_jitter: Duration) -> Self {
        self.max_jitter = max_jitter;
        self
    }

    fn delay_for(&self, attempt: usize) -> Duration {
        let exp = u32::try_from(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        let delay = self
            .base_delay
            .saturating_mul(2u32.saturating_pow(exp))
            .min(self.max_delay);
        let jitter_ms = u64::try_from(self.max_jitter.as_millis()).unwrap_or(u64::MAX);
        delay + Duration::from_millis(rng().random_range(0..=jitter_ms))
    }
}

impl<T> fmt::Debug for RetryFetch<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryFetch")
            .field("max_retries", &self.max_retries)
            .field("base_delay", &self.base_delay)
            .field("max_delay", &self.max_delay)
            .field("max_jitter", &self.max_jitter)
            .finish()
    }
}

impl<T> PageSource for RetryFetch<T>
where
    T: PageSource,
{
    #[instrument(level = "debug", skip_all, fields(topic = %query.topic, page = page_token.unwrap_or("1")))]
    async fn fetch_page(
        &self,
        query: &PageQuery,
        page_token: Option<&str>,
    ) -> Result<Page, FetchError> {
        let total_t0 = Instant::now();
        let mut attempt = 0usize;

        loop {
            let attempt_t0 = Instant::now();
            match self.inner.fetch_page(query, page_token).await {
                Ok(page) => return Ok(page),
                Err(e) if !e.is_transient() => return Err(e),
                Err(e) => {
                    attempt += 1;
                    let elapsed_ms_attempt = attempt_t0.elapsed().as_millis();
                    let elapsed_ms_total = total_t0.elapsed().as_millis();

                    if attempt > self.max_retries {
                        error!(
                            attempt,
                            max = self.max_retries,
                            elapsed_ms_attempt,
                            elapsed_ms_total,
                            error = %e,
                            "fetch_page() exhausted retries"
                        );
                        return Err(e);
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        attempt,
                        max = self.max_retries,
                        elapsed_ms_attempt,
                        elapsed_ms_total,
                        ?delay,
                        error = %e,
                        "fetch_page() attempt failed; backing off"
                    );
                    sleep(delay).await;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::tests::{ScriptedSource, article, query};
    use crate::news_api::NewsApiClient;
    use reqwest::StatusCode;
    use secrecy::SecretString;
    use serde_json::json;
    use url::Url;
    use wiremock::{Mock, MockServer, ResponseTemplate, matchers::method};

    fn server_error() -> FetchError {
        FetchError::Status {
            status: StatusCode::INTERNAL_SERVER_ERROR,
            body: "boom".to_string(),
        }
    }

    fn ok_page() -> Page {
        Page {
            articles: vec![article("a", "climate", 2)],
            next_page_token: None,
        }
    }

    fn retrying(source: ScriptedSource, max_retries: usize) -> RetryFetch<ScriptedSource> {
        RetryFetch::new(source, max_retries, Duration::from_millis(1))
            .with_max_jitter(Duration::ZERO)
    }

    #[tokio::test]
    async fn test_retries_same_page_until_success() {
        let source = ScriptedSource::new(vec![Err(server_error()), Err(server_error()), Ok(ok_page())]);
        let retry = retrying(source, 3);

        let page = retry.fetch_page(&query("climate"), Some("4")).await.unwrap();
        assert_eq!(page.articles.len(), 1);
        assert_eq!(
            *retry.inner.requested.borrow(),
            vec![Some("4".to_string()); 3]
        );
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let source = ScriptedSource::new(vec![
            Err(server_error()),
            Err(server_error()),
            Err(server_error()),
            Ok(ok_page()),
        ]);
        let retry = retrying(source, 2);

        let err = retry.fetch_page(&query("climate"), None).await.unwrap_err();
        assert!(matches!(err, FetchError::Status { .. }));
        assert_eq!(retry.inner.requested.borrow().len(), 3);
    }

    #[tokio::test]
    async fn test_client_errors_are_not_retried() {
        let source = ScriptedSource::new(vec![
            Err(FetchError::Status {
                status: StatusCode::UNAUTHORIZED,
                body: "bad key".to_string(),
            }),
            Ok(ok_page()),
        ]);
        let retry = retrying(source, 5);

        let err = retry.fetch_page(&query("climate"), None).await.unwrap_err();
        assert!(!err.is_transient());
        assert_eq!(retry.inner.requested.borrow().len(), 1);
    }

    #[test]
    fn test_delay_doubles_and_is_capped() {
        let retry = RetryFetch::new(ScriptedSource::default(), 10, Duration::from_secs(1))
            .with_max_jitter(Duration::ZERO);
        assert_eq!(retry.delay_for(1), Duration::from_secs(1));
        assert_eq!(retry.delay_for(2), Duration::from_secs(2));
        assert_eq!(retry.delay_for(4), Duration::from_secs(8));
        assert_eq!(retry.delay_for(6), Duration::from_secs(30));
        assert_eq!(retry.delay_for(64), Duration::from_secs(30));
    }

    #[tokio::test]
    async fn test_timeouts_are_retried() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"status": "ok", "totalResults": 0, "articles": []}))
                    .set_delay(Duration::from_millis(500)),
            )
            .expect(3)
            .mount(&server)
            .await;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(50))
            .build()
            .unwrap();
        let news = NewsApiClient::new(
            http,
            Url::parse(&format!("{}/v2/everything", server.uri())).unwrap(),
            SecretString::new("test-token".to_string()),
            "en".to_string(),
        );
        let retry = RetryFetch::new(news, 2, Duration::from_millis(1))
            .with_max_jitter(Duration::ZERO);

        let err = retry.fetch_page(&query("climate"), None).await.unwrap_err();
        match &err {
            FetchError::Request(e) => assert!(e.is_timeout()),
            other => panic!("unexpected error: {other:?}"),
        }
        assert!(err.is_transient());
        assert_eq!(server.received_requests().await.unwrap().len(), 3);
    }
}
