//! NewsAPI `everything` endpoint client.
//!
//! Sends `GET {url}?q=…&from=…&to=…&language=…&sortBy=publishedAt&pageSize=…&page=…`
//! with a bearer token. Page tokens are page numbers. When the response does
//! not carry an explicit `nextPageToken`, the next page is derived from
//! `totalResults` and the optional result cap (the developer tier stops
//! serving after 100 results).

use crate::error::FetchError;
use crate::fetch::{Page, PageQuery, PageSource};
use crate::models::Article;
use crate::utils::truncate_for_log;
use chrono::{DateTime, Utc};
use reqwest::header::ACCEPT;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::{debug, instrument, warn};
use url::Url;

const TIMESTAMP_FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

/// Client for a NewsAPI-compatible search endpoint.
pub struct NewsApiClient {
    client: reqwest::Client,
    url: Url,
    api_key: SecretString,
    language: String,
    result_cap: Option<usize>,
}

impl NewsApiClient {
    pub fn new(client: reqwest::Client, url: Url, api_key: SecretString, language: String) -> Self {
        Self {
            client,
            url,
            api_key,
            language,
            result_cap: None,
        }
    }

    /// Stop paging once `cap` results have been requested.
    #[must_use]
    pub fn with_result_cap(mut self, cap: Option<usize>) -> Self {
        self.result_cap = cap;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Response {
    #[serde(default)]
    status: Option<String>,
    code: Option<String>,
    message: Option<String>,
    total_results: Option<usize>,
    #[serde(default)]
    articles: Vec<serde_json::Value>,
    next_page_token: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawArticle {
    id: Option<String>,
    source: RawSource,
    author: Option<String>,
    title: Option<String>,
    description: Option<String>,
    url: String,
    published_at: DateTime<Utc>,
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RawSource {
    name: Option<String>,
}

impl RawArticle {
    fn into_article(self, topic: &str) -> Article {
        Article {
            id: self.id.unwrap_or_else(|| self.url.clone()),
            topic: topic.to_string(),
            source_name: self.source.name.unwrap_or_default(),
            published_at: self.published_at,
            author: self.author,
            title: self.title.unwrap_or_default(),
            description: self.description,
            body: self.content,
            url: self.url,
        }
    }
}

/// Token of the page after `page`, derived from the reported total.
fn derive_next_token(
    page: &str,
    page_size: usize,
    total_results: Option<usize>,
    result_cap: Option<usize>,
) -> Option<String> {
    let current: usize = page.parse().ok()?;
    let requested = current.saturating_mul(page_size);
    if requested >= total_results? {
        return None;
    }
    if result_cap.is_some_and(|cap| requested >= cap) {
        return None;
    }
    Some((current + 1).to_string())
}

impl PageSource for NewsApiClient {
    #[instrument(level = "info", skip_all, fields(topic = %query.topic, page = page_token.unwrap_or("1")))]
    async fn fetch_page(
        &self,
        query: &PageQuery,
        page_token: Option<&str>,
    ) -> Result<Page, FetchError> {
        let page = page_token.unwrap_or("1");
        let from = query.from.format(TIMESTAMP_FORMAT).to_string();
        let to = query.to.format(TIMESTAMP_FORMAT).to_string();
        let page_size = query.page_size.to_string();

        let response = self
            .client
            .get(self.url.clone())
            .bearer_auth(self.api_key.expose_secret())
            .header(ACCEPT, "application/json")
            .query(&[
                ("q", query.topic.as_str()),
                ("from", from.as_str()),
                ("to", to.as_str()),
                ("language", self.language.as_str()),
                ("sortBy", "publishedAt"),
                ("pageSize", page_size.as_str()),
                ("page", page),
            ])
            .send()
            .await
            .map_err(FetchError::Request)?;

        let status = response.status();
        let raw = response.bytes().await.map_err(FetchError::Request)?;
        if !status.is_success() {
            return Err(FetchError::Status {
                status,
                body: truncate_for_log(&String::from_utf8_lossy(&raw), 300),
            });
        }

        let body: Response = serde_json::from_slice(&raw).map_err(FetchError::Decoding)?;
        if body.status.as_deref() == Some("error") {
            return Err(FetchError::Api {
                code: body.code.unwrap_or_else(|| "unknown".to_string()),
                message: body.message.unwrap_or_default(),
            });
        }

        let received = body.articles.len();
        let articles: Vec<Article> = body
            .articles
            .into_iter()
            .filter_map(|value| match serde_json::from_value::<RawArticle>(value) {
                Ok(raw) => Some(raw.into_article(&query.topic)),
                Err(e) => {
                    warn!(error = %e, "Skipping malformed article");
                    None
                }
            })
            .collect();

        let next_page_token = body.next_page_token.or_else(|| {
            derive_next_token(page, query.page_size, body.total_results, self.result_cap)
        });

        debug!(
            received,
            kept = articles.len(),
            total_results = ?body.total_results,
            ?next_page_token,
            "Decoded news page"
        );
        Ok(Page {
            articles,
            next_page_token,
        })
    }
}
