//! Sync configuration: a YAML file merged with secrets from the environment.
//!
//! The file carries everything that is safe to commit (topics, paging,
//! endpoints, tuning knobs). API keys only ever come from the command line or
//! the environment, see [`crate::cli::SyncArgs`].
//!
//! ```yaml
//! topics: ["climate", "energy transition"]
//! page_size: 20
//! max_pages: 5
//! enrichment_concurrency: 4
//! ```

use crate::error::ConfigError;
use chrono::TimeDelta;
use itertools::Itertools;
use secrecy::SecretString;
use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;
use tracing::{debug, instrument};
use url::Url;

pub const DEFAULT_NEWS_API_URL: &str = "https://newsapi.org/v2/everything";
pub const DEFAULT_ENRICHMENT_URL: &str = "https://app.tabulalingua.com/v0/standard/";

/// NewsAPI refuses page sizes above this.
const MAX_PAGE_SIZE: usize = 100;

/// Settings as written in the YAML file. Every field is optional.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub topics: Vec<String>,
    pub page_size: Option<usize>,
    pub max_pages: Option<usize>,
    pub language: Option<String>,
    pub news_api_url: Option<String>,
    pub enrichment_url: Option<String>,
    pub enrichment_concurrency: Option<usize>,
    pub request_timeout_secs: Option<u64>,
    pub fetch_retries: Option<usize>,
    pub retry_base_delay_ms: Option<u64>,
    pub initial_lookback_days: Option<i64>,
    /// Stop paging once this many results were requested. `0` disables the cap.
    pub result_cap: Option<usize>,
}

impl FileConfig {
    /// Load a YAML config file.
    #[instrument(level = "info", skip_all, fields(path = %path.display()))]
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let file: FileConfig = serde_yaml::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(?file, "Loaded config file");
        Ok(file)
    }
}

/// Values that override or complement the file, typically from env vars.
#[derive(Debug, Default)]
pub struct Overrides {
    pub news_api_key: Option<String>,
    pub enrichment_api_key: Option<String>,
    /// Either a JSON list (`["a","b"]`) or a comma separated list.
    pub topics: Option<String>,
    pub page_size: Option<usize>,
    pub max_pages: Option<usize>,
}

/// Immutable configuration handed to the sync pipeline.
#[derive(Debug)]
pub struct SyncConfig {
    pub news_api_key: SecretString,
    /// Enrichment is disabled when absent.
    pub enrichment_api_key: Option<SecretString>,
    pub topics: Vec<String>,
    pub page_size: usize,
    pub max_pages: usize,
    pub language: String,
    pub news_api_url: Url,
    pub enrichment_url: Url,
    pub enrichment_concurrency: usize,
    pub request_timeout: Duration,
    pub fetch_retries: usize,
    pub retry_base_delay: Duration,
    pub initial_lookback: TimeDelta,
    pub result_cap: Option<usize>,
}

impl SyncConfig {
    /// Merge file settings with overrides and validate the result.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Missing`] when the news API key or the topic list is
    /// absent, [`ConfigError::Invalid`] for out-of-range values.
    pub fn build(file: FileConfig, overrides: Overrides) -> Result<Self, ConfigError> {
        let news_api_key = overrides
            .news_api_key
            .filter(|k| !k.trim().is_empty())
            .ok_or(ConfigError::Missing("news_api_key"))?;
        let enrichment_api_key = overrides
            .enrichment_api_key
            .filter(|k| !k.trim().is_empty())
            .map(SecretString::new);

        let topics = match overrides.topics {
            Some(raw) => parse_topics(&raw)?,
            None => clean_topics(file.topics),
        };
        if topics.is_empty() {
            return Err(ConfigError::Missing("topics"));
        }

        let page_size = overrides.page_size.or(file.page_size).unwrap_or(20);
        if page_size == 0 || page_size > MAX_PAGE_SIZE {
            return Err(ConfigError::Invalid {
                field: "page_size",
                reason: format!("must be between 1 and {MAX_PAGE_SIZE}, got {page_size}"),
            });
        }

        let max_pages = overrides.max_pages.or(file.max_pages).unwrap_or(10);
        if max_pages == 0 {
            return Err(ConfigError::Invalid {
                field: "max_pages",
                reason: "must be at least 1".to_string(),
            });
        }

        let enrichment_concurrency = file.enrichment_concurrency.unwrap_or(4);
        if enrichment_concurrency == 0 {
            return Err(ConfigError::Invalid {
                field: "enrichment_concurrency",
                reason: "must be at least 1".to_string(),
            });
        }

        let initial_lookback_days = file.initial_lookback_days.unwrap_or(2);
        if initial_lookback_days < 0 {
            return Err(ConfigError::Invalid {
                field: "initial_lookback_days",
                reason: "must not be negative".to_string(),
            });
        }
        let initial_lookback = TimeDelta::try_days(initial_lookback_days).ok_or_else(|| {
            ConfigError::Invalid {
                field: "initial_lookback_days",
                reason: format!("{initial_lookback_days} days is out of range"),
            }
        })?;

        let request_timeout_secs = file.request_timeout_secs.unwrap_or(30);
        if request_timeout_secs == 0 {
            return Err(ConfigError::Invalid {
                field: "request_timeout_secs",
                reason: "must be at least 1".to_string(),
            });
        }

        Ok(SyncConfig {
            news_api_key: SecretString::new(news_api_key),
            enrichment_api_key,
            topics,
            page_size,
            max_pages,
            language: file.language.unwrap_or_else(|| "en".to_string()),
            news_api_url: parse_url(
                "news_api_url",
                file.news_api_url.as_deref().unwrap_or(DEFAULT_NEWS_API_URL),
            )?,
            enrichment_url: parse_url(
                "enrichment_url",
                file.enrichment_url.as_deref().unwrap_or(DEFAULT_ENRICHMENT_URL),
            )?,
            enrichment_concurrency,
            request_timeout: Duration::from_secs(request_timeout_secs),
            fetch_retries: file.fetch_retries.unwrap_or(3),
            retry_base_delay: Duration::from_millis(file.retry_base_delay_ms.unwrap_or(1000)),
            initial_lookback,
            result_cap: match file.result_cap.unwrap_or(100) {
                0 => None,
                cap => Some(cap),
            },
        })
    }

    /// Build the shared HTTP client with the configured per-call timeout.
    pub fn http_client(&self) -> Result<reqwest::Client, ConfigError> {
        reqwest::Client::builder()
            .timeout(self.request_timeout)
            .user_agent(concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(ConfigError::HttpClient)
    }
}

fn parse_url(field: &'static str, raw: &str) -> Result<Url, ConfigError> {
    Url::parse(raw).map_err(|e| ConfigError::Invalid {
        field,
        reason: e.to_string(),
    })
}

/// Parse a topic list given either as a JSON array or comma separated.
pub fn parse_topics(raw: &str) -> Result<Vec<String>, ConfigError> {
    let raw = raw.trim();
    let topics = if raw.starts_with('[') {
        serde_json::from_str::<Vec<String>>(raw).map_err(|e| ConfigError::Invalid {
            field: "topics",
            reason: e.to_string(),
        })?
    } else {
        raw.split(',').map(str::to_string).collect()
    };
    Ok(clean_topics(topics))
}

/// Trim, drop blanks and duplicates, keep first-seen order.
fn clean_topics(topics: Vec<String>) -> Vec<String> {
    topics
        .into_iter()
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
        .unique()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    fn overrides() -> Overrides {
        Overrides {
            news_api_key: Some("news-key".to_string()),
            topics: Some("climate".to_string()),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults() {
        let conf = SyncConfig::build(FileConfig::default(), overrides()).unwrap();
        assert_eq!(conf.news_api_key.expose_secret(), "news-key");
        assert!(conf.enrichment_api_key.is_none());
        assert_eq!(conf.topics, vec!["climate"]);
        assert_eq!(conf.page_size, 20);
        assert_eq!(conf.max_pages, 10);
        assert_eq!(conf.language, "en");
        assert_eq!(conf.news_api_url.as_str(), DEFAULT_NEWS_API_URL);
        assert_eq!(conf.result_cap, Some(100));
        assert_eq!(conf.initial_lookback, TimeDelta::days(2));
    }

    #[test]
    fn test_missing_news_key_is_config_error() {
        let mut o = overrides();
        o.news_api_key = Some("   ".to_string());
        let err = SyncConfig::build(FileConfig::default(), o).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("news_api_key")));
    }

    #[test]
    fn test_missing_topics_is_config_error() {
        let mut o = overrides();
        o.topics = None;
        let err = SyncConfig::build(FileConfig::default(), o).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("topics")));
    }

    #[test]
    fn test_page_size_bounds() {
        let mut o = overrides();
        o.page_size = Some(101);
        let err = SyncConfig::build(FileConfig::default(), o).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "page_size", .. }));
    }

    #[test]
    fn test_lookback_out_of_range_is_config_error() {
        for days in [200_000_000_000_i64, i64::MAX / 2, -1] {
            let file = FileConfig {
                initial_lookback_days: Some(days),
                ..Default::default()
            };
            let err = SyncConfig::build(file, overrides()).unwrap_err();
            assert!(
                matches!(err, ConfigError::Invalid { field: "initial_lookback_days", .. }),
                "{days} days accepted"
            );
        }
    }

    #[test]
    fn test_zero_request_timeout_is_rejected() {
        let file = FileConfig {
            request_timeout_secs: Some(0),
            ..Default::default()
        };
        let err = SyncConfig::build(file, overrides()).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "request_timeout_secs", .. }));
    }

    #[test]
    fn test_overrides_win_over_file() {
        let file: FileConfig = serde_yaml::from_str(
            "topics: [energy]\npage_size: 50\nmax_pages: 3\nresult_cap: 0\n",
        )
        .unwrap();
        let mut o = overrides();
        o.page_size = Some(2);
        o.enrichment_api_key = Some("tl".to_string());
        let conf = SyncConfig::build(file, o).unwrap();
        assert_eq!(conf.topics, vec!["climate"]);
        assert_eq!(conf.page_size, 2);
        assert_eq!(conf.max_pages, 3);
        assert_eq!(conf.result_cap, None);
        assert!(conf.enrichment_api_key.is_some());
    }

    #[test]
    fn test_unknown_yaml_keys_are_rejected() {
        let res = serde_yaml::from_str::<FileConfig>("topic: climate\n");
        assert!(res.is_err());
    }

    #[test]
    fn test_parse_topics_json_and_csv() {
        assert_eq!(
            parse_topics(r#"["climate", " ai ", "", "climate"]"#).unwrap(),
            vec!["climate", "ai"]
        );
        assert_eq!(parse_topics("climate, ai,,").unwrap(), vec!["climate", "ai"]);
        assert!(parse_topics("[not json").is_err());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("sync.yaml");
        fs::write(&path, "topics:\n  - climate\nenrichment_concurrency: 8\n").unwrap();
        let file = FileConfig::load(&path).unwrap();
        assert_eq!(file.topics, vec!["climate"]);
        assert_eq!(file.enrichment_concurrency, Some(8));

        let err = FileConfig::load(&dir.path().join("missing.yaml")).unwrap_err();
        assert!(matches!(err, ConfigError::Read { .. }));
    }
}
