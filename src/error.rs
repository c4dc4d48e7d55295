//! Error types for each stage of the sync.
//!
//! Fatal and recoverable failures get separate types:
//! - [`ConfigError`] and [`FetchError`] abort a run before the cursor moves
//! - [`EnrichmentError`] is logged and swallowed per article
//! - [`StoreError`] covers the local sink and state store

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or missing configuration, detected before any request is sent.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("missing required setting `{0}`")]
    Missing(&'static str),
    #[error("invalid value for `{field}`: {reason}")]
    Invalid { field: &'static str, reason: String },
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },
    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Failure talking to the news source. Fatal to the run.
#[derive(Error, Debug)]
pub enum FetchError {
    #[error("failed to execute the request: {0}")]
    Request(#[source] reqwest::Error),
    #[error("news API returned status {status}: {body}")]
    Status {
        status: reqwest::StatusCode,
        body: String,
    },
    #[error("failed to decode the news API response: {0}")]
    Decoding(#[source] serde_json::Error),
    #[error("news API reported error `{code}`: {message}")]
    Api { code: String, message: String },
}

impl FetchError {
    /// Whether the same page is worth requesting again.
    ///
    /// Only server-side failures and network hiccups qualify; a 4xx or a body
    /// that does not decode will not get better on its own.
    pub fn is_transient(&self) -> bool {
        match self {
            FetchError::Request(e) => e.is_timeout() || e.is_connect(),
            FetchError::Status { status, .. } => status.is_server_error(),
            FetchError::Decoding(_) | FetchError::Api { .. } => false,
        }
    }
}

/// Failure calling the linguistic analysis service. Never fatal.
#[derive(Error, Debug)]
pub enum EnrichmentError {
    #[error("enrichment is disabled")]
    Disabled,
    #[error("article has no text to analyze")]
    BlankText,
    #[error("failed to execute the request: {0}")]
    Request(#[source] reqwest::Error),
    #[error("analysis API returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("failed to decode the analysis response: {0}")]
    Decoding(#[source] serde_json::Error),
}

/// Failure reading or writing the sink or the state store.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to (de)serialize {what}: {source}")]
    Serde {
        what: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("row has no primary key column `{0}`")]
    MissingPrimaryKey(String),
}

/// Anything that aborts a sync run.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("fetching topic `{topic}` failed: {source}")]
    Fetch {
        topic: String,
        #[source]
        source: FetchError,
    },
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure generating the deployment configuration or running the platform CLI.
#[derive(Error, Debug)]
pub enum DeployError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Json {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("base config {0} is not a JSON object")]
    NotAnObject(PathBuf),
    #[error("failed to read env file {path}: {source}")]
    EnvFile {
        path: PathBuf,
        #[source]
        source: dotenvy::Error,
    },
    #[error("failed to launch `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("`{program}` exited with {status}")]
    CommandFailed {
        program: String,
        status: std::process::ExitStatus,
    },
}
