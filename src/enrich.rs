//! Best-effort linguistic enrichment via the Tabula Lingua analysis API.
//!
//! Each article body is posted once; there is no retry. The raw document
//! scores are folded into [`LinguisticMetrics`]:
//!
//! | metric | derived from |
//! |--------|--------------|
//! | `red`, `blue` | copied |
//! | `clarity` | `1 - delta` |
//! | `insecurity` | mean of `rvs.crt`, `rvs.bnd` |
//! | `apathy` | mean of `rvs.avr`, `rvs.sep` |
//! | `disfunction` | mean of `rvs.det`, `rvs.iso` |
//! | `regret` | mean of `rvs.rej`, `rvs.ign` |
//! | `involvement` | copied when reported |

use crate::error::EnrichmentError;
use crate::models::LinguisticMetrics;
use reqwest::header::ACCEPT;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use serde_json::json;
use tracing::instrument;
use url::Url;

/// Anything that can score a piece of text.
pub trait Enricher {
    async fn analyze(&self, text: &str) -> Result<LinguisticMetrics, EnrichmentError>;

    /// Whether [`Enricher::analyze`] should be called at all.
    fn is_enabled(&self) -> bool {
        true
    }
}

/// `None` disables enrichment without changing the pipeline's types.
impl<T: Enricher> Enricher for Option<T> {
    async fn analyze(&self, text: &str) -> Result<LinguisticMetrics, EnrichmentError> {
        match self {
            Some(inner) => inner.analyze(text).await,
            None => Err(EnrichmentError::Disabled),
        }
    }

    fn is_enabled(&self) -> bool {
        self.is_some()
    }
}

/// Client for the Tabula Lingua `standard` analysis endpoint.
pub struct TabulaClient {
    client: reqwest::Client,
    url: Url,
    api_key: SecretString,
}

impl TabulaClient {
    pub fn new(client: reqwest::Client, url: Url, api_key: SecretString) -> Self {
        Self {
            client,
            url,
            api_key,
        }
    }
}

#[derive(Debug, Deserialize)]
struct AnalysisResponse {
    data: AnalysisData,
}

#[derive(Debug, Deserialize)]
struct AnalysisData {
    document: Document,
}

#[derive(Debug, Deserialize)]
struct Document {
    red: f64,
    blue: f64,
    delta: f64,
    rvs: Rvs,
    involvement: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct Rvs {
    crt: f64,
    bnd: f64,
    avr: f64,
    sep: f64,
    det: f64,
    iso: f64,
    rej: f64,
    ign: f64,
}

impl From<Document> for LinguisticMetrics {
    fn from(doc: Document) -> Self {
        let rvs = doc.rvs;
        LinguisticMetrics {
            red: doc.red,
            blue: doc.blue,
            clarity: 1.0 - doc.delta,
            insecurity: (rvs.crt + rvs.bnd) / 2.0,
            apathy: (rvs.avr + rvs.sep) / 2.0,
            disfunction: (rvs.det + rvs.iso) / 2.0,
            regret: (rvs.rej + rvs.ign) / 2.0,
            involvement: doc.involvement,
        }
    }
}

impl Enricher for TabulaClient {
    #[instrument(level = "debug", skip_all, fields(bytes = text.len()))]
    async fn analyze(&self, text: &str) -> Result<LinguisticMetrics, EnrichmentError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(EnrichmentError::BlankText);
        }

        let body = json!({
            "config": {"include_segments": false},
            "text": text,
        });
        let response = self
            .client
            .post(self.url.clone())
            .header("Auth", self.api_key.expose_secret().as_str())
            .header(ACCEPT, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(EnrichmentError::Request)?;

        let status = response.status();
        if !status.is_success() {
            return Err(EnrichmentError::Status(status));
        }
        let raw = response.bytes().await.map_err(EnrichmentError::Request)?;
        let parsed: AnalysisResponse =
            serde_json::from_slice(&raw).map_err(EnrichmentError::Decoding)?;
        Ok(parsed.data.document.into())
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use wiremock::{
        Mock, MockServer, ResponseTemplate,
        matchers::{body_json, header, method, path},
    };

    pub(crate) fn analysis_body() -> serde_json::Value {
        json!({
            "data": {
                "document": {
                    "red": 0.25,
                    "blue": 0.75,
                    "delta": 0.2,
                    "rvs": {
                        "crt": 0.1, "bnd": 0.3,
                        "avr": 0.2, "sep": 0.4,
                        "det": 0.5, "iso": 0.7,
                        "rej": 0.0, "ign": 1.0
                    }
                }
            }
        })
    }

    fn client(server: &MockServer) -> TabulaClient {
        TabulaClient::new(
            reqwest::Client::new(),
            Url::parse(&format!("{}/v0/standard/", server.uri())).unwrap(),
            SecretString::new("tl-key".to_string()),
        )
    }

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[tokio::test]
    async fn test_analyze_maps_document_scores() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v0/standard/"))
            .and(header("Auth", "tl-key"))
            .and(body_json(json!({
                "config": {"include_segments": false},
                "text": "Some article text"
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(analysis_body()))
            .expect(1)
            .mount(&server)
            .await;

        let m = client(&server).analyze("  Some article text\n").await.unwrap();
        assert!(close(m.red, 0.25));
        assert!(close(m.blue, 0.75));
        assert!(close(m.clarity, 0.8));
        assert!(close(m.insecurity, 0.2));
        assert!(close(m.apathy, 0.3));
        assert!(close(m.disfunction, 0.6));
        assert!(close(m.regret, 0.5));
        assert_eq!(m.involvement, None);
    }

    #[tokio::test]
    async fn test_blank_text_skips_the_call() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(analysis_body()))
            .expect(0)
            .mount(&server)
            .await;

        let err = client(&server).analyze("   ").await.unwrap_err();
        assert!(matches!(err, EnrichmentError::BlankText));
    }

    #[tokio::test]
    async fn test_failures_are_reported() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v0/standard/"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;
        let err = client(&server).analyze("text").await.unwrap_err();
        assert!(matches!(err, EnrichmentError::Status(s) if s.as_u16() == 500));

        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"data": {}})))
            .mount(&server)
            .await;
        let err = client(&server).analyze("text").await.unwrap_err();
        assert!(matches!(err, EnrichmentError::Decoding(_)));
    }

    #[tokio::test]
    async fn test_disabled_enricher() {
        let none: Option<TabulaClient> = None;
        assert!(!none.is_enabled());
        assert!(matches!(
            none.analyze("text").await,
            Err(EnrichmentError::Disabled)
        ));
    }
}
