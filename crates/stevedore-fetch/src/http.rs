//! HTTP bundle fetcher

use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use stevedore_core::BundleSource;
use tracing::debug;

use crate::error::{FetchError, Result};
use crate::BundleFetcher;

/// Fetches chart archives over HTTP(S)
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    /// Build a fetcher with a total per-request timeout
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Transport {
                message: e.to_string(),
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl BundleFetcher for HttpFetcher {
    async fn fetch(&self, source: &BundleSource) -> Result<Vec<u8>> {
        let url = source
            .http_url()
            .ok_or_else(|| FetchError::UnsupportedSource {
                message: "source has no http location".to_string(),
            })?;

        // Reject malformed URLs before handing them to the client
        url::Url::parse(url).map_err(|e| FetchError::Transport {
            message: format!("invalid URL {}: {}", url, e),
        })?;

        debug!(url, "fetching bundle");
        let response = self.client.get(url).send().await?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Err(FetchError::NotFound {
                status: status.to_string(),
            });
        }
        if !status.is_success() {
            return Err(FetchError::Server {
                status: status.to_string(),
            });
        }

        let body = response.bytes().await?;
        debug!(url, bytes = body.len(), "bundle fetched");
        Ok(body.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stevedore_core::{HttpSource, SourceType};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn http_source(url: &str) -> BundleSource {
        BundleSource {
            source_type: SourceType::Http,
            http: Some(HttpSource {
                url: url.to_string(),
            }),
        }
    }

    fn fetcher() -> HttpFetcher {
        HttpFetcher::new(Duration::from_secs(5)).unwrap()
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/charts/hello-world-0.1.0.tgz"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"archive bytes".to_vec()))
            .mount(&server)
            .await;

        let source = http_source(&format!("{}/charts/hello-world-0.1.0.tgz", server.uri()));
        let body = fetcher().fetch(&source).await.unwrap();
        assert_eq!(body, b"archive bytes");
    }

    #[tokio::test]
    async fn test_fetch_not_found_carries_status_line() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let source = http_source(&format!("{}/missing.tgz", server.uri()));
        let err = fetcher().fetch(&source).await.unwrap_err();

        assert!(matches!(err, FetchError::NotFound { .. }));
        assert_eq!(err.to_string(), "unexpected status \"404 Not Found\"");
    }

    #[tokio::test]
    async fn test_fetch_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let source = http_source(&format!("{}/flaky.tgz", server.uri()));
        let err = fetcher().fetch(&source).await.unwrap_err();

        assert!(matches!(err, FetchError::Server { .. }));
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_fetch_rejects_sourceless_descriptor() {
        let source = BundleSource {
            source_type: SourceType::Http,
            http: None,
        };
        let err = fetcher().fetch(&source).await.unwrap_err();
        assert!(matches!(err, FetchError::UnsupportedSource { .. }));
    }

    #[tokio::test]
    async fn test_fetch_rejects_malformed_url() {
        let source = http_source("not a url");
        let err = fetcher().fetch(&source).await.unwrap_err();
        assert!(matches!(err, FetchError::Transport { .. }));
    }
}
