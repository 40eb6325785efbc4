//! reqwest-backed [`SourceFetcher`].

use std::time::Duration;

use async_trait::async_trait;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};

use super::SourceFetcher;
use crate::config::SourceConfig;
use crate::error::SourceError;
use crate::sanitize::redact_url;

pub struct HttpSource {
    client: reqwest::Client,
    max_attachment_bytes: u64,
}

impl HttpSource {
    pub fn new(config: &SourceConfig) -> Result<Self, SourceError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("ko-KR,ko;q=0.9"));

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent(config.user_agent.as_str())
            .default_headers(headers)
            .redirect(reqwest::redirect::Policy::limited(5))
            .build()
            .map_err(|source| SourceError::Http {
                url: String::new(),
                source,
            })?;

        Ok(Self {
            client,
            max_attachment_bytes: config.max_attachment_bytes,
        })
    }

    async fn get(&self, url: &str) -> Result<reqwest::Response, SourceError> {
        let parsed = reqwest::Url::parse(url).map_err(|e| SourceError::InvalidUrl {
            url: redact_url(url),
            reason: e.to_string(),
        })?;

        let response = self
            .client
            .get(parsed)
            .send()
            .await
            .map_err(|e| request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(SourceError::Status {
                url: redact_url(url),
                status: status.as_u16(),
            });
        }

        Ok(response)
    }
}

fn request_error(url: &str, source: reqwest::Error) -> SourceError {
    if source.is_timeout() {
        SourceError::Timeout {
            url: redact_url(url),
        }
    } else {
        SourceError::Http {
            url: redact_url(url),
            source,
        }
    }
}

#[async_trait]
impl SourceFetcher for HttpSource {
    async fn fetch_detail(&self, url: &str) -> Result<String, SourceError> {
        tracing::debug!(url = %redact_url(url), "Fetching detail page");
        let response = self.get(url).await?;
        response.text().await.map_err(|e| request_error(url, e))
    }

    async fn fetch_attachment(&self, url: &str) -> Result<Vec<u8>, SourceError> {
        tracing::debug!(url = %redact_url(url), "Downloading attachment");
        let limit = self.max_attachment_bytes;
        let mut response = self.get(url).await?;

        if response.content_length().is_some_and(|len| len > limit) {
            return Err(SourceError::TooLarge {
                url: redact_url(url),
                limit,
            });
        }

        // Content-Length may be missing or wrong, so the limit is enforced
        // while streaming too.
        let mut bytes = Vec::new();
        while let Some(chunk) = response.chunk().await.map_err(|e| request_error(url, e))? {
            if bytes.len() as u64 + chunk.len() as u64 > limit {
                return Err(SourceError::TooLarge {
                    url: redact_url(url),
                    limit,
                });
            }
            bytes.extend_from_slice(&chunk);
        }

        Ok(bytes)
    }
}
