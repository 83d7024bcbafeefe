//! Upstream trace source: the HTTP span API.

use crate::error::TraceSourceError;
use crate::span::SpanPage;
use async_trait::async_trait;
use config::SyncConfig;
use reqwest::Url;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, instrument};

/// Paginated read access to recorded spans.
#[async_trait]
pub trait TraceSource: Send + Sync {
    async fn fetch_page(
        &self,
        project: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<SpanPage, TraceSourceError>;
}

/// Reads `GET {base}/v1/projects/{project}/spans?limit=..&cursor=..`.
pub struct HttpTraceSource {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTraceSource {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, TraceSourceError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TraceSourceError::Request {
                reason: e.to_string(),
            })?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    pub fn from_config(config: &SyncConfig) -> Result<Self, TraceSourceError> {
        Self::new(
            config.trace_source_url.clone(),
            Duration::from_millis(config.request_timeout_ms),
        )
    }

    fn spans_url(
        &self,
        project: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<Url, TraceSourceError> {
        let mut url = Url::parse(&self.base_url).map_err(|e| TraceSourceError::Request {
            reason: format!("invalid trace source url `{}`: {e}", self.base_url),
        })?;
        url.path_segments_mut()
            .map_err(|_| TraceSourceError::Request {
                reason: format!("trace source url `{}` cannot be a base", self.base_url),
            })?
            .pop_if_empty()
            .extend(["v1", "projects", project, "spans"]);
        {
            let mut query = url.query_pairs_mut();
            query.append_pair("limit", &limit.to_string());
            if let Some(cursor) = cursor {
                query.append_pair("cursor", cursor);
            }
        }
        Ok(url)
    }
}

#[async_trait]
impl TraceSource for HttpTraceSource {
    #[instrument(skip(self), fields(base_url = %self.base_url))]
    async fn fetch_page(
        &self,
        project: &str,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<SpanPage, TraceSourceError> {
        let url = self.spans_url(project, limit, cursor)?;
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| TraceSourceError::Request {
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TraceSourceError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let body: Value = response.json().await.map_err(|e| TraceSourceError::Decode {
            reason: e.to_string(),
        })?;
        let page = SpanPage::from_value(&body).ok_or_else(|| TraceSourceError::Decode {
            reason: "response has no `data` array".to_string(),
        })?;

        debug!(spans = page.spans.len(), next = ?page.next_cursor, "Fetched span page");
        Ok(page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_spans_url() {
        let source = HttpTraceSource::new("http://traces:6006/", Duration::from_secs(1)).unwrap();
        let url = source.spans_url("my project", 50, Some("abc=")).unwrap();
        assert_eq!(
            url.as_str(),
            "http://traces:6006/v1/projects/my%20project/spans?limit=50&cursor=abc%3D"
        );

        let source = HttpTraceSource::new("http://host/prefix", Duration::from_secs(1)).unwrap();
        let url = source.spans_url("default", 10, None).unwrap();
        assert_eq!(url.as_str(), "http://host/prefix/v1/projects/default/spans?limit=10");
    }
}
