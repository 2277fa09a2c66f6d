use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::header::{HeaderMap, HeaderValue, ORIGIN, REFERER};
use reqwest::{Client, RequestBuilder, Response, redirect};
use std::time::Duration;
use tracing::debug;
use url::Url;

use crate::config::UpstreamConfig;
use crate::errors::{AppError, AppResult, UpstreamError, UpstreamResult};

/// Lazily delivered response body chunks
pub type ByteStream = BoxStream<'static, UpstreamResult<Bytes>>;

/// Text body together with the URL it was finally served from
#[derive(Debug, Clone)]
pub struct OriginResponse {
    pub final_url: Url,
    pub body: String,
}

/// HTTP access to the HLS origin
///
/// Every request carries browser-like headers and, when given, the referer
/// (plus the matching `Origin` header) of the channel's landing page.
#[async_trait]
pub trait OriginClient: Send + Sync {
    async fn get_text(&self, url: &Url, referer: Option<&Url>) -> UpstreamResult<OriginResponse>;

    async fn get_bytes(&self, url: &Url, referer: Option<&Url>) -> UpstreamResult<Bytes>;

    async fn get_stream(&self, url: &Url, referer: Option<&Url>) -> UpstreamResult<ByteStream>;
}

/// `OriginClient` backed by reqwest
pub struct HttpOriginClient {
    client: Client,
    request_timeout: Duration,
}

impl HttpOriginClient {
    pub fn new(config: &UpstreamConfig) -> AppResult<Self> {
        let client = Client::builder()
            .user_agent(config.user_agent.clone())
            .redirect(redirect::Policy::limited(config.max_redirects))
            .connect_timeout(config.request_timeout)
            .build()
            .map_err(|e| AppError::configuration(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            request_timeout: config.request_timeout,
        })
    }

    fn request(&self, url: &Url, referer: Option<&Url>) -> RequestBuilder {
        let mut headers = HeaderMap::new();
        if let Some(referer) = referer {
            if let Ok(value) = HeaderValue::from_str(referer.as_str()) {
                headers.insert(REFERER, value);
            }
            if let Ok(value) = HeaderValue::from_str(&referer.origin().ascii_serialization()) {
                headers.insert(ORIGIN, value);
            }
        }
        self.client.get(url.clone()).headers(headers)
    }

    async fn send(&self, url: &Url, request: RequestBuilder) -> UpstreamResult<Response> {
        debug!(url = %url, "Origin request");
        let response = request
            .send()
            .await
            .map_err(|e| UpstreamError::from_reqwest(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UpstreamError::Unavailable {
                url: url.to_string(),
                status: Some(status.as_u16()),
                message: format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("Unknown")
                ),
            });
        }
        Ok(response)
    }
}

#[async_trait]
impl OriginClient for HttpOriginClient {
    async fn get_text(&self, url: &Url, referer: Option<&Url>) -> UpstreamResult<OriginResponse> {
        let request = self.request(url, referer).timeout(self.request_timeout);
        let response = self.send(url, request).await?;
        let final_url = response.url().clone();
        let body = response
            .text()
            .await
            .map_err(|e| UpstreamError::from_reqwest(url, e))?;
        Ok(OriginResponse { final_url, body })
    }

    async fn get_bytes(&self, url: &Url, referer: Option<&Url>) -> UpstreamResult<Bytes> {
        let request = self.request(url, referer).timeout(self.request_timeout);
        let response = self.send(url, request).await?;
        response
            .bytes()
            .await
            .map_err(|e| UpstreamError::from_reqwest(url, e))
    }

    async fn get_stream(&self, url: &Url, referer: Option<&Url>) -> UpstreamResult<ByteStream> {
        // Only the response head is bounded, the body may legitimately take
        // longer than the request timeout.
        let request = self.request(url, referer);
        let response = tokio::time::timeout(self.request_timeout, self.send(url, request))
            .await
            .map_err(|_| UpstreamError::unavailable(url, "request timed out"))??;

        let url = url.clone();
        Ok(response
            .bytes_stream()
            .map(move |chunk| chunk.map_err(|e| UpstreamError::from_reqwest(&url, e)))
            .boxed())
    }
}
