use std::time::Duration;

use futures::StreamExt;
use reqwest::header::{ACCEPT, CACHE_CONTROL};
use snafu::ResultExt;

use super::chunk::ChatRequest;
use super::error::{BodySnafu, BuildClientSnafu, HttpSnafu, TransportResult};
use super::transport::{BoxFuture, ByteStream, Transport, TransportResponse};

pub const EVENT_STREAM_CONTENT_TYPE: &str = "text/event-stream";

/// Backoff applied to connection failures before any response arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            base_delay: Duration::ZERO,
        }
    }

    /// Delay before retrying after failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1_u32 << exponent)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpTransportConfig {
    /// Absolute URL the chat request is posted to.
    pub endpoint: String,
    pub request_timeout: Option<Duration>,
    pub retry: RetryPolicy,
}

impl HttpTransportConfig {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: endpoint.into().trim().to_string(),
            request_timeout: None,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = Some(timeout);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }
}

/// [`Transport`] that posts the request as JSON and streams the response body.
pub struct HttpTransport {
    client: reqwest::Client,
    config: HttpTransportConfig,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> TransportResult<Self> {
        let mut builder = reqwest::Client::builder();
        if let Some(timeout) = config.request_timeout {
            builder = builder.timeout(timeout);
        }

        let client = builder.build().context(BuildClientSnafu {
            stage: "build-http-client",
        })?;

        Ok(Self { client, config })
    }

    pub fn endpoint(&self) -> &str {
        &self.config.endpoint
    }

    async fn send_once(&self, request: &ChatRequest) -> TransportResult<reqwest::Response> {
        self.client
            .post(self.config.endpoint.as_str())
            .header(ACCEPT, EVENT_STREAM_CONTENT_TYPE)
            .header(CACHE_CONTROL, "no-cache")
            .json(request)
            .send()
            .await
            .context(HttpSnafu {
                stage: "send-chat-request",
                url: self.config.endpoint.clone(),
            })
    }

    async fn open_with_retry(&self, request: ChatRequest) -> TransportResult<TransportResponse> {
        let mut attempt = 1;

        loop {
            match self.send_once(&request).await {
                Ok(response) => {
                    let status = response.status().as_u16();
                    tracing::debug!(
                        endpoint = %self.config.endpoint,
                        status,
                        attempt,
                        "chat request answered"
                    );

                    let body: ByteStream = Box::pin(response.bytes_stream().map(|chunk| {
                        chunk.context(BodySnafu {
                            stage: "read-response-chunk",
                        })
                    }));
                    return Ok(TransportResponse::new(status, Some(body)));
                }
                Err(error) if error.is_retryable() && attempt < self.config.retry.max_attempts => {
                    let delay = self.config.retry.delay_for(attempt);
                    tracing::warn!(
                        endpoint = %self.config.endpoint,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %error,
                        "chat request failed to connect; retrying"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(error) => return Err(error),
            }
        }
    }
}

impl Transport for HttpTransport {
    fn open<'a>(&'a self, request: ChatRequest) -> BoxFuture<'a, TransportResult<TransportResponse>> {
        Box::pin(self.open_with_retry(request))
    }
}
