use std::time::Duration;

use reqwest::header::{ACCEPT, CACHE_CONTROL};

use crate::config::EndpointConfig;
use crate::error::TurnError;

use super::request::{error_body_message, TurnRequest};
use super::retry_policy::{retry_backoff_delay, should_retry_send_error, RETRY_MAX_ATTEMPTS};

const EVENT_STREAM: &str = "text/event-stream";
const POOL_MAX_IDLE_PER_HOST: usize = 4;
const POOL_IDLE_TIMEOUT: Duration = Duration::from_secs(90);
const ERROR_BODY_MAX_CHARS: usize = 2_000;

fn build_reqwest_client(config: &EndpointConfig) -> Result<reqwest::Client, TurnError> {
    let mut builder = reqwest::Client::builder()
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(POOL_IDLE_TIMEOUT)
        .tcp_nodelay(true)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .redirect(reqwest::redirect::Policy::none());

    if let Some(proxy_url) = config.proxy.as_deref() {
        let proxy = reqwest::Proxy::all(proxy_url)
            .map_err(|err| TurnError::Transport(format!("Invalid proxy URL: {err}")))?;
        builder = builder.no_proxy().proxy(proxy);
    } else if !config.use_env_proxy {
        builder = builder.no_proxy();
    }

    builder
        .build()
        .map_err(|err| TurnError::Transport(format!("Failed to build HTTP client: {err}")))
}

/// Render a reqwest error with its source chain; reqwest's own message
/// omits the underlying I/O cause.
fn describe_error(err: &reqwest::Error) -> String {
    let mut message = err.to_string();
    let mut source = std::error::Error::source(err);
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    if err.is_timeout() && !message.contains("timed out") {
        message.push_str(" (timed out)");
    }
    message
}

/// HTTP client for the turn endpoint.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: url::Url,
}

impl HttpTransport {
    /// Build a transport for the configured endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`TurnError::Config`] for an unparseable endpoint URL and
    /// [`TurnError::Transport`] when the HTTP client cannot be built.
    pub fn new(config: &EndpointConfig) -> Result<Self, TurnError> {
        let endpoint = url::Url::parse(&config.url)
            .map_err(|e| TurnError::Config(format!("Invalid endpoint URL '{}': {e}", config.url)))?;
        Ok(Self {
            client: build_reqwest_client(config)?,
            endpoint,
        })
    }

    #[must_use]
    pub fn endpoint(&self) -> &url::Url {
        &self.endpoint
    }

    /// Post a turn request and return the response once its status is known
    /// to be successful, ready for body streaming.
    ///
    /// Connection failures are retried with backoff before giving up.
    ///
    /// # Errors
    ///
    /// Returns [`TurnError::Transport`] when the request cannot be sent and
    /// [`TurnError::Upstream`] for a non-success status, carrying the
    /// message extracted from the error body.
    pub async fn open_turn_stream(
        &self,
        request: &TurnRequest,
        bearer_token: Option<&str>,
    ) -> Result<reqwest::Response, TurnError> {
        let mut attempt = 0;
        let response = loop {
            let mut builder = self
                .client
                .post(self.endpoint.clone())
                .header(ACCEPT, EVENT_STREAM)
                .header(CACHE_CONTROL, "no-cache")
                .json(request);
            if let Some(token) = bearer_token {
                builder = builder.bearer_auth(token);
            }

            match builder.send().await {
                Ok(response) => break response,
                Err(err) => {
                    let message = describe_error(&err);
                    if attempt >= RETRY_MAX_ATTEMPTS || !should_retry_send_error(&err) {
                        return Err(TurnError::Transport(message));
                    }
                    let delay = retry_backoff_delay(attempt);
                    tracing::debug!(
                        retry_attempt = attempt + 1,
                        delay_ms = delay.as_millis(),
                        error = %message,
                        "retrying turn request after connect error"
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        };

        let status = response.status();
        if status.is_success() {
            tracing::debug!(status = status.as_u16(), "turn stream opened");
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        let message = error_body_message(&body)
            .map(|text| text.chars().take(ERROR_BODY_MAX_CHARS).collect::<String>())
            .unwrap_or_else(|| {
                format!(
                    "HTTP {} {}",
                    status.as_u16(),
                    status.canonical_reason().unwrap_or("error")
                )
            });
        Err(TurnError::Upstream {
            status: status.as_u16(),
            message,
        })
    }
}
