//! reqwest transport shared by the HTTP adapters.

use std::time::Duration;

use backon::{ExponentialBuilder, Retryable};
use serde::de::DeserializeOwned;
use tracing::warn;

use super::ProviderError;

#[derive(Debug, Clone)]
pub(crate) struct HttpTransport {
    client: reqwest::Client,
    timeout: Duration,
    max_retries: usize,
}

impl HttpTransport {
    pub(crate) fn new(timeout: Duration, max_retries: usize) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::HttpError(e.to_string()))?;
        Ok(Self {
            client,
            timeout,
            max_retries,
        })
    }

    /// Send the request built by `build`, retrying transient failures with
    /// exponential backoff, and decode a JSON body.
    pub(crate) async fn send_json<R, F>(&self, build: F) -> Result<R, ProviderError>
    where
        R: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let backoff = ExponentialBuilder::default()
            .with_min_delay(Duration::from_millis(250))
            .with_max_times(self.max_retries);

        (|| async { self.send_once(&build).await })
            .retry(backoff)
            .when(ProviderError::is_retryable)
            .notify(|err: &ProviderError, after: Duration| {
                warn!(error = %err, retry_in = ?after, "Provider request failed, retrying");
            })
            .await
    }

    async fn send_once<R, F>(&self, build: &F) -> Result<R, ProviderError>
    where
        R: DeserializeOwned,
        F: Fn(&reqwest::Client) -> reqwest::RequestBuilder,
    {
        let response = build(&self.client).send().await.map_err(|e| {
            if e.is_timeout() {
                ProviderError::Timeout(self.timeout)
            } else {
                ProviderError::HttpError(e.to_string())
            }
        })?;

        let status = response.status();

        if status == 429 {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return Err(ProviderError::RateLimited { retry_after });
        }

        if status == 401 || status == 403 {
            return Err(ProviderError::AuthError);
        }

        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::ApiError {
                status: status.as_u16(),
                message,
            });
        }

        response
            .json::<R>()
            .await
            .map_err(|e| ProviderError::ParseError(e.to_string()))
    }
}

/// Join a base URL and a path without doubling slashes.
pub(crate) fn endpoint(base: &str, path: &str) -> String {
    format!(
        "{}/{}",
        base.trim_end_matches('/'),
        path.trim_start_matches('/')
    )
}
