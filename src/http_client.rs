//! JSON POST with exponential backoff, shared by the embedding and
//! generation backends.
//!
//! Rate limiting (429), server errors (5xx), and transport failures are
//! retried up to `max_retries` times, sleeping `2^(attempt-1)` seconds
//! (capped at 32s) between attempts. Any other non-success status is
//! returned to the caller at once.

use anyhow::{anyhow, Result};
use reqwest::StatusCode;
use std::time::Duration;

const MAX_BACKOFF_EXPONENT: u32 = 5;

pub(crate) fn build_client(timeout_secs: u64) -> Result<reqwest::Client> {
    let client = reqwest::Client::builder()
        .timeout(Duration::from_secs(timeout_secs))
        .build()?;
    Ok(client)
}

fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt - 1).min(MAX_BACKOFF_EXPONENT))
}

fn is_transient(status: StatusCode) -> bool {
    status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
}

/// POST `body` to `url` and decode the JSON reply.
///
/// `service` labels log lines and error messages, e.g. `"Embedding"`.
pub(crate) async fn post_json_with_retry(
    client: &reqwest::Client,
    url: &str,
    bearer: Option<&str>,
    body: &serde_json::Value,
    max_retries: u32,
    service: &str,
) -> Result<serde_json::Value> {
    let mut attempt = 0;

    loop {
        let mut request = client.post(url).json(body);
        if let Some(key) = bearer {
            request = request.bearer_auth(key);
        }

        let failure = match request.send().await {
            Ok(response) if response.status().is_success() => {
                return Ok(response.json().await?);
            }
            Ok(response) => {
                let status = response.status();
                let detail = response.text().await.unwrap_or_default();
                let err = anyhow!("{} API error {}: {}", service, status, detail);
                if !is_transient(status) {
                    return Err(err);
                }
                err
            }
            Err(e) => anyhow!("{} request to {} failed: {}", service, url, e),
        };

        if attempt >= max_retries {
            return Err(failure);
        }
        attempt += 1;

        let delay = backoff(attempt);
        tracing::warn!(
            service,
            attempt,
            delay_secs = delay.as_secs(),
            error = %failure,
            "transient failure, retrying"
        );
        tokio::time::sleep(delay).await;
    }
}
