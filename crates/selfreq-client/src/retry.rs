use std::future::Future;
use std::time::Duration;

use reqwest::header::RETRY_AFTER;
use reqwest::{Method, StatusCode};

const BASE_BACKOFF_MS: u64 = 100;
const MAX_BACKOFF_SHIFT: u32 = 10;

const RETRYABLE_STATUSES: [StatusCode; 7] = [
    StatusCode::REQUEST_TIMEOUT,
    StatusCode::PAYLOAD_TOO_LARGE,
    StatusCode::TOO_MANY_REQUESTS,
    StatusCode::INTERNAL_SERVER_ERROR,
    StatusCode::BAD_GATEWAY,
    StatusCode::SERVICE_UNAVAILABLE,
    StatusCode::GATEWAY_TIMEOUT,
];

/// Parse the `Retry-After` header value as seconds, falling back to exponential backoff.
pub(crate) fn retry_delay(response: Option<&reqwest::Response>, attempt: u32) -> Duration {
    if let Some(response) = response
        && let Some(val) = response.headers().get(RETRY_AFTER)
        && let Ok(s) = val.to_str()
        && let Ok(secs) = s.trim().parse::<u64>()
    {
        return Duration::from_secs(secs);
    }
    Duration::from_millis(BASE_BACKOFF_MS << attempt.min(MAX_BACKOFF_SHIFT))
}

fn is_idempotent(method: &Method) -> bool {
    matches!(
        *method,
        Method::GET | Method::PUT | Method::HEAD | Method::DELETE | Method::OPTIONS | Method::TRACE
    )
}

fn is_retryable_error(e: &reqwest::Error) -> bool {
    e.is_connect() || e.is_timeout()
}

/// Send a request, retrying idempotent methods up to `max_retries` times on
/// connection errors, timeouts and transient status codes.
///
/// Returns the final response together with the number of retries performed. The
/// last response is returned as is even if its status was retryable.
///
/// # Errors
///
/// Returns the `reqwest::Error` of the last attempt.
pub(crate) async fn send_with_retry<F, Fut>(
    method: &Method,
    max_retries: u32,
    mut f: F,
) -> Result<(reqwest::Response, u32), reqwest::Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<reqwest::Response, reqwest::Error>>,
{
    let retryable = is_idempotent(method);
    let mut attempt = 0;
    loop {
        let may_retry = retryable && attempt < max_retries;
        match f().await {
            Ok(response) if may_retry && RETRYABLE_STATUSES.contains(&response.status()) => {
                let delay = retry_delay(Some(&response), attempt);
                tracing::warn!(
                    "self-request got {}, retrying in {}ms ({}/{max_retries})",
                    response.status(),
                    delay.as_millis(),
                    attempt + 1,
                );
                tokio::time::sleep(delay).await;
            }
            Ok(response) => return Ok((response, attempt)),
            Err(e) if may_retry && is_retryable_error(&e) => {
                let delay = retry_delay(None, attempt);
                tracing::warn!(
                    "self-request failed: {e}, retrying in {}ms ({}/{max_retries})",
                    delay.as_millis(),
                    attempt + 1,
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
        attempt += 1;
    }
}
