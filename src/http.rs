//! Retrying JSON POST client shared by the apply and chat endpoints.
//!
//! One call = up to `MAX_RETRIES + 1` attempts. Responses are classified
//! once into [`ApiError`] variants; only retryable variants re-enter the
//! loop. Delay grows exponentially with uniform jitter, except when the
//! server supplied a numeric `Retry-After`, which replaces the computed
//! delay for that attempt.

use crate::error::{ApiError, ErrorDetail};
use rand::Rng;
use std::time::{Duration, Instant};

/// Retries after the first attempt (3 retries = 4 total tries).
pub const MAX_RETRIES: u32 = 3;
/// Base delay for exponential backoff.
pub const RETRY_BASE_DELAY: Duration = Duration::from_secs(1);

/// Thin wrapper over a shared reqwest client.
#[derive(Debug, Clone, Default)]
pub struct HttpClient {
    inner: reqwest::Client,
}

impl HttpClient {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// POSTs `body` as JSON and returns the parsed JSON response.
    ///
    /// `timeout` bounds each individual attempt; wall clock across
    /// retries is not bounded by this client.
    ///
    /// # Errors
    ///
    /// Returns the final [`ApiError`] once retries are exhausted or a
    /// non-retryable classification is hit.
    pub async fn post_json(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
        timeout: Duration,
        trace_id: &str,
    ) -> Result<serde_json::Value, ApiError> {
        for attempt in 0..=MAX_RETRIES {
            let started = Instant::now();
            let result = self.post_once(url, bearer, body, timeout).await;
            let latency_ms = started.elapsed().as_millis();

            match result {
                Ok(value) => {
                    tracing::debug!("[{trace_id}] POST {url} ok (latency={latency_ms}ms)");
                    return Ok(value);
                }
                Err(err) => {
                    if !err.is_retryable() || attempt == MAX_RETRIES {
                        tracing::warn!(
                            "[{trace_id}] POST {url} failed ({}, latency={latency_ms}ms, attempt={}/{}): {err}",
                            err.code(),
                            attempt + 1,
                            MAX_RETRIES + 1,
                        );
                        return Err(err);
                    }
                    let delay = retry_delay(&err, attempt);
                    tracing::warn!(
                        "[{trace_id}] POST {url} retrying in {:.2}s ({}, attempt={}/{})",
                        delay.as_secs_f64(),
                        err.code(),
                        attempt + 1,
                        MAX_RETRIES + 1,
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
        unreachable!("retry loop returns on the final attempt")
    }

    async fn post_once(
        &self,
        url: &str,
        bearer: Option<&str>,
        body: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ApiError> {
        let mut request = self.inner.post(url).timeout(timeout).json(body);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }

        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(ErrorDetail::transport(format!(
                    "request timed out after {:.1}s",
                    timeout.as_secs_f64()
                )))
            } else {
                ApiError::Network(ErrorDetail::transport(e.to_string()))
            }
        })?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.parse::<f64>().ok())
            .map(Duration::from_secs_f64);
        let text = response.text().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Timeout(ErrorDetail::transport(e.to_string()))
            } else {
                ApiError::Network(ErrorDetail::transport(e.to_string()))
            }
        })?;

        classify(status, retry_after, text)
    }
}

/// Classifies a completed HTTP exchange.
///
/// A 2xx with a non-JSON body is a server fault: the service violated
/// its own contract, so it lands in the retryable `Server` bucket rather
/// than anything the caller could fix.
fn classify(
    status: u16,
    retry_after: Option<Duration>,
    text: String,
) -> Result<serde_json::Value, ApiError> {
    if (200..300).contains(&status) {
        return serde_json::from_str(&text).map_err(|_| {
            ApiError::Server(ErrorDetail {
                status,
                code: "application_error".to_string(),
                message: "service returned a non-JSON response".to_string(),
                raw: text,
            })
        });
    }

    let detail = parse_error_detail(status, text);
    Err(match status {
        401 | 403 => ApiError::Auth(detail),
        404 => ApiError::NotFound(detail),
        423 => ApiError::ResourceLocked(detail),
        429 => ApiError::RateLimit {
            detail,
            retry_after,
        },
        400..=499 => ApiError::Validation(detail),
        _ => ApiError::Server(detail),
    })
}

/// Parses the provider's error body.
///
/// Short code preference: `code`, then `error`. Message preference:
/// `message`, then `detail`. Non-JSON bodies keep the raw text as the
/// message.
fn parse_error_detail(status: u16, text: String) -> ErrorDetail {
    let mut code = "unknown".to_string();
    let mut message = text.clone();

    if let Ok(serde_json::Value::Object(map)) = serde_json::from_str::<serde_json::Value>(&text) {
        if let Some(c) = map
            .get("code")
            .or_else(|| map.get("error"))
            .and_then(|v| v.as_str())
        {
            if !c.is_empty() {
                code = c.to_string();
            }
        }
        if let Some(m) = map
            .get("message")
            .or_else(|| map.get("detail"))
            .and_then(|v| v.as_str())
        {
            message = m.to_string();
        }
    }

    ErrorDetail {
        status,
        code,
        message,
        raw: text,
    }
}

/// Delay before the next attempt.
///
/// `Retry-After` replaces the computed backoff; jitter is added either
/// way to spread synchronized clients.
fn retry_delay(err: &ApiError, attempt: u32) -> Duration {
    let base = err
        .retry_after()
        .unwrap_or_else(|| RETRY_BASE_DELAY * 2u32.saturating_pow(attempt));
    base + Duration::from_secs_f64(rand::rng().random_range(0.0..0.5))
}
