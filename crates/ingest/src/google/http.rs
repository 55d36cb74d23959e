//! Shared HTTP plumbing for the Google clients
//!
//! Blocking `ureq` with a global per-request timeout. Status codes are
//! classified into [`ApiError`]; transient failures are retried a few times
//! with exponential backoff and jitter before being handed to the collector.

use serde::Deserialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::time::Duration;
use ureq::Agent;
use url::Url;

use super::auth::AccessTokens;
use crate::error::ApiError;

const MAX_ATTEMPTS: u32 = 3;
const EXPORT_BODY_LIMIT: u64 = 64 * 1024 * 1024;

/// Authenticated GET client shared by the service clients
#[derive(Clone)]
pub struct GoogleHttp {
    agent: Agent,
    tokens: Arc<dyn AccessTokens>,
}

impl GoogleHttp {
    /// # Arguments
    /// * `tokens` - Access token source, asked once per request
    /// * `timeout` - Upper bound for one request including the body read
    pub fn new(tokens: Arc<dyn AccessTokens>, timeout: Duration) -> Self {
        let agent: Agent = Agent::config_builder()
            .http_status_as_error(false)
            .timeout_global(Some(timeout))
            .build()
            .into();
        Self { agent, tokens }
    }

    /// GET and decode a JSON document
    pub fn get_json<T: DeserializeOwned>(&self, subject: &str, url: &Url) -> Result<T, ApiError> {
        let body = self.get_text(subject, url)?;
        serde_json::from_str(&body).map_err(|e| ApiError::Other {
            status: None,
            message: format!("unexpected response from {}: {e}", url.path()),
        })
    }

    /// GET a body as text, retrying transient failures
    pub fn get_text(&self, subject: &str, url: &Url) -> Result<String, ApiError> {
        let mut delay = Duration::from_millis(200);
        let mut attempt = 1;
        loop {
            match self.get_once(subject, url) {
                Err(ApiError::Transient(reason)) if attempt < MAX_ATTEMPTS => {
                    log::debug!(
                        "GET {} attempt {attempt} failed ({reason}), retrying",
                        url.path()
                    );
                    std::thread::sleep(delay + Duration::from_millis(rand_jitter()));
                    delay *= 2;
                    attempt += 1;
                }
                result => return result,
            }
        }
    }

    fn get_once(&self, subject: &str, url: &Url) -> Result<String, ApiError> {
        let token = self.tokens.access_token(subject)?;
        let mut response = self
            .agent
            .get(url.as_str())
            .header("Authorization", &format!("Bearer {token}"))
            .call()
            .map_err(transport_error)?;

        let status = response.status().as_u16();
        let retry_after = response
            .headers()
            .get("retry-after")
            .and_then(|v| v.to_str().ok())
            .and_then(parse_retry_after);
        let body = response
            .body_mut()
            .with_config()
            .limit(EXPORT_BODY_LIMIT)
            .read_to_string()
            .map_err(transport_error)?;

        if (200..300).contains(&status) {
            Ok(body)
        } else {
            Err(classify_status(status, retry_after, &body))
        }
    }
}

/// Error envelope returned by Google APIs
#[derive(Debug, Default, Deserialize)]
struct ErrorBody {
    #[serde(default)]
    error: ErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ErrorReason>,
}

#[derive(Debug, Deserialize)]
struct ErrorReason {
    #[serde(default)]
    reason: String,
}

const RATE_LIMIT_REASONS: [&str; 3] = ["rateLimitExceeded", "userRateLimitExceeded", "quotaExceeded"];

/// Map an HTTP failure status onto the error taxonomy
pub fn classify_status(status: u16, retry_after: Option<Duration>, body: &str) -> ApiError {
    let detail = serde_json::from_str::<ErrorBody>(body)
        .map(|b| b.error)
        .unwrap_or_default();
    let message = if detail.message.is_empty() {
        format!("HTTP {status}")
    } else {
        detail.message.clone()
    };
    let rate_limited = detail
        .errors
        .iter()
        .any(|e| RATE_LIMIT_REASONS.contains(&e.reason.as_str()));

    match status {
        410 => ApiError::TokenGone,
        404 => ApiError::NotFound(message),
        429 => ApiError::RateLimited { retry_after },
        403 if rate_limited => ApiError::RateLimited { retry_after },
        500..=599 => ApiError::Transient(message),
        _ => ApiError::Other {
            status: Some(status),
            message,
        },
    }
}

fn transport_error(err: ureq::Error) -> ApiError {
    ApiError::Transient(err.to_string())
}

/// Retry-After in delta-seconds form; HTTP dates are ignored
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

/// Build an endpoint URL from a base, escaped path segments and query pairs
pub fn endpoint(base: &str, segments: &[&str], query: &[(&str, &str)]) -> Result<Url, ApiError> {
    let mut url = Url::parse(base).map_err(|e| ApiError::Other {
        status: None,
        message: format!("bad base url {base}: {e}"),
    })?;
    url.path_segments_mut()
        .map_err(|()| ApiError::Other {
            status: None,
            message: format!("base url {base} cannot take a path"),
        })?
        .pop_if_empty()
        .extend(segments);
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

/// Generate a random jitter value (0-100ms)
fn rand_jitter() -> u64 {
    use std::collections::hash_map::RandomState;
    use std::hash::{BuildHasher, Hasher};

    let hasher = RandomState::new().build_hasher();
    hasher.finish() % 100
}
