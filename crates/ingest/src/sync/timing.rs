//! Retry window arithmetic for transiently blocked subjects
//!
//! Pure functions so the blocklist rules can be tested without a clock.

use chrono::{DateTime, Duration, Utc};

/// Check whether a transient block's retry window has passed.
///
/// # Arguments
/// * `retry_at` - When the subject may be retried (None if no window was recorded)
/// * `now` - Current time
///
/// # Returns
/// `true` if the window has elapsed (or none was recorded), `false` while still blocked
pub fn retry_elapsed(retry_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    match retry_at {
        Some(at) => now >= at,
        None => true,
    }
}

/// When a rate-limited subject may be retried.
///
/// The remote's own hint wins over the configured backoff.
pub fn retry_at(
    now: DateTime<Utc>,
    retry_after: Option<std::time::Duration>,
    backoff: std::time::Duration,
) -> DateTime<Utc> {
    let wait = retry_after.unwrap_or(backoff);
    Duration::from_std(wait)
        .ok()
        .and_then(|wait| now.checked_add_signed(wait))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
