use std::time::Duration;

pub(crate) const RETRY_MAX_ATTEMPTS: u32 = 2;
pub(crate) const RETRY_BACKOFF_BASE_MS: u64 = 100;
pub(crate) const RETRY_BACKOFF_MAX_MS: u64 = 1_000;

/// Only failures where the request provably never reached the server are
/// retried; a turn request is not idempotent once the pipeline has it.
#[inline]
pub(crate) fn should_retry_send_error(err: &reqwest::Error) -> bool {
    err.is_connect() && !err.is_timeout()
}

#[inline]
pub(crate) fn retry_backoff_delay(attempt: u32) -> Duration {
    let shift = attempt.min(10);
    let multiplier = 1_u64 << shift;
    Duration::from_millis(
        RETRY_BACKOFF_BASE_MS
            .saturating_mul(multiplier)
            .min(RETRY_BACKOFF_MAX_MS),
    )
}
