//! Bounded retry for optimistic read-modify-write cycles.
//!
//! [`with_cas_retry`] re-runs a closure that reads current state, computes a
//! mutation and commits it under a compare-and-set precondition. Only
//! [`StorageError::Conflict`] is retried; every other error, including
//! transient infrastructure errors, is returned to the caller unchanged.

use std::{future::Future, time::Duration};

use rand::Rng;

use crate::error::StorageError;

/// Default number of retries after the first attempt.
pub const DEFAULT_CAS_MAX_RETRIES: u32 = 5;

/// Default base delay between conflicting attempts.
pub const DEFAULT_CAS_BASE_DELAY: Duration = Duration::from_millis(10);

/// Retry policy for compare-and-set conflicts.
///
/// The delay before retry `n` is `base_delay` plus a uniformly random jitter
/// in `0..=base_delay`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CasRetryConfig {
    /// Retries after the first attempt. Zero disables retrying.
    pub max_retries: u32,
    /// Base delay before each retry.
    pub base_delay: Duration,
}

impl Default for CasRetryConfig {
    fn default() -> Self {
        Self { max_retries: DEFAULT_CAS_MAX_RETRIES, base_delay: DEFAULT_CAS_BASE_DELAY }
    }
}

/// Runs `operation` until it succeeds, fails with a non-conflict error, or
/// exhausts `config.max_retries` retries.
///
/// Exhaustion is reported as [`StorageError::CasRetriesExhausted`].
///
/// The error type is generic so the closure can abort the loop with a
/// domain error of its own; only errors that convert back into
/// [`StorageError::Conflict`] are retried.
pub async fn with_cas_retry<F, Fut, T, E>(config: &CasRetryConfig, mut operation: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: CasOutcome,
{
    for attempt in 0..=config.max_retries {
        match operation().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_conflict() && attempt < config.max_retries => {
                let delay = jittered(config.base_delay);
                tracing::debug!(
                    attempt = attempt + 1,
                    max_attempts = config.max_retries + 1,
                    delay_ms = delay.as_millis() as u64,
                    "CAS conflict, retrying after jitter",
                );
                tokio::time::sleep(delay).await;
            },
            Err(err) if err.is_conflict() => {
                tracing::debug!(attempts = config.max_retries + 1, "CAS retries exhausted");
                return Err(E::exhausted(config.max_retries + 1));
            },
            Err(err) => return Err(err),
        }
    }

    Err(E::exhausted(config.max_retries + 1))
}

/// Error types usable with [`with_cas_retry`].
pub trait CasOutcome {
    /// Returns `true` if the error is a compare-and-set conflict.
    fn is_conflict(&self) -> bool;

    /// Builds the error reported once retries are exhausted.
    fn exhausted(attempts: u32) -> Self;
}

impl CasOutcome for StorageError {
    fn is_conflict(&self) -> bool {
        matches!(self, StorageError::Conflict)
    }

    fn exhausted(attempts: u32) -> Self {
        StorageError::cas_retries_exhausted(attempts)
    }
}

fn jittered(base: Duration) -> Duration {
    let range = base.as_millis() as u64;
    if range == 0 {
        return Duration::ZERO;
    }
    base + Duration::from_millis(rand::rng().random_range(0..=range))
}
