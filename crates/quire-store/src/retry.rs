//! Serialization-conflict retry.
//!
//! SQLite reports a lost race for the write lock as `SQLITE_BUSY` (or
//! `SQLITE_LOCKED` for shared-cache and snapshot conflicts). Those are
//! transient: the same unit of work will usually succeed a moment later.
//! [`with_conflict_retry`] re-runs the operation with a jittered delay and
//! gives up with [`ConflictExhausted`] after a bounded number of attempts.

use std::error::Error as StdError;
use std::future::Future;
use std::time::Duration;

use rand::Rng;
use rusqlite::ErrorCode;
use thiserror::Error;

use quire_config::RetryConfig;

/// Message fragments that identify an isolation conflict when the typed
/// error has been flattened into text somewhere along the chain.
const CONFLICT_MARKERS: &[&str] = &[
    "database is locked",
    "database table is locked",
    "could not serialize access",
    "serialization failure",
    "40001",
];

/// Every attempt hit a serialization conflict. Callers should back off.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation}: gave up after {attempts} conflicting attempts")]
pub struct ConflictExhausted {
    pub operation: String,
    pub attempts: u32,
}

/// Bounds for [`with_conflict_retry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts before giving up.
    pub max_retries: u32,
    /// Upper bound of each jittered wait; the lower bound is half of it.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from(&RetryConfig::default())
    }
}

impl From<&RetryConfig> for RetryPolicy {
    fn from(config: &RetryConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
        }
    }

    /// A delay drawn uniformly from `[base/2, base]`.
    pub fn jittered_delay(&self) -> Duration {
        let base = self.base_delay.as_micros() as u64;
        if base == 0 {
            return Duration::ZERO;
        }
        Duration::from_micros(rand::rng().random_range(base / 2..=base))
    }
}

/// Callback invoked before each retry with `(attempt, max_retries)`.
pub type OnRetry<'a> = &'a (dyn Fn(u32, u32) + Send + Sync);

/// Whether `err`, or anything in its `source()` chain, is a serialization
/// conflict.
pub fn is_serialization_conflict(err: &(dyn StdError + 'static)) -> bool {
    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(rusqlite::Error::SqliteFailure(failure, _)) =
            e.downcast_ref::<rusqlite::Error>()
            && matches!(failure.code, ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked)
        {
            return true;
        }
        let message = e.to_string().to_lowercase();
        if CONFLICT_MARKERS.iter().any(|m| message.contains(m)) {
            return true;
        }
        current = e.source();
    }
    false
}

/// Run `op`, retrying serialization conflicts.
///
/// Non-conflict errors are returned from the first attempt that produces
/// them. After `policy.max_retries` conflicting attempts the result is
/// `Err(ConflictExhausted.into())`.
pub async fn with_conflict_retry<T, E, F, Fut>(
    policy: &RetryPolicy,
    operation: &str,
    on_retry: Option<OnRetry<'_>>,
    mut op: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: StdError + From<ConflictExhausted> + 'static,
{
    let max = policy.max_retries.max(1);

    for attempt in 1..=max {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if is_serialization_conflict(&err) => {
                if attempt == max {
                    break;
                }
                let delay = policy.jittered_delay();
                tracing::warn!(
                    operation,
                    attempt,
                    max_retries = max,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "Serialization conflict, retrying"
                );
                if let Some(callback) = on_retry {
                    callback(attempt, max);
                }
                tokio::time::sleep(delay).await;
            }
            Err(err) => return Err(err),
        }
    }

    tracing::error!(operation, attempts = max, "Serialization conflicts exhausted retries");
    Err(ConflictExhausted {
        operation: operation.to_string(),
        attempts: max,
    }
    .into())
}
