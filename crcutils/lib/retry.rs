//! Bounded retry with a fixed interval.
//!
//! Every wait in the provisioning flow goes through [`retry_after`], which gives up after a fixed
//! number of attempts, only retries errors that mark themselves as [`Retriable`], and returns as
//! soon as the supplied cancellation token fires, both while an attempt is running and while it
//! sleeps between attempts.

use std::{fmt::Display, future::Future, time::Duration};

use thiserror::Error;
use tokio_util::sync::CancellationToken;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// An error kind that tells the retry loop whether another attempt may succeed.
pub trait Retriable {
    /// Returns `true` if this failure is expected to be transient.
    fn is_retriable(&self) -> bool;
}

/// The ways a retry loop can end without producing a value.
#[derive(Debug, Error)]
pub enum RetryError<E> {
    /// The cancellation token fired before a successful attempt.
    #[error("cancelled after {attempts} attempts")]
    Cancelled {
        /// Attempts started before cancellation.
        attempts: usize,
    },

    /// Every attempt failed with a retriable error.
    #[error("gave up after {attempts} attempts: {last}")]
    Exhausted {
        /// Number of attempts made.
        attempts: usize,

        /// The error returned by the final attempt.
        last: E,
    },

    /// An attempt failed with an error that must not be retried.
    #[error("{0}")]
    Fatal(E),
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<E> RetryError<E> {
    /// Returns the underlying error of the last attempt, if there was one.
    pub fn into_inner(self) -> Option<E> {
        match self {
            RetryError::Cancelled { .. } => None,
            RetryError::Exhausted { last, .. } => Some(last),
            RetryError::Fatal(e) => Some(e),
        }
    }

    /// Returns `true` if the loop ended because of cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, RetryError::Cancelled { .. })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Calls `callback` up to `attempts` times, sleeping `interval` between failed attempts.
///
/// A non-retriable error stops the loop immediately. An `attempts` value of zero is treated as
/// one.
pub async fn retry_after<T, E, F, Fut>(
    attempts: usize,
    interval: Duration,
    cancel: &CancellationToken,
    mut callback: F,
) -> Result<T, RetryError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Retriable + Display,
{
    let attempts = attempts.max(1);
    let mut attempt = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(RetryError::Cancelled { attempts: attempt });
        }

        attempt += 1;
        let result = tokio::select! {
            result = callback() => result,
            _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
        };

        let error = match result {
            Ok(value) => return Ok(value),
            Err(e) if !e.is_retriable() => return Err(RetryError::Fatal(e)),
            Err(e) => e,
        };

        if attempt >= attempts {
            return Err(RetryError::Exhausted {
                attempts,
                last: error,
            });
        }

        tracing::debug!("attempt {attempt}/{attempts} failed, retrying in {interval:?}: {error}");

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = cancel.cancelled() => return Err(RetryError::Cancelled { attempts: attempt }),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
