//! Guest and cluster provisioning steps run over SSH.
//!
//! Every function here takes the [`Runner`](crate::ssh::Runner) of a booted VM. Waits are bounded
//! by a [`RetryPolicy`] and observe the caller's cancellation token.

mod certs;
mod dns;
mod guest;
mod oc;
mod operators;
mod proxy;
mod systemd;

use std::{future::Future, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How often and how long a wait retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum number of attempts.
    pub attempts: usize,

    /// Sleep between attempts.
    pub interval: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl RetryPolicy {
    /// Creates a policy.
    pub const fn new(attempts: usize, interval: Duration) -> Self {
        Self { attempts, interval }
    }

    /// A policy that tries once.
    pub const fn once() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Runs `callback` under this policy. Only errors marked retriable are tried again.
    pub async fn run<T, F, Fut>(&self, cancel: &CancellationToken, callback: F) -> CrcResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = CrcResult<T>>,
    {
        crcutils::retry_after(self.attempts, self.interval, cancel, callback)
            .await
            .map_err(CrcError::from)
    }
}

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use certs::*;
pub use dns::*;
pub use guest::*;
pub use oc::*;
pub use operators::*;
pub use proxy::*;
pub use systemd::*;
