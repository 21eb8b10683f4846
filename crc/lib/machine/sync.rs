use std::{
    sync::{Arc, Mutex, PoisonError},
    time::Duration,
};

use async_trait::async_trait;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use super::{Client, ClusterStatus, ConsoleResult, StartConfig, StartResult};
use crate::{config::START_ABORT_TIMEOUT, driver::VmState, CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Serializes the lifecycle operations of a [`Client`].
///
/// At most one start and at most one stop or delete run at a time. A stop or a delete cancels
/// an in-flight start and waits for it to release the start lock, so it never overlaps a start.
/// Read operations are passed through without locking.
pub struct Synchronized<C> {
    inner: C,
    start_lock: Arc<Semaphore>,
    stop_lock: Arc<Semaphore>,
    start_cancel: Arc<Mutex<Option<CancellationToken>>>,
    abort_timeout: Duration,
}

/// Clears the published start token when the start finishes.
struct StartGuard {
    slot: Arc<Mutex<Option<CancellationToken>>>,
    _permit: OwnedSemaphorePermit,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<C: Client> Synchronized<C> {
    /// Wraps `inner`, giving in-flight starts [`START_ABORT_TIMEOUT`] to stop after a cancel.
    pub fn new(inner: C) -> Self {
        Self::with_abort_timeout(inner, START_ABORT_TIMEOUT)
    }

    /// Wraps `inner` with a custom wait for in-flight starts to stop after a cancel.
    pub fn with_abort_timeout(inner: C, abort_timeout: Duration) -> Self {
        Self {
            inner,
            start_lock: Arc::new(Semaphore::new(1)),
            stop_lock: Arc::new(Semaphore::new(1)),
            start_cancel: Arc::new(Mutex::new(None)),
            abort_timeout,
        }
    }

    /// The wrapped client.
    pub fn get_inner(&self) -> &C {
        &self.inner
    }

    /// Returns `true` if a start, a stop or a delete is running.
    pub fn is_progressing(&self) -> bool {
        self.start_lock.available_permits() == 0 || self.stop_lock.available_permits() == 0
    }

    /// Takes the stop lock, aborts any in-flight start, then holds the start lock too while
    /// `operation` runs.
    async fn exclusive<T, F>(&self, operation: F) -> CrcResult<T>
    where
        F: std::future::Future<Output = CrcResult<T>>,
    {
        let _stop_permit = self
            .stop_lock
            .clone()
            .try_acquire_owned()
            .map_err(|_| CrcError::StopOrDeleteInProgress)?;

        // The start lock is only taken or inspected while `start_cancel` is held, so a held start
        // lock always has its token published.
        let running = {
            let slot = self.start_cancel.lock().unwrap_or_else(PoisonError::into_inner);
            match self.start_lock.clone().try_acquire_owned() {
                Ok(permit) => Ok(permit),
                Err(_) => Err(slot.clone()),
            }
        };

        let _start_permit = match running {
            Ok(permit) => permit,
            Err(token) => {
                if let Some(token) = token {
                    tracing::info!("cancelling the running start");
                    token.cancel();
                }

                let start_lock = self.start_lock.clone();
                tokio::time::timeout(self.abort_timeout, start_lock.acquire_owned())
                    .await
                    .map_err(|_| CrcError::StartAbortTimeout)?
                    .map_err(CrcError::custom)?
            }
        };

        operation.await
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl<C: Client> Client for Synchronized<C> {
    fn get_name(&self) -> &str {
        self.inner.get_name()
    }

    async fn exists(&self) -> CrcResult<bool> {
        self.inner.exists().await
    }

    async fn start(&self, cancel: CancellationToken, config: StartConfig) -> CrcResult<StartResult> {
        let token = cancel.child_token();
        let permit = {
            let mut slot = self.start_cancel.lock().unwrap_or_else(PoisonError::into_inner);
            let permit = self
                .start_lock
                .clone()
                .try_acquire_owned()
                .map_err(|_| CrcError::StartInProgress)?;
            *slot = Some(token.clone());
            permit
        };
        let _guard = StartGuard {
            slot: self.start_cancel.clone(),
            _permit: permit,
        };

        self.inner.start(token, config).await
    }

    async fn stop(&self) -> CrcResult<VmState> {
        self.exclusive(self.inner.stop()).await
    }

    async fn delete(&self) -> CrcResult<()> {
        self.exclusive(self.inner.delete()).await
    }

    async fn power_off(&self) -> CrcResult<()> {
        self.inner.power_off().await
    }

    async fn status(&self) -> CrcResult<ClusterStatus> {
        self.inner.status().await
    }

    async fn get_console_url(&self) -> CrcResult<ConsoleResult> {
        self.inner.get_console_url().await
    }

    async fn ip(&self) -> CrcResult<String> {
        self.inner.ip().await
    }

    async fn is_running(&self) -> CrcResult<bool> {
        self.inner.is_running().await
    }
}

impl Drop for StartGuard {
    fn drop(&mut self) {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
