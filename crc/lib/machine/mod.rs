//! The VM lifecycle.
//!
//! [`MachineClient`] drives the VM through its driver and provisions the cluster over SSH.
//! [`Synchronized`] wraps any [`Client`] so that a start never overlaps a stop or a delete:
//! a stop or delete cancels the in-flight start and waits for it to let go before running.

pub mod fake;
mod lifecycle;
mod start;
mod sync;
#[cfg(test)]
mod testing;
mod types;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::{driver::VmState, CrcResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Lifecycle operations on the named VM.
#[async_trait]
pub trait Client: Send + Sync {
    /// The instance name.
    fn get_name(&self) -> &str;

    /// Returns `true` if the instance is registered.
    async fn exists(&self) -> CrcResult<bool>;

    /// Creates the VM if needed, boots it and provisions the cluster.
    ///
    /// Every stage observes `cancel`. A start on a running VM returns immediately.
    async fn start(&self, cancel: CancellationToken, config: StartConfig) -> CrcResult<StartResult>;

    /// Shuts the VM down gracefully and returns the resulting state.
    async fn stop(&self) -> CrcResult<VmState>;

    /// Removes the VM and its registration.
    async fn delete(&self) -> CrcResult<()>;

    /// Powers the VM off immediately.
    async fn power_off(&self) -> CrcResult<()>;

    /// Reads VM and cluster health.
    async fn status(&self) -> CrcResult<ClusterStatus>;

    /// Reads the console access details.
    async fn get_console_url(&self) -> CrcResult<ConsoleResult>;

    /// Reads the address the host reaches the guest at.
    async fn ip(&self) -> CrcResult<String>;

    /// Returns `true` if the VM exists and runs.
    async fn is_running(&self) -> CrcResult<bool>;
}

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use lifecycle::*;
pub use sync::*;
pub use types::*;
