//! Hypervisor drivers.
//!
//! A [`Driver`] controls one VM and is built from its [`MachineConfig`] by a [`DriverFactory`].
//! The driver is the source of truth for the VM state, nothing above it caches state across
//! operations.

mod config;
#[cfg(target_os = "linux")]
mod libvirt;
mod state;
mod store;

use async_trait::async_trait;

use crate::{CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Controls the lifecycle of a single VM.
#[async_trait]
pub trait Driver: Send + Sync {
    /// The configuration the driver was built from, including any applied changes.
    fn get_machine_config(&self) -> &MachineConfig;

    /// Creates the VM's backing resources. The VM is left powered off.
    async fn create(&self) -> CrcResult<()>;

    /// Boots the VM.
    async fn start(&self) -> CrcResult<()>;

    /// Shuts the VM down gracefully.
    async fn stop(&self) -> CrcResult<()>;

    /// Powers the VM off immediately.
    async fn kill(&self) -> CrcResult<()>;

    /// Reads the current VM state.
    async fn get_state(&self) -> CrcResult<VmState>;

    /// Reads the guest IP address.
    async fn get_ip(&self) -> CrcResult<String>;

    /// Removes the VM and its backing resources.
    async fn remove(&self) -> CrcResult<()>;

    /// The file name of the bundle the VM was created from.
    fn get_bundle_name(&self) -> CrcResult<String> {
        let name = self.get_machine_config().get_bundle_name();
        if name.is_empty() {
            return Err(CrcError::InvalidBundle(
                "cannot get the bundle name of the instance, make sure you ran 'crc setup' and are using the latest bundle".to_string(),
            ));
        }
        Ok(name.clone())
    }

    /// Changes the memory size applied at next boot.
    async fn set_memory(&mut self, _memory_mib: u32) -> CrcResult<()> {
        Err(CrcError::DriverNotImplemented("memory changes"))
    }

    /// Changes the vCPU count applied at next boot.
    async fn set_cpus(&mut self, _cpus: u32) -> CrcResult<()> {
        Err(CrcError::DriverNotImplemented("vCPU changes"))
    }

    /// Grows the VM disk.
    async fn set_disk_size(&mut self, _disk_size_gib: u32) -> CrcResult<()> {
        Err(CrcError::DriverNotImplemented("disk size changes"))
    }
}

/// Builds drivers for instance registrations.
pub trait DriverFactory: Send + Sync {
    /// The driver name recorded in new registrations.
    fn driver_name(&self) -> &str;

    /// Builds a driver handle for `config`.
    fn new_driver(&self, config: MachineConfig) -> CrcResult<Box<dyn Driver>>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Selects the driver backend of the host platform.
#[derive(Debug, Clone)]
pub struct PlatformDriverFactory {
    paths: crate::config::CrcPaths,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl PlatformDriverFactory {
    /// Creates a factory placing VM resources under `paths`.
    pub fn new(paths: crate::config::CrcPaths) -> Self {
        Self { paths }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl DriverFactory for PlatformDriverFactory {
    fn driver_name(&self) -> &str {
        if cfg!(target_os = "linux") {
            "libvirt"
        } else {
            std::env::consts::OS
        }
    }

    #[cfg(target_os = "linux")]
    fn new_driver(&self, config: MachineConfig) -> CrcResult<Box<dyn Driver>> {
        match config.get_driver_name().as_str() {
            libvirt::DRIVER_NAME => Ok(Box::new(libvirt::LibvirtDriver::new(
                config,
                self.paths.clone(),
            ))),
            other => Err(CrcError::UnsupportedDriver(other.to_string())),
        }
    }

    #[cfg(not(target_os = "linux"))]
    fn new_driver(&self, config: MachineConfig) -> CrcResult<Box<dyn Driver>> {
        let _ = &self.paths;
        Err(CrcError::UnsupportedDriver(format!(
            "{} on {}",
            config.get_driver_name(),
            std::env::consts::OS
        )))
    }
}

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use config::*;
pub use state::*;
pub use store::*;
