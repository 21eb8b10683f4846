use std::path::PathBuf;

use getset::{Getters, Setters};
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// How the guest reaches the network.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NetworkMode {
    /// The guest gets its own address on a hypervisor network.
    #[default]
    Default,

    /// The guest is reached through a host-side user-mode network over vsock.
    Vsock,
}

/// The driver-level configuration of the VM, persisted as its registration.
#[derive(Debug, Clone, PartialEq, Getters, Setters, TypedBuilder, Serialize, Deserialize)]
#[getset(get = "pub with_prefix", set = "pub with_prefix")]
pub struct MachineConfig {
    /// Instance name.
    #[builder(setter(into))]
    name: String,

    /// File name of the bundle the VM was created from.
    #[builder(setter(into))]
    bundle_name: String,

    /// Name of the driver backend.
    #[builder(setter(into))]
    driver_name: String,

    /// Number of vCPUs.
    cpus: u32,

    /// Memory in MiB.
    memory_mib: u32,

    /// Disk size in GiB.
    disk_size_gib: u32,

    /// The bundle disk image the VM disk is derived from.
    #[builder(setter(into))]
    image_source_path: PathBuf,

    /// Format of the disk image, e.g. `qcow2`.
    #[builder(setter(into))]
    image_format: String,

    /// The bundle's SSH private key.
    #[builder(setter(into))]
    ssh_key_path: PathBuf,

    /// Kernel command line for direct kernel boot.
    #[builder(default, setter(into))]
    kernel_cmdline: String,

    /// Initramfs for direct kernel boot.
    #[builder(default, setter(into))]
    initramfs: PathBuf,

    /// Kernel for direct kernel boot.
    #[builder(default, setter(into))]
    kernel: PathBuf,

    /// Guest networking mode.
    #[builder(default)]
    network_mode: NetworkMode,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl NetworkMode {
    /// Parses the `network-mode` setting. Anything but `vsock` is the default mode.
    pub fn from_setting(value: &str) -> Self {
        match value {
            crate::config::VSOCK_NETWORK_MODE => NetworkMode::Vsock,
            _ => NetworkMode::Default,
        }
    }

    /// Returns `true` for vsock mode.
    pub fn is_vsock(&self) -> bool {
        matches!(self, NetworkMode::Vsock)
    }
}
