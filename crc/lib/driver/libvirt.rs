//! A libvirt backend driven through the `virsh` and `qemu-img` command line tools.

use std::{ffi::OsStr, path::PathBuf, time::Duration};

use async_trait::async_trait;

use super::{Driver, MachineConfig, NetworkMode, VmState};
use crate::{config::CrcPaths, utils, CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The driver name recorded in registrations.
pub(super) const DRIVER_NAME: &str = "libvirt";

const CONNECTION_URI: &str = "qemu:///system";

/// The libvirt network the guest is attached to in default network mode.
const DEFAULT_NETWORK: &str = "crc";

const STOP_POLL_ATTEMPTS: usize = 120;

const STOP_POLL_INTERVAL: Duration = Duration::from_secs(1);

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Drives a libvirt domain named after the instance.
#[derive(Debug)]
pub(super) struct LibvirtDriver {
    config: MachineConfig,
    paths: CrcPaths,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl LibvirtDriver {
    pub(super) fn new(config: MachineConfig, paths: CrcPaths) -> Self {
        Self { config, paths }
    }

    fn disk_path(&self) -> PathBuf {
        self.paths
            .get_machine_dir(self.config.get_name())
            .join(format!("{}.{}", self.config.get_name(), self.config.get_image_format()))
    }

    async fn virsh(&self, args: &[&str]) -> CrcResult<String> {
        let mut full = vec!["--connect", CONNECTION_URI];
        full.extend_from_slice(args);
        tracing::debug!("running virsh {}", args.join(" "));
        utils::run_command("virsh", full).await
    }

    fn domain_xml(&self) -> String {
        let config = &self.config;
        let memory_kib = u64::from(*config.get_memory_mib()) * 1024;

        let direct_boot = if config.get_kernel().as_os_str().is_empty() {
            String::new()
        } else {
            format!(
                "\n    <kernel>{}</kernel>\n    <initrd>{}</initrd>\n    <cmdline>{}</cmdline>",
                config.get_kernel().display(),
                config.get_initramfs().display(),
                xml_escape(config.get_kernel_cmdline()),
            )
        };

        let network = match config.get_network_mode() {
            NetworkMode::Default => format!(
                "<interface type='network'>\n      <source network='{DEFAULT_NETWORK}'/>\n      <model type='virtio'/>\n    </interface>"
            ),
            NetworkMode::Vsock => "<vsock model='virtio'>\n      <cid auto='yes'/>\n    </vsock>".to_string(),
        };

        format!(
            r#"<domain type='kvm'>
  <name>{name}</name>
  <memory unit='KiB'>{memory_kib}</memory>
  <vcpu placement='static'>{cpus}</vcpu>
  <os>
    <type arch='x86_64'>hvm</type>{direct_boot}
    <boot dev='hd'/>
  </os>
  <features><acpi/><apic/></features>
  <cpu mode='host-passthrough'/>
  <devices>
    <disk type='file' device='disk'>
      <driver name='qemu' type='{format}'/>
      <source file='{disk}'/>
      <target dev='vda' bus='virtio'/>
    </disk>
    {network}
    <serial type='pty'/>
    <console type='pty'/>
    <rng model='virtio'>
      <backend model='random'>/dev/urandom</backend>
    </rng>
  </devices>
</domain>
"#,
            name = config.get_name(),
            cpus = config.get_cpus(),
            format = config.get_image_format(),
            disk = self.disk_path().display(),
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Driver for LibvirtDriver {
    fn get_machine_config(&self) -> &MachineConfig {
        &self.config
    }

    async fn create(&self) -> CrcResult<()> {
        let dir = self.paths.get_machine_dir(self.config.get_name());
        tokio::fs::create_dir_all(&dir).await?;

        let disk = self.disk_path();
        let source = self.config.get_image_source_path();
        tracing::info!("creating VM disk {}", disk.display());
        let size = format!("{}G", self.config.get_disk_size_gib());
        let format = OsStr::new(self.config.get_image_format());
        let args = [
            OsStr::new("create"),
            OsStr::new("-f"),
            format,
            OsStr::new("-F"),
            format,
            OsStr::new("-b"),
            source.as_os_str(),
            disk.as_os_str(),
            OsStr::new(&size),
        ];
        utils::run_command("qemu-img", args).await?;

        let xml_path = dir.join("domain.xml");
        tokio::fs::write(&xml_path, self.domain_xml()).await?;
        let xml_path = xml_path.to_string_lossy();
        self.virsh(&["define", &*xml_path]).await?;
        Ok(())
    }

    async fn start(&self) -> CrcResult<()> {
        self.virsh(&["start", self.config.get_name().as_str()]).await?;
        Ok(())
    }

    async fn stop(&self) -> CrcResult<()> {
        self.virsh(&["shutdown", self.config.get_name().as_str()]).await?;

        for _ in 0..STOP_POLL_ATTEMPTS {
            if self.get_state().await? == VmState::Stopped {
                return Ok(());
            }
            tokio::time::sleep(STOP_POLL_INTERVAL).await;
        }

        Err(CrcError::Cluster(format!(
            "VM '{}' did not shut down in time",
            self.config.get_name()
        )))
    }

    async fn kill(&self) -> CrcResult<()> {
        self.virsh(&["destroy", self.config.get_name().as_str()]).await?;
        Ok(())
    }

    async fn get_state(&self) -> CrcResult<VmState> {
        let out = match self.virsh(&["domstate", self.config.get_name().as_str()]).await {
            Ok(out) => out,
            Err(CrcError::Command { stderr, .. }) if stderr.contains("failed to get domain") => {
                return Ok(VmState::None)
            }
            Err(e) => return Err(e),
        };

        Ok(parse_domstate(&out))
    }

    async fn get_ip(&self) -> CrcResult<String> {
        let out = self
            .virsh(&["domifaddr", self.config.get_name().as_str(), "--source", "lease"])
            .await?;

        parse_domifaddr(&out).ok_or_else(|| {
            CrcError::retriable(CrcError::Cluster(format!(
                "no IP address assigned to '{}' yet",
                self.config.get_name()
            )))
        })
    }

    async fn remove(&self) -> CrcResult<()> {
        if self.get_state().await? == VmState::None {
            return Ok(());
        }

        if let Err(e) = self.virsh(&["destroy", self.config.get_name().as_str()]).await {
            tracing::debug!("ignoring destroy failure before undefine: {}", e);
        }
        self.virsh(&["undefine", self.config.get_name().as_str()]).await?;

        match tokio::fs::remove_file(self.disk_path()).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }

    async fn set_memory(&mut self, memory_mib: u32) -> CrcResult<()> {
        let kib = (u64::from(memory_mib) * 1024).to_string();
        let name = self.config.get_name().clone();
        self.virsh(&["setmaxmem", name.as_str(), kib.as_str(), "--config"])
            .await?;
        self.virsh(&["setmem", name.as_str(), kib.as_str(), "--config"])
            .await?;
        self.config.set_memory_mib(memory_mib);
        Ok(())
    }

    async fn set_cpus(&mut self, cpus: u32) -> CrcResult<()> {
        let count = cpus.to_string();
        let name = self.config.get_name().clone();
        self.virsh(&["setvcpus", name.as_str(), count.as_str(), "--maximum", "--config"])
            .await?;
        self.virsh(&["setvcpus", name.as_str(), count.as_str(), "--config"])
            .await?;
        self.config.set_cpus(cpus);
        Ok(())
    }

    async fn set_disk_size(&mut self, disk_size_gib: u32) -> CrcResult<()> {
        if disk_size_gib < *self.config.get_disk_size_gib() {
            return Err(CrcError::Validation(format!(
                "current disk image capacity is bigger than the requested size ({} GiB > {} GiB)",
                self.config.get_disk_size_gib(),
                disk_size_gib
            )));
        }

        let disk = self.disk_path();
        let size = format!("{disk_size_gib}G");
        let args = [OsStr::new("resize"), disk.as_os_str(), OsStr::new(&size)];
        utils::run_command("qemu-img", args).await?;
        self.config.set_disk_size_gib(disk_size_gib);
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn parse_domstate(out: &str) -> VmState {
    match out.trim() {
        "running" => VmState::Running,
        "shut off" | "paused" | "pmsuspended" => VmState::Stopped,
        "in shutdown" => VmState::Stopping,
        "blocked" => VmState::Starting,
        _ => VmState::Error,
    }
}

fn parse_domifaddr(out: &str) -> Option<String> {
    out.lines()
        .filter(|line| line.contains("ipv4"))
        .filter_map(|line| line.split_whitespace().last())
        .filter_map(|addr| addr.split('/').next())
        .map(str::to_string)
        .next()
}

fn xml_escape(value: &str) -> String {
    value
        .replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('\'', "&apos;")
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
