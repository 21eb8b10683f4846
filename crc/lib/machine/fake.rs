//! An in-memory [`Client`] for exercising the lifecycle wrapper and the daemon API without a
//! hypervisor.

use std::{
    path::PathBuf,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex, PoisonError,
    },
};

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::{Client, ClusterConfig, ClusterStatus, ConsoleResult, StartConfig, StartResult, StartStage};
use crate::{
    config::{DEFAULT_API_URL, DEFAULT_MACHINE_NAME, DEFAULT_WEB_CONSOLE_URL},
    driver::VmState,
    CrcError, CrcResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The address reported by [`FakeMachine::ip`].
pub const FAKE_IP: &str = "192.168.130.11";

/// The OpenShift release reported by [`FakeMachine::status`].
pub const FAKE_OPENSHIFT_VERSION: &str = "4.6.1";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A VM that only exists in memory. It starts out not created.
#[derive(Debug)]
pub struct FakeMachine {
    state: Mutex<VmState>,
    starts: AtomicUsize,
    failing: bool,
    release: Option<CancellationToken>,
    ignore_cancel: bool,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FakeMachine {
    /// A machine whose starts succeed at once.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(VmState::None),
            starts: AtomicUsize::new(0),
            failing: false,
            release: None,
            ignore_cancel: false,
        }
    }

    /// A machine whose starts fail.
    pub fn failing() -> Self {
        Self {
            failing: true,
            ..Self::new()
        }
    }

    /// A machine whose starts block until `release` fires or the start is cancelled.
    pub fn blocking(release: CancellationToken) -> Self {
        Self {
            release: Some(release),
            ..Self::new()
        }
    }

    /// Makes blocked starts wait for the release even after a cancel.
    pub fn ignoring_cancel(mut self) -> Self {
        self.ignore_cancel = true;
        self
    }

    /// Number of starts that reached the machine.
    pub fn get_start_count(&self) -> usize {
        self.starts.load(Ordering::SeqCst)
    }

    /// The current state.
    pub fn get_state(&self) -> VmState {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: VmState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn existing_state(&self) -> CrcResult<VmState> {
        match self.get_state() {
            VmState::None => Err(CrcError::MachineDoesNotExist(DEFAULT_MACHINE_NAME.to_string())),
            state => Ok(state),
        }
    }

    async fn wait_for_release(&self, cancel: &CancellationToken) -> CrcResult<()> {
        let Some(release) = &self.release else {
            return Ok(());
        };

        if self.ignore_cancel {
            release.cancelled().await;
            return Ok(());
        }

        tokio::select! {
            _ = release.cancelled() => Ok(()),
            _ = cancel.cancelled() => Err(CrcError::stage(StartStage::WaitForRunning, CrcError::Cancelled)),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn fake_cluster_config() -> ClusterConfig {
    ClusterConfig {
        cluster_ca_cert: "LS0tLS1CRUdJTg==".to_string(),
        kubeconfig: PathBuf::from("/home/user/.crc/machines/crc/kubeconfig"),
        kubeadmin_pass: "hunter2".to_string(),
        cluster_api: DEFAULT_API_URL.to_string(),
        web_console_url: DEFAULT_WEB_CONSOLE_URL.to_string(),
        proxy_config: None,
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Default for FakeMachine {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Client for FakeMachine {
    fn get_name(&self) -> &str {
        DEFAULT_MACHINE_NAME
    }

    async fn exists(&self) -> CrcResult<bool> {
        Ok(self.get_state() != VmState::None)
    }

    async fn start(&self, cancel: CancellationToken, _config: StartConfig) -> CrcResult<StartResult> {
        self.starts.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(CrcError::stage(
                StartStage::WaitForSsh,
                CrcError::Cluster("SSH never came up".to_string()),
            ));
        }

        if self.get_state() == VmState::None {
            self.set_state(VmState::Stopped);
        }
        self.wait_for_release(&cancel).await?;
        self.set_state(VmState::Running);

        Ok(StartResult {
            status: VmState::Running,
            kubelet_started: true,
            cluster_config: fake_cluster_config(),
        })
    }

    async fn stop(&self) -> CrcResult<VmState> {
        self.existing_state()?;
        self.set_state(VmState::Stopped);
        Ok(VmState::Stopped)
    }

    async fn delete(&self) -> CrcResult<()> {
        self.existing_state()?;
        self.set_state(VmState::None);
        Ok(())
    }

    async fn power_off(&self) -> CrcResult<()> {
        self.existing_state()?;
        self.set_state(VmState::Stopped);
        Ok(())
    }

    async fn status(&self) -> CrcResult<ClusterStatus> {
        let vm_state = self.existing_state()?;
        let running = vm_state == VmState::Running;
        Ok(ClusterStatus {
            vm_state,
            openshift_status: if running { "Running" } else { "Stopped" }.to_string(),
            openshift_version: if running { FAKE_OPENSHIFT_VERSION } else { "" }.to_string(),
            disk_use: if running { 10 << 30 } else { 0 },
            disk_size: if running { 31 << 30 } else { 0 },
        })
    }

    async fn get_console_url(&self) -> CrcResult<ConsoleResult> {
        Ok(ConsoleResult {
            cluster_config: fake_cluster_config(),
            state: self.existing_state()?,
        })
    }

    async fn ip(&self) -> CrcResult<String> {
        self.existing_state()?;
        Ok(FAKE_IP.to_string())
    }

    async fn is_running(&self) -> CrcResult<bool> {
        Ok(self.get_state() == VmState::Running)
    }
}
