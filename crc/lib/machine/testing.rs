use std::{
    net::IpAddr,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc, Mutex, PoisonError,
    },
    time::Duration,
};

use async_trait::async_trait;
use tempfile::TempDir;

use super::{LifecycleOptions, MachineClient, StartConfig};
use crate::{
    bundle::{self, BundleCache},
    cluster::{HostResolver, RetryPolicy},
    config::{Config, CrcPaths, InMemoryStorage},
    driver::{Driver, DriverFactory, MachineConfig, VmState},
    pullsecret::StaticPullSecret,
    ssh::{
        fake::{ScriptedRunner, ScriptedRunnerFactory},
        KeyPairGenerator,
    },
    CrcError, CrcResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

pub(super) const GUEST_IP: &str = "192.168.130.11";

pub(super) const BUNDLE_FILE: &str = "crc_libvirt_4.6.1.crcbundle";

pub(super) const PULL_SECRET: &str = r#"{"auths":{"quay.io":{"auth":"dXNlcjpwYXNz"}}}"#;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// State shared by every driver handle the fake factory builds.
#[derive(Default)]
pub(super) struct FakeHypervisor {
    pub(super) state: Mutex<Option<VmState>>,
    pub(super) creates: AtomicUsize,
    pub(super) starts: AtomicUsize,
    pub(super) fail_create: AtomicBool,
    pub(super) fail_stop: AtomicBool,
    pub(super) fail_remove: AtomicBool,
    pub(super) memory_changes: Mutex<Vec<u32>>,
}

pub(super) struct FakeDriver {
    config: MachineConfig,
    hypervisor: Arc<FakeHypervisor>,
}

pub(super) struct FakeDriverFactory {
    pub(super) hypervisor: Arc<FakeHypervisor>,
}

/// Resolves every hostname to one address until told to fail.
pub(super) struct FakeResolver {
    address: IpAddr,
    pub(super) fail: AtomicBool,
}

struct FakeKeys;

/// A machine client wired to fakes, with its home directory and the guest runner.
pub(super) struct Harness {
    pub(super) client: MachineClient,
    pub(super) paths: CrcPaths,
    pub(super) config: Arc<Config>,
    pub(super) hypervisor: Arc<FakeHypervisor>,
    pub(super) runner: Arc<ScriptedRunner>,
    pub(super) resolver: Arc<FakeResolver>,
    _home: TempDir,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl FakeHypervisor {
    pub(super) fn state(&self) -> VmState {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .unwrap_or(VmState::None)
    }

    pub(super) fn set_state(&self, state: VmState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state);
    }
}

impl Harness {
    pub(super) fn new() -> anyhow::Result<Self> {
        let home = TempDir::new()?;
        let paths = CrcPaths::new(home.path().join(".crc"));
        bundle::tests::write_extracted_bundle(&paths.get_cache_dir())?;

        let config = Arc::new(Config::with_crc_settings(InMemoryStorage::default(), &paths));
        let hypervisor = Arc::new(FakeHypervisor::default());
        let ssh = Arc::new(ScriptedRunnerFactory::default());
        ssh.runner
            .respond("openssl x509", "2999-01-01T00:00:00+00:00")
            .respond("requestheader-client-ca-file", "LS0tLS1CRUdJTg==");
        let runner = ssh.runner.clone();
        let resolver = Arc::new(FakeResolver {
            address: GUEST_IP.parse()?,
            fail: AtomicBool::new(false),
        });

        let client = MachineClient::builder()
            .paths(paths.clone())
            .config(config.clone())
            .drivers(Arc::new(FakeDriverFactory {
                hypervisor: hypervisor.clone(),
            }))
            .ssh(ssh)
            .keys(Arc::new(FakeKeys))
            .bundles(Arc::new(BundleCache::new(paths.clone())))
            .resolver(resolver.clone())
            .options(fast_options())
            .build();

        Ok(Self {
            client,
            paths,
            config,
            hypervisor,
            runner,
            resolver,
            _home: home,
        })
    }

    pub(super) fn bundle_path(&self) -> PathBuf {
        self.paths.get_cache_dir().join(BUNDLE_FILE)
    }

    pub(super) fn start_config(&self) -> StartConfig {
        start_config(self.bundle_path())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

pub(super) fn start_config(bundle_path: impl Into<PathBuf>) -> StartConfig {
    StartConfig::builder()
        .bundle_path(bundle_path)
        .cpus(4)
        .memory_mib(9216)
        .disk_size_gib(31)
        .pull_secret(Arc::new(StaticPullSecret(PULL_SECRET.to_string())))
        .build()
}

fn fast_options() -> LifecycleOptions {
    let quick = RetryPolicy::new(3, Duration::ZERO);
    LifecycleOptions::builder()
        .wait_for_running(quick)
        .resolve_ip(quick)
        .wait_for_ssh(quick)
        .internal_dns(quick)
        .cert_renewal(quick)
        .openshift_resource(quick)
        .proxy_propagation(quick)
        .request_header_ca(quick)
        .apiserver_pods(quick)
        .kubelet_settle_delay(Duration::ZERO)
        .build()
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Driver for FakeDriver {
    fn get_machine_config(&self) -> &MachineConfig {
        &self.config
    }

    async fn create(&self) -> CrcResult<()> {
        self.hypervisor.creates.fetch_add(1, Ordering::SeqCst);
        if self.hypervisor.fail_create.load(Ordering::SeqCst) {
            return Err(CrcError::Cluster("cannot define domain".to_string()));
        }
        self.hypervisor.set_state(VmState::Stopped);
        Ok(())
    }

    async fn start(&self) -> CrcResult<()> {
        self.hypervisor.starts.fetch_add(1, Ordering::SeqCst);
        self.hypervisor.set_state(VmState::Running);
        Ok(())
    }

    async fn stop(&self) -> CrcResult<()> {
        if self.hypervisor.fail_stop.load(Ordering::SeqCst) {
            return Err(CrcError::Cluster("guest ignored ACPI shutdown".to_string()));
        }
        self.hypervisor.set_state(VmState::Stopped);
        Ok(())
    }

    async fn kill(&self) -> CrcResult<()> {
        self.hypervisor.set_state(VmState::Stopped);
        Ok(())
    }

    async fn get_state(&self) -> CrcResult<VmState> {
        Ok(self.hypervisor.state())
    }

    async fn get_ip(&self) -> CrcResult<String> {
        Ok(GUEST_IP.to_string())
    }

    async fn remove(&self) -> CrcResult<()> {
        if self.hypervisor.fail_remove.load(Ordering::SeqCst) {
            return Err(CrcError::Cluster("domain is locked".to_string()));
        }
        self.hypervisor.set_state(VmState::None);
        Ok(())
    }

    async fn set_memory(&mut self, memory_mib: u32) -> CrcResult<()> {
        self.hypervisor
            .memory_changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(memory_mib);
        self.config.set_memory_mib(memory_mib);
        Ok(())
    }
}

impl DriverFactory for FakeDriverFactory {
    fn driver_name(&self) -> &str {
        "fake"
    }

    fn new_driver(&self, config: MachineConfig) -> CrcResult<Box<dyn Driver>> {
        Ok(Box::new(FakeDriver {
            config,
            hypervisor: self.hypervisor.clone(),
        }))
    }
}

#[async_trait]
impl HostResolver for FakeResolver {
    async fn lookup(&self, hostname: &str) -> CrcResult<Vec<IpAddr>> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(CrcError::Cluster(format!("lookup {hostname}: no such host")));
        }
        Ok(vec![self.address])
    }
}

#[async_trait]
impl KeyPairGenerator for FakeKeys {
    async fn generate_key_pair(&self, private_key_path: &Path) -> CrcResult<()> {
        if let Some(parent) = private_key_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(private_key_path, "private").await?;
        tokio::fs::write(private_key_path.with_extension("pub"), "ecdsa-sha2-nistp521 AAAA crc\n").await?;
        Ok(())
    }
}
