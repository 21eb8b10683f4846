use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use super::{Client, ClusterConfig, ClusterStatus, ConsoleResult, LifecycleOptions, StartConfig, StartResult};
use crate::{
    bundle::{BundleCache, BundleInfo, BundleLoader},
    cluster::{self, HostResolver, Oc, ProxyConfig, SystemResolver},
    config::{self, Config, CrcPaths, DEFAULT_API_URL, DEFAULT_MACHINE_NAME, DEFAULT_SSH_PORT, DEFAULT_WEB_CONSOLE_URL, VSOCK_SSH_PORT},
    driver::{Driver, DriverFactory, MachineStore, PlatformDriverFactory, VmState},
    ssh::{KeyPairGenerator, OpenSsh, Runner, RunnerFactory, SshEndpoint},
    CrcError, CrcResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const VSOCK_HOST_IP: &str = "127.0.0.1";

const NOT_REACHABLE: &str = "Not Reachable";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs lifecycle operations against the driver and the guest.
///
/// Nothing is cached between operations: the registration and a fresh driver handle are loaded
/// at the start of each one.
#[derive(TypedBuilder)]
pub struct MachineClient {
    /// Instance name.
    #[builder(default = DEFAULT_MACHINE_NAME.to_string(), setter(into))]
    pub(super) name: String,

    /// Host file locations.
    pub(super) paths: CrcPaths,

    /// Settings registry.
    pub(super) config: Arc<Config>,

    /// Builds driver handles.
    pub(super) drivers: Arc<dyn DriverFactory>,

    /// Opens SSH runners.
    pub(super) ssh: Arc<dyn RunnerFactory>,

    /// Generates the host key pair.
    pub(super) keys: Arc<dyn KeyPairGenerator>,

    /// Loads bundle metadata.
    pub(super) bundles: Arc<dyn BundleLoader>,

    /// Resolves hostnames on the host.
    pub(super) resolver: Arc<dyn HostResolver>,

    /// Retry bounds of the start stages.
    #[builder(default)]
    pub(super) options: LifecycleOptions,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MachineClient {
    /// Creates a client for the default instance using the host's driver, OpenSSH and resolver.
    pub fn new(paths: CrcPaths, config: Arc<Config>) -> Self {
        Self::builder()
            .drivers(Arc::new(PlatformDriverFactory::new(paths.clone())))
            .ssh(Arc::new(OpenSsh))
            .keys(Arc::new(OpenSsh))
            .bundles(Arc::new(BundleCache::new(paths.clone())))
            .resolver(Arc::new(SystemResolver))
            .paths(paths)
            .config(config)
            .build()
    }

    pub(super) fn store(&self) -> MachineStore {
        MachineStore::new(self.paths.clone())
    }

    pub(super) async fn load_driver(&self) -> CrcResult<Box<dyn Driver>> {
        let machine_config = self.store().load(&self.name).await?;
        self.drivers.new_driver(machine_config)
    }

    pub(super) async fn instance_ip(&self, driver: &dyn Driver) -> CrcResult<String> {
        if driver.get_machine_config().get_network_mode().is_vsock() {
            return Ok(VSOCK_HOST_IP.to_string());
        }
        driver.get_ip().await
    }

    pub(super) fn ssh_endpoint(&self, driver: &dyn Driver, ip: &str) -> SshEndpoint {
        let vsock = driver.get_machine_config().get_network_mode().is_vsock();
        SshEndpoint::builder()
            .host(ip)
            .port(if vsock { VSOCK_SSH_PORT } else { DEFAULT_SSH_PORT })
            .private_keys(vec![
                driver.get_machine_config().get_ssh_key_path().clone(),
                self.paths.get_private_key_path(&self.name),
            ])
            .build()
    }

    pub(super) async fn cluster_config(
        &self,
        bundle: &BundleInfo,
        proxy: &ProxyConfig,
    ) -> CrcResult<ClusterConfig> {
        let kubeadmin_pass = bundle.get_kubeadmin_password().await.map_err(|e| {
            CrcError::InvalidBundle(format!("error reading kubeadmin password from bundle: {e}"))
        })?;

        Ok(ClusterConfig {
            cluster_ca_cert: bundle.get_cluster_ca_cert().await?,
            kubeconfig: self.paths.get_kubeconfig_path(&self.name),
            kubeadmin_pass,
            cluster_api: DEFAULT_API_URL.to_string(),
            web_console_url: DEFAULT_WEB_CONSOLE_URL.to_string(),
            proxy_config: proxy.is_enabled().then(|| proxy.clone()),
        })
    }

    pub(super) async fn proxy_config(&self, bundle: &BundleInfo) -> CrcResult<ProxyConfig> {
        let mut proxy = ProxyConfig::from_config(&self.config).await?;
        if proxy.is_enabled() {
            proxy.add_no_proxy(&format!(".{}", bundle.get_cluster_info().get_base_domain()));
        }
        Ok(proxy)
    }

    async fn running_status(&self, driver: &dyn Driver) -> ClusterStatus {
        let openshift_version = match driver.get_bundle_name() {
            Ok(name) => match self.bundles.get_cached(&name).await {
                Ok(bundle) => bundle.get_openshift_version().to_string(),
                Err(e) => {
                    tracing::debug!("cannot load bundle {}: {}", name, e);
                    String::new()
                }
            },
            Err(e) => {
                tracing::debug!("{}", e);
                String::new()
            }
        };

        let mut status = ClusterStatus {
            vm_state: VmState::Running,
            openshift_status: NOT_REACHABLE.to_string(),
            openshift_version,
            disk_use: 0,
            disk_size: 0,
        };

        let runner = match self.status_runner(driver).await {
            Ok(runner) => runner,
            Err(e) => {
                tracing::debug!("cannot reach the VM: {}", e);
                return status;
            }
        };

        match cluster::get_root_partition_usage(runner.as_ref()).await {
            Ok((size, used)) => {
                status.disk_size = size;
                status.disk_use = used;
            }
            Err(e) => tracing::debug!("cannot get root partition usage: {}", e),
        }

        let monitoring = self.config.get_bool(config::ENABLE_CLUSTER_MONITORING);
        match cluster::get_cluster_operators_status(Oc::new(runner.as_ref()), monitoring).await {
            Ok(operators) => status.openshift_status = operators.openshift_status().to_string(),
            Err(e) => tracing::debug!("cannot get cluster operators status: {}", e),
        }

        if let Err(e) = runner.close().await {
            tracing::debug!("cannot close SSH runner: {}", e);
        }

        status
    }

    async fn status_runner(&self, driver: &dyn Driver) -> CrcResult<Arc<dyn Runner>> {
        let ip = self.instance_ip(driver).await?;
        self.ssh.create_runner(self.ssh_endpoint(driver, &ip))
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Client for MachineClient {
    fn get_name(&self) -> &str {
        &self.name
    }

    async fn exists(&self) -> CrcResult<bool> {
        self.store().exists(&self.name).await
    }

    async fn start(&self, cancel: CancellationToken, config: StartConfig) -> CrcResult<StartResult> {
        self.start_instance(&cancel, &config).await
    }

    async fn stop(&self) -> CrcResult<VmState> {
        let driver = self.load_driver().await?;
        tracing::info!("stopping the instance, this may take a few minutes");

        match driver.stop().await {
            Ok(()) => driver.get_state().await,
            Err(e) => {
                let state = driver.get_state().await.unwrap_or_else(|state_error| {
                    tracing::debug!("cannot read state after failed stop: {}", state_error);
                    VmState::Error
                });
                Err(CrcError::StopFailed {
                    state,
                    source: Box::new(e),
                })
            }
        }
    }

    async fn delete(&self) -> CrcResult<()> {
        let driver = self.load_driver().await?;

        let removed = driver.remove().await;
        let unregistered = self.store().remove(&self.name).await;

        match (removed, unregistered) {
            (Err(e), unregistered) => {
                if let Err(unregister_error) = unregistered {
                    tracing::debug!("registration cleanup also failed: {}", unregister_error);
                }
                Err(CrcError::DriverRemove(Box::new(e)))
            }
            (Ok(()), Err(e)) => Err(CrcError::Unregister(Box::new(e))),
            (Ok(()), Ok(())) => Ok(()),
        }
    }

    async fn power_off(&self) -> CrcResult<()> {
        self.load_driver().await?.kill().await
    }

    async fn status(&self) -> CrcResult<ClusterStatus> {
        if !self.exists().await? {
            return Err(CrcError::MachineDoesNotExist(self.name.clone()));
        }

        let driver = self.load_driver().await?;
        let vm_state = driver.get_state().await?;
        if vm_state != VmState::Running {
            return Ok(ClusterStatus {
                vm_state,
                openshift_status: "Stopped".to_string(),
                openshift_version: String::new(),
                disk_use: 0,
                disk_size: 0,
            });
        }

        Ok(self.running_status(driver.as_ref()).await)
    }

    async fn get_console_url(&self) -> CrcResult<ConsoleResult> {
        let driver = self.load_driver().await?;
        let state = driver.get_state().await?;
        let bundle = self.bundles.get_cached(&driver.get_bundle_name()?).await?;
        let proxy = self.proxy_config(&bundle).await?;

        Ok(ConsoleResult {
            cluster_config: self.cluster_config(&bundle, &proxy).await?,
            state,
        })
    }

    async fn ip(&self) -> CrcResult<String> {
        let driver = self.load_driver().await?;
        self.instance_ip(driver.as_ref()).await
    }

    async fn is_running(&self) -> CrcResult<bool> {
        if !self.exists().await? {
            return Ok(false);
        }
        Ok(self.load_driver().await?.get_state().await? == VmState::Running)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::machine::testing::{Harness, GUEST_IP};

    async fn started() -> anyhow::Result<Harness> {
        let harness = Harness::new()?;
        harness
            .client
            .start(CancellationToken::new(), harness.start_config())
            .await?;
        Ok(harness)
    }

    #[tokio::test]
    async fn test_stop_reports_the_resulting_state() -> anyhow::Result<()> {
        let harness = started().await?;

        assert_eq!(harness.client.stop().await?, VmState::Stopped);
        assert!(!harness.client.is_running().await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_stop_keeps_the_observed_state() -> anyhow::Result<()> {
        let harness = started().await?;
        harness.hypervisor.fail_stop.store(true, Ordering::SeqCst);

        match harness.client.stop().await {
            Err(CrcError::StopFailed { state, .. }) => assert_eq!(state, VmState::Running),
            other => panic!("unexpected result: {other:?}"),
        }

        Ok(())
    }

    #[tokio::test]
    async fn test_delete_removes_vm_and_registration() -> anyhow::Result<()> {
        let harness = started().await?;

        harness.client.delete().await?;

        assert_eq!(harness.hypervisor.state(), VmState::None);
        assert!(!harness.client.exists().await?);
        assert!(matches!(
            harness.client.delete().await,
            Err(CrcError::MachineDoesNotExist(_))
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_delete_reports_driver_failure_but_unregisters() -> anyhow::Result<()> {
        let harness = started().await?;
        harness.hypervisor.fail_remove.store(true, Ordering::SeqCst);

        assert!(matches!(
            harness.client.delete().await,
            Err(CrcError::DriverRemove(_))
        ));
        assert!(!harness.client.exists().await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_power_off_kills_the_vm() -> anyhow::Result<()> {
        let harness = started().await?;

        harness.client.power_off().await?;

        assert_eq!(harness.hypervisor.state(), VmState::Stopped);

        Ok(())
    }

    #[tokio::test]
    async fn test_status_of_a_missing_vm() -> anyhow::Result<()> {
        let harness = Harness::new()?;

        assert!(matches!(
            harness.client.status().await,
            Err(CrcError::MachineDoesNotExist(name)) if name == "crc"
        ));

        Ok(())
    }

    #[tokio::test]
    async fn test_status_of_a_stopped_vm() -> anyhow::Result<()> {
        let harness = started().await?;
        harness.client.stop().await?;

        let status = harness.client.status().await?;

        assert_eq!(status.vm_state, VmState::Stopped);
        assert_eq!(status.openshift_status, "Stopped");
        assert_eq!(status.disk_size, 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_status_of_a_running_vm() -> anyhow::Result<()> {
        let harness = started().await?;
        harness
            .runner
            .respond("--output=size,used,target", "32737570816 9611022336 /sysroot\n")
            .respond(
                "get co -ojson",
                r#"{"items":[{"metadata":{"name":"dns"},"status":{"conditions":[
                    {"type":"Available","status":"True"},
                    {"type":"Progressing","status":"False"},
                    {"type":"Degraded","status":"False"}]}}]}"#,
            );

        let status = harness.client.status().await?;

        assert_eq!(status.vm_state, VmState::Running);
        assert_eq!(status.openshift_status, "Running");
        assert_eq!(status.openshift_version, "4.6.1");
        assert_eq!(status.disk_size, 32737570816);
        assert_eq!(status.disk_use, 9611022336);

        Ok(())
    }

    #[tokio::test]
    async fn test_status_when_the_api_is_unreachable() -> anyhow::Result<()> {
        let harness = started().await?;
        harness.runner.fail("get co", "connection refused");

        let status = harness.client.status().await?;

        assert_eq!(status.openshift_status, NOT_REACHABLE);

        Ok(())
    }

    #[tokio::test]
    async fn test_console_url_and_ip() -> anyhow::Result<()> {
        let harness = started().await?;

        let console = harness.client.get_console_url().await?;
        assert_eq!(console.state, VmState::Running);
        assert_eq!(console.cluster_config.web_console_url, DEFAULT_WEB_CONSOLE_URL);
        assert_eq!(harness.client.ip().await?, GUEST_IP);

        Ok(())
    }
}
