use std::{future::Future, path::Path};

use tokio_util::sync::CancellationToken;

use super::{MachineClient, StartConfig, StartResult, StartStage};
use crate::{
    bundle::BundleInfo,
    cluster::{self, CertExpiryState, DnsSetup, Oc, SystemdCommander},
    config::{self, validate, DEFAULT_DISK_SIZE_GIB, DISABLE_TIME_SYNC_ENV_VAR},
    driver::{Driver, MachineConfig, NetworkMode, VmState},
    ssh::Runner,
    CrcError, CrcResult,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// State shared by the post-boot stages.
struct Provisioning<'a> {
    client: &'a MachineClient,
    cancel: &'a CancellationToken,
    start_config: &'a StartConfig,
    driver: &'a dyn Driver,
    bundle: &'a BundleInfo,
    fresh: bool,
    pull_secret: Option<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MachineClient {
    pub(super) async fn start_instance(
        &self,
        cancel: &CancellationToken,
        start_config: &StartConfig,
    ) -> CrcResult<StartResult> {
        validate::validate_start_resources(
            *start_config.get_cpus(),
            *start_config.get_memory_mib(),
            *start_config.get_disk_size_gib(),
            self.config.get_bool(config::ENABLE_CLUSTER_MONITORING),
        )?;

        let fresh = !self.store().exists(&self.name).await?;
        let (driver, bundle, pull_secret) = if fresh {
            let (driver, bundle, pull_secret) = self.create_instance(start_config).await?;
            (driver, bundle, Some(pull_secret))
        } else {
            let mut driver = self.load_driver().await?;
            let bundle = self.load_instance_bundle(driver.as_ref(), start_config).await?;

            if driver.get_state().await? == VmState::Running {
                tracing::info!("a CRC VM for OpenShift {} is already running", bundle.get_openshift_version());
                let proxy = self.proxy_config(&bundle).await?;
                return Ok(StartResult {
                    status: VmState::Running,
                    kubelet_started: true,
                    cluster_config: self.cluster_config(&bundle, &proxy).await?,
                });
            }

            self.update_vm_config(driver.as_mut(), start_config).await?;
            self.store().save(driver.get_machine_config()).await?;
            (driver, bundle, None)
        };

        if cancel.is_cancelled() {
            return Err(CrcError::Cancelled);
        }

        tracing::info!("starting the CRC VM for OpenShift {}", bundle.get_openshift_version());
        driver.start().await?;

        Provisioning {
            client: self,
            cancel,
            start_config,
            driver: driver.as_ref(),
            bundle: &bundle,
            fresh,
            pull_secret,
        }
        .run()
        .await
    }

    async fn create_instance(
        &self,
        start_config: &StartConfig,
    ) -> CrcResult<(Box<dyn Driver>, BundleInfo, String)> {
        let pull_secret = start_config.get_pull_secret().value().await?;

        let bundle = self.bundles.get(start_config.get_bundle_path()).await?;
        bundle.verify_disk_image().await?;

        let network_mode = NetworkMode::from_setting(&self.config.get_string(config::NETWORK_MODE));
        let machine_config = MachineConfig::builder()
            .name(self.name.as_str())
            .bundle_name(bundle.get_bundle_name())
            .driver_name(self.drivers.driver_name())
            .cpus(*start_config.get_cpus())
            .memory_mib(*start_config.get_memory_mib())
            .disk_size_gib(*start_config.get_disk_size_gib())
            .image_source_path(bundle.get_disk_image_path())
            .image_format(bundle.get_disk_image_format())
            .ssh_key_path(bundle.get_ssh_key_path())
            .kernel(bundle.get_kernel_path())
            .initramfs(bundle.get_initramfs_path())
            .kernel_cmdline(bundle.get_kernel_cmdline())
            .network_mode(network_mode)
            .build();

        tracing::info!("creating CRC VM for OpenShift {}", bundle.get_openshift_version());
        let store = self.store();
        store.save(&machine_config).await?;

        let created = match self.drivers.new_driver(machine_config) {
            Ok(driver) => driver.create().await.map(|()| driver),
            Err(e) => Err(e),
        };

        match created {
            Ok(driver) => Ok((driver, bundle, pull_secret)),
            Err(e) => {
                if let Err(cleanup) = store.remove(&self.name).await {
                    tracing::warn!("cannot remove the registration of '{}': {}", self.name, cleanup);
                }
                Err(e)
            }
        }
    }

    async fn load_instance_bundle(
        &self,
        driver: &dyn Driver,
        start_config: &StartConfig,
    ) -> CrcResult<BundleInfo> {
        let existing = driver.get_bundle_name()?;
        let requested = file_name(start_config.get_bundle_path());
        if requested != existing {
            return Err(CrcError::BundleMismatch { requested, existing });
        }

        self.bundles.get_cached(&existing).await
    }

    async fn update_vm_config(&self, driver: &mut dyn Driver, start_config: &StartConfig) -> CrcResult<()> {
        let current = driver.get_machine_config().clone();

        let memory = *start_config.get_memory_mib();
        if memory != *current.get_memory_mib() {
            tracing::debug!("updating CRC VM memory to {} MiB", memory);
            skip_not_implemented(driver.set_memory(memory).await)?;
        }

        let cpus = *start_config.get_cpus();
        if cpus != *current.get_cpus() {
            tracing::debug!("updating CRC VM vCPUs to {}", cpus);
            skip_not_implemented(driver.set_cpus(cpus).await)?;
        }

        let disk_size = *start_config.get_disk_size_gib();
        if disk_size != DEFAULT_DISK_SIZE_GIB && disk_size != *current.get_disk_size_gib() {
            tracing::debug!("updating CRC VM disk size to {} GiB", disk_size);
            skip_not_implemented(driver.set_disk_size(disk_size).await)?;
        }

        Ok(())
    }
}

impl Provisioning<'_> {
    async fn run(self) -> CrcResult<StartResult> {
        let options = &self.client.options;
        let driver = self.driver;

        stage(StartStage::WaitForRunning, self.cancel, async {
            options
                .wait_for_running
                .run(self.cancel, || async move {
                    match driver.get_state().await? {
                        VmState::Running => Ok(()),
                        state => Err(CrcError::retriable(CrcError::Cluster(format!(
                            "VM is {state}, waiting for it to run"
                        )))),
                    }
                })
                .await
        })
        .await?;

        let ip = stage(StartStage::ResolveIp, self.cancel, async {
            options
                .resolve_ip
                .run(self.cancel, || self.client.instance_ip(driver))
                .await
        })
        .await?;

        let runner = stage(StartStage::OpenSsh, self.cancel, async {
            self.client
                .ssh
                .create_runner(self.client.ssh_endpoint(driver, &ip))
        })
        .await?;

        let result = self.provision(runner.as_ref(), &ip).await;
        if let Err(e) = runner.close().await {
            tracing::debug!("cannot close SSH runner: {}", e);
        }
        result
    }

    async fn provision(&self, runner: &dyn Runner, ip: &str) -> CrcResult<StartResult> {
        let client = self.client;
        let options = &client.options;
        let cancel = self.cancel;
        let vsock = self.driver.get_machine_config().get_network_mode().is_vsock();

        stage(StartStage::WaitForSsh, cancel, cluster::wait_for_ssh(runner, options.wait_for_ssh, cancel)).await?;
        tracing::info!("CRC VM is running");

        stage(StartStage::UpdateSshKey, cancel, async {
            let private_key = client.paths.get_private_key_path(&client.name);
            if !private_key.exists() {
                tracing::info!("generating new SSH key pair");
                client.keys.generate_key_pair(&private_key).await?;
            }
            cluster::update_authorized_key(runner, &client.paths.get_public_key_path(&client.name)).await?;
            Ok(())
        })
        .await?;

        stage(StartStage::CopyKubeconfig, cancel, async {
            let kubeconfig = client.paths.get_kubeconfig_path(&client.name);
            if kubeconfig.exists() {
                return Ok(());
            }
            tracing::info!("copying kubeconfig file to instance dir");
            if let Some(parent) = kubeconfig.parent() {
                tokio::fs::create_dir_all(parent).await?;
            }
            tokio::fs::copy(self.bundle.get_kubeconfig_path(), &kubeconfig).await?;
            Ok(())
        })
        .await?;

        stage(StartStage::GrowFilesystem, cancel, cluster::grow_filesystem(runner)).await?;

        stage(StartStage::TimeSync, cancel, async {
            if env_flag(DISABLE_TIME_SYNC_ENV_VAR) {
                tracing::debug!("network time synchronization left off");
                return Ok(());
            }
            tracing::info!("starting network time synchronization in CRC VM");
            cluster::enable_time_sync(runner).await
        })
        .await?;

        stage(StartStage::AddNameserver, cancel, async {
            let nameserver = self.start_config.get_nameserver();
            if !nameserver.is_empty() {
                cluster::add_nameserver(runner, nameserver).await?;
            }
            Ok(())
        })
        .await?;

        let proxy = stage(StartStage::ProxyConfig, cancel, async {
            let mut proxy = client.proxy_config(self.bundle).await?;
            if proxy.is_enabled() {
                proxy.add_no_proxy(ip);
            }
            Ok(proxy)
        })
        .await?;

        let dns = DnsSetup {
            name: &client.name,
            ip,
            bundle: self.bundle,
            vsock,
        };
        stage(StartStage::DnsPostStart, cancel, cluster::run_dns_post_start(runner, &dns)).await?;

        stage(StartStage::DnsCheck, cancel, self.check_dns(runner, ip, vsock)).await?;

        stage(StartStage::SyncGuestConfig, cancel, async {
            if let Some(pull_secret) = &self.pull_secret {
                cluster::add_pull_secret_to_instance_disk(runner, pull_secret).await?;
            }
            if proxy.is_enabled() {
                tracing::info!("adding proxy configuration to kubelet and crio service");
                cluster::add_proxy_to_kubelet_and_crio(runner, &proxy).await?;
            }
            Ok(())
        })
        .await?;

        stage(StartStage::Certificates, cancel, async {
            tracing::info!("verifying validity of the kubelet certificates");
            match cluster::check_certs_validity(runner).await {
                (CertExpiryState::NotExpired, _) => Ok(()),
                (CertExpiryState::Expired, _) => {
                    tracing::info!("kubelet client certificate has expired, renewing it [will take up to 5 minutes]");
                    cluster::regenerate_certificates(runner, options.cert_renewal, cancel).await
                }
                (CertExpiryState::Unknown, error) => Err(error.unwrap_or_else(|| {
                    CrcError::Cluster("cannot read the kubelet certificate expiry date".to_string())
                })),
            }
        })
        .await?;

        stage(StartStage::StartKubelet, cancel, async {
            tracing::info!("starting OpenShift kubelet service");
            SystemdCommander::new(runner).start("kubelet").await?;
            tokio::time::sleep(options.kubelet_settle_delay).await;
            Ok(())
        })
        .await?;

        let oc = Oc::new(runner);
        stage(StartStage::WaitForControlPlane, cancel, async {
            cluster::wait_for_control_plane(oc, options.openshift_resource, cancel).await?;
            cluster::approve_node_csr(oc).await?;
            Ok(())
        })
        .await?;

        stage(StartStage::ClusterProxy, cancel, async {
            if !proxy.is_enabled() {
                return Ok(());
            }
            tracing::info!("adding proxy configuration to the cluster");
            cluster::add_proxy_config_to_cluster(runner, &proxy, options.openshift_resource, cancel).await?;
            tracing::info!("waiting for the proxy configuration to be applied");
            cluster::wait_for_proxy_propagation(oc, &proxy, options.proxy_propagation, cancel).await
        })
        .await?;

        stage(StartStage::ClusterIdentity, cancel, async {
            let Some(pull_secret) = &self.pull_secret else {
                return Ok(());
            };
            tracing::info!("adding user's pull secret to the cluster");
            cluster::add_pull_secret_to_cluster(oc, pull_secret).await?;
            tracing::info!("updating cluster ID");
            cluster::update_cluster_id(oc).await
        })
        .await?;

        stage(StartStage::Monitoring, cancel, async {
            if !client.config.get_bool(config::ENABLE_CLUSTER_MONITORING) {
                return Ok(());
            }
            tracing::info!("enabling cluster monitoring operator");
            cluster::start_monitoring(oc).await
        })
        .await?;

        stage(StartStage::RequestHeaderCa, cancel, async {
            tracing::debug!("waiting for update of client-ca request header");
            cluster::wait_for_request_header_client_ca_file(oc, options.request_header_ca, cancel).await?;
            cluster::delete_openshift_apiserver_pods(oc, options.apiserver_pods, cancel).await
        })
        .await?;

        if self.fresh {
            tracing::debug!("first start of '{}' completed", client.name);
        }
        tracing::warn!(
            "the cluster might report a degraded or error state, this is expected since several operators have been disabled to lower the resource usage"
        );

        Ok(StartResult {
            status: self.driver.get_state().await?,
            kubelet_started: true,
            cluster_config: client.cluster_config(self.bundle, &proxy).await?,
        })
    }

    async fn check_dns(&self, runner: &dyn Runner, ip: &str, vsock: bool) -> CrcResult<()> {
        let options = &self.client.options;

        tracing::info!("checking internal and public DNS query");
        if let Err(e) = cluster::check_internal_dns(runner, self.bundle, options.internal_dns, self.cancel).await {
            if !vsock || e.is_cancelled() {
                return Err(e);
            }
            tracing::warn!("failed internal DNS query: {}", e);
        }

        if let Err(e) = cluster::check_public_dns(runner).await {
            tracing::warn!("failed public DNS query from the cluster: {}", e);
        }

        tracing::info!("checking DNS query from host");
        if let Err(e) = cluster::check_dns_from_host(self.client.resolver.as_ref(), self.bundle, ip).await {
            if !vsock {
                return Err(e);
            }
            tracing::warn!("failed to query DNS from host: {}", e);
        }

        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Runs one stage, failing with the stage name if it errors or the token fires first.
async fn stage<T>(
    stage: StartStage,
    cancel: &CancellationToken,
    work: impl Future<Output = CrcResult<T>>,
) -> CrcResult<T> {
    tracing::debug!("running start stage {}", stage);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(CrcError::stage(stage, CrcError::Cancelled)),
        result = work => result.map_err(|e| CrcError::stage(stage, e)),
    }
}

fn skip_not_implemented(result: CrcResult<()>) -> CrcResult<()> {
    match result {
        Err(CrcError::DriverNotImplemented(what)) => {
            tracing::warn!("ignoring: the driver does not support {}", what);
            Ok(())
        }
        other => other,
    }
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Reads a boolean flag from the environment. Unset or unparsable values are `false`.
fn env_flag(name: &str) -> bool {
    std::env::var(name).is_ok_and(|value| {
        matches!(value.as_str(), "1" | "t" | "T" | "true" | "TRUE" | "True")
    })
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::sync::{atomic::Ordering, Arc};

    use super::*;
    use crate::{
        config::DEFAULT_API_URL,
        machine::{
            testing::{start_config, Harness, PULL_SECRET},
            Client,
        },
    };

    const KUBELET_PULL_SECRET: &str = "/var/lib/kubelet/config.json";

    #[test_log::test(tokio::test)]
    async fn test_start_creates_and_provisions_a_fresh_vm() -> anyhow::Result<()> {
        let harness = Harness::new()?;

        let result = harness
            .client
            .start(CancellationToken::new(), harness.start_config())
            .await?;

        assert_eq!(result.status, VmState::Running);
        assert!(result.kubelet_started);
        assert_eq!(result.cluster_config.kubeadmin_pass, "hunter2");
        assert_eq!(result.cluster_config.cluster_api, DEFAULT_API_URL);
        assert_eq!(result.cluster_config.cluster_ca_cert, "LS0tLS1CRUdJTg==");

        assert_eq!(harness.hypervisor.creates.load(Ordering::SeqCst), 1);
        assert_eq!(harness.hypervisor.starts.load(Ordering::SeqCst), 1);
        assert!(harness.client.exists().await?);
        assert!(harness.paths.get_kubeconfig_path("crc").exists());
        assert!(harness.paths.get_public_key_path("crc").exists());

        let runner = &harness.runner;
        assert_eq!(
            runner.file(KUBELET_PULL_SECRET),
            Some((PULL_SECRET.to_string(), 0o600))
        );
        assert!(runner.ran("sudo xfs_growfs /"));
        assert!(runner.ran("sudo timedatectl set-ntp on"));
        assert!(runner.ran("sudo systemctl start kubelet"));
        assert!(runner.ran("patch clusterversion version"));
        assert!(runner.ran("delete pod --all -n openshift-apiserver"));
        assert!(!runner.ran("cluster-monitoring-operator"));

        Ok(())
    }

    #[tokio::test]
    async fn test_start_on_a_running_vm_returns_immediately() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness
            .client
            .start(CancellationToken::new(), harness.start_config())
            .await?;
        let commands = harness.runner.commands().len();

        let result = harness
            .client
            .start(CancellationToken::new(), harness.start_config())
            .await?;

        assert_eq!(result.status, VmState::Running);
        assert!(result.kubelet_started);
        assert_eq!(harness.hypervisor.starts.load(Ordering::SeqCst), 1);
        assert_eq!(harness.runner.commands().len(), commands);

        Ok(())
    }

    #[tokio::test]
    async fn test_restart_applies_resource_changes_and_skips_identity() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness
            .client
            .start(CancellationToken::new(), harness.start_config())
            .await?;
        harness.client.stop().await?;

        let config = StartConfig::builder()
            .bundle_path(harness.bundle_path())
            .cpus(4)
            .memory_mib(10240)
            .disk_size_gib(31)
            .pull_secret(Arc::new(crate::pullsecret::StaticPullSecret(String::new())))
            .build();
        harness.client.start(CancellationToken::new(), config).await?;

        let changes = harness
            .hypervisor
            .memory_changes
            .lock()
            .map(|changes| changes.clone())
            .unwrap_or_default();
        assert_eq!(changes, vec![10240]);

        let saved = harness.client.store().load("crc").await?;
        assert_eq!(*saved.get_memory_mib(), 10240);
        assert_eq!(harness.hypervisor.creates.load(Ordering::SeqCst), 1);

        let identity_updates = harness
            .runner
            .commands()
            .iter()
            .filter(|command| command.contains("patch clusterversion version"))
            .count();
        assert_eq!(identity_updates, 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_start_rejects_a_different_bundle() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness
            .client
            .start(CancellationToken::new(), harness.start_config())
            .await?;
        harness.client.stop().await?;

        let other = harness.paths.get_cache_dir().join("crc_libvirt_4.7.0.crcbundle");
        let error = harness
            .client
            .start(CancellationToken::new(), start_config(other))
            .await
            .err();

        match error {
            Some(CrcError::BundleMismatch { requested, existing }) => {
                assert_eq!(requested, "crc_libvirt_4.7.0.crcbundle");
                assert_eq!(existing, "crc_libvirt_4.6.1.crcbundle");
            }
            other => panic!("unexpected result: {other:?}"),
        }
        assert_eq!(harness.hypervisor.starts.load(Ordering::SeqCst), 1);

        Ok(())
    }

    #[tokio::test]
    async fn test_start_names_the_failed_stage() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.runner.fail("exit 0", "connection refused");

        let error = harness
            .client
            .start(CancellationToken::new(), harness.start_config())
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("start should fail"))?;

        assert_eq!(error.failed_stage(), Some(StartStage::WaitForSsh));
        assert!(!error.is_cancelled());
        assert!(!harness.runner.ran("systemctl start kubelet"));

        Ok(())
    }

    #[tokio::test]
    async fn test_start_validates_resources_first() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let config = StartConfig::builder()
            .bundle_path(harness.bundle_path())
            .cpus(2)
            .memory_mib(9216)
            .disk_size_gib(31)
            .pull_secret(Arc::new(crate::pullsecret::StaticPullSecret(PULL_SECRET.to_string())))
            .build();

        let result = harness.client.start(CancellationToken::new(), config).await;

        assert!(matches!(result, Err(CrcError::Validation(_))));
        assert!(!harness.client.exists().await?);
        assert_eq!(harness.hypervisor.creates.load(Ordering::SeqCst), 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_failed_create_removes_the_registration() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.hypervisor.fail_create.store(true, Ordering::SeqCst);

        let result = harness
            .client
            .start(CancellationToken::new(), harness.start_config())
            .await;

        assert!(matches!(result, Err(CrcError::Cluster(_))));
        assert!(!harness.client.exists().await?);

        Ok(())
    }

    #[tokio::test]
    async fn test_cancelled_start_does_not_boot() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = harness.client.start(cancel, harness.start_config()).await;

        assert!(matches!(result, Err(CrcError::Cancelled)));
        assert_eq!(harness.hypervisor.starts.load(Ordering::SeqCst), 0);

        Ok(())
    }

    #[tokio::test]
    async fn test_proxy_settings_reach_guest_and_cluster() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness
            .config
            .set(config::HTTPS_PROXY, "https://proxy.example.com:3128".into())?;
        harness
            .runner
            .respond("openshift-marketplace", "HTTPS_PROXY=https://proxy.example.com:3128");

        let result = harness
            .client
            .start(CancellationToken::new(), harness.start_config())
            .await?;

        let proxy = result
            .cluster_config
            .proxy_config
            .ok_or_else(|| anyhow::anyhow!("proxy config missing"))?;
        let no_proxy = proxy.get_no_proxy_string();
        assert!(no_proxy.contains(".testing"));
        assert!(no_proxy.contains("192.168.130.11"));
        assert!(harness.runner.ran("sudo systemctl restart crio"));
        assert!(harness.runner.ran("patch proxy cluster"));

        Ok(())
    }

    #[tokio::test]
    async fn test_host_dns_failure_fails_the_dns_check() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.resolver.fail.store(true, Ordering::SeqCst);

        let error = harness
            .client
            .start(CancellationToken::new(), harness.start_config())
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("start should fail"))?;

        assert_eq!(error.failed_stage(), Some(StartStage::DnsCheck));
        assert!(!harness.runner.ran("sudo systemctl start kubelet"));

        Ok(())
    }

    #[tokio::test]
    async fn test_internal_dns_failure_fails_the_dns_check() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.runner.fail("host -R 3 foo.", "connection timed out; no servers could be reached");

        let error = harness
            .client
            .start(CancellationToken::new(), harness.start_config())
            .await
            .err()
            .ok_or_else(|| anyhow::anyhow!("start should fail"))?;

        assert_eq!(error.failed_stage(), Some(StartStage::DnsCheck));

        Ok(())
    }

    #[tokio::test]
    async fn test_public_dns_failure_only_warns() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness.runner.fail("host -R 3 quay.io", "no servers could be reached");

        let result = harness
            .client
            .start(CancellationToken::new(), harness.start_config())
            .await?;

        assert_eq!(result.status, VmState::Running);
        assert!(harness.runner.ran("host -R 3 quay.io"));

        Ok(())
    }

    #[tokio::test]
    async fn test_dns_failures_are_tolerated_over_vsock() -> anyhow::Result<()> {
        let harness = Harness::new()?;
        harness
            .config
            .set(config::NETWORK_MODE, config::VSOCK_NETWORK_MODE.into())?;
        harness.resolver.fail.store(true, Ordering::SeqCst);
        harness.runner.fail("host -R 3 foo.", "connection timed out; no servers could be reached");

        let result = harness
            .client
            .start(CancellationToken::new(), harness.start_config())
            .await?;

        assert_eq!(result.status, VmState::Running);
        assert!(result.kubelet_started);
        assert!(harness.runner.ran("sudo systemctl start kubelet"));

        Ok(())
    }

    #[test]
    fn test_env_flag() {
        assert!(!env_flag("CRC_TEST_FLAG_THAT_IS_NOT_SET"));
    }
}
