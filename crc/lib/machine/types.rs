use std::{fmt, path::PathBuf, sync::Arc, time::Duration};

use getset::Getters;
use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    cluster::{ProxyConfig, RetryPolicy},
    config::KUBELET_SETTLE_DELAY,
    driver::VmState,
    pullsecret::PullSecretLoader,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The named post-boot stages of a start, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StartStage {
    /// Polls the driver until the VM runs.
    WaitForRunning,
    /// Finds the guest address.
    ResolveIp,
    /// Creates the SSH runner.
    OpenSsh,
    /// Waits for the guest SSH server.
    WaitForSsh,
    /// Installs the host key pair in the guest.
    UpdateSshKey,
    /// Copies the bundle kubeconfig into the instance directory.
    CopyKubeconfig,
    /// Grows the guest root filesystem.
    GrowFilesystem,
    /// Enables guest time synchronization.
    TimeSync,
    /// Adds the user nameserver to the guest.
    AddNameserver,
    /// Derives the proxy settings.
    ProxyConfig,
    /// Sets up guest DNS.
    DnsPostStart,
    /// Verifies guest and host DNS.
    DnsCheck,
    /// Writes the pull secret and proxy settings into the guest.
    SyncGuestConfig,
    /// Checks and renews the kubelet certificates.
    Certificates,
    /// Starts the kubelet.
    StartKubelet,
    /// Waits for the API server.
    WaitForControlPlane,
    /// Applies the cluster-wide proxy.
    ClusterProxy,
    /// Gives a fresh cluster its pull secret and identity.
    ClusterIdentity,
    /// Starts cluster monitoring.
    Monitoring,
    /// Waits for the request header CA and restarts the API server pods.
    RequestHeaderCa,
}

/// Parameters of one start, built fresh per request.
#[derive(Clone, Getters, TypedBuilder)]
#[getset(get = "pub with_prefix")]
pub struct StartConfig {
    /// Bundle archive to create the VM from.
    #[builder(setter(into))]
    bundle_path: PathBuf,

    /// Number of vCPUs.
    cpus: u32,

    /// Memory in MiB.
    memory_mib: u32,

    /// Disk size in GiB.
    disk_size_gib: u32,

    /// Extra guest nameserver, empty for none.
    #[builder(default, setter(into))]
    nameserver: String,

    /// Source of the pull secret for fresh VMs.
    pull_secret: Arc<dyn PullSecretLoader>,
}

/// How to reach and log into the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Base64 cluster CA certificate.
    #[serde(rename = "ClusterCACert")]
    pub cluster_ca_cert: String,

    /// Admin kubeconfig on the host.
    #[serde(rename = "KubeConfig")]
    pub kubeconfig: PathBuf,

    /// `kubeadmin` password.
    #[serde(rename = "KubeAdminPass")]
    pub kubeadmin_pass: String,

    /// API server URL.
    #[serde(rename = "ClusterAPI")]
    pub cluster_api: String,

    /// Web console URL.
    #[serde(rename = "WebConsoleURL")]
    pub web_console_url: String,

    /// Proxy settings, when a proxy is in use.
    #[serde(rename = "ProxyConfig")]
    pub proxy_config: Option<ProxyConfig>,
}

/// The outcome of a successful start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StartResult {
    /// VM state read after the last stage.
    pub status: VmState,

    /// Whether the kubelet is running.
    pub kubelet_started: bool,

    /// Cluster access details.
    pub cluster_config: ClusterConfig,
}

/// VM and cluster health.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterStatus {
    /// VM state.
    pub vm_state: VmState,

    /// `Running`, `Starting`, `Degraded`, `Stopped` or `Not Reachable`.
    pub openshift_status: String,

    /// OpenShift release, empty while the VM is not running.
    pub openshift_version: String,

    /// Bytes used on the guest root filesystem.
    pub disk_use: u64,

    /// Size of the guest root filesystem in bytes.
    pub disk_size: u64,
}

/// Console access details of an existing VM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsoleResult {
    /// Cluster access details.
    pub cluster_config: ClusterConfig,

    /// VM state.
    pub state: VmState,
}

/// Retry bounds and delays of the start stages.
#[derive(Debug, Clone, TypedBuilder)]
pub struct LifecycleOptions {
    /// Polling for the Running state after boot.
    #[builder(default = RetryPolicy::new(180, Duration::from_secs(1)))]
    pub wait_for_running: RetryPolicy,

    /// Polling for the guest IP.
    #[builder(default = RetryPolicy::new(60, Duration::from_secs(2)))]
    pub resolve_ip: RetryPolicy,

    /// Waiting for the guest SSH server.
    #[builder(default = RetryPolicy::new(300, Duration::from_secs(1)))]
    pub wait_for_ssh: RetryPolicy,

    /// The internal DNS query.
    #[builder(default = RetryPolicy::new(30, Duration::from_secs(1)))]
    pub internal_dns: RetryPolicy,

    /// The CSR approval loop of the certificate renewal.
    #[builder(default = RetryPolicy::new(60, Duration::from_secs(5)))]
    pub cert_renewal: RetryPolicy,

    /// Waiting for cluster resources, nodes included.
    #[builder(default = RetryPolicy::new(60, Duration::from_secs(2)))]
    pub openshift_resource: RetryPolicy,

    /// Waiting for the proxy to reach the operators.
    #[builder(default = RetryPolicy::new(150, Duration::from_secs(2)))]
    pub proxy_propagation: RetryPolicy,

    /// Waiting for the request header CA.
    #[builder(default = RetryPolicy::new(90, Duration::from_secs(2)))]
    pub request_header_ca: RetryPolicy,

    /// Deleting the API server pods.
    #[builder(default = RetryPolicy::new(60, Duration::from_secs(1)))]
    pub apiserver_pods: RetryPolicy,

    /// Pause after the kubelet starts.
    #[builder(default = KUBELET_SETTLE_DELAY)]
    pub kubelet_settle_delay: Duration,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl StartStage {
    /// The stage name used in errors and logs.
    pub fn as_str(&self) -> &'static str {
        match self {
            StartStage::WaitForRunning => "wait-for-running",
            StartStage::ResolveIp => "resolve-ip",
            StartStage::OpenSsh => "open-ssh",
            StartStage::WaitForSsh => "wait-for-ssh",
            StartStage::UpdateSshKey => "update-ssh-key",
            StartStage::CopyKubeconfig => "copy-kubeconfig",
            StartStage::GrowFilesystem => "grow-filesystem",
            StartStage::TimeSync => "time-sync",
            StartStage::AddNameserver => "add-nameserver",
            StartStage::ProxyConfig => "proxy-config",
            StartStage::DnsPostStart => "dns-post-start",
            StartStage::DnsCheck => "dns-check",
            StartStage::SyncGuestConfig => "sync-guest-config",
            StartStage::Certificates => "certificates",
            StartStage::StartKubelet => "start-kubelet",
            StartStage::WaitForControlPlane => "wait-for-control-plane",
            StartStage::ClusterProxy => "cluster-proxy",
            StartStage::ClusterIdentity => "cluster-identity",
            StartStage::Monitoring => "monitoring",
            StartStage::RequestHeaderCa => "request-header-ca",
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for StartStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Default for LifecycleOptions {
    fn default() -> Self {
        Self::builder().build()
    }
}
