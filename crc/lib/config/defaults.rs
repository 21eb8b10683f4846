use std::{path::PathBuf, sync::LazyLock, time::Duration};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// The directory under the user's home where all crc data is stored.
pub const CRC_HOME_DIR: &str = ".crc";

/// Environment variable that overrides the crc home directory.
pub const CRC_HOME_ENV_VAR: &str = "CRC_HOME";

/// Prefix of environment variables that override config settings.
pub const CRC_ENV_PREFIX: &str = "CRC_";

/// Environment toggle that leaves guest time synchronization untouched.
pub const DISABLE_TIME_SYNC_ENV_VAR: &str = "CRC_DEBUG_ENABLE_STOP_NTP";

/// The name of the single cluster VM.
pub const DEFAULT_MACHINE_NAME: &str = "crc";

/// The minimum and default number of vCPUs.
pub const DEFAULT_CPUS: u32 = 4;

/// The minimum and default amount of memory in MiB.
pub const DEFAULT_MEMORY_MIB: u32 = 9216;

/// The minimum and default disk size in GiB.
pub const DEFAULT_DISK_SIZE_GIB: u32 = 31;

/// The minimum amount of memory in MiB when cluster monitoring is enabled.
pub const MINIMUM_MEMORY_FOR_MONITORING_MIB: u32 = 14336;

/// The guest user used for SSH.
pub const DEFAULT_SSH_USER: &str = "core";

/// The guest SSH port when the VM has its own IP.
pub const DEFAULT_SSH_PORT: u16 = 22;

/// The host-forwarded SSH port in vsock network mode.
pub const VSOCK_SSH_PORT: u16 = 2222;

/// The gateway address of the user-mode network in vsock mode.
pub const VSOCK_GATEWAY: &str = "192.168.127.1";

/// The address the dnsmasq container is given on the podman network.
pub const DNSMASQ_CONTAINER_IP: &str = "10.88.0.8";

/// The default OpenShift web console URL.
pub const DEFAULT_WEB_CONSOLE_URL: &str = "https://console-openshift-console.apps-crc.testing";

/// The default OpenShift API URL.
pub const DEFAULT_API_URL: &str = "https://api.crc.testing:6443";

/// The cluster's base domain suffix.
pub const CLUSTER_DOMAIN: &str = ".crc.testing";

/// The cluster's application routes domain suffix.
pub const APPS_DOMAIN: &str = ".apps-crc.testing";

/// Config file name under the crc home.
pub const CONFIG_FILE: &str = "crc.json";

/// CLI log file name under the crc home.
pub const LOG_FILE: &str = "crc.log";

/// Daemon log file name under the crc home.
pub const DAEMON_LOG_FILE: &str = "crcd.log";

/// Daemon API socket name under the crc home.
pub const DAEMON_SOCKET_FILE: &str = "crc.sock";

/// Number of start/stop/delete requests the daemon accepts at once, the running one included.
pub const MUTATING_QUEUE_CAPACITY: usize = 10;

/// How long stop or delete waits for an in-flight start to abort.
pub const START_ABORT_TIMEOUT: Duration = Duration::from_secs(15);

/// Warm-up delay applied after starting the kubelet.
pub const KUBELET_SETTLE_DELAY: Duration = Duration::from_secs(60);

/// The path where all crc data is stored when `CRC_HOME` is not set.
pub static DEFAULT_CRC_HOME: LazyLock<PathBuf> = LazyLock::new(|| {
    dirs::home_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join(CRC_HOME_DIR)
});
