use super::{
    validate, ApplyMode, Config, CrcPaths, Storage, DEFAULT_CPUS, DEFAULT_DISK_SIZE_GIB,
    DEFAULT_MEMORY_MIB,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Number of vCPUs.
pub const CPUS: &str = "cpus";

/// Memory in MiB.
pub const MEMORY: &str = "memory";

/// Disk size in GiB.
pub const DISK_SIZE: &str = "disk-size";

/// Extra nameserver added to the guest.
pub const NAMESERVER: &str = "nameserver";

/// Pull secret file used on first start.
pub const PULL_SECRET_FILE: &str = "pull-secret-file";

/// Bundle archive path.
pub const BUNDLE: &str = "bundle";

/// Disables the startup update check.
pub const DISABLE_UPDATE_CHECK: &str = "disable-update-check";

/// Enables experimental features.
pub const EXPERIMENTAL_FEATURES: &str = "enable-experimental-features";

/// Guest networking mode, `default` or `vsock`.
pub const NETWORK_MODE: &str = "network-mode";

/// HTTP proxy.
pub const HTTP_PROXY: &str = "http-proxy";

/// HTTPS proxy.
pub const HTTPS_PROXY: &str = "https-proxy";

/// Hosts that bypass the proxy.
pub const NO_PROXY: &str = "no-proxy";

/// CA bundle of the proxy.
pub const PROXY_CA_FILE: &str = "proxy-ca-file";

/// Telemetry consent, `yes` or `no`.
pub const CONSENT_TELEMETRY: &str = "consent-telemetry";

/// Enables the cluster monitoring operator.
pub const ENABLE_CLUSTER_MONITORING: &str = "enable-cluster-monitoring";

/// Value of [`NETWORK_MODE`] that routes guest traffic over vsock.
pub const VSOCK_NETWORK_MODE: &str = "vsock";

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Config {
    /// Creates a registry holding every crc setting, preflight skips included.
    pub fn with_crc_settings(storage: impl Storage + 'static, paths: &CrcPaths) -> Self {
        let mut cfg = Config::new(storage);
        register_settings(&mut cfg, paths);
        crate::preflight::register_settings(&mut cfg);
        cfg
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Registers the crc settings on `cfg`.
pub fn register_settings(cfg: &mut Config, paths: &CrcPaths) {
    use ApplyMode::*;

    cfg.add_setting(CPUS, DEFAULT_CPUS, validate::validate_cpus, RequiresRestart);
    cfg.add_setting(MEMORY, DEFAULT_MEMORY_MIB, validate::validate_memory, RequiresRestart);
    cfg.add_setting(DISK_SIZE, DEFAULT_DISK_SIZE_GIB, validate::validate_disk_size, RequiresRestart);
    cfg.add_setting(NAMESERVER, "", validate::validate_ip_address, Immediate);
    cfg.add_setting(PULL_SECRET_FILE, "", validate::validate_path, Immediate);
    cfg.add_setting(
        BUNDLE,
        paths.get_default_bundle_path().to_string_lossy().into_owned(),
        validate::validate_path,
        RequiresRestart,
    );
    cfg.add_setting(DISABLE_UPDATE_CHECK, false, validate::validate_bool, Immediate);
    cfg.add_setting(EXPERIMENTAL_FEATURES, false, validate::validate_bool, Immediate);
    cfg.add_setting(NETWORK_MODE, "default", validate::validate_network_mode, RequiresRestart);

    cfg.add_setting(HTTP_PROXY, "", validate::validate_uri, Immediate);
    cfg.add_setting(HTTPS_PROXY, "", validate::validate_uri, Immediate);
    cfg.add_setting(NO_PROXY, "", validate::validate_no_proxy, Immediate);
    cfg.add_setting(PROXY_CA_FILE, "", validate::validate_path, Immediate);

    cfg.add_setting(ENABLE_CLUSTER_MONITORING, false, validate::validate_bool, Immediate);
    cfg.add_setting(CONSENT_TELEMETRY, "", validate::validate_yes_no, Immediate);
}

/// Returns `true` if `key` skips a preflight check.
pub fn is_preflight_key(key: &str) -> bool {
    key.starts_with("skip-")
}
