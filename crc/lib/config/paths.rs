use std::path::{Path, PathBuf};

use getset::Getters;

use super::{
    CONFIG_FILE, CRC_HOME_ENV_VAR, DAEMON_LOG_FILE, DAEMON_SOCKET_FILE, DEFAULT_CRC_HOME,
    LOG_FILE,
};
use crate::CrcResult;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Every on-disk location used by crc, derived from a single home directory.
#[derive(Debug, Clone, PartialEq, Eq, Getters)]
#[getset(get = "pub with_prefix")]
pub struct CrcPaths {
    /// The crc home directory, `~/.crc` by default.
    home: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CrcPaths {
    /// Creates paths rooted at `home`.
    pub fn new(home: impl Into<PathBuf>) -> Self {
        Self { home: home.into() }
    }

    /// Resolves the home directory from `CRC_HOME`, falling back to `~/.crc`.
    pub fn from_env() -> Self {
        match std::env::var_os(CRC_HOME_ENV_VAR) {
            Some(home) if !home.is_empty() => Self::new(home),
            _ => Self::new(DEFAULT_CRC_HOME.as_path()),
        }
    }

    /// Creates the home, cache and machines directories.
    pub fn ensure_dirs(&self) -> CrcResult<()> {
        std::fs::create_dir_all(&self.home)?;
        std::fs::create_dir_all(self.get_cache_dir())?;
        std::fs::create_dir_all(self.get_machines_dir())?;
        Ok(())
    }

    /// The persisted config file.
    pub fn get_config_path(&self) -> PathBuf {
        self.home.join(CONFIG_FILE)
    }

    /// The CLI log file.
    pub fn get_log_path(&self) -> PathBuf {
        self.home.join(LOG_FILE)
    }

    /// The daemon log file.
    pub fn get_daemon_log_path(&self) -> PathBuf {
        self.home.join(DAEMON_LOG_FILE)
    }

    /// The daemon API socket.
    pub fn get_socket_path(&self) -> PathBuf {
        self.home.join(DAEMON_SOCKET_FILE)
    }

    /// Where bundles are downloaded and extracted.
    pub fn get_cache_dir(&self) -> PathBuf {
        self.home.join("cache")
    }

    /// Where instance registrations live.
    pub fn get_machines_dir(&self) -> PathBuf {
        self.home.join("machines")
    }

    /// The directory holding one instance's registration, keys and kubeconfig.
    pub fn get_machine_dir(&self, name: &str) -> PathBuf {
        self.get_machines_dir().join(name)
    }

    /// The host SSH private key generated for an instance.
    pub fn get_private_key_path(&self, name: &str) -> PathBuf {
        self.get_machine_dir(name).join("id_ecdsa")
    }

    /// The host SSH public key generated for an instance.
    pub fn get_public_key_path(&self, name: &str) -> PathBuf {
        self.get_machine_dir(name).join("id_ecdsa.pub")
    }

    /// The host-side copy of the cluster kubeconfig.
    pub fn get_kubeconfig_path(&self, name: &str) -> PathBuf {
        self.get_machine_dir(name).join("kubeconfig")
    }

    /// The directory a bundle is extracted to, named after the bundle file without extension.
    pub fn get_extracted_bundle_dir(&self, bundle_name: &str) -> PathBuf {
        let stem = Path::new(bundle_name)
            .file_stem()
            .map(|s| s.to_os_string())
            .unwrap_or_else(|| bundle_name.into());
        self.get_cache_dir().join(stem)
    }

    /// The default bundle location in the cache.
    pub fn get_default_bundle_path(&self) -> PathBuf {
        self.get_cache_dir().join(crate::version::default_bundle_name())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
