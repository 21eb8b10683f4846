use std::path::PathBuf;

use super::MachineConfig;
use crate::{config::CrcPaths, CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const REGISTRATION_FILE: &str = "config.json";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Instance registrations stored as `machines/<name>/config.json`.
///
/// An instance exists exactly when its registration file exists.
#[derive(Debug, Clone)]
pub struct MachineStore {
    paths: CrcPaths,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl MachineStore {
    /// Creates a store under the machines directory of `paths`.
    pub fn new(paths: CrcPaths) -> Self {
        Self { paths }
    }

    fn registration_path(&self, name: &str) -> PathBuf {
        self.paths.get_machine_dir(name).join(REGISTRATION_FILE)
    }

    /// Returns `true` if `name` is registered.
    pub async fn exists(&self, name: &str) -> CrcResult<bool> {
        Ok(tokio::fs::try_exists(self.registration_path(name)).await?)
    }

    /// Writes the registration of `config`.
    pub async fn save(&self, config: &MachineConfig) -> CrcResult<()> {
        let dir = self.paths.get_machine_dir(config.get_name());
        tokio::fs::create_dir_all(&dir).await?;

        let path = self.registration_path(config.get_name());
        let tmp = path.with_extension("json.tmp");
        tokio::fs::write(&tmp, serde_json::to_vec_pretty(config)?).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!("saved registration of '{}'", config.get_name());
        Ok(())
    }

    /// Reads the registration of `name`.
    pub async fn load(&self, name: &str) -> CrcResult<MachineConfig> {
        let path = self.registration_path(name);
        let contents = match tokio::fs::read(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CrcError::MachineDoesNotExist(name.to_string()))
            }
            Err(e) => return Err(e.into()),
        };

        Ok(serde_json::from_slice(&contents)?)
    }

    /// Removes the instance directory of `name`, registration included.
    pub async fn remove(&self, name: &str) -> CrcResult<()> {
        let dir = self.paths.get_machine_dir(name);
        match tokio::fs::remove_dir_all(&dir).await {
            Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
            _ => Ok(()),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;
    use crate::driver::NetworkMode;

    fn machine_config() -> MachineConfig {
        MachineConfig::builder()
            .name("crc")
            .bundle_name("crc_libvirt_4.6.1.crcbundle")
            .driver_name("libvirt")
            .cpus(4)
            .memory_mib(9216)
            .disk_size_gib(31)
            .image_source_path("/cache/crc_libvirt_4.6.1/crc.qcow2")
            .image_format("qcow2")
            .ssh_key_path("/cache/crc_libvirt_4.6.1/id_ecdsa_crc")
            .network_mode(NetworkMode::Vsock)
            .build()
    }

    #[tokio::test]
    async fn test_machine_store_lifecycle() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let store = MachineStore::new(CrcPaths::new(dir.path()));

        assert!(!store.exists("crc").await?);
        assert!(matches!(
            store.load("crc").await,
            Err(CrcError::MachineDoesNotExist(_))
        ));

        let config = machine_config();
        store.save(&config).await?;
        assert!(store.exists("crc").await?);
        assert_eq!(store.load("crc").await?, config);

        store.remove("crc").await?;
        assert!(!store.exists("crc").await?);
        store.remove("crc").await?;

        Ok(())
    }
}
