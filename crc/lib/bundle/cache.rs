use std::path::Path;

use async_trait::async_trait;

use super::{BundleInfo, BUNDLE_EXTENSION};
use crate::{config::CrcPaths, utils, CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Loads bundle metadata, extracting bundles on first use.
#[async_trait]
pub trait BundleLoader: Send + Sync {
    /// Loads the metadata of the already extracted bundle named `bundle_name`.
    async fn get_cached(&self, bundle_name: &str) -> CrcResult<BundleInfo>;

    /// Loads the metadata of the bundle archive at `bundle_path`, extracting it if it is not
    /// cached yet.
    async fn get(&self, bundle_path: &Path) -> CrcResult<BundleInfo>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Bundles extracted under the crc cache directory.
#[derive(Debug, Clone)]
pub struct BundleCache {
    paths: CrcPaths,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BundleCache {
    /// Creates a cache rooted at the cache directory of `paths`.
    pub fn new(paths: CrcPaths) -> Self {
        Self { paths }
    }

    /// Returns `true` if the bundle named `bundle_name` is extracted.
    pub fn is_cached(&self, bundle_name: &str) -> bool {
        self.paths
            .get_extracted_bundle_dir(bundle_name)
            .join(super::BUNDLE_INFO_FILE)
            .exists()
    }

    async fn extract(&self, bundle_path: &Path) -> CrcResult<()> {
        if !bundle_path.exists() {
            return Err(CrcError::BundleNotFound(bundle_path.to_path_buf()));
        }

        let cache_dir = self.paths.get_cache_dir();
        tokio::fs::create_dir_all(&cache_dir).await?;

        tracing::info!("extracting bundle {}", bundle_path.display());
        let args = [
            std::ffi::OsStr::new("-xf"),
            bundle_path.as_os_str(),
            std::ffi::OsStr::new("-C"),
            cache_dir.as_os_str(),
        ];
        utils::run_command("tar", args).await?;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl BundleLoader for BundleCache {
    async fn get_cached(&self, bundle_name: &str) -> CrcResult<BundleInfo> {
        BundleInfo::from_dir(self.paths.get_extracted_bundle_dir(bundle_name)).await
    }

    async fn get(&self, bundle_path: &Path) -> CrcResult<BundleInfo> {
        let bundle_name = bundle_path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .filter(|name| name.ends_with(&format!(".{BUNDLE_EXTENSION}")))
            .ok_or_else(|| {
                CrcError::InvalidBundle(format!(
                    "{} is not a .{BUNDLE_EXTENSION} file",
                    bundle_path.display()
                ))
            })?;

        if self.is_cached(&bundle_name) {
            tracing::debug!("using cached bundle {}", bundle_name);
        } else {
            self.extract(bundle_path).await?;
        }

        self.get_cached(&bundle_name).await
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
