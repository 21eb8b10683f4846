use std::path::{Path, PathBuf};

use getset::Getters;
use serde::{Deserialize, Serialize};

use crate::{CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Name of the metadata sidecar inside an extracted bundle.
pub const BUNDLE_INFO_FILE: &str = "crc-bundle-info.json";

/// Extension of bundle archives.
pub const BUNDLE_EXTENSION: &str = "crcbundle";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The parsed metadata of an extracted bundle.
#[derive(Debug, Clone, PartialEq, Getters, Serialize, Deserialize)]
#[getset(get = "pub with_prefix")]
#[serde(rename_all = "camelCase")]
pub struct BundleInfo {
    /// Metadata format version.
    #[serde(default)]
    version: String,

    /// Bundle build details.
    #[serde(default)]
    build_info: BuildInfo,

    /// The cluster baked into the bundle.
    cluster_info: ClusterInfo,

    /// The cluster nodes. Bundles carry exactly one.
    #[serde(default)]
    nodes: Vec<Node>,

    /// Disk images shipped with the bundle.
    #[serde(default)]
    storage: Storage,

    /// The directory the bundle was extracted to.
    #[serde(skip)]
    cached_dir: PathBuf,
}

/// Bundle build details.
#[derive(Debug, Clone, Default, PartialEq, Getters, Serialize, Deserialize)]
#[getset(get = "pub with_prefix")]
#[serde(rename_all = "camelCase")]
pub struct BuildInfo {
    /// When the bundle was built, RFC 3339.
    #[serde(default)]
    build_time: String,
}

/// The cluster baked into the bundle.
#[derive(Debug, Clone, PartialEq, Getters, Serialize, Deserialize)]
#[getset(get = "pub with_prefix")]
#[serde(rename_all = "camelCase")]
pub struct ClusterInfo {
    /// OpenShift release of the cluster.
    openshift_version: String,

    /// Cluster name, e.g. `crc`.
    cluster_name: String,

    /// Base DNS domain, e.g. `testing`.
    base_domain: String,

    /// Wildcard domain of application routes.
    #[serde(default)]
    apps_domain: String,

    /// File holding the guest SSH private key, relative to the bundle.
    ssh_private_key_file: String,

    /// Admin kubeconfig file, relative to the bundle.
    kube_config: String,

    /// File holding the `kubeadmin` password, relative to the bundle.
    kubeadmin_password_file: String,
}

/// A cluster node.
#[derive(Debug, Clone, Default, PartialEq, Getters, Serialize, Deserialize)]
#[getset(get = "pub with_prefix")]
#[serde(rename_all = "camelCase")]
pub struct Node {
    /// Kernel command line.
    #[serde(default, rename = "kernelCmdLine")]
    kernel_cmdline: String,

    /// Initramfs file, relative to the bundle.
    #[serde(default)]
    initramfs: String,

    /// Kernel file, relative to the bundle.
    #[serde(default)]
    kernel: String,

    /// Disk image file, relative to the bundle.
    #[serde(default)]
    disk_image: String,
}

/// Disk images shipped with the bundle.
#[derive(Debug, Clone, Default, PartialEq, Getters, Serialize, Deserialize)]
#[getset(get = "pub with_prefix")]
#[serde(rename_all = "camelCase")]
pub struct Storage {
    /// The images.
    #[serde(default)]
    disk_images: Vec<DiskImage>,
}

/// A disk image.
#[derive(Debug, Clone, Default, PartialEq, Getters, Serialize, Deserialize)]
#[getset(get = "pub with_prefix")]
pub struct DiskImage {
    /// File name, relative to the bundle.
    name: String,

    /// Image format, e.g. `qcow2`.
    format: String,

    /// Size in bytes. The sidecar records it as a string; empty when unknown.
    #[serde(default)]
    size: String,
}

#[derive(Deserialize)]
struct Kubeconfig {
    #[serde(default)]
    clusters: Vec<NamedCluster>,
}

#[derive(Deserialize)]
struct NamedCluster {
    cluster: KubeconfigCluster,
}

#[derive(Deserialize)]
struct KubeconfigCluster {
    #[serde(default, rename = "certificate-authority-data")]
    certificate_authority_data: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl BundleInfo {
    /// Parses the sidecar of a bundle extracted to `dir`.
    pub async fn from_dir(dir: impl Into<PathBuf>) -> CrcResult<Self> {
        let dir = dir.into();
        let sidecar = dir.join(BUNDLE_INFO_FILE);
        if !sidecar.exists() {
            return Err(CrcError::BundleNotFound(sidecar));
        }

        let contents = tokio::fs::read(&sidecar).await?;
        let mut info: BundleInfo = serde_json::from_slice(&contents)
            .map_err(|e| CrcError::InvalidBundle(format!("{}: {e}", sidecar.display())))?;

        if info.nodes.is_empty() {
            return Err(CrcError::InvalidBundle(format!(
                "{} does not describe any node",
                sidecar.display()
            )));
        }

        info.cached_dir = dir;
        Ok(info)
    }

    /// The archive file name this bundle was extracted from.
    pub fn get_bundle_name(&self) -> String {
        let stem = self
            .cached_dir
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();
        format!("{stem}.{BUNDLE_EXTENSION}")
    }

    /// The OpenShift release shipped in the bundle.
    pub fn get_openshift_version(&self) -> &str {
        &self.cluster_info.openshift_version
    }

    /// The hostname of the cluster API server.
    pub fn get_api_hostname(&self) -> String {
        format!(
            "api.{}.{}",
            self.cluster_info.cluster_name, self.cluster_info.base_domain
        )
    }

    /// The wildcard domain of application routes.
    pub fn get_apps_domain(&self) -> String {
        if self.cluster_info.apps_domain.is_empty() {
            format!(
                "apps-{}.{}",
                self.cluster_info.cluster_name, self.cluster_info.base_domain
            )
        } else {
            self.cluster_info.apps_domain.clone()
        }
    }

    fn node_field(&self, field: impl Fn(&Node) -> &String) -> &str {
        self.nodes.first().map(field).map_or("", String::as_str)
    }

    fn resolve(&self, relative: &str) -> PathBuf {
        if relative.is_empty() {
            PathBuf::new()
        } else {
            self.cached_dir.join(relative)
        }
    }

    /// The disk image path.
    pub fn get_disk_image_path(&self) -> PathBuf {
        self.resolve(self.node_field(|node| &node.disk_image))
    }

    /// The disk image format, `qcow2` if the sidecar does not say.
    pub fn get_disk_image_format(&self) -> String {
        self.disk_image_entry()
            .map(|image| image.format.clone())
            .filter(|format| !format.is_empty())
            .unwrap_or_else(|| "qcow2".to_string())
    }

    /// The kernel path, empty when the bundle does not boot a kernel directly.
    pub fn get_kernel_path(&self) -> PathBuf {
        self.resolve(self.node_field(|node| &node.kernel))
    }

    /// The initramfs path, empty when the bundle does not boot a kernel directly.
    pub fn get_initramfs_path(&self) -> PathBuf {
        self.resolve(self.node_field(|node| &node.initramfs))
    }

    /// The kernel command line.
    pub fn get_kernel_cmdline(&self) -> &str {
        self.node_field(|node| &node.kernel_cmdline)
    }

    /// The guest SSH private key shipped with the bundle.
    pub fn get_ssh_key_path(&self) -> PathBuf {
        self.resolve(&self.cluster_info.ssh_private_key_file)
    }

    /// The admin kubeconfig shipped with the bundle.
    pub fn get_kubeconfig_path(&self) -> PathBuf {
        self.resolve(&self.cluster_info.kube_config)
    }

    /// Reads the `kubeadmin` password.
    pub async fn get_kubeadmin_password(&self) -> CrcResult<String> {
        let path = self.resolve(&self.cluster_info.kubeadmin_password_file);
        let password = tokio::fs::read_to_string(&path).await?;
        Ok(password.trim().to_string())
    }

    /// Reads the base64 cluster CA certificate from the bundle kubeconfig.
    pub async fn get_cluster_ca_cert(&self) -> CrcResult<String> {
        let contents = tokio::fs::read_to_string(self.get_kubeconfig_path()).await?;
        ca_cert_from_kubeconfig(&contents)
    }

    /// Checks that the disk image exists and, when recorded, has the recorded size.
    pub async fn verify_disk_image(&self) -> CrcResult<()> {
        let path = self.get_disk_image_path();
        let metadata = match tokio::fs::metadata(&path).await {
            Ok(metadata) => metadata,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(CrcError::BundleNotFound(path))
            }
            Err(e) => return Err(e.into()),
        };

        let Some(expected) = self
            .disk_image_entry()
            .and_then(|image| image.size.parse::<u64>().ok())
        else {
            return Ok(());
        };

        if metadata.len() != expected {
            return Err(CrcError::InvalidBundle(format!(
                "{} has size {} but {} was expected, the bundle may be corrupted",
                path.display(),
                metadata.len(),
                expected
            )));
        }

        Ok(())
    }

    fn disk_image_entry(&self) -> Option<&DiskImage> {
        let name = Path::new(self.node_field(|node| &node.disk_image)).file_name()?;
        self.storage
            .disk_images
            .iter()
            .find(|image| Path::new(&image.name).file_name() == Some(name))
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

fn ca_cert_from_kubeconfig(contents: &str) -> CrcResult<String> {
    let kubeconfig: Kubeconfig = serde_yaml::from_str(contents)?;
    kubeconfig
        .clusters
        .into_iter()
        .map(|named| named.cluster.certificate_authority_data)
        .find(|data| !data.is_empty())
        .ok_or_else(|| CrcError::InvalidBundle("kubeconfig has no cluster CA".to_string()))
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use tempfile::TempDir;

    use super::*;

    pub(crate) const SIDECAR: &str = r#"{
        "version": "1.0",
        "type": "snc",
        "buildInfo": { "buildTime": "2020-10-26T04:48:26+00:00" },
        "clusterInfo": {
            "openshiftVersion": "4.6.1",
            "clusterName": "crc",
            "baseDomain": "testing",
            "appsDomain": "apps-crc.testing",
            "sshPrivateKeyFile": "id_ecdsa_crc",
            "kubeConfig": "kubeconfig",
            "kubeadminPasswordFile": "kubeadmin-password"
        },
        "nodes": [{
            "kind": ["master", "worker"],
            "hostname": "crc-m89r2-master-0",
            "diskImage": "crc.qcow2",
            "kernelCmdLine": "console=tty0 console=ttyS0,115200n8",
            "initramfs": "initramfs.img",
            "kernel": "vmlinuz"
        }],
        "storage": {
            "diskImages": [{ "name": "crc.qcow2", "format": "qcow2", "size": "4", "sha256sum": "" }]
        }
    }"#;

    pub(crate) const KUBECONFIG: &str = "apiVersion: v1\n\
clusters:\n\
- cluster:\n    certificate-authority-data: LS0tLS1CRUdJTg==\n    server: https://api.crc.testing:6443\n  name: crc\n\
contexts: []\n\
users: []\n";

    /// Writes an extracted bundle named `crc_libvirt_4.6.1` under `cache`.
    pub(crate) fn write_extracted_bundle(cache: &Path) -> std::io::Result<PathBuf> {
        let dir = cache.join("crc_libvirt_4.6.1");
        std::fs::create_dir_all(&dir)?;
        std::fs::write(dir.join(BUNDLE_INFO_FILE), SIDECAR)?;
        std::fs::write(dir.join("crc.qcow2"), b"disk")?;
        std::fs::write(dir.join("kubeconfig"), KUBECONFIG)?;
        std::fs::write(dir.join("kubeadmin-password"), "hunter2\n")?;
        std::fs::write(dir.join("id_ecdsa_crc"), "key")?;
        Ok(dir)
    }

    #[tokio::test]
    async fn test_bundle_info_resolves_paths() -> anyhow::Result<()> {
        let cache = TempDir::new()?;
        let dir = write_extracted_bundle(cache.path())?;

        let info = BundleInfo::from_dir(&dir).await?;

        assert_eq!(info.get_bundle_name(), "crc_libvirt_4.6.1.crcbundle");
        assert_eq!(info.get_openshift_version(), "4.6.1");
        assert_eq!(info.get_api_hostname(), "api.crc.testing");
        assert_eq!(info.get_disk_image_path(), dir.join("crc.qcow2"));
        assert_eq!(info.get_disk_image_format(), "qcow2");
        assert_eq!(info.get_kernel_path(), dir.join("vmlinuz"));
        assert_eq!(info.get_kubeadmin_password().await?, "hunter2");
        assert_eq!(info.get_cluster_ca_cert().await?, "LS0tLS1CRUdJTg==");
        info.verify_disk_image().await?;

        Ok(())
    }

    #[tokio::test]
    async fn test_verify_disk_image_rejects_size_mismatch() -> anyhow::Result<()> {
        let cache = TempDir::new()?;
        let dir = write_extracted_bundle(cache.path())?;
        std::fs::write(dir.join("crc.qcow2"), b"truncated disk")?;

        let info = BundleInfo::from_dir(&dir).await?;
        assert!(matches!(
            info.verify_disk_image().await,
            Err(CrcError::InvalidBundle(_))
        ));

        std::fs::remove_file(dir.join("crc.qcow2"))?;
        assert!(matches!(
            info.verify_disk_image().await,
            Err(CrcError::BundleNotFound(_))
        ));

        Ok(())
    }
}
