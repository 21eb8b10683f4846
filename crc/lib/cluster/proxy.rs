use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use super::{wait_for_openshift_resource, Oc, RetryPolicy, SystemdCommander};
use crate::{
    config::{self, Config},
    ssh::Runner,
    CrcError, CrcResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const DEFAULT_NO_PROXY: &[&str] = &["127.0.0.1", "localhost"];

/// Cluster-internal networks that never go through the proxy.
const CLUSTER_NO_PROXY: &str = ".cluster.local,.svc,10.128.0.0/14,172.30.0.0/16";

const PROXY_DROP_IN_PATHS: &[&str] = &[
    "/etc/systemd/system/crio.service.d/10-default-env.conf",
    "/etc/systemd/system/kubelet.service.d/10-default-env.conf",
];

const GUEST_CA_PATH: &str = "/etc/pki/ca-trust/source/anchors/openshift-config-user-ca-bundle.crt";

const TRUSTED_CA_NAME: &str = "user-ca-bundle";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Proxy settings applied to the guest and the cluster.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// HTTP proxy URL.
    #[serde(rename = "HTTPProxy")]
    pub http_proxy: String,

    /// HTTPS proxy URL.
    #[serde(rename = "HTTPSProxy")]
    pub https_proxy: String,

    /// Hosts and domains that bypass the proxy.
    #[serde(rename = "NoProxy")]
    pub no_proxy: Vec<String>,

    /// PEM CA bundle of the proxy, empty when none is configured.
    #[serde(rename = "ProxyCACert")]
    pub proxy_ca_cert: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct ProxySpec<'a> {
    http_proxy: &'a str,
    https_proxy: &'a str,
    no_proxy: String,
    #[serde(rename = "trustedCA")]
    trusted_ca: TrustedCa,
}

#[derive(Serialize)]
struct TrustedCa {
    name: &'static str,
}

#[derive(Serialize)]
struct ProxyPatch<'a> {
    spec: ProxySpec<'a>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ProxyConfig {
    /// Reads the proxy settings from `cfg`, falling back to the process environment.
    pub async fn from_config(cfg: &Config) -> CrcResult<Self> {
        Self::from_sources(cfg, |name| std::env::var(name).ok()).await
    }

    /// Reads the proxy settings from `cfg`, falling back to variables returned by `env`.
    pub async fn from_sources(
        cfg: &Config,
        env: impl Fn(&str) -> Option<String>,
    ) -> CrcResult<Self> {
        let lookup = |key: &str, var: &str| {
            let value = cfg.get_string(key);
            if !value.is_empty() {
                return value;
            }
            env(var)
                .or_else(|| env(&var.to_lowercase()))
                .unwrap_or_default()
        };

        let mut proxy = ProxyConfig {
            http_proxy: lookup(config::HTTP_PROXY, "HTTP_PROXY"),
            https_proxy: lookup(config::HTTPS_PROXY, "HTTPS_PROXY"),
            ..Default::default()
        };

        for host in DEFAULT_NO_PROXY {
            proxy.add_no_proxy(host);
        }
        for host in lookup(config::NO_PROXY, "NO_PROXY").split(',') {
            proxy.add_no_proxy(host);
        }

        let ca_file = cfg.get_string(config::PROXY_CA_FILE);
        if !ca_file.is_empty() {
            let path = PathBuf::from(ca_file);
            proxy.proxy_ca_cert = tokio::fs::read_to_string(&path)
                .await
                .map_err(|e| {
                    CrcError::InvalidArgument(format!(
                        "cannot read proxy CA file {}: {e}",
                        path.display()
                    ))
                })?
                .trim()
                .to_string();
        }

        Ok(proxy)
    }

    /// Returns `true` if an HTTP or HTTPS proxy is configured.
    pub fn is_enabled(&self) -> bool {
        !self.http_proxy.is_empty() || !self.https_proxy.is_empty()
    }

    /// Adds `host` to the no-proxy list unless it is empty or already listed.
    pub fn add_no_proxy(&mut self, host: &str) {
        let host = host.trim();
        if !host.is_empty() && !self.no_proxy.iter().any(|h| h == host) {
            self.no_proxy.push(host.to_string());
        }
    }

    /// The no-proxy list in `NO_PROXY` syntax.
    pub fn get_no_proxy_string(&self) -> String {
        self.no_proxy.join(",")
    }

    fn systemd_drop_in(&self) -> String {
        format!(
            "[Service]\nEnvironment=HTTP_PROXY={}\nEnvironment=HTTPS_PROXY={}\nEnvironment=NO_PROXY={CLUSTER_NO_PROXY},{}\n",
            self.http_proxy,
            self.https_proxy,
            self.get_no_proxy_string()
        )
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Writes the proxy into the CRI-O and kubelet environments, installs the proxy CA in the
/// guest trust store, then reloads systemd and restarts CRI-O.
pub async fn add_proxy_to_kubelet_and_crio(
    runner: &dyn Runner,
    proxy: &ProxyConfig,
) -> CrcResult<()> {
    let drop_in = proxy.systemd_drop_in();
    for path in PROXY_DROP_IN_PATHS {
        runner.copy_data(drop_in.as_bytes(), path, 0o644).await?;
    }

    if !proxy.proxy_ca_cert.is_empty() {
        runner
            .copy_data(proxy.proxy_ca_cert.as_bytes(), GUEST_CA_PATH, 0o600)
            .await?;
        runner.run("sudo update-ca-trust").await?;
    }

    let systemd = SystemdCommander::new(runner);
    systemd.daemon_reload().await?;
    systemd.restart("crio").await
}

/// Sets the cluster-wide proxy, publishing the proxy CA as the trusted CA config map.
pub async fn add_proxy_config_to_cluster(
    runner: &dyn Runner,
    proxy: &ProxyConfig,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> CrcResult<()> {
    let oc = Oc::new(runner);
    wait_for_openshift_resource(oc, "proxy", retry, cancel).await?;

    let trusted_ca = if proxy.proxy_ca_cert.is_empty() {
        ""
    } else {
        let config_map_path = format!("/tmp/{TRUSTED_CA_NAME}.json");
        runner
            .copy_data(
                proxy_ca_config_map(&proxy.proxy_ca_cert)?.as_bytes(),
                &config_map_path,
                0o644,
            )
            .await?;
        oc.run(&["apply", "-f", &config_map_path]).await?;
        TRUSTED_CA_NAME
    };

    let patch = serde_json::to_string(&ProxyPatch {
        spec: ProxySpec {
            http_proxy: &proxy.http_proxy,
            https_proxy: &proxy.https_proxy,
            no_proxy: proxy.get_no_proxy_string(),
            trusted_ca: TrustedCa { name: trusted_ca },
        },
    })?;
    tracing::debug!("proxy patch: {}", patch);

    let patch = format!("'{patch}'");
    oc.run(&[
        "patch",
        "proxy",
        "cluster",
        "-p",
        &patch,
        "-n",
        "openshift-config",
        "--type",
        "merge",
    ])
    .await?;
    Ok(())
}

/// Checks whether the marketplace operator picked up the proxy.
pub async fn check_proxy_settings_for_operator(
    oc: Oc<'_>,
    proxy: &ProxyConfig,
) -> CrcResult<bool> {
    if !proxy.is_enabled() {
        return Ok(true);
    }

    let output = oc
        .run(&[
            "set",
            "env",
            "deployment",
            "marketplace-operator",
            "--list",
            "-n",
            "openshift-marketplace",
        ])
        .await?;

    Ok((!proxy.https_proxy.is_empty() && output.contains(&proxy.https_proxy))
        || (!proxy.http_proxy.is_empty() && output.contains(&proxy.http_proxy)))
}

/// Waits for the proxy to reach the cluster operators. A timeout is only logged.
pub async fn wait_for_proxy_propagation(
    oc: Oc<'_>,
    proxy: &ProxyConfig,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> CrcResult<()> {
    let result = retry
        .run(cancel, || async move {
            match check_proxy_settings_for_operator(oc, proxy).await {
                Ok(true) => Ok(()),
                Ok(false) => Err(CrcError::retriable(CrcError::Cluster(
                    "proxy changes for cluster in progress".to_string(),
                ))),
                Err(e) => Err(CrcError::retriable(e)),
            }
        })
        .await;

    match result {
        Err(CrcError::Cancelled) => Err(CrcError::Cancelled),
        Err(e) => {
            tracing::warn!("failed to propagate proxy settings to cluster: {}", e);
            Ok(())
        }
        Ok(()) => Ok(()),
    }
}

fn proxy_ca_config_map(ca_cert: &str) -> CrcResult<String> {
    let config_map = serde_json::json!({
        "apiVersion": "v1",
        "data": { "ca-bundle.crt": ca_cert },
        "kind": "ConfigMap",
        "metadata": {
            "name": TRUSTED_CA_NAME,
            "namespace": "openshift-config",
        },
    });
    Ok(serde_json::to_string_pretty(&config_map)?)
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::{
        config::{CrcPaths, InMemoryStorage},
        ssh::fake::ScriptedRunner,
    };

    fn config(dir: &TempDir) -> Config {
        Config::with_crc_settings(InMemoryStorage::default(), &CrcPaths::new(dir.path()))
    }

    #[tokio::test]
    async fn test_proxy_config_prefers_settings_over_env() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let cfg = config(&dir);
        cfg.set(config::HTTP_PROXY, "http://proxy.example.com:3128".into())?;

        let proxy = ProxyConfig::from_sources(&cfg, |name| match name {
            "HTTP_PROXY" => Some("http://ignored:1".to_string()),
            "https_proxy" => Some("http://env-proxy:3129".to_string()),
            "NO_PROXY" => Some("example.org, localhost".to_string()),
            _ => None,
        })
        .await?;

        assert!(proxy.is_enabled());
        assert_eq!(proxy.http_proxy, "http://proxy.example.com:3128");
        assert_eq!(proxy.https_proxy, "http://env-proxy:3129");
        assert_eq!(proxy.get_no_proxy_string(), "127.0.0.1,localhost,example.org");

        Ok(())
    }

    #[tokio::test]
    async fn test_proxy_disabled_without_settings() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let proxy = ProxyConfig::from_sources(&config(&dir), |_| None).await?;
        assert!(!proxy.is_enabled());
        Ok(())
    }

    #[tokio::test]
    async fn test_add_proxy_to_kubelet_and_crio() -> anyhow::Result<()> {
        let runner = ScriptedRunner::default();
        let proxy = ProxyConfig {
            http_proxy: "http://p:3128".to_string(),
            https_proxy: "http://p:3128".to_string(),
            no_proxy: vec!["localhost".to_string()],
            proxy_ca_cert: "-----BEGIN CERTIFICATE-----".to_string(),
        };

        add_proxy_to_kubelet_and_crio(&runner, &proxy).await?;

        let (drop_in, mode) = runner
            .file(PROXY_DROP_IN_PATHS[1])
            .ok_or_else(|| anyhow::anyhow!("no kubelet drop-in"))?;
        assert_eq!(mode, 0o644);
        assert!(drop_in.contains(
            "Environment=NO_PROXY=.cluster.local,.svc,10.128.0.0/14,172.30.0.0/16,localhost"
        ));
        assert_eq!(runner.file(GUEST_CA_PATH).map(|(_, mode)| mode), Some(0o600));
        assert!(runner.ran("sudo update-ca-trust"));
        assert!(runner.ran("sudo systemctl restart crio"));

        Ok(())
    }

    #[tokio::test]
    async fn test_add_proxy_config_to_cluster_patches_proxy() -> anyhow::Result<()> {
        let runner = ScriptedRunner::default();
        let proxy = ProxyConfig {
            http_proxy: "http://p:3128".to_string(),
            no_proxy: vec!["localhost".to_string()],
            ..Default::default()
        };

        add_proxy_config_to_cluster(
            &runner,
            &proxy,
            RetryPolicy::new(1, Duration::ZERO),
            &CancellationToken::new(),
        )
        .await?;

        assert!(runner.ran(
            r#"patch proxy cluster -p '{"spec":{"httpProxy":"http://p:3128","httpsProxy":"","noProxy":"localhost","trustedCA":{"name":""}}}' -n openshift-config --type merge"#
        ));
        assert!(!runner.ran("apply -f"));

        Ok(())
    }

    #[tokio::test]
    async fn test_wait_for_proxy_propagation_only_warns() -> anyhow::Result<()> {
        let runner = ScriptedRunner::default();
        let proxy = ProxyConfig {
            http_proxy: "http://p:3128".to_string(),
            ..Default::default()
        };

        wait_for_proxy_propagation(
            Oc::new(&runner),
            &proxy,
            RetryPolicy::new(2, Duration::ZERO),
            &CancellationToken::new(),
        )
        .await?;

        Ok(())
    }
}
