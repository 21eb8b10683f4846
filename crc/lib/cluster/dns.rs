use std::net::IpAddr;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::RetryPolicy;
use crate::{
    bundle::BundleInfo,
    config::{DNSMASQ_CONTAINER_IP, VSOCK_GATEWAY},
    ssh::Runner,
    CrcError, CrcResult,
};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const RESOLV_CONF: &str = "/etc/resolv.conf";

const DNSMASQ_CONFIG_PATH: &str = "/var/srv/dnsmasq.conf";

const DNSMASQ_IMAGE: &str = "quay.io/crcont/dnsmasq:latest";

const PUBLIC_DNS_QUERY_HOST: &str = "quay.io";

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Resolves hostnames on the host.
#[async_trait]
pub trait HostResolver: Send + Sync {
    /// Returns the addresses `hostname` resolves to.
    async fn lookup(&self, hostname: &str) -> CrcResult<Vec<IpAddr>>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Resolves with the host's system resolver.
#[derive(Debug, Clone, Default)]
pub struct SystemResolver;

/// What the guest DNS setup needs to know.
#[derive(Debug, Clone)]
pub struct DnsSetup<'a> {
    /// Instance name.
    pub name: &'a str,

    /// Guest IP as seen from the host.
    pub ip: &'a str,

    /// Bundle of the instance.
    pub bundle: &'a BundleInfo,

    /// Whether guest networking goes over vsock.
    pub vsock: bool,
}

/// The parts of `/etc/resolv.conf` crc manages.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolvConf {
    /// `search` domains.
    pub search_domains: Vec<String>,

    /// `nameserver` addresses, in order.
    pub nameservers: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ResolvConf {
    /// Parses resolv.conf contents.
    pub fn parse(contents: &str) -> Self {
        let mut conf = ResolvConf::default();
        for line in contents.lines() {
            let mut fields = line.split_whitespace();
            match fields.next() {
                Some("nameserver") => conf.nameservers.extend(fields.next().map(str::to_string)),
                Some("search") => conf.search_domains.extend(fields.map(str::to_string)),
                _ => {}
            }
        }
        conf
    }

    /// Renders resolv.conf contents.
    pub fn render(&self) -> String {
        let mut out = String::new();
        if !self.search_domains.is_empty() {
            out.push_str(&format!("search {}\n", self.search_domains.join(" ")));
        }
        for nameserver in &self.nameservers {
            out.push_str(&format!("nameserver {nameserver}\n"));
        }
        out
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Reads the guest resolv.conf.
pub async fn read_resolv_conf(runner: &dyn Runner) -> CrcResult<ResolvConf> {
    let contents = runner.run(&format!("cat {RESOLV_CONF}")).await?;
    Ok(ResolvConf::parse(&contents))
}

/// Replaces the guest resolv.conf.
pub async fn write_resolv_conf(runner: &dyn Runner, conf: &ResolvConf) -> CrcResult<()> {
    runner
        .copy_data(conf.render().as_bytes(), RESOLV_CONF, 0o644)
        .await
}

/// Prepends `nameserver` to the guest resolv.conf unless it is already listed.
///
/// Returns `true` if the file was changed.
pub async fn add_nameserver(runner: &dyn Runner, nameserver: &str) -> CrcResult<bool> {
    let mut conf = read_resolv_conf(runner).await?;
    if conf.nameservers.iter().any(|ns| ns == nameserver) {
        tracing::debug!("nameserver {} already configured", nameserver);
        return Ok(false);
    }

    tracing::info!("adding {} as nameserver to the instance", nameserver);
    conf.nameservers.insert(0, nameserver.to_string());
    write_resolv_conf(runner, &conf).await?;
    Ok(true)
}

/// Sets up DNS for the cluster inside the guest.
///
/// With vsock networking the guest resolves through the host-side gateway. Otherwise a dnsmasq
/// container answering for the cluster domains is started and put first in resolv.conf.
pub async fn run_dns_post_start(runner: &dyn Runner, setup: &DnsSetup<'_>) -> CrcResult<()> {
    let cluster_info = setup.bundle.get_cluster_info();
    let search_domain = format!("{}.{}", setup.name, cluster_info.get_base_domain());

    if setup.vsock {
        let conf = ResolvConf {
            search_domains: vec![search_domain],
            nameservers: vec![VSOCK_GATEWAY.to_string()],
        };
        return write_resolv_conf(runner, &conf).await;
    }

    runner
        .copy_data(
            dnsmasq_config(setup.bundle, setup.ip).as_bytes(),
            DNSMASQ_CONFIG_PATH,
            0o644,
        )
        .await?;

    // Leftovers of a previous boot.
    if let Err(e) = runner.run("sudo podman rm -f dnsmasq").await {
        tracing::debug!("no dnsmasq container to remove: {}", e);
    }
    if let Err(e) = runner
        .run(&format!(
            "sudo rm -f /var/lib/cni/networks/podman/{DNSMASQ_CONTAINER_IP}"
        ))
        .await
    {
        tracing::debug!("cannot remove stale CNI lease: {}", e);
    }

    runner
        .run(&format!(
            "sudo podman run  --ip {DNSMASQ_CONTAINER_IP} --name dnsmasq -v {DNSMASQ_CONFIG_PATH}:/etc/dnsmasq.conf -p 53:53/udp --privileged -d {DNSMASQ_IMAGE}"
        ))
        .await?;

    let original = read_resolv_conf(runner).await?;
    let mut nameservers = vec![DNSMASQ_CONTAINER_IP.to_string()];
    nameservers.extend(
        original
            .nameservers
            .into_iter()
            .filter(|ns| ns != DNSMASQ_CONTAINER_IP),
    );

    write_resolv_conf(
        runner,
        &ResolvConf {
            search_domains: vec![search_domain],
            nameservers,
        },
    )
    .await
}

/// Resolves an application route from inside the guest.
pub async fn check_internal_dns(
    runner: &dyn Runner,
    bundle: &BundleInfo,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> CrcResult<String> {
    let command = format!("host -R 3 foo.{}", bundle.get_apps_domain());
    retry
        .run(cancel, || {
            let command = command.clone();
            async move { runner.run(&command).await.map_err(CrcError::retriable) }
        })
        .await
}

/// Resolves a public hostname from inside the guest.
pub async fn check_public_dns(runner: &dyn Runner) -> CrcResult<String> {
    runner
        .run(&format!("host -R 3 {PUBLIC_DNS_QUERY_HOST}"))
        .await
}

/// Checks that the host resolves the API server and application routes to the guest.
pub async fn check_dns_from_host(
    resolver: &dyn HostResolver,
    bundle: &BundleInfo,
    ip: &str,
) -> CrcResult<()> {
    let expected: IpAddr = ip
        .parse()
        .map_err(|e| CrcError::InvalidArgument(format!("invalid instance IP '{ip}': {e}")))?;

    for hostname in [
        bundle.get_api_hostname(),
        format!("foo.{}", bundle.get_apps_domain()),
    ] {
        let addrs = resolver.lookup(&hostname).await?;
        if !addrs.contains(&expected) {
            return Err(CrcError::Cluster(format!(
                "{hostname} resolved to {addrs:?} instead of {expected}"
            )));
        }
    }

    Ok(())
}

fn dnsmasq_config(bundle: &BundleInfo, ip: &str) -> String {
    let info = bundle.get_cluster_info();
    let domain = format!("{}.{}", info.get_cluster_name(), info.get_base_domain());
    format!(
        "user=root\n\
         port= 53\n\
         bind-interfaces\n\
         expand-hosts\n\
         log-queries\n\
         local=/{domain}/\n\
         domain={domain}\n\
         address=/{apps}/{ip}\n\
         address=/api.{domain}/{ip}\n\
         address=/api-int.{domain}/{ip}\n",
        apps = bundle.get_apps_domain(),
    )
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl HostResolver for SystemResolver {
    async fn lookup(&self, hostname: &str) -> CrcResult<Vec<IpAddr>> {
        let addrs = tokio::net::lookup_host((hostname, 0))
            .await
            .map_err(|e| CrcError::Cluster(format!("cannot resolve {hostname}: {e}")))?;
        Ok(addrs.map(|addr| addr.ip()).collect())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::{collections::BTreeMap, time::Duration};

    use tempfile::TempDir;

    use super::*;
    use crate::{bundle::tests::write_extracted_bundle, ssh::fake::ScriptedRunner};

    struct StaticResolver(BTreeMap<String, IpAddr>);

    #[async_trait]
    impl HostResolver for StaticResolver {
        async fn lookup(&self, hostname: &str) -> CrcResult<Vec<IpAddr>> {
            Ok(self.0.get(hostname).copied().into_iter().collect())
        }
    }

    async fn bundle(dir: &TempDir) -> anyhow::Result<BundleInfo> {
        Ok(BundleInfo::from_dir(write_extracted_bundle(dir.path())?).await?)
    }

    #[test]
    fn test_resolv_conf_round_trip() {
        let conf = ResolvConf::parse("# generated\nsearch crc.testing\nnameserver 10.0.0.1\nnameserver 8.8.8.8\n");
        assert_eq!(conf.nameservers, vec!["10.0.0.1", "8.8.8.8"]);
        assert_eq!(conf.search_domains, vec!["crc.testing"]);
        assert_eq!(ResolvConf::parse(&conf.render()), conf);
    }

    #[tokio::test]
    async fn test_add_nameserver_skips_existing() -> anyhow::Result<()> {
        let runner = ScriptedRunner::default();
        runner.respond("cat /etc/resolv.conf", "nameserver 1.1.1.1\n");

        assert!(!add_nameserver(&runner, "1.1.1.1").await?);
        assert!(runner.file(RESOLV_CONF).is_none());

        assert!(add_nameserver(&runner, "9.9.9.9").await?);
        let (contents, mode) = runner.file(RESOLV_CONF).ok_or_else(|| anyhow::anyhow!("not written"))?;
        assert_eq!(contents, "nameserver 9.9.9.9\nnameserver 1.1.1.1\n");
        assert_eq!(mode, 0o644);

        Ok(())
    }

    #[tokio::test]
    async fn test_dns_post_start_runs_dnsmasq() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let bundle = bundle(&dir).await?;
        let runner = ScriptedRunner::default();
        runner.respond("cat /etc/resolv.conf", "nameserver 192.168.130.1\n");

        let setup = DnsSetup {
            name: "crc",
            ip: "192.168.130.11",
            bundle: &bundle,
            vsock: false,
        };
        run_dns_post_start(&runner, &setup).await?;

        assert!(runner.ran("sudo podman run  --ip 10.88.0.8 --name dnsmasq"));
        let (conf, _) = runner.file(DNSMASQ_CONFIG_PATH).ok_or_else(|| anyhow::anyhow!("no dnsmasq.conf"))?;
        assert!(conf.contains("address=/apps-crc.testing/192.168.130.11"));
        let (resolv, _) = runner.file(RESOLV_CONF).ok_or_else(|| anyhow::anyhow!("no resolv.conf"))?;
        assert_eq!(
            resolv,
            "search crc.testing\nnameserver 10.88.0.8\nnameserver 192.168.130.1\n"
        );

        Ok(())
    }

    #[tokio::test]
    async fn test_dns_post_start_vsock_uses_gateway() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let bundle = bundle(&dir).await?;
        let runner = ScriptedRunner::default();

        let setup = DnsSetup {
            name: "crc",
            ip: "127.0.0.1",
            bundle: &bundle,
            vsock: true,
        };
        run_dns_post_start(&runner, &setup).await?;

        assert!(!runner.ran("podman"));
        let (resolv, _) = runner.file(RESOLV_CONF).ok_or_else(|| anyhow::anyhow!("no resolv.conf"))?;
        assert_eq!(resolv, "search crc.testing\nnameserver 192.168.127.1\n");

        Ok(())
    }

    #[tokio::test]
    async fn test_check_internal_dns_retries() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let bundle = bundle(&dir).await?;
        let runner = ScriptedRunner::default();
        runner
            .fail_times("host -R 3 foo.apps-crc.testing", 2)
            .respond("host -R 3", "foo.apps-crc.testing has address 192.168.130.11");

        let output = check_internal_dns(
            &runner,
            &bundle,
            RetryPolicy::new(3, Duration::ZERO),
            &CancellationToken::new(),
        )
        .await?;
        assert!(output.contains("has address"));

        Ok(())
    }

    #[tokio::test]
    async fn test_check_dns_from_host() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let bundle = bundle(&dir).await?;
        let ip: IpAddr = "192.168.130.11".parse()?;

        let resolver = StaticResolver(BTreeMap::from([
            ("api.crc.testing".to_string(), ip),
            ("foo.apps-crc.testing".to_string(), ip),
        ]));
        check_dns_from_host(&resolver, &bundle, "192.168.130.11").await?;

        let resolver = StaticResolver(BTreeMap::from([("api.crc.testing".to_string(), ip)]));
        assert!(check_dns_from_host(&resolver, &bundle, "192.168.130.11").await.is_err());

        Ok(())
    }
}
