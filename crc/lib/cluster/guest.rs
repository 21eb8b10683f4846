use std::path::Path;

use base64::{engine::general_purpose::STANDARD, Engine};
use tokio_util::sync::CancellationToken;

use super::{Oc, RetryPolicy};
use crate::{ssh::Runner, CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const AUTHORIZED_KEYS: &str = "/home/core/.ssh/authorized_keys";

const KUBELET_PULL_SECRET_PATH: &str = "/var/lib/kubelet/config.json";

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Waits until the guest accepts SSH connections.
pub async fn wait_for_ssh(
    runner: &dyn Runner,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> CrcResult<()> {
    retry
        .run(cancel, || async move {
            match runner.run("exit 0").await {
                Ok(_) => Ok(()),
                Err(e) => {
                    tracing::debug!("SSH not ready: {}", e);
                    Err(CrcError::retriable(e))
                }
            }
        })
        .await
}

/// Installs `public_key_path` as the only authorized key of the guest user, unless it already is.
///
/// Returns `true` if the guest file was rewritten.
pub async fn update_authorized_key(runner: &dyn Runner, public_key_path: &Path) -> CrcResult<bool> {
    let public_key = tokio::fs::read_to_string(public_key_path).await?;
    let public_key = public_key.trim();

    let current = runner.run(&format!("cat {AUTHORIZED_KEYS}")).await?;
    if current.trim() == public_key {
        tracing::debug!("guest authorized key is up to date");
        return Ok(false);
    }

    tracing::info!("updating the authorized SSH key of the instance");
    runner
        .run(&format!(
            "echo '{public_key}' > {AUTHORIZED_KEYS}; chmod 644 {AUTHORIZED_KEYS}"
        ))
        .await?;
    Ok(true)
}

/// Grows the root filesystem to the disk size.
pub async fn grow_filesystem(runner: &dyn Runner) -> CrcResult<()> {
    runner.run("sudo xfs_growfs / >/dev/null").await?;
    Ok(())
}

/// Turns on network time synchronization in the guest.
pub async fn enable_time_sync(runner: &dyn Runner) -> CrcResult<()> {
    runner.run("sudo timedatectl set-ntp on").await?;
    Ok(())
}

/// Writes the pull secret where the kubelet reads it.
pub async fn add_pull_secret_to_instance_disk(runner: &dyn Runner, pull_secret: &str) -> CrcResult<()> {
    runner
        .copy_data(pull_secret.as_bytes(), KUBELET_PULL_SECRET_PATH, 0o600)
        .await
}

/// Replaces the cluster pull secret.
pub async fn add_pull_secret_to_cluster(oc: Oc<'_>, pull_secret: &str) -> CrcResult<()> {
    let patch = format!(
        r#"'{{"data":{{".dockerconfigjson":"{}"}}}}'"#,
        STANDARD.encode(pull_secret)
    );
    oc.run_private(&[
        "patch",
        "secret",
        "pull-secret",
        "-p",
        &patch,
        "-n",
        "openshift-config",
        "--type",
        "merge",
    ])
    .await
    .map_err(|e| CrcError::Cluster(format!("failed to add pull secret: {e}")))?;
    Ok(())
}

/// Gives the cluster a fresh random identity.
pub async fn update_cluster_id(oc: Oc<'_>) -> CrcResult<()> {
    let patch = format!(r#"'{{"spec":{{"clusterID":"{}"}}}}'"#, uuid::Uuid::new_v4());
    oc.run(&["patch", "clusterversion", "version", "-p", &patch, "--type", "merge"])
        .await?;
    Ok(())
}

/// Waits until the API server answers node queries.
pub async fn wait_for_control_plane(
    oc: Oc<'_>,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> CrcResult<()> {
    super::wait_for_openshift_resource(oc, "nodes", retry, cancel).await
}

/// Scales up the cluster monitoring operator.
pub async fn start_monitoring(oc: Oc<'_>) -> CrcResult<()> {
    oc.run(&[
        "scale",
        "--replicas=1",
        "deployment",
        "cluster-monitoring-operator",
        "-n",
        "openshift-monitoring",
    ])
    .await?;
    Ok(())
}

/// Waits for the request header client CA to be published.
pub async fn wait_for_request_header_client_ca_file(
    oc: Oc<'_>,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> CrcResult<()> {
    retry
        .run(cancel, || async move {
            let output = oc
                .run(&[
                    "get",
                    "configmaps/extension-apiserver-authentication",
                    "-ojsonpath={.data.requestheader-client-ca-file}",
                    "-n",
                    "kube-system",
                ])
                .await
                .map_err(CrcError::retriable)?;

            if output.trim().is_empty() {
                return Err(CrcError::retriable(CrcError::Cluster(
                    "requestheader-client-ca-file not published yet".to_string(),
                )));
            }
            Ok(())
        })
        .await
}

/// Deletes the OpenShift API server pods so they reload the request header CA.
pub async fn delete_openshift_apiserver_pods(
    oc: Oc<'_>,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> CrcResult<()> {
    retry
        .run(cancel, || async move {
            oc.run(&["delete", "pod", "--all", "-n", "openshift-apiserver"])
                .await
                .map(|_| ())
                .map_err(CrcError::retriable)
        })
        .await
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use tempfile::TempDir;

    use super::*;
    use crate::ssh::fake::ScriptedRunner;

    #[tokio::test]
    async fn test_wait_for_ssh_gives_up() {
        let runner = ScriptedRunner::default();
        runner.fail("exit 0", "connection refused");

        let result = wait_for_ssh(
            &runner,
            RetryPolicy::new(3, Duration::ZERO),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(CrcError::RetryExhausted { attempts: 3, .. })));
        assert_eq!(runner.commands().len(), 3);
    }

    #[tokio::test]
    async fn test_wait_for_ssh_observes_cancellation() {
        let runner = ScriptedRunner::default();
        runner.fail("exit 0", "connection refused");
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = wait_for_ssh(&runner, RetryPolicy::new(3, Duration::ZERO), &cancel).await;
        assert!(matches!(result, Err(CrcError::Cancelled)));
    }

    #[tokio::test]
    async fn test_update_authorized_key_only_when_different() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let key = dir.path().join("id_ecdsa.pub");
        std::fs::write(&key, "ecdsa-sha2-nistp521 AAAA crc\n")?;

        let runner = ScriptedRunner::default();
        runner.respond("cat /home/core/.ssh/authorized_keys", "ecdsa-sha2-nistp521 AAAA crc\n");
        assert!(!update_authorized_key(&runner, &key).await?);

        let runner = ScriptedRunner::default();
        runner.respond("cat /home/core/.ssh/authorized_keys", "ssh-rsa OLD bundle\n");
        assert!(update_authorized_key(&runner, &key).await?);
        assert!(runner.ran("echo 'ecdsa-sha2-nistp521 AAAA crc' > /home/core/.ssh/authorized_keys"));

        Ok(())
    }

    #[tokio::test]
    async fn test_pull_secret_patch_is_base64() -> anyhow::Result<()> {
        let runner = ScriptedRunner::default();
        add_pull_secret_to_cluster(Oc::new(&runner), "{}").await?;

        assert!(runner.ran(r#"patch secret pull-secret -p '{"data":{".dockerconfigjson":"e30="}}'"#));
        Ok(())
    }

    #[tokio::test]
    async fn test_wait_for_request_header_ca_retries_on_empty_output() -> anyhow::Result<()> {
        let runner = ScriptedRunner::default();
        runner
            .fail_times("extension-apiserver-authentication", 1)
            .respond("extension-apiserver-authentication", "-----BEGIN CERTIFICATE-----");

        wait_for_request_header_client_ca_file(
            Oc::new(&runner),
            RetryPolicy::new(3, Duration::ZERO),
            &CancellationToken::new(),
        )
        .await?;

        Ok(())
    }
}
