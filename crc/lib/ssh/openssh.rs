use std::{path::Path, sync::Arc};

use async_trait::async_trait;

use super::{KeyPairGenerator, Runner, RunnerFactory, SshEndpoint};
use crate::{utils, CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const HIDDEN_COMMAND: &str = "<hidden>";

const SSH_OPTIONS: &[&str] = &[
    "-o",
    "StrictHostKeyChecking=no",
    "-o",
    "UserKnownHostsFile=/dev/null",
    "-o",
    "IdentitiesOnly=yes",
    "-o",
    "ConnectTimeout=10",
    "-o",
    "LogLevel=ERROR",
];

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Uses the host's OpenSSH client binaries.
#[derive(Debug, Clone, Default)]
pub struct OpenSsh;

/// A runner that spawns one `ssh` process per command.
#[derive(Debug, Clone)]
pub struct OpenSshRunner {
    endpoint: SshEndpoint,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl OpenSshRunner {
    /// Creates a runner for `endpoint`.
    pub fn new(endpoint: SshEndpoint) -> Self {
        Self { endpoint }
    }

    fn args(&self, command: &str) -> Vec<String> {
        let mut args: Vec<String> = SSH_OPTIONS.iter().map(|s| s.to_string()).collect();

        for key in self.endpoint.private_keys.iter().filter(|key| key.exists()) {
            args.push("-i".to_string());
            args.push(key.to_string_lossy().into_owned());
        }

        args.push("-p".to_string());
        args.push(self.endpoint.port.to_string());
        args.push(format!("{}@{}", self.endpoint.user, self.endpoint.host));
        args.push("--".to_string());
        args.push(command.to_string());
        args
    }

    async fn exec(&self, command: &str, input: Option<&[u8]>, private: bool) -> CrcResult<String> {
        if !private {
            tracing::debug!("running SSH command: {}", command);
        }

        utils::run_command_with_input("ssh", self.args(command), input)
            .await
            .map_err(|e| match e {
                CrcError::Command { status, stderr, .. } => CrcError::Ssh {
                    command: if private {
                        HIDDEN_COMMAND.to_string()
                    } else {
                        command.to_string()
                    },
                    status,
                    output: stderr,
                },
                other => other,
            })
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Runner for OpenSshRunner {
    async fn run(&self, command: &str) -> CrcResult<String> {
        self.exec(command, None, false).await
    }

    async fn run_private(&self, command: &str) -> CrcResult<String> {
        self.exec(command, None, true).await
    }

    async fn copy_data(&self, data: &[u8], dest: &str, mode: u32) -> CrcResult<()> {
        tracing::debug!("creating {} with permissions 0{:o} in the VM", dest, mode);
        let command = format!("sudo install -m 0{mode:o} /dev/stdin {dest}");
        self.exec(&command, Some(data), true).await?;
        Ok(())
    }

    async fn close(&self) -> CrcResult<()> {
        tracing::debug!("closing SSH runner for {}", self.endpoint.host);
        Ok(())
    }
}

impl RunnerFactory for OpenSsh {
    fn create_runner(&self, endpoint: SshEndpoint) -> CrcResult<Arc<dyn Runner>> {
        Ok(Arc::new(OpenSshRunner::new(endpoint)))
    }
}

#[async_trait]
impl KeyPairGenerator for OpenSsh {
    async fn generate_key_pair(&self, private_key_path: &Path) -> CrcResult<()> {
        if let Some(parent) = private_key_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        let public_key_path = private_key_path.with_extension("pub");
        for path in [private_key_path, public_key_path.as_path()] {
            match tokio::fs::remove_file(path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => return Err(e.into()),
                _ => {}
            }
        }

        let path = private_key_path.to_string_lossy();
        utils::run_command(
            "ssh-keygen",
            ["-t", "ecdsa", "-b", "521", "-N", "", "-C", "crc", "-q", "-f", &*path],
        )
        .await?;
        Ok(())
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use tempfile::TempDir;

    use super::*;

    #[test]
    fn test_runner_args_skip_missing_keys() -> anyhow::Result<()> {
        let dir = TempDir::new()?;
        let key = dir.path().join("id_ecdsa");
        std::fs::write(&key, "key")?;

        let runner = OpenSshRunner::new(
            SshEndpoint::builder()
                .host("127.0.0.1")
                .port(2222)
                .private_keys(vec![PathBuf::from("/no/such/key"), key.clone()])
                .build(),
        );

        let args = runner.args("exit 0");
        let key_args: Vec<_> = args.iter().filter(|a| a.contains("id_ecdsa") || a.contains("/no/such")).collect();

        assert_eq!(key_args, vec![&key.to_string_lossy().into_owned()]);
        assert!(args.ends_with(&[
            "-p".to_string(),
            "2222".to_string(),
            "core@127.0.0.1".to_string(),
            "--".to_string(),
            "exit 0".to_string()
        ]));

        Ok(())
    }
}
