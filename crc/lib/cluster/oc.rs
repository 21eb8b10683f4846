use tokio_util::sync::CancellationToken;

use super::RetryPolicy;
use crate::{ssh::Runner, CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

const OC_PREFIX: &str = "oc --context admin --cluster crc --kubeconfig /opt/kubeconfig";

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Runs `oc` inside the guest with the admin kubeconfig.
#[derive(Clone, Copy)]
pub struct Oc<'a> {
    runner: &'a dyn Runner,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<'a> Oc<'a> {
    /// Wraps `runner`.
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self { runner }
    }

    /// Runs `oc <args>`. Arguments are passed to the guest shell as given, so JSON patches must
    /// carry their own quoting.
    pub async fn run(&self, args: &[&str]) -> CrcResult<String> {
        self.runner.run(&command(args)).await
    }

    /// Runs `oc <args>` without logging the command.
    pub async fn run_private(&self, args: &[&str]) -> CrcResult<String> {
        self.runner.run_private(&command(args)).await
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Waits until `oc get <resource>` succeeds.
pub async fn wait_for_openshift_resource(
    oc: Oc<'_>,
    resource: &str,
    retry: RetryPolicy,
    cancel: &CancellationToken,
) -> CrcResult<()> {
    tracing::debug!("waiting for availability of resource type '{}'", resource);
    retry
        .run(cancel, || async move {
            oc.run(&["get", resource])
                .await
                .map(|_| ())
                .map_err(CrcError::retriable)
        })
        .await
}

fn command(args: &[&str]) -> String {
    let mut command = OC_PREFIX.to_string();
    for arg in args {
        command.push(' ');
        command.push_str(arg);
    }
    command
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_uses_admin_context() {
        assert_eq!(
            command(&["get", "nodes"]),
            "oc --context admin --cluster crc --kubeconfig /opt/kubeconfig get nodes"
        );
    }
}
