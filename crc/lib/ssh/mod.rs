//! SSH access to the guest.

#[cfg(test)]
pub(crate) mod fake;
mod openssh;

use std::{path::Path, path::PathBuf, sync::Arc};

use async_trait::async_trait;
use typed_builder::TypedBuilder;

use crate::CrcResult;

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// Runs commands and writes files on the guest.
#[async_trait]
pub trait Runner: Send + Sync {
    /// Runs `command` and returns its standard output.
    async fn run(&self, command: &str) -> CrcResult<String>;

    /// Runs `command` without logging it or echoing it in errors.
    async fn run_private(&self, command: &str) -> CrcResult<String>;

    /// Writes `data` to `dest` on the guest as root with permission bits `mode`.
    async fn copy_data(&self, data: &[u8], dest: &str, mode: u32) -> CrcResult<()>;

    /// Releases the connection.
    async fn close(&self) -> CrcResult<()>;
}

/// Opens runners against an endpoint.
pub trait RunnerFactory: Send + Sync {
    /// Creates a runner for `endpoint`.
    fn create_runner(&self, endpoint: SshEndpoint) -> CrcResult<Arc<dyn Runner>>;
}

/// Generates SSH key pairs on the host.
#[async_trait]
pub trait KeyPairGenerator: Send + Sync {
    /// Writes a new key pair to `private_key_path` and `<private_key_path>.pub`.
    async fn generate_key_pair(&self, private_key_path: &Path) -> CrcResult<()>;
}

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Where and as whom to connect.
#[derive(Debug, Clone, PartialEq, Eq, TypedBuilder)]
pub struct SshEndpoint {
    /// Guest address.
    #[builder(setter(into))]
    pub host: String,

    /// Guest SSH port.
    pub port: u16,

    /// Guest user.
    #[builder(default = crate::config::DEFAULT_SSH_USER.to_string(), setter(into))]
    pub user: String,

    /// Private keys to offer, in order. Missing files are skipped.
    #[builder(default)]
    pub private_keys: Vec<PathBuf>,
}

//--------------------------------------------------------------------------------------------------
// Exports
//--------------------------------------------------------------------------------------------------

pub use openssh::*;
