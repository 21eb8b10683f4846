use std::{collections::BTreeMap, path::PathBuf};

use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::UnixStream,
};

use super::{
    ClusterStatusResult, Command, CommandResult, ConfigKeysArgs, ConsoleResponse, GetConfigResult,
    Request, SetConfigArgs, SetOrUnsetConfigResult, StartArgs, StartResponse, VersionResult,
};
use crate::{CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Talks to the daemon over its socket. Each call opens a new connection.
#[derive(Debug, Clone)]
pub struct Client {
    socket_path: PathBuf,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Client {
    /// Creates a client for the daemon listening on `socket_path`.
    pub fn new(socket_path: impl Into<PathBuf>) -> Self {
        Self {
            socket_path: socket_path.into(),
        }
    }

    /// Sends a raw request and returns the raw response.
    pub async fn send(&self, request: &Request) -> CrcResult<String> {
        let mut stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            CrcError::Api(format!(
                "cannot reach the crc daemon at {}, is 'crc daemon' running? ({e})",
                self.socket_path.display()
            ))
        })?;

        stream.write_all(&serde_json::to_vec(request)?).await?;
        stream.shutdown().await?;

        let mut response = String::new();
        stream.read_to_string(&mut response).await?;
        Ok(response)
    }

    /// Starts the cluster.
    pub async fn start(&self, args: StartArgs) -> CrcResult<StartResponse> {
        let args = if args.pull_secret_file.is_empty() {
            None
        } else {
            Some(serde_json::to_value(args)?)
        };
        self.call(Command::Start, args).await
    }

    /// Stops the cluster.
    pub async fn stop(&self) -> CrcResult<CommandResult> {
        self.call(Command::Stop, None).await
    }

    /// Deletes the cluster.
    pub async fn delete(&self) -> CrcResult<CommandResult> {
        self.call(Command::Delete, None).await
    }

    /// Reads the cluster status.
    pub async fn status(&self) -> CrcResult<ClusterStatusResult> {
        self.call(Command::Status, None).await
    }

    /// Reads the daemon version.
    pub async fn version(&self) -> CrcResult<VersionResult> {
        self.call(Command::Version, None).await
    }

    /// Reads the console access details.
    pub async fn web_console_url(&self) -> CrcResult<ConsoleResponse> {
        self.call(Command::WebConsoleUrl, None).await
    }

    /// Reads `keys`, or every setting when `keys` is empty.
    pub async fn get_config(&self, keys: Vec<String>) -> CrcResult<GetConfigResult> {
        let args = if keys.is_empty() {
            None
        } else {
            Some(serde_json::to_value(ConfigKeysArgs { properties: keys })?)
        };
        self.call(Command::GetConfig, args).await
    }

    /// Stores settings.
    pub async fn set_config(&self, properties: BTreeMap<String, Value>) -> CrcResult<SetOrUnsetConfigResult> {
        let args = serde_json::to_value(SetConfigArgs { properties })?;
        self.call(Command::SetConfig, Some(args)).await
    }

    /// Removes stored settings.
    pub async fn unset_config(&self, keys: Vec<String>) -> CrcResult<SetOrUnsetConfigResult> {
        let args = serde_json::to_value(ConfigKeysArgs { properties: keys })?;
        self.call(Command::UnsetConfig, Some(args)).await
    }

    async fn call<T: DeserializeOwned>(&self, command: Command, args: Option<Value>) -> CrcResult<T> {
        let request = Request {
            command: command.as_str().to_string(),
            args,
        };
        let response = self.send(&request).await?;
        serde_json::from_str(&response).map_err(|e| {
            CrcError::Api(format!("unexpected {} response '{}': {e}", command.as_str(), response))
        })
    }
}
