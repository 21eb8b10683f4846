use std::{path::PathBuf, sync::Arc};

use serde::Serialize;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use super::types::{
    wire_error_type, ClusterStatusResult, Command, CommandResult, ConfigKeysArgs, ConsoleResponse,
    GetConfigResult, Request, SetConfigArgs, SetOrUnsetConfigResult, StartArgs, StartResponse,
    VersionResult,
};
use crate::{
    config::{self, Config, CrcPaths},
    machine::{self, StartConfig},
    preflight::{self, PreflightContext},
    pullsecret::NonInteractivePullSecretLoader,
    version, CrcError,
};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Turns daemon requests into lifecycle and config operations.
///
/// Every handler returns the JSON document written back to the caller. Failures are reported
/// inside the document, never as a transport error.
#[derive(Clone)]
pub struct Handler {
    client: Arc<dyn machine::Client>,
    config: Arc<Config>,
    paths: CrcPaths,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Handler {
    /// Creates a handler serving `client` and `config`.
    pub fn new(client: Arc<dyn machine::Client>, config: Arc<Config>, paths: CrcPaths) -> Self {
        Self {
            client,
            config,
            paths,
        }
    }

    /// Handles one request. A start stops early once `cancel` fires.
    pub async fn handle(&self, request: Request, cancel: &CancellationToken) -> String {
        let Some(command) = Command::from_name(&request.command) else {
            return encode_error(&format!("Unknown command supplied: {}", request.command));
        };

        tracing::debug!("handling {} request", command.as_str());
        match command {
            Command::Start => self.start(request.args, cancel).await,
            Command::Stop => self.stop().await,
            Command::Delete => self.delete().await,
            Command::Status => self.status().await,
            Command::Version => self.version(),
            Command::GetConfig => self.get_config(request.args),
            Command::SetConfig => self.set_config(request.args),
            Command::UnsetConfig => self.unset_config(request.args),
            Command::WebConsoleUrl => self.web_console_url().await,
        }
    }

    async fn start(&self, args: Option<Value>, cancel: &CancellationToken) -> String {
        let name = self.client.get_name().to_string();
        let args = match args.map(serde_json::from_value::<StartArgs>).transpose() {
            Ok(args) => args.unwrap_or_default(),
            Err(e) => {
                return encode(&StartResponse {
                    name,
                    error: format!("Incorrect arguments given: {e}"),
                    ..Default::default()
                })
            }
        };

        let ctx = PreflightContext {
            paths: &self.paths,
            config: &self.config,
        };
        if let Err(e) = preflight::start_preflight_checks(&ctx) {
            return encode(&start_failure(name, &e));
        }

        match self.client.start(cancel.child_token(), self.start_config(&args)).await {
            Ok(result) => encode(&StartResponse {
                name,
                status: result.status.to_string(),
                kubelet_started: result.kubelet_started,
                cluster_config: result.cluster_config,
                ..Default::default()
            }),
            Err(e) => {
                tracing::error!("start failed: {}", e);
                encode(&start_failure(name, &e))
            }
        }
    }

    fn start_config(&self, args: &StartArgs) -> StartConfig {
        let pull_secret_file = (!args.pull_secret_file.is_empty())
            .then(|| PathBuf::from(&args.pull_secret_file));

        StartConfig::builder()
            .bundle_path(self.config.get_string(config::BUNDLE))
            .cpus(self.config.get_u32(config::CPUS))
            .memory_mib(self.config.get_u32(config::MEMORY))
            .disk_size_gib(self.config.get_u32(config::DISK_SIZE))
            .nameserver(self.config.get_string(config::NAMESERVER))
            .pull_secret(Arc::new(NonInteractivePullSecretLoader::new(
                self.config.clone(),
                pull_secret_file,
            )))
            .build()
    }

    async fn stop(&self) -> String {
        let name = self.client.get_name().to_string();
        let result = match self.client.stop().await {
            Ok(state) => CommandResult {
                name,
                success: true,
                state: Some(state.to_string()),
                ..Default::default()
            },
            Err(CrcError::StopFailed { state, source }) => CommandResult {
                name,
                error: source.to_string(),
                state: Some(state.to_string()),
                ..Default::default()
            },
            Err(e) => CommandResult::failure(name, e.to_string()),
        };
        encode(&result)
    }

    async fn delete(&self) -> String {
        let name = self.client.get_name().to_string();
        let result = match self.client.delete().await {
            Ok(()) => CommandResult {
                name,
                success: true,
                ..Default::default()
            },
            Err(e) => CommandResult::failure(name, e.to_string()),
        };
        encode(&result)
    }

    async fn status(&self) -> String {
        let name = self.client.get_name().to_string();
        let result = match self.client.status().await {
            Ok(status) => ClusterStatusResult {
                name,
                crc_status: status.vm_state.to_string(),
                openshift_status: status.openshift_status,
                openshift_version: status.openshift_version,
                disk_use: status.disk_use,
                disk_size: status.disk_size,
                success: true,
                ..Default::default()
            },
            Err(e) => ClusterStatusResult {
                name,
                error: e.to_string(),
                ..Default::default()
            },
        };
        encode(&result)
    }

    fn version(&self) -> String {
        encode(&VersionResult {
            crc_version: version::CRC_VERSION.to_string(),
            commit_sha: version::commit_sha().to_string(),
            openshift_version: version::BUNDLE_VERSION.to_string(),
            success: true,
        })
    }

    async fn web_console_url(&self) -> String {
        let result = match self.client.get_console_url().await {
            Ok(console) => ConsoleResponse {
                cluster_config: console.cluster_config,
                success: true,
                state: console.state.to_string(),
                ..Default::default()
            },
            Err(e) => ConsoleResponse {
                error: e.to_string(),
                ..Default::default()
            },
        };
        encode(&result)
    }

    fn set_config(&self, args: Option<Value>) -> String {
        let Some(args) = args else {
            return encode(&no_config_keys());
        };
        let args: SetConfigArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => return encode(&config_error(e)),
        };

        let mut errors = Vec::new();
        let mut properties = Vec::new();
        for (key, value) in args.properties {
            match self.config.set(&key, value) {
                Ok(_) => properties.push(key),
                Err(e) => errors.push(e.to_string()),
            }
        }

        encode(&SetOrUnsetConfigResult {
            error: errors.join("\n"),
            properties,
        })
    }

    fn unset_config(&self, args: Option<Value>) -> String {
        let Some(args) = args else {
            return encode(&no_config_keys());
        };
        let args: ConfigKeysArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => return encode(&config_error(e)),
        };

        let mut errors = Vec::new();
        let mut properties = Vec::new();
        for key in args.properties {
            match self.config.unset(&key) {
                Ok(_) => properties.push(key),
                Err(e) => errors.push(e.to_string()),
            }
        }

        encode(&SetOrUnsetConfigResult {
            error: errors.join("\n"),
            properties,
        })
    }

    fn get_config(&self, args: Option<Value>) -> String {
        let Some(args) = args else {
            let configs = self
                .config
                .all_configs()
                .into_iter()
                .map(|(key, value)| (key, value.get_value().clone()))
                .collect();
            return encode(&GetConfigResult {
                error: String::new(),
                configs: Some(configs),
            });
        };

        let args: ConfigKeysArgs = match serde_json::from_value(args) {
            Ok(args) => args,
            Err(e) => {
                return encode(&GetConfigResult {
                    error: e.to_string(),
                    configs: None,
                })
            }
        };

        let configs: std::collections::BTreeMap<_, _> = args
            .properties
            .into_iter()
            .filter_map(|key| {
                let value = self.config.get(&key);
                (!*value.get_invalid()).then(|| (key, value.get_value().clone()))
            })
            .collect();

        if configs.is_empty() {
            return encode(&GetConfigResult {
                error: "Unable to get configs".to_string(),
                configs: None,
            });
        }

        encode(&GetConfigResult {
            error: String::new(),
            configs: Some(configs),
        })
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Encodes a generic failure response.
pub fn encode_error(message: &str) -> String {
    encode(&CommandResult::failure("", message))
}

fn encode<T: Serialize>(value: &T) -> String {
    serde_json::to_string(value).unwrap_or_else(|e| {
        tracing::error!("cannot encode response: {}", e);
        r#"{"Name":"","Success":false,"Error":"Failed while encoding JSON to string"}"#.to_string()
    })
}

fn start_failure(name: String, error: &CrcError) -> StartResponse {
    StartResponse {
        name,
        error: error.to_string(),
        error_type: wire_error_type(error.error_type()),
        ..Default::default()
    }
}

fn no_config_keys() -> SetOrUnsetConfigResult {
    SetOrUnsetConfigResult {
        error: "No config keys provided".to_string(),
        properties: Vec::new(),
    }
}

fn config_error(error: serde_json::Error) -> SetOrUnsetConfigResult {
    SetOrUnsetConfigResult {
        error: error.to_string(),
        properties: Vec::new(),
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
