use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{machine::ClusterConfig, ErrorType, SerializableError};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A request sent over the daemon socket.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Request {
    /// The command name.
    pub command: String,

    /// Command arguments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<Value>,
}

/// The commands the daemon understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Command {
    /// Create or boot the VM and provision the cluster.
    Start,
    /// Stop the VM.
    Stop,
    /// Delete the VM.
    Delete,
    /// Read VM and cluster health.
    Status,
    /// Read the crc and bundle versions.
    Version,
    /// Read settings.
    GetConfig,
    /// Store settings.
    SetConfig,
    /// Remove stored settings.
    UnsetConfig,
    /// Read the console access details.
    WebConsoleUrl,
}

/// Outcome of a stop or delete, and the generic error response.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct CommandResult {
    /// Instance name.
    pub name: String,
    /// Whether the command succeeded.
    pub success: bool,
    /// Failure message, empty on success.
    pub error: String,
    /// VM state after the command, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    /// Set to `Preflight` for preflight failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
}

/// Outcome of a start.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct StartResponse {
    /// Instance name.
    pub name: String,
    /// VM state after the start.
    pub status: String,
    /// Failure message, empty on success.
    pub error: String,
    /// Whether the kubelet is running.
    pub kubelet_started: bool,
    /// Cluster access details.
    pub cluster_config: ClusterConfig,
    /// Set to `Preflight` for preflight failures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
}

/// VM and cluster health.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ClusterStatusResult {
    /// Instance name.
    pub name: String,
    /// VM state.
    pub crc_status: String,
    /// Cluster health.
    pub openshift_status: String,
    /// OpenShift release.
    pub openshift_version: String,
    /// Bytes used on the guest root filesystem.
    pub disk_use: u64,
    /// Size of the guest root filesystem in bytes.
    pub disk_size: u64,
    /// Failure message, empty on success.
    pub error: String,
    /// Whether the status could be read.
    pub success: bool,
}

/// The crc and bundle versions.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct VersionResult {
    /// crc release.
    pub crc_version: String,
    /// Commit crc was built from.
    pub commit_sha: String,
    /// OpenShift release of the default bundle.
    pub openshift_version: String,
    /// Always `true`.
    pub success: bool,
}

/// Console access details.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct ConsoleResponse {
    /// Cluster access details.
    pub cluster_config: ClusterConfig,
    /// Whether the details could be read.
    pub success: bool,
    /// Failure message, empty on success.
    pub error: String,
    /// VM state.
    pub state: String,
}

/// Outcome of `setconfig` and `unsetconfig`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct SetOrUnsetConfigResult {
    /// Failures, one per line.
    pub error: String,
    /// The keys that were changed.
    #[serde(default, deserialize_with = "null_as_default")]
    pub properties: Vec<String>,
}

/// Outcome of `getconfig`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "PascalCase")]
pub struct GetConfigResult {
    /// Failure message, empty on success.
    pub error: String,
    /// Resolved values by key, `null` when nothing could be read.
    pub configs: Option<BTreeMap<String, Value>>,
}

/// Arguments of `start`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StartArgs {
    /// A pull secret file overriding the configured one.
    #[serde(rename = "pullSecretFile", default)]
    pub pull_secret_file: String,
}

/// Arguments of `setconfig`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SetConfigArgs {
    /// Values by key.
    pub properties: BTreeMap<String, Value>,
}

/// Arguments of `getconfig` and `unsetconfig`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigKeysArgs {
    /// The keys to act on.
    pub properties: Vec<String>,
}

//--------------------------------------------------------------------------------------------------
// Traits
//--------------------------------------------------------------------------------------------------

/// A response that may carry a failure.
pub trait Response {
    /// The failure reported by the daemon, if any.
    fn get_error(&self) -> Option<SerializableError>;
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl Command {
    /// Looks up a command by its wire name.
    pub fn from_name(name: &str) -> Option<Self> {
        let command = match name {
            "start" => Command::Start,
            "stop" => Command::Stop,
            "delete" => Command::Delete,
            "status" => Command::Status,
            "version" => Command::Version,
            "getconfig" => Command::GetConfig,
            "setconfig" => Command::SetConfig,
            "unsetconfig" => Command::UnsetConfig,
            "webconsoleurl" => Command::WebConsoleUrl,
            _ => return None,
        };
        Some(command)
    }

    /// The wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            Command::Start => "start",
            Command::Stop => "stop",
            Command::Delete => "delete",
            Command::Status => "status",
            Command::Version => "version",
            Command::GetConfig => "getconfig",
            Command::SetConfig => "setconfig",
            Command::UnsetConfig => "unsetconfig",
            Command::WebConsoleUrl => "webconsoleurl",
        }
    }

    /// Returns `true` for the commands that change the VM state and run one at a time.
    pub fn is_mutating(&self) -> bool {
        matches!(self, Command::Start | Command::Stop | Command::Delete)
    }
}

impl CommandResult {
    /// A failed result carrying `message`.
    pub fn failure(name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            error: message.into(),
            ..Default::default()
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// The category to put on the wire: only preflight failures are marked.
pub(crate) fn wire_error_type(kind: ErrorType) -> Option<ErrorType> {
    (kind == ErrorType::Preflight).then_some(kind)
}

fn error_from(message: &str, error_type: Option<ErrorType>) -> Option<SerializableError> {
    (!message.is_empty()).then(|| SerializableError {
        kind: error_type.unwrap_or(ErrorType::Generic),
        message: message.to_string(),
    })
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: serde::Deserializer<'de>,
    T: Default + Deserialize<'de>,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Response for CommandResult {
    fn get_error(&self) -> Option<SerializableError> {
        error_from(&self.error, self.error_type)
    }
}

impl Response for StartResponse {
    fn get_error(&self) -> Option<SerializableError> {
        error_from(&self.error, self.error_type)
    }
}

impl Response for ClusterStatusResult {
    fn get_error(&self) -> Option<SerializableError> {
        error_from(&self.error, None)
    }
}

impl Response for VersionResult {
    fn get_error(&self) -> Option<SerializableError> {
        None
    }
}

impl Response for ConsoleResponse {
    fn get_error(&self) -> Option<SerializableError> {
        error_from(&self.error, None)
    }
}

impl Response for SetOrUnsetConfigResult {
    fn get_error(&self) -> Option<SerializableError> {
        error_from(&self.error, None)
    }
}

impl Response for GetConfigResult {
    fn get_error(&self) -> Option<SerializableError> {
        error_from(&self.error, None)
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_start_args_reject_unknown_fields() {
        let parsed: Result<StartArgs, _> =
            serde_json::from_str(r#"{"pullSecretFile": "/tmp/ps", "bundle": "x"}"#);
        assert!(parsed.is_err());

        let parsed: StartArgs = serde_json::from_str(r#"{"pullSecretFile": "/tmp/ps"}"#).unwrap();
        assert_eq!(parsed.pull_secret_file, "/tmp/ps");
    }

    #[test]
    fn test_results_use_pascal_case_keys() -> anyhow::Result<()> {
        let result = CommandResult {
            name: "crc".to_string(),
            success: true,
            state: Some("Stopped".to_string()),
            ..Default::default()
        };

        let value = serde_json::to_value(&result)?;
        assert_eq!(
            value,
            serde_json::json!({"Name": "crc", "Success": true, "Error": "", "State": "Stopped"})
        );

        let status = serde_json::to_value(ClusterStatusResult::default())?;
        for key in ["CrcStatus", "OpenshiftStatus", "OpenshiftVersion", "DiskUse", "DiskSize"] {
            assert!(status.get(key).is_some(), "missing {key}");
        }

        Ok(())
    }

    #[test]
    fn test_preflight_failures_carry_their_category() {
        let result = CommandResult {
            error: "libvirt is not installed".to_string(),
            error_type: wire_error_type(ErrorType::Preflight),
            ..Default::default()
        };
        let error = result.get_error().unwrap();
        assert_eq!(error.kind, ErrorType::Preflight);

        assert_eq!(wire_error_type(ErrorType::Generic), None);
        assert!(CommandResult::default().get_error().is_none());
    }

    #[test]
    fn test_command_lanes() {
        assert!(Command::from_name("start").unwrap().is_mutating());
        assert!(Command::from_name("delete").unwrap().is_mutating());
        assert!(!Command::from_name("webconsoleurl").unwrap().is_mutating());
        assert_eq!(Command::from_name("reboot"), None);
        assert_eq!(Command::GetConfig.as_str(), "getconfig");
    }
}
