use std::{fmt, path::PathBuf};

use crcutils::{AnyError, Retriable, RetryError};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{driver::VmState, machine::StartStage};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The result of a crc-related operation.
pub type CrcResult<T> = Result<T, CrcError>;

/// An error that occurred while managing the cluster VM.
#[derive(pretty_error_debug::Debug, Error)]
pub enum CrcError {
    /// An I/O error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// An error that can represent any error.
    #[error(transparent)]
    Custom(#[from] AnyError),

    /// A JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A YAML decoding error.
    #[error("yaml error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// An error that occurred when a join handle returned an error.
    #[error("join error: {0}")]
    JoinError(#[from] tokio::task::JoinError),

    /// A request parameter failed validation before any backend was touched.
    #[error("{0}")]
    Validation(String),

    /// A config key that is not registered.
    #[error("Configuration property '{0}' does not exist")]
    UnknownConfigKey(String),

    /// A config value that does not pass its validator.
    #[error("Value '{value}' for configuration property '{key}' is invalid, reason: {reason}")]
    InvalidConfigValue {
        /// The config key.
        key: String,

        /// The rejected value.
        value: String,

        /// Why the validator rejected the value.
        reason: String,
    },

    /// The VM was created from a different bundle than the one requested.
    #[error("Bundle '{requested}' was requested, but the existing VM is using '{existing}'")]
    BundleMismatch {
        /// The bundle requested for this start.
        requested: String,

        /// The bundle the VM was created with.
        existing: String,
    },

    /// The bundle archive or its extracted directory is missing.
    #[error("bundle not found: {}", .0.display())]
    BundleNotFound(PathBuf),

    /// The bundle metadata is unusable.
    #[error("invalid bundle: {0}")]
    InvalidBundle(String),

    /// A post-boot stage failed.
    #[error("{stage} failed: {source}")]
    Stage {
        /// The stage that failed.
        stage: StartStage,

        /// What went wrong.
        source: Box<CrcError>,
    },

    /// A transient failure that a retry loop may try again.
    #[error("{0}")]
    Retriable(Box<CrcError>),

    /// A bounded retry loop gave up.
    #[error("gave up after {attempts} attempts: {source}")]
    RetryExhausted {
        /// Number of attempts made.
        attempts: usize,

        /// The last failure.
        source: Box<CrcError>,
    },

    /// The operation observed its cancellation token.
    #[error("operation was cancelled")]
    Cancelled,

    /// Another start holds the start lock.
    #[error("start already in progress")]
    StartInProgress,

    /// Another stop or delete holds the stop/delete lock.
    #[error("cluster is stopping or deleting")]
    StopOrDeleteInProgress,

    /// An in-flight start did not release the start lock in time.
    #[error("cannot abort startup sequence quickly enough")]
    StartAbortTimeout,

    /// No instance with the given name is registered.
    #[error("Machine '{0}' does not exist. Use 'crc start' to create it")]
    MachineDoesNotExist(String),

    /// A graceful stop failed. The state observed after the failure is kept.
    #[error("cannot stop machine (state: {state}): {source}")]
    StopFailed {
        /// The VM state read after the failed stop.
        state: VmState,

        /// The stop failure.
        source: Box<CrcError>,
    },

    /// The driver could not remove the VM's backing resources.
    #[error("driver failed to remove the machine: {0}")]
    DriverRemove(Box<CrcError>),

    /// The instance registration could not be removed.
    #[error("failed to remove the machine registration: {0}")]
    Unregister(Box<CrcError>),

    /// The driver does not support the requested operation.
    #[error("driver does not support {0}")]
    DriverNotImplemented(&'static str),

    /// No driver backend exists for this platform or name.
    #[error("unsupported driver: {0}")]
    UnsupportedDriver(String),

    /// A host-side command exited unsuccessfully.
    #[error("command '{program}' failed ({status}): {stderr}")]
    Command {
        /// The program that was run.
        program: String,

        /// The exit status description.
        status: String,

        /// Captured standard error.
        stderr: String,
    },

    /// A command run over SSH failed.
    #[error("ssh command error:\ncommand : {command}\nerr     : {status}\noutput  : {output}")]
    Ssh {
        /// The command, or a placeholder for private commands.
        command: String,

        /// The exit status description.
        status: String,

        /// Captured output.
        output: String,
    },

    /// The pull secret is missing or malformed.
    #[error("pull secret error: {0}")]
    PullSecret(String),

    /// A cluster-side query or update failed.
    #[error("{0}")]
    Cluster(String),

    /// The kubelet certificate renewal flow failed.
    #[error("{0}\nThe cluster certificates have expired and could not be renewed. Delete the cluster with 'crc delete' and start it again with 'crc start'")]
    CertificateRenewal(String),

    /// A preflight check failed.
    #[error("{0}")]
    Preflight(String),

    /// The local API request could not be handled.
    #[error("api error: {0}")]
    Api(String),

    /// A failure reported by the daemon in a response.
    #[error("{0}")]
    Daemon(SerializableError),

    /// A CLI or request argument is invalid.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

/// The category of an error reported over the local API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorType {
    /// Any failure that is not a preflight failure.
    Generic,

    /// A preflight check failed; the host needs `crc setup`.
    Preflight,
}

/// An error as it crosses the daemon socket.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SerializableError {
    /// The error category.
    pub kind: ErrorType,

    /// The rendered error.
    pub message: String,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl CrcError {
    /// Creates a new `Err` result.
    pub fn custom(error: impl Into<anyhow::Error>) -> CrcError {
        CrcError::Custom(AnyError::new(error))
    }

    /// Marks an error as transient so retry loops try again.
    pub fn retriable(error: impl Into<CrcError>) -> CrcError {
        CrcError::Retriable(Box::new(error.into()))
    }

    /// Wraps an error with the stage it happened in.
    pub fn stage(stage: StartStage, error: impl Into<CrcError>) -> CrcError {
        CrcError::Stage {
            stage,
            source: Box::new(error.into()),
        }
    }

    /// Removes any retriable markers.
    pub fn into_unmarked(self) -> CrcError {
        match self {
            CrcError::Retriable(inner) => inner.into_unmarked(),
            other => other,
        }
    }

    /// Returns the stage this error was raised in, if any.
    pub fn failed_stage(&self) -> Option<StartStage> {
        match self {
            CrcError::Stage { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Returns `true` if this error, or the stage failure it wraps, is a cancellation.
    pub fn is_cancelled(&self) -> bool {
        match self {
            CrcError::Cancelled => true,
            CrcError::Stage { source, .. } => source.is_cancelled(),
            _ => false,
        }
    }

    /// The category reported alongside the error message over the local API.
    pub fn error_type(&self) -> ErrorType {
        match self {
            CrcError::Preflight(_) => ErrorType::Preflight,
            CrcError::Daemon(e) => e.kind,
            _ => ErrorType::Generic,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

/// Creates an `Ok` `CrcResult`.
#[allow(non_snake_case)]
pub fn Ok<T>(value: T) -> CrcResult<T> {
    Result::Ok(value)
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl Retriable for CrcError {
    fn is_retriable(&self) -> bool {
        matches!(self, CrcError::Retriable(_))
    }
}

impl From<&CrcError> for SerializableError {
    fn from(error: &CrcError) -> Self {
        Self {
            kind: error.error_type(),
            message: error.to_string(),
        }
    }
}

impl fmt::Display for SerializableError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

impl std::error::Error for SerializableError {}

impl From<RetryError<CrcError>> for CrcError {
    fn from(error: RetryError<CrcError>) -> Self {
        match error {
            RetryError::Cancelled { .. } => CrcError::Cancelled,
            RetryError::Exhausted { attempts, last } => CrcError::RetryExhausted {
                attempts,
                source: Box::new(last.into_unmarked()),
            },
            RetryError::Fatal(e) => e.into_unmarked(),
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
