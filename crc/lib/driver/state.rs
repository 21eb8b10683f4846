use std::fmt;

use serde::{Deserialize, Serialize};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// The state of the VM as reported by its driver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VmState {
    /// No VM exists.
    #[serde(rename = "")]
    None,

    /// The VM is running.
    Running,

    /// The VM exists and is powered off.
    Stopped,

    /// The VM is booting.
    Starting,

    /// The VM is shutting down.
    Stopping,

    /// The driver reported an unusable state.
    Error,
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

impl fmt::Display for VmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self {
            VmState::None => "",
            VmState::Running => "Running",
            VmState::Stopped => "Stopped",
            VmState::Starting => "Starting",
            VmState::Stopping => "Stopping",
            VmState::Error => "Error",
        };
        f.write_str(state)
    }
}
