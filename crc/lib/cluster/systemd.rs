use crate::{ssh::Runner, CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// Systemd unit states as reported by `systemctl is-active`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnitState {
    /// The unit is running.
    Running,

    /// The unit is not running.
    Stopped,

    /// The unit failed.
    Failed,

    /// Any other state.
    Unknown,
}

/// Drives systemd units inside the guest.
#[derive(Clone, Copy)]
pub struct SystemdCommander<'a> {
    runner: &'a dyn Runner,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl<'a> SystemdCommander<'a> {
    /// Wraps `runner`.
    pub fn new(runner: &'a dyn Runner) -> Self {
        Self { runner }
    }

    /// Starts `unit`.
    pub async fn start(&self, unit: &str) -> CrcResult<()> {
        self.systemctl("start", unit).await
    }

    /// Restarts `unit`.
    pub async fn restart(&self, unit: &str) -> CrcResult<()> {
        self.systemctl("restart", unit).await
    }

    /// Reloads unit files.
    pub async fn daemon_reload(&self) -> CrcResult<()> {
        self.runner.run("sudo systemctl daemon-reload").await?;
        Ok(())
    }

    /// Reads the state of `unit`.
    pub async fn status(&self, unit: &str) -> CrcResult<UnitState> {
        // `is-active` exits non-zero for inactive units, the state is still printed.
        let output = match self
            .runner
            .run(&format!("sudo systemctl is-active {unit}"))
            .await
        {
            Ok(output) => output,
            Err(CrcError::Ssh { output, .. }) => output,
            Err(e) => return Err(e),
        };
        Ok(UnitState::parse(&output))
    }

    async fn systemctl(&self, action: &str, unit: &str) -> CrcResult<()> {
        self.runner
            .run(&format!("sudo systemctl {action} {unit}"))
            .await?;
        Ok(())
    }
}

impl UnitState {
    fn parse(output: &str) -> Self {
        match output.trim() {
            "active" => UnitState::Running,
            "inactive" => UnitState::Stopped,
            "failed" => UnitState::Failed,
            _ => UnitState::Unknown,
        }
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------
