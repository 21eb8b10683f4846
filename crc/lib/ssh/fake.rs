use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use async_trait::async_trait;

use super::{Runner, RunnerFactory, SshEndpoint};
use crate::{CrcError, CrcResult};

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// A runner answering commands from a list of rules.
///
/// The first rule whose pattern is contained in the command decides the answer. Commands
/// matching no rule succeed with empty output.
#[derive(Default)]
pub(crate) struct ScriptedRunner {
    rules: Mutex<Vec<Rule>>,
    commands: Mutex<Vec<String>>,
    files: Mutex<BTreeMap<String, (Vec<u8>, u32)>>,
}

/// A factory handing out one shared [`ScriptedRunner`].
#[derive(Default)]
pub(crate) struct ScriptedRunnerFactory {
    pub(crate) runner: Arc<ScriptedRunner>,
    pub(crate) endpoints: Mutex<Vec<SshEndpoint>>,
}

struct Rule {
    pattern: String,
    failures_left: Option<usize>,
    output: Result<String, String>,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl ScriptedRunner {
    pub(crate) fn respond(&self, pattern: &str, output: &str) -> &Self {
        self.push(pattern, None, Ok(output.to_string()))
    }

    pub(crate) fn fail(&self, pattern: &str, error: &str) -> &Self {
        self.push(pattern, None, Err(error.to_string()))
    }

    /// Fails the next `times` matching commands, then falls through to later rules.
    pub(crate) fn fail_times(&self, pattern: &str, times: usize) -> &Self {
        self.push(pattern, Some(times), Err("transient failure".to_string()))
    }

    pub(crate) fn commands(&self) -> Vec<String> {
        self.commands.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub(crate) fn ran(&self, pattern: &str) -> bool {
        self.commands().iter().any(|c| c.contains(pattern))
    }

    pub(crate) fn file(&self, dest: &str) -> Option<(String, u32)> {
        let files = self.files.lock().ok()?;
        files
            .get(dest)
            .map(|(data, mode)| (String::from_utf8_lossy(data).into_owned(), *mode))
    }

    fn push(&self, pattern: &str, failures_left: Option<usize>, output: Result<String, String>) -> &Self {
        if let Ok(mut rules) = self.rules.lock() {
            rules.push(Rule {
                pattern: pattern.to_string(),
                failures_left,
                output,
            });
        }
        self
    }

    fn answer(&self, command: &str) -> CrcResult<String> {
        if let Ok(mut commands) = self.commands.lock() {
            commands.push(command.to_string());
        }

        let Ok(mut rules) = self.rules.lock() else {
            return Ok(String::new());
        };

        for rule in rules.iter_mut().filter(|rule| command.contains(&rule.pattern)) {
            match &mut rule.failures_left {
                Some(0) => continue,
                Some(left) => *left -= 1,
                None => {}
            }

            return rule.output.clone().map_err(|output| CrcError::Ssh {
                command: command.to_string(),
                status: "exit status: 1".to_string(),
                output,
            });
        }

        Ok(String::new())
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl Runner for ScriptedRunner {
    async fn run(&self, command: &str) -> CrcResult<String> {
        self.answer(command)
    }

    async fn run_private(&self, command: &str) -> CrcResult<String> {
        self.answer(command)
    }

    async fn copy_data(&self, data: &[u8], dest: &str, mode: u32) -> CrcResult<()> {
        self.answer(&format!("copy {dest}"))?;
        if let Ok(mut files) = self.files.lock() {
            files.insert(dest.to_string(), (data.to_vec(), mode));
        }
        Ok(())
    }

    async fn close(&self) -> CrcResult<()> {
        Ok(())
    }
}

impl RunnerFactory for ScriptedRunnerFactory {
    fn create_runner(&self, endpoint: SshEndpoint) -> CrcResult<Arc<dyn Runner>> {
        if let Ok(mut endpoints) = self.endpoints.lock() {
            endpoints.push(endpoint);
        }
        Ok(self.runner.clone())
    }
}
