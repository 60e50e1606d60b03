//! Shared test doubles and fixtures

use crate::elevation::{CommandOutput, CommandRunner};
use crate::service::ServiceCommands;
use crate::strategy::Strategy;
use crate::utils::display_command;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io;

/// Scripted command runner: records invocations and replays canned failures
/// per program.
pub(crate) struct ScriptedRunner {
    valid_secret: Option<String>,
    failures: Mutex<HashMap<String, CommandOutput>>,
    calls: Mutex<Vec<String>>,
}

impl ScriptedRunner {
    /// Accepts any secret.
    pub fn new() -> Self {
        Self {
            valid_secret: None,
            failures: Mutex::new(HashMap::new()),
            calls: Mutex::new(Vec::new()),
        }
    }

    /// Accepts exactly one secret.
    pub fn with_secret(secret: &str) -> Self {
        Self {
            valid_secret: Some(secret.to_string()),
            ..Self::new()
        }
    }

    /// From now on, `program` exits non-zero with `stderr`.
    pub fn fail_program(&self, program: &str, stderr: &str) {
        self.failures.lock().insert(
            program.to_string(),
            CommandOutput {
                status: 1,
                stdout: String::new(),
                stderr: stderr.to_string(),
            },
        );
    }

    /// Recorded "program arg arg.." lines, in order.
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Number of recorded invocations of `program`.
    pub fn count_program(&self, program: &str) -> usize {
        self.calls
            .lock()
            .iter()
            .filter(|c| c.split_whitespace().next() == Some(program))
            .count()
    }
}

#[async_trait]
impl CommandRunner for ScriptedRunner {
    async fn run(&self, _secret: &str, program: &str, args: &[String]) -> io::Result<CommandOutput> {
        self.calls.lock().push(display_command(program, args));
        if let Some(output) = self.failures.lock().get(program) {
            return Ok(output.clone());
        }
        Ok(CommandOutput::default())
    }

    async fn validate(&self, secret: &str) -> io::Result<bool> {
        Ok(self
            .valid_secret
            .as_deref()
            .map_or(true, |valid| valid == secret))
    }
}

/// Command surface with short, recognizable program names.
pub(crate) fn test_commands() -> ServiceCommands {
    ServiceCommands {
        launcher: "zapret-launch".to_string(),
        stopper: "zapret-stop".to_string(),
        unit: "zapretdeck.service".to_string(),
        systemctl: "systemctl".to_string(),
        process_name: "nfqws".to_string(),
    }
}

/// A strategy whose args carry its id, so command logs show which one ran.
pub(crate) fn test_strategy(id: &str) -> Strategy {
    Strategy {
        id: id.to_string(),
        label: id.to_string(),
        args: vec!["--qnum=200".to_string(), format!("--strategy={}", id)],
    }
}
