// SPDX-License-Identifier: GPL-3.0-only

//! External program execution

use std::io::Write;
use std::process::{Command, Stdio};
use std::sync::Arc;

use provision_contracts::{
    CommandExecutor, CommandOutput, CommandSpec, ProvisionError, Result, Sleeper, ThreadSleeper,
};

/// Search path forced on every child so tools resolve the same way under
/// minimal init environments.
const SAFE_PATH: &str = "/bin:/usr/bin:/sbin:/usr/sbin";

/// Runs commands with `std::process`, retrying per the command's policy.
#[derive(Clone)]
pub struct SystemExecutor {
    sleeper: Arc<dyn Sleeper>,
}

impl Default for SystemExecutor {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemExecutor {
    pub fn new() -> Self {
        Self::with_sleeper(Arc::new(ThreadSleeper))
    }

    pub fn with_sleeper(sleeper: Arc<dyn Sleeper>) -> Self {
        Self { sleeper }
    }
}

impl CommandExecutor for SystemExecutor {
    fn execute(&self, spec: &CommandSpec) -> Result<CommandOutput> {
        let rendered = spec.render();
        spec.retry.run(self.sleeper.as_ref(), &rendered, |attempt| {
            tracing::debug!("Trying to execute command: {} (attempt {})", rendered, attempt);
            run_once(spec, &rendered)
        })
    }
}

fn run_once(spec: &CommandSpec, rendered: &str) -> Result<CommandOutput> {
    let mut command = Command::new(&spec.program);
    command
        .args(&spec.args)
        .env("PATH", SAFE_PATH)
        .env("LC_ALL", "C")
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .stdin(if spec.stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
    for (key, value) in &spec.env {
        command.env(key, value);
    }

    let spawn_failed = |error: std::io::Error| ProvisionError::Execution {
        command: rendered.to_string(),
        exit_code: None,
        stdout: String::new(),
        stderr: error.to_string(),
    };

    let mut child = command.spawn().map_err(spawn_failed)?;
    if let Some(input) = &spec.stdin
        && let Some(mut stdin) = child.stdin.take()
    {
        stdin.write_all(input.as_bytes()).map_err(spawn_failed)?;
    }
    let output = child.wait_with_output().map_err(spawn_failed)?;

    let stdout = String::from_utf8_lossy(&output.stdout).to_string();
    let stderr = String::from_utf8_lossy(&output.stderr).to_string();

    match output.status.code() {
        Some(code) if spec.accepts(code) => Ok(CommandOutput {
            stdout,
            stderr,
            exit_code: code,
        }),
        exit_code => Err(ProvisionError::Execution {
            command: rendered.to_string(),
            exit_code,
            stdout,
            stderr: stderr.trim().to_string(),
        }),
    }
}

/// Run `spec` and hand back its stdout.
pub fn capture(executor: &dyn CommandExecutor, spec: &CommandSpec) -> Result<String> {
    Ok(executor.execute(spec)?.stdout)
}
