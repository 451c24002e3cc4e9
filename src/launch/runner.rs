use anyhow::{Context, Result};
use std::process::Command;
use tracing::{info, warn};

use crate::config::LaunchConfig;
use crate::env::EnvSpec;
use crate::launch::args::build_argv;

/// Everything needed to start the job: environment edits, the launcher
/// program and its argv. The plan is inert until `execute` is called, so a
/// dry run can render it without side effects.
#[derive(Debug, Clone)]
pub struct LaunchPlan {
    pub program: String,
    pub argv: Vec<String>,
    pub env: EnvSpec,
}

impl LaunchPlan {
    pub fn from_config(config: &LaunchConfig) -> Self {
        Self {
            program: config.launcher.program.clone(),
            argv: build_argv(config),
            env: EnvSpec::from_config(config),
        }
    }

    /// Shell-style rendering: env edits, then the full command line. Argv
    /// elements that would split under word expansion are single-quoted.
    pub fn render(&self) -> String {
        let command: Vec<String> = std::iter::once(&self.program)
            .chain(self.argv.iter())
            .map(|arg| shell_quote(arg))
            .collect();
        format!("{}\n{}", self.env.render(), command.join(" "))
    }

    /// Spawn the launcher and wait for it to finish.
    ///
    /// Returns the child's exit code. There is no retry or recovery: whatever
    /// the framework reports is the result. A child terminated by a signal
    /// maps to exit code 1.
    pub fn execute(&self) -> Result<i32> {
        let mut command = Command::new(&self.program);
        command.args(&self.argv);
        self.env.apply(&mut command);

        info!(program = %self.program, args = self.argv.len(), "Launching training job");
        let mut child = command
            .spawn()
            .with_context(|| format!("Failed to spawn launcher: {}", self.program))?;
        let status = child
            .wait()
            .with_context(|| "Failed to wait for launcher process")?;

        match status.code() {
            Some(code) => {
                info!(code, "Launcher exited");
                Ok(code)
            }
            None => {
                warn!("Launcher terminated by signal");
                Ok(1)
            }
        }
    }
}

fn shell_quote(arg: &str) -> String {
    let plain = !arg.is_empty()
        && arg
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "-_./=:,%+@".contains(c));
    if plain {
        arg.to_string()
    } else {
        format!("'{}'", arg.replace('\'', r"'\''"))
    }
}
