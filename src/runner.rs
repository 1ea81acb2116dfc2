use anyhow::{Context, Result};
use declarative::{CommandOutput, CommandRunner};
use std::process::{Command, Stdio};

/// Runs commands on the host, capturing their output
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemRunner;

impl CommandRunner for SystemRunner {
    fn run(&self, cmd: &str, args: &[&str]) -> Result<CommandOutput> {
        log::debug!("exec: {} {}", cmd, args.join(" "));
        let output = Command::new(cmd)
            .args(args)
            .stdin(Stdio::null())
            .output()
            .with_context(|| format!("Failed to execute: {} {}", cmd, args.join(" ")))?;
        Ok(output.into())
    }
}

/// Check if a command exists on the PATH
pub fn command_exists(runner: &dyn CommandRunner, cmd: &str) -> bool {
    runner.run_status("which", &[cmd]).unwrap_or(false)
}

#[cfg(test)]
pub use fake::FakeRunner;
