use std::process::Command;
use anyhow::{Context, Result, bail};
use log::{debug, error};

/// Executes collaborator commands. `status` reports the exit code, `run`
/// turns a nonzero exit into an error.
pub trait CommandRunner {
    fn status(&self, command: &str, env: &[(String, String)]) -> Result<i32>;

    fn run(&self, command: &str, env: &[(String, String)]) -> Result<()> {
        let code = self.status(command, env)?;
        if code != 0 {
            error!("Command exited with code {}: {}", code, command);
            bail!("Command failed with exit code {}: {}", code, command);
        }
        Ok(())
    }
}

/// Runs commands through `sh -c` with inherited stdio, so script output
/// lands in the container log.
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn status(&self, command: &str, env: &[(String, String)]) -> Result<i32> {
        debug!("Executing: {}", command);
        let status = Command::new("sh")
            .arg("-c")
            .arg(command)
            .envs(env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .status()
            .with_context(|| format!("Failed to execute command: {}", command))?;

        // Killed by a signal
        Ok(status.code().unwrap_or(-1))
    }
}
