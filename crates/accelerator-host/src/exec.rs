//! External command execution
//!
//! Host tools (`modprobe`, `setpci`, `rpm-ostree`, ...) run inside the host
//! filesystem through `chroot`, container tools (`pf_bb_config`,
//! `nvmupdate64e`) run directly. Both go through `CommandRunner` so tests can
//! record invocations instead of spawning processes.

use crate::error::HostError;
use async_trait::async_trait;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

/// Default upper bound for a single tool invocation.
pub const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// A program invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HostCommand {
    pub program: String,
    pub args: Vec<String>,
    /// Working directory, if the tool expects to find files next to it
    pub dir: Option<PathBuf>,
    /// Overrides the runner's timeout (firmware flashing takes much longer)
    pub timeout: Option<Duration>,
}

impl HostCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            dir: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn current_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = Some(dir.into());
        self
    }

    #[must_use]
    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl fmt::Display for HostCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.program)?;
        for arg in &self.args {
            write!(f, " {arg}")?;
        }
        Ok(())
    }
}

/// Runs external programs and returns their stdout.
#[async_trait]
pub trait CommandRunner: Send + Sync {
    async fn run(&self, command: &HostCommand) -> Result<String, HostError>;
}

/// Spawns real processes, optionally inside a chroot.
#[derive(Debug, Clone)]
pub struct HostCommandRunner {
    chroot: Option<PathBuf>,
    timeout: Duration,
}

impl HostCommandRunner {
    /// Runs commands as `chroot <root> <program> ...`.
    pub fn chrooted(root: impl Into<PathBuf>) -> Self {
        Self {
            chroot: Some(root.into()),
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    /// Runs commands from the container's own filesystem.
    pub fn local() -> Self {
        Self {
            chroot: None,
            timeout: DEFAULT_COMMAND_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }
}

#[async_trait]
impl CommandRunner for HostCommandRunner {
    async fn run(&self, command: &HostCommand) -> Result<String, HostError> {
        let mut cmd = match &self.chroot {
            Some(root) => {
                let mut cmd = tokio::process::Command::new("chroot");
                cmd.arg(root).arg(&command.program);
                cmd
            }
            None => tokio::process::Command::new(&command.program),
        };
        cmd.args(&command.args).kill_on_drop(true);
        if let Some(dir) = &command.dir {
            cmd.current_dir(dir);
        }

        let limit = command.timeout.unwrap_or(self.timeout);
        debug!("Executing: {} (timeout {}s)", command, limit.as_secs());

        let output = tokio::time::timeout(limit, cmd.output())
            .await
            .map_err(|_elapsed| HostError::CommandTimeout {
                command: command.to_string(),
                seconds: limit.as_secs(),
            })?
            .map_err(|source| HostError::Spawn {
                program: command.program.clone(),
                source,
            })?;

        if !output.status.success() {
            return Err(HostError::CommandFailed {
                command: command.to_string(),
                status: output.status.to_string(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_display() {
        let cmd = HostCommand::new("setpci").args(["-v", "-s", "0000:14:00.1", "COMMAND"]);
        assert_eq!(cmd.to_string(), "setpci -v -s 0000:14:00.1 COMMAND");
    }

    #[tokio::test]
    async fn test_local_runner_captures_stdout() {
        let out = HostCommandRunner::local()
            .run(&HostCommand::new("echo").arg("hello"))
            .await
            .unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_local_runner_reports_failure() {
        let err = HostCommandRunner::local()
            .run(&HostCommand::new("sh").args(["-c", "echo nope >&2; exit 3"]))
            .await
            .unwrap_err();
        match err {
            HostError::CommandFailed { stderr, .. } => assert_eq!(stderr, "nope"),
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_local_runner_times_out() {
        let err = HostCommandRunner::local()
            .with_timeout(Duration::from_millis(50))
            .run(&HostCommand::new("sleep").arg("5"))
            .await
            .unwrap_err();
        assert!(matches!(err, HostError::CommandTimeout { .. }));
    }
}
