//! Command execution against the cluster
//!
//! Every check talks to the cluster by running CLI tools (`kubectl`, `argocd`,
//! `curl`, ...) on a boot server over SSH, or locally inside one of the
//! placemat network namespaces. The `Executor` trait hides which.

pub mod local;
pub mod ssh;

#[cfg(test)]
pub mod scripted;

pub use local::LocalExecutor;
pub use ssh::SshExecutor;

use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Exit code `timeout(1)` uses when the command timed out
pub const TIMEOUT_EXIT_CODE: i32 = 124;

#[derive(Debug, Error)]
pub enum ExecError {
    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("`{command}` exited with {code:?}: stdout={stdout:?}, stderr={stderr:?}")]
    Failed {
        command: String,
        code: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("empty command")]
    EmptyCommand,
}

impl ExecError {
    /// Exit code of a command that ran but failed
    pub fn exit_code(&self) -> Option<i32> {
        match self {
            ExecError::Failed { code, .. } => *code,
            _ => None,
        }
    }

    pub fn stderr(&self) -> &str {
        match self {
            ExecError::Failed { stderr, .. } => stderr,
            _ => "",
        }
    }

    pub fn stdout(&self) -> &str {
        match self {
            ExecError::Failed { stdout, .. } => stdout,
            _ => "",
        }
    }
}

/// Captured output of a successful command
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn new(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }
}

/// Turn a finished process into `CommandOutput` or `ExecError::Failed`
pub(crate) fn finish(command: String, output: std::process::Output) -> Result<CommandOutput, ExecError> {
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        Ok(CommandOutput { stdout, stderr })
    } else {
        debug!(command = %command, code = ?output.status.code(), "Command failed");
        Err(ExecError::Failed {
            command,
            code: output.status.code(),
            stdout,
            stderr,
        })
    }
}

/// Runs a command on a target
///
/// `target` is a host for `SshExecutor` and a network namespace for
/// `LocalExecutor`.
#[async_trait]
pub trait Executor: Send + Sync {
    async fn run(
        &self,
        target: &str,
        args: &[&str],
        input: Option<&[u8]>,
    ) -> Result<CommandOutput, ExecError>;
}

/// An executor bound to one target
#[derive(Clone)]
pub struct Host {
    executor: Arc<dyn Executor>,
    target: String,
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host").field("target", &self.target).finish()
    }
}

impl Host {
    pub fn new(executor: Arc<dyn Executor>, target: impl Into<String>) -> Self {
        Self {
            executor,
            target: target.into(),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub async fn exec(&self, args: &[&str]) -> Result<CommandOutput, ExecError> {
        self.executor.run(&self.target, args, None).await
    }

    pub async fn exec_with_input(
        &self,
        input: &[u8],
        args: &[&str],
    ) -> Result<CommandOutput, ExecError> {
        self.executor.run(&self.target, args, Some(input)).await
    }

    /// Run and return stdout only
    pub async fn stdout(&self, args: &[&str]) -> Result<String, ExecError> {
        Ok(self.exec(args).await?.stdout)
    }
}
