//! SSH executor for the boot servers

use super::{finish, CommandOutput, ExecError, Executor};
use async_trait::async_trait;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Runs commands on a remote host through the `ssh` client
///
/// Arguments are joined with spaces into one remote command line, so the
/// remote shell interprets pipes, redirections and `&&`.
#[derive(Debug, Clone)]
pub struct SshExecutor {
    key: PathBuf,
    user: String,
}

impl SshExecutor {
    pub fn new(key: impl Into<PathBuf>, user: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            user: user.into(),
        }
    }

    fn command(&self, host: &str, remote: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-i")
            .arg(&self.key)
            .args([
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "-o",
                "LogLevel=ERROR",
                "-o",
                "ConnectTimeout=60",
            ])
            .arg(format!("{}@{}", self.user, host))
            .arg(remote);
        cmd
    }
}

#[async_trait]
impl Executor for SshExecutor {
    async fn run(
        &self,
        target: &str,
        args: &[&str],
        input: Option<&[u8]>,
    ) -> Result<CommandOutput, ExecError> {
        if args.is_empty() {
            return Err(ExecError::EmptyCommand);
        }
        let remote = args.join(" ");

        let mut cmd = self.command(target, &remote);
        cmd.stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.stdin(if input.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });

        let spawn_err = |source| ExecError::Spawn {
            program: "ssh".to_string(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_err)?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(input).await.map_err(spawn_err)?;
            // Closing stdin lets `kubectl apply -f -` see EOF.
            drop(stdin);
        }

        let output = child.wait_with_output().await.map_err(spawn_err)?;
        finish(format!("{}: {}", target, remote), output)
    }
}
