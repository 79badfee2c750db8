//! Local executor for the placemat network namespaces

use super::{finish, CommandOutput, ExecError, Executor};
use async_trait::async_trait;
use std::process::Stdio;
use tokio::io::AsyncWriteExt;
use tokio::process::Command;

/// Network namespace of the simulated external network
pub const EXTERNAL_NETNS: &str = "external";
/// Network namespace of the operator network
pub const OPERATION_NETNS: &str = "operation";

/// Runs commands on the test host, optionally inside a network namespace
///
/// placemat v1 exposes its namespaces only as process PIDs (`nsenter -n -t`),
/// later versions register named namespaces (`ip netns exec`). An empty
/// target runs the command directly.
#[derive(Debug, Clone)]
pub struct LocalExecutor {
    placemat_major_version: u32,
    external_pid: Option<String>,
    operation_pid: Option<String>,
}

impl LocalExecutor {
    pub fn new(
        placemat_major_version: u32,
        external_pid: Option<String>,
        operation_pid: Option<String>,
    ) -> Self {
        Self {
            placemat_major_version,
            external_pid,
            operation_pid,
        }
    }

    /// Full argv for running `args` inside `netns`
    pub fn wrap(&self, netns: &str, args: &[&str]) -> Result<Vec<String>, ExecError> {
        let mut argv: Vec<String> = Vec::with_capacity(args.len() + 5);

        if !netns.is_empty() {
            if self.placemat_major_version == 1 {
                let pid = match netns {
                    EXTERNAL_NETNS => self.external_pid.as_deref(),
                    OPERATION_NETNS => self.operation_pid.as_deref(),
                    _ => None,
                };
                let pid = pid.ok_or_else(|| ExecError::Spawn {
                    program: "nsenter".to_string(),
                    source: std::io::Error::new(
                        std::io::ErrorKind::NotFound,
                        format!("no PID configured for network namespace {}", netns),
                    ),
                })?;
                argv.extend(["sudo", "nsenter", "-n", "-t", pid].map(String::from));
            } else {
                argv.extend(["sudo", "ip", "netns", "exec", netns].map(String::from));
            }
        }

        argv.extend(args.iter().map(|a| a.to_string()));
        Ok(argv)
    }
}

#[async_trait]
impl Executor for LocalExecutor {
    async fn run(
        &self,
        target: &str,
        args: &[&str],
        input: Option<&[u8]>,
    ) -> Result<CommandOutput, ExecError> {
        let argv = self.wrap(target, args)?;
        let Some((program, rest)) = argv.split_first() else {
            return Err(ExecError::EmptyCommand);
        };

        let mut cmd = Command::new(program);
        cmd.args(rest)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if input.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            });

        let spawn_err = |source| ExecError::Spawn {
            program: program.clone(),
            source,
        };
        let mut child = cmd.spawn().map_err(spawn_err)?;

        if let (Some(input), Some(mut stdin)) = (input, child.stdin.take()) {
            stdin.write_all(input).await.map_err(spawn_err)?;
            drop(stdin);
        }

        let output = child.wait_with_output().await.map_err(spawn_err)?;
        finish(argv.join(" "), output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wrap_placemat_v2_uses_named_netns() {
        let exec = LocalExecutor::new(2, None, None);
        let argv = exec.wrap(EXTERNAL_NETNS, &["curl", "10.0.0.1", "-m", "5"]).unwrap();

        assert_eq!(
            argv,
            vec!["sudo", "ip", "netns", "exec", "external", "curl", "10.0.0.1", "-m", "5"]
        );
    }

    #[test]
    fn test_wrap_placemat_v1_uses_pid() {
        let exec = LocalExecutor::new(1, Some("4242".to_string()), None);
        let argv = exec.wrap(EXTERNAL_NETNS, &["curl", "x"]).unwrap();

        assert_eq!(argv, vec!["sudo", "nsenter", "-n", "-t", "4242", "curl", "x"]);
        assert!(exec.wrap(OPERATION_NETNS, &["ssh"]).is_err());
    }

    #[test]
    fn test_wrap_without_netns() {
        let exec = LocalExecutor::new(2, None, None);
        assert_eq!(exec.wrap("", &["true"]).unwrap(), vec!["true"]);
    }

    #[tokio::test]
    async fn test_run_reports_exit_code() {
        let exec = LocalExecutor::new(2, None, None);
        let err = exec.run("", &["sh", "-c", "exit 124"], None).await.unwrap_err();
        assert_eq!(err.exit_code(), Some(super::super::TIMEOUT_EXIT_CODE));

        let out = exec.run("", &["cat"], Some(b"hello")).await.unwrap();
        assert_eq!(out.stdout, "hello");
    }
}
