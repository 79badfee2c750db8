//! Scripted executor for unit tests
//!
//! Replies are matched by substring against the space-joined command line.
//! The first matching rule answers; a rule with several replies hands them out
//! in order and then keeps repeating the last one.

#![allow(clippy::unwrap_used)] // Test helper can use unwrap

use super::{CommandOutput, ExecError, Executor};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

#[derive(Debug, Clone)]
pub enum Reply {
    Ok(String),
    Fail { code: i32, stderr: String },
}

impl Reply {
    pub fn ok(stdout: impl Into<String>) -> Self {
        Reply::Ok(stdout.into())
    }

    pub fn fail(code: i32, stderr: impl Into<String>) -> Self {
        Reply::Fail {
            code,
            stderr: stderr.into(),
        }
    }
}

struct Rule {
    pattern: String,
    replies: VecDeque<Reply>,
}

#[derive(Default)]
pub struct ScriptedExecutor {
    rules: Mutex<Vec<Rule>>,
    calls: Mutex<Vec<String>>,
    inputs: Mutex<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Always answer `pattern` with `stdout`
    pub fn on(self, pattern: &str, stdout: impl Into<String>) -> Self {
        self.on_seq(pattern, vec![Reply::ok(stdout)])
    }

    /// Always fail `pattern` with `code`
    pub fn fail(self, pattern: &str, code: i32) -> Self {
        self.on_seq(pattern, vec![Reply::fail(code, "scripted failure")])
    }

    pub fn on_seq(self, pattern: &str, replies: Vec<Reply>) -> Self {
        self.rules.lock().unwrap().push(Rule {
            pattern: pattern.to_string(),
            replies: replies.into(),
        });
        self
    }

    /// Every command run so far, as `target: command`
    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, pattern: &str) -> usize {
        self.calls().iter().filter(|c| c.contains(pattern)).count()
    }

    /// stdin payloads in call order
    pub fn inputs(&self) -> Vec<String> {
        self.inputs.lock().unwrap().clone()
    }
}

#[async_trait]
impl Executor for ScriptedExecutor {
    async fn run(
        &self,
        target: &str,
        args: &[&str],
        input: Option<&[u8]>,
    ) -> Result<CommandOutput, ExecError> {
        let command = args.join(" ");
        self.calls
            .lock()
            .unwrap()
            .push(format!("{}: {}", target, command));
        if let Some(input) = input {
            self.inputs
                .lock()
                .unwrap()
                .push(String::from_utf8_lossy(input).into_owned());
        }

        let reply = {
            let mut rules = self.rules.lock().unwrap();
            rules
                .iter_mut()
                .find(|r| command.contains(&r.pattern))
                .and_then(|rule| {
                    if rule.replies.len() > 1 {
                        rule.replies.pop_front()
                    } else {
                        rule.replies.front().cloned()
                    }
                })
        };

        match reply {
            Some(Reply::Ok(stdout)) => Ok(CommandOutput::new(stdout)),
            Some(Reply::Fail { code, stderr }) => Err(ExecError::Failed {
                command,
                code: Some(code),
                stdout: String::new(),
                stderr,
            }),
            None => Err(ExecError::Failed {
                command,
                code: Some(127),
                stdout: String::new(),
                stderr: "no scripted reply".to_string(),
            }),
        }
    }
}
