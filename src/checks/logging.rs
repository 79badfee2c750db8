//! Loki log collection, checked with logcli

use crate::kubectl::ItemList;
use crate::suite::{CheckResult, Context, Scenario};
use anyhow::{anyhow, bail, Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::core::v1::Node;
use serde::Deserialize;
use tracing::info;

/// One line of `logcli query -ojsonl`
#[derive(Debug, Deserialize)]
struct LogEntry {
    #[allow(dead_code)]
    labels: serde_json::Value,
    #[allow(dead_code)]
    line: serde_json::Value,
}

/// Number of entries in `logcli -ojsonl` output; each must carry labels and a line
pub(crate) fn count_log_entries(stdout: &str) -> Result<usize> {
    let mut count = 0;
    for line in stdout.lines().filter(|l| !l.trim().is_empty()) {
        serde_json::from_str::<LogEntry>(line)
            .with_context(|| format!("invalid log entry: {}", line))?;
        count += 1;
    }
    if count == 0 {
        bail!("expect at least one log to exist");
    }
    Ok(count)
}

/// LogQL selector quoted for the remote shell
pub(crate) fn journal_query(instance: &str) -> String {
    format!(r#"'{{job="systemd-journal", instance="{}"}}'"#, instance)
}

async fn node_name(ctx: &Context, role: &str) -> Result<String> {
    let selector = format!("node-role.kubernetes.io/{}=true", role);
    let nodes: ItemList<Node> = ctx.kubectl.get(&["node", "-l", &selector]).await?;
    nodes
        .items
        .first()
        .and_then(|n| n.metadata.name.clone())
        .ok_or_else(|| anyhow!("no {} node", role))
}

async fn check_log(ctx: &Context, query: &str) -> Result<()> {
    let kubectl = &ctx.kubectl;
    let count = ctx
        .poller
        .eventually(move || async move {
            let out = kubectl
                .run(&[
                    "exec",
                    "-n",
                    "logging",
                    "statefulset/logging-loki",
                    "--",
                    "logcli",
                    "query",
                    query,
                    "-ojsonl",
                ])
                .await?;
            count_log_entries(&out.stdout)
        })
        .await?;
    info!(query = %query, entries = count, "Found logs");
    Ok(())
}

pub struct Logging;

#[async_trait]
impl Scenario for Logging {
    fn name(&self) -> &str {
        "logging"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        check_log(ctx, r#"'{namespace="logging", pod="logging-loki-0"}'"#).await?;

        for role in ["ss", "cs"] {
            let node = node_name(ctx, role).await?;
            check_log(ctx, &journal_query(&node))
                .await
                .with_context(|| format!("no journal logs from {} node {}", role, node))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_count_log_entries() {
        let out = concat!(
            r#"{"labels":{"job":"systemd-journal"},"line":"started","timestamp":"2021-01-01T00:00:00Z"}"#,
            "\n",
            r#"{"labels":{},"line":"second"}"#,
            "\n"
        );
        assert_eq!(count_log_entries(out).unwrap(), 2);
    }

    #[test]
    fn test_count_log_entries_rejects_missing_fields_and_empty_output() {
        assert!(count_log_entries(r#"{"labels":{}}"#).is_err());
        assert!(count_log_entries("").is_err());
    }

    #[test]
    fn test_journal_query() {
        assert_eq!(
            journal_query("10.69.0.4"),
            r#"'{job="systemd-journal", instance="10.69.0.4"}'"#
        );
    }
}
