//! Grafana in the sandbox namespace

use super::monitoring::GrafanaStats;
use crate::assertions::wait_statefulset_ready;
use crate::certmanager::check_certificate;
use crate::suite::{CheckResult, Context, Scenario};
use anyhow::{ensure, Context as _, Result};
use async_trait::async_trait;
use indoc::formatdoc;

const NAMESPACE: &str = "sandbox";

fn grafana_proxy(fqdn: &str) -> String {
    formatdoc! {r#"
        apiVersion: projectcontour.io/v1
        kind: HTTPProxy
        metadata:
          name: grafana-test
          namespace: sandbox
          annotations:
            kubernetes.io/tls-acme: "true"
            kubernetes.io/ingress.class: bastion
        spec:
          virtualhost:
            fqdn: {fqdn}
            tls:
              secretName: grafana-tls
          routes:
            - conditions:
                - prefix: /
              timeoutPolicy:
                response: 2m
                idle: 5m
              services:
                - name: grafana
                  port: 3000
        "#,
        fqdn = fqdn,
    }
}

/// Tenants provision their own dashboards, so a fresh sandbox Grafana has none
pub(crate) fn check_sandbox_stats(stats: &GrafanaStats) -> Result<()> {
    ensure!(stats.datasources > 0, "no data sources");
    ensure!(stats.dashboards == 0, "{} dashboards exist", stats.dashboards);
    Ok(())
}

pub struct PrepareSandboxGrafana;

#[async_trait]
impl Scenario for PrepareSandboxGrafana {
    fn name(&self) -> &str {
        "preparing sandbox grafana"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        ctx.kubectl
            .apply(&grafana_proxy(&ctx.config.sandbox_grafana_fqdn()))
            .await
            .context("failed to create HTTPProxy for sandbox Grafana")?;
        Ok(())
    }
}

pub struct SandboxGrafana;

#[async_trait]
impl Scenario for SandboxGrafana {
    fn name(&self) -> &str {
        "sandbox-grafana"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        wait_statefulset_ready(kubectl, NAMESPACE, "grafana", 1).await?;
        ctx.poller
            .eventually(move || async move { check_certificate(kubectl, "grafana-test", NAMESPACE).await })
            .await?;

        let user = format!("admin:{}", ctx.config.grafana_admin_password);
        let url = format!("{}/api/admin/stats", ctx.config.sandbox_grafana_fqdn());
        let (user, url) = (user.as_str(), url.as_str());
        let boot0 = ctx.boot0();
        ctx.poller
            .eventually(move || async move {
                let body = boot0.stdout(&["curl", "-kL", "-u", user, url]).await?;
                let stats: GrafanaStats = serde_json::from_str(&body)?;
                check_sandbox_stats(&stats)
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sandbox_grafana_has_no_dashboards() {
        let stats: GrafanaStats = serde_json::from_str(r#"{"dashboards":0,"datasources":1}"#).unwrap();
        check_sandbox_stats(&stats).unwrap();

        let stats: GrafanaStats = serde_json::from_str(r#"{"dashboards":3,"datasources":1}"#).unwrap();
        assert_eq!(
            check_sandbox_stats(&stats).unwrap_err().to_string(),
            "3 dashboards exist"
        );
    }

    #[test]
    fn test_proxy_points_at_sandbox_grafana() {
        let doc = &crate::manifest::documents(&grafana_proxy("s.example")).unwrap()[0];
        assert_eq!(doc["metadata"]["namespace"], "sandbox");
        assert_eq!(doc["spec"]["routes"][0]["services"][0]["name"], "grafana");
    }
}
