//! Customer egress through squid and coil NAT

use crate::assertions::wait_deployment_ready;
use crate::kubectl::Kubectl;
use crate::suite::{CheckResult, Context, Scenario};
use anyhow::{Context as _, Result};
use async_trait::async_trait;
use indoc::formatdoc;

const NAMESPACE: &str = "sandbox";
const EGRESS_NAMESPACE: &str = "customer-egress";
const SQUID_PROXY: &str = "http://squid.customer-egress.svc:3128";

const DEPLOYMENTS: [&str; 2] = ["ubuntu-without-nat-annotation", "ubuntu-with-nat-annotation"];

/// Pause ubuntu deployment labeled `custom-egress-test=<label>`
pub(crate) fn ubuntu_deployment(name: &str, label: &str, annotations: &str) -> String {
    formatdoc! {r#"
        apiVersion: apps/v1
        kind: Deployment
        metadata:
          name: {name}
          namespace: sandbox
        spec:
          replicas: 1
          selector:
            matchLabels:
              custom-egress-test: {label}
          template:
            metadata:
              annotations: {annotations}
              labels:
                custom-egress-test: {label}
            spec:
              securityContext:
                runAsUser: 1000
                runAsGroup: 1000
              containers:
              - args:
                - pause
                image: quay.io/cybozu/ubuntu-debug:20.04
                name: ubuntu
        "#,
        name = name,
        label = label,
        annotations = annotations,
    }
}

/// Curl cybozu.com from the only pod labeled `custom-egress-test=<label>`
async fn curl_from(kubectl: &Kubectl, label: &str, extra: &[&str]) -> Result<()> {
    let selector = format!("custom-egress-test={}", label);
    let pod = kubectl.single_pod_name(NAMESPACE, &selector).await?;
    let command: Vec<&str> = ["curl", "-sf"]
        .into_iter()
        .chain(extra.iter().copied())
        .chain(["cybozu.com"])
        .collect();
    kubectl.exec_in(NAMESPACE, &pod, &command).await?;
    Ok(())
}

pub struct PrepareCustomerEgress;

#[async_trait]
impl Scenario for PrepareCustomerEgress {
    fn name(&self) -> &str {
        "preparing customer-egress"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        kubectl
            .apply(&ubuntu_deployment(DEPLOYMENTS[0], "non-nat", "{}"))
            .await
            .context("failed to create ubuntu without NAT")?;
        kubectl
            .apply(&ubuntu_deployment(
                DEPLOYMENTS[1],
                "nat",
                "{egress.coil.cybozu.com/customer-egress: nat}",
            ))
            .await
            .context("failed to create ubuntu with NAT")?;
        Ok(())
    }
}

pub struct CustomerEgress;

#[async_trait]
impl Scenario for CustomerEgress {
    fn name(&self) -> &str {
        "customer-egress"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let kubectl = &ctx.kubectl;

        wait_deployment_ready(kubectl, EGRESS_NAMESPACE, "squid", 2).await?;
        ctx.poller
            .eventually(move || async move { curl_from(kubectl, "non-nat", &["--proxy", SQUID_PROXY]).await })
            .await
            .context("squid does not proxy to the Internet")?;

        wait_deployment_ready(kubectl, EGRESS_NAMESPACE, "nat", 2).await?;
        ctx.poller
            .eventually(move || async move { curl_from(kubectl, "nat", &[]).await })
            .await
            .context("coil NAT does not reach the Internet")?;

        for name in DEPLOYMENTS {
            kubectl.run(&["-n", NAMESPACE, "delete", "deployments", name]).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scripted::ScriptedExecutor;
    use crate::exec::Host;
    use crate::poll::Poller;
    use std::sync::Arc;

    #[test]
    fn test_nat_deployment_carries_annotation() {
        let doc = &crate::manifest::documents(&ubuntu_deployment(
            "ubuntu-with-nat-annotation",
            "nat",
            "{egress.coil.cybozu.com/customer-egress: nat}",
        ))
        .unwrap()[0];
        let template = &doc["spec"]["template"]["metadata"];
        assert_eq!(template["annotations"]["egress.coil.cybozu.com/customer-egress"], "nat");
        assert_eq!(template["labels"]["custom-egress-test"], "nat");

        let doc = &crate::manifest::documents(&ubuntu_deployment("plain", "non-nat", "{}")).unwrap()[0];
        assert!(doc["spec"]["template"]["metadata"]["annotations"]
            .as_mapping()
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_curl_through_squid() {
        let exec = Arc::new(
            ScriptedExecutor::new()
                .on(
                    "kubectl get -n sandbox pods --selector=custom-egress-test=non-nat -o json",
                    r#"{"items":[{"metadata":{"name":"ubuntu-abc"}}]}"#,
                )
                .on(
                    "kubectl -n sandbox exec ubuntu-abc -- curl -sf --proxy http://squid.customer-egress.svc:3128 cybozu.com",
                    "<html>",
                ),
        );
        let kubectl = Kubectl::new(Host::new(exec, "boot0"), Poller::default());

        curl_from(&kubectl, "non-nat", &["--proxy", SQUID_PROXY]).await.unwrap();
    }
}
