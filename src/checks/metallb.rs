//! MetalLB load balancer services

use crate::assertions;
use crate::suite::{CheckResult, Context, Scenario};
use anyhow::{anyhow, Context as _};
use async_trait::async_trait;
use indoc::indoc;
use k8s_openapi::api::core::v1::Service;
use tracing::info;

const TESTHTTPD: &str = indoc! {r#"
    apiVersion: crd.projectcalico.org/v1
    kind: NetworkPolicy
    metadata:
      name: ingress-httpdtest
      namespace: default
    spec:
      order: 2000.0
      selector: app.kubernetes.io/name == 'testhttpd'
      types:
        - Ingress
      ingress:
        - action: Allow
          protocol: TCP
          destination:
            ports:
              - 8000
    ---
    apiVersion: apps/v1
    kind: Deployment
    metadata:
      name: testhttpd
      namespace: default
      labels:
        app.kubernetes.io/name: testhttpd
    spec:
      replicas: 2
      selector:
        matchLabels:
          app.kubernetes.io/name: testhttpd
      template:
        metadata:
          labels:
            app.kubernetes.io/name: testhttpd
        spec:
          containers:
          - name: testhttpd
            image: quay.io/cybozu/testhttpd:0
    ---
    kind: Service
    apiVersion: v1
    metadata:
      name: testhttpd
      namespace: default
    spec:
      selector:
        app.kubernetes.io/name: testhttpd
      ports:
      - protocol: TCP
        port: 80
        targetPort: 8000
      type: LoadBalancer
      externalTrafficPolicy: Local
"#};

/// First ingress IP assigned to a LoadBalancer service
pub(crate) fn first_ingress_ip(svc: &Service) -> Option<&str> {
    svc.status
        .as_ref()?
        .load_balancer
        .as_ref()?
        .ingress
        .as_ref()?
        .first()?
        .ip
        .as_deref()
}

pub struct PrepareMetalLB;

#[async_trait]
impl Scenario for PrepareMetalLB {
    fn name(&self) -> &str {
        "preparing metallb"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        ctx.kubectl
            .create(TESTHTTPD)
            .await
            .context("failed to create testhttpd")?;
        Ok(())
    }
}

pub struct MetalLB;

#[async_trait]
impl Scenario for MetalLB {
    fn name(&self) -> &str {
        "metallb"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let kubectl = &ctx.kubectl;

        assertions::wait_daemonset_available(kubectl, "metallb-system", "speaker").await?;
        assertions::wait_deployment_available(kubectl, "metallb-system", "controller", 1).await?;
        assertions::wait_deployment_ready(kubectl, "default", "testhttpd", 2).await?;

        let ip = ctx
            .poller
            .eventually(move || async move {
                let svc: Service = kubectl.get(&["service/testhttpd"]).await?;
                first_ingress_ip(&svc)
                    .map(str::to_string)
                    .ok_or_else(|| anyhow!("LoadBalancer status is not updated"))
            })
            .await?;
        info!(ip = %ip, "testhttpd got a load balancer IP");

        let ip = ip.as_str();
        let boot0 = ctx.boot0();
        ctx.poller
            .eventually(move || async move { boot0.exec(&["curl", ip, "-m", "5"]).await })
            .await
            .context("service is unreachable from boot-0")?;

        let external = &ctx.external;
        ctx.poller
            .eventually(move || async move { external.exec(&["curl", ip, "-m", "5"]).await })
            .await
            .context("service is unreachable from the external network")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_ingress_ip() {
        let svc: Service = serde_json::from_str(
            r#"{"status":{"loadBalancer":{"ingress":[{"ip":"10.72.32.29"},{"ip":"10.72.32.30"}]}}}"#,
        )
        .unwrap();
        assert_eq!(first_ingress_ip(&svc), Some("10.72.32.29"));

        let pending: Service =
            serde_json::from_str(r#"{"status":{"loadBalancer":{}}}"#).unwrap();
        assert_eq!(first_ingress_ip(&pending), None);
    }
}
