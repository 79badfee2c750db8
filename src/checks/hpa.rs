//! HorizontalPodAutoscaler with resource, custom and external metrics

use crate::kubectl::{ItemList, Kubectl};
use crate::prometheus::push_metric;
use crate::suite::{CheckResult, Context, Scenario};
use anyhow::{anyhow, ensure, Context as _, Result};
use async_trait::async_trait;
use indoc::indoc;
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::Pod;

const NAMESPACE: &str = "sandbox";
const PUSH_JOB: &str = "some_job";

const MANIFESTS: &str = indoc! {r#"
    apiVersion: apps/v1
    kind: Deployment
    metadata:
      name: hpa-resource
      namespace: sandbox
    spec:
      selector:
        matchLabels:
          run: hpa-resource
      template:
        metadata:
          labels:
            run: hpa-resource
        spec:
          securityContext:
            runAsNonRoot: true
            runAsUser: 10000
            runAsGroup: 10000
          containers:
          - name: ubuntu
            image: quay.io/cybozu/ubuntu:20.04
            command: ["/bin/sh", "-c", "while true; do true; done"]
            resources:
              requests:
                cpu: 100m
              limits:
                cpu: 200m
    ---
    apiVersion: autoscaling/v2
    kind: HorizontalPodAutoscaler
    metadata:
      name: hpa-resource
      namespace: sandbox
    spec:
      scaleTargetRef:
        apiVersion: apps/v1
        kind: Deployment
        name: hpa-resource
      minReplicas: 1
      maxReplicas: 2
      metrics:
      - type: Resource
        resource:
          name: cpu
          target:
            type: Utilization
            averageUtilization: 50
    ---
    apiVersion: apps/v1
    kind: Deployment
    metadata:
      name: hpa-custom
      namespace: sandbox
    spec:
      selector:
        matchLabels:
          run: hpa-custom
      template:
        metadata:
          labels:
            run: hpa-custom
        spec:
          containers:
          - name: testhttpd
            image: quay.io/cybozu/testhttpd:0
            resources:
              requests:
                cpu: 100m
    ---
    apiVersion: autoscaling/v2
    kind: HorizontalPodAutoscaler
    metadata:
      name: hpa-custom
      namespace: sandbox
    spec:
      scaleTargetRef:
        apiVersion: apps/v1
        kind: Deployment
        name: hpa-custom
      minReplicas: 1
      maxReplicas: 2
      metrics:
      - type: Pods
        pods:
          metric:
            name: test_hpa_requests_per_second
          target:
            type: AverageValue
            averageValue: 10
    ---
    apiVersion: apps/v1
    kind: Deployment
    metadata:
      name: hpa-external
      namespace: sandbox
    spec:
      selector:
        matchLabels:
          run: hpa-external
      template:
        metadata:
          labels:
            run: hpa-external
        spec:
          containers:
          - name: testhttpd
            image: quay.io/cybozu/testhttpd:0
            resources:
              requests:
                cpu: 100m
    ---
    apiVersion: autoscaling/v2
    kind: HorizontalPodAutoscaler
    metadata:
      name: hpa-external
      namespace: sandbox
      annotations:
        metric-config.external.processed-events-per-second.prometheus/query: |
          scalar(test_hpa_external)
    spec:
      scaleTargetRef:
        apiVersion: apps/v1
        kind: Deployment
        name: hpa-external
      minReplicas: 1
      maxReplicas: 4
      metrics:
      - type: External
        external:
          metric:
            name: processed-events-per-second
            selector:
              matchLabels:
                type: prometheus
          target:
            type: AverageValue
            averageValue: 10
"#};

/// Desired replicas the autoscaler has written into the deployment spec
pub(crate) fn desired_replicas(d: &Deployment) -> Option<i32> {
    d.spec.as_ref()?.replicas
}

pub(crate) fn custom_metric(pod: &str) -> String {
    format!(
        "test_hpa_requests_per_second{{namespace=\"{}\",pod=\"{}\"}} 20\n",
        NAMESPACE, pod
    )
}

async fn check_scaled(kubectl: &Kubectl, name: &str, expected: i32) -> Result<()> {
    let d: Deployment = kubectl.get(&["-n", NAMESPACE, "deployments", name]).await?;
    ensure!(
        desired_replicas(&d) == Some(expected),
        "replicas of {} is not {}",
        name,
        expected
    );
    Ok(())
}

pub struct PrepareHpa;

#[async_trait]
impl Scenario for PrepareHpa {
    fn name(&self) -> &str {
        "preparing hpa"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        ctx.kubectl
            .apply(MANIFESTS)
            .await
            .context("failed to prepare resources for HPA tests")?;
        Ok(())
    }
}

pub struct Hpa;

impl Hpa {
    async fn resource(ctx: &Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        ctx.poller
            .eventually(move || async move { check_scaled(kubectl, "hpa-resource", 2).await })
            .await?;
        kubectl
            .run(&["-n", NAMESPACE, "delete", "deployments", "hpa-resource"])
            .await?;
        Ok(())
    }

    async fn custom(ctx: &Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        let pod = ctx
            .poller
            .eventually(move || async move {
                let pods: ItemList<Pod> = kubectl
                    .get(&["-n", NAMESPACE, "pods", "-l", "run=hpa-custom"])
                    .await?;
                match pods.items.as_slice() {
                    [pod] => pod.metadata.name.clone().ok_or_else(|| anyhow!("pod has no name")),
                    _ => Err(anyhow!("no hpa-custom pods")),
                }
            })
            .await?;

        let metric = custom_metric(&pod);
        Self::push_until_scaled(ctx, &metric, "hpa-custom", 2).await
    }

    async fn external(ctx: &Context) -> CheckResult {
        Self::push_until_scaled(ctx, "test_hpa_external 23\n", "hpa-external", 3).await
    }

    async fn push_until_scaled(ctx: &Context, metric: &str, name: &str, expected: i32) -> CheckResult {
        let kubectl = &ctx.kubectl;
        let boot0 = ctx.boot0();
        let pushgateway = ctx.config.bastion_pushgateway_fqdn();
        let pushgateway = pushgateway.as_str();
        ctx.poller
            .eventually(move || async move {
                push_metric(boot0, pushgateway, PUSH_JOB, metric)
                    .await
                    .context("failed to push a metric to pushgateway")?;
                check_scaled(kubectl, name, expected).await
            })
            .await?;
        kubectl
            .run(&["-n", NAMESPACE, "delete", "deployments", name])
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Scenario for Hpa {
    fn name(&self) -> &str {
        "hpa"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        Self::resource(ctx).await?;
        Self::custom(ctx).await?;
        Self::external(ctx).await
    }
}
