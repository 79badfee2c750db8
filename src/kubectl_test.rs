#![allow(clippy::unwrap_used)] // Tests can use unwrap for brevity

use super::*;
use crate::exec::scripted::{Reply, ScriptedExecutor};
use k8s_openapi::api::apps::v1::Deployment;
use std::sync::Arc;
use std::time::Duration;

fn kubectl(exec: &Arc<ScriptedExecutor>) -> Kubectl {
    Kubectl::new(
        Host::new(exec.clone(), "boot0"),
        Poller::new(Duration::from_millis(1), Duration::from_millis(200)),
    )
}

#[tokio::test]
async fn test_get_decodes_json() {
    let exec = Arc::new(ScriptedExecutor::new().on(
        "kubectl get -n metallb-system deployment/controller -o json",
        r#"{"metadata":{"name":"controller"},"status":{"availableReplicas":1}}"#,
    ));

    let deployment: Deployment = kubectl(&exec)
        .get(&["-n", "metallb-system", "deployment/controller"])
        .await
        .unwrap();

    assert_eq!(deployment.metadata.name.as_deref(), Some("controller"));
    assert_eq!(
        deployment.status.and_then(|s| s.available_replicas),
        Some(1)
    );
}

#[tokio::test]
async fn test_get_reports_decode_error() {
    let exec = Arc::new(ScriptedExecutor::new().on("kubectl get", "not json"));

    let err = kubectl(&exec)
        .get::<Deployment>(&["deployment/x"])
        .await
        .unwrap_err();

    assert!(matches!(err, KubectlError::Decode { .. }));
}

#[tokio::test]
async fn test_load_balancer_ip_requires_single_ingress() {
    let exec = Arc::new(
        ScriptedExecutor::new()
            .on(
                "service squid",
                r#"{"status":{"loadBalancer":{"ingress":[{"ip":"10.72.32.10"}]}}}"#,
            )
            .on(
                "service envoy",
                r#"{"status":{"loadBalancer":{"ingress":[{"ip":"10.0.0.1"},{"ip":"10.0.0.2"}]}}}"#,
            ),
    );
    let k = kubectl(&exec);

    assert_eq!(
        k.load_balancer_ip("internet-egress", "squid").await.unwrap(),
        "10.72.32.10"
    );
    assert!(k.load_balancer_ip("ingress-forest", "envoy").await.is_err());
}

#[tokio::test]
async fn test_single_pod_name() {
    let exec = Arc::new(ScriptedExecutor::new().on(
        "--selector=app.kubernetes.io/name=prometheus",
        r#"{"kind":"List","items":[{"metadata":{"name":"prometheus-0"}}]}"#,
    ));

    let name = kubectl(&exec)
        .single_pod_name("monitoring", "app.kubernetes.io/name=prometheus")
        .await
        .unwrap();

    assert_eq!(name, "prometheus-0");
}

#[tokio::test]
async fn test_create_namespace_waits_for_default_sa() {
    let exec = Arc::new(
        ScriptedExecutor::new()
            .fail("get namespace test-topolvm", 1)
            .on("create namespace test-topolvm", "")
            .on_seq(
                "get sa default -n test-topolvm",
                vec![Reply::fail(1, "not found"), Reply::ok("default")],
            ),
    );

    kubectl(&exec)
        .create_namespace_if_not_exists("test-topolvm")
        .await
        .unwrap();

    assert_eq!(exec.count("create namespace test-topolvm"), 1);
    assert_eq!(exec.count("get sa default"), 2);
}

#[tokio::test]
async fn test_create_namespace_skips_existing() {
    let exec = Arc::new(ScriptedExecutor::new().on("get namespace sandbox", "sandbox"));

    kubectl(&exec)
        .create_namespace_if_not_exists("sandbox")
        .await
        .unwrap();

    assert_eq!(exec.count("create namespace"), 0);
}
