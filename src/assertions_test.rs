#![allow(clippy::unwrap_used)] // Tests can use unwrap for brevity

use super::*;
use crate::exec::scripted::{Reply, ScriptedExecutor};
use crate::exec::Host;
use crate::poll::Poller;
use std::sync::Arc;
use std::time::Duration;

fn deployment(json: &str) -> Deployment {
    serde_json::from_str(json).unwrap()
}

#[test]
fn test_deployment_available() {
    let d = deployment(r#"{"metadata":{"name":"controller"},"status":{"availableReplicas":1}}"#);

    assert!(deployment_available(&d, 1).is_ok());
    let err = deployment_available(&d, 2).unwrap_err();
    assert!(err.to_string().contains("controller"));
}

#[test]
fn test_deployment_without_status_is_zero() {
    let d = deployment(r#"{"metadata":{"name":"squid"}}"#);

    assert!(deployment_ready(&d, 0).is_ok());
    assert!(deployment_ready(&d, 2).is_err());
}

#[test]
fn test_deployment_fully_available_uses_spec_replicas() {
    let d = deployment(
        r#"{"metadata":{"name":"rgw"},"spec":{"replicas":3,"selector":{},"template":{}},"status":{"availableReplicas":2}}"#,
    );
    assert!(deployment_fully_available(&d).is_err());

    let d = deployment(
        r#"{"metadata":{"name":"rgw"},"spec":{"replicas":3,"selector":{},"template":{}},"status":{"availableReplicas":3}}"#,
    );
    assert!(deployment_fully_available(&d).is_ok());
}

#[test]
fn test_deployment_fully_available_requires_spec_replicas() {
    let d = deployment(
        r#"{"metadata":{"name":"rook-ceph-mgr-a","namespace":"ceph-ssd"},"status":{"availableReplicas":1}}"#,
    );
    let err = deployment_fully_available(&d).unwrap_err();
    assert_eq!(err.to_string(), "deployment's spec.replicas == nil: ceph-ssd/rook-ceph-mgr-a");
}

#[test]
fn test_daemonset_fully_available() {
    let ds: DaemonSet = serde_json::from_str(
        r#"{"metadata":{"name":"speaker"},"status":{"currentNumberScheduled":0,"desiredNumberScheduled":0,"numberMisscheduled":0,"numberReady":0}}"#,
    )
    .unwrap();
    assert!(daemonset_fully_available(&ds)
        .unwrap_err()
        .to_string()
        .contains("not updated"));

    let ds: DaemonSet = serde_json::from_str(
        r#"{"metadata":{"name":"speaker"},"status":{"currentNumberScheduled":6,"desiredNumberScheduled":6,"numberMisscheduled":0,"numberReady":5,"numberAvailable":5}}"#,
    )
    .unwrap();
    assert!(daemonset_fully_available(&ds).is_err());

    let ds: DaemonSet = serde_json::from_str(
        r#"{"metadata":{"name":"speaker"},"status":{"currentNumberScheduled":6,"desiredNumberScheduled":6,"numberMisscheduled":0,"numberReady":6,"numberAvailable":6}}"#,
    )
    .unwrap();
    assert!(daemonset_fully_available(&ds).is_ok());
}

#[tokio::test]
async fn test_wait_deployment_available_retries() {
    let exec = Arc::new(ScriptedExecutor::new().on_seq(
        "deployment testhttpd",
        vec![
            Reply::ok(r#"{"status":{"availableReplicas":1}}"#),
            Reply::fail(1, "connection refused"),
            Reply::ok(r#"{"status":{"availableReplicas":2}}"#),
        ],
    ));
    let kubectl = Kubectl::new(
        Host::new(exec.clone(), "boot0"),
        Poller::new(Duration::from_millis(1), Duration::from_secs(5)),
    );

    wait_deployment_available(&kubectl, "default", "testhttpd", 2)
        .await
        .unwrap();

    assert_eq!(exec.count("deployment testhttpd"), 3);
}
