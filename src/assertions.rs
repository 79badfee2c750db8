//! Readiness assertions for workloads
//!
//! The plain functions inspect an already fetched object; the `wait_*`
//! variants fetch through kubectl and retry until the assertion holds.

use crate::kubectl::Kubectl;
use anyhow::{bail, Result};
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment, StatefulSet};
use tracing::info;

fn deployment_name(d: &Deployment) -> &str {
    d.metadata.name.as_deref().unwrap_or("<unnamed>")
}

/// `status.availableReplicas == expected`
pub fn deployment_available(d: &Deployment, expected: i32) -> Result<()> {
    let actual = d.status.as_ref().and_then(|s| s.available_replicas).unwrap_or(0);
    if actual != expected {
        bail!(
            "deployment {}: availableReplicas is not {}: {}",
            deployment_name(d),
            expected,
            actual
        );
    }
    Ok(())
}

/// `status.readyReplicas == expected`
pub fn deployment_ready(d: &Deployment, expected: i32) -> Result<()> {
    let actual = d.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
    if actual != expected {
        bail!(
            "deployment {}: readyReplicas is not {}: {}",
            deployment_name(d),
            expected,
            actual
        );
    }
    Ok(())
}

/// `status.availableReplicas == spec.replicas`; an unset `spec.replicas` fails
pub fn deployment_fully_available(d: &Deployment) -> Result<()> {
    let Some(desired) = d.spec.as_ref().and_then(|s| s.replicas) else {
        bail!(
            "deployment's spec.replicas == nil: {}/{}",
            d.metadata.namespace.as_deref().unwrap_or_default(),
            deployment_name(d)
        );
    };
    deployment_available(d, desired)
}

pub fn statefulset_ready(s: &StatefulSet, expected: i32) -> Result<()> {
    let actual = s.status.as_ref().and_then(|s| s.ready_replicas).unwrap_or(0);
    if actual != expected {
        bail!(
            "statefulset {}: readyReplicas is not {}: {}",
            s.metadata.name.as_deref().unwrap_or("<unnamed>"),
            expected,
            actual
        );
    }
    Ok(())
}

/// Scheduled on at least one node and available on all of them
pub fn daemonset_fully_available(ds: &DaemonSet) -> Result<()> {
    let name = ds.metadata.name.as_deref().unwrap_or("<unnamed>");
    let Some(status) = ds.status.as_ref() else {
        bail!("daemonset {} has no status", name);
    };

    if status.desired_number_scheduled <= 0 {
        bail!("daemonset {}: desiredNumberScheduled is not updated", name);
    }
    let available = status.number_available.unwrap_or(0);
    if status.desired_number_scheduled != available {
        bail!(
            "daemonset {}: not all nodes are running it: {}/{}",
            name,
            available,
            status.desired_number_scheduled
        );
    }
    Ok(())
}

/// Wait until `availableReplicas == expected`
pub async fn wait_deployment_available(
    kubectl: &Kubectl,
    namespace: &str,
    name: &str,
    expected: i32,
) -> Result<()> {
    kubectl
        .poller()
        .eventually(move || async move {
            let d: Deployment = kubectl.get(&["-n", namespace, "deployment", name]).await?;
            deployment_available(&d, expected)
        })
        .await?;

    info!(namespace = %namespace, deployment = %name, available = expected, "Deployment available");
    Ok(())
}

/// Wait until `readyReplicas == expected`
pub async fn wait_deployment_ready(
    kubectl: &Kubectl,
    namespace: &str,
    name: &str,
    expected: i32,
) -> Result<()> {
    kubectl
        .poller()
        .eventually(move || async move {
            let d: Deployment = kubectl.get(&["-n", namespace, "deployment", name]).await?;
            deployment_ready(&d, expected)
        })
        .await?;

    info!(namespace = %namespace, deployment = %name, ready = expected, "Deployment ready");
    Ok(())
}

pub async fn wait_statefulset_ready(
    kubectl: &Kubectl,
    namespace: &str,
    name: &str,
    expected: i32,
) -> Result<()> {
    kubectl
        .poller()
        .eventually(move || async move {
            let s: StatefulSet = kubectl.get(&["-n", namespace, "statefulset", name]).await?;
            statefulset_ready(&s, expected)
        })
        .await?;

    info!(namespace = %namespace, statefulset = %name, ready = expected, "StatefulSet ready");
    Ok(())
}

pub async fn wait_daemonset_available(kubectl: &Kubectl, namespace: &str, name: &str) -> Result<()> {
    kubectl
        .poller()
        .eventually(move || async move {
            let ds: DaemonSet = kubectl.get(&["-n", namespace, "daemonset", name]).await?;
            daemonset_fully_available(&ds)
        })
        .await?;

    info!(namespace = %namespace, daemonset = %name, "DaemonSet available");
    Ok(())
}

#[cfg(test)]
#[path = "assertions_test.rs"]
mod tests;
