//! Per-subsystem scenarios
//!
//! Each module holds the preparation and test scenarios of one platform
//! component. Preparations create test workloads early so they come up while
//! other scenarios run.

pub mod customer_egress;
pub mod hpa;
pub mod logging;
pub mod metallb;
pub mod moco;
pub mod monitoring;
pub mod network_policy;
pub mod registry;
pub mod sandbox;
pub mod sealed_secret;
pub mod setup;
pub mod storage;
pub mod team_management;
pub mod teleport;
pub mod topolvm;

use crate::kubectl::Kubectl;
use crate::manifest;
use anyhow::{Context as _, Result};
use kube::core::DynamicObject;

/// Apply every object separately, as JSON
pub(crate) async fn apply_objects(kubectl: &Kubectl, objects: &[DynamicObject]) -> Result<()> {
    for obj in objects {
        let json = serde_json::to_string(obj)?;
        kubectl.apply(&json).await.with_context(|| {
            format!(
                "failed to apply {} {}",
                manifest::kind_of(obj),
                obj.metadata.name.as_deref().unwrap_or_default()
            )
        })?;
    }
    Ok(())
}

/// Apply `rendered` the way Argo CD would: CRDs first, then the rest labeled for `app`
pub(crate) async fn apply_as_application(
    kubectl: &Kubectl,
    rendered: &str,
    app: &str,
    skip_kinds: &[&str],
) -> Result<()> {
    let (crds, mut rest) = manifest::partition_crds(manifest::objects(rendered)?, skip_kinds);
    apply_objects(kubectl, &crds).await?;

    for obj in &mut rest {
        manifest::set_instance_label(obj, app);
    }
    apply_objects(kubectl, &rest).await
}
