//! cert-manager Certificate types and readiness check

use crate::kubectl::Kubectl;
use anyhow::{bail, Result};
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(
    group = "cert-manager.io",
    version = "v1",
    kind = "Certificate",
    namespaced,
    status = "CertificateStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CertificateSpec {
    #[serde(default)]
    pub secret_name: String,

    #[serde(default, rename = "isCA")]
    pub is_ca: bool,

    #[serde(default)]
    pub usages: Vec<String>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct CertificateStatus {
    #[serde(default)]
    pub conditions: Vec<CertificateCondition>,
}

#[derive(Serialize, Deserialize, Clone, Debug, JsonSchema)]
pub struct CertificateCondition {
    #[serde(rename = "type")]
    pub type_: String,
    pub status: String,
    #[serde(default)]
    pub reason: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

impl Certificate {
    pub fn is_ready(&self) -> bool {
        self.status
            .as_ref()
            .map(|s| {
                s.conditions
                    .iter()
                    .any(|c| c.type_ == "Ready" && c.status == "True")
            })
            .unwrap_or(false)
    }
}

/// Fails unless the Certificate's Ready condition is True
pub async fn check_certificate(kubectl: &Kubectl, name: &str, namespace: &str) -> Result<()> {
    let cert: Certificate = kubectl
        .get(&["-n", namespace, "certificate", name])
        .await?;

    if !cert.is_ready() {
        let reason = cert
            .status
            .as_ref()
            .and_then(|s| s.conditions.iter().find(|c| c.type_ == "Ready"))
            .and_then(|c| c.message.clone())
            .unwrap_or_else(|| "no Ready condition".to_string());
        bail!("certificate {}/{} is not ready: {}", namespace, name, reason);
    }
    Ok(())
}
