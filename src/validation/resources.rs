//! Per-object rules for CRDs and certificates

pub const CA_USAGES: &[&str] = &["digital signature", "key encipherment", "cert sign"];
pub const LEAF_USAGES: &[&str] = &["digital signature", "key encipherment", "server auth", "client auth"];

fn name(doc: &serde_yaml::Value) -> &str {
    doc["metadata"]["name"].as_str().unwrap_or_default()
}

/// CRD manifests must not carry `.status`, Argo CD would report them OutOfSync forever
pub fn crd_status(doc: &serde_yaml::Value) -> Option<String> {
    if doc["kind"].as_str() != Some("CustomResourceDefinition") {
        return None;
    }
    doc.get("status").map(|_| {
        format!(
            ".status(Status) exists in {}, remove it to prevent occurring OutOfSync by Argo CD",
            name(doc)
        )
    })
}

/// Certificates list exactly the usages of their kind, in order
pub fn certificate_usages(doc: &serde_yaml::Value) -> Option<String> {
    if doc["kind"].as_str() != Some("Certificate") {
        return None;
    }
    let spec = &doc["spec"];
    let expected = if spec["isCA"].as_bool().unwrap_or(false) {
        CA_USAGES
    } else {
        LEAF_USAGES
    };
    let usages: Vec<&str> = spec["usages"]
        .as_sequence()
        .into_iter()
        .flatten()
        .filter_map(serde_yaml::Value::as_str)
        .collect();

    (usages != expected).then(|| {
        format!(
            ".spec.usages has incorrect list in {}: {:?} (should be {:?})",
            name(doc),
            usages,
            expected
        )
    })
}
