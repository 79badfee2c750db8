//! Sync waves and target revisions of the Argo CD Applications in each overlay

use super::ValidationError;
use crate::argocd::Application;
use crate::manifest::{self, ManifestError};
use glob::glob;
use std::path::{Path, PathBuf};

pub const OVERLAYS_DIR: &str = "argocd-config/overlays";

/// Sync wave of every Application
pub const SYNC_WAVES: &[(&str, &str)] = &[
    ("namespaces", "1"),
    ("argocd", "2"),
    ("coil", "3"),
    ("local-pv-provisioner", "3"),
    ("secrets", "3"),
    ("cert-manager", "4"),
    ("external-dns", "4"),
    ("metallb", "4"),
    ("ingress", "5"),
    ("topolvm", "5"),
    ("unbound", "5"),
    ("elastic", "6"),
    ("moco", "6"),
    ("rook", "6"),
    ("monitoring", "7"),
    ("registry-elastic", "7"),
    ("registry-ghcr", "7"),
    ("registry-quay", "7"),
    ("sandbox", "7"),
    ("teleport", "7"),
    ("pvc-autoresizer", "8"),
    ("argocd-ingress", "8"),
    ("bmc-reverse-proxy", "8"),
    ("metrics-server", "8"),
    ("team-management", "8"),
    ("customer-egress", "8"),
    ("neco-admission", "8"),
    ("network-policy", "9"),
    ("tenant-apps", "11"),
    ("ept-apps", "12"),
    ("maneki-apps", "12"),
];

/// Revision every platform Application tracks, per overlay
pub const TARGET_REVISIONS: &[(&str, &str)] = &[
    ("gcp", "release"),
    ("gcp-rook", "release"),
    ("neco-dev", "release"),
    ("osaka0", "release"),
    ("stage0", "stage"),
    ("tokyo0", "release"),
];

/// Revision of each tenant Application, per overlay
pub const TENANT_TARGET_REVISIONS: &[(&str, &[(&str, &str)])] = &[
    ("ept-apps", &[("stage0", "main")]),
    (
        "maneki-apps",
        &[("osaka0", "release"), ("stage0", "stage"), ("tokyo0", "release")],
    ),
    ("tenant-apps", &[("stage0", "stage")]),
];

fn lookup<'a, V>(table: &'a [(&str, V)], key: &str) -> Option<&'a V> {
    table.iter().find(|(k, _)| *k == key).map(|(_, v)| v)
}

/// Revision `app` must track in `overlay`
pub fn expected_target_revision(app: &Application, overlay: &str) -> Option<&'static str> {
    if app.is_tenant() {
        lookup(TENANT_TARGET_REVISIONS, app.name())
            .and_then(|revisions| lookup(revisions, overlay))
            .copied()
    } else {
        lookup(TARGET_REVISIONS, overlay).copied()
    }
}

/// Name and path of every overlay directory
pub fn overlay_dirs(manifest_dir: &Path) -> Result<Vec<(String, PathBuf)>, ValidationError> {
    let pattern = manifest_dir.join(OVERLAYS_DIR).join("*");
    let mut overlays = Vec::new();
    for entry in glob(&pattern.to_string_lossy()).map_err(ManifestError::from)? {
        let path = entry.map_err(ManifestError::from)?;
        if !path.is_dir() {
            continue;
        }
        if let Some(name) = path.file_name().and_then(|n| n.to_str()) {
            overlays.push((name.to_string(), path.clone()));
        }
    }
    overlays.sort();
    Ok(overlays)
}

/// Check sync waves and target revisions of a rendered `argocd-config` overlay
pub fn application_resources(overlay: &str, rendered: &str) -> Result<Vec<String>, ValidationError> {
    let mut problems = Vec::new();
    for app in manifest::decode_all::<Application>(rendered)? {
        let name = app.name();

        match lookup(SYNC_WAVES, name) {
            None => problems.push(format!("expected sync-wave should be defined. application: {}", name)),
            Some(&wave) if app.sync_wave() != Some(wave) => problems.push(format!(
                "invalid sync-wave. application: {}, sync-wave: {} (should be {})",
                name,
                app.sync_wave().unwrap_or_default(),
                wave
            )),
            Some(_) => {}
        }

        let actual = app.spec.source.target_revision.as_str();
        match expected_target_revision(&app, overlay) {
            None => problems.push(format!(
                "expected targetRevision should be defined. application: {}, overlay: {}",
                name, overlay
            )),
            Some(revision) if actual != revision => problems.push(format!(
                "invalid targetRevision. application: {}, targetRevision: {} (should be {})",
                name, actual, revision
            )),
            Some(_) => {}
        }
    }
    Ok(problems)
}
