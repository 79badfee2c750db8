//! Static validation over a fixture neco-apps tree
//!
//! Run with: cargo test --test validation_test

#![allow(clippy::unwrap_used)] // Tests can use unwrap for brevity

use glob::glob;
use neco_apps_test::manifest::{ManifestError, Renderer};
use neco_apps_test::validation::{self, Finding};
use std::path::{Path, PathBuf};

/// Serves `rendered.yaml` kept next to each kustomization instead of running kustomize
struct PreRendered;

impl Renderer for PreRendered {
    fn render(&self, dir: &Path) -> Result<String, ManifestError> {
        let path = dir.join("rendered.yaml");
        std::fs::read_to_string(&path).map_err(|source| ManifestError::Read { path, source })
    }
}

fn fixture() -> PathBuf {
    Path::new(env!("CARGO_MANIFEST_DIR")).join("tests/fixtures/neco-apps")
}

/// Copy the fixture tree so a test can break it
fn fixture_copy() -> tempfile::TempDir {
    let dst = tempfile::tempdir().unwrap();
    let src = fixture();
    for entry in glob(&src.join("**/*").to_string_lossy()).unwrap() {
        let path = entry.unwrap();
        let target = dst.path().join(path.strip_prefix(&src).unwrap());
        if path.is_dir() {
            std::fs::create_dir_all(&target).unwrap();
        } else {
            std::fs::create_dir_all(target.parent().unwrap()).unwrap();
            std::fs::copy(&path, &target).unwrap();
        }
    }
    dst
}

fn edit(root: &Path, file: &str, from: &str, to: &str) {
    let path = root.join(file);
    let text = std::fs::read_to_string(&path).unwrap();
    assert!(text.contains(from), "{} does not contain {:?}", file, from);
    std::fs::write(&path, text.replacen(from, to, 1)).unwrap();
}

fn findings_of<'a>(findings: &'a [Finding], check: &str) -> Vec<&'a Finding> {
    findings.iter().filter(|f| f.check == check).collect()
}

#[test]
fn test_fixture_tree_is_valid() {
    let report = validation::run_all(&fixture(), &PreRendered);

    assert!(report.is_ok(), "{}", report);
    for check in [
        "namespace-labels",
        "crd-status",
        "certificate-usages",
        "app-project-namespaces",
        "application-resources",
        "alert-rules",
        "vm-custom-resources",
    ] {
        assert!(report.checks.contains(&check), "{} did not run", check);
    }
}

#[test]
fn test_findings_are_collected_across_checks() {
    let tree = fixture_copy();
    let root = tree.path();

    edit(
        root,
        "cert-manager/rendered.yaml",
        "  scope: Namespaced\n",
        "  scope: Namespaced\nstatus:\n  acceptedNames:\n    kind: \"\"\n",
    );
    edit(root, "namespaces/rendered.yaml", "  labels:\n    team: a\n", "");
    edit(
        root,
        "argocd-config/overlays/stage0/rendered.yaml",
        "argocd.argoproj.io/sync-wave: \"7\"",
        "argocd.argoproj.io/sync-wave: \"6\"",
    );
    edit(
        root,
        "monitoring/base/prometheus/alert_rules/node.yaml",
        "        labels:\n          severity: warning\n",
        "",
    );

    let report = validation::run_all(root, &PreRendered);
    let findings = &report.findings;

    let crd = findings_of(findings, "crd-status");
    assert_eq!(crd.len(), 1);
    assert_eq!(crd[0].subject, "cert-manager");

    let ns = findings_of(findings, "namespace-labels");
    assert_eq!(ns.len(), 1);
    assert!(ns[0].message.contains("app-a ns doesn't have team label"));

    let apps = findings_of(findings, "application-resources");
    assert_eq!(apps.len(), 1);
    assert_eq!(apps[0].subject, "stage0");
    assert!(apps[0].message.contains("application: monitoring"));

    let alerts = findings_of(findings, "alert-rules");
    assert_eq!(alerts.len(), 1);
    assert!(alerts[0].message.contains("NodeDiskFull: label severity is missing"));

    // the broken namespace does not feed team-management's own rendering
    assert!(findings_of(findings, "app-project-namespaces").is_empty());
}

#[test]
fn test_render_failure_is_a_finding() {
    let tree = fixture_copy();
    std::fs::remove_file(tree.path().join("monitoring/base/victoriametrics/rendered.yaml")).unwrap();

    let report = validation::run_all(tree.path(), &PreRendered);
    assert!(!report.is_ok());
    assert_eq!(findings_of(&report.findings, "vm-custom-resources").len(), 1);
    // other validators still ran
    assert!(report.checks.contains(&"alert-rules"));
}

#[test]
fn test_smallset_selection_drift() {
    let tree = fixture_copy();
    edit(
        tree.path(),
        "monitoring/base/victoriametrics/rendered.yaml",
        "kind: VMPodScrape\nmetadata:\n  name: moco\n  namespace: monitoring\n",
        "kind: VMPodScrape\nmetadata:\n  name: moco\n  namespace: monitoring\n  labels:\n    smallset: \"true\"\n",
    );

    let report = validation::run_all(tree.path(), &PreRendered);
    let vm = findings_of(&report.findings, "vm-custom-resources");
    assert_eq!(vm.len(), 1);
    assert!(vm[0].message.starts_with("smallset VMPodScrape mismatch"));
}
