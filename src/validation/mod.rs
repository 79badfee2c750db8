//! Static checks over the manifests in the repository
//!
//! Nothing here talks to a cluster. Each validator reads rendered
//! kustomizations or raw files and returns its findings; `run_all` collects
//! them into one report instead of stopping at the first problem.

pub mod alerts;
pub mod applications;
pub mod namespaces;
pub mod resources;
pub mod victoriametrics;

use crate::manifest::{self, ManifestError, Renderer};
use std::fmt;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{info, warn};

/// Top-level directories that hold no deployable manifests
pub const EXCLUDED_DIRS: &[&str] = &["bin", "docs", "test"];

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("invalid label selector in {name}: {message}")]
    Selector { name: String, message: String },

    #[error("{0} not found")]
    NotFound(String),
}

/// One problem found by a validator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub check: &'static str,
    /// Directory, overlay or object the problem was found in
    pub subject: String,
    pub message: String,
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}: {}", self.check, self.subject, self.message)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ValidationReport {
    pub checks: Vec<&'static str>,
    pub findings: Vec<Finding>,
}

impl ValidationReport {
    pub fn is_ok(&self) -> bool {
        self.findings.is_empty()
    }

    fn record(&mut self, check: &'static str, subject: impl fmt::Display, messages: Vec<String>) {
        if !self.checks.contains(&check) {
            self.checks.push(check);
        }
        self.findings.extend(messages.into_iter().map(|message| Finding {
            check,
            subject: subject.to_string(),
            message,
        }));
    }

    /// Record a validator's result; an error counts as a finding too
    fn collect(
        &mut self,
        check: &'static str,
        subject: impl fmt::Display,
        result: Result<Vec<String>, ValidationError>,
    ) {
        let messages = result.unwrap_or_else(|e| {
            warn!(check, error = %e, "Validator could not run");
            vec![e.to_string()]
        });
        self.record(check, subject, messages);
    }
}

impl fmt::Display for ValidationReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for finding in &self.findings {
            writeln!(f, "{}", finding)?;
        }
        write!(
            f,
            "{} checks, {} findings",
            self.checks.len(),
            self.findings.len()
        )
    }
}

/// Checks applied to every document of every kustomization
fn check_document(doc: &serde_yaml::Value) -> Vec<(&'static str, String)> {
    let mut found = Vec::new();
    if let Some(m) = namespaces::namespace_labels(doc) {
        found.push(("namespace-labels", m));
    }
    if let Some(m) = resources::crd_status(doc) {
        found.push(("crd-status", m));
    }
    if let Some(m) = resources::certificate_usages(doc) {
        found.push(("certificate-usages", m));
    }
    found
}

fn per_document_checks(report: &mut ValidationReport, manifest_dir: &Path, renderer: &dyn Renderer) {
    for check in ["namespace-labels", "crd-status", "certificate-usages"] {
        report.record(check, "", Vec::new());
    }

    let dirs = match manifest::find_kustomization_dirs(manifest_dir, EXCLUDED_DIRS) {
        Ok(dirs) => dirs,
        Err(e) => {
            report.collect("kustomize", manifest_dir.display(), Err(e.into()));
            return;
        }
    };

    for dir in dirs {
        let subject = dir
            .strip_prefix(manifest_dir)
            .unwrap_or(dir.as_path())
            .display()
            .to_string();
        let docs = match renderer.render(&dir).and_then(|text| manifest::documents(&text)) {
            Ok(docs) => docs,
            Err(e) => {
                report.collect("kustomize", &subject, Err(e.into()));
                continue;
            }
        };
        for (check, message) in docs.iter().flat_map(check_document) {
            report.record(check, &subject, vec![message]);
        }
    }
}

/// Run every validator against the repository at `manifest_dir`
pub fn run_all(manifest_dir: &Path, renderer: &dyn Renderer) -> ValidationReport {
    let mut report = ValidationReport::default();

    per_document_checks(&mut report, manifest_dir, renderer);

    report.collect(
        "app-project-namespaces",
        namespaces::TEAM_MANAGEMENT_DIR,
        renderer
            .render(&manifest_dir.join(namespaces::TEAM_MANAGEMENT_DIR))
            .map_err(ValidationError::from)
            .and_then(|text| namespaces::app_project_namespaces(&text)),
    );

    match applications::overlay_dirs(manifest_dir) {
        Ok(overlays) => {
            for (overlay, dir) in overlays {
                report.collect(
                    "application-resources",
                    &overlay,
                    renderer
                        .render(&dir)
                        .map_err(ValidationError::from)
                        .and_then(|text| applications::application_resources(&overlay, &text)),
                );
            }
        }
        Err(e) => report.collect("application-resources", "overlays", Err(e)),
    }

    report.collect(
        "alert-rules",
        alerts::ALERT_RULES_DIR,
        alerts::alert_rules(manifest_dir),
    );

    report.collect(
        "vm-custom-resources",
        victoriametrics::VM_BASE_DIR,
        victoriametrics::vm_custom_resources(manifest_dir, renderer),
    );

    info!(
        checks = report.checks.len(),
        findings = report.findings.len(),
        "Validation finished"
    );
    report
}

/// Read a file, keeping the path in the error
pub(crate) fn read_file(path: &Path) -> Result<String, ValidationError> {
    std::fs::read_to_string(path).map_err(|source| ValidationError::Read {
        path: path.to_path_buf(),
        source,
    })
}
