//! Manifest handling
//!
//! Rendering kustomizations, splitting multi-document YAML and preparing
//! objects for `kubectl apply`.

use glob::glob;
use kube::core::DynamicObject;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use thiserror::Error;

/// Label Argo CD puts on every resource it manages
pub const INSTANCE_LABEL: &str = "app.kubernetes.io/instance";

const KUSTOMIZATION_FILES: [&str; 3] = ["kustomization.yaml", "kustomization.yml", "Kustomization"];

#[derive(Debug, Error)]
pub enum ManifestError {
    #[error("failed to run {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("kustomize build {dir} failed: {stderr}")]
    Build { dir: PathBuf, stderr: String },

    #[error("invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("invalid JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("invalid glob pattern: {0}")]
    Pattern(#[from] glob::PatternError),

    #[error("failed to walk {0}")]
    Walk(#[from] glob::GlobError),

    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Produces the final manifests of a kustomization directory
pub trait Renderer {
    fn render(&self, dir: &Path) -> Result<String, ManifestError>;
}

/// Renders with the `kustomize` binary
#[derive(Debug, Clone)]
pub struct KustomizeRenderer {
    binary: PathBuf,
}

impl KustomizeRenderer {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }
}

impl Renderer for KustomizeRenderer {
    fn render(&self, dir: &Path) -> Result<String, ManifestError> {
        let output = Command::new(&self.binary)
            .arg("build")
            .arg(dir)
            .output()
            .map_err(|source| ManifestError::Spawn {
                program: self.binary.display().to_string(),
                source,
            })?;

        if !output.status.success() {
            return Err(ManifestError::Build {
                dir: dir.to_path_buf(),
                stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }
}

/// Every non-empty document of a multi-document YAML stream
pub fn documents(text: &str) -> Result<Vec<serde_yaml::Value>, ManifestError> {
    let mut docs = Vec::new();
    for de in serde_yaml::Deserializer::from_str(text) {
        let value = serde_yaml::Value::deserialize(de)?;
        if !value.is_null() {
            docs.push(value);
        }
    }
    Ok(docs)
}

/// Decode every document as `T`
pub fn decode_all<T: DeserializeOwned>(text: &str) -> Result<Vec<T>, ManifestError> {
    documents(text)?
        .into_iter()
        .map(|doc| serde_yaml::from_value(doc).map_err(ManifestError::from))
        .collect()
}

pub fn objects(text: &str) -> Result<Vec<DynamicObject>, ManifestError> {
    decode_all(text)
}

pub fn kind_of(obj: &DynamicObject) -> &str {
    obj.types.as_ref().map(|t| t.kind.as_str()).unwrap_or_default()
}

/// Split into (CRDs, everything else), dropping `skip_kinds`
pub fn partition_crds(
    objects: Vec<DynamicObject>,
    skip_kinds: &[&str],
) -> (Vec<DynamicObject>, Vec<DynamicObject>) {
    objects
        .into_iter()
        .filter(|o| !skip_kinds.contains(&kind_of(o)))
        .partition(|o| kind_of(o) == "CustomResourceDefinition")
}

/// Pre-set the label Argo CD would add so the first sync has nothing to patch
pub fn set_instance_label(obj: &mut DynamicObject, app: &str) {
    obj.metadata
        .labels
        .get_or_insert_with(Default::default)
        .insert(INSTANCE_LABEL.to_string(), app.to_string());
}

/// Directories under `root` holding a kustomization file
///
/// Paths under any of `excludes` (relative to `root`) are ignored, as is any
/// kustomization nested inside another one.
pub fn find_kustomization_dirs(root: &Path, excludes: &[&str]) -> Result<Vec<PathBuf>, ManifestError> {
    let excluded: Vec<PathBuf> = excludes.iter().map(|e| root.join(e)).collect();
    let mut found = BTreeSet::new();

    for name in KUSTOMIZATION_FILES {
        let pattern = root.join("**").join(name);
        for entry in glob(&pattern.to_string_lossy())? {
            let path = entry?;
            let Some(dir) = path.parent() else {
                continue;
            };
            if excluded.iter().any(|ex| dir.starts_with(ex)) {
                continue;
            }
            found.insert(dir.to_path_buf());
        }
    }

    let dirs: Vec<PathBuf> = found
        .iter()
        .filter(|dir| {
            !dir.ancestors()
                .skip(1)
                .any(|parent| found.contains(parent))
        })
        .cloned()
        .collect();
    Ok(dirs)
}

/// Contents of every regular file below `dir`, sorted by path
pub fn read_tree(dir: &Path) -> Result<Vec<(PathBuf, String)>, ManifestError> {
    let pattern = dir.join("**").join("*");
    let mut files = Vec::new();
    for entry in glob(&pattern.to_string_lossy())? {
        let path = entry?;
        if !path.is_file() {
            continue;
        }
        let text = std::fs::read_to_string(&path).map_err(|source| ManifestError::Read {
            path: path.clone(),
            source,
        })?;
        files.push((path, text));
    }
    files.sort_by(|a, b| a.0.cmp(&b.0));
    Ok(files)
}

#[derive(Debug, Deserialize)]
struct VMRuleDoc {
    #[serde(default)]
    spec: VMRuleDocSpec,
}

#[derive(Debug, Default, Deserialize)]
struct VMRuleDocSpec {
    #[serde(default)]
    groups: Vec<serde_yaml::Value>,
}

/// Merge the rule groups of every VMRule into one Prometheus rule file
///
/// Input without any group yields `groups: null`.
pub fn convert_vmrules(input: &str) -> Result<String, ManifestError> {
    let groups: Vec<serde_yaml::Value> = decode_all::<VMRuleDoc>(input)?
        .into_iter()
        .flat_map(|doc| doc.spec.groups)
        .collect();

    let groups = if groups.is_empty() {
        serde_yaml::Value::Null
    } else {
        serde_yaml::Value::Sequence(groups)
    };
    let mut out = serde_yaml::Mapping::new();
    out.insert("groups".into(), groups);
    Ok(serde_yaml::to_string(&out)?)
}

#[cfg(test)]
#[path = "manifest_test.rs"]
mod tests;
