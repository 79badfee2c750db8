//! Object selection of the smallset VMAgent and VMAlert

use super::{read_file, ValidationError};
use crate::manifest::{self, Renderer};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::core::{ObjectMeta, Selector, SelectorExt};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::path::Path;

pub const VM_BASE_DIR: &str = "monitoring/base/victoriametrics";

const SMALLSET_VMAGENT: &str = "vmagent-smallset";
const SMALLSET_VMALERT: &str = "vmalert-smallset";

/// Objects the smallset cluster must pick up, sorted
pub const SMALLSET_SERVICE_SCRAPES: &[&str] = &[
    "kube-state-metrics",
    "kubernetes",
    "registry",
    "rook",
    "vmagent-largeset",
    "vmagent-smallset",
    "vmalert-largeset",
    "vmalert-smallset",
    "vmalertmanager",
    "vminsert-largeset",
    "vmselect-largeset",
    "vmsingle-smallset",
    "vmstorage-largeset",
];
pub const SMALLSET_POD_SCRAPES: &[&str] = &["topolvm", "victoriametrics-operator"];
pub const SMALLSET_NODE_SCRAPES: &[&str] = &["kubernetes-cadvisor", "kubernetes-nodes"];
pub const SMALLSET_PROBES: &[&str] = &[];
pub const SMALLSET_RULES: &[&str] = &["kube-state-metrics", "kubernetes", "monitoring", "topolvm"];

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
pub struct Resource<S> {
    pub kind: String,
    pub metadata: ObjectMeta,
    pub spec: S,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VMAgentSpec {
    pub service_scrape_selector: Option<LabelSelector>,
    pub service_scrape_namespace_selector: Option<LabelSelector>,
    pub pod_scrape_selector: Option<LabelSelector>,
    pub pod_scrape_namespace_selector: Option<LabelSelector>,
    pub node_scrape_selector: Option<LabelSelector>,
    pub node_scrape_namespace_selector: Option<LabelSelector>,
    pub probe_selector: Option<LabelSelector>,
    pub probe_namespace_selector: Option<LabelSelector>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct VMAlertSpec {
    pub rule_selector: Option<LabelSelector>,
    pub rule_namespace_selector: Option<LabelSelector>,
}

/// Sorted names of the objects `selector` matches
///
/// An absent selector matches nothing, an empty one everything.
pub fn select(
    kind: &str,
    selector: Option<&LabelSelector>,
    objects: &[Resource<serde_yaml::Value>],
) -> Result<Vec<String>, ValidationError> {
    let Some(selector) = selector else {
        return Ok(Vec::new());
    };
    let selector = Selector::try_from(selector.clone()).map_err(|e| ValidationError::Selector {
        name: kind.to_string(),
        message: e.to_string(),
    })?;

    let mut names: Vec<String> = objects
        .iter()
        .filter(|o| o.kind == kind)
        .filter(|o| selector.matches(&o.metadata.labels.clone().unwrap_or_default()))
        .filter_map(|o| o.metadata.name.clone())
        .collect();
    names.sort();
    Ok(names)
}

/// The `kind` object called `name` among the documents of `text`
fn find<S: DeserializeOwned + Default>(text: &str, kind: &str, name: &str) -> Result<Resource<S>, ValidationError> {
    manifest::documents(text)?
        .into_iter()
        .filter_map(|doc| serde_yaml::from_value::<Resource<S>>(doc).ok())
        .find(|r| r.kind == kind && r.metadata.name.as_deref() == Some(name))
        .ok_or_else(|| ValidationError::NotFound(format!("{} {}", kind, name)))
}

/// Compare what the smallset VMAgent and VMAlert select with the expected objects
pub fn check_selection(
    rendered: &str,
    vmagent: &Resource<VMAgentSpec>,
    vmalert: &Resource<VMAlertSpec>,
) -> Result<Vec<String>, ValidationError> {
    let mut problems = Vec::new();

    let agent = &vmagent.spec;
    let alert = &vmalert.spec;
    if agent.service_scrape_namespace_selector.is_some()
        || agent.pod_scrape_namespace_selector.is_some()
        || agent.node_scrape_namespace_selector.is_some()
        || agent.probe_namespace_selector.is_some()
        || alert.rule_namespace_selector.is_some()
    {
        problems.push("bad namespace selector".to_string());
    }

    let objects: Vec<Resource<serde_yaml::Value>> = manifest::documents(rendered)?
        .into_iter()
        .filter_map(|doc| serde_yaml::from_value(doc).ok())
        .collect();

    let selections = [
        ("VMServiceScrape", agent.service_scrape_selector.as_ref(), SMALLSET_SERVICE_SCRAPES),
        ("VMPodScrape", agent.pod_scrape_selector.as_ref(), SMALLSET_POD_SCRAPES),
        ("VMNodeScrape", agent.node_scrape_selector.as_ref(), SMALLSET_NODE_SCRAPES),
        ("VMProbe", agent.probe_selector.as_ref(), SMALLSET_PROBES),
        ("VMRule", alert.rule_selector.as_ref(), SMALLSET_RULES),
    ];
    for (kind, selector, expected) in selections {
        let actual = select(kind, selector, &objects)?;
        if actual != expected {
            problems.push(format!(
                "smallset {} mismatch: actual={:?}, expected={:?}",
                kind, actual, expected
            ));
        }
    }
    Ok(problems)
}

pub fn vm_custom_resources(manifest_dir: &Path, renderer: &dyn Renderer) -> Result<Vec<String>, ValidationError> {
    let base = manifest_dir.join(VM_BASE_DIR);
    let rendered = renderer.render(&base)?;

    let vmagent = find(
        &read_file(&base.join("vmagent-smallset.yaml"))?,
        "VMAgent",
        SMALLSET_VMAGENT,
    )?;
    let vmalert = find(
        &read_file(&base.join("vmalert-smallset.yaml"))?,
        "VMAlert",
        SMALLSET_VMALERT,
    )?;
    check_selection(&rendered, &vmagent, &vmalert)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const VMAGENT: &str = indoc! {r#"
        apiVersion: operator.victoriametrics.com/v1beta1
        kind: VMAgent
        metadata:
          name: vmagent-smallset
        spec:
          serviceScrapeSelector:
            matchLabels:
              smallset: "true"
          podScrapeSelector:
            matchLabels:
              smallset: "true"
          nodeScrapeSelector:
            matchExpressions:
            - key: smallset
              operator: In
              values: ["true"]
    "#};

    const VMALERT: &str = indoc! {r#"
        apiVersion: operator.victoriametrics.com/v1beta1
        kind: VMAlert
        metadata:
          name: vmalert-smallset
        spec:
          ruleSelector:
            matchLabels:
              smallset: "true"
    "#};

    fn labeled(kind: &str, names: &[&str], smallset: bool) -> String {
        names
            .iter()
            .map(|name| {
                let labels = if smallset { "\n  labels:\n    smallset: \"true\"" } else { "" };
                format!("kind: {}\nmetadata:\n  name: {}{}\n", kind, name, labels)
            })
            .collect::<Vec<_>>()
            .join("---\n")
    }

    fn rendered() -> String {
        [
            labeled("VMServiceScrape", SMALLSET_SERVICE_SCRAPES, true),
            labeled("VMServiceScrape", &["largeset-only"], false),
            labeled("VMPodScrape", SMALLSET_POD_SCRAPES, true),
            labeled("VMNodeScrape", SMALLSET_NODE_SCRAPES, true),
            labeled("VMRule", SMALLSET_RULES, true),
            labeled("VMRule", &["largeset-rule"], false),
        ]
        .join("---\n")
    }

    #[test]
    fn test_smallset_selection_matches() {
        let vmagent = find::<VMAgentSpec>(VMAGENT, "VMAgent", "vmagent-smallset").unwrap();
        let vmalert = find::<VMAlertSpec>(VMALERT, "VMAlert", "vmalert-smallset").unwrap();
        assert!(check_selection(&rendered(), &vmagent, &vmalert).unwrap().is_empty());
    }

    #[test]
    fn test_smallset_selection_reports_extra_and_namespace_selector() {
        let vmagent = find::<VMAgentSpec>(VMAGENT, "VMAgent", "vmagent-smallset").unwrap();
        let vmalert = find::<VMAlertSpec>(
            &format!("{}  ruleNamespaceSelector: {{}}\n", VMALERT),
            "VMAlert",
            "vmalert-smallset",
        )
        .unwrap();

        let extra = format!("{}---\n{}", rendered(), labeled("VMPodScrape", &["extra"], true));
        let problems = check_selection(&extra, &vmagent, &vmalert).unwrap();
        assert_eq!(problems.len(), 2);
        assert_eq!(problems[0], "bad namespace selector");
        assert!(problems[1].starts_with("smallset VMPodScrape mismatch"));
    }

    #[test]
    fn test_absent_selector_selects_nothing() {
        let objects: Vec<Resource<serde_yaml::Value>> =
            manifest::decode_all(&labeled("VMProbe", &["p"], true)).unwrap();
        assert!(select("VMProbe", None, &objects).unwrap().is_empty());
        assert_eq!(
            select("VMProbe", Some(&LabelSelector::default()), &objects).unwrap(),
            vec!["p"]
        );
    }

    #[test]
    fn test_missing_vmagent() {
        assert!(matches!(
            find::<VMAgentSpec>(VMALERT, "VMAgent", "vmagent-smallset"),
            Err(ValidationError::NotFound(_))
        ));
    }
}
