//! Namespace ownership: team labels and AppProject destinations

use super::ValidationError;
use crate::argocd::AppProject;
use crate::manifest;
use crate::rbac::{SANDBOX_NAMESPACE, SUPERVISOR_TEAM};
use std::collections::{BTreeMap, BTreeSet};

pub const TEAM_MANAGEMENT_DIR: &str = "team-management/base";

/// Projects that may deploy anywhere
const PRIVILEGED_PROJECTS: &[&str] = &["default", "tenant-app-of-apps", "tenant-apps"];

fn team_label(doc: &serde_yaml::Value) -> Option<&str> {
    doc["metadata"]["labels"]["team"].as_str()
}

/// Every Namespace needs a `team` label, except `sandbox` which must not have one
pub fn namespace_labels(doc: &serde_yaml::Value) -> Option<String> {
    if doc["kind"].as_str() != Some("Namespace") {
        return None;
    }
    let name = doc["metadata"]["name"].as_str().unwrap_or_default();

    match team_label(doc) {
        Some(team) if name == SANDBOX_NAMESPACE => {
            Some(format!("sandbox ns has team label: value={}", team))
        }
        None | Some("") if name != SANDBOX_NAMESPACE => {
            Some(format!("{} ns doesn't have team label", name))
        }
        _ => None,
    }
}

/// Namespaces each team's project should reach
///
/// A team gets its own namespaces plus `sandbox`; the supervisor team gets
/// every tenant namespace.
pub fn expected_destinations(namespaces_by_team: BTreeMap<String, Vec<String>>) -> BTreeMap<String, Vec<String>> {
    let mut expected: BTreeMap<String, Vec<String>> = namespaces_by_team
        .into_iter()
        .map(|(team, mut namespaces)| {
            namespaces.push(SANDBOX_NAMESPACE.to_string());
            namespaces.sort();
            (team, namespaces)
        })
        .collect();

    let all: BTreeSet<String> = expected.values().flatten().cloned().collect();
    expected.insert(SUPERVISOR_TEAM.to_string(), all.into_iter().collect());
    expected
}

/// Compare AppProject destinations with namespace ownership in the rendered team-management manifests
pub fn app_project_namespaces(rendered: &str) -> Result<Vec<String>, ValidationError> {
    let mut by_team: BTreeMap<String, Vec<String>> = BTreeMap::new();
    let mut actual: BTreeMap<String, Vec<String>> = BTreeMap::new();

    for doc in manifest::documents(rendered)? {
        let name = doc["metadata"]["name"].as_str().unwrap_or_default();
        match doc["kind"].as_str() {
            Some("Namespace") if name != SANDBOX_NAMESPACE => {
                by_team
                    .entry(team_label(&doc).unwrap_or_default().to_string())
                    .or_default()
                    .push(name.to_string());
            }
            Some("AppProject") if !PRIVILEGED_PROJECTS.contains(&name) => {
                let project: AppProject =
                    serde_yaml::from_value(doc.clone()).map_err(manifest::ManifestError::from)?;
                let mut namespaces: Vec<String> = project
                    .spec
                    .destinations
                    .into_iter()
                    .map(|d| d.namespace)
                    .collect();
                namespaces.sort();
                actual.insert(name.to_string(), namespaces);
            }
            _ => {}
        }
    }

    let expected = expected_destinations(by_team);
    let teams: BTreeSet<&String> = expected.keys().chain(actual.keys()).collect();
    let mut problems = Vec::new();
    for team in teams {
        let want = expected.get(team);
        let got = actual.get(team);
        if want != got {
            problems.push(format!(
                "AppProject {} destinations are {:?}, expected {:?}",
                team,
                got.map(Vec::as_slice).unwrap_or_default(),
                want.map(Vec::as_slice).unwrap_or_default()
            ));
        }
    }
    Ok(problems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    fn doc(yaml: &str) -> serde_yaml::Value {
        serde_yaml::from_str(yaml).unwrap()
    }

    #[test]
    fn test_namespace_labels() {
        assert_eq!(
            namespace_labels(&doc("kind: Namespace\nmetadata:\n  name: app-a\n  labels:\n    team: a\n")),
            None
        );
        assert_eq!(
            namespace_labels(&doc("kind: Namespace\nmetadata:\n  name: app-b\n")).unwrap(),
            "app-b ns doesn't have team label"
        );
        assert_eq!(
            namespace_labels(&doc("kind: Namespace\nmetadata:\n  name: app-c\n  labels:\n    team: \"\"\n")).unwrap(),
            "app-c ns doesn't have team label"
        );
        assert_eq!(namespace_labels(&doc("kind: Namespace\nmetadata:\n  name: sandbox\n")), None);
        assert!(namespace_labels(&doc(
            "kind: Namespace\nmetadata:\n  name: sandbox\n  labels:\n    team: neco\n"
        ))
        .is_some());
        assert_eq!(namespace_labels(&doc("kind: ConfigMap\nmetadata:\n  name: x\n")), None);
    }

    const TEAM_MANAGEMENT: &str = indoc! {r#"
        apiVersion: v1
        kind: Namespace
        metadata:
          name: app-a
          labels:
            team: a
        ---
        apiVersion: v1
        kind: Namespace
        metadata:
          name: app-b
          labels:
            team: b
        ---
        apiVersion: v1
        kind: Namespace
        metadata:
          name: sandbox
        ---
        apiVersion: argoproj.io/v1alpha1
        kind: AppProject
        metadata:
          name: default
        spec:
          destinations:
          - namespace: "*"
        ---
        apiVersion: argoproj.io/v1alpha1
        kind: AppProject
        metadata:
          name: a
        spec:
          destinations:
          - namespace: sandbox
          - namespace: app-a
        ---
        apiVersion: argoproj.io/v1alpha1
        kind: AppProject
        metadata:
          name: b
        spec:
          destinations:
          - namespace: app-b
          - namespace: sandbox
        ---
        apiVersion: argoproj.io/v1alpha1
        kind: AppProject
        metadata:
          name: maneki
        spec:
          destinations:
          - namespace: app-a
          - namespace: app-b
          - namespace: sandbox
    "#};

    #[test]
    fn test_app_project_namespaces_consistent() {
        assert!(app_project_namespaces(TEAM_MANAGEMENT).unwrap().is_empty());
    }

    #[test]
    fn test_app_project_namespaces_missing_destination() {
        let broken = TEAM_MANAGEMENT.replacen("  - namespace: app-b\n  - namespace: sandbox\n", "  - namespace: app-b\n", 1);
        let problems = app_project_namespaces(&broken).unwrap();
        assert_eq!(problems.len(), 1);
        assert!(problems[0].starts_with("AppProject b "));
    }

    #[test]
    fn test_expected_destinations_supervisor_sees_all() {
        let mut by_team = BTreeMap::new();
        by_team.insert("a".to_string(), vec!["app-a".to_string()]);
        by_team.insert("maneki".to_string(), vec!["maneki".to_string()]);

        let expected = expected_destinations(by_team);
        assert_eq!(expected["a"], vec!["app-a", "sandbox"]);
        assert_eq!(expected["maneki"], vec!["app-a", "maneki", "sandbox"]);
    }
}
