//! RBAC matrix for unprivileged teams
//!
//! The expected verbs per team, namespace and resource, and the parser for
//! `kubectl auth can-i --list --no-headers` that produces the actual ones.

use k8s_openapi::api::core::v1::Namespace;
use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use thiserror::Error;

/// Team owning namespaces without a `team` label
pub const ADMIN_TEAM: &str = "neco";

/// Namespace open to every team
pub const SANDBOX_NAMESPACE: &str = "sandbox";

/// Tenant team that administers every tenant namespace
pub const SUPERVISOR_TEAM: &str = "maneki";

/// Namespaced resources unprivileged teams are explicitly given
pub const REQUIRED_RESOURCES: &[&str] = &[
    "elasticsearches.elasticsearch.k8s.elastic.co",
    "kibanas.kibana.k8s.elastic.co",
    "httpproxies.projectcontour.io",
    "networkpolicies.crd.projectcalico.org",
    "grafanadatasources.integreatly.org",
    "grafanadashboards.integreatly.org",
    "objectbucketclaims.objectbucket.io",
];

/// Namespaced resources unprivileged teams may only read
pub const PROHIBITED_RESOURCES: &[&str] = &["limitranges", "resourcequotas"];

/// Every verb in canonical order
pub const ALL_VERBS: &[&str] = &[
    "get",
    "list",
    "watch",
    "create",
    "update",
    "patch",
    "delete",
    "deletecollection",
];

pub const VIEW_VERBS: &[&str] = &["get", "list", "watch"];

/// Cluster resources every authenticated user may create
const SELF_REVIEW_RESOURCES: &[&str] = &[
    "selfsubjectaccessreviews.authorization.k8s.io",
    "selfsubjectrulesreviews.authorization.k8s.io",
];

const ROW_PATTERN: &str = r"^([^ ]*)\s+\[([^ ]*)\]\s+\[([^ ]*)\]\s+\[([*a-z ]*)\]$";

#[derive(Debug, Error)]
pub enum RbacError {
    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("unexpected auth can-i row: {0:?}")]
    Row(String),
}

/// Verbs per resource, each list in `ALL_VERBS` order
pub type VerbMap = BTreeMap<String, Vec<String>>;

/// Normalize a verb list: `*` means everything, duplicates and unknown verbs are dropped
pub fn normalize_verbs<'a>(verbs: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let found: BTreeSet<&str> = verbs.into_iter().collect();
    if found.contains("*") {
        return ALL_VERBS.iter().map(|v| v.to_string()).collect();
    }
    ALL_VERBS
        .iter()
        .filter(|v| found.contains(*v))
        .map(|v| v.to_string())
        .collect()
}

/// Parse `kubectl auth can-i --list --no-headers`
///
/// Rows for non-resource URLs (empty resource column) are skipped.
pub fn parse_can_i_list(output: &str) -> Result<VerbMap, RbacError> {
    let row = Regex::new(ROW_PATTERN)?;
    let mut verbs = VerbMap::new();

    for line in output.lines().map(str::trim_end).filter(|l| !l.is_empty()) {
        let caps = row
            .captures(line)
            .ok_or_else(|| RbacError::Row(line.to_string()))?;

        let resource = &caps[1];
        if resource.is_empty() {
            continue;
        }
        verbs.insert(resource.to_string(), normalize_verbs(caps[4].split(' ')));
    }

    Ok(verbs)
}

/// Owner team of each namespace
pub fn namespace_owners(namespaces: &[Namespace]) -> BTreeMap<String, String> {
    namespaces
        .iter()
        .filter_map(|ns| {
            let name = ns.metadata.name.clone()?;
            let team = ns
                .metadata
                .labels
                .as_ref()
                .and_then(|l| l.get("team"))
                .filter(|t| !t.is_empty())
                .cloned()
                .unwrap_or_else(|| ADMIN_TEAM.to_string());
            Some((name, team))
        })
        .collect()
}

/// Teams other than the admin team, sorted
pub fn tenant_teams(owners: &BTreeMap<String, String>) -> Vec<String> {
    owners
        .values()
        .filter(|t| t.as_str() != ADMIN_TEAM)
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

fn is_admin_of(team: &str, namespace: &str, owner: &str) -> bool {
    namespace == SANDBOX_NAMESPACE
        || owner == team
        || (team == SUPERVISOR_TEAM && owner != ADMIN_TEAM)
}

fn to_owned(verbs: &[&str]) -> Vec<String> {
    verbs.iter().map(|v| v.to_string()).collect()
}

/// Verbs `team` should hold in `namespace` for secrets, required and prohibited resources
pub fn expected_namespace_verbs(team: &str, namespace: &str, owner: &str) -> VerbMap {
    let admin = is_admin_of(team, namespace, owner);
    let mut expected = VerbMap::new();

    expected.insert(
        "secrets".to_string(),
        if admin { to_owned(ALL_VERBS) } else { Vec::new() },
    );
    for resource in REQUIRED_RESOURCES {
        expected.insert(
            resource.to_string(),
            to_owned(if admin { ALL_VERBS } else { VIEW_VERBS }),
        );
    }
    for resource in PROHIBITED_RESOURCES {
        expected.insert(resource.to_string(), to_owned(VIEW_VERBS));
    }

    expected
}

/// Restrict an actual verb map to the resources of `expected`; missing means no verbs
pub fn select_resources(actual: &VerbMap, expected: &VerbMap) -> VerbMap {
    expected
        .keys()
        .map(|r| (r.clone(), actual.get(r).cloned().unwrap_or_default()))
        .collect()
}

/// Whether an unprivileged team's verbs on a cluster-scoped resource are acceptable
pub fn cluster_resource_verbs_ok(resource: &str, verbs: &[String]) -> bool {
    if SELF_REVIEW_RESOURCES.contains(&resource) {
        return verbs == ["create"];
    }
    verbs.is_empty() || verbs == ["get"] || verbs == VIEW_VERBS
}

/// Keys whose verbs differ, as `key: actual != expected`
pub fn diff(actual: &BTreeMap<String, Vec<String>>, expected: &BTreeMap<String, Vec<String>>) -> Vec<String> {
    let keys: BTreeSet<&String> = actual.keys().chain(expected.keys()).collect();
    keys.into_iter()
        .filter_map(|k| {
            let a = actual.get(k);
            let e = expected.get(k);
            (a != e).then(|| format!("{}: {:?} != {:?}", k, a, e))
        })
        .collect()
}

#[cfg(test)]
#[path = "rbac_test.rs"]
mod tests;
