//! Tenant team permissions

use crate::kubectl::{ItemList, Kubectl};
use crate::rbac::{self, VerbMap};
use crate::suite::{CheckResult, Context, Scenario};
use anyhow::{bail, ensure, Context as _, Result};
use async_trait::async_trait;
use indoc::indoc;
use k8s_openapi::api::core::v1::{Namespace, Pod};
use std::collections::BTreeMap;
use tracing::{debug, info};

const EPHEMERAL_POD: &str = "neco-ephemeral-test";
const DEBUG_IMAGE: &str = "--image=quay.io/cybozu/ubuntu-debug:20.04";

const OBC: &str = indoc! {r#"
    apiVersion: objectbucket.io/v1alpha1
    kind: ObjectBucketClaim
    metadata:
      name: hdd-ob
      namespace: maneki
    spec:
      generateBucketName: obc-poc
      storageClassName: ceph-hdd-bucket
"#};

/// Impersonation flags for an unprivileged member of `team`
pub(crate) fn impersonate(team: &str) -> [String; 3] {
    [
        "--as=test".to_string(),
        format!("--as-group={}", team),
        "--as-group=system:authenticated".to_string(),
    ]
}

/// Keys the RBAC matrix as `<team>:<namespace>/<resource>`
fn prefixed<'a>(
    team: &'a str,
    namespace: &'a str,
    verbs: VerbMap,
) -> impl Iterator<Item = (String, Vec<String>)> + 'a {
    verbs
        .into_iter()
        .map(move |(resource, v)| (format!("{}:{}/{}", team, namespace, resource), v))
}

/// Resources for which a team holds unexpected cluster-scoped verbs
pub(crate) fn cluster_violations(actual: &VerbMap, cluster_resources: &[String]) -> Vec<String> {
    cluster_resources
        .iter()
        .filter_map(|resource| {
            let verbs = actual.get(resource).map(Vec::as_slice).unwrap_or_default();
            (!rbac::cluster_resource_verbs_ok(resource, verbs))
                .then(|| format!("{}: {:?}", resource, verbs))
        })
        .collect()
}

async fn actual_verbs(kubectl: &Kubectl, team: &str, namespace: &str) -> Result<VerbMap> {
    let [as_user, as_team, as_authenticated] = impersonate(team);
    let out = kubectl
        .run(&[
            "-n",
            namespace,
            &as_user,
            &as_team,
            &as_authenticated,
            "auth",
            "can-i",
            "--list",
            "--no-headers",
        ])
        .await?;
    Ok(rbac::parse_can_i_list(&out.stdout)?)
}

pub struct TeamManagement;

impl TeamManagement {
    async fn check_rbac(ctx: &Context) -> CheckResult {
        let kubectl = &ctx.kubectl;

        let namespaces: ItemList<Namespace> = kubectl.get(&["namespaces"]).await?;
        let owners = rbac::namespace_owners(&namespaces.items);
        let teams = rbac::tenant_teams(&owners);

        let out = kubectl
            .run(&["api-resources", "--namespaced=false", "-o=name", "--sort-by=name"])
            .await?;
        let cluster_resources: Vec<String> = out
            .stdout
            .lines()
            .filter(|l| !l.is_empty())
            .map(str::to_string)
            .collect();

        let mut expected = BTreeMap::new();
        let mut actual = BTreeMap::new();
        let mut cluster = Vec::new();
        for team in &teams {
            for (namespace, owner) in &owners {
                let verbs = actual_verbs(kubectl, team, namespace).await?;
                let wanted = rbac::expected_namespace_verbs(team, namespace, owner);

                cluster.extend(
                    cluster_violations(&verbs, &cluster_resources)
                        .into_iter()
                        .map(|v| format!("{}:{}/{}", team, namespace, v)),
                );
                actual.extend(prefixed(team, namespace, rbac::select_resources(&verbs, &wanted)));
                expected.extend(prefixed(team, namespace, wanted));
            }
            debug!(team = %team, "Collected verbs");
        }

        let diff = rbac::diff(&actual, &expected);
        if !diff.is_empty() {
            bail!("unexpected namespace permissions:\n{}", diff.join("\n"));
        }
        if !cluster.is_empty() {
            bail!("unexpected cluster permissions:\n{}", cluster.join("\n"));
        }
        info!(teams = teams.len(), namespaces = owners.len(), "RBAC matrix verified");
        Ok(())
    }

    async fn check_ephemeral_container(ctx: &Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        kubectl
            .run(&["run", "-n", rbac::SUPERVISOR_TEAM, EPHEMERAL_POD, DEBUG_IMAGE, "pause"])
            .await?;

        ctx.poller
            .eventually(move || async move {
                let pod: Pod = kubectl
                    .get(&["-n", rbac::SUPERVISOR_TEAM, "pod/neco-ephemeral-test"])
                    .await?;
                let ready = pod
                    .status
                    .and_then(|s| s.container_statuses)
                    .and_then(|cs| cs.first().map(|c| c.ready))
                    .unwrap_or(false);
                ensure!(ready, "pod is not ready");
                anyhow::Ok(())
            })
            .await?;

        let [as_user, as_team, as_authenticated] = impersonate(rbac::SUPERVISOR_TEAM);
        let target = format!("--target={}", EPHEMERAL_POD);
        kubectl
            .run(&[
                "debug",
                "-i",
                "-n",
                rbac::SUPERVISOR_TEAM,
                EPHEMERAL_POD,
                DEBUG_IMAGE,
                &target,
                &as_user,
                &as_team,
                &as_authenticated,
                "--",
                "echo",
                "a",
            ])
            .await
            .context("unprivileged team cannot add an ephemeral container")?;
        Ok(())
    }

    async fn check_object_bucket(ctx: &Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        let [as_user, as_team, as_authenticated] = impersonate(rbac::SUPERVISOR_TEAM);
        let (as_user, as_team, as_authenticated) =
            (as_user.as_str(), as_team.as_str(), as_authenticated.as_str());

        kubectl
            .run_with_input(
                OBC.as_bytes(),
                &[as_user, as_team, as_authenticated, "apply", "-f", "-"],
            )
            .await
            .context("failed to create ObjectBucketClaim as maneki")?;

        let ob = ctx
            .poller
            .eventually(move || async move {
                let name = kubectl
                    .jsonpath(
                        &[as_user, as_team, as_authenticated, "obc", "-n", "maneki", "hdd-ob"],
                        "{.spec.objectBucketName}",
                    )
                    .await?;
                ensure!(!name.is_empty(), "failed to get ob name");
                anyhow::Ok(name)
            })
            .await?;

        kubectl
            .run(&[as_user, as_team, as_authenticated, "get", "ob", &ob])
            .await
            .with_context(|| format!("cannot read ObjectBucket {} as maneki", ob))?;
        Ok(())
    }
}

#[async_trait]
impl Scenario for TeamManagement {
    fn name(&self) -> &str {
        "team-management"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        Self::check_rbac(ctx).await?;
        Self::check_ephemeral_container(ctx).await?;
        Self::check_object_bucket(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scripted::ScriptedExecutor;
    use crate::exec::Host;
    use crate::poll::Poller;
    use std::sync::Arc;

    #[test]
    fn test_cluster_violations() {
        let mut actual = VerbMap::new();
        actual.insert("nodes".into(), vec!["get".into(), "list".into(), "watch".into()]);
        actual.insert(
            "selfsubjectaccessreviews.authorization.k8s.io".into(),
            vec!["create".into()],
        );
        actual.insert("clusterroles.rbac.authorization.k8s.io".into(), vec!["delete".into()]);

        let resources: Vec<String> = [
            "clusterroles.rbac.authorization.k8s.io",
            "namespaces",
            "nodes",
            "selfsubjectaccessreviews.authorization.k8s.io",
            "selfsubjectrulesreviews.authorization.k8s.io",
        ]
        .iter()
        .map(|s| s.to_string())
        .collect();

        let violations = cluster_violations(&actual, &resources);
        assert_eq!(violations.len(), 2);
        assert!(violations[0].starts_with("clusterroles"));
        assert!(violations[1].starts_with("selfsubjectrulesreviews"));
    }

    #[tokio::test]
    async fn test_actual_verbs_impersonates_team() {
        let exec = Arc::new(ScriptedExecutor::new().on(
            "kubectl -n sandbox --as=test --as-group=maneki --as-group=system:authenticated auth can-i --list --no-headers",
            "secrets   []   []   [*]\n           [/api]   []   [get]\n",
        ));
        let kubectl = Kubectl::new(Host::new(exec, "boot0"), Poller::default());

        let verbs = actual_verbs(&kubectl, "maneki", "sandbox").await.unwrap();
        assert_eq!(verbs["secrets"].len(), rbac::ALL_VERBS.len());
        assert_eq!(verbs.len(), 1);
    }
}
