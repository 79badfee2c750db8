//! Cluster bootstrap: nodes, secrets, Argo CD and the first convergence

use super::metallb::first_ingress_ip;
use super::{apply_as_application, apply_objects};
use crate::argocd::{apply_and_wait_for_applications, setup_argocd};
use crate::assertions::deployment_ready;
use crate::kubectl::{ItemList, Kubectl};
use crate::manifest;
use crate::suite::{CheckResult, Context, Scenario, CHECKOUT_DIR};
use anyhow::{anyhow, bail, Context as _, Result};
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::{DaemonSet, Deployment};
use k8s_openapi::api::core::v1::{Node, Service};
use std::time::Duration;
use tracing::info;

/// control-plane: 3, minimum-workers: 4
const EXPECTED_NODES: usize = 7;

const SETTLE_TIMEOUT: Duration = Duration::from_secs(3 * 60);

const TELEPORT_SECRET: &str = r#"
apiVersion: v1
kind: Secret
metadata:
  name: teleport-auth-secret
  namespace: teleport
  labels:
    app.kubernetes.io/name: teleport
stringData:
  teleport.yaml: |
    auth_service:
      authentication:
        second_factor: "off"
        type: local
      cluster_name: gcp0
      public_addr: teleport-auth:3025
      tokens:
        - "proxy,node:{{TOKEN}}"
        - "app,node:teleport-general-token"
    teleport:
      data_dir: /var/lib/teleport
      auth_token: {{TOKEN}}
      log:
        output: stderr
        severity: DEBUG
      storage:
        type: dir
---
apiVersion: v1
kind: Secret
metadata:
  name: teleport-proxy-secret
  namespace: teleport
  labels:
    app.kubernetes.io/name: teleport
stringData:
  teleport.yaml: |
    proxy_service:
      https_cert_file: /var/lib/certs/tls.crt
      https_key_file: /var/lib/certs/tls.key
      kubernetes:
        enabled: true
        listen_addr: 0.0.0.0:3026
        public_addr: [ "teleport.gcp0.dev-ne.co:3026" ]
      listen_addr: 0.0.0.0:3023
      public_addr: [ "teleport.gcp0.dev-ne.co:443" ]
      web_listen_addr: 0.0.0.0:3080
    teleport:
      data_dir: /var/lib/teleport
      auth_token: {{TOKEN}}
      auth_servers:
        - teleport-auth:3025
      log:
        output: stderr
        severity: DEBUG
"#;

pub(crate) fn teleport_secrets(token: &str) -> String {
    TELEPORT_SECRET.replace("{{TOKEN}}", token)
}

pub(crate) fn count_ready_nodes(nodes: &[Node]) -> usize {
    nodes
        .iter()
        .filter(|n| {
            n.status
                .as_ref()
                .and_then(|s| s.conditions.as_ref())
                .is_some_and(|cs| cs.iter().any(|c| c.type_ == "Ready" && c.status == "True"))
        })
        .count()
}

/// Grow the cluster to the expected number of ready nodes
pub struct PrepareNodes;

#[async_trait]
impl Scenario for PrepareNodes {
    fn name(&self) -> &str {
        "prepareNodes"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let boot0 = ctx.boot0();
        let kubectl = &ctx.kubectl;

        ctx.poller
            .eventually(move || async move { boot0.exec(&["ckecli", "cluster", "get"]).await })
            .await?;
        boot0
            .exec(&["ckecli", "constraints", "set", "minimum-workers", "4"])
            .await?;

        ctx.poller
            .eventually(move || async move {
                let nodes: ItemList<Node> = kubectl.get(&["nodes"]).await?;
                if nodes.items.len() != EXPECTED_NODES {
                    bail!("too few nodes: {}", nodes.items.len());
                }
                if count_ready_nodes(&nodes.items) != EXPECTED_NODES {
                    bail!("some nodes are not ready");
                }
                anyhow::Ok(())
            })
            .await?;

        info!(nodes = EXPECTED_NODES, "All nodes ready");
        Ok(())
    }
}

/// Bootstrap Argo CD and wait for every application to converge
pub struct Setup;

#[async_trait]
impl Scenario for Setup {
    fn name(&self) -> &str {
        "setup"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        if !ctx.config.upgrade {
            create_clouddns_secrets(ctx).await?;
            prepare_secrets(ctx).await?;
        }
        apply_zerossl_secrets(ctx).await?;
        checkout(ctx).await?;

        if !ctx.config.upgrade {
            apply_network_policy(ctx).await?;
            apply_cert_manager(ctx).await?;
            setup_argocd(ctx).await?;
            apply_mutating_webhooks(ctx).await?;
        }

        let commit = ctx.config.commit_id.clone();
        let sed = format!("s/release/{}/", commit);
        let overlay_files = format!(
            "{}/argocd-config/overlays/{}/*.yaml",
            CHECKOUT_DIR, ctx.config.overlay
        );
        let base_files = format!("{}/argocd-config/base/*.yaml", CHECKOUT_DIR);
        ctx.boot0().exec(&["sed", "-i", &sed, &base_files]).await?;
        ctx.boot0().exec(&["sed", "-i", &sed, &overlay_files]).await?;
        apply_and_wait_for_applications(ctx, &commit).await?;

        set_dns(ctx).await?;
        set_http_proxy(ctx).await?;
        reconfigure_ignitions(ctx).await?;
        Ok(())
    }
}

fn read_asset(ctx: &Context, name: &str) -> Result<Vec<u8>> {
    let path = ctx.config.assets_dir.join(name);
    std::fs::read(&path).with_context(|| format!("failed to read {}", path.display()))
}

async fn create_clouddns_secrets(ctx: &Context) -> Result<()> {
    let account = read_asset(ctx, "account.json")?;
    let kubectl = &ctx.kubectl;

    for ns in ["external-dns", "cert-manager"] {
        kubectl.create_namespace_if_not_exists(ns).await?;
        let ns_flag = format!("--namespace={}", ns);
        if kubectl.run(&[&ns_flag, "get", "secret", "clouddns"]).await.is_ok() {
            continue;
        }
        kubectl
            .run_with_input(
                &account,
                &[
                    &ns_flag,
                    "create",
                    "secret",
                    "generic",
                    "clouddns",
                    "--from-file=account.json=/dev/stdin",
                ],
            )
            .await
            .with_context(|| format!("failed to create clouddns secret in {}", ns))?;
        info!(namespace = %ns, "Created clouddns secret");
    }
    Ok(())
}

async fn prepare_secrets(ctx: &Context) -> Result<()> {
    let kubectl = &ctx.kubectl;
    kubectl.create_namespace_if_not_exists("sandbox").await?;

    let token = ctx
        .boot0()
        .stdout(&[
            "env",
            "ETCDCTL_API=3",
            "etcdctl",
            "--cert=/etc/etcd/backup.crt",
            "--key=/etc/etcd/backup.key",
            "get",
            "--print-value-only",
            "/neco/teleport/auth-token",
        ])
        .await
        .context("failed to read teleport auth token")?;

    kubectl.create_namespace_if_not_exists("teleport").await?;
    kubectl
        .apply_in("teleport", &teleport_secrets(token.trim()))
        .await
        .context("failed to apply teleport secrets")?;
    Ok(())
}

async fn apply_zerossl_secrets(ctx: &Context) -> Result<()> {
    let data = read_asset(ctx, "zerossl-secret-resource.json")?;
    ctx.kubectl.create_namespace_if_not_exists("cert-manager").await?;
    ctx.kubectl
        .run_with_input(&data, &["apply", "-f", "-"])
        .await
        .context("failed to apply zerossl secrets")?;
    Ok(())
}

async fn checkout(ctx: &Context) -> Result<()> {
    let boot0 = ctx.boot0();
    let checkout = format!("cd {}; git checkout {}", CHECKOUT_DIR, ctx.config.commit_id);

    boot0.exec(&["rm", "-rf", CHECKOUT_DIR]).await?;
    boot0
        .exec(&[
            "env",
            "https_proxy=http://10.0.49.3:3128",
            "git",
            "clone",
            "https://github.com/cybozu-go/neco-apps",
        ])
        .await?;
    boot0.exec(&[&checkout]).await?;

    info!(commit = %ctx.config.commit_id, "Checked out neco-apps");
    Ok(())
}

/// Apply namespaces and network policies ahead of Argo CD
///
/// Argo CD sometimes fails to sync while it applies network policies itself.
async fn apply_network_policy(ctx: &Context) -> Result<()> {
    let kubectl = &ctx.kubectl;

    let namespaces = ctx.render("namespaces/base")?;
    kubectl
        .apply(&namespaces)
        .await
        .context("failed to apply namespaces")?;
    let egress_ns = format!("{}/customer-egress/base/namespace.yaml", CHECKOUT_DIR);
    kubectl
        .run(&["apply", "-f", &egress_ns])
        .await
        .context("failed to apply customer-egress namespace")?;

    let netpol = ctx.render("network-policy/base")?;
    apply_as_application(kubectl, &netpol, "network-policy", &[]).await?;

    let poller = ctx.poller_for(SETTLE_TIMEOUT);
    poller
        .eventually(move || async move {
            let d: Deployment = kubectl.get(&["--namespace=kube-system", "deployment/calico-typha"]).await?;
            let replicas = d.status.as_ref().and_then(|s| s.replicas).unwrap_or(0);
            deployment_ready(&d, replicas)
        })
        .await?;
    poller
        .eventually(move || async move {
            let ds: DaemonSet = kubectl.get(&["--namespace=kube-system", "daemonset/calico-node"]).await?;
            let status = ds.status.unwrap_or_default();
            let ready = status.number_ready;
            if status.desired_number_scheduled != ready {
                bail!(
                    "calico-node daemonset's NumberReady is not {}: {}",
                    status.desired_number_scheduled,
                    ready
                );
            }
            anyhow::Ok(())
        })
        .await?;

    info!("Network policies applied");
    Ok(())
}

/// Apply coil and cert-manager ahead of Argo CD to speed up the first sync
async fn apply_cert_manager(ctx: &Context) -> Result<()> {
    let kubectl = &ctx.kubectl;

    let coil = format!("kustomize build {}/coil/base | kubectl apply -f -", CHECKOUT_DIR);
    ctx.boot0()
        .exec(&[&coil])
        .await
        .context("failed to apply coil")?;

    let rendered = ctx.render(&format!("cert-manager/overlays/{}", ctx.config.overlay))?;
    apply_as_application(kubectl, &rendered, "cert-manager", &["ClusterIssuer"]).await?;

    ctx.poller_for(SETTLE_TIMEOUT)
        .eventually(move || async move {
            for name in ["cert-manager", "cert-manager-cainjector", "cert-manager-webhook"] {
                let d: Deployment = kubectl.get(&["-n", "cert-manager", "deployments", name]).await?;
                deployment_ready(&d, 1)?;
            }
            anyhow::Ok(())
        })
        .await?;

    info!("cert-manager applied");
    Ok(())
}

async fn apply_webhooks_from(kubectl: &Kubectl, rendered: &str) -> Result<()> {
    let webhooks: Vec<_> = manifest::objects(rendered)?
        .into_iter()
        .filter(|o| manifest::kind_of(o) == "MutatingWebhookConfiguration")
        .collect();
    apply_objects(kubectl, &webhooks).await
}

/// Argo CD does not wait for mutating webhooks to become ready, so the
/// critical ones are applied by hand first.
async fn apply_mutating_webhooks(ctx: &Context) -> Result<()> {
    apply_webhooks_from(&ctx.kubectl, &ctx.render("neco-admission/base")?).await?;
    apply_webhooks_from(&ctx.kubectl, &ctx.render("topolvm/base")?).await?;
    Ok(())
}

async fn set_dns(ctx: &Context) -> Result<()> {
    let kubectl = &ctx.kubectl;
    let ip = ctx
        .poller
        .eventually(move || async move {
            kubectl.load_balancer_ip("internet-egress", "unbound-bastion").await
        })
        .await?;

    ctx.boot0()
        .exec(&["neco", "config", "set", "dns", &ip])
        .await?;
    info!(dns = %ip, "Set DNS");
    Ok(())
}

/// First LoadBalancer address of squid; extra ingresses are ignored
async fn squid_ip(kubectl: &Kubectl) -> Result<String> {
    let svc: Service = kubectl.get(&["-n", "internet-egress", "service", "squid"]).await?;
    first_ingress_ip(&svc)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("squid has no load balancer ingress"))
}

async fn set_http_proxy(ctx: &Context) -> Result<()> {
    let kubectl = &ctx.kubectl;
    let boot0 = ctx.boot0();

    let ip = ctx
        .poller
        .eventually(move || async move { squid_ip(kubectl).await })
        .await?;
    let proxy_url = format!("http://{}:3128", ip);
    boot0
        .exec(&["neco", "config", "set", "node-proxy", &proxy_url])
        .await?;
    boot0.exec(&["neco", "config", "set", "proxy", &proxy_url]).await?;

    let expected = proxy_url.as_str();
    ctx.poller
        .eventually(move || async move {
            let out = boot0.stdout(&["docker", "info", "-f", "{{.HTTPProxy}}"]).await?;
            if out.trim() != expected {
                bail!("docker has not been restarted");
            }
            anyhow::Ok(())
        })
        .await?;

    let window = ctx.config.timeouts.stability();
    let poller = ctx.poller;
    poller
        .eventually(move || async move {
            poller
                .consistently(window, move || async move {
                    boot0.exec(&["sabactl", "ipam", "get"]).await?;
                    boot0.exec(&["ckecli", "cluster", "get"]).await?;
                    Ok::<_, crate::exec::ExecError>(())
                })
                .await
        })
        .await?;

    info!(proxy = %proxy_url, "Set HTTP proxy");
    Ok(())
}

/// Role name from `/usr/share/neco/ignitions/roles/<role>/site.yml`
pub(crate) fn ignition_role(path: &str) -> Option<&str> {
    path.split('/').nth(6).filter(|r| !r.is_empty())
}

async fn reconfigure_ignitions(ctx: &Context) -> Result<()> {
    let boot0 = ctx.boot0();

    let version = boot0
        .stdout(&["dpkg-query", "-W", "-f", "'${Version}'", "neco"])
        .await?;
    let roles = boot0
        .stdout(&["ls", "/usr/share/neco/ignitions/roles/*/site.yml"])
        .await?;

    for path in roles.split_whitespace() {
        let role = ignition_role(path).ok_or_else(|| anyhow!("unexpected ignition path {}", path))?;
        boot0
            .exec(&["sabactl", "ignitions", "delete", role, version.trim()])
            .await?;
    }

    ctx.poller
        .eventually(move || async move {
            boot0
                .exec(&["neco", "init-data", "--ignitions-only"])
                .await
                .context("neco init-data failed")
        })
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exec::scripted::ScriptedExecutor;
    use crate::exec::Host;
    use crate::poll::Poller;
    use k8s_openapi::api::core::v1::{NodeCondition, NodeStatus};
    use std::sync::Arc;

    fn node(ready: &str) -> Node {
        Node {
            status: Some(NodeStatus {
                conditions: Some(vec![NodeCondition {
                    type_: "Ready".to_string(),
                    status: ready.to_string(),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        }
    }

    #[test]
    fn test_count_ready_nodes() {
        let nodes = vec![node("True"), node("False"), node("True"), Node::default()];
        assert_eq!(count_ready_nodes(&nodes), 2);
    }

    #[test]
    fn test_teleport_secrets_fill_token() {
        let secrets = teleport_secrets("s3cr3t");

        assert!(!secrets.contains("{{TOKEN}}"));
        assert!(secrets.contains(r#""proxy,node:s3cr3t""#));
        assert_eq!(secrets.matches("auth_token: s3cr3t").count(), 2);
        assert_eq!(manifest::documents(&secrets).map(|d| d.len()).ok(), Some(2));
    }

    #[test]
    fn test_ignition_role() {
        assert_eq!(
            ignition_role("/usr/share/neco/ignitions/roles/boot/site.yml"),
            Some("boot")
        );
        assert_eq!(ignition_role("/tmp/site.yml"), None);
    }

    #[tokio::test]
    async fn test_squid_ip_takes_first_ingress() {
        let exec = Arc::new(ScriptedExecutor::new().on(
            "-n internet-egress service squid",
            r#"{"status":{"loadBalancer":{"ingress":[{"ip":"10.72.32.10"},{"ip":"10.72.32.11"}]}}}"#,
        ));
        let kubectl = Kubectl::new(Host::new(exec.clone(), "boot0"), Poller::default());

        assert_eq!(squid_ip(&kubectl).await.unwrap(), "10.72.32.10");
        assert_eq!(exec.count("kubectl get -n internet-egress service squid -o json"), 1);
    }
}
