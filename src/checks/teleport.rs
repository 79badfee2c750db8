//! Teleport: node service on boot servers, tsh login, auth persistence, apps

use crate::exec::{ExecError, Host};
use crate::manifest;
use crate::suite::{CheckResult, Context, Scenario};
use anyhow::{anyhow, ensure, Context as _, Result};
use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use futures::future::try_join_all;
use serde::Deserialize;
use tracing::{debug, info};

const NAMESPACE: &str = "teleport";
const AUTH_POD: &str = "teleport-auth-0";
const PROXY_HOST: &str = "teleport.gcp0.dev-ne.co";
const PROXY_FLAG: &str = "--proxy=teleport.gcp0.dev-ne.co:443";
const USER: &str = "cybozu";
const PASSWORD: &str = "dummypass";
const COOKIE_FILE: &str = "teleport_cookie.txt";

/// Boot servers as registered in teleport
const BOOT_NODES: &[&str] = &["gcp0-boot-0", "gcp0-boot-1", "gcp0-boot-2"];
const TENANT_NODES: &[&str] = &["node-maneki-0", "node-maneki-1"];

/// Header of a `tctl get nodes` document
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct TeleportNode {
    #[serde(default)]
    pub kind: String,
    #[serde(default)]
    pub metadata: NodeMetadata,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct NodeMetadata {
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Deserialize)]
struct AppServer {
    spec: AppServerSpec,
}

#[derive(Debug, Deserialize)]
struct AppServerSpec {
    #[serde(default)]
    apps: Vec<App>,
}

#[derive(Debug, Deserialize)]
struct App {
    name: String,
}

/// First line of `input` starting with `prefix`
pub(crate) fn grep_line<'a>(input: &'a str, prefix: &str) -> Option<&'a str> {
    input.lines().find(|l| l.starts_with(prefix))
}

/// Invite token at the end of the URL printed by `tctl users add`
pub(crate) fn invite_url(tctl_output: &str) -> Result<(&str, &str)> {
    let url = grep_line(tctl_output, "https://")
        .ok_or_else(|| anyhow!("no invite URL in {:?}", tctl_output))?
        .trim();
    let token = url.rsplit('/').next().unwrap_or_default();
    ensure!(!token.is_empty(), "empty invite token in {}", url);
    Ok((url, token))
}

/// CSRF token from a curl cookie jar
pub(crate) fn csrf_token(cookies: &str) -> Result<&str> {
    grep_line(cookies, "#HttpOnly_")
        .and_then(|l| l.split_whitespace().last())
        .ok_or_else(|| anyhow!("no CSRF cookie in {:?}", cookies))
}

/// JSON body that sets the password of an invited user
pub(crate) fn password_payload(token: &str, password: &str) -> String {
    serde_json::json!({
        "token": token,
        "password": STANDARD.encode(password),
        "second_factor_token": "",
    })
    .to_string()
}

/// Sorted nodes from `tctl get nodes`
pub(crate) fn decode_nodes(yaml: &str) -> Result<Vec<TeleportNode>> {
    let mut nodes: Vec<TeleportNode> = manifest::decode_all(yaml)?;
    nodes.sort();
    Ok(nodes)
}

/// Application names passed to the app service deployments with `--app-name=`
pub(crate) fn app_names(rendered: &str) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for doc in manifest::documents(rendered)? {
        if doc["kind"].as_str() != Some("Deployment") {
            continue;
        }
        let deployment = doc["metadata"]["name"].as_str().unwrap_or_default();
        let name = doc["spec"]["template"]["spec"]["containers"][0]["args"]
            .as_sequence()
            .into_iter()
            .flatten()
            .filter_map(|a| a.as_str()?.strip_prefix("--app-name="))
            .last()
            .ok_or_else(|| anyhow!("deployment {} has no --app-name", deployment))?;
        names.push(name.to_string());
    }
    Ok(names)
}

/// `tsh` against the proxy as the test user
fn tsh<'a>(args: &[&'a str]) -> Vec<&'a str> {
    let mut argv = vec!["tsh", "--insecure", PROXY_FLAG, "--user=cybozu"];
    argv.extend_from_slice(args);
    argv
}

pub struct Teleport;

impl Teleport {
    async fn check_node_service(ctx: &Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        let addr = ctx
            .poller
            .eventually(move || async move {
                let ip = kubectl.load_balancer_ip(NAMESPACE, "teleport-auth").await?;
                anyhow::Ok(ip)
            })
            .await
            .context("teleport auth has no LoadBalancer IP")?;

        let servers = format!(r#"[\"{}:3025\"]"#, addr);
        ctx.boot0()
            .exec(&[
                "env",
                "ETCDCTL_API=3",
                "etcdctl",
                "--cert=/etc/etcd/backup.crt",
                "--key=/etc/etcd/backup.key",
                "put",
                "/neco/teleport/auth-servers",
                &servers,
            ])
            .await?;

        try_join_all(ctx.boots.iter().map(|boot| async move {
            boot.exec(&["sudo", "neco", "teleport", "config"]).await?;
            boot.exec(&["sudo", "systemctl", "start", "teleport-node.service"])
                .await?;
            info!(host = %boot.target(), "Started teleport node service");
            Ok::<_, ExecError>(())
        }))
        .await?;
        Ok(())
    }

    /// Invite a user and set its password through the web API
    async fn create_user(boot1: &Host) -> CheckResult {
        let _ = boot1
            .exec(&["kubectl", "-n", NAMESPACE, "exec", AUTH_POD, "--", "tctl", "users", "rm", USER])
            .await;
        let out = boot1
            .stdout(&[
                "kubectl", "-n", NAMESPACE, "exec", AUTH_POD, "--", "tctl", "users", "add", USER,
                "cybozu,root",
            ])
            .await?;
        let (url, token) = invite_url(&out)?;
        debug!(url = %url, "Invited user");

        boot1
            .exec(&["curl", "--fail", "--insecure", "-c", COOKIE_FILE, url])
            .await?;
        let cookies = boot1.stdout(&["cat", COOKIE_FILE]).await?;
        let csrf = format!("'X-CSRF-Token: {}'", csrf_token(&cookies)?);
        let payload = format!("'{}'", password_payload(token, PASSWORD));

        boot1
            .exec(&[
                "curl",
                "--fail",
                "--insecure",
                "-X",
                "PUT",
                "-b",
                COOKIE_FILE,
                "-H",
                &csrf,
                "-H",
                "'Content-Type: application/json; charset=UTF-8'",
                "-d",
                &payload,
                "https://teleport.gcp0.dev-ne.co/v1/webapi/users/password/token",
            ])
            .await
            .context("failed to set password")?;
        Ok(())
    }

    /// `tsh login` reads the password from a terminal, so force one with `ssh -tt`
    async fn login(ctx: &Context, boot1: &Host) -> CheckResult {
        let key = ctx
            .config
            .ssh_privkey
            .as_ref()
            .ok_or_else(|| anyhow!("SSH_PRIVKEY is not set"))?
            .to_string_lossy()
            .into_owned();
        let key = key.as_str();
        let dest = format!("{}@{}", USER, boot1.target());
        let dest = dest.as_str();
        let operation = &ctx.operation;
        let input = format!("{}\n", PASSWORD);
        let input = input.as_bytes();

        ctx.poller
            .eventually(move || async move {
                operation
                    .exec_with_input(
                        input,
                        &[
                            "ssh",
                            "-tt",
                            "-oStrictHostKeyChecking=no",
                            "-i",
                            key,
                            dest,
                            "tsh",
                            "--insecure",
                            PROXY_FLAG,
                            "--user=cybozu",
                            "login",
                        ],
                    )
                    .await
            })
            .await
            .context("tsh login failed")?;
        Ok(())
    }

    async fn check_ssh_connection(ctx: &Context) -> CheckResult {
        // boot1, since this rewrites the kubeconfig under other scenarios' feet on boot0
        let boot1 = ctx
            .boots
            .get(1)
            .ok_or_else(|| anyhow!("boot1 is not configured"))?;

        boot1.exec(&["mkdir", "-p", "~/.kube"]).await?;
        boot1
            .exec(&["ckecli", "kubernetes", "issue", ">", "~/.kube/config"])
            .await?;

        let addr = boot1
            .stdout(&[
                "kubectl",
                "-n",
                NAMESPACE,
                "get",
                "service",
                "teleport-proxy",
                "--output=jsonpath={.status.loadBalancer.ingress[0].ip}",
            ])
            .await?;
        let entry = format!(r#"'echo "{} {}" >> /etc/hosts'"#, addr.trim(), PROXY_HOST);
        boot1.exec(&["sudo", "sh", "-c", &entry]).await?;

        Self::create_user(boot1).await?;
        Self::login(ctx, boot1).await?;

        boot1
            .exec(&["kubectl", "get", "nodes"])
            .await
            .context("kubectl via teleport proxy failed")?;

        for node in BOOT_NODES {
            let dest = format!("{}@{}", USER, node);
            let dest = dest.as_str();
            ctx.poller
                .eventually(move || async move { boot1.exec(&tsh(&["ssh", dest, "date"])).await })
                .await
                .with_context(|| format!("tsh ssh failed for {}", node))?;
        }

        for node in TENANT_NODES {
            let dest = format!("{}@{}", USER, node);
            let dest = dest.as_str();
            ctx.poller
                .eventually(move || async move {
                    boot1
                        .exec(&tsh(&[
                            "ssh",
                            dest,
                            "'. /etc/profile.d/update-necocli.sh && kubectl -v5 -n maneki get pod'",
                        ]))
                        .await
                })
                .await
                .with_context(|| format!("kubectl in {} failed", node))?;
        }

        boot1.exec(&tsh(&["logout"])).await?;
        boot1
            .exec(&["ckecli", "kubernetes", "issue", ">", "~/.kube/config"])
            .await?;
        boot1.exec(&["rm", COOKIE_FILE]).await?;
        boot1
            .exec(&["sudo", "sed", "-i", "-e", "/teleport.gcp0.dev-ne.co/d", "/etc/hosts"])
            .await?;
        Ok(())
    }

    async fn check_auth_persistence(ctx: &Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        let tctl_nodes = ["tctl", "get", "nodes"];

        let out = kubectl.exec_in(NAMESPACE, AUTH_POD, &tctl_nodes).await?;
        let before = decode_nodes(&out.stdout)?;
        let before = &before;

        kubectl
            .run(&["-n", NAMESPACE, "delete", "pod", AUTH_POD])
            .await?;
        ctx.poller
            .eventually(move || async move {
                kubectl
                    .exec_in(NAMESPACE, AUTH_POD, &["tctl", "status"])
                    .await
            })
            .await?;

        ctx.poller
            .eventually(move || async move {
                let out = kubectl.exec_in(NAMESPACE, AUTH_POD, &tctl_nodes).await?;
                let after = decode_nodes(&out.stdout)?;
                ensure!(&after == before, "before: {:?}, after: {:?}", before, after);
                anyhow::Ok(())
            })
            .await?;
        info!(nodes = before.len(), "Nodes survived auth restart");
        Ok(())
    }

    async fn check_applications(ctx: &Context) -> CheckResult {
        let names = app_names(&ctx.render("teleport/base/apps")?)?;
        info!(apps = ?names, "Found applications in manifests");
        let names = &names;
        let kubectl = &ctx.kubectl;

        ctx.poller
            .eventually(move || async move {
                let out = kubectl
                    .exec_in(NAMESPACE, AUTH_POD, &["tctl", "apps", "ls", "--format=json"])
                    .await?;
                let servers: Vec<AppServer> = serde_json::from_str(&out.stdout)?;
                for name in names {
                    ensure!(
                        servers
                            .iter()
                            .flat_map(|s| &s.spec.apps)
                            .any(|a| &a.name == name),
                        "app {} is not registered",
                        name
                    );
                }
                anyhow::Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Scenario for Teleport {
    fn name(&self) -> &str {
        "teleport"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        Self::check_node_service(ctx).await?;
        Self::check_ssh_connection(ctx).await?;
        Self::check_auth_persistence(ctx).await?;
        Self::check_applications(ctx).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invite_url() {
        let out = indoc::indoc! {"
            User cybozu has been created but requires a password. Share this URL with the user to complete user setup, link is valid for 1h0m0s:
            https://teleport.gcp0.dev-ne.co:443/web/invite/b86d5b576174f7bbcb87d4905366aa9a

            NOTE: Make sure teleport.gcp0.dev-ne.co:443 points at a Teleport proxy which users can access.
        "};
        let (url, token) = invite_url(out).unwrap();
        assert!(url.starts_with("https://teleport.gcp0.dev-ne.co:443/web/invite/"));
        assert_eq!(token, "b86d5b576174f7bbcb87d4905366aa9a");

        assert!(invite_url("no url here").is_err());
    }

    #[test]
    fn test_csrf_token() {
        let jar = "# Netscape HTTP Cookie File\n\n#HttpOnly_teleport.gcp0.dev-ne.co\tFALSE\t/\tTRUE\t0\tgrv_csrf\tc7c59fea8ec9\n";
        assert_eq!(csrf_token(jar).unwrap(), "c7c59fea8ec9");
        assert!(csrf_token("# Netscape HTTP Cookie File\n").is_err());
    }

    #[test]
    fn test_password_payload() {
        let payload: serde_json::Value =
            serde_json::from_str(&password_payload("tok", "dummypass")).unwrap();
        assert_eq!(payload["token"], "tok");
        assert_eq!(payload["password"], "ZHVtbXlwYXNz");
        assert_eq!(payload["second_factor_token"], "");
    }

    #[test]
    fn test_decode_nodes_ignores_order() {
        let a = decode_nodes("kind: node\nmetadata:\n  name: b\n---\nkind: node\nmetadata:\n  name: a\n").unwrap();
        let b = decode_nodes("kind: node\nmetadata:\n  name: a\n---\nkind: node\nmetadata:\n  name: b\n").unwrap();
        assert_eq!(a, b);
        assert_eq!(a[0].metadata.name, "a");
    }

    #[test]
    fn test_app_names() {
        let rendered = indoc::indoc! {"
            apiVersion: v1
            kind: ConfigMap
            metadata:
              name: cfg
            ---
            apiVersion: apps/v1
            kind: Deployment
            metadata:
              name: teleport-app-argocd
            spec:
              template:
                spec:
                  containers:
                  - name: teleport
                    args:
                    - --roles=app
                    - --app-name=argocd
        "};
        assert_eq!(app_names(rendered).unwrap(), vec!["argocd"]);

        let missing = "kind: Deployment\nmetadata:\n  name: x\nspec:\n  template:\n    spec:\n      containers:\n      - args: []\n";
        assert!(app_names(missing).is_err());
    }

    #[test]
    fn test_tsh_args() {
        assert_eq!(
            tsh(&["logout"]),
            vec!["tsh", "--insecure", PROXY_FLAG, "--user=cybozu", "logout"]
        );
    }
}
