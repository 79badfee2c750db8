//! Argo CD types and client
//!
//! Only the fields the suite reads are modelled. `Application` is decoded from
//! `argocd app get -o json` and from rendered `argocd-config` manifests.

use crate::exec::{ExecError, Host};
use crate::kubectl::ItemList;
use crate::manifest::{self, ManifestError};
use crate::suite::{Context, CHECKOUT_DIR};
use anyhow::{anyhow, bail, Context as _, Result};
use k8s_openapi::api::core::v1::{Node, Service};
use kube::core::ObjectMeta;
use kube::CustomResource;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

/// Annotation ordering Application syncs
pub const SYNC_WAVE_ANNOTATION: &str = "argocd.argoproj.io/sync-wave";

/// Where the admin password is saved for later `argocd login`s
pub const ARGOCD_PASSWORD_FILE: &str = "./argocd-password.txt";

/// Label marking Applications that belong to tenants
pub const TENANT_LABEL: &str = "is-tenant";

pub const REPO_URL: &str = "https://github.com/cybozu-go/neco-apps.git";

/// Applications that follow upstream chart versions instead of the repo revision
const UNPINNED_APPS: &[&str] = &["prometheus-adapter"];

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum SyncStatusCode {
    Synced,
    OutOfSync,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize, Serialize)]
pub enum HealthStatusCode {
    Progressing,
    Healthy,
    Suspended,
    Degraded,
    Missing,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub enum OperationPhase {
    Running,
    Terminating,
    Failed,
    Error,
    Succeeded,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationSource {
    #[serde(rename = "repoURL", default)]
    pub repo_url: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub target_revision: String,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ApplicationSpec {
    #[serde(default)]
    pub source: ApplicationSource,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct ComparedTo {
    #[serde(default)]
    pub source: ApplicationSource,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    #[serde(default)]
    pub status: SyncStatusCode,
    #[serde(default)]
    pub compared_to: ComparedTo,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct HealthStatus {
    #[serde(default)]
    pub status: HealthStatusCode,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OperationState {
    pub phase: OperationPhase,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApplicationStatus {
    #[serde(default)]
    pub sync: SyncStatus,
    #[serde(default)]
    pub health: HealthStatus,
    #[serde(default)]
    pub operation_state: Option<OperationState>,
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Application {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default)]
    pub spec: ApplicationSpec,
    #[serde(default)]
    pub status: ApplicationStatus,
    /// In-flight operation; its content is irrelevant, only its presence
    #[serde(default)]
    pub operation: Option<serde_json::Value>,
}

impl Application {
    pub fn name(&self) -> &str {
        self.metadata.name.as_deref().unwrap_or_default()
    }

    fn synced_and_healthy(&self) -> bool {
        self.status.sync.status == SyncStatusCode::Synced
            && self.status.health.status == HealthStatusCode::Healthy
    }

    /// Synced, healthy and idle
    pub fn is_converged(&self) -> bool {
        self.synced_and_healthy() && self.operation.is_none()
    }

    /// Synced and healthy, yet an operation is still running
    ///
    /// Seen after network-policy syncs disrupt the Argo CD controller; the
    /// operation never finishes on its own.
    pub fn has_stuck_operation(&self) -> bool {
        self.synced_and_healthy()
            && self.operation.is_some()
            && matches!(
                self.status.operation_state,
                Some(OperationState {
                    phase: OperationPhase::Running
                })
            )
    }

    pub fn sync_wave(&self) -> Option<&str> {
        self.metadata
            .annotations
            .as_ref()
            .and_then(|a| a.get(SYNC_WAVE_ANNOTATION))
            .map(String::as_str)
    }

    pub fn is_tenant(&self) -> bool {
        self.metadata
            .labels
            .as_ref()
            .and_then(|l| l.get(TENANT_LABEL))
            .is_some_and(|v| v == "true")
    }
}

/// Destination namespaces an Argo CD project may deploy to
#[derive(CustomResource, Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
#[kube(group = "argoproj.io", version = "v1alpha1", kind = "AppProject", namespaced)]
pub struct AppProjectSpec {
    #[serde(default)]
    pub destinations: Vec<ApplicationDestination>,
}

#[derive(Serialize, Deserialize, Clone, Debug, Default, JsonSchema)]
pub struct ApplicationDestination {
    #[serde(default)]
    pub namespace: String,
}

/// Names of the non-tenant Applications in a rendered `argocd-config` overlay, sorted
pub fn application_names(rendered: &str) -> Result<Vec<String>, ManifestError> {
    let mut names: Vec<String> = manifest::decode_all::<Application>(rendered)?
        .into_iter()
        .filter(|app| !app.is_tenant())
        .map(|app| app.name().to_string())
        .collect();
    names.sort();
    Ok(names)
}

/// `argocd` CLI on a boot server
#[derive(Debug, Clone)]
pub struct ArgoCd {
    host: Host,
}

impl ArgoCd {
    pub fn new(host: Host) -> Self {
        Self { host }
    }

    async fn run(&self, args: &[&str]) -> Result<String, ExecError> {
        let argv: Vec<&str> = std::iter::once("argocd").chain(args.iter().copied()).collect();
        self.host.stdout(&argv).await
    }

    pub async fn login(&self, server: &str, password: &str) -> Result<(), ExecError> {
        self.run(&[
            "login",
            server,
            "--insecure",
            "--username",
            "admin",
            "--password",
            password,
        ])
        .await?;
        Ok(())
    }

    /// Create (or update) the app-of-apps pointing at `overlay` without auto-sync
    pub async fn create_app_of_apps(&self, overlay: &str, revision: &str) -> Result<(), ExecError> {
        let path = format!("argocd-config/overlays/{}", overlay);
        self.run(&[
            "app",
            "create",
            "argocd-config",
            "--upsert",
            "--repo",
            REPO_URL,
            "--path",
            &path,
            "--dest-namespace",
            "argocd",
            "--dest-server",
            "https://kubernetes.default.svc",
            "--sync-policy",
            "none",
            "--revision",
            revision,
        ])
        .await?;
        Ok(())
    }

    /// Sync the app-of-apps from the local checkout, which carries the rewritten revisions
    pub async fn sync_app_of_apps_local(&self, checkout: &str, overlay: &str) -> Result<(), ExecError> {
        let path = format!("argocd-config/overlays/{}", overlay);
        self.host
            .stdout(&[
                "cd", checkout, "&&", "argocd", "app", "sync", "argocd-config", "--local", &path,
                "--async",
            ])
            .await?;
        Ok(())
    }

    pub async fn get_app(&self, name: &str) -> Result<Application> {
        let out = self.run(&["app", "get", "-o", "json", name]).await?;
        serde_json::from_str(&out).with_context(|| format!("failed to decode application {}", name))
    }

    pub async fn terminate_op(&self, name: &str) -> Result<(), ExecError> {
        self.run(&["app", "terminate-op", name]).await?;
        Ok(())
    }

    pub async fn sync(&self, name: &str) -> Result<(), ExecError> {
        self.run(&["app", "sync", name]).await?;
        Ok(())
    }

    /// One pass over `apps`; fails on the first one not yet converged to `commit`
    ///
    /// A stuck operation is terminated and the app re-synced, but the pass still
    /// fails so the caller polls again.
    pub async fn check_all_apps_synced(&self, apps: &[String], commit: &str) -> Result<()> {
        for name in apps {
            let app = self.get_app(name).await?;

            if !UNPINNED_APPS.contains(&app.name()) {
                let revision = &app.status.sync.compared_to.source.target_revision;
                if revision != commit {
                    bail!("{} does not have correct target yet: {}", name, revision);
                }
            }

            if app.is_converged() {
                continue;
            }

            if app.has_stuck_operation() {
                warn!(app = %name, "Terminating unexpected operation");
                self.terminate_op(name)
                    .await
                    .with_context(|| format!("failed to terminate operation of {}", name))?;
                self.sync(name)
                    .await
                    .with_context(|| format!("failed to sync {}", name))?;
            }

            bail!(
                "{} is not initialized: sync={:?} health={:?} operation={}",
                name,
                app.status.sync.status,
                app.status.health.status,
                app.operation.is_some()
            );
        }

        debug!(count = apps.len(), "All applications synced");
        Ok(())
    }
}

/// Point the app-of-apps at `commit` and wait until every Application converges
///
/// Converged means `check_all_apps_synced` keeps passing for the stability
/// window; the whole wait is bounded by the convergence timeout.
pub async fn apply_and_wait_for_applications(ctx: &Context, commit: &str) -> Result<()> {
    let argocd = &ctx.argocd;
    let overlay = ctx.config.overlay.as_str();

    info!(commit = %commit, overlay = %overlay, "Creating Argo CD app-of-apps");
    ctx.poller
        .eventually(move || async move { argocd.create_app_of_apps(overlay, commit).await })
        .await?;
    ctx.poller
        .eventually(move || async move { argocd.sync_app_of_apps_local(CHECKOUT_DIR, overlay).await })
        .await?;

    let rendered = ctx.render(&format!("argocd-config/overlays/{}", overlay))?;
    let apps = application_names(&rendered)?;
    if apps.is_empty() {
        bail!("no applications in argocd-config/overlays/{}", overlay);
    }
    info!(count = apps.len(), apps = %apps.join(","), "Waiting for applications");

    let apps = apps.as_slice();
    let window = ctx.config.timeouts.stability();
    let poller = ctx.poller_for(ctx.config.timeouts.convergence());
    poller
        .eventually(move || async move {
            poller
                .consistently(window, move || async move {
                    argocd.check_all_apps_synced(apps, commit).await
                })
                .await
        })
        .await?;

    info!(commit = %commit, "All applications converged");
    Ok(())
}

/// Install Argo CD and log in as admin
///
/// The initial admin password is the name of the argocd-server pod; it is
/// saved to `ARGOCD_PASSWORD_FILE`.
pub async fn setup_argocd(ctx: &Context) -> Result<()> {
    let kubectl = &ctx.kubectl;

    kubectl.create_namespace_if_not_exists("argocd").await?;
    let path = ctx.config.assets_dir.join("install.yaml");
    let install = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    kubectl
        .apply_in("argocd", &install)
        .await
        .context("failed to apply install.yaml")?;

    let password = ctx
        .poller
        .eventually(move || async move {
            kubectl
                .single_pod_name("argocd", "app.kubernetes.io/name=argocd-server")
                .await
        })
        .await?;
    std::fs::write(ARGOCD_PASSWORD_FILE, &password)
        .with_context(|| format!("failed to save {}", ARGOCD_PASSWORD_FILE))?;

    let nodes: ItemList<Node> = kubectl.get(&["nodes"]).await?;
    let address = nodes
        .items
        .first()
        .and_then(|n| n.status.as_ref())
        .and_then(|s| s.addresses.as_ref())
        .and_then(|addrs| addrs.iter().find(|a| a.type_ == "InternalIP"))
        .map(|a| a.address.clone())
        .ok_or_else(|| anyhow!("no node with an InternalIP"))?;

    let svc: Service = kubectl.get(&["-n", "argocd", "svc", "argocd-server"]).await?;
    let node_port = svc
        .spec
        .and_then(|s| s.ports)
        .unwrap_or_default()
        .into_iter()
        .find(|p| p.name.as_deref() == Some("http"))
        .and_then(|p| p.node_port)
        .ok_or_else(|| anyhow!("argocd-server has no http node port"))?;

    let server = format!("{}:{}", address, node_port);
    let argocd = &ctx.argocd;
    let (server_ref, password_ref) = (server.as_str(), password.as_str());
    ctx.poller
        .eventually(move || async move { argocd.login(server_ref, password_ref).await })
        .await?;

    info!(server = %server, "Logged in to Argo CD");
    Ok(())
}

#[cfg(test)]
#[path = "argocd_test.rs"]
mod tests;
