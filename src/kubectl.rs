//! kubectl helpers
//!
//! Thin wrappers around `kubectl` run on a boot server. Objects come back as
//! JSON and are decoded into k8s-openapi types or the partial custom
//! resource types defined next to the checks that use them.

use crate::exec::{CommandOutput, ExecError, Host};
use crate::poll::{PollError, Poller};
use k8s_openapi::api::core::v1::{Pod, Service};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use thiserror::Error;
use tracing::info;

#[derive(Debug, Error)]
pub enum KubectlError {
    #[error(transparent)]
    Exec(#[from] ExecError),

    #[error("failed to decode {resource}: {source}")]
    Decode {
        resource: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("{0}")]
    Unexpected(String),

    #[error(transparent)]
    Timeout(#[from] PollError),
}

/// `kubectl get ... -o json` output for a collection
#[derive(Debug, Clone, Deserialize)]
pub struct ItemList<T> {
    #[serde(default = "Vec::new")]
    pub items: Vec<T>,
}

#[derive(Debug, Clone)]
pub struct Kubectl {
    host: Host,
    poller: Poller,
}

impl Kubectl {
    pub fn new(host: Host, poller: Poller) -> Self {
        Self { host, poller }
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn poller(&self) -> &Poller {
        &self.poller
    }

    /// `kubectl <args>`
    pub async fn run(&self, args: &[&str]) -> Result<CommandOutput, ExecError> {
        let argv: Vec<&str> = std::iter::once("kubectl").chain(args.iter().copied()).collect();
        self.host.exec(&argv).await
    }

    /// `kubectl <args>` with `input` on stdin
    pub async fn run_with_input(&self, input: &[u8], args: &[&str]) -> Result<CommandOutput, ExecError> {
        let argv: Vec<&str> = std::iter::once("kubectl").chain(args.iter().copied()).collect();
        self.host.exec_with_input(input, &argv).await
    }

    /// `kubectl get <args> -o json`, decoded as `T`
    pub async fn get<T: DeserializeOwned>(&self, args: &[&str]) -> Result<T, KubectlError> {
        let argv: Vec<&str> = std::iter::once("get")
            .chain(args.iter().copied())
            .chain(["-o", "json"])
            .collect();
        let out = self.run(&argv).await?;

        serde_json::from_str(&out.stdout).map_err(|source| KubectlError::Decode {
            resource: args.join(" "),
            source,
        })
    }

    /// `kubectl get <args> -o jsonpath=<path>`
    pub async fn jsonpath(&self, args: &[&str], path: &str) -> Result<String, KubectlError> {
        let jsonpath = format!("jsonpath={}", path);
        let argv: Vec<&str> = std::iter::once("get")
            .chain(args.iter().copied())
            .chain(["-o", jsonpath.as_str()])
            .collect();
        Ok(self.run(&argv).await?.stdout)
    }

    pub async fn apply(&self, manifest: &str) -> Result<CommandOutput, ExecError> {
        self.run_with_input(manifest.as_bytes(), &["apply", "-f", "-"]).await
    }

    pub async fn apply_in(&self, namespace: &str, manifest: &str) -> Result<CommandOutput, ExecError> {
        self.run_with_input(manifest.as_bytes(), &["apply", "-n", namespace, "-f", "-"])
            .await
    }

    pub async fn create(&self, manifest: &str) -> Result<CommandOutput, ExecError> {
        self.run_with_input(manifest.as_bytes(), &["create", "-f", "-"]).await
    }

    /// `kubectl -n <ns> exec <target> -- <command>`
    pub async fn exec_in(
        &self,
        namespace: &str,
        target: &str,
        command: &[&str],
    ) -> Result<CommandOutput, ExecError> {
        let argv: Vec<&str> = ["-n", namespace, "exec", target, "--"]
            .into_iter()
            .chain(command.iter().copied())
            .collect();
        self.run(&argv).await
    }

    /// Create `namespace` unless present and wait for its default service account
    pub async fn create_namespace_if_not_exists(&self, namespace: &str) -> Result<(), KubectlError> {
        if self.run(&["get", "namespace", namespace]).await.is_ok() {
            return Ok(());
        }

        self.run(&["create", "namespace", namespace]).await?;
        self.poller
            .eventually(move || async move { self.run(&["get", "sa", "default", "-n", namespace]).await })
            .await?;

        info!(namespace = %namespace, "Created namespace");
        Ok(())
    }

    /// Delete and recreate `namespace`, marking it deletable for the admission webhook
    pub async fn recreate_namespace(&self, namespace: &str) -> Result<(), KubectlError> {
        self.run(&["delete", "namespace", namespace, "--ignore-not-found=true"])
            .await?;
        self.create_namespace_if_not_exists(namespace).await?;

        let annotation = format!("i-am-sure-to-delete={}", namespace);
        self.run(&["annotate", "namespaces", namespace, &annotation])
            .await?;
        Ok(())
    }

    /// The single LoadBalancer ingress IP of a service
    pub async fn load_balancer_ip(&self, namespace: &str, service: &str) -> Result<String, KubectlError> {
        let svc: Service = self
            .get(&["-n", namespace, "service", service])
            .await?;

        let ingress = svc
            .status
            .and_then(|s| s.load_balancer)
            .and_then(|lb| lb.ingress)
            .unwrap_or_default();

        match ingress.as_slice() {
            [only] => only.ip.clone().ok_or_else(|| {
                KubectlError::Unexpected(format!("{}/{} ingress has no IP", namespace, service))
            }),
            other => Err(KubectlError::Unexpected(format!(
                "{}/{}: expected 1 load balancer ingress, got {}",
                namespace,
                service,
                other.len()
            ))),
        }
    }

    pub async fn pods(&self, namespace: &str, selector: &str) -> Result<Vec<Pod>, KubectlError> {
        let selector = format!("--selector={}", selector);
        let list: ItemList<Pod> = self.get(&["-n", namespace, "pods", &selector]).await?;
        Ok(list.items)
    }

    /// Name of the only pod matching `selector`
    pub async fn single_pod_name(&self, namespace: &str, selector: &str) -> Result<String, KubectlError> {
        let pods = self.pods(namespace, selector).await?;
        match pods.as_slice() {
            [pod] => pod.metadata.name.clone().ok_or_else(|| {
                KubectlError::Unexpected(format!("pod matching {} has no name", selector))
            }),
            other => Err(KubectlError::Unexpected(format!(
                "expected 1 pod matching {} in {}, got {}",
                selector,
                namespace,
                other.len()
            ))),
        }
    }
}

#[cfg(test)]
#[path = "kubectl_test.rs"]
mod tests;
