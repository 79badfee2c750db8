//! Pull-through mirror registries

use crate::kubectl::Kubectl;
use crate::suite::{CheckResult, Context, Scenario};
use anyhow::{bail, Context as _, Result};
use async_trait::async_trait;
use indoc::indoc;
use serde::Deserialize;
use std::time::Duration;
use tracing::info;

const NAMESPACE: &str = "sandbox";

/// Pod the catalogs are fetched from
const CLIENT_POD: &str = "quay-ubuntu";

const MIRROR_TIMEOUT: Duration = Duration::from_secs(10 * 60);

const PODS: &str = indoc! {r#"
    apiVersion: v1
    kind: Pod
    metadata:
      name: elastic-elasticsearch
      namespace: sandbox
    spec:
      containers:
      - command:
        - /usr/local/bin/pause
        image: docker.elastic.co/elasticsearch/elasticsearch-oss:7.9.3
        imagePullPolicy: Always
        name: elasticsearch
      securityContext:
        runAsGroup: 1000
        runAsUser: 1000
    ---
    apiVersion: v1
    kind: Pod
    metadata:
      name: ghcr-moco
      namespace: sandbox
    spec:
      containers:
      - command:
        - /usr/local/bin/pause
        image: ghcr.io/cybozu-go/moco:0.5.1
        imagePullPolicy: Always
        name: moco
    ---
    apiVersion: v1
    kind: Pod
    metadata:
      name: quay-ubuntu
      namespace: sandbox
    spec:
      containers:
      - command:
        - /usr/local/bin/pause
        image: quay.io/cybozu/ubuntu-debug:20.04
        imagePullPolicy: Always
        name: ubuntu
      securityContext:
        runAsGroup: 1000
        runAsUser: 1000
    ---
    apiVersion: v1
    kind: Pod
    metadata:
      name: quay-private-testhttpd
      namespace: sandbox
    spec:
      containers:
      - command:
        image: quay.io/neco_test/testhttpd:0.1.2
        imagePullPolicy: Always
        name: testhttpd
"#};

/// A repository expected in a mirror, and the pod whose image pull caches it
pub(crate) struct CachedImage {
    pub repository: &'static str,
    /// Recreated to pull again while the repository is missing; the client pod
    /// itself is never recreated
    pub puller: Option<&'static str>,
}

pub(crate) struct Mirror {
    pub name: &'static str,
    pub catalog_url: &'static str,
    pub images: &'static [CachedImage],
}

pub(crate) const MIRRORS: &[Mirror] = &[
    Mirror {
        name: "elastic",
        catalog_url: "http://registry-elastic.registry:5000/v2/_catalog",
        images: &[CachedImage {
            repository: "elasticsearch/elasticsearch-oss",
            puller: Some("elastic-elasticsearch"),
        }],
    },
    Mirror {
        name: "ghcr",
        catalog_url: "http://registry-ghcr.registry:5000/v2/_catalog",
        images: &[CachedImage {
            repository: "cybozu-go/moco",
            puller: Some("ghcr-moco"),
        }],
    },
    Mirror {
        name: "quay",
        catalog_url: "http://registry-quay.registry:5000/v2/_catalog",
        images: &[
            CachedImage {
                repository: "cybozu/ubuntu-debug",
                puller: None,
            },
            CachedImage {
                repository: "neco_test/testhttpd",
                puller: Some("quay-private-testhttpd"),
            },
        ],
    },
];

/// `/v2/_catalog` of a Docker registry
#[derive(Debug, Deserialize)]
pub(crate) struct Catalog {
    #[serde(default)]
    pub repositories: Vec<String>,
}

/// First image of `mirror` not yet in `catalog`
pub(crate) fn first_missing<'a>(mirror: &'a Mirror, catalog: &Catalog) -> Option<&'a CachedImage> {
    mirror
        .images
        .iter()
        .find(|img| !catalog.repositories.iter().any(|r| r == img.repository))
}

async fn check_mirror(kubectl: &Kubectl, mirror: &Mirror) -> Result<()> {
    let out = kubectl
        .exec_in(NAMESPACE, CLIENT_POD, &["curl", "-sf", mirror.catalog_url])
        .await?;
    let catalog: Catalog = serde_json::from_str(&out.stdout)
        .with_context(|| format!("invalid catalog: {}", out.stdout))?;

    let Some(missing) = first_missing(mirror, &catalog) else {
        return Ok(());
    };
    if let Some(pod) = missing.puller {
        kubectl.run(&["delete", "-n", NAMESPACE, "pod", pod]).await?;
    }
    kubectl.apply(PODS).await?;
    bail!("{} is not found in {} registry", missing.repository, mirror.name)
}

pub struct PrepareRegistry;

#[async_trait]
impl Scenario for PrepareRegistry {
    fn name(&self) -> &str {
        "preparing registry"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        ctx.kubectl.apply(PODS).await.context("failed to create pods")?;
        Ok(())
    }
}

pub struct Registry;

#[async_trait]
impl Scenario for Registry {
    fn name(&self) -> &str {
        "registry"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        let poller = ctx.poller_for(MIRROR_TIMEOUT);
        for mirror in MIRRORS {
            poller
                .eventually(move || async move { check_mirror(kubectl, mirror).await })
                .await?;
            info!(mirror = mirror.name, "Mirror registry caches images");
        }
        Ok(())
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
    fn test_first_missing() {
        let quay = &MIRRORS[2];
        let catalog: Catalog =
            serde_json::from_str(r#"{"repositories":["cybozu/ubuntu-debug"]}"#).unwrap();
        assert_eq!(
            first_missing(quay, &catalog).unwrap().repository,
            "neco_test/testhttpd"
        );

        let catalog: Catalog = serde_json::from_str(
            r#"{"repositories":["cybozu/ubuntu-debug","neco_test/testhttpd"]}"#,
        )
        .unwrap();
        assert!(first_missing(quay, &catalog).is_none());
    }

    #[test]
    fn test_client_pod_is_never_recreated() {
        for mirror in MIRRORS {
            for img in mirror.images {
                assert_ne!(img.puller, Some(CLIENT_POD));
            }
        }
    }

    #[tokio::test]
    async fn test_missing_image_recreates_puller() {
        let exec = Arc::new(
            ScriptedExecutor::new()
                .on("curl -sf http://registry-ghcr.registry:5000/v2/_catalog", r#"{"repositories":[]}"#)
                .on("kubectl delete -n sandbox pod ghcr-moco", "")
                .on("kubectl apply -f -", ""),
        );
        let kubectl = Kubectl::new(Host::new(exec.clone(), "boot0"), Poller::default());

        let err = check_mirror(&kubectl, &MIRRORS[1]).await.unwrap_err();
        assert!(err.to_string().contains("cybozu-go/moco"));
        assert_eq!(exec.count("delete -n sandbox pod ghcr-moco"), 1);
        assert_eq!(exec.inputs().len(), 1);
    }
}
