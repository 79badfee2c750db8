//! Rook/Ceph storage and the load pods that shape its placement

use crate::assertions::{deployment_available, deployment_fully_available};
use crate::kubectl::{ItemList, Kubectl};
use crate::suite::{CheckResult, Context, Scenario};
use anyhow::{anyhow, bail, ensure, Context as _, Result};
use async_trait::async_trait;
use indoc::{formatdoc, indoc};
use k8s_openapi::api::apps::v1::Deployment;
use k8s_openapi::api::core::v1::{Node, Pod};
use regex::Regex;
use std::collections::BTreeMap;
use tracing::info;

const CEPH_CLUSTERS: [&str; 2] = ["ceph-hdd", "ceph-ssd"];
const RBD_STORAGE_CLASSES: [&str; 2] = ["ceph-hdd-block", "ceph-ssd-block"];
const RGW_NAMESPACE: &str = "test-rook-rgw";
const ZONE_LABEL: &str = "topology.kubernetes.io/zone";

const LOAD_FOR_CS: &str = indoc! {r#"
    apiVersion: apps/v1
    kind: Deployment
    metadata:
      name: addload-for-cs
      namespace: default
    spec:
      replicas: 2
      selector:
        matchLabels:
          app: addload
      template:
        metadata:
          labels:
            app: addload
        spec:
          affinity:
            podAntiAffinity:
              requiredDuringSchedulingIgnoredDuringExecution:
              - labelSelector:
                  matchExpressions:
                  - key: app
                    operator: In
                    values:
                    - addload
                topologyKey: "kubernetes.io/hostname"
          containers:
          - name: spread-test-ubuntu
            image: quay.io/cybozu/ubuntu:20.04
            command:
            - "/usr/local/bin/pause"
            securityContext:
              runAsUser: 10000
              runAsGroup: 10000
            resources:
              requests:
                cpu: "2"
"#};

const LOAD_FOR_SS: &str = indoc! {r#"
    apiVersion: apps/v1
    kind: Deployment
    metadata:
      name: addload-for-ss
      namespace: default
    spec:
      replicas: 2
      selector:
        matchLabels:
          app: addload
      template:
        metadata:
          labels:
            app: addload
        spec:
          affinity:
            podAntiAffinity:
              requiredDuringSchedulingIgnoredDuringExecution:
              - labelSelector:
                  matchExpressions:
                  - key: app
                    operator: In
                    values:
                    - addload
                topologyKey: "kubernetes.io/hostname"
          containers:
          - name: spread-test-ubuntu
            image: quay.io/cybozu/ubuntu:20.04
            command:
            - "/usr/local/bin/pause"
            securityContext:
              runAsUser: 10000
              runAsGroup: 10000
            resources:
              requests:
                cpu: "1"
          nodeSelector:
            cke.cybozu.com/role: ss
          tolerations:
          - key: cke.cybozu.com/role
            operator: Equal
            value: storage
"#};

fn rgw_pod(namespace: &str) -> String {
    formatdoc! {r#"
        apiVersion: v1
        kind: Pod
        metadata:
          name: pod-ob
          namespace: {namespace}
        spec:
          containers:
          - name: mycontainer
            image: quay.io/cybozu/ubuntu-debug:20.04
            imagePullPolicy: Always
            args:
            - infinity
            command:
            - sleep
            envFrom:
            - configMapRef:
                name: pod-ob
            - secretRef:
                name: pod-ob
    "#, namespace = namespace}
}

fn rgw_bucket_and_pod(namespace: &str) -> String {
    formatdoc! {r#"
        apiVersion: objectbucket.io/v1alpha1
        kind: ObjectBucketClaim
        metadata:
          name: pod-ob
          namespace: {namespace}
        spec:
          generateBucketName: obc-poc
          storageClassName: ceph-hdd-bucket
        ---
        {pod}"#,
        namespace = namespace,
        pod = rgw_pod(namespace),
    }
}

fn rbd_pod(storage_class: &str) -> String {
    formatdoc! {r#"
        kind: PersistentVolumeClaim
        apiVersion: v1
        metadata:
          name: pvc-rbd
        spec:
          accessModes:
          - ReadWriteOnce
          resources:
            requests:
              storage: 1Gi
          storageClassName: {storage_class}
        ---
        apiVersion: v1
        kind: Pod
        metadata:
          name: pod-rbd
          labels:
            app.kubernetes.io/name: pod-rbd
        spec:
          containers:
          - name: ubuntu
            image: quay.io/cybozu/ubuntu-debug:20.04
            imagePullPolicy: Always
            command: ["/usr/local/bin/pause"]
            volumeMounts:
            - mountPath: /test1
              name: rbd-volume
          volumes:
          - name: rbd-volume
            persistentVolumeClaim:
              claimName: pvc-rbd
    "#, storage_class = storage_class}
}

fn rbd_namespace(storage_class: &str) -> String {
    format!("test-rook-rbd-{}", storage_class)
}

/// Rook version prefix expected on operator-managed deployments, derived
/// from the operator image tag (`rook:1.4.7.1` gives `v1.4.7`)
pub(crate) fn expected_rook_version(image: &str) -> Result<String> {
    let re = Regex::new(r":(.+)\.[\d]+$")?;
    let caps = re
        .captures(image)
        .ok_or_else(|| anyhow!("unexpected rook operator image {}", image))?;
    Ok(format!("v{}", &caps[1]))
}

/// Largest minus smallest count; zero for an empty map
pub(crate) fn spread<K>(counts: &BTreeMap<K, usize>) -> usize {
    let min = counts.values().min().copied().unwrap_or(0);
    let max = counts.values().max().copied().unwrap_or(0);
    max - min
}

fn node_name(pod: &Pod) -> String {
    pod.spec
        .as_ref()
        .and_then(|s| s.node_name.clone())
        .unwrap_or_default()
}

fn zone(node: &Node) -> String {
    node.metadata
        .labels
        .as_ref()
        .and_then(|l| l.get(ZONE_LABEL))
        .cloned()
        .unwrap_or_default()
}

/// Pods per zone, given pods per node
pub(crate) fn zone_counts(nodes: &[Node], node_counts: &BTreeMap<String, usize>) -> BTreeMap<String, usize> {
    let mut zones = BTreeMap::new();
    for node in nodes {
        let name = node.metadata.name.clone().unwrap_or_default();
        *zones.entry(zone(node)).or_default() += node_counts.get(&name).copied().unwrap_or(0);
    }
    zones
}

/// Run `sh -c <script>` in the RGW test pod; the script is double-quoted for the remote shell
async fn in_rgw_pod(kubectl: &Kubectl, script: &str) -> Result<String> {
    let quoted = format!("\"{}\"", script);
    let out = kubectl
        .exec_in(RGW_NAMESPACE, "pod-ob", &["sh", "-c", &quoted])
        .await
        .with_context(|| format!("failed to run {}", script))?;
    Ok(out.stdout)
}

const S3_OPTS: &str = r"--no-ssl --host=\${BUCKET_HOST} --host-bucket=";

async fn wait_rgw(ctx: &Context) -> Result<()> {
    let kubectl = &ctx.kubectl;
    let script = format!(r"s3cmd ls s3://\${{BUCKET_NAME}}/ {}", S3_OPTS);
    let script = script.as_str();
    ctx.poller
        .eventually(move || async move { in_rgw_pod(kubectl, script).await })
        .await?;
    Ok(())
}

async fn put_object(kubectl: &Kubectl, key: &str) -> Result<()> {
    in_rgw_pod(kubectl, "echo foobar > /tmp/foobar").await?;
    in_rgw_pod(
        kubectl,
        &format!(r"s3cmd put /tmp/foobar {} s3://\${{BUCKET_NAME}}/{}", S3_OPTS, key),
    )
    .await?;
    Ok(())
}

async fn get_object(kubectl: &Kubectl, key: &str) -> Result<()> {
    in_rgw_pod(
        kubectl,
        &format!(r"s3cmd get s3://\${{BUCKET_NAME}}/{} /tmp/downloaded {}", key, S3_OPTS),
    )
    .await?;
    let out = kubectl
        .exec_in(RGW_NAMESPACE, "pod-ob", &["cat", "/tmp/downloaded"])
        .await?;
    ensure!(out.stdout == "foobar\n", "unexpected object content: {:?}", out.stdout);
    Ok(())
}

/// Deploy pods that occupy CPU so ceph daemons must spread
pub struct PrepareLoadPods;

#[async_trait]
impl Scenario for PrepareLoadPods {
    fn name(&self) -> &str {
        "prepareLoadPods"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        kubectl.apply(LOAD_FOR_CS).await?;
        kubectl.apply(LOAD_FOR_SS).await?;

        for name in ["addload-for-cs", "addload-for-ss"] {
            ctx.poller
                .eventually(move || async move {
                    let d: Deployment = kubectl.get(&["deployment", name]).await?;
                    deployment_available(&d, 2)
                })
                .await?;
        }
        Ok(())
    }
}

/// Create the RGW and RBD test workloads
pub struct PrepareRookCeph;

async fn prepare_rook_ceph(kubectl: &Kubectl) -> Result<()> {
    kubectl.recreate_namespace(RGW_NAMESPACE).await?;
    kubectl
        .apply(&rgw_bucket_and_pod(RGW_NAMESPACE))
        .await
        .context("failed to apply OBC and pod")?;

    for sc in RBD_STORAGE_CLASSES {
        let ns = rbd_namespace(sc);
        kubectl.recreate_namespace(&ns).await?;
        kubectl
            .apply_in(&ns, &rbd_pod(sc))
            .await
            .with_context(|| format!("failed to apply RBD pod in {}", ns))?;
    }
    Ok(())
}

#[async_trait]
impl Scenario for PrepareRookCeph {
    fn name(&self) -> &str {
        "preparing rook-ceph"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        prepare_rook_ceph(&ctx.kubectl).await
    }
}

async fn check_rook_operator(ctx: &Context, ns: &str) -> Result<()> {
    let kubectl = &ctx.kubectl;
    let ns_flag = format!("--namespace={}", ns);
    let ns_flag = ns_flag.as_str();

    ctx.poller
        .eventually(move || async move {
            let d: Deployment = kubectl.get(&[ns_flag, "deployment/rook-ceph-operator"]).await?;
            deployment_available(&d, 1)
        })
        .await?;

    ctx.poller
        .eventually(move || async move {
            let d: Deployment = kubectl.get(&[ns_flag, "deployment/rook-ceph-tools"]).await?;
            deployment_available(&d, 1)?;
            let pods = kubectl.pods(ns, "app=rook-ceph-tools").await?;
            let pod = pods
                .first()
                .and_then(|p| p.metadata.name.clone())
                .ok_or_else(|| anyhow!("no rook-ceph-tools pod"))?;
            kubectl.exec_in(ns, &pod, &["ceph", "status"]).await?;
            anyhow::Ok(())
        })
        .await?;

    info!(namespace = %ns, "Rook operator and tools ready");
    Ok(())
}

async fn jsonpath_number(kubectl: &Kubectl, args: &[&str], path: &str) -> Result<usize> {
    let out = kubectl.jsonpath(args, &format!("'{}'", path)).await?;
    out.trim()
        .parse()
        .with_context(|| format!("{} is not a number: {:?}", path, out))
}

async fn check_cluster_stable(ctx: &Context, ns: &str) -> Result<()> {
    let kubectl = &ctx.kubectl;
    let ns_flag = format!("--namespace={}", ns);
    let ns_flag = ns_flag.as_str();

    let operator: Deployment = kubectl.get(&[ns_flag, "deployment/rook-ceph-operator"]).await?;
    let image = operator
        .spec
        .as_ref()
        .and_then(|s| s.template.spec.as_ref())
        .and_then(|s| s.containers.first())
        .and_then(|c| c.image.clone())
        .unwrap_or_default();
    let rook_version = expected_rook_version(&image)?;
    let rook_version = rook_version.as_str();

    let mons = jsonpath_number(kubectl, &[ns_flag, "cephcluster", ns], "{.spec.mon.count}").await?;
    let osds = jsonpath_number(
        kubectl,
        &[ns_flag, "cephcluster", ns],
        "{.spec.storage.storageClassDeviceSets[0].count}",
    )
    .await?;
    let rgws = if ns == "ceph-hdd" {
        let store = format!("{}-object-store", ns);
        jsonpath_number(kubectl, &[ns_flag, "cephobjectstore", &store], "{.spec.gateway.instances}").await?
    } else {
        0
    };

    ctx.poller
        .eventually(move || async move {
            let deployments: ItemList<Deployment> = kubectl.get(&[ns_flag, "deployment"]).await?;
            let mut counts: BTreeMap<&str, usize> = BTreeMap::new();

            for d in &deployments.items {
                let name = d.metadata.name.as_deref().unwrap_or_default();
                let labels = d.metadata.labels.as_ref();
                if let Some(app) = labels.and_then(|l| l.get("app")) {
                    *counts.entry(app.as_str()).or_default() += 1;
                }

                // rook-ceph-operator and rook-ceph-tools carry no rook-version label
                if let Some(version) = labels.and_then(|l| l.get("rook-version")) {
                    if !version.starts_with(rook_version) {
                        bail!("unexpected rook version {} on {}/{}", version, ns, name);
                    }
                }

                deployment_fully_available(d)?;
            }

            for (app, expected) in [("rook-ceph-mon", mons), ("rook-ceph-osd", osds), ("rook-ceph-rgw", rgws)] {
                let actual = counts.get(app).copied().unwrap_or(0);
                if actual != expected {
                    bail!("number of {} is {}, expected is {}", app, actual, expected);
                }
            }
            anyhow::Ok(())
        })
        .await?;

    ctx.poller
        .eventually(move || async move {
            let pods: ItemList<Pod> = kubectl.get(&[ns_flag, "pod"]).await?;
            for pod in &pods.items {
                let phase = pod.status.as_ref().and_then(|s| s.phase.as_deref()).unwrap_or_default();
                if phase != "Running" && phase != "Succeeded" {
                    bail!(
                        "pod status is not running: {}/{}",
                        ns,
                        pod.metadata.name.as_deref().unwrap_or_default()
                    );
                }
            }
            anyhow::Ok(())
        })
        .await?;

    info!(namespace = %ns, mons, osds, rgws, "Ceph cluster stable");
    Ok(())
}

async fn pods_per_node(kubectl: &Kubectl, ns: &str, selector: &str) -> Result<BTreeMap<String, usize>> {
    let mut counts = BTreeMap::new();
    for pod in kubectl.pods(ns, selector).await? {
        *counts.entry(node_name(&pod)).or_default() += 1;
    }
    Ok(counts)
}

async fn nodes_with_role(kubectl: &Kubectl, role: &str) -> Result<Vec<Node>> {
    let selector = format!("node-role.kubernetes.io/{}=true", role);
    let nodes: ItemList<Node> = kubectl.get(&["node", "-l", &selector]).await?;
    Ok(nodes.items)
}

/// One MON per node, on three nodes
async fn check_mon_spread(kubectl: &Kubectl, ns: &str) -> Result<()> {
    let counts = pods_per_node(kubectl, ns, "app=rook-ceph-mon").await?;
    for (node, count) in &counts {
        ensure!(*count == 1, "{} MONs on node {}", count, node);
    }
    ensure!(counts.len() == 3, "MONs are on {} nodes: {:?}", counts.len(), counts);
    Ok(())
}

/// OSDs differ by at most one per node and per zone
async fn check_osd_spread(kubectl: &Kubectl, ns: &str, role: &str) -> Result<()> {
    let nodes = nodes_with_role(kubectl, role).await?;
    let mut counts: BTreeMap<String, usize> = nodes
        .iter()
        .filter_map(|n| n.metadata.name.clone())
        .map(|n| (n, 0))
        .collect();
    for (node, count) in pods_per_node(kubectl, ns, "app=rook-ceph-osd").await? {
        *counts.entry(node).or_default() += count;
    }
    ensure!(spread(&counts) <= 1, "OSDs are unbalanced across nodes: {:?}", counts);

    let zones = zone_counts(&nodes, &counts);
    ensure!(spread(&zones) <= 1, "OSDs are unbalanced across zones: {:?}", zones);
    Ok(())
}

async fn check_rgw(ctx: &Context) -> Result<()> {
    wait_rgw(ctx).await?;
    put_object(&ctx.kubectl, "").await?;

    let listing = in_rgw_pod(
        &ctx.kubectl,
        &format!(r"s3cmd ls s3://\${{BUCKET_NAME}} {} s3://\${{BUCKET_NAME}}", S3_OPTS),
    )
    .await
    .unwrap_or_default();
    ensure!(!listing.is_empty(), "bucket listing is empty");

    get_object(&ctx.kubectl, "foobar").await
}

async fn check_rbd(ctx: &Context, storage_class: &str) -> Result<()> {
    let kubectl = &ctx.kubectl;
    let ns = rbd_namespace(storage_class);
    let ns = ns.as_str();

    ctx.poller
        .eventually(move || async move {
            kubectl.exec_in(ns, "pod-rbd", &["mountpoint", "-d", "/test1"]).await
        })
        .await?;

    let path = "/test1/test.txt";
    kubectl.exec_in(ns, "pod-rbd", &["cp", "/etc/passwd", path]).await?;
    kubectl.exec_in(ns, "pod-rbd", &["sync"]).await?;
    kubectl.exec_in(ns, "pod-rbd", &["cat", path]).await?;
    Ok(())
}

pub struct RookCeph;

#[async_trait]
impl Scenario for RookCeph {
    fn name(&self) -> &str {
        "rook-ceph"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        for ns in CEPH_CLUSTERS {
            check_rook_operator(ctx, ns).await?;
        }
        for ns in CEPH_CLUSTERS {
            check_cluster_stable(ctx, ns).await?;
        }
        check_osd_spread(&ctx.kubectl, "ceph-hdd", "ss").await?;
        check_osd_spread(&ctx.kubectl, "ceph-ssd", "cs").await?;
        for ns in CEPH_CLUSTERS {
            check_mon_spread(&ctx.kubectl, ns).await?;
        }
        check_rgw(ctx).await?;
        for sc in RBD_STORAGE_CLASSES {
            check_rbd(ctx, sc).await?;
        }
        Ok(())
    }
}

/// Store an object through RGW before the nodes reboot
pub struct PrepareRebootRookCeph;

#[async_trait]
impl Scenario for PrepareRebootRookCeph {
    fn name(&self) -> &str {
        "prepare reboot rook-ceph"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        prepare_rook_ceph(&ctx.kubectl).await?;
        wait_rgw(ctx).await?;
        put_object(&ctx.kubectl, "foobar_reboot").await
    }
}

/// The object stored before reboot is still readable
pub struct RebootRookCeph;

#[async_trait]
impl Scenario for RebootRookCeph {
    fn name(&self) -> &str {
        "reboot rook-ceph"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        ctx.kubectl
            .apply(&rgw_pod(RGW_NAMESPACE))
            .await
            .context("failed to recreate pod-ob")?;
        wait_rgw(ctx).await?;
        get_object(&ctx.kubectl, "foobar_reboot").await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ObjectMeta;

    #[test]
    fn test_expected_rook_version() {
        assert_eq!(
            expected_rook_version("quay.io/cybozu/rook:1.4.7.1").unwrap(),
            "v1.4.7"
        );
        assert!(expected_rook_version("rook").is_err());
    }

    #[test]
    fn test_spread() {
        let counts: BTreeMap<&str, usize> = [("a", 2), ("b", 1), ("c", 2)].into();
        assert_eq!(spread(&counts), 1);

        let counts: BTreeMap<&str, usize> = [("a", 3), ("b", 0)].into();
        assert_eq!(spread(&counts), 3);

        assert_eq!(spread(&BTreeMap::<&str, usize>::new()), 0);
    }

    #[test]
    fn test_zone_counts() {
        let node = |name: &str, zone: &str| Node {
            metadata: ObjectMeta {
                name: Some(name.to_string()),
                labels: Some([(ZONE_LABEL.to_string(), zone.to_string())].into()),
                ..Default::default()
            },
            ..Default::default()
        };
        let nodes = vec![node("ss-0", "rack0"), node("ss-1", "rack0"), node("ss-2", "rack1")];
        let counts: BTreeMap<String, usize> =
            [("ss-0".to_string(), 1), ("ss-1".to_string(), 2)].into();

        let zones = zone_counts(&nodes, &counts);
        assert_eq!(zones["rack0"], 3);
        assert_eq!(zones["rack1"], 0);
    }

    #[test]
    fn test_manifests_parse() {
        for text in [
            LOAD_FOR_CS.to_string(),
            LOAD_FOR_SS.to_string(),
            rgw_bucket_and_pod(RGW_NAMESPACE),
            rbd_pod("ceph-hdd-block"),
        ] {
            crate::manifest::documents(&text).unwrap();
        }
        assert_eq!(
            crate::manifest::documents(&rgw_bucket_and_pod("x")).unwrap().len(),
            2
        );
    }
}
