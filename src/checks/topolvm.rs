//! TopoLVM volumes and pvc-autoresizer

use crate::prometheus::{PodApi, Sample};
use crate::suite::{CheckResult, Context, Scenario};
use anyhow::{anyhow, bail, ensure, Context as _};
use async_trait::async_trait;
use indoc::indoc;
use k8s_openapi::api::policy::v1::PodDisruptionBudget;
use tracing::info;

const NAMESPACE: &str = "test-topolvm";
const PVC: &str = "topo-pvc";
const ONE_GIB: f64 = (1u64 << 30) as f64;

const POD_AND_PVC: &str = indoc! {r#"
    apiVersion: v1
    kind: Pod
    metadata:
      name: ubuntu
      labels:
        app.kubernetes.io/name: ubuntu
    spec:
      containers:
      - name: ubuntu
        image: quay.io/cybozu/ubuntu:20.04
        command: ["/usr/local/bin/pause"]
        volumeMounts:
        - name: my-volume
          mountPath: /test1
      volumes:
      - name: my-volume
        persistentVolumeClaim:
          claimName: topo-pvc
    ---
    apiVersion: v1
    kind: PersistentVolumeClaim
    metadata:
      name: topo-pvc
      annotations:
        resize.topolvm.io/threshold: 90%
        resize.topolvm.io/increase: 1Gi
    spec:
      accessModes:
      - ReadWriteOnce
      resources:
        requests:
          storage: 1Gi
        limits:
          storage: 3Gi
      storageClassName: topolvm-provisioner
"#};

/// Capacity reported for one PVC, if any
pub(crate) fn pvc_capacity<'a>(samples: &'a [Sample], namespace: &str, pvc: &str) -> Option<&'a Sample> {
    samples.iter().find(|s| {
        s.metric.get("namespace").map(String::as_str) == Some(namespace)
            && s.metric.get("persistentvolumeclaim").map(String::as_str) == Some(pvc)
    })
}

/// Filesystem type column of a `/proc/mounts` line
pub(crate) fn mount_fs_type(line: &str) -> Option<&str> {
    line.split_whitespace().nth(2)
}

pub struct PrepareTopoLVM;

#[async_trait]
impl Scenario for PrepareTopoLVM {
    fn name(&self) -> &str {
        "preparing topolvm"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        ctx.kubectl.recreate_namespace(NAMESPACE).await?;
        ctx.kubectl
            .apply_in(NAMESPACE, POD_AND_PVC)
            .await
            .context("failed to create pod and PVC")?;
        Ok(())
    }
}

pub struct TopoLVM;

impl TopoLVM {
    async fn check_pod(ctx: &Context) -> CheckResult {
        let kubectl = &ctx.kubectl;

        let pdb: PodDisruptionBudget = kubectl
            .get(&["poddisruptionbudgets", "controller-pdb", "-n", "topolvm-system"])
            .await?;
        let healthy = pdb.status.map(|s| s.current_healthy).unwrap_or(0);
        ensure!(healthy == 2, "controller-pdb currentHealthy is {}", healthy);

        ctx.poller
            .eventually(move || async move {
                kubectl
                    .exec_in(NAMESPACE, "ubuntu", &["mountpoint", "-d", "/test1"])
                    .await
                    .context("failed to check mount point")?;
                let mounts = kubectl
                    .exec_in(NAMESPACE, "ubuntu", &["grep", "/test1", "/proc/mounts"])
                    .await?;
                match mount_fs_type(&mounts.stdout) {
                    Some("xfs") => anyhow::Ok(()),
                    Some(_) => bail!("/test1 is not xfs"),
                    None => bail!("invalid mount information: {}", mounts.stdout),
                }
            })
            .await?;

        let path = "/test1/bootstrap.log";
        kubectl.exec_in(NAMESPACE, "ubuntu", &["cp", "/etc/passwd", path]).await?;
        kubectl.exec_in(NAMESPACE, "ubuntu", &["sync"]).await?;
        let out = kubectl.exec_in(NAMESPACE, "ubuntu", &["cat", path]).await?;
        ensure!(!out.stdout.trim().is_empty(), "{} is empty", path);
        Ok(())
    }

    async fn check_autoresizer(ctx: &Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        kubectl
            .exec_in(
                NAMESPACE,
                "ubuntu",
                &["dd", "if=/dev/zero", "of=/test1/largefile", "bs=1M", "count=110"],
            )
            .await?;

        let prometheus = PodApi::new(kubectl, "monitoring", "prometheus-0", 9090);
        let prometheus = &prometheus;
        ctx.poller
            .eventually(move || async move {
                let samples = prometheus.query("kubelet_volume_stats_capacity_bytes").await?;
                let sample = pvc_capacity(&samples, NAMESPACE, PVC)
                    .ok_or_else(|| anyhow!("no metric for PVC"))?;
                let capacity = sample.value()?;
                if capacity <= ONE_GIB {
                    bail!("filesystem capacity is under 1 GiB: {}", capacity);
                }
                info!(capacity, "PVC resized");
                anyhow::Ok(())
            })
            .await?;
        Ok(())
    }
}

#[async_trait]
impl Scenario for TopoLVM {
    fn name(&self) -> &str {
        "topolvm"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        Self::check_pod(ctx).await?;
        Self::check_autoresizer(ctx).await
    }
}
