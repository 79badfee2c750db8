//! Calico network policies: DNS, ICMP filtering and the TCP allow/deny matrix

use crate::exec::{CommandOutput, ExecError, Host, TIMEOUT_EXIT_CODE};
use crate::kubectl::ItemList;
use crate::suite::{CheckResult, Context, Scenario};
use anyhow::{anyhow, bail, ensure, Context as _, Result};
use async_trait::async_trait;
use indoc::indoc;
use k8s_openapi::api::core::v1::Pod;
use serde::Deserialize;
use tracing::{debug, info};

const NAMESPACE: &str = "test-netpol";

/// Port no policy opens
const DENIED_PORT: u16 = 65535;

const TESTHTTPD: &str = indoc! {r#"
    apiVersion: apps/v1
    kind: Deployment
    metadata:
      name: testhttpd
      namespace: test-netpol
    spec:
      replicas: 2
      selector:
        matchLabels:
          run: testhttpd
      template:
        metadata:
          labels:
            run: testhttpd
        spec:
          containers:
          - image: quay.io/cybozu/testhttpd:0
            name: testhttpd
          restartPolicy: Always
    ---
    apiVersion: v1
    kind: Service
    metadata:
      name: testhttpd
      namespace: test-netpol
    spec:
      ports:
      - port: 80
        protocol: TCP
        targetPort: 8000
      selector:
        run: testhttpd
    ---
    apiVersion: crd.projectcalico.org/v1
    kind: NetworkPolicy
    metadata:
      name: ingress-httpdtest
      namespace: test-netpol
    spec:
      order: 1000.0
      selector: run == 'testhttpd'
      types:
        - Ingress
      ingress:
        - action: Allow
          protocol: TCP
          destination:
            ports:
              - 8000
"#};

const UBUNTU_DEBUG: &str = indoc! {r#"
    apiVersion: v1
    kind: Pod
    metadata:
      name: ubuntu
      labels:
        app: ubuntu
    spec:
      securityContext:
        runAsUser: 10000
        runAsGroup: 10000
      containers:
      - name: ubuntu
        image: quay.io/cybozu/ubuntu-debug:18.04
        command: ["sleep", "infinity"]
"#};

/// Pods that must accept `ports` and drop everything else
pub(crate) struct PortCase {
    pub namespace: &'static str,
    pub selector: &'static str,
    pub ports: &'static [u16],
}

pub(crate) const PORT_CASES: &[PortCase] = &[
    PortCase { namespace: "argocd", selector: "app.kubernetes.io/name=argocd-application-controller", ports: &[8082] },
    PortCase { namespace: "argocd", selector: "app.kubernetes.io/name=argocd-redis", ports: &[6379] },
    PortCase { namespace: "argocd", selector: "app.kubernetes.io/name=argocd-repo-server", ports: &[8081, 8084] },
    PortCase { namespace: "argocd", selector: "app.kubernetes.io/name=argocd-server", ports: &[8080, 8083] },
    PortCase { namespace: "external-dns", selector: "app=cert-manager", ports: &[9402] },
    PortCase { namespace: "external-dns", selector: "app=webhook", ports: &[6443] },
    PortCase { namespace: "external-dns", selector: "app.kubernetes.io/name=external-dns", ports: &[7979] },
    PortCase { namespace: "ingress", selector: "app=contour", ports: &[8002, 8080, 8443] },
    PortCase { namespace: "internet-egress", selector: "k8s-app=squid", ports: &[3128] },
    PortCase { namespace: "internet-egress", selector: "k8s-app=unbound", ports: &[53] },
    PortCase { namespace: "kube-system", selector: "cke.cybozu.com/appname=cluster-dns", ports: &[1053, 8080] },
    PortCase { namespace: "kube-system", selector: "k8s-app=kube-state-metrics", ports: &[8080, 8081] },
    PortCase { namespace: "metallb-system", selector: "component=controller", ports: &[7472] },
    PortCase { namespace: "monitoring", selector: "app=alertmanager", ports: &[9093] },
    PortCase { namespace: "monitoring", selector: "app=prometheus", ports: &[9090] },
];

/// Subset of a sabakan machine
#[derive(Debug, Deserialize)]
pub(crate) struct Machine {
    pub spec: MachineSpec,
}

#[derive(Debug, Deserialize)]
pub(crate) struct MachineSpec {
    pub bmc: Bmc,
}

#[derive(Debug, Deserialize)]
pub(crate) struct Bmc {
    pub ipv4: String,
}

/// Whether a `timeout 3s telnet` probe was dropped by a policy
///
/// Refused connections exit non-zero too; only the timeout exit code means
/// the packets were filtered.
pub(crate) fn probe_filtered(result: &Result<CommandOutput, ExecError>) -> Result<bool> {
    match result {
        Ok(_) => Ok(false),
        Err(e) if e.exit_code() == Some(TIMEOUT_EXIT_CODE) => Ok(true),
        Err(e @ ExecError::Failed { .. }) => {
            debug!(error = %e, "telnet probe failed without timing out");
            Ok(false)
        }
        Err(e) => Err(anyhow!("failed to run telnet: {}", e)),
    }
}

/// Pod IPs of every pod not on the host network
pub(crate) fn pod_network_ips(pods: &[Pod]) -> Vec<(String, String)> {
    pods.iter()
        .filter(|p| !p.spec.as_ref().and_then(|s| s.host_network).unwrap_or(false))
        .filter_map(|p| {
            let ip = p.status.as_ref()?.pod_ip.clone()?;
            Some((p.metadata.name.clone().unwrap_or_default(), ip))
        })
        .collect()
}

async fn telnet(boot0: &Host, ip: &str, port: u16) -> Result<bool> {
    let port = port.to_string();
    let result = boot0
        .exec_with_input(b"Xclose", &["timeout", "3s", "telnet", ip, &port, "-e", "X"])
        .await;
    probe_filtered(&result)
}

pub struct PrepareNetworkPolicy;

#[async_trait]
impl Scenario for PrepareNetworkPolicy {
    fn name(&self) -> &str {
        "preparing network-policy"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        kubectl
            .run(&["delete", "namespace", NAMESPACE, "--ignore-not-found=true"])
            .await?;
        kubectl.run(&["create", "namespace", NAMESPACE]).await?;

        kubectl.apply(TESTHTTPD).await.context("failed to deploy testhttpd")?;
        kubectl.apply(UBUNTU_DEBUG).await.context("failed to deploy ubuntu")?;
        Ok(())
    }
}

pub struct NetworkPolicy;

impl NetworkPolicy {
    async fn check_dns(ctx: &Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        ctx.poller
            .eventually(move || async move { kubectl.run(&["exec", "ubuntu", "--", "date"]).await })
            .await
            .context("ubuntu pod did not start")?;

        for name in ["testhttpd.test-netpol", "cybozu.com"] {
            ctx.poller
                .eventually(move || async move {
                    kubectl
                        .run(&["exec", "ubuntu", "--", "nslookup", "-timeout=10", name])
                        .await
                })
                .await
                .with_context(|| format!("failed to resolve {}", name))?;
        }
        Ok(())
    }

    async fn check_icmp(ctx: &Context, pods: &[Pod]) -> CheckResult {
        let boot0 = ctx.boot0();
        for (name, ip) in pod_network_ips(pods) {
            debug!(pod = %name, ip = %ip, "ping");
            if let Ok(out) = boot0.exec(&["ping", "-c", "1", "-W", "3", &ip]).await {
                bail!("ping to {} ({}) succeeded: {}", name, ip, out.stdout);
            }
        }
        Ok(())
    }

    async fn check_tcp(ctx: &Context, testhttpd_ip: &str) -> CheckResult {
        let kubectl = &ctx.kubectl;
        let boot0 = ctx.boot0();

        for case in PORT_CASES {
            let list: ItemList<Pod> = kubectl
                .get(&["-n", case.namespace, "-l", case.selector, "pods"])
                .await?;

            for (name, ip) in pod_network_ips(&list.items) {
                for &port in case.ports {
                    ensure!(
                        !telnet(boot0, &ip, port).await?,
                        "{}/{} port {} should be allowed",
                        case.namespace,
                        name,
                        port
                    );
                }
                ensure!(
                    telnet(boot0, &ip, DENIED_PORT).await?,
                    "{}/{} port {} should be denied",
                    case.namespace,
                    name,
                    DENIED_PORT
                );

                if case.namespace == "internet-egress" {
                    let res = kubectl
                        .exec_in(case.namespace, &name, &["curl", testhttpd_ip, "-m", "5"])
                        .await;
                    ensure!(res.is_err(), "{} could reach a local IP", name);
                }
            }
            info!(namespace = case.namespace, selector = case.selector, "Network policy enforced");
        }
        Ok(())
    }

    async fn check_bmc(ctx: &Context) -> CheckResult {
        let stdout = ctx.boot0().stdout(&["sabactl", "machines", "get"]).await?;
        let machines: Vec<Machine> = serde_json::from_str(&stdout)?;
        for m in &machines {
            let ip = m.spec.bmc.ipv4.as_str();
            let res = ctx
                .kubectl
                .run(&["exec", "ubuntu", "--", "ping", "-c", "1", "-W", "3", ip])
                .await;
            ensure!(res.is_err(), "ping to BMC {} succeeded", ip);
        }
        Ok(())
    }
}

#[async_trait]
impl Scenario for NetworkPolicy {
    fn name(&self) -> &str {
        "network-policy"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        Self::check_dns(ctx).await?;

        let all: ItemList<Pod> = ctx.kubectl.get(&["pods", "-A"]).await?;
        let testhttpd: ItemList<Pod> = ctx.kubectl.get(&["pods", "-n", NAMESPACE]).await?;
        let testhttpd_ip = pod_network_ips(&testhttpd.items)
            .into_iter()
            .next()
            .map(|(_, ip)| ip)
            .ok_or_else(|| anyhow!("no testhttpd pod in {}", NAMESPACE))?;

        Self::check_icmp(ctx, &all.items).await?;
        Self::check_tcp(ctx, &testhttpd_ip).await?;
        Self::check_bmc(ctx).await
    }
}
