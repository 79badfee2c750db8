//! Monitoring stack: Prometheus, Alertmanager, Pushgateway, Grafana and
//! VictoriaMetrics

use crate::assertions::{
    wait_deployment_available, wait_deployment_ready, wait_statefulset_ready,
};
use crate::certmanager::check_certificate;
use crate::config::Config;
use crate::kubectl::{ItemList, Kubectl};
use crate::manifest;
use crate::prometheus::{
    find_target, loaded_alert_names, loaded_record_names, scrape_contains, ActiveTarget, PodApi,
    RuleFile,
};
use crate::suite::{CheckResult, Context, Scenario};
use anyhow::{anyhow, bail, ensure, Context as _, Result};
use async_trait::async_trait;
use indoc::formatdoc;
use k8s_openapi::api::core::v1::{ConfigMap, Endpoints};
use serde::Deserialize;
use tracing::{info, warn};

const NAMESPACE: &str = "monitoring";

const PROMETHEUS_SELECTOR: &str = "app.kubernetes.io/name=prometheus";

/// One monitor-hw target belongs to a machine stopped in the test data center
const STOPPED_MACHINES: usize = 1;

const INGRESS_WATCHER_CONF: &str = "/etc/ingress-watcher/ingress-watcher.yaml";

const ALERT_RULES_DIR: &str = "monitoring/base/prometheus/alert_rules";
const RECORD_RULES_FILE: &str = "monitoring/base/prometheus/record_rules.yaml";

#[derive(Debug, Default, Deserialize)]
struct PrometheusConfig {
    #[serde(default)]
    scrape_configs: Vec<ScrapeConfig>,
}

#[derive(Debug, Deserialize)]
struct ScrapeConfig {
    job_name: String,
}

/// `/api/admin/stats` of Grafana
#[derive(Debug, Deserialize)]
pub(crate) struct GrafanaStats {
    #[serde(default)]
    pub dashboards: usize,
    #[serde(default)]
    pub datasources: usize,
}

fn pushgateway_proxies(config: &Config) -> String {
    formatdoc! {r#"
        apiVersion: projectcontour.io/v1
        kind: HTTPProxy
        metadata:
          name: pushgateway-bastion-test
          namespace: monitoring
          annotations:
            kubernetes.io/ingress.class: bastion
        spec:
          virtualhost:
            fqdn: {bastion}
          routes:
            - conditions:
                - prefix: /
              services:
                - name: pushgateway
                  port: 9091
        ---
        apiVersion: projectcontour.io/v1
        kind: HTTPProxy
        metadata:
          name: pushgateway-forest-test
          namespace: monitoring
          annotations:
            kubernetes.io/ingress.class: forest
        spec:
          virtualhost:
            fqdn: {forest}
          routes:
            - conditions:
                - prefix: /
              services:
                - name: pushgateway
                  port: 9091
        "#,
        bastion = config.bastion_pushgateway_fqdn(),
        forest = config.forest_pushgateway_fqdn(),
    }
}

fn ingress_health_proxy(name: &str, class: &str, fqdn: &str) -> String {
    formatdoc! {r#"
        apiVersion: projectcontour.io/v1
        kind: HTTPProxy
        metadata:
          name: {name}
          namespace: monitoring
          annotations:
            kubernetes.io/tls-acme: "true"
            kubernetes.io/ingress.class: {class}
        spec:
          virtualhost:
            fqdn: {fqdn}
            tls:
              secretName: {name}-tls
          routes:
            - conditions:
                - prefix: /
              services:
                - name: ingress-health-http
                  port: 80
              permitInsecure: true
              timeoutPolicy:
                response: 2m
                idle: 5m
        "#,
        name = name,
        class = class,
        fqdn = fqdn,
    }
}

fn grafana_proxy(fqdn: &str) -> String {
    formatdoc! {r#"
        apiVersion: projectcontour.io/v1
        kind: HTTPProxy
        metadata:
          name: grafana-test
          namespace: monitoring
          annotations:
            kubernetes.io/tls-acme: "true"
            kubernetes.io/ingress.class: bastion
        spec:
          virtualhost:
            fqdn: {fqdn}
            tls:
              secretName: grafana-test-tls
          routes:
            - conditions:
                - prefix: /
              services:
                - name: grafana-service
                  port: 3000
              timeoutPolicy:
                response: 2m
                idle: 5m
        "#,
        fqdn = fqdn,
    }
}

/// ingress-watcher probing both health FQDNs and pushing to the bastion Pushgateway
pub(crate) fn ingress_watcher_config(config: &Config) -> String {
    formatdoc! {r#"
        targetURLs:
        - https://{bastion}
        - http://{bastion}
        - https://{global}
        - http://{global}
        watchInterval: 10s

        instance: 1.2.3.4
        pushAddr: {pushgateway}
        pushInterval: 10s
        permitInsecure: true
        "#,
        bastion = config.bastion_health_fqdn(),
        global = config.global_health_fqdn(),
        pushgateway = config.bastion_pushgateway_fqdn(),
    }
}

/// First `scheme://fqdn` pair ingress-watcher has not reported a 200 for
pub(crate) fn missing_health_report(metrics: &str, fqdns: &[&str]) -> Option<String> {
    fqdns
        .iter()
        .flat_map(|fqdn| ["http", "https"].map(|scheme| format!("{}://{}", scheme, fqdn)))
        .find(|url| {
            let path = format!(r#"path="{}""#, url);
            !scrape_contains(
                metrics,
                "ingresswatcher_http_get_successful_total",
                &[r#"code="200"#, &path],
            )
        })
}

/// Job names of the `prometheus.yaml` found in any of the ConfigMaps
pub(crate) fn scrape_job_names(configmaps: &[ConfigMap]) -> Result<Vec<String>> {
    let data = configmaps
        .iter()
        .filter_map(|cm| cm.data.as_ref()?.get("prometheus.yaml"))
        .last()
        .ok_or_else(|| anyhow!("no ConfigMap holds prometheus.yaml"))?;

    let config: PrometheusConfig = serde_yaml::from_str(data)?;
    Ok(config.scrape_configs.into_iter().map(|c| c.job_name).collect())
}

/// Every job has an active target that is up, except stopped monitor-hw targets
pub(crate) fn check_scrape_targets(jobs: &[String], targets: &[ActiveTarget]) -> Result<()> {
    let mut down_monitor_hw = 0;
    for job in jobs {
        let target =
            find_target(job, targets).ok_or_else(|| anyhow!("target is not found, job_name: {}", job))?;
        if target.is_up() {
            continue;
        }
        if target.label("job") != Some("monitor-hw") {
            bail!("target is not 'up', job_name: {}, health: {:?}", job, target.health);
        }
        down_monitor_hw += 1;
        if down_monitor_hw > STOPPED_MACHINES {
            bail!("two or more monitor-hw jobs are not up");
        }
    }
    Ok(())
}

pub(crate) fn check_endpoints(ep: &Endpoints) -> Result<()> {
    let subsets = ep.subsets.as_deref().unwrap_or_default();
    let [subset] = subsets else {
        bail!("expected 1 endpoint subset, got {}", subsets.len());
    };
    ensure!(
        !subset.addresses.as_deref().unwrap_or_default().is_empty(),
        "no address in endpoints"
    );
    ensure!(
        !subset.ports.as_deref().unwrap_or_default().is_empty(),
        "no port in endpoints"
    );
    Ok(())
}

pub(crate) fn check_grafana_stats(stats: &GrafanaStats) -> Result<()> {
    ensure!(stats.datasources > 0, "no data sources");
    ensure!(stats.dashboards > 0, "no dashboards");
    Ok(())
}

/// GET `path` from the only pod matching `selector`, until it answers
async fn wait_pod_replies(kubectl: &Kubectl, selector: &str, port: u16, path: &str) -> Result<()> {
    kubectl
        .poller()
        .eventually(move || async move {
            let pod = kubectl.single_pod_name(NAMESPACE, selector).await?;
            PodApi::new(kubectl, NAMESPACE, pod, port).get(path).await?;
            anyhow::Ok(())
        })
        .await?;
    Ok(())
}

/// GET `path` from each of `count` pods matching `selector`, until all answer
async fn wait_pods_reply(
    kubectl: &Kubectl,
    selector: &str,
    count: usize,
    port: u16,
    path: &str,
) -> Result<()> {
    kubectl
        .poller()
        .eventually(move || async move {
            let pods = kubectl.pods(NAMESPACE, selector).await?;
            ensure!(
                pods.len() == count,
                "expected {} pods matching {}, got {}",
                count,
                selector,
                pods.len()
            );
            for pod in &pods {
                let name = pod.metadata.name.as_deref().unwrap_or_default();
                PodApi::new(kubectl, NAMESPACE, name, port).get(path).await?;
            }
            anyhow::Ok(())
        })
        .await?;
    Ok(())
}

async fn prometheus_pod(ctx: &Context) -> Result<String> {
    let kubectl = &ctx.kubectl;
    let name = ctx
        .poller
        .eventually(move || async move { kubectl.single_pod_name(NAMESPACE, PROMETHEUS_SELECTOR).await })
        .await?;
    Ok(name)
}

fn expected_alert_names(ctx: &Context) -> Result<Vec<String>> {
    let mut names = Vec::new();
    for (path, text) in manifest::read_tree(&ctx.config.manifest_dir.join(ALERT_RULES_DIR))? {
        let file: RuleFile = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to unmarshal {}", path.display()))?;
        names.extend(file.alert_names().map(str::to_string));
    }
    names.sort();
    Ok(names)
}

fn expected_record_names(ctx: &Context) -> Result<Vec<String>> {
    let path = ctx.config.manifest_dir.join(RECORD_RULES_FILE);
    let text = std::fs::read_to_string(&path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let file: RuleFile = serde_yaml::from_str(&text)?;
    let mut names: Vec<String> = file.record_names().map(str::to_string).collect();
    names.sort();
    Ok(names)
}

fn compare_rule_names(kind: &str, actual: &[String], expected: &[String]) -> Result<()> {
    ensure!(!actual.is_empty(), "no {} rules loaded", kind);
    ensure!(!expected.is_empty(), "no {} rules in the repository", kind);
    ensure!(
        actual == expected,
        "{} rules differ\nactual   = {:?}\nexpected = {:?}",
        kind,
        actual,
        expected
    );
    Ok(())
}

pub struct PreparePushgateway;

#[async_trait]
impl Scenario for PreparePushgateway {
    fn name(&self) -> &str {
        "preparing pushgateway"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        ctx.kubectl
            .apply(&pushgateway_proxies(&ctx.config))
            .await
            .context("failed to create HTTPProxy for Pushgateway")?;
        Ok(())
    }
}

pub struct PrepareIngressHealth;

#[async_trait]
impl Scenario for PrepareIngressHealth {
    fn name(&self) -> &str {
        "preparing ingress-health"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let manifest = [
            ingress_health_proxy("ingress-health-global-test", "global", &ctx.config.global_health_fqdn()),
            ingress_health_proxy("ingress-health-bastion-test", "bastion", &ctx.config.bastion_health_fqdn()),
        ]
        .join("---\n");
        ctx.kubectl
            .apply(&manifest)
            .await
            .context("failed to create HTTPProxy for ingress-watcher")?;
        Ok(())
    }
}

pub struct PrepareGrafanaOperator;

#[async_trait]
impl Scenario for PrepareGrafanaOperator {
    fn name(&self) -> &str {
        "preparing grafana-operator"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        ctx.kubectl
            .apply(&grafana_proxy(&ctx.config.grafana_fqdn()))
            .await
            .context("failed to create HTTPProxy for grafana")?;
        Ok(())
    }
}

pub struct MachinesEndpoints;

#[async_trait]
impl Scenario for MachinesEndpoints {
    fn name(&self) -> &str {
        "machines-endpoints"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        ctx.poller
            .eventually(move || async move {
                kubectl
                    .run(&["--namespace=monitoring", "get", "cronjob/machines-endpoints-cronjob"])
                    .await
            })
            .await?;

        ctx.poller
            .eventually(move || async move {
                let ep: Endpoints = kubectl
                    .get(&["--namespace=monitoring", "endpoints/prometheus-node-targets"])
                    .await?;
                check_endpoints(&ep)
            })
            .await?;
        Ok(())
    }
}

pub struct KubeStateMetrics;

#[async_trait]
impl Scenario for KubeStateMetrics {
    fn name(&self) -> &str {
        "kube-state-metrics"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        wait_deployment_available(&ctx.kubectl, "kube-system", "kube-state-metrics", 1).await
    }
}

pub struct Prometheus;

#[async_trait]
impl Scenario for Prometheus {
    fn name(&self) -> &str {
        "prometheus"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        wait_statefulset_ready(&ctx.kubectl, NAMESPACE, "prometheus", 1).await?;

        let pod = prometheus_pod(ctx).await?;
        let api = PodApi::new(&ctx.kubectl, NAMESPACE, pod, 9090);
        let api = &api;
        ctx.poller
            .eventually(move || async move { api.get("/api/v1/alerts").await })
            .await?;

        ctx.poller
            .eventually(move || async move {
                let targets = api.targets().await?;
                targets
                    .iter()
                    .any(|t| t.label("kubernetes_name") == Some("prometheus-node-targets") && t.is_up())
                    .then_some(())
                    .ok_or_else(|| anyhow!("cannot find accessible node target"))
            })
            .await?;
        Ok(())
    }
}

pub struct Alertmanager;

#[async_trait]
impl Scenario for Alertmanager {
    fn name(&self) -> &str {
        "alertmanager"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        wait_deployment_available(&ctx.kubectl, NAMESPACE, "alertmanager", 1).await?;
        wait_pod_replies(&ctx.kubectl, "app.kubernetes.io/name=alertmanager", 9093, "/-/healthy").await
    }
}

pub struct Pushgateway;

#[async_trait]
impl Scenario for Pushgateway {
    fn name(&self) -> &str {
        "pushgateway"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        wait_deployment_available(kubectl, NAMESPACE, "pushgateway", 1).await?;

        let bastion_url = format!("http://{}/-/healthy", ctx.config.bastion_pushgateway_fqdn());
        let bastion_url = bastion_url.as_str();
        let boot0 = ctx.boot0();
        ctx.poller
            .eventually(move || async move {
                let res = boot0.exec(&["curl", "-s", bastion_url, "-o", "/dev/null"]).await;
                if let Err(e) = &res {
                    warn!(stdout = %e.stdout(), stderr = %e.stderr(), "curl failed");
                }
                res
            })
            .await
            .context("Pushgateway is unreachable from bastion")?;

        let forest_ip = ctx
            .poller
            .eventually(move || async move { kubectl.load_balancer_ip("ingress-forest", "envoy").await })
            .await?;

        let fqdn = ctx.config.forest_pushgateway_fqdn();
        let resolve = format!("{}:80:{}", fqdn, forest_ip);
        let url = format!("{}/-/healthy", fqdn);
        let (resolve, url) = (resolve.as_str(), url.as_str());
        let external = &ctx.external;
        ctx.poller
            .eventually(move || async move {
                external.exec(&["curl", "--resolve", resolve, url, "-m", "5"]).await
            })
            .await
            .context("Pushgateway is unreachable from forest")?;
        Ok(())
    }
}

pub struct IngressHealth;

#[async_trait]
impl Scenario for IngressHealth {
    fn name(&self) -> &str {
        "ingress-health"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        let boot0 = ctx.boot0();

        wait_deployment_available(kubectl, NAMESPACE, "ingress-health", 1).await?;
        ctx.poller
            .eventually(move || async move {
                kubectl
                    .run(&["-n", NAMESPACE, "get", "service", "ingress-health-http"])
                    .await
            })
            .await?;

        ctx.poller
            .eventually(move || async move {
                check_certificate(kubectl, "ingress-health-global-test", NAMESPACE).await?;
                check_certificate(kubectl, "ingress-health-bastion-test", NAMESPACE).await
            })
            .await?;

        ctx.poller
            .eventually(move || async move { boot0.exec(&["test", "-f", INGRESS_WATCHER_CONF]).await })
            .await?;

        let of = format!("of={}", INGRESS_WATCHER_CONF);
        boot0
            .exec_with_input(ingress_watcher_config(&ctx.config).as_bytes(), &["sudo", "dd", &of])
            .await?;
        boot0
            .exec(&["sudo", "systemctl", "restart", "ingress-watcher.service"])
            .await?;

        let metrics_url = format!("http://{}/metrics", ctx.config.bastion_pushgateway_fqdn());
        let metrics_url = metrics_url.as_str();
        let global = ctx.config.global_health_fqdn();
        let bastion = ctx.config.bastion_health_fqdn();
        let fqdns = [global.as_str(), bastion.as_str()];
        let fqdns = &fqdns;
        ctx.poller
            .eventually(move || async move {
                let metrics = boot0.stdout(&["curl", "-s", metrics_url]).await?;
                if let Some(url) = missing_health_report(&metrics, fqdns) {
                    bail!("metric ingresswatcher_http_get_successful_total does not exist for {}", url);
                }
                anyhow::Ok(())
            })
            .await?;
        Ok(())
    }
}

pub struct GrafanaOperator;

#[async_trait]
impl Scenario for GrafanaOperator {
    fn name(&self) -> &str {
        "grafana-operator"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        wait_deployment_ready(kubectl, NAMESPACE, "grafana-deployment", 1).await?;
        ctx.poller
            .eventually(move || async move { check_certificate(kubectl, "grafana-test", NAMESPACE).await })
            .await?;

        let fqdn = ctx.config.grafana_fqdn();
        let user = format!("admin:{}", ctx.config.grafana_admin_password);
        let stats_url = format!("{}/api/admin/stats", fqdn);
        let search_url = format!("{}/api/search?type=dash-db", fqdn);
        let (user, stats_url, search_url) = (user.as_str(), stats_url.as_str(), search_url.as_str());
        let boot0 = ctx.boot0();

        ctx.poller
            .eventually(move || async move {
                let body = boot0.stdout(&["curl", "-kL", "-u", user, stats_url]).await?;
                let stats: GrafanaStats = serde_json::from_str(&body)?;
                check_grafana_stats(&stats)
            })
            .await?;

        let expected = ctx.config.num_grafana_dashboard;
        ctx.poller
            .eventually(move || async move {
                let body = boot0.stdout(&["curl", "-kL", "-u", user, search_url]).await?;
                let dashboards: Vec<serde_json::Value> = serde_json::from_str(&body)?;
                ensure!(
                    dashboards.len() == expected,
                    "len(dashboards) should be {}: {}",
                    expected,
                    dashboards.len()
                );
                anyhow::Ok(())
            })
            .await?;
        Ok(())
    }
}

pub struct PrometheusMetrics;

#[async_trait]
impl Scenario for PrometheusMetrics {
    fn name(&self) -> &str {
        "prometheus-metrics"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let pod = prometheus_pod(ctx).await?;
        let api = PodApi::new(&ctx.kubectl, NAMESPACE, pod, 9090);
        let api = &api;

        let configmaps: ItemList<ConfigMap> = ctx.kubectl.get(&["--namespace=monitoring", "configmap"]).await?;
        let jobs = scrape_job_names(&configmaps.items)?;
        let jobs = jobs.as_slice();
        ctx.poller
            .eventually(move || async move {
                let targets = api.targets().await?;
                check_scrape_targets(jobs, &targets)
            })
            .await?;
        info!(jobs = jobs.len(), "All scrape targets are up");

        let groups = api.rules().await?;
        compare_rule_names("alert", &loaded_alert_names(&groups), &expected_alert_names(ctx)?)?;
        compare_rule_names("record", &loaded_record_names(&groups), &expected_record_names(ctx)?)?;
        Ok(())
    }
}

pub struct MetricsServer;

#[async_trait]
impl Scenario for MetricsServer {
    fn name(&self) -> &str {
        "metrics-server"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        ctx.poller
            .eventually(move || async move { kubectl.run(&["top", "node"]).await })
            .await
            .context("resource metrics are not served")?;
        Ok(())
    }
}

pub struct VictoriaMetricsOperator;

#[async_trait]
impl Scenario for VictoriaMetricsOperator {
    fn name(&self) -> &str {
        "victoriametrics-operator"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        wait_deployment_available(&ctx.kubectl, NAMESPACE, "victoriametrics-operator", 2).await
    }
}

pub struct VMAlertmanager;

#[async_trait]
impl Scenario for VMAlertmanager {
    fn name(&self) -> &str {
        "vmalertmanager"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        wait_statefulset_ready(&ctx.kubectl, NAMESPACE, "vmalertmanager-vmalertmanager", 1).await?;
        wait_pod_replies(&ctx.kubectl, "app.kubernetes.io/name=vmalertmanager", 9093, "/-/healthy").await
    }
}

pub struct VMSmallset;

impl VMSmallset {
    const VMAGENTS: usize = 3;
}

#[async_trait]
impl Scenario for VMSmallset {
    fn name(&self) -> &str {
        "vmsmallset-components"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        wait_deployment_available(kubectl, NAMESPACE, "vmsingle-vmsingle-smallset", 1).await?;
        wait_deployment_available(kubectl, NAMESPACE, "vmalert-vmalert-smallset", 1).await?;
        wait_deployment_available(kubectl, NAMESPACE, "vmagent-vmagent-smallset", Self::VMAGENTS as i32).await?;

        wait_pod_replies(
            kubectl,
            "app.kubernetes.io/name=vmsingle,app.kubernetes.io/instance=vmsingle-smallset",
            8429,
            "/api/v1/labels",
        )
        .await?;
        wait_pod_replies(
            kubectl,
            "app.kubernetes.io/name=vmalert,app.kubernetes.io/instance=vmalert-smallset",
            8080,
            "/api/v1/alerts",
        )
        .await?;

        let selector = "app.kubernetes.io/name=vmagent,app.kubernetes.io/instance=vmagent-smallset";
        ctx.poller
            .eventually(move || async move {
                let pods = kubectl.pods(NAMESPACE, selector).await?;
                ensure!(pods.len() == Self::VMAGENTS, "vmagent pod count mismatch");
                for pod in &pods {
                    let name = pod.metadata.name.as_deref().unwrap_or_default();
                    let targets = PodApi::new(kubectl, NAMESPACE, name, 8429).targets().await?;
                    let found = targets
                        .iter()
                        .any(|t| t.label("job") == Some("kubernetes-nodes") && t.is_up());
                    ensure!(found, "{} cannot find target kubernetes-nodes", name);
                }
                anyhow::Ok(())
            })
            .await?;
        Ok(())
    }
}

pub struct VMLargeset;

impl VMLargeset {
    const REPLICAS: usize = 3;
}

#[async_trait]
impl Scenario for VMLargeset {
    fn name(&self) -> &str {
        "vmlargeset-components"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        let replicas = Self::REPLICAS as i32;
        wait_statefulset_ready(kubectl, NAMESPACE, "vmstorage-vmcluster-largeset", replicas).await?;
        wait_statefulset_ready(kubectl, NAMESPACE, "vmselect-vmcluster-largeset", replicas).await?;
        for deployment in [
            "vminsert-vmcluster-largeset",
            "vmalert-vmalert-largeset",
            "vmagent-vmagent-largeset",
        ] {
            wait_deployment_available(kubectl, NAMESPACE, deployment, replicas).await?;
        }

        wait_pods_reply(
            kubectl,
            "app.kubernetes.io/name=vmselect,app.kubernetes.io/instance=vmcluster-largeset",
            Self::REPLICAS,
            8481,
            "/select/0/prometheus/api/v1/labels",
        )
        .await?;
        wait_pods_reply(
            kubectl,
            "app.kubernetes.io/name=vmalert,app.kubernetes.io/instance=vmalert-largeset",
            Self::REPLICAS,
            8080,
            "/api/v1/alerts",
        )
        .await?;
        wait_pods_reply(
            kubectl,
            "app.kubernetes.io/name=vmagent,app.kubernetes.io/instance=vmagent-largeset",
            Self::REPLICAS,
            8429,
            "/api/v1/targets",
        )
        .await
    }
}

#[cfg(test)]
#[path = "monitoring_test.rs"]
mod tests;
