//! Scenario runner
//!
//! Scenarios run sequentially against one shared `Context`. A failing
//! scenario is reported and the run continues with the next one.

use crate::argocd::ArgoCd;
use crate::checks::{
    customer_egress, hpa, logging, metallb, moco, monitoring, network_policy, registry, sandbox,
    sealed_secret, setup, storage, team_management, teleport, topolvm,
};
use crate::config::Config;
use crate::exec::local::{EXTERNAL_NETNS, OPERATION_NETNS};
use crate::exec::{Executor, Host, LocalExecutor, SshExecutor};
use crate::kubectl::Kubectl;
use crate::manifest::{KustomizeRenderer, ManifestError, Renderer};
use crate::poll::Poller;
use async_trait::async_trait;
use chrono::SecondsFormat;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{error, info};

/// Result of one scenario
pub type CheckResult = anyhow::Result<()>;

/// Directory on boot0 holding the neco-apps checkout
pub const CHECKOUT_DIR: &str = "./neco-apps";

#[derive(Debug, Error)]
pub enum ContextError {
    #[error("SSH_PRIVKEY is not set")]
    NoPrivateKey,
}

/// Shared state of a run
pub struct Context {
    pub config: Config,
    pub poller: Poller,
    /// Every boot server, boot0 first
    pub boots: Vec<Host>,
    /// kubectl on boot0
    pub kubectl: Kubectl,
    /// argocd on boot0
    pub argocd: ArgoCd,
    /// The test host, inside the external network namespace
    pub external: Host,
    /// The test host, inside the operation network namespace
    pub operation: Host,
    pub renderer: Box<dyn Renderer + Send + Sync>,
}

impl Context {
    /// Context reaching the boot servers over SSH
    pub fn connect(config: Config) -> Result<Self, ContextError> {
        let key = config.ssh_privkey.clone().ok_or(ContextError::NoPrivateKey)?;
        let remote = Arc::new(SshExecutor::new(key, config.ssh_user.clone()));
        let local = Arc::new(LocalExecutor::new(
            config.placemat_major_version,
            config.external_pid.clone(),
            config.operation_pid.clone(),
        ));
        let renderer = Box::new(KustomizeRenderer::new(config.kustomize.clone()));
        Ok(Self::with_executors(config, remote, local, renderer))
    }

    pub fn with_executors(
        config: Config,
        remote: Arc<dyn Executor>,
        local: Arc<dyn Executor>,
        renderer: Box<dyn Renderer + Send + Sync>,
    ) -> Self {
        let poller = Poller::new(
            config.timeouts.poll_interval(),
            config.timeouts.default_timeout(),
        );
        let boots: Vec<Host> = config
            .boot_hosts()
            .iter()
            .map(|h| Host::new(remote.clone(), *h))
            .collect();
        let boot0 = Host::new(remote, config.boot0.clone());

        Self {
            kubectl: Kubectl::new(boot0.clone(), poller),
            argocd: ArgoCd::new(boot0),
            boots,
            external: Host::new(local.clone(), EXTERNAL_NETNS),
            operation: Host::new(local, OPERATION_NETNS),
            renderer,
            poller,
            config,
        }
    }

    pub fn boot0(&self) -> &Host {
        self.kubectl.host()
    }

    /// Same interval, longer deadline
    pub fn poller_for(&self, timeout: Duration) -> Poller {
        self.poller.with_timeout(timeout)
    }

    /// Render a kustomization under the manifest directory
    pub fn render(&self, dir: &str) -> Result<String, ManifestError> {
        self.renderer.render(&self.config.manifest_dir.join(dir))
    }
}

#[async_trait]
pub trait Scenario: Send + Sync {
    fn name(&self) -> &str;

    async fn run(&self, ctx: &mut Context) -> CheckResult;

    fn should_skip(&self, _config: &Config) -> bool {
        false
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Status {
    Passed,
    Failed(String),
    Skipped,
}

#[derive(Debug, Clone)]
pub struct Outcome {
    pub name: String,
    pub status: Status,
    pub elapsed: Duration,
}

#[derive(Debug, Clone, Default)]
pub struct Report {
    pub outcomes: Vec<Outcome>,
}

impl Report {
    fn count(&self, f: impl Fn(&Status) -> bool) -> usize {
        self.outcomes.iter().filter(|o| f(&o.status)).count()
    }

    pub fn passed(&self) -> usize {
        self.count(|s| *s == Status::Passed)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, Status::Failed(_)))
    }

    pub fn skipped(&self) -> usize {
        self.count(|s| *s == Status::Skipped)
    }

    pub fn is_success(&self) -> bool {
        self.failed() == 0
    }

    pub fn print_summary(&self) {
        println!("\n📊 Summary");
        println!("==========");
        for outcome in &self.outcomes {
            if let Status::Failed(e) = &outcome.status {
                println!("  ❌ {}: {}", outcome.name, e);
            }
        }
        println!("  ✅ Passed:  {}", self.passed());
        println!("  ❌ Failed:  {}", self.failed());
        println!("  ⏭️  Skipped: {}", self.skipped());
        println!();
    }
}

fn now() -> String {
    chrono::Local::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}

#[derive(Default)]
pub struct Suite {
    scenarios: Vec<Box<dyn Scenario>>,
}

impl Suite {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&mut self, scenario: impl Scenario + 'static) -> &mut Self {
        self.scenarios.push(Box::new(scenario));
        self
    }

    pub fn names(&self) -> Vec<&str> {
        self.scenarios.iter().map(|s| s.name()).collect()
    }

    /// The full e2e run
    ///
    /// Bootstrap runs stop after setup. Preparations run before the tests so
    /// that workloads come up in parallel; network-policy is prepared last
    /// because it restricts traffic the other preparations need.
    pub fn standard(config: &Config) -> Self {
        let mut suite = Self::new();
        suite
            .add(setup::PrepareNodes)
            .add(storage::PrepareLoadPods)
            .add(setup::Setup);
        if config.bootstrap {
            return suite;
        }

        if config.reboot {
            suite
                .add(storage::PrepareRebootRookCeph)
                .add(storage::RebootRookCeph);
        }

        suite
            .add(storage::PrepareRookCeph)
            .add(metallb::PrepareMetalLB)
            .add(monitoring::PreparePushgateway)
            .add(monitoring::PrepareIngressHealth)
            .add(monitoring::PrepareGrafanaOperator)
            .add(sandbox::PrepareSandboxGrafana)
            .add(topolvm::PrepareTopoLVM)
            .add(hpa::PrepareHpa)
            .add(moco::PrepareMoco)
            .add(registry::PrepareRegistry)
            .add(sealed_secret::PrepareSealedSecret)
            .add(customer_egress::PrepareCustomerEgress)
            .add(network_policy::PrepareNetworkPolicy);

        suite
            .add(storage::RookCeph)
            .add(network_policy::NetworkPolicy)
            .add(metallb::MetalLB)
            .add(monitoring::MachinesEndpoints)
            .add(monitoring::KubeStateMetrics)
            .add(monitoring::Prometheus)
            .add(monitoring::GrafanaOperator)
            .add(sandbox::SandboxGrafana)
            .add(monitoring::Alertmanager)
            .add(monitoring::Pushgateway)
            .add(monitoring::IngressHealth)
            .add(monitoring::PrometheusMetrics)
            .add(monitoring::MetricsServer)
            .add(monitoring::VictoriaMetricsOperator)
            .add(monitoring::VMAlertmanager)
            .add(monitoring::VMSmallset)
            .add(monitoring::VMLargeset)
            .add(topolvm::TopoLVM)
            .add(teleport::Teleport)
            .add(team_management::TeamManagement)
            .add(customer_egress::CustomerEgress)
            .add(hpa::Hpa)
            .add(logging::Logging)
            .add(moco::Moco)
            .add(registry::Registry)
            .add(sealed_secret::SealedSecret);

        suite
    }

    /// Run every scenario in order and collect the outcomes
    pub async fn run(&self, ctx: &mut Context) -> Report {
        let mut report = Report::default();

        println!("\n🧪 neco-apps tests");
        println!("==================\n");

        for scenario in &self.scenarios {
            let name = scenario.name().to_string();

            if scenario.should_skip(&ctx.config) {
                println!("⏭️  Skipping: {}", name);
                report.outcomes.push(Outcome {
                    name,
                    status: Status::Skipped,
                    elapsed: Duration::ZERO,
                });
                continue;
            }

            println!("START: {}", now());
            println!("🏃 Running: {}", name);
            let start = Instant::now();

            let status = match scenario.run(ctx).await {
                Ok(()) => {
                    println!("✅ Passed: {}", name);
                    Status::Passed
                }
                Err(e) => {
                    error!(scenario = %name, error = %format!("{:#}", e), "Scenario failed");
                    eprintln!("❌ Failed: {}", name);
                    eprintln!("   Error: {:#}", e);
                    Status::Failed(format!("{:#}", e))
                }
            };
            println!("END: {}\n", now());

            let elapsed = start.elapsed();
            info!(scenario = %name, elapsed = ?elapsed, "Scenario finished");
            report.outcomes.push(Outcome {
                name,
                status,
                elapsed,
            });
        }

        report
    }
}

#[cfg(test)]
#[path = "suite_test.rs"]
mod tests;
