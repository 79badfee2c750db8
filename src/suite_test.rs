#![allow(clippy::unwrap_used)] // Tests can use unwrap for brevity

use super::*;
use crate::exec::scripted::ScriptedExecutor;
use anyhow::bail;
use std::path::Path;

struct NoRenderer;

impl Renderer for NoRenderer {
    fn render(&self, dir: &Path) -> Result<String, ManifestError> {
        Err(ManifestError::Build {
            dir: dir.to_path_buf(),
            stderr: "not available".to_string(),
        })
    }
}

fn context(config: Config) -> Context {
    Context::with_executors(
        config,
        Arc::new(ScriptedExecutor::new()),
        Arc::new(ScriptedExecutor::new()),
        Box::new(NoRenderer),
    )
}

struct Passing;

#[async_trait]
impl Scenario for Passing {
    fn name(&self) -> &str {
        "passing"
    }

    async fn run(&self, _ctx: &mut Context) -> CheckResult {
        Ok(())
    }
}

struct Failing;

#[async_trait]
impl Scenario for Failing {
    fn name(&self) -> &str {
        "failing"
    }

    async fn run(&self, _ctx: &mut Context) -> CheckResult {
        bail!("boom")
    }
}

struct OnlyOnReboot;

#[async_trait]
impl Scenario for OnlyOnReboot {
    fn name(&self) -> &str {
        "only-on-reboot"
    }

    async fn run(&self, _ctx: &mut Context) -> CheckResult {
        Ok(())
    }

    fn should_skip(&self, config: &Config) -> bool {
        !config.reboot
    }
}

#[tokio::test]
async fn test_run_continues_after_failure() {
    let mut ctx = context(Config::default());
    let mut suite = Suite::new();
    suite.add(Failing).add(OnlyOnReboot).add(Passing);

    let report = suite.run(&mut ctx).await;

    assert_eq!(report.passed(), 1);
    assert_eq!(report.failed(), 1);
    assert_eq!(report.skipped(), 1);
    assert!(!report.is_success());
    assert_eq!(report.outcomes[0].status, Status::Failed("boom".to_string()));
}

#[test]
fn test_standard_bootstrap_stops_after_setup() {
    let config = Config {
        bootstrap: true,
        ..Config::default()
    };

    let suite = Suite::standard(&config);
    assert_eq!(suite.names(), vec!["prepareNodes", "prepareLoadPods", "setup"]);
}

#[test]
fn test_standard_prepares_network_policy_last() {
    let suite = Suite::standard(&Config::default());
    let names = suite.names();

    let last_prepare = names
        .iter()
        .rposition(|n| n.starts_with("preparing "))
        .unwrap();
    assert_eq!(names[last_prepare], "preparing network-policy");
    assert_eq!(names[last_prepare + 1], "rook-ceph");
    assert!(!names.contains(&"reboot rook-ceph"));
}

#[test]
fn test_standard_with_reboot() {
    let config = Config {
        reboot: true,
        ..Config::default()
    };

    let names = Suite::standard(&config).names().join(",");
    assert!(names.starts_with(
        "prepareNodes,prepareLoadPods,setup,prepare reboot rook-ceph,reboot rook-ceph,preparing rook-ceph"
    ));
}

#[test]
fn test_context_hosts() {
    let ctx = context(Config::default());

    assert_eq!(ctx.boot0().target(), "10.72.48.0");
    assert_eq!(ctx.boots.len(), 3);
    assert_eq!(ctx.boots[2].target(), "10.72.48.2");
    assert_eq!(ctx.external.target(), "external");
    assert_eq!(ctx.operation.target(), "operation");
    assert!(ctx.render("namespaces/base").is_err());
}

#[test]
fn test_connect_requires_key() {
    assert!(matches!(
        Context::connect(Config::default()),
        Err(ContextError::NoPrivateKey)
    ));
}
