use anyhow::bail;
use clap::{Parser, Subcommand};
use neco_apps_test::manifest::KustomizeRenderer;
use neco_apps_test::{validation, Config, Context, Suite};
use std::path::PathBuf;
use tracing::{error, info};

#[derive(Debug, Parser)]
#[command(name = "neco-apps-test", version, about = "End-to-end and static tests for neco-apps")]
pub struct Cli {
    /// TOML configuration; environment variables override it
    #[arg(short, long, global = true, env = "NECO_APPS_TEST_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand, PartialEq, Eq)]
pub enum Command {
    /// Run the scenarios against the cluster reachable through SSH_PRIVKEY
    Run {
        /// Print the scenario names and exit
        #[arg(long)]
        list: bool,
    },
    /// Validate the manifests without a cluster
    Validate {
        /// neco-apps checkout, overriding the configured one
        #[arg(long)]
        manifest_dir: Option<PathBuf>,
    },
}

async fn run(config: Config, list: bool) -> anyhow::Result<()> {
    let suite = Suite::standard(&config);
    if list {
        for name in suite.names() {
            println!("{}", name);
        }
        return Ok(());
    }

    let mut ctx = Context::connect(config)?;
    info!(
        boot0 = %ctx.config.boot0,
        overlay = %ctx.config.overlay,
        commit = %ctx.config.commit_id,
        "Starting e2e run"
    );

    let report = suite.run(&mut ctx).await;
    report.print_summary();
    if !report.is_success() {
        bail!("{} scenario(s) failed", report.failed());
    }
    Ok(())
}

fn validate(mut config: Config, manifest_dir: Option<PathBuf>) -> anyhow::Result<()> {
    if let Some(dir) = manifest_dir {
        config.manifest_dir = dir;
    }
    info!(dir = %config.manifest_dir.display(), "Validating manifests");

    let renderer = KustomizeRenderer::new(config.kustomize.clone());
    let report = validation::run_all(&config.manifest_dir, &renderer);
    println!("{}", report);
    if !report.is_ok() {
        bail!("validation found {} problem(s)", report.findings.len());
    }
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = match Config::load(cli.config.as_deref()) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "Failed to load configuration");
            return Err(e.into());
        }
    };

    match cli.command {
        Command::Run { list } => run(config, list).await,
        Command::Validate { manifest_dir } => validate(config, manifest_dir),
    }
}

#[cfg(test)]
#[path = "main_test.rs"]
mod tests;
