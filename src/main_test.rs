#![allow(clippy::unwrap_used)] // Tests can use unwrap for brevity

use super::*;

#[test]
fn test_parse_run() {
    let cli = Cli::try_parse_from(["neco-apps-test", "run"]).unwrap();
    assert_eq!(cli.command, Command::Run { list: false });
}

#[test]
fn test_parse_validate_with_global_config() {
    let cli = Cli::try_parse_from([
        "neco-apps-test",
        "validate",
        "--manifest-dir",
        "/src/neco-apps",
        "--config",
        "/etc/neco-apps-test.toml",
    ])
    .unwrap();

    assert_eq!(
        cli.command,
        Command::Validate {
            manifest_dir: Some(PathBuf::from("/src/neco-apps"))
        }
    );
    assert_eq!(cli.config, Some(PathBuf::from("/etc/neco-apps-test.toml")));
}

#[test]
fn test_subcommand_required() {
    assert!(Cli::try_parse_from(["neco-apps-test"]).is_err());
}

#[tokio::test]
async fn test_run_list_does_not_connect() {
    // no SSH key configured, so connecting would fail
    run(Config::default(), true).await.unwrap();
}

#[test]
fn test_validate_reports_failure() {
    let dir = tempfile::tempdir().unwrap();
    let config = Config {
        kustomize: dir.path().join("missing-kustomize"),
        ..Config::default()
    };
    assert!(validate(config, Some(dir.path().to_path_buf())).is_err());
}
