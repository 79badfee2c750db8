#![allow(clippy::unwrap_used)] // Tests can use unwrap for brevity

use super::*;
use std::collections::HashMap;

fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
    let map: HashMap<String, String> = pairs
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
    move |name| map.get(name).cloned()
}

#[test]
fn test_defaults_match_dctest_polling() {
    let config = Config::default();

    assert_eq!(config.timeouts.poll_interval(), Duration::from_secs(1));
    assert_eq!(config.timeouts.default_timeout(), Duration::from_secs(20 * 60));
    assert_eq!(config.timeouts.convergence(), Duration::from_secs(60 * 60));
    assert_eq!(config.timeouts.stability(), Duration::from_secs(15));
    assert!(!config.is_e2e());
}

#[test]
fn test_env_overrides() {
    let mut config = Config::default();
    config
        .apply_env(env(&[
            ("SSH_PRIVKEY", "/tmp/key"),
            ("BOOT0", "10.0.0.1"),
            ("COMMIT_ID", "abc123"),
            ("TEST_ID", "dctest"),
            ("BOOTSTRAP", "1"),
            ("REBOOT", "false"),
            ("PLACEMAT_MAJOR_VERSION", "1"),
            ("NUM_DASHBOARD", "42"),
        ]))
        .unwrap();

    assert!(config.is_e2e());
    assert_eq!(config.boot0, "10.0.0.1");
    assert_eq!(config.commit_id, "abc123");
    assert!(config.bootstrap);
    assert!(!config.reboot);
    assert_eq!(config.placemat_major_version, 1);
    assert_eq!(config.num_grafana_dashboard, 42);
    assert_eq!(config.grafana_fqdn(), "dctest-grafana.gcp0.dev-ne.co");
    assert_eq!(
        config.forest_pushgateway_fqdn(),
        "dctest-pushgateway-forest.gcp0.dev-ne.co"
    );
}

#[test]
fn test_empty_env_is_unset() {
    let mut config = Config::default();
    config.apply_env(env(&[("SSH_PRIVKEY", ""), ("BOOTSTRAP", "")])).unwrap();

    assert!(!config.is_e2e());
    assert!(!config.bootstrap);
}

#[test]
fn test_invalid_env_rejected() {
    let mut config = Config::default();
    let err = config
        .apply_env(env(&[("PLACEMAT_MAJOR_VERSION", "two")]))
        .unwrap_err();

    assert!(matches!(
        err,
        ConfigError::InvalidEnv {
            name: "PLACEMAT_MAJOR_VERSION",
            ..
        }
    ));
}

#[test]
fn test_load_from_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
overlay = "stage0"
test_id = "fromfile"

[timeouts]
default_secs = 60
"#,
    )
    .unwrap();

    let mut config = Config::load(Some(&path)).unwrap();
    // Process env may carry TEST_ID in CI; reset to compare the file values only.
    config.apply_env(env(&[("TEST_ID", "fromfile")])).unwrap();

    assert_eq!(config.overlay, "stage0");
    assert_eq!(config.test_id, "fromfile");
    assert_eq!(config.timeouts.default_secs, 60);
    assert_eq!(config.timeouts.poll_interval_secs, 1);
}
