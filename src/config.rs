//! Suite configuration
//!
//! Loaded from an optional TOML file and then overridden by the environment
//! variables the dctest runner exports (`SSH_PRIVKEY`, `BOOT0`, `COMMIT_ID`, ...).

use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Domain every test ingress FQDN lives under
pub const TEST_DOMAIN: &str = "gcp0.dev-ne.co";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config file: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid value for {name}: {value:?}")]
    InvalidEnv { name: &'static str, value: String },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Private key used for SSH to the boot servers; e2e runs are skipped without it
    pub ssh_privkey: Option<PathBuf>,
    pub ssh_user: String,
    pub boot0: String,
    pub boot1: String,
    pub boot2: String,
    pub commit_id: String,
    pub overlay: String,
    pub test_id: String,
    pub bootstrap: bool,
    pub reboot: bool,
    pub upgrade: bool,
    pub placemat_major_version: u32,
    /// PID of the process owning the `external` network namespace (placemat v1)
    pub external_pid: Option<String>,
    /// PID of the process owning the `operation` network namespace (placemat v1)
    pub operation_pid: Option<String>,
    pub num_grafana_dashboard: usize,
    pub grafana_admin_password: String,
    /// Root of the neco-apps checkout used by the static validators
    pub manifest_dir: PathBuf,
    /// Path to the kustomize binary
    pub kustomize: PathBuf,
    /// Directory holding `account.json`, `zerossl-secret-resource.json` and
    /// Argo CD's `install.yaml`
    pub assets_dir: PathBuf,
    pub timeouts: TimeoutConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub poll_interval_secs: u64,
    pub default_secs: u64,
    pub convergence_secs: u64,
    pub stability_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            poll_interval_secs: 1,
            default_secs: 20 * 60,
            convergence_secs: 60 * 60,
            stability_secs: 15,
        }
    }
}

impl TimeoutConfig {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs)
    }

    pub fn default_timeout(&self) -> Duration {
        Duration::from_secs(self.default_secs)
    }

    pub fn convergence(&self) -> Duration {
        Duration::from_secs(self.convergence_secs)
    }

    pub fn stability(&self) -> Duration {
        Duration::from_secs(self.stability_secs)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            ssh_privkey: None,
            ssh_user: "cybozu".to_string(),
            boot0: "10.72.48.0".to_string(),
            boot1: "10.72.48.1".to_string(),
            boot2: "10.72.48.2".to_string(),
            commit_id: String::new(),
            overlay: "gcp".to_string(),
            test_id: generate_test_id(),
            bootstrap: false,
            reboot: false,
            upgrade: false,
            placemat_major_version: 2,
            external_pid: None,
            operation_pid: None,
            num_grafana_dashboard: 0,
            grafana_admin_password: "AUJUl1K2xgeqwMdZ3XlEFc1QhgEQItODMNzJwQme".to_string(),
            manifest_dir: PathBuf::from("."),
            kustomize: PathBuf::from("bin/kustomize"),
            assets_dir: PathBuf::from("."),
            timeouts: TimeoutConfig::default(),
        }
    }
}

fn generate_test_id() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    format!("t{}", &id[..8])
}

fn parse_bool(name: &'static str, value: String) -> Result<bool, ConfigError> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" => Ok(true),
        "" | "0" | "false" | "no" => Ok(false),
        _ => Err(ConfigError::InvalidEnv { name, value }),
    }
}

fn parse_number<T: std::str::FromStr>(name: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidEnv { name, value })
}

impl Config {
    /// Load from `path` (if any), then apply process environment overrides
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = match path {
            Some(path) => {
                let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
                toml::from_str(&contents)?
            }
            None => Config::default(),
        };

        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    /// Override fields from environment-style lookups
    ///
    /// Empty strings are treated as unset, except for boolean flags where they
    /// mean false.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(v) = get("SSH_PRIVKEY") {
            self.ssh_privkey = Some(PathBuf::from(v));
        }
        if let Some(v) = get("BOOT0") {
            self.boot0 = v;
        }
        if let Some(v) = get("BOOT1") {
            self.boot1 = v;
        }
        if let Some(v) = get("BOOT2") {
            self.boot2 = v;
        }
        if let Some(v) = get("COMMIT_ID") {
            self.commit_id = v;
        }
        if let Some(v) = get("OVERLAY") {
            self.overlay = v;
        }
        if let Some(v) = get("TEST_ID") {
            self.test_id = v;
        }
        if let Some(v) = lookup("BOOTSTRAP") {
            self.bootstrap = parse_bool("BOOTSTRAP", v)?;
        }
        if let Some(v) = lookup("REBOOT") {
            self.reboot = parse_bool("REBOOT", v)?;
        }
        if let Some(v) = lookup("UPGRADE") {
            self.upgrade = parse_bool("UPGRADE", v)?;
        }
        if let Some(v) = get("PLACEMAT_MAJOR_VERSION") {
            self.placemat_major_version = parse_number("PLACEMAT_MAJOR_VERSION", v)?;
        }
        if let Some(v) = get("EXTERNAL_PID") {
            self.external_pid = Some(v);
        }
        if let Some(v) = get("OPERATION_PID") {
            self.operation_pid = Some(v);
        }
        if let Some(v) = get("NUM_DASHBOARD") {
            self.num_grafana_dashboard = parse_number("NUM_DASHBOARD", v)?;
        }
        if let Some(v) = get("MANIFEST_DIR") {
            self.manifest_dir = PathBuf::from(v);
        }
        if let Some(v) = get("KUSTOMIZE") {
            self.kustomize = PathBuf::from(v);
        }

        Ok(())
    }

    /// True when the suite can reach a live cluster
    pub fn is_e2e(&self) -> bool {
        self.ssh_privkey.is_some()
    }

    pub fn boot_hosts(&self) -> [&str; 3] {
        [&self.boot0, &self.boot1, &self.boot2]
    }

    fn test_fqdn(&self, suffix: &str) -> String {
        format!("{}-{}.{}", self.test_id, suffix, TEST_DOMAIN)
    }

    pub fn grafana_fqdn(&self) -> String {
        self.test_fqdn("grafana")
    }

    pub fn sandbox_grafana_fqdn(&self) -> String {
        self.test_fqdn("sandbox-grafana")
    }

    pub fn global_health_fqdn(&self) -> String {
        self.test_fqdn("ingress-health-global")
    }

    pub fn bastion_health_fqdn(&self) -> String {
        self.test_fqdn("ingress-health-bastion")
    }

    pub fn bastion_pushgateway_fqdn(&self) -> String {
        self.test_fqdn("pushgateway-bastion")
    }

    pub fn forest_pushgateway_fqdn(&self) -> String {
        self.test_fqdn("pushgateway-forest")
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
