//! Prometheus-compatible HTTP API access
//!
//! Prometheus, VictoriaMetrics and Alertmanager are reached with `curl` inside
//! their own pods, so no port-forward or ingress is needed.

use crate::exec::Host;
use crate::kubectl::Kubectl;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::collections::BTreeMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PrometheusError {
    #[error("Prometheus HTTP error: {0}")]
    HttpError(String),

    #[error("Invalid query: {0}")]
    InvalidQuery(String),

    #[error("Failed to parse response: {0}")]
    ParseError(String),

    #[error("No data returned from Prometheus")]
    NoData,
}

/// Standard `{"status": ..., "data": ...}` envelope
#[derive(Debug, Deserialize)]
pub struct ApiResponse<T> {
    #[serde(default)]
    pub status: String,
    #[serde(default)]
    pub error: Option<String>,
    pub data: Option<T>,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TargetHealth {
    Up,
    Down,
    #[default]
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ActiveTarget {
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub health: TargetHealth,
}

impl ActiveTarget {
    pub fn label(&self, name: &str) -> Option<&str> {
        self.labels.get(name).map(String::as_str)
    }

    pub fn is_up(&self) -> bool {
        self.health == TargetHealth::Up
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TargetsResult {
    #[serde(default)]
    pub active_targets: Vec<ActiveTarget>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Rule {
    Alerting { name: String },
    Recording { name: String },
}

#[derive(Debug, Clone, Deserialize)]
pub struct RuleGroup {
    pub name: String,
    #[serde(default)]
    pub rules: Vec<Rule>,
}

#[derive(Debug, Deserialize)]
pub struct RulesResult {
    #[serde(default)]
    pub groups: Vec<RuleGroup>,
}

/// One element of an instant vector
#[derive(Debug, Clone, Deserialize)]
pub struct Sample {
    #[serde(default)]
    pub metric: BTreeMap<String, String>,
    /// `[<unix time>, "<value>"]`
    pub value: (f64, String),
}

impl Sample {
    pub fn value(&self) -> Result<f64, PrometheusError> {
        self.value
            .1
            .parse()
            .map_err(|_| PrometheusError::ParseError(format!("invalid sample value {:?}", self.value.1)))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResult {
    #[serde(default)]
    pub result_type: String,
    #[serde(default)]
    pub result: Vec<Sample>,
}

/// A rule file as stored in the repository
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleFile {
    #[serde(default)]
    pub groups: Vec<RuleFileGroup>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleFileGroup {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub rules: Vec<RuleDefinition>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct RuleDefinition {
    #[serde(default)]
    pub record: Option<String>,
    #[serde(default)]
    pub alert: Option<String>,
    #[serde(default)]
    pub expr: String,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    #[serde(default)]
    pub annotations: BTreeMap<String, String>,
}

impl RuleFile {
    /// Names of every alerting rule, in file order
    pub fn alert_names(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .flat_map(|g| &g.rules)
            .filter_map(|r| r.alert.as_deref())
            .filter(|name| !name.is_empty())
    }

    /// Names of every recording rule, in file order
    pub fn record_names(&self) -> impl Iterator<Item = &str> {
        self.groups
            .iter()
            .flat_map(|g| &g.rules)
            .filter_map(|r| r.record.as_deref())
            .filter(|name| !name.is_empty())
    }
}

/// Sorted names of the alerting rules a server has loaded
pub fn loaded_alert_names(groups: &[RuleGroup]) -> Vec<String> {
    let mut names: Vec<String> = groups
        .iter()
        .flat_map(|g| &g.rules)
        .filter_map(|r| match r {
            Rule::Alerting { name } if !name.is_empty() => Some(name.clone()),
            _ => None,
        })
        .collect();
    names.sort();
    names
}

/// Sorted names of the recording rules loaded from `*.records` groups
pub fn loaded_record_names(groups: &[RuleGroup]) -> Vec<String> {
    let mut names: Vec<String> = groups
        .iter()
        .filter(|g| g.name.ends_with(".records"))
        .flat_map(|g| &g.rules)
        .filter_map(|r| match r {
            Rule::Recording { name } if !name.is_empty() => Some(name.clone()),
            _ => None,
        })
        .collect();
    names.sort();
    names
}

/// Whether a text-format exposition has a `name` line containing every fragment
///
/// Fragments are matched as substrings, e.g. `code="200` or `path="http://host"`.
pub fn scrape_contains(metrics: &str, name: &str, fragments: &[&str]) -> bool {
    metrics
        .lines()
        .any(|line| line.contains(name) && fragments.iter().all(|f| line.contains(f)))
}

/// Unwrap an API envelope
pub fn parse_response<T: DeserializeOwned>(body: &str) -> Result<T, PrometheusError> {
    let response: ApiResponse<T> =
        serde_json::from_str(body).map_err(|e| PrometheusError::ParseError(e.to_string()))?;

    if response.status == "error" {
        return Err(PrometheusError::InvalidQuery(
            response.error.unwrap_or_default(),
        ));
    }
    response.data.ok_or(PrometheusError::NoData)
}

/// First active target scraped by `job`
pub fn find_target<'a>(job: &str, targets: &'a [ActiveTarget]) -> Option<&'a ActiveTarget> {
    targets.iter().find(|t| t.label("job") == Some(job))
}

/// Build the API path of an instant query
///
/// Only plain metric names are passed through the remote shell unquoted, so
/// label filtering is left to the caller.
fn build_query_path(metric: &str) -> Result<String, PrometheusError> {
    if metric.is_empty()
        || !metric
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == ':')
    {
        return Err(PrometheusError::InvalidQuery(metric.to_string()));
    }
    Ok(format!("/api/v1/query?query={}", metric))
}

/// HTTP API of a pod, queried with `kubectl exec <pod> -- curl`
#[derive(Debug, Clone)]
pub struct PodApi<'a> {
    kubectl: &'a Kubectl,
    namespace: &'a str,
    pod: String,
    port: u16,
}

impl<'a> PodApi<'a> {
    pub fn new(kubectl: &'a Kubectl, namespace: &'a str, pod: impl Into<String>, port: u16) -> Self {
        Self {
            kubectl,
            namespace,
            pod: pod.into(),
            port,
        }
    }

    pub fn pod(&self) -> &str {
        &self.pod
    }

    /// GET `path` and return the body
    pub async fn get(&self, path: &str) -> Result<String, PrometheusError> {
        let url = format!("http://localhost:{}{}", self.port, path);
        self.kubectl
            .exec_in(self.namespace, &self.pod, &["curl", "-sf", &url])
            .await
            .map(|out| out.stdout)
            .map_err(|e| PrometheusError::HttpError(e.to_string()))
    }

    pub async fn targets(&self) -> Result<Vec<ActiveTarget>, PrometheusError> {
        let body = self.get("/api/v1/targets").await?;
        Ok(parse_response::<TargetsResult>(&body)?.active_targets)
    }

    pub async fn rules(&self) -> Result<Vec<RuleGroup>, PrometheusError> {
        let body = self.get("/api/v1/rules").await?;
        Ok(parse_response::<RulesResult>(&body)?.groups)
    }

    /// Instant query for every series of `metric`
    pub async fn query(&self, metric: &str) -> Result<Vec<Sample>, PrometheusError> {
        let body = self.get(&build_query_path(metric)?).await?;
        Ok(parse_response::<QueryResult>(&body)?.result)
    }
}

/// POST text-format metrics to a Pushgateway job from `host`
pub async fn push_metric(
    host: &Host,
    pushgateway: &str,
    job: &str,
    body: &str,
) -> Result<(), PrometheusError> {
    let url = format!("http://{}/metrics/job/{}", pushgateway, job);
    host.exec_with_input(body.as_bytes(), &["curl", "-sf", "--data-binary", "@-", &url])
        .await
        .map_err(|e| PrometheusError::HttpError(e.to_string()))?;
    Ok(())
}

#[cfg(test)]
#[path = "prometheus_test.rs"]
mod tests;
