//! Alert rules against the Slack notification template

use super::{read_file, ValidationError};
use crate::manifest::{self, ManifestError};
use crate::prometheus::RuleFile;
use regex::Regex;
use std::collections::BTreeSet;
use std::path::Path;

pub const ALERT_RULES_DIR: &str = "monitoring/base/prometheus/alert_rules";
pub const SLACK_TEMPLATE: &str = "monitoring/base/alertmanager/neco.template";

/// `.Labels.<key>` and `.Annotations.<key>` lookups in a Go template
const KEY_PATTERN: &str = r"\.(Labels|Annotations)\.([A-Za-z_][A-Za-z0-9_]*)";

/// Label and annotation keys the template dereferences
#[derive(Debug, Default, PartialEq, Eq)]
pub struct TemplateKeys {
    pub labels: BTreeSet<String>,
    pub annotations: BTreeSet<String>,
}

pub fn template_keys(template: &str) -> Result<TemplateKeys, regex::Error> {
    let re = Regex::new(KEY_PATTERN)?;
    let mut keys = TemplateKeys::default();
    for caps in re.captures_iter(template) {
        let key = caps[2].to_string();
        if &caps[1] == "Labels" {
            keys.labels.insert(key);
        } else {
            keys.annotations.insert(key);
        }
    }
    Ok(keys)
}

/// Alerts in `rules` lacking a key the template needs
pub fn missing_keys(rules: &RuleFile, keys: &TemplateKeys) -> Vec<String> {
    let mut problems = Vec::new();
    for group in &rules.groups {
        for rule in &group.rules {
            let Some(alert) = rule.alert.as_deref() else {
                continue;
            };
            for key in keys.labels.iter().filter(|k| !rule.labels.contains_key(*k)) {
                problems.push(format!("{}/{}: label {} is missing", group.name, alert, key));
            }
            for key in keys.annotations.iter().filter(|k| !rule.annotations.contains_key(*k)) {
                problems.push(format!("{}/{}: annotation {} is missing", group.name, alert, key));
            }
        }
    }
    problems
}

/// Every alert rule file must render with the Slack template
pub fn alert_rules(manifest_dir: &Path) -> Result<Vec<String>, ValidationError> {
    let template = read_file(&manifest_dir.join(SLACK_TEMPLATE))?;
    let keys = template_keys(&template)?;

    let mut problems = Vec::new();
    for (path, text) in manifest::read_tree(&manifest_dir.join(ALERT_RULES_DIR))? {
        let rules: RuleFile = serde_yaml::from_str(&text).map_err(ManifestError::from)?;
        let file = path.file_name().unwrap_or_default().to_string_lossy();
        problems.extend(
            missing_keys(&rules, &keys)
                .into_iter()
                .map(|p| format!("{}: {}", file, p)),
        );
    }
    Ok(problems)
}

#[cfg(test)]
mod tests {
    use super::*;
    use indoc::indoc;

    const TEMPLATE: &str = indoc! {r#"
        {{ define "slack.neco.text" }}
        {{ range .Alerts }}
        *Alert:* {{ .Annotations.summary }} - `{{ .Labels.severity }}`
        {{ if .Annotations.runbook }}*Runbook:* {{ .Annotations.runbook }}{{ end }}
        {{ end }}
        {{ end }}
    "#};

    #[test]
    fn test_template_keys() {
        let keys = template_keys(TEMPLATE).unwrap();
        assert_eq!(keys.labels.iter().collect::<Vec<_>>(), vec!["severity"]);
        assert_eq!(keys.annotations.iter().collect::<Vec<_>>(), vec!["runbook", "summary"]);
    }

    #[test]
    fn test_missing_keys_skip_recording_rules() {
        let rules: RuleFile = serde_yaml::from_str(indoc! {r#"
            groups:
              - name: node
                rules:
                  - alert: NodeDown
                    expr: up == 0
                    labels:
                      severity: error
                    annotations:
                      summary: node is down
                      runbook: TBD
                  - alert: DiskFull
                    expr: disk > 0.9
                    labels:
                      severity: warning
                    annotations:
                      summary: disk is full
                  - record: node:cpu:sum
                    expr: sum(node_cpu)
        "#})
        .unwrap();

        let keys = template_keys(TEMPLATE).unwrap();
        assert_eq!(
            missing_keys(&rules, &keys),
            vec!["node/DiskFull: annotation runbook is missing"]
        );
    }

    #[test]
    fn test_alert_rules_reads_repository_layout() {
        let dir = tempfile::tempdir().unwrap();
        let template = dir.path().join(SLACK_TEMPLATE);
        std::fs::create_dir_all(template.parent().unwrap()).unwrap();
        std::fs::write(&template, TEMPLATE).unwrap();

        let rules = dir.path().join(ALERT_RULES_DIR);
        std::fs::create_dir_all(&rules).unwrap();
        std::fs::write(
            rules.join("node.yaml"),
            "groups:\n  - name: node\n    rules:\n      - alert: NodeDown\n        expr: up == 0\n",
        )
        .unwrap();

        let problems = alert_rules(dir.path()).unwrap();
        assert_eq!(problems.len(), 3);
        assert!(problems[0].starts_with("node.yaml: node/NodeDown: label severity"));
    }
}
