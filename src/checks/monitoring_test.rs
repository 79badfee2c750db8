#![allow(clippy::unwrap_used)] // Tests can use unwrap for brevity

use super::*;
use crate::prometheus::{parse_response, TargetsResult};

fn targets(json: &str) -> Vec<ActiveTarget> {
    let body = format!(r#"{{"status":"success","data":{{"activeTargets":{}}}}}"#, json);
    parse_response::<TargetsResult>(&body).unwrap().active_targets
}

fn jobs(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

#[test]
fn test_scrape_targets_all_up() {
    let active = targets(
        r#"[{"labels":{"job":"kubernetes-nodes"},"health":"up"},
            {"labels":{"job":"monitor-hw"},"health":"up"}]"#,
    );
    check_scrape_targets(&jobs(&["kubernetes-nodes", "monitor-hw"]), &active).unwrap();
}

#[test]
fn test_scrape_targets_tolerates_one_stopped_machine() {
    let active = targets(r#"[{"labels":{"job":"monitor-hw"},"health":"down"}]"#);
    check_scrape_targets(&jobs(&["monitor-hw"]), &active).unwrap();

    let err = check_scrape_targets(&jobs(&["monitor-hw", "monitor-hw"]), &active).unwrap_err();
    assert!(err.to_string().contains("two or more"));
}

#[test]
fn test_scrape_targets_other_job_down_or_missing() {
    let active = targets(r#"[{"labels":{"job":"kube-state-metrics"},"health":"down"}]"#);
    let err = check_scrape_targets(&jobs(&["kube-state-metrics"]), &active).unwrap_err();
    assert!(err.to_string().contains("not 'up'"));

    let err = check_scrape_targets(&jobs(&["missing"]), &active).unwrap_err();
    assert!(err.to_string().contains("not found"));
}

#[test]
fn test_scrape_job_names_from_configmaps() {
    let list: ItemList<ConfigMap> = serde_json::from_str(
        r#"{"items":[
            {"metadata":{"name":"other"},"data":{"foo":"bar"}},
            {"metadata":{"name":"prometheus-config"},"data":{"prometheus.yaml":
                "global:\n  scrape_interval: 30s\nscrape_configs:\n  - job_name: kubernetes-nodes\n  - job_name: monitor-hw\n"}}
        ]}"#,
    )
    .unwrap();

    assert_eq!(
        scrape_job_names(&list.items).unwrap(),
        vec!["kubernetes-nodes", "monitor-hw"]
    );
    assert!(scrape_job_names(&list.items[..1]).is_err());
}

#[test]
fn test_missing_health_report() {
    let ok = |url: &str| {
        format!(
            "ingresswatcher_http_get_successful_total{{code=\"200\",instance=\"1.2.3.4\",path=\"{}\"}} 5\n",
            url
        )
    };
    let mut metrics = [
        ok("http://a.example"),
        ok("https://a.example"),
        ok("http://b.example"),
    ]
    .concat();

    assert_eq!(
        missing_health_report(&metrics, &["a.example", "b.example"]),
        Some("https://b.example".to_string())
    );

    metrics.push_str(&ok("https://b.example"));
    assert_eq!(missing_health_report(&metrics, &["a.example", "b.example"]), None);
}

#[test]
fn test_check_endpoints() {
    let ready: Endpoints = serde_json::from_str(
        r#"{"subsets":[{"addresses":[{"ip":"10.69.0.4"}],"ports":[{"port":9100}]}]}"#,
    )
    .unwrap();
    check_endpoints(&ready).unwrap();

    let empty: Endpoints = serde_json::from_str(r#"{"subsets":[{"ports":[{"port":9100}]}]}"#).unwrap();
    assert!(check_endpoints(&empty).is_err());

    let none: Endpoints = serde_json::from_str("{}").unwrap();
    assert!(check_endpoints(&none).is_err());
}

#[test]
fn test_grafana_stats() {
    let stats: GrafanaStats = serde_json::from_str(r#"{"dashboards":12,"datasources":2,"users":1}"#).unwrap();
    check_grafana_stats(&stats).unwrap();

    let stats: GrafanaStats = serde_json::from_str(r#"{"dashboards":0,"datasources":2}"#).unwrap();
    assert_eq!(check_grafana_stats(&stats).unwrap_err().to_string(), "no dashboards");
}

#[test]
fn test_ingress_watcher_config_targets_test_fqdns() {
    let config = Config {
        test_id: "t1234".to_string(),
        ..Config::default()
    };
    let conf: serde_yaml::Value = serde_yaml::from_str(&ingress_watcher_config(&config)).unwrap();

    let urls: Vec<&str> = conf["targetURLs"]
        .as_sequence()
        .unwrap()
        .iter()
        .map(|u| u.as_str().unwrap())
        .collect();
    assert_eq!(urls[0], "https://t1234-ingress-health-bastion.gcp0.dev-ne.co");
    assert_eq!(urls[3], "http://t1234-ingress-health-global.gcp0.dev-ne.co");
    assert_eq!(conf["pushAddr"], "t1234-pushgateway-bastion.gcp0.dev-ne.co");
}

#[test]
fn test_rule_name_comparison() {
    let names = jobs(&["A", "B"]);
    compare_rule_names("alert", &names, &names).unwrap();
    assert!(compare_rule_names("alert", &names, &jobs(&["A"])).is_err());
    assert!(compare_rule_names("alert", &[], &[]).is_err());
}

#[test]
fn test_proxies_are_valid_yaml() {
    let config = Config::default();
    let docs = manifest::documents(&pushgateway_proxies(&config)).unwrap();
    assert_eq!(docs.len(), 2);

    let doc = &manifest::documents(&grafana_proxy("g.example")).unwrap()[0];
    assert_eq!(doc["spec"]["virtualhost"]["fqdn"], "g.example");

    let doc = &manifest::documents(&ingress_health_proxy("ih", "global", "h.example")).unwrap()[0];
    assert_eq!(doc["spec"]["virtualhost"]["tls"]["secretName"], "ih-tls");
}
