//! MOCO MySQL operator

use crate::assertions::wait_deployment_available;
use crate::suite::{CheckResult, Context, Scenario};
use anyhow::{bail, ensure, Context as _};
use async_trait::async_trait;
use indoc::indoc;

const NAMESPACE: &str = "test-moco";

const MYSQL_CLUSTER: &str = indoc! {r#"
    apiVersion: moco.cybozu.com/v1alpha1
    kind: MySQLCluster
    metadata:
      name: my-cluster
      namespace: test-moco
    spec:
      replicas: 3
      podTemplate:
        spec:
          containers:
          - name: mysqld
            image: quay.io/cybozu/moco-mysql:8.0.18
            resources:
              requests:
                memory: "1Gi"
            livenessProbe:
              exec:
                command: ["/moco-bin/moco-agent", "ping"]
              initialDelaySeconds: 5
              periodSeconds: 5
            readinessProbe:
              httpGet:
                path: /health
                port: 9080
              initialDelaySeconds: 10
              periodSeconds: 5
          - name: err-log
            image: quay.io/cybozu/filebeat:7.9.2.1
            args: ["-c", "/etc/filebeat.yml"]
            volumeMounts:
            - name: err-filebeat-config
              mountPath: /etc/filebeat.yml
              readOnly: true
              subPath: filebeat.yml
            - name: err-filebeat-data
              mountPath: /var/lib/filebeat
            - name: var-log
              mountPath: /var/log/mysql
              readOnly: true
            - name: tmp
              mountPath: /tmp
          - name: slow-log
            image: quay.io/cybozu/filebeat:7.9.2.1
            args: ["-c", "/etc/filebeat.yml"]
            volumeMounts:
            - name: slow-filebeat-config
              mountPath: /etc/filebeat.yml
              readOnly: true
              subPath: filebeat.yml
            - name: slow-filebeat-data
              mountPath: /var/lib/filebeat
            - name: var-log
              mountPath: /var/log/mysql
              readOnly: true
            - name: tmp
              mountPath: /tmp
          securityContext:
            runAsUser: 10000
            runAsGroup: 10000
            fsGroup: 10000
          volumes:
          - name: err-filebeat-config
            configMap:
              name: err-filebeat-config
          - name: err-filebeat-data
            emptyDir: {}
          - name: slow-filebeat-config
            configMap:
              name: slow-filebeat-config
          - name: slow-filebeat-data
            emptyDir: {}
      dataVolumeClaimTemplateSpec:
        storageClassName: topolvm-provisioner
        accessModes: [ "ReadWriteOnce" ]
        resources:
          requests:
            storage: 3Gi
      mysqlConfigMapName: my-cluster-mycnf
    ---
    apiVersion: v1
    kind: ConfigMap
    metadata:
      name: my-cluster-mycnf
      namespace: test-moco
    data:
      max_connections: "5000"
      max_connect_errors: "10"
      max_allowed_packet: 1G
      max_heap_table_size: 64M
    ---
    apiVersion: v1
    kind: ConfigMap
    metadata:
      name: err-filebeat-config
      namespace: test-moco
    data:
      filebeat.yml: |-
        path.data: /var/lib/filebeat
        filebeat.inputs:
        - type: log
          enabled: true
          paths:
            - /var/log/mysql/mysql.err*
        output.console:
          codec.format:
            string: '%{[message]}'
        logging.files:
          path: /tmp
          name: filebeat
          keepfiles: 7
          permissions: 0644
    ---
    apiVersion: v1
    kind: ConfigMap
    metadata:
      name: slow-filebeat-config
      namespace: test-moco
    data:
      filebeat.yml: |-
        path.data: /var/lib/filebeat
        filebeat.inputs:
        - type: log
          enabled: true
          paths:
            - /var/log/mysql/mysql.slow*
        output.console:
          codec.format:
            string: '%{[message]}'
        logging.files:
          path: /tmp
          name: filebeat
          keepfiles: 7
          permissions: 0644
"#};

pub struct PrepareMoco;

#[async_trait]
impl Scenario for PrepareMoco {
    fn name(&self) -> &str {
        "preparing moco"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        ctx.kubectl.create_namespace_if_not_exists(NAMESPACE).await?;
        ctx.kubectl
            .apply(MYSQL_CLUSTER)
            .await
            .context("failed to create mysqlcluster")?;
        Ok(())
    }
}

pub struct Moco;

#[async_trait]
impl Scenario for Moco {
    fn name(&self) -> &str {
        "moco"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        wait_deployment_available(kubectl, "moco-system", "moco-controller-manager", 1).await?;

        ctx.poller
            .eventually(move || async move {
                let ready = kubectl
                    .jsonpath(&["--namespace=test-moco", "mysqlcluster/my-cluster"], "'{.status.ready}'")
                    .await?;
                if ready != "True" {
                    bail!("MySQLCluster is not ready");
                }
                anyhow::Ok(())
            })
            .await?;

        let out = kubectl
            .run(&["moco", "-n", NAMESPACE, "mysql", "-u", "root", "my-cluster", "--", "--version"])
            .await?;
        ensure!(
            out.stdout.contains("mysql  Ver 8"),
            "unexpected mysql version: {}",
            out.stdout
        );
        Ok(())
    }
}
