//! Sealed Secrets controller

use crate::suite::{CheckResult, Context, Scenario};
use anyhow::Context as _;
use async_trait::async_trait;
use indoc::indoc;

const SECRET: &str = indoc! {r#"
    apiVersion: v1
    kind: Secret
    metadata:
      name: sealed-secret-test
      namespace: default
    type: Opaque
    data:
      foo: YmFy
"#};

pub struct PrepareSealedSecret;

#[async_trait]
impl Scenario for PrepareSealedSecret {
    fn name(&self) -> &str {
        "preparing sealed-secret"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        // TODO: use the kubeseal installed on boot servers once neco ships it
        let path = ctx.config.assets_dir.join("kubeseal");
        let kubeseal = tokio::fs::read(&path)
            .await
            .with_context(|| format!("failed to read {}", path.display()))?;

        let boot0 = ctx.boot0();
        boot0.exec_with_input(&kubeseal, &["dd", "of=kubeseal"]).await?;
        boot0.exec(&["chmod", "+x", "./kubeseal"]).await?;

        boot0
            .exec_with_input(SECRET.as_bytes(), &["./kubeseal | kubectl apply -f -"])
            .await
            .context("failed to create a SealedSecret")?;
        Ok(())
    }
}

pub struct SealedSecret;

#[async_trait]
impl Scenario for SealedSecret {
    fn name(&self) -> &str {
        "sealed-secret"
    }

    async fn run(&self, ctx: &mut Context) -> CheckResult {
        let kubectl = &ctx.kubectl;
        ctx.poller
            .eventually(move || async move { kubectl.run(&["get", "secrets", "sealed-secret-test"]).await })
            .await
            .context("SealedSecret was not unsealed")?;
        Ok(())
    }
}
