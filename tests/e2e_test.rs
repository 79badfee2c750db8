//! neco-apps end-to-end tests
//!
//! Needs the placemat environment: boot servers reachable with SSH_PRIVKEY and
//! the remaining variables `Config::apply_env` reads.
//!
//! Run with: cargo test --test e2e_test -- --nocapture

#![allow(clippy::expect_used)] // Integration tests can use expect for clarity

use neco_apps_test::{Config, Context, Suite};

#[tokio::test]
async fn run_e2e_tests() {
    let config = Config::load(None).expect("Failed to load test config");
    if !config.is_e2e() {
        println!("⏭️  SSH_PRIVKEY is not set, skipping e2e tests");
        return;
    }

    let suite = Suite::standard(&config);
    let mut ctx = Context::connect(config).expect("Failed to create test context");

    let report = suite.run(&mut ctx).await;
    report.print_summary();

    if !report.is_success() {
        panic!("{} scenario(s) failed", report.failed());
    }
}
