pub mod argocd;
pub mod assertions;
pub mod certmanager;
pub mod checks;
pub mod config;
pub mod exec;
pub mod kubectl;
pub mod manifest;
pub mod poll;
pub mod prometheus;
pub mod rbac;
pub mod suite;
pub mod validation;

// Re-export for main.rs and the integration tests
pub use crate::config::Config;
pub use crate::suite::{Context, Report, Suite};
pub use crate::validation::ValidationReport;
