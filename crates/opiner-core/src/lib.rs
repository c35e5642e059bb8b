//! dbt-opiner core
//!
//! Core domain model shared by every crate: severities, lint results,
//! the configuration file and scoped git checkouts.
//! Never rename opinion codes - they are part of the public API.

pub mod config;
pub mod git;
pub mod lint_result;
pub mod report;
pub mod severity;

pub use config::{Config, ConfigError, CustomOpinionsConfig, FilePatterns, OpinionsConfig, SharedConfig};
pub use git::{Checkout, GitError};
pub use lint_result::{sort_results, FileKind, FileRef, LintResult};
pub use report::{Report, ReportSummary, REPORT_SCHEMA_VERSION};
pub use severity::Severity;
