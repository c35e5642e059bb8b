//! JSON lint report
//!
//! Written by `dbt-opiner lint --report`. The `schema_version` field changes
//! whenever a field is removed or renamed.

use crate::lint_result::LintResult;
use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::path::Path;

pub const REPORT_SCHEMA_VERSION: u32 = 1;

/// Counts over the reported results
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub must_failures: usize,
    pub should_failures: usize,

    /// Files the linter visited, including those every opinion skipped
    pub files_checked: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Report {
    pub schema_version: u32,

    /// Generation time, RFC 3339
    pub generated_at: String,

    pub summary: ReportSummary,

    /// Results in report order
    pub results: Vec<LintResult>,
}

impl Report {
    /// Report over results already in report order
    pub fn from_results(results: Vec<LintResult>, files_checked: usize) -> Self {
        let mut summary = ReportSummary {
            total: results.len(),
            files_checked,
            ..ReportSummary::default()
        };
        for result in &results {
            match (result.passed, result.severity) {
                (true, _) => summary.passed += 1,
                (false, Severity::Must) => summary.must_failures += 1,
                (false, Severity::Should) => summary.should_failures += 1,
            }
        }

        Self {
            schema_version: REPORT_SCHEMA_VERSION,
            generated_at: chrono::Utc::now().to_rfc3339(),
            summary,
            results,
        }
    }

    /// A failed `must` result makes the run fail
    pub fn has_blocking_failures(&self) -> bool {
        self.summary.must_failures > 0
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }

    pub fn save_to_file(&self, path: &Path) -> Result<(), std::io::Error> {
        let json = self.to_json().map_err(std::io::Error::other)?;
        std::fs::write(path, json)
    }
}
