//! Lint outcomes
//!
//! A `LintResult` is the pass/fail outcome of one opinion against one file,
//! or against one node documented inside a YAML file.

use crate::severity::Severity;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::path::{Path, PathBuf};

/// Kind of project file an outcome was produced for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileKind {
    /// Model, macro or analysis SQL
    Sql,

    /// Documentation, sources, `dbt_project.yml`, `profiles.yml`
    Yaml,

    /// Markdown docs blocks
    Markdown,
}

impl FileKind {
    /// Guess the kind from a file extension
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "sql" => Some(Self::Sql),
            "yml" | "yaml" => Some(Self::Yaml),
            "md" => Some(Self::Markdown),
            _ => None,
        }
    }
}

impl std::fmt::Display for FileKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Sql => write!(f, "sql"),
            Self::Yaml => write!(f, "yaml"),
            Self::Markdown => write!(f, "markdown"),
        }
    }
}

/// Reference to the file an outcome belongs to
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FileRef {
    /// Path of the linted file
    pub path: PathBuf,

    /// File kind
    pub kind: FileKind,

    /// Name of the dbt project owning the file
    pub project: String,

    /// For SQL files: the YAML file documenting the file's node
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub docs_path: Option<PathBuf>,
}

impl FileRef {
    /// Create a file reference without a paired docs file
    pub fn new(path: impl Into<PathBuf>, kind: FileKind, project: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            kind,
            project: project.into(),
            docs_path: None,
        }
    }

    /// Set the paired YAML docs file
    pub fn with_docs_path(mut self, docs_path: impl Into<PathBuf>) -> Self {
        self.docs_path = Some(docs_path.into());
        self
    }

    /// File name for reports, falling back to the full path
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_else(|| self.path.display().to_string())
    }
}

/// Outcome of one opinion evaluation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LintResult {
    /// File the outcome belongs to
    pub file: FileRef,

    /// Code of the opinion that produced it
    pub opinion_code: String,

    /// Whether the file satisfied the opinion
    pub passed: bool,

    /// Severity of the opinion
    pub severity: Severity,

    /// Human-readable explanation
    pub message: String,

    /// Tags of the opinion, stamped by the engine
    #[serde(default)]
    pub tags: Vec<String>,
}

impl LintResult {
    /// Create an untagged result
    pub fn new(
        file: FileRef,
        opinion_code: impl Into<String>,
        passed: bool,
        severity: Severity,
        message: impl Into<String>,
    ) -> Self {
        Self {
            file,
            opinion_code: opinion_code.into(),
            passed,
            severity,
            message: message.into(),
            tags: Vec::new(),
        }
    }

    /// Replace the tag set
    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    /// Whether this is a failed `must` outcome
    pub fn is_blocking_failure(&self) -> bool {
        !self.passed && self.severity.is_blocking()
    }

    /// Report order: severity descending, then opinion code ascending
    pub fn report_order(a: &LintResult, b: &LintResult) -> Ordering {
        b.severity
            .cmp(&a.severity)
            .then_with(|| a.opinion_code.cmp(&b.opinion_code))
    }
}

/// Sort results into report order (stable for equal keys)
pub fn sort_results(results: &mut [LintResult]) {
    results.sort_by(LintResult::report_order);
}
