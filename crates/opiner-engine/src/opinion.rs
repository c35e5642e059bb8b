//! Opinion contract
//!
//! An opinion is one independent check. It reports zero, one or many
//! `LintResult`s for a file; `check_opinion` is the only entry point the
//! linter uses and guards the result stream against malformed output.

use opiner_core::{LintResult, Severity};
use opiner_dbt::{Node, ProjectFile};
use std::sync::Arc;

/// Boxed opinion, as stored in an `OpinionsPack`
pub type OpinionBox = Box<dyn Opinion>;

/// Identity shared by every opinion
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpinionMeta {
    /// Unique code, e.g. `O001`
    pub code: String,

    pub description: String,

    pub severity: Severity,

    /// Tags stamped on every result
    pub tags: Vec<String>,

    /// Executables that must be on `PATH` for the opinion to run
    pub requires: Vec<String>,
}

impl OpinionMeta {
    pub fn new(code: impl Into<String>, severity: Severity, description: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            description: description.into(),
            severity,
            tags: Vec::new(),
            requires: Vec::new(),
        }
    }

    pub fn with_tags(mut self, tags: &[&str]) -> Self {
        self.tags = tags.iter().map(|t| t.to_string()).collect();
        self
    }

    /// Result for `file` carrying this opinion's code and severity
    pub fn result(&self, file: &ProjectFile, passed: bool, message: impl Into<String>) -> LintResult {
        LintResult::new(file.file_ref(), self.code.clone(), passed, self.severity, message)
    }

    /// `must` / `should`, for messages
    pub fn verb(&self) -> &'static str {
        self.severity.as_str()
    }
}

/// Outcome of `Opinion::evaluate`
#[derive(Debug, Clone, PartialEq)]
pub enum Evaluation {
    /// The opinion does not apply to this file
    Skip,

    Single(LintResult),

    /// One result per applicable node (may be empty)
    Many(Vec<LintResult>),
}

impl From<LintResult> for Evaluation {
    fn from(result: LintResult) -> Self {
        Self::Single(result)
    }
}

impl From<Vec<LintResult>> for Evaluation {
    fn from(results: Vec<LintResult>) -> Self {
        Self::Many(results)
    }
}

impl From<Option<LintResult>> for Evaluation {
    fn from(result: Option<LintResult>) -> Self {
        result.map_or(Self::Skip, Self::Single)
    }
}

/// A linting check
pub trait Opinion: Send + Sync {
    fn meta(&self) -> &OpinionMeta;

    /// Evaluate the opinion against one file
    ///
    /// Inapplicable files return `Evaluation::Skip` or an empty `Many`.
    fn evaluate(&self, file: &ProjectFile) -> Evaluation;

    fn code(&self) -> &str {
        &self.meta().code
    }

    fn severity(&self) -> Severity {
        self.meta().severity
    }

    fn tags(&self) -> &[String] {
        &self.meta().tags
    }

    fn requires(&self) -> &[String] {
        &self.meta().requires
    }

    /// Evaluate and stamp tags
    ///
    /// Returns `None` when the opinion does not apply, or when it produced a
    /// result that does not carry its own code and severity; such output is
    /// discarded as a whole.
    fn check_opinion(&self, file: &ProjectFile) -> Option<Vec<LintResult>> {
        let results = match self.evaluate(file) {
            Evaluation::Skip => return None,
            Evaluation::Single(result) => vec![result],
            Evaluation::Many(results) => results,
        };

        if let Some(foreign) = results
            .iter()
            .find(|r| r.opinion_code != self.code() || r.severity != self.severity())
        {
            tracing::warn!(
                "Discarding results of opinion {} for {}: got a result for {} ({})",
                self.code(),
                file.path().display(),
                foreign.opinion_code,
                foreign.severity
            );
            return None;
        }

        let tags = self.tags();
        Some(
            results
                .into_iter()
                .map(|result| result.with_tags(tags.iter().cloned()))
                .collect(),
        )
    }
}

/// Evaluate `check` for every model of `file`
///
/// SQL files yield a single result for their model; YAML files one result
/// per documented model. `check` returning `None` skips that model.
pub fn per_model<F>(meta: &OpinionMeta, file: &ProjectFile, check: F) -> Evaluation
where
    F: Fn(&Node) -> Option<(bool, String)>,
{
    per_node(meta, file, Node::is_model, check)
}

/// `per_model` for any node selected by `applies`
pub fn per_node<P, F>(meta: &OpinionMeta, file: &ProjectFile, applies: P, check: F) -> Evaluation
where
    P: Fn(&Node) -> bool,
    F: Fn(&Node) -> Option<(bool, String)>,
{
    match file {
        ProjectFile::Sql(sql) if applies(&sql.node) => check(&sql.node)
            .map(|(passed, message)| meta.result(file, passed, message))
            .into(),
        ProjectFile::Yaml(yaml) => yaml
            .nodes
            .iter()
            .filter(|node| applies(node))
            .filter_map(|node| check(node))
            .map(|(passed, message)| meta.result(file, passed, message))
            .collect::<Vec<_>>()
            .into(),
        _ => Evaluation::Skip,
    }
}

/// Model defined by a SQL file
pub fn sql_model(file: &ProjectFile) -> Option<&Arc<Node>> {
    match file {
        ProjectFile::Sql(sql) if sql.node.is_model() => Some(&sql.node),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{model, project, sql_file};
    use opiner_core::FileRef;

    struct Fixed {
        meta: OpinionMeta,
        output: Evaluation,
    }

    impl Opinion for Fixed {
        fn meta(&self) -> &OpinionMeta {
            &self.meta
        }

        fn evaluate(&self, _file: &ProjectFile) -> Evaluation {
            self.output.clone()
        }
    }

    fn meta() -> OpinionMeta {
        OpinionMeta::new("X001", Severity::Must, "test").with_tags(&["metadata", "models"])
    }

    fn file() -> ProjectFile {
        sql_file(&project(vec![model("fct_orders")]), "fct_orders")
    }

    #[test]
    fn tags_are_stamped() {
        let meta = meta();
        let file = file();
        let opinion = Fixed {
            output: meta.result(&file, true, "ok").into(),
            meta,
        };

        let results = opinion.check_opinion(&file).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].tags, vec!["metadata", "models"]);
    }

    #[test]
    fn skip_is_none_and_empty_many_is_empty() {
        let file = file();
        let skip = Fixed {
            meta: meta(),
            output: Evaluation::Skip,
        };
        assert!(skip.check_opinion(&file).is_none());

        let empty = Fixed {
            meta: meta(),
            output: Evaluation::Many(Vec::new()),
        };
        assert_eq!(empty.check_opinion(&file), Some(Vec::new()));
    }

    #[test]
    fn foreign_results_are_rejected() {
        let file = file();
        let meta = meta();
        let own = meta.result(&file, true, "ok");
        let foreign = LintResult::new(
            FileRef::new("x.sql", opiner_core::FileKind::Sql, "shop"),
            "O001",
            false,
            Severity::Must,
            "not mine",
        );
        let opinion = Fixed {
            meta,
            output: Evaluation::Many(vec![own, foreign]),
        };
        assert!(opinion.check_opinion(&file).is_none());
    }

    #[test]
    fn wrong_severity_is_rejected() {
        let file = file();
        let meta = meta();
        let mut result = meta.result(&file, false, "bad");
        result.severity = Severity::Should;
        let opinion = Fixed {
            meta,
            output: result.into(),
        };
        assert!(opinion.check_opinion(&file).is_none());
    }
}
