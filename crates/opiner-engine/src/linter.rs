//! Evaluation engine
//!
//! Runs every opinion of a pack against project files, honoring inline
//! suppressions and `ignore_files` patterns, and accumulates the results.

use crate::audit::Audit;
use crate::pack::OpinionsPack;
use opiner_core::{sort_results, Config, FileKind, LintResult, Report};
use opiner_dbt::{DbtProject, ProjectFile};
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::path::Path;

/// Accumulates lint results over a run
pub struct Linter {
    pack: OpinionsPack,

    /// `ignore_files` patterns, anchored at the start of the path
    ignore_files: BTreeMap<String, Regex>,

    no_ignore: bool,
    results: Vec<LintResult>,
    files_checked: usize,
}

impl Linter {
    /// With `no_ignore`, suppression directives and `ignore_files` are disregarded
    pub fn new(pack: OpinionsPack, config: &Config, no_ignore: bool) -> Self {
        let ignore_files = config
            .opinions_config
            .ignore_files
            .iter()
            .filter_map(|(code, pattern)| match Regex::new(&format!("^(?:{})", pattern)) {
                Ok(regex) => Some((code.clone(), regex)),
                Err(e) => {
                    tracing::warn!("Ignoring invalid ignore_files pattern for {}: {}", code, e);
                    None
                }
            })
            .collect();

        Self {
            pack,
            ignore_files,
            no_ignore,
            results: Vec::new(),
            files_checked: 0,
        }
    }

    /// Evaluate every opinion against one file
    pub fn lint_file(&mut self, file: &ProjectFile) {
        tracing::debug!("Linting file {}", file.path().display());
        self.files_checked += 1;

        for opinion in self.pack.opinions() {
            let code = opinion.code();
            if !self.no_ignore {
                if file.is_suppressed(code) {
                    tracing::debug!("Skipping opinion {} because of noqa", code);
                    continue;
                }
                if self.path_ignored(code, file.path()) {
                    tracing::debug!("Skipping opinion {} because of ignore_files", code);
                    continue;
                }
            }

            tracing::debug!("Checking opinion {}", code);
            if let Some(results) = opinion.check_opinion(file) {
                self.results.extend(results);
            }
        }
    }

    /// Lint every file of a loaded project
    pub fn lint_project(&mut self, project: &DbtProject) {
        tracing::info!("Linting {} file(s) of project {}", project.files().len(), project.name());
        for file in project.files() {
            self.lint_file(file);
        }
    }

    fn path_ignored(&self, code: &str, path: &Path) -> bool {
        self.ignore_files
            .get(code)
            .is_some_and(|pattern| pattern.is_match(&path.to_string_lossy()))
    }

    /// Accumulated results in report order
    ///
    /// With `deduplicate`, a SQL result is dropped when the same opinion also
    /// reported on the YAML file documenting the SQL file's node.
    pub fn results(&self, deduplicate: bool) -> Vec<LintResult> {
        let mut results = if deduplicate {
            deduplicated(&self.results)
        } else {
            self.results.clone()
        };
        sort_results(&mut results);
        results
    }

    pub fn files_checked(&self) -> usize {
        self.files_checked
    }

    /// `1` when a retained result is a failed `must`, else `0`
    pub fn exit_code(&self) -> i32 {
        if self.results(true).iter().any(LintResult::is_blocking_failure) {
            1
        } else {
            0
        }
    }

    /// Audit statistics over the deduplicated results
    pub fn audit(&self) -> Audit {
        Audit::from_results(&self.results(true))
    }

    /// Serializable report of the deduplicated results
    pub fn report(&self) -> Report {
        Report::from_results(self.results(true), self.files_checked)
    }
}

fn deduplicated(results: &[LintResult]) -> Vec<LintResult> {
    let yaml_results: HashSet<(&str, &Path)> = results
        .iter()
        .filter(|r| r.file.kind == FileKind::Yaml)
        .map(|r| (r.opinion_code.as_str(), r.file.path.as_path()))
        .collect();

    results
        .iter()
        .filter(|r| {
            let duplicated = r.file.kind == FileKind::Sql
                && r.file
                    .docs_path
                    .as_deref()
                    .is_some_and(|docs| yaml_results.contains(&(r.opinion_code.as_str(), docs)));
            !duplicated
        })
        .cloned()
        .collect()
}
