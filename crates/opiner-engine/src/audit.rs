//! Audit statistics over lint results
//!
//! Three tables: pass rates per (project, severity), pass rates per
//! (project, severity, tag), and the flat list of results.

use opiner_core::LintResult;
use serde::Serialize;
use std::collections::BTreeMap;

/// Pass rate of a group of results
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Statistics {
    pub total_evaluated: usize,
    pub passed: usize,
    pub failed: usize,
    pub percentage_passed: f64,
}

impl Statistics {
    fn add(&mut self, passed: bool) {
        self.total_evaluated += 1;
        if passed {
            self.passed += 1;
        } else {
            self.failed += 1;
        }
        self.percentage_passed = self.passed as f64 / self.total_evaluated as f64 * 100.0;
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GeneralRow {
    pub dbt_project_name: String,
    pub severity: String,
    #[serde(flatten)]
    pub statistics: Statistics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TagRow {
    pub dbt_project_name: String,
    pub severity: String,
    pub tag: String,
    #[serde(flatten)]
    pub statistics: Statistics,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DetailRow {
    pub dbt_project_name: String,
    pub file_name: String,
    pub opinion_code: String,
    pub severity: String,
    pub tags: Vec<String>,
    pub passed: bool,
}

/// Which audit table(s) to render
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditKind {
    General,
    ByTag,
    Detailed,
    All,
}

/// A rendered table: header and string cells
#[derive(Debug, Clone, PartialEq)]
pub struct AuditTable {
    pub title: &'static str,
    pub headers: Vec<&'static str>,
    pub rows: Vec<Vec<String>>,
}

impl AuditTable {
    /// GitHub-flavored markdown table
    pub fn to_markdown(&self) -> String {
        let mut md = String::new();
        md.push_str(&format!("| {} |\n", self.headers.join(" | ")));
        md.push_str(&format!(
            "|{}|\n",
            self.headers.iter().map(|_| "---").collect::<Vec<_>>().join("|")
        ));
        for row in &self.rows {
            md.push_str(&format!("| {} |\n", row.join(" | ")));
        }
        md
    }
}

/// Aggregated audit of a lint run
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Audit {
    pub general: Vec<GeneralRow>,
    pub by_tag: Vec<TagRow>,
    pub detailed: Vec<DetailRow>,
}

impl Audit {
    /// Aggregate `results`; groups are ordered by key
    pub fn from_results(results: &[LintResult]) -> Self {
        let mut general: BTreeMap<(String, String), Statistics> = BTreeMap::new();
        let mut by_tag: BTreeMap<(String, String, String), Statistics> = BTreeMap::new();
        let mut detailed = Vec::with_capacity(results.len());

        for result in results {
            let project = result.file.project.clone();
            let severity = result.severity.to_string();

            general
                .entry((project.clone(), severity.clone()))
                .or_default()
                .add(result.passed);

            let mut tags: Vec<&String> = result.tags.iter().collect();
            tags.sort();
            tags.dedup();
            for tag in tags {
                by_tag
                    .entry((project.clone(), severity.clone(), tag.clone()))
                    .or_default()
                    .add(result.passed);
            }

            detailed.push(DetailRow {
                dbt_project_name: project,
                file_name: result.file.path.display().to_string(),
                opinion_code: result.opinion_code.clone(),
                severity,
                tags: result.tags.clone(),
                passed: result.passed,
            });
        }

        Self {
            general: general
                .into_iter()
                .map(|((dbt_project_name, severity), statistics)| GeneralRow {
                    dbt_project_name,
                    severity,
                    statistics,
                })
                .collect(),
            by_tag: by_tag
                .into_iter()
                .map(|((dbt_project_name, severity, tag), statistics)| TagRow {
                    dbt_project_name,
                    severity,
                    tag,
                    statistics,
                })
                .collect(),
            detailed,
        }
    }

    /// Tables for `kind`, in display order
    pub fn tables(&self, kind: AuditKind) -> Vec<AuditTable> {
        match kind {
            AuditKind::General => vec![self.general_table()],
            AuditKind::ByTag => vec![self.by_tag_table()],
            AuditKind::Detailed => vec![self.detailed_table()],
            AuditKind::All => vec![self.general_table(), self.by_tag_table(), self.detailed_table()],
        }
    }

    fn general_table(&self) -> AuditTable {
        AuditTable {
            title: "General statistics",
            headers: vec![
                "dbt_project_name",
                "severity",
                "total_evaluated",
                "passed",
                "failed",
                "percentage_passed",
            ],
            rows: self
                .general
                .iter()
                .map(|row| {
                    let mut cells = vec![row.dbt_project_name.clone(), row.severity.clone()];
                    cells.extend(statistics_cells(&row.statistics));
                    cells
                })
                .collect(),
        }
    }

    fn by_tag_table(&self) -> AuditTable {
        AuditTable {
            title: "Statistics by tag",
            headers: vec![
                "dbt_project_name",
                "severity",
                "tag",
                "total_evaluated",
                "passed",
                "failed",
                "percentage_passed",
            ],
            rows: self
                .by_tag
                .iter()
                .map(|row| {
                    let mut cells = vec![
                        row.dbt_project_name.clone(),
                        row.severity.clone(),
                        row.tag.clone(),
                    ];
                    cells.extend(statistics_cells(&row.statistics));
                    cells
                })
                .collect(),
        }
    }

    fn detailed_table(&self) -> AuditTable {
        AuditTable {
            title: "Detailed results",
            headers: vec![
                "dbt_project_name",
                "file_name",
                "opinion_code",
                "severity",
                "tags",
                "passed",
            ],
            rows: self
                .detailed
                .iter()
                .map(|row| {
                    vec![
                        row.dbt_project_name.clone(),
                        row.file_name.clone(),
                        row.opinion_code.clone(),
                        row.severity.clone(),
                        row.tags.join(", "),
                        row.passed.to_string(),
                    ]
                })
                .collect(),
        }
    }
}

fn statistics_cells(statistics: &Statistics) -> [String; 4] {
    [
        statistics.total_evaluated.to_string(),
        statistics.passed.to_string(),
        statistics.failed.to_string(),
        format!("{:.1}", statistics.percentage_passed),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use opiner_core::{FileKind, FileRef, Severity};
    use pretty_assertions::assert_eq;

    fn result(project: &str, code: &str, severity: Severity, passed: bool, tags: &[&str]) -> LintResult {
        LintResult::new(
            FileRef::new(format!("/{}/models/x.sql", project), FileKind::Sql, project),
            code,
            passed,
            severity,
            "msg",
        )
        .with_tags(tags.iter().copied())
    }

    fn sample() -> Vec<LintResult> {
        vec![
            result("shop", "O001", Severity::Must, true, &["metadata", "models"]),
            result("shop", "O003", Severity::Must, false, &["metadata", "models"]),
            result("shop", "O005", Severity::Should, false, &["models"]),
            result("shop", "O006", Severity::Must, true, &[]),
            result("billing", "O001", Severity::Must, true, &["metadata"]),
        ]
    }

    #[test]
    fn general_groups_by_project_and_severity() {
        let audit = Audit::from_results(&sample());
        let keys: Vec<_> = audit
            .general
            .iter()
            .map(|r| (r.dbt_project_name.as_str(), r.severity.as_str()))
            .collect();
        assert_eq!(keys, vec![("billing", "must"), ("shop", "must"), ("shop", "should")]);

        let shop_must = &audit.general[1].statistics;
        assert_eq!(shop_must.total_evaluated, 3);
        assert_eq!(shop_must.passed, 2);
        assert_eq!(shop_must.failed, 1);
        assert!((shop_must.percentage_passed - 200.0 / 3.0).abs() < 1e-9);
    }

    #[test]
    fn tags_are_exploded() {
        let audit = Audit::from_results(&sample());
        let shop_must_models = audit
            .by_tag
            .iter()
            .find(|r| r.dbt_project_name == "shop" && r.severity == "must" && r.tag == "models")
            .unwrap();
        assert_eq!(shop_must_models.statistics.total_evaluated, 2);

        // untagged results only appear in the general table
        let tagged_total: usize = audit
            .by_tag
            .iter()
            .filter(|r| r.tag == "models")
            .map(|r| r.statistics.total_evaluated)
            .sum();
        assert_eq!(tagged_total, 3);
        assert_eq!(audit.by_tag.len(), 4);
        assert_eq!(audit.detailed.len(), 5);
    }

    #[test]
    fn markdown_table() {
        let audit = Audit::from_results(&sample()[..1]);
        let tables = audit.tables(AuditKind::General);
        assert_eq!(
            tables[0].to_markdown(),
            "| dbt_project_name | severity | total_evaluated | passed | failed | percentage_passed |\n\
             |---|---|---|---|---|---|\n\
             | shop | must | 1 | 1 | 0 | 100.0 |\n"
        );
        assert_eq!(audit.tables(AuditKind::All).len(), 3);
    }

    #[test]
    fn empty_results() {
        let audit = Audit::from_results(&[]);
        assert_eq!(audit, Audit::default());
        assert!(audit.tables(AuditKind::ByTag)[0].rows.is_empty());
    }
}
