//! Declarative custom opinions
//!
//! Teams ship their own opinions as TOML definition files:
//!
//! ```toml
//! [[opinion]]
//! code = "C001"
//! description = "Marts must be owned."
//! severity = "must"
//! tags = ["governance"]
//! requires = ["sqlfluff"]
//!
//! [opinion.check]
//! kind = "config_present"
//! keys = ["meta"]
//! ```
//!
//! Definitions are deserialized into DTOs, then validated into
//! `CustomOpinion`s.

use crate::opinion::{per_node, Evaluation, Opinion, OpinionMeta};
use opiner_core::Severity;
use opiner_dbt::{Node, ProjectFile, ResourceType};
use regex::Regex;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Contents of one definition file
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DefinitionFileDto {
    #[serde(rename = "opinion", default)]
    pub opinions: Vec<OpinionDto>,
}

/// TOML representation of a custom opinion
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpinionDto {
    pub code: String,

    #[serde(default)]
    pub description: String,

    /// `must` or `should`
    pub severity: String,

    #[serde(default)]
    pub tags: Vec<String>,

    /// Executables that must be on `PATH`
    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default)]
    pub applies_to: AppliesTo,

    pub check: CheckDto,
}

/// Node types a custom opinion inspects
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AppliesTo {
    #[default]
    Model,
    Macro,
    Source,
}

impl AppliesTo {
    fn resource_type(self) -> ResourceType {
        match self {
            Self::Model => ResourceType::Model,
            Self::Macro => ResourceType::Macro,
            Self::Source => ResourceType::Source,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CheckDto {
    NameMatches { pattern: String },
    DescriptionContains { keywords: Vec<String> },
    ConfigPresent { keys: Vec<String> },
    ColumnsMatch { pattern: String },
    ContentForbids { pattern: String },
}

/// Validated check
#[derive(Debug, Clone)]
pub enum Check {
    /// Node name matches the pattern
    NameMatches(Regex),

    /// Description mentions every keyword (case-insensitive)
    DescriptionContains(Vec<String>),

    /// Every config key is set
    ConfigPresent(Vec<String>),

    /// Every declared column name matches the pattern
    ColumnsMatch(Regex),

    /// SQL content does not match the pattern
    ContentForbids(Regex),
}

fn compile(code: &str, pattern: &str) -> Result<Regex, OpinionError> {
    Regex::new(pattern).map_err(|e| OpinionError::InvalidDefinition(code.to_string(), e.to_string()))
}

impl Check {
    fn from_dto(code: &str, dto: CheckDto) -> Result<Self, OpinionError> {
        Ok(match dto {
            CheckDto::NameMatches { pattern } => Self::NameMatches(compile(code, &pattern)?),
            CheckDto::DescriptionContains { keywords } => Self::DescriptionContains(keywords),
            CheckDto::ConfigPresent { keys } => Self::ConfigPresent(keys),
            CheckDto::ColumnsMatch { pattern } => Self::ColumnsMatch(compile(code, &pattern)?),
            CheckDto::ContentForbids { pattern } => Self::ContentForbids(compile(code, &pattern)?),
        })
    }
}

/// Opinion defined in a TOML file
#[derive(Debug, Clone)]
pub struct CustomOpinion {
    meta: OpinionMeta,
    applies_to: ResourceType,
    check: Check,
    /// Definition file, for diagnostics
    origin: PathBuf,
}

impl CustomOpinion {
    /// Validate a definition
    pub fn from_dto(dto: OpinionDto, origin: &Path) -> Result<Self, OpinionError> {
        let code = dto.code.trim().to_string();
        if code.is_empty() {
            return Err(OpinionError::InvalidDefinition(
                origin.display().to_string(),
                "empty opinion code".to_string(),
            ));
        }
        let severity: Severity = dto
            .severity
            .parse()
            .map_err(|e: String| OpinionError::InvalidDefinition(code.clone(), e))?;
        let check = Check::from_dto(&code, dto.check)?;

        let mut meta = OpinionMeta::new(code, severity, dto.description);
        meta.tags = dto.tags;
        meta.requires = dto.requires;

        Ok(Self {
            meta,
            applies_to: dto.applies_to.resource_type(),
            check,
            origin: origin.to_path_buf(),
        })
    }

    pub fn origin(&self) -> &Path {
        &self.origin
    }

    fn describe(&self, node: &Node) -> String {
        format!("{} {}", node.resource_type, node.name)
    }

    fn check_node(&self, node: &Node) -> Option<(bool, String)> {
        let subject = self.describe(node);
        let verb = self.meta.verb();
        match &self.check {
            Check::NameMatches(pattern) => Some(if pattern.is_match(&node.name) {
                (true, format!("{} matches {}.", subject, pattern))
            } else {
                (false, format!("{} {} match {}.", subject, verb, pattern))
            }),
            Check::DescriptionContains(keywords) => {
                let description = node.description.to_lowercase();
                let missing: Vec<&str> = keywords
                    .iter()
                    .filter(|k| !description.contains(&k.to_lowercase()))
                    .map(String::as_str)
                    .collect();
                Some(if missing.is_empty() {
                    (true, format!("{} description has all required keywords.", subject))
                } else {
                    (
                        false,
                        format!(
                            "{} description {} contain the keywords: {}.",
                            subject,
                            verb,
                            missing.join(", ")
                        ),
                    )
                })
            }
            Check::ConfigPresent(keys) => {
                let missing: Vec<&str> = keys
                    .iter()
                    .filter(|k| node.config.get(k).is_none())
                    .map(String::as_str)
                    .collect();
                Some(if missing.is_empty() {
                    (true, format!("{} has all required config keys.", subject))
                } else {
                    (
                        false,
                        format!("{} {} set the config keys: {}.", subject, verb, missing.join(", ")),
                    )
                })
            }
            Check::ColumnsMatch(pattern) => {
                if node.columns.is_empty() {
                    return None;
                }
                let offending: Vec<&str> = node
                    .columns
                    .keys()
                    .filter(|name| !pattern.is_match(name))
                    .map(String::as_str)
                    .collect();
                Some(if offending.is_empty() {
                    (true, format!("All columns of {} match {}.", subject, pattern))
                } else {
                    (
                        false,
                        format!(
                            "Columns {} of {} {} match {}.",
                            offending.join(", "),
                            subject,
                            verb,
                            pattern
                        ),
                    )
                })
            }
            // handled on the file content
            Check::ContentForbids(_) => None,
        }
    }
}

impl Opinion for CustomOpinion {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        if let Check::ContentForbids(pattern) = &self.check {
            let ProjectFile::Sql(sql) = file else {
                return Evaluation::Skip;
            };
            if sql.node.resource_type != self.applies_to {
                return Evaluation::Skip;
            }
            let subject = self.describe(&sql.node);
            let result = match pattern.find(&sql.content) {
                Some(found) => self.meta.result(
                    file,
                    false,
                    format!(
                        "{} {} not contain `{}`.",
                        subject,
                        self.meta.verb(),
                        found.as_str().trim()
                    ),
                ),
                None => self
                    .meta
                    .result(file, true, format!("{} has no forbidden content.", subject)),
            };
            return result.into();
        }

        per_node(
            &self.meta,
            file,
            |node| node.resource_type == self.applies_to,
            |node| self.check_node(node),
        )
    }
}

/// Definition files (`*.toml`) under `dir`, sorted
pub fn definition_files(dir: &Path) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = walkdir::WalkDir::new(dir)
        .follow_links(true)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| path.extension().is_some_and(|ext| ext == "toml"))
        .collect();
    files.sort();
    files
}

/// Parse one definition file
///
/// The file must be valid TOML; individual definitions that fail validation
/// are returned as errors next to the valid ones.
pub fn load_definitions(path: &Path) -> Result<Vec<Result<CustomOpinion, OpinionError>>, OpinionError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| OpinionError::IoError(path.display().to_string(), e.to_string()))?;
    let dto: DefinitionFileDto = toml::from_str(&contents)
        .map_err(|e| OpinionError::ParseError(path.display().to_string(), e.to_string()))?;

    Ok(dto
        .opinions
        .into_iter()
        .map(|opinion| CustomOpinion::from_dto(opinion, path))
        .collect())
}

/// Whether `program` resolves to a file on `PATH`
pub fn on_path(program: &str) -> bool {
    let candidate = Path::new(program);
    if candidate.components().count() > 1 {
        return candidate.is_file();
    }
    let Some(path) = std::env::var_os("PATH") else {
        return false;
    };
    std::env::split_paths(&path).any(|dir| {
        let full = dir.join(program);
        full.is_file() || (cfg!(windows) && full.with_extension("exe").is_file())
    })
}

/// Opinion definition and settings errors
#[derive(Debug, thiserror::Error)]
pub enum OpinionError {
    #[error("Invalid settings for opinion {0}: {1}")]
    Settings(String, String),

    #[error("Failed to read opinion definitions {0}: {1}")]
    IoError(String, String),

    #[error("Failed to parse opinion definitions {0}: {1}")]
    ParseError(String, String),

    #[error("Invalid opinion {0}: {1}")]
    InvalidDefinition(String, String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{docs_file, model, project, sql_file_with};
    use opiner_dbt::ColumnDefinition;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn parse(toml: &str) -> Vec<Result<CustomOpinion, OpinionError>> {
        let dto: DefinitionFileDto = toml::from_str(toml).unwrap();
        dto.opinions
            .into_iter()
            .map(|o| CustomOpinion::from_dto(o, Path::new("custom.toml")))
            .collect()
    }

    fn single(toml: &str) -> CustomOpinion {
        parse(toml).pop().unwrap().unwrap()
    }

    #[test]
    fn parses_definition() {
        let opinion = single(
            r#"
[[opinion]]
code = "C001"
description = "Marts must be owned."
severity = "Should"
tags = ["governance"]
requires = ["git"]

[opinion.check]
kind = "config_present"
keys = ["meta"]
"#,
        );
        assert_eq!(opinion.code(), "C001");
        assert_eq!(opinion.severity(), Severity::Should);
        assert_eq!(opinion.tags(), ["governance".to_string()]);
        assert_eq!(opinion.requires(), ["git".to_string()]);
        assert_eq!(opinion.origin(), Path::new("custom.toml"));
    }

    #[test]
    fn rejects_invalid_definitions() {
        let results = parse(
            r#"
[[opinion]]
code = " "
severity = "must"
check = { kind = "name_matches", pattern = "^fct_" }

[[opinion]]
code = "C002"
severity = "could"
check = { kind = "name_matches", pattern = "^fct_" }

[[opinion]]
code = "C003"
severity = "must"
check = { kind = "columns_match", pattern = "([" }
"#,
        );
        assert_eq!(results.len(), 3);
        assert!(results.iter().all(|r| matches!(r, Err(OpinionError::InvalidDefinition(_, _)))));
    }

    #[test]
    fn unknown_check_kind_is_a_parse_error() {
        let toml = "[[opinion]]\ncode = \"C001\"\nseverity = \"must\"\ncheck = { kind = \"nope\" }\n";
        assert!(toml::from_str::<DefinitionFileDto>(toml).is_err());
    }

    #[test]
    fn name_and_columns_checks() {
        let names = single(
            "[[opinion]]\ncode = \"C001\"\nseverity = \"must\"\ncheck = { kind = \"name_matches\", pattern = \"^(stg|fct)_\" }\n",
        );
        let columns = single(
            "[[opinion]]\ncode = \"C002\"\nseverity = \"must\"\ncheck = { kind = \"columns_match\", pattern = \"^[a-z_]+$\" }\n",
        );
        let ctx = project(vec![
            model("fct_orders").with_column(ColumnDefinition::new("orderId")),
            model("orders"),
        ]);

        let Evaluation::Many(results) = names.evaluate(&docs_file(&ctx)) else {
            panic!("expected per-node results");
        };
        assert_eq!(results.iter().filter(|r| r.passed).count(), 1);

        let Evaluation::Many(results) = columns.evaluate(&docs_file(&ctx)) else {
            panic!("expected per-node results");
        };
        assert_eq!(results.len(), 1);
        assert_eq!(
            results[0].message,
            "Columns orderId of model fct_orders must match ^[a-z_]+$."
        );
    }

    #[test]
    fn config_and_description_checks() {
        let config = single(
            "[[opinion]]\ncode = \"C001\"\nseverity = \"should\"\ncheck = { kind = \"config_present\", keys = [\"meta\", \"tags\"] }\n",
        );
        let description = single(
            "[[opinion]]\ncode = \"C002\"\nseverity = \"must\"\ncheck = { kind = \"description_contains\", keywords = [\"Grain\"] }\n",
        );
        let ctx = project(vec![model("fct_orders")
            .with_config("meta", json!({"owner": "x"}))
            .with_description("One row per order (grain: order_id)")]);
        let file = sql_file_with(&ctx, "fct_orders", "select 1");

        let Evaluation::Single(result) = config.evaluate(&file) else {
            panic!("expected a single result");
        };
        assert!(!result.passed);
        assert_eq!(result.message, "model fct_orders should set the config keys: tags.");

        let Evaluation::Single(result) = description.evaluate(&file) else {
            panic!("expected a single result");
        };
        assert!(result.passed);
    }

    #[test]
    fn content_forbids_only_sql() {
        let opinion = single(
            "[[opinion]]\ncode = \"C001\"\nseverity = \"must\"\ncheck = { kind = \"content_forbids\", pattern = \"(?i)select\\\\s+distinct\" }\n",
        );
        let ctx = project(vec![model("fct_orders")]);

        let Evaluation::Single(result) =
            opinion.evaluate(&sql_file_with(&ctx, "fct_orders", "SELECT DISTINCT id from x"))
        else {
            panic!("expected a single result");
        };
        assert!(!result.passed);
        assert_eq!(result.message, "model fct_orders must not contain `SELECT DISTINCT`.");

        assert_eq!(opinion.evaluate(&docs_file(&ctx)), Evaluation::Skip);
    }

    #[test]
    fn applies_to_filters_nodes() {
        let opinion = single(
            "[[opinion]]\ncode = \"C001\"\nseverity = \"must\"\napplies_to = \"macro\"\ncheck = { kind = \"name_matches\", pattern = \"^m_\" }\n",
        );
        let ctx = project(vec![model("fct_orders")]);
        assert_eq!(
            opinion.evaluate(&sql_file_with(&ctx, "fct_orders", "select 1")),
            Evaluation::Skip
        );
    }

    #[test]
    fn finds_toml_files_only() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("b.toml"), "").unwrap();
        std::fs::write(dir.path().join("a.toml"), "").unwrap();
        std::fs::write(dir.path().join("notes.md"), "").unwrap();
        assert_eq!(
            definition_files(dir.path()),
            vec![dir.path().join("a.toml"), dir.path().join("b.toml")]
        );
    }

    #[test]
    fn path_lookup() {
        assert!(!on_path("definitely-not-an-installed-binary-4711"));
    }
}
