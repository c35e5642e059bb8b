//! Project file handlers
//!
//! A `ProjectFile` wraps one file of a dbt project together with the
//! manifest node(s) it defines or documents and the opinion codes suppressed
//! for it. Suppression directives look like
//!
//! ```text
//! -- noqa: dbt-opiner O001, O004
//! # noqa: dbt-opiner all
//! ```
//!
//! A SQL file and the YAML file documenting its node share their directives.

use crate::manifest::{Node, ResourceType};
use crate::project::{ProjectContext, ProjectError};
use opiner_core::{FileKind, FileRef};
use regex::Regex;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, OnceLock};

/// Suppression code disabling every opinion
pub const SUPPRESS_ALL: &str = "all";

fn directive_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"(?i)\b(?:noqa:?|suppress)\s*dbt-opiner\s+([A-Za-z0-9_,\t ]+)").ok())
        .as_ref()
}

/// `{% macro` with optional whitespace control
fn macro_pattern() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\{%-?\s*macro\b").ok())
        .as_ref()
}

/// Opinion codes suppressed by inline directives in `content`
///
/// Codes are upper-cased; `all` is kept lower-case.
pub fn parse_suppressions(content: &str) -> BTreeSet<String> {
    let Some(pattern) = directive_pattern() else {
        return BTreeSet::new();
    };

    pattern
        .captures_iter(content)
        .flat_map(|caps| {
            caps[1]
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|code| !code.is_empty())
                .map(|code| {
                    if code.eq_ignore_ascii_case(SUPPRESS_ALL) {
                        SUPPRESS_ALL.to_string()
                    } else {
                        code.to_ascii_uppercase()
                    }
                })
                .collect::<Vec<_>>()
        })
        .collect()
}

/// A SQL file defining exactly one node
#[derive(Debug, Clone)]
pub struct SqlFile {
    pub path: PathBuf,
    pub content: String,
    pub node: Arc<Node>,
    pub project: Arc<ProjectContext>,
    pub suppressed: BTreeSet<String>,
}

/// A YAML file documenting zero or more nodes
#[derive(Debug, Clone)]
pub struct YamlFile {
    pub path: PathBuf,
    pub content: String,
    /// Parsed document (`Null` when the file is not valid YAML)
    pub document: serde_yaml::Value,
    pub nodes: Vec<Arc<Node>>,
    pub project: Arc<ProjectContext>,
    pub suppressed: BTreeSet<String>,
}

/// A markdown docs file
#[derive(Debug, Clone)]
pub struct MarkdownFile {
    pub path: PathBuf,
    pub content: String,
    pub project: Arc<ProjectContext>,
    pub suppressed: BTreeSet<String>,
}

/// Any lintable project file
#[derive(Debug, Clone)]
pub enum ProjectFile {
    Sql(SqlFile),
    Yaml(YamlFile),
    Markdown(MarkdownFile),
}

impl ProjectFile {
    /// Read and classify a file of `project`
    pub fn load(path: &Path, project: &Arc<ProjectContext>) -> Result<Self, ProjectError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| ProjectError::IoError(path.display().to_string(), e.to_string()))?;
        Self::from_content(path, content, project)
    }

    /// Classify a file whose content is already in memory
    ///
    /// Paired files are still read from disk to combine suppressions.
    pub fn from_content(
        path: &Path,
        content: String,
        project: &Arc<ProjectContext>,
    ) -> Result<Self, ProjectError> {
        let kind = FileKind::from_path(path)
            .ok_or_else(|| ProjectError::UnsupportedFile(path.display().to_string()))?;
        let relative = project.relative_path(path);
        let mut suppressed = parse_suppressions(&content);

        let file = match kind {
            FileKind::Sql => {
                let is_macro = macro_pattern().is_some_and(|p| p.is_match(&content));
                let node = project
                    .manifest
                    .node_for_sql(&relative, is_macro)
                    .or_else(|| project.manifest.node_for_sql(&relative, !is_macro))
                    .cloned()
                    .ok_or_else(|| ProjectError::NodeNotFound(path.display().to_string()))?;

                if let Some(docs) = node.docs_file() {
                    suppressed.extend(project.read_suppressions(docs));
                }

                Self::Sql(SqlFile {
                    path: path.to_path_buf(),
                    content,
                    node,
                    project: Arc::clone(project),
                    suppressed,
                })
            }
            FileKind::Yaml => {
                let nodes = project.manifest.nodes_documented_in(&relative);
                for node in &nodes {
                    let defined_in_sql = matches!(
                        node.resource_type,
                        ResourceType::Model | ResourceType::Macro | ResourceType::Snapshot
                    );
                    if defined_in_sql && !node.original_file_path.is_empty() {
                        suppressed.extend(project.read_suppressions(&node.original_file_path));
                    }
                }

                let document = serde_yaml::from_str(&content).unwrap_or_else(|e| {
                    tracing::warn!("{} is not valid YAML: {}", path.display(), e);
                    serde_yaml::Value::Null
                });

                Self::Yaml(YamlFile {
                    path: path.to_path_buf(),
                    content,
                    document,
                    nodes,
                    project: Arc::clone(project),
                    suppressed,
                })
            }
            FileKind::Markdown => Self::Markdown(MarkdownFile {
                path: path.to_path_buf(),
                content,
                project: Arc::clone(project),
                suppressed,
            }),
        };

        Ok(file)
    }

    pub fn path(&self) -> &Path {
        match self {
            Self::Sql(f) => &f.path,
            Self::Yaml(f) => &f.path,
            Self::Markdown(f) => &f.path,
        }
    }

    pub fn content(&self) -> &str {
        match self {
            Self::Sql(f) => &f.content,
            Self::Yaml(f) => &f.content,
            Self::Markdown(f) => &f.content,
        }
    }

    pub fn kind(&self) -> FileKind {
        match self {
            Self::Sql(_) => FileKind::Sql,
            Self::Yaml(_) => FileKind::Yaml,
            Self::Markdown(_) => FileKind::Markdown,
        }
    }

    pub fn project(&self) -> &Arc<ProjectContext> {
        match self {
            Self::Sql(f) => &f.project,
            Self::Yaml(f) => &f.project,
            Self::Markdown(f) => &f.project,
        }
    }

    /// Suppressed opinion codes, including those of the paired file
    pub fn suppressed(&self) -> &BTreeSet<String> {
        match self {
            Self::Sql(f) => &f.suppressed,
            Self::Yaml(f) => &f.suppressed,
            Self::Markdown(f) => &f.suppressed,
        }
    }

    /// Whether `code` (or every opinion) is suppressed for this file
    pub fn is_suppressed(&self, code: &str) -> bool {
        let suppressed = self.suppressed();
        suppressed.contains(SUPPRESS_ALL) || suppressed.contains(&code.to_ascii_uppercase())
    }

    /// Nodes the file defines or documents
    pub fn nodes(&self) -> Vec<&Arc<Node>> {
        match self {
            Self::Sql(f) => vec![&f.node],
            Self::Yaml(f) => f.nodes.iter().collect(),
            Self::Markdown(_) => Vec::new(),
        }
    }

    /// File name without directories
    pub fn file_name(&self) -> &str {
        self.path()
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or_default()
    }

    /// Reference stamped on lint results
    pub fn file_ref(&self) -> FileRef {
        let project = self.project();
        let file = FileRef::new(self.path(), self.kind(), project.name.clone());
        match self {
            Self::Sql(f) => match f.node.docs_file() {
                Some(docs) => file.with_docs_path(project.root.join(docs)),
                None => file,
            },
            _ => file,
        }
    }
}
