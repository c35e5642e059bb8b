//! dbt integration
//!
//! This crate handles:
//! - Parsing manifest.json into shared, read-only nodes
//! - Wrapping project files (SQL, YAML, markdown) with their nodes and
//!   inline suppression directives
//! - Loading projects, locating them in a repository and running `dbt compile`

pub mod compile;
pub mod discovery;
pub mod files;
pub mod manifest;
pub mod project;

pub use files::{parse_suppressions, MarkdownFile, ProjectFile, SqlFile, YamlFile, SUPPRESS_ALL};
pub use manifest::{ColumnDefinition, DependsOn, Manifest, ManifestError, Node, NodeConfig, ResourceType};
pub use project::{DbtProject, LoadOptions, ProjectContext, ProjectError, DBT_PROJECT_FILE, PROFILES_FILE};
