//! dbt project loading
//!
//! Turns a `dbt_project.yml` into a `ProjectContext` (project settings,
//! profile, manifest) and the list of lintable `ProjectFile`s.

use crate::compile;
use crate::files::{parse_suppressions, ProjectFile};
use crate::manifest::{Manifest, ManifestError};
use opiner_core::{Config, FileKind};
use regex::Regex;
use serde_yaml::Value;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Project file name
pub const DBT_PROJECT_FILE: &str = "dbt_project.yml";

/// Profiles file looked up next to `dbt_project.yml`
pub const PROFILES_FILE: &str = "profiles.yml";

/// Directories never linted, besides the project's target and packages paths
const ALWAYS_SKIPPED: &[&str] = &[".venv", ".git", "logs", "node_modules"];

/// Everything opinions may need to know about the owning project
#[derive(Debug, Clone, Default)]
pub struct ProjectContext {
    /// Project name from `dbt_project.yml`
    pub name: String,

    /// Directory containing `dbt_project.yml`
    pub root: PathBuf,

    /// Parsed `dbt_project.yml`
    pub project_config: Value,

    /// Parsed `profiles.yml`, when the project ships one
    pub profile: Option<Value>,

    pub manifest: Manifest,
}

impl ProjectContext {
    pub fn new(name: impl Into<String>, root: impl Into<PathBuf>, manifest: Manifest) -> Self {
        Self {
            name: name.into(),
            root: root.into(),
            project_config: Value::Null,
            profile: None,
            manifest,
        }
    }

    pub fn with_project_config(mut self, project_config: Value) -> Self {
        self.project_config = project_config;
        self
    }

    pub fn with_profile(mut self, profile: Value) -> Self {
        self.profile = Some(profile);
        self
    }

    /// Path relative to the project root with forward slashes
    pub fn relative_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Suppressions declared in a project file, if it exists
    pub fn read_suppressions(&self, relative_path: &str) -> BTreeSet<String> {
        match std::fs::read_to_string(self.root.join(relative_path)) {
            Ok(content) => parse_suppressions(&content),
            Err(_) => BTreeSet::new(),
        }
    }

    /// `dbt_project.yml` setting, e.g. `target-path`
    pub fn setting(&self, key: &str) -> Option<&str> {
        self.project_config.get(key).and_then(Value::as_str)
    }
}

/// How projects are loaded
#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    /// dbt target used when compiling
    pub target: Option<String>,

    /// Compile even when a manifest exists
    pub force_compile: bool,

    /// Lint only these files (absolute paths); all files when `None`
    pub files: Option<Vec<PathBuf>>,
}

/// A loaded dbt project and its lintable files
#[derive(Debug, Clone)]
pub struct DbtProject {
    context: Arc<ProjectContext>,
    files: Vec<ProjectFile>,
}

impl DbtProject {
    /// Load the project described by `dbt_project_file`
    pub fn load(
        dbt_project_file: &Path,
        config: &Config,
        options: &LoadOptions,
    ) -> Result<Self, ProjectError> {
        let root = dbt_project_file
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        let project_config = read_yaml(dbt_project_file)?;
        let name = project_config
            .get("name")
            .and_then(Value::as_str)
            .map(str::to_string)
            .or_else(|| root.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default();

        let profiles_path = root.join(PROFILES_FILE);
        let profile = profiles_path
            .is_file()
            .then(|| read_yaml(&profiles_path))
            .transpose()?;

        let target_path = project_config
            .get("target-path")
            .and_then(Value::as_str)
            .unwrap_or("target");
        let manifest_path = root.join(target_path).join("manifest.json");
        if options.force_compile || !manifest_path.is_file() {
            compile::compile_project(&root, options.target.as_deref())?;
        }

        tracing::info!("Loading dbt project {} from {}", name, root.display());
        let manifest = Manifest::from_file(&manifest_path, config.sql_dialect.as_deref())?;

        let mut context = ProjectContext::new(name, root, manifest).with_project_config(project_config);
        if let Some(profile) = profile {
            context = context.with_profile(profile);
        }
        let context = Arc::new(context);

        let candidates = match &options.files {
            Some(files) => files
                .iter()
                .filter(|file| file.starts_with(&context.root) && file.is_file())
                .cloned()
                .collect(),
            None => walk_project(&context),
        };

        let filter = FileFilter::from_config(config)?;
        let mut files = Vec::new();
        for path in candidates {
            let Some(kind) = FileKind::from_path(&path) else {
                continue;
            };
            if !filter.accepts(&path, kind) {
                tracing::debug!("Skipping {} (files filter)", path.display());
                continue;
            }
            files.push(ProjectFile::load(&path, &context)?);
        }

        Ok(Self { context, files })
    }

    /// Build a project from parts already in memory
    pub fn from_parts(context: Arc<ProjectContext>, files: Vec<ProjectFile>) -> Self {
        Self { context, files }
    }

    pub fn name(&self) -> &str {
        &self.context.name
    }

    pub fn context(&self) -> &Arc<ProjectContext> {
        &self.context
    }

    pub fn files(&self) -> &[ProjectFile] {
        &self.files
    }
}

fn read_yaml(path: &Path) -> Result<Value, ProjectError> {
    let contents = std::fs::read_to_string(path)
        .map_err(|e| ProjectError::IoError(path.display().to_string(), e.to_string()))?;
    serde_yaml::from_str(&contents)
        .map_err(|e| ProjectError::YamlError(path.display().to_string(), e.to_string()))
}

/// Every lintable file of the project, skipping build output and packages
fn walk_project(context: &ProjectContext) -> Vec<PathBuf> {
    let mut skipped: Vec<String> = ALWAYS_SKIPPED.iter().map(|s| s.to_string()).collect();
    skipped.push(context.setting("target-path").unwrap_or("target").to_string());
    skipped.push(
        context
            .setting("packages-install-path")
            .unwrap_or("dbt_packages")
            .to_string(),
    );

    walkdir::WalkDir::new(&context.root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            if entry.depth() == 0 || !entry.file_type().is_dir() {
                return true;
            }
            let relative = context.relative_path(entry.path());
            !skipped.iter().any(|s| s.trim_end_matches('/') == relative)
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .filter(|path| FileKind::from_path(path).is_some())
        .collect()
}

/// Compiled `files` patterns of the configuration
struct FileFilter {
    sql: Option<Regex>,
    yaml: Option<Regex>,
    md: Option<Regex>,
}

impl FileFilter {
    fn from_config(config: &Config) -> Result<Self, ProjectError> {
        // Anchored at the start of the path, like `ignore_files`
        let compile = |pattern: &Option<String>| {
            pattern
                .as_deref()
                .map(|pattern| Regex::new(&format!("^(?:{})", pattern)))
                .transpose()
                .map_err(|e| ProjectError::InvalidPattern(e.to_string()))
        };
        Ok(Self {
            sql: compile(&config.files.sql)?,
            yaml: compile(&config.files.yaml)?,
            md: compile(&config.files.md)?,
        })
    }

    fn accepts(&self, path: &Path, kind: FileKind) -> bool {
        let pattern = match kind {
            FileKind::Sql => &self.sql,
            FileKind::Yaml => &self.yaml,
            FileKind::Markdown => &self.md,
        };
        pattern
            .as_ref()
            .map_or(true, |re| re.is_match(&path.to_string_lossy()))
    }
}

/// Project loading errors
#[derive(Debug, thiserror::Error)]
pub enum ProjectError {
    #[error("Failed to read {0}: {1}")]
    IoError(String, String),

    #[error("Failed to parse {0}: {1}")]
    YamlError(String, String),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error("Node not found in manifest for {0}. Try running `dbt compile` or use --force-compile")]
    NodeNotFound(String),

    #[error("Not a lintable file: {0}")]
    UnsupportedFile(String),

    #[error("Invalid files pattern: {0}")]
    InvalidPattern(String),

    #[error("dbt failed: {0}")]
    Compile(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn relative_path_uses_forward_slashes() {
        let context = ProjectContext::new("shop", "/repo/shop", Manifest::default());
        assert_eq!(
            context.relative_path(Path::new("/repo/shop/models/a.sql")),
            "models/a.sql"
        );
    }

    #[test]
    fn file_filter_defaults_to_accepting() {
        let filter = FileFilter::from_config(&Config::default()).unwrap();
        assert!(filter.accepts(Path::new("/x/models/a.sql"), FileKind::Sql));
    }

    #[test]
    fn file_filter_applies_per_kind() {
        let config = Config::from_str("files:\n  sql: \".*/marts/.*\"\n").unwrap();
        let filter = FileFilter::from_config(&config).unwrap();
        assert!(filter.accepts(Path::new("/x/models/marts/a.sql"), FileKind::Sql));
        assert!(!filter.accepts(Path::new("/x/models/staging/a.sql"), FileKind::Sql));
        assert!(filter.accepts(Path::new("/x/models/staging/a.yml"), FileKind::Yaml));
    }

    #[test]
    fn file_filter_matches_from_path_start() {
        let config = Config::from_str("files:\n  sql: models/marts/\n").unwrap();
        let filter = FileFilter::from_config(&config).unwrap();
        assert!(!filter.accepts(Path::new("/x/models/marts/a.sql"), FileKind::Sql));

        let config = Config::from_str("files:\n  sql: /x/models/marts/\n").unwrap();
        let filter = FileFilter::from_config(&config).unwrap();
        assert!(filter.accepts(Path::new("/x/models/marts/a.sql"), FileKind::Sql));
    }
}
