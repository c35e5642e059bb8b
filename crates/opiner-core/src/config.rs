//! Configuration schema (.dbt-opiner.yaml)
//!
//! Loading order:
//! 1. `${{ VAR }}` placeholders are replaced from the environment
//! 2. the YAML is parsed; an empty file is an empty configuration
//! 3. a `shared_config` repository is cloned and its configuration merged
//! 4. the result is deserialized (unknown keys are rejected) and validated

use crate::git::{self, GitError};
use regex::Regex;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;

/// File name looked up when discovering the configuration
pub const CONFIG_FILE_NAME: &str = ".dbt-opiner.yaml";

/// Directories never searched for configuration files
const SKIPPED_DIRS: &[&str] = &[".git", ".venv", "node_modules", "target", "dbt_packages"];

/// Main configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Config {
    /// SQL dialect used to parse compiled code (bigquery, snowflake, ...)
    #[serde(default, alias = "sqlglot_dialect", skip_serializing_if = "Option::is_none")]
    pub sql_dialect: Option<String>,

    /// Path filters per file kind
    #[serde(default)]
    pub files: FilePatterns,

    /// Opinion selection and per-opinion settings
    #[serde(default)]
    pub opinions_config: OpinionsConfig,

    /// Remote configuration merged into this one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub shared_config: Option<SharedConfig>,

    /// File the configuration was read from
    #[serde(skip)]
    pub source: Option<PathBuf>,
}

/// Regexes restricting which files of each kind are linted
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FilePatterns {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sql: Option<String>,

    #[serde(default, alias = "yml", skip_serializing_if = "Option::is_none")]
    pub yaml: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub md: Option<String>,
}

impl FilePatterns {
    fn all(&self) -> impl Iterator<Item = (&'static str, &String)> {
        [("sql", &self.sql), ("yaml", &self.yaml), ("md", &self.md)]
            .into_iter()
            .filter_map(|(kind, pattern)| pattern.as_ref().map(|p| (kind, p)))
    }
}

/// Opinion selection and settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OpinionsConfig {
    /// Opinion codes that are never evaluated
    #[serde(default)]
    pub ignore_opinions: Vec<String>,

    /// Opinion code -> regex of file paths the opinion skips
    #[serde(default)]
    pub ignore_files: BTreeMap<String, String>,

    /// Opinion code -> opinion specific settings
    #[serde(default)]
    pub extra_opinions_config: BTreeMap<String, Value>,

    /// Where custom opinions are loaded from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub custom_opinions: Option<CustomOpinionsConfig>,
}

/// Custom opinion source settings
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CustomOpinionsConfig {
    /// `local` or `git`; anything else is skipped with a warning
    #[serde(default)]
    pub source: Option<String>,

    /// Repository URL when `source` is `git`
    #[serde(default)]
    pub repository: Option<String>,

    /// Revision to check out
    #[serde(default)]
    pub rev: Option<String>,
}

/// Shared configuration repository
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SharedConfig {
    /// Repository containing a `.dbt-opiner.yaml` at its root
    pub repository: String,

    /// Revision to check out
    #[serde(default)]
    pub rev: Option<String>,

    /// When true the shared file wins over the local one
    #[serde(default = "default_true")]
    pub overwrite: bool,
}

fn default_true() -> bool {
    true
}

impl Config {
    /// Load configuration from file, resolving any shared configuration
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::IoError(path.display().to_string(), e.to_string()))?;

        let mut value = load_value(&contents)?;
        if let Some(shared) = shared_config_of(&value)? {
            value = resolve_shared(value, &shared)?;
        }

        let mut config = Self::from_value(value)?;
        config.source = Some(path.to_path_buf());
        tracing::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Parse configuration from a YAML string (shared configuration is not resolved)
    pub fn from_str(yaml: &str) -> Result<Self, ConfigError> {
        Self::from_value(load_value(yaml)?)
    }

    fn from_value(value: Value) -> Result<Self, ConfigError> {
        let config: Config =
            serde_yaml::from_value(value).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Find the first `.dbt-opiner.yaml` under `root` and load it
    ///
    /// Returns the default configuration when none exists.
    pub fn discover(root: &Path) -> Result<Self, ConfigError> {
        match find_config_file(root) {
            Some(path) => Self::from_file(&path),
            None => {
                tracing::warn!(
                    "No {} found under {}. Using default configuration.",
                    CONFIG_FILE_NAME,
                    root.display()
                );
                Ok(Self::default())
            }
        }
    }

    /// Check that every pattern compiles
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (kind, pattern) in self.files.all() {
            Regex::new(pattern)
                .map_err(|e| ConfigError::InvalidPattern(format!("files.{}", kind), e.to_string()))?;
        }
        for (code, pattern) in &self.opinions_config.ignore_files {
            Regex::new(pattern).map_err(|e| {
                ConfigError::InvalidPattern(format!("ignore_files.{}", code), e.to_string())
            })?;
        }
        Ok(())
    }

    /// Directory containing the configuration file
    pub fn config_dir(&self) -> Option<&Path> {
        self.source.as_deref().and_then(Path::parent)
    }

    /// Whether the configured dialect is `name` (case-insensitive)
    pub fn is_dialect(&self, name: &str) -> bool {
        self.sql_dialect
            .as_deref()
            .is_some_and(|d| d.eq_ignore_ascii_case(name))
    }

    /// Whether an opinion code is in the ignore list
    pub fn is_ignored(&self, code: &str) -> bool {
        self.opinions_config.ignore_opinions.iter().any(|c| c == code)
    }

    /// Path exclusion pattern configured for an opinion
    pub fn ignore_files_pattern(&self, code: &str) -> Option<&str> {
        self.opinions_config.ignore_files.get(code).map(String::as_str)
    }

    /// Deserialize the settings namespace of one opinion
    ///
    /// Missing settings yield `T::default()`.
    pub fn opinion_settings<T>(&self, code: &str) -> Result<T, ConfigError>
    where
        T: DeserializeOwned + Default,
    {
        match self.opinions_config.extra_opinions_config.get(code) {
            None | Some(Value::Null) => Ok(T::default()),
            Some(value) => serde_yaml::from_value(value.clone())
                .map_err(|e| ConfigError::OpinionSettings(code.to_string(), e.to_string())),
        }
    }
}

/// Locate the first configuration file under `root`, in sorted walk order
pub fn find_config_file(root: &Path) -> Option<PathBuf> {
    walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir()
                    && SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref()))
        })
        .filter_map(Result::ok)
        .find(|entry| entry.file_type().is_file() && entry.file_name() == CONFIG_FILE_NAME)
        .map(|entry| entry.into_path())
}

fn env_placeholder() -> Option<&'static Regex> {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(r"\$\{\{\s*([A-Za-z_][A-Za-z0-9_]*)\s*\}\}").ok())
        .as_ref()
}

/// Replace `${{ VAR }}` placeholders using the process environment
pub fn substitute_env(text: &str) -> String {
    substitute_env_with(text, |name| std::env::var(name).ok())
}

/// Replace `${{ VAR }}` placeholders using `lookup`; unknown names become empty
pub fn substitute_env_with<F>(text: &str, lookup: F) -> String
where
    F: Fn(&str) -> Option<String>,
{
    let Some(pattern) = env_placeholder() else {
        return text.to_string();
    };
    pattern
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let name = &caps[1];
            lookup(name).unwrap_or_else(|| {
                tracing::warn!("Environment variable {} is not set; substituting an empty string", name);
                String::new()
            })
        })
        .into_owned()
}

fn load_value(text: &str) -> Result<Value, ConfigError> {
    let substituted = substitute_env(text);
    let value: Value =
        serde_yaml::from_str(&substituted).map_err(|e| ConfigError::ParseError(e.to_string()))?;
    Ok(match value {
        Value::Null => Value::Mapping(Mapping::new()),
        other => other,
    })
}

fn shared_config_of(value: &Value) -> Result<Option<SharedConfig>, ConfigError> {
    match value.get("shared_config") {
        None | Some(Value::Null) => Ok(None),
        Some(shared) => serde_yaml::from_value(shared.clone())
            .map(Some)
            .map_err(|e| ConfigError::ParseError(format!("shared_config: {}", e))),
    }
}

fn resolve_shared(local: Value, shared: &SharedConfig) -> Result<Value, ConfigError> {
    let checkout = git::clone_repository(&shared.repository, shared.rev.as_deref())?;
    let path = checkout.path().join(CONFIG_FILE_NAME);
    if !path.is_file() {
        return Err(ConfigError::SharedConfig(format!(
            "{} not found at the root of {}",
            CONFIG_FILE_NAME, shared.repository
        )));
    }

    let contents = std::fs::read_to_string(&path)
        .map_err(|e| ConfigError::IoError(path.display().to_string(), e.to_string()))?;
    let remote = load_value(&contents)?;
    tracing::info!("Merging shared configuration from {}", shared.repository);
    Ok(merge_shared(local, remote, shared.overwrite))
}

/// Merge a shared configuration into the local one
///
/// With `overwrite` the shared values win and `shared_config` is dropped;
/// otherwise local values win and only missing keys come from the shared file.
pub fn merge_shared(local: Value, shared: Value, overwrite: bool) -> Value {
    if overwrite {
        let mut merged = merge_values(local, shared);
        if let Value::Mapping(map) = &mut merged {
            map.remove("shared_config");
        }
        merged
    } else {
        merge_values(shared, local)
    }
}

/// Deep merge: mappings are merged key by key, anything else is replaced by `overlay`
fn merge_values(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Mapping(mut base), Value::Mapping(overlay)) => {
            for (key, value) in overlay {
                let merged = match base.remove(&key) {
                    Some(existing) => merge_values(existing, value),
                    None => value,
                };
                base.insert(key, merged);
            }
            Value::Mapping(base)
        }
        (_, overlay) => overlay,
    }
}

/// Configuration loading errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {0}: {1}")]
    IoError(String, String),

    #[error("Failed to parse config: {0}")]
    ParseError(String),

    #[error("Invalid regex in {0}: {1}")]
    InvalidPattern(String, String),

    #[error("Invalid settings for opinion {0}: {1}")]
    OpinionSettings(String, String),

    #[error("Shared config error: {0}")]
    SharedConfig(String),

    #[error(transparent)]
    Git(#[from] GitError),
}
