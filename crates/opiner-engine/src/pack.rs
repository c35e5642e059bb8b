//! Opinion registry
//!
//! Assembles the built-in catalog and admitted custom opinions, honoring the
//! ignore list and each opinion's executable requirements.

use crate::custom::{definition_files, load_definitions, on_path, CustomOpinion, OpinionError};
use crate::opinion::{Opinion, OpinionBox};
use crate::opinions::{is_builtin, BUILTIN_OPINIONS};
use opiner_core::{git, Config, ConfigError, CustomOpinionsConfig, GitError};
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};

/// Directory of local custom opinions, relative to the config file
pub const LOCAL_CUSTOM_OPINIONS_DIR: &str = ".dbt_opiner/custom_opinions";

/// Directory scanned inside a custom opinions repository
pub const REPOSITORY_CUSTOM_OPINIONS_DIR: &str = "custom_opinions";

/// Ordered set of opinions a linter runs
pub struct OpinionsPack {
    opinions: Vec<OpinionBox>,
}

impl OpinionsPack {
    /// Build the pack for `config`
    ///
    /// With `no_ignore` the `ignore_opinions` list is disregarded.
    pub fn new(config: &Config, no_ignore: bool) -> Result<Self, PackError> {
        let skip = |code: &str| {
            let ignored = !no_ignore && config.is_ignored(code);
            if ignored {
                tracing::debug!("Opinion {} is ignored by configuration", code);
            }
            ignored
        };

        let mut opinions: Vec<OpinionBox> = Vec::new();
        for entry in BUILTIN_OPINIONS.iter().filter(|entry| !skip(entry.code)) {
            opinions.push((entry.build)(config).map_err(settings_error)?);
        }

        let mut custom_codes = BTreeSet::new();
        for custom in load_custom_opinions(config)? {
            let code = custom.code().to_string();
            if is_builtin(&code) {
                tracing::warn!(
                    "Custom opinion {} from {} shadows a built-in opinion. Skipping.",
                    code,
                    custom.origin().display()
                );
                continue;
            }
            if !custom_codes.insert(code.clone()) {
                tracing::warn!(
                    "Duplicate custom opinion {} in {}. Skipping.",
                    code,
                    custom.origin().display()
                );
                continue;
            }
            if skip(&code) {
                continue;
            }
            opinions.push(Box::new(custom));
        }

        Ok(Self::with_opinions(opinions).retain_runnable())
    }

    /// Pack of the given opinions, as-is
    pub fn with_opinions(opinions: Vec<OpinionBox>) -> Self {
        Self { opinions }
    }

    /// Drop opinions whose required executables are missing
    fn retain_runnable(mut self) -> Self {
        self.opinions.retain(|opinion| {
            let missing: Vec<&str> = opinion
                .requires()
                .iter()
                .filter(|program| !on_path(program))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                tracing::warn!(
                    "Opinion {} disabled: required executable(s) not found on PATH: {}",
                    opinion.code(),
                    missing.join(", ")
                );
            }
            missing.is_empty()
        });
        self
    }

    pub fn opinions(&self) -> &[OpinionBox] {
        &self.opinions
    }

    pub fn codes(&self) -> impl Iterator<Item = &str> {
        self.opinions.iter().map(|o| o.code())
    }

    pub fn len(&self) -> usize {
        self.opinions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.opinions.is_empty()
    }
}

fn settings_error(error: ConfigError) -> PackError {
    match error {
        ConfigError::OpinionSettings(code, message) => OpinionError::Settings(code, message).into(),
        other => PackError::Config(other),
    }
}

/// Custom opinions declared by `opinions_config.custom_opinions`
///
/// Definitions failing validation are logged and left out.
fn load_custom_opinions(config: &Config) -> Result<Vec<CustomOpinion>, PackError> {
    let Some(custom) = &config.opinions_config.custom_opinions else {
        tracing::debug!("No custom opinions configured");
        return Ok(Vec::new());
    };

    match custom.source.as_deref() {
        None => {
            tracing::debug!("No custom opinions source configured");
            Ok(Vec::new())
        }
        Some("local") => {
            let base = config.config_dir().unwrap_or_else(|| Path::new("."));
            let dir = base.join(LOCAL_CUSTOM_OPINIONS_DIR);
            if !dir.is_dir() {
                tracing::warn!("Custom opinions directory {} does not exist", dir.display());
                return Ok(Vec::new());
            }
            scan(&dir)
        }
        Some("git") => from_repository(custom),
        Some(other) => {
            tracing::warn!(
                "Unsupported custom opinions source '{}'. Supported sources: local, git",
                other
            );
            Ok(Vec::new())
        }
    }
}

fn from_repository(custom: &CustomOpinionsConfig) -> Result<Vec<CustomOpinion>, PackError> {
    let repository = custom
        .repository
        .as_deref()
        .ok_or(PackError::MissingRepository)?;

    tracing::info!("Loading custom opinions from {}", repository);
    let checkout = git::clone_repository(repository, custom.rev.as_deref())?;
    let nested = checkout.path().join(REPOSITORY_CUSTOM_OPINIONS_DIR);
    let dir: PathBuf = if nested.is_dir() {
        nested
    } else {
        checkout.path().to_path_buf()
    };
    scan(&dir)
}

fn scan(dir: &Path) -> Result<Vec<CustomOpinion>, PackError> {
    let mut admitted = Vec::new();
    for file in definition_files(dir) {
        for definition in load_definitions(&file)? {
            match definition {
                Ok(opinion) => admitted.push(opinion),
                Err(e) => tracing::warn!("Skipping custom opinion from {}: {}", file.display(), e),
            }
        }
    }
    tracing::info!("Loaded {} custom opinion(s) from {}", admitted.len(), dir.display());
    Ok(admitted)
}

/// Registry construction errors
#[derive(Debug, thiserror::Error)]
pub enum PackError {
    #[error(transparent)]
    Opinion(#[from] OpinionError),

    #[error(transparent)]
    Config(ConfigError),

    #[error("custom_opinions.source is git but no repository is configured")]
    MissingRepository,

    #[error("Failed to fetch custom opinions: {0}")]
    Git(#[from] GitError),
}
