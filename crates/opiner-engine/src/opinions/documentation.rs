//! Documentation opinions: descriptions, documented columns, docs file layout

use crate::opinion::{per_model, Evaluation, Opinion, OpinionBox, OpinionMeta};
use opiner_core::{Config, ConfigError, Severity};
use opiner_dbt::ProjectFile;
use serde::Deserialize;

/// O001 - models must have a description
pub struct ModelHasDescription {
    meta: OpinionMeta,
}

impl ModelHasDescription {
    pub fn build(_config: &Config) -> Result<OpinionBox, ConfigError> {
        Ok(Box::new(Self {
            meta: OpinionMeta::new("O001", Severity::Must, "Model must have a description.")
                .with_tags(&["metadata", "models"]),
        }))
    }
}

impl Opinion for ModelHasDescription {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        per_model(&self.meta, file, |node| {
            Some(if node.has_description() {
                (true, format!("Model {} has a description.", node.alias()))
            } else {
                (
                    false,
                    format!("Model {} {} have a description.", node.alias(), self.meta.verb()),
                )
            })
        })
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct KeywordSettings {
    #[serde(default)]
    keywords: Vec<String>,
}

/// O002 - model descriptions must mention configured keywords
pub struct DescriptionKeywords {
    meta: OpinionMeta,
    keywords: Vec<String>,
}

impl DescriptionKeywords {
    pub fn build(config: &Config) -> Result<OpinionBox, ConfigError> {
        let settings: KeywordSettings = config.opinion_settings("O002")?;
        if settings.keywords.is_empty() {
            tracing::debug!("No keywords configured for O002. It will not report.");
        }
        Ok(Box::new(Self {
            meta: OpinionMeta::new(
                "O002",
                Severity::Must,
                "Model description must contain the configured keywords.",
            )
            .with_tags(&["metadata", "models"]),
            keywords: settings.keywords,
        }))
    }
}

impl Opinion for DescriptionKeywords {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        if self.keywords.is_empty() {
            return Evaluation::Skip;
        }

        per_model(&self.meta, file, |node| {
            if !node.has_description() {
                // O001 reports missing descriptions
                return None;
            }
            let description = node.description.to_lowercase();
            let missing: Vec<&str> = self
                .keywords
                .iter()
                .filter(|keyword| !description.contains(&keyword.to_lowercase()))
                .map(String::as_str)
                .collect();

            Some(if missing.is_empty() {
                (true, format!("Model {} description has all required keywords.", node.alias()))
            } else {
                (
                    false,
                    format!(
                        "Model {} description {} contain the keywords: {}.",
                        node.alias(),
                        self.meta.verb(),
                        missing.join(", ")
                    ),
                )
            })
        })
    }
}

/// O003 - every documented column must have a description
pub struct ColumnsHaveDescription {
    meta: OpinionMeta,
}

impl ColumnsHaveDescription {
    pub fn build(_config: &Config) -> Result<OpinionBox, ConfigError> {
        Ok(Box::new(Self {
            meta: OpinionMeta::new("O003", Severity::Must, "All columns must have a description.")
                .with_tags(&["metadata", "models"]),
        }))
    }
}

impl Opinion for ColumnsHaveDescription {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        per_model(&self.meta, file, |node| {
            let undocumented: Vec<&str> = node
                .columns
                .values()
                .filter(|column| column.description.trim().is_empty())
                .map(|column| column.name.as_str())
                .collect();

            Some(if undocumented.is_empty() {
                (true, format!("All columns of model {} have a description.", node.alias()))
            } else {
                (
                    false,
                    format!(
                        "Columns {} of model {} {} have a description.",
                        undocumented.join(", "),
                        node.alias(),
                        self.meta.verb()
                    ),
                )
            })
        })
    }
}

/// O007 - YAML files must not document columns the model no longer produces
pub struct NoOutdatedColumns {
    meta: OpinionMeta,
}

impl NoOutdatedColumns {
    pub fn build(_config: &Config) -> Result<OpinionBox, ConfigError> {
        Ok(Box::new(Self {
            meta: OpinionMeta::new(
                "O007",
                Severity::Must,
                "YAML files must not document columns missing from the model.",
            )
            .with_tags(&["metadata", "models"]),
        }))
    }
}

impl Opinion for NoOutdatedColumns {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        per_model(&self.meta, file, |node| {
            let produced = node.output_columns();
            // No lineage, or lineage hidden behind a wildcard (see O004)
            if produced.is_empty() || produced.iter().any(|c| c.contains('*')) {
                return None;
            }

            let outdated: Vec<&str> = node
                .columns
                .keys()
                .filter(|name| !produced.iter().any(|c| c.eq_ignore_ascii_case(name)))
                .map(String::as_str)
                .collect();

            Some(if outdated.is_empty() {
                (true, format!("No outdated columns documented for model {}.", node.alias()))
            } else {
                (
                    false,
                    format!(
                        "Columns {} are documented for model {} but not selected by it.",
                        outdated.join(", "),
                        node.alias()
                    ),
                )
            })
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct NodeLimitSettings {
    #[serde(default = "default_max_nodes")]
    max_n_allowed: usize,
}

impl Default for NodeLimitSettings {
    fn default() -> Self {
        Self {
            max_n_allowed: default_max_nodes(),
        }
    }
}

fn default_max_nodes() -> usize {
    1
}

/// D001 - YAML docs files should document a limited number of nodes
pub struct DocsFileNodeLimit {
    meta: OpinionMeta,
    max_nodes: usize,
}

impl DocsFileNodeLimit {
    pub fn build(config: &Config) -> Result<OpinionBox, ConfigError> {
        let settings: NodeLimitSettings = config.opinion_settings("D001")?;
        Ok(Box::new(Self {
            meta: OpinionMeta::new(
                "D001",
                Severity::Should,
                "YAML docs files should document a limited number of nodes.",
            )
            .with_tags(&["metadata"]),
            max_nodes: settings.max_n_allowed,
        }))
    }
}

impl Opinion for DocsFileNodeLimit {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        let ProjectFile::Yaml(yaml) = file else {
            return Evaluation::Skip;
        };
        if yaml.nodes.is_empty() {
            return Evaluation::Skip;
        }

        let count = yaml.nodes.len();
        let result = if count > self.max_nodes {
            self.meta.result(
                file,
                false,
                format!(
                    "YAML file {} documents {} nodes; it {} document at most {}.",
                    file.file_name(),
                    count,
                    self.meta.verb(),
                    self.max_nodes
                ),
            )
        } else {
            self.meta.result(
                file,
                true,
                format!("YAML file {} documents {} node(s).", file.file_name(), count),
            )
        };
        result.into()
    }
}
