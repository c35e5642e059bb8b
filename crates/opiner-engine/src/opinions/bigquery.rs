//! BigQuery opinions
//!
//! Every opinion here is inert unless the configured dialect is `bigquery`.

use crate::opinion::{per_model, sql_model, Evaluation, Opinion, OpinionBox, OpinionMeta};
use opiner_core::{Config, ConfigError, Severity};
use opiner_dbt::{ProjectFile, DBT_PROJECT_FILE, PROFILES_FILE};
use serde::Deserialize;
use serde_yaml::Value;

const BIGQUERY: &str = "bigquery";

/// YAML document of `file` when it is the named project file
fn named_yaml<'a>(file: &'a ProjectFile, name: &str) -> Option<&'a Value> {
    match file {
        ProjectFile::Yaml(yaml) if file.file_name() == name => Some(&yaml.document),
        _ => None,
    }
}

/// Loose YAML truthiness, as dbt reads flags
fn truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|n| n != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Sequence(s)) => !s.is_empty(),
        Some(Value::Mapping(m)) => !m.is_empty(),
        Some(Value::Tagged(t)) => truthy(Some(&t.value)),
    }
}

/// Byte count from a number or a numeric string
fn bytes(value: Option<&Value>) -> Option<u64> {
    match value? {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct BytesBilledSettings {
    #[serde(default = "default_ignored_targets")]
    ignore_targets: Vec<String>,
    #[serde(default)]
    maximum_bytes_billed: Option<u64>,
}

impl Default for BytesBilledSettings {
    fn default() -> Self {
        Self {
            ignore_targets: default_ignored_targets(),
            maximum_bytes_billed: None,
        }
    }
}

fn default_ignored_targets() -> Vec<String> {
    vec!["prod".to_string(), "production".to_string()]
}

/// BQ001 - development targets must cap billed bytes
pub struct MaximumBytesBilled {
    meta: OpinionMeta,
    enabled: bool,
    settings: BytesBilledSettings,
}

impl MaximumBytesBilled {
    pub fn build(config: &Config) -> Result<OpinionBox, ConfigError> {
        Ok(Box::new(Self {
            meta: OpinionMeta::new(
                "BQ001",
                Severity::Must,
                "Bigquery targets used for development and testing must have maximum_bytes_billed.",
            )
            .with_tags(&["bigquery", "dbt_config"]),
            enabled: config.is_dialect(BIGQUERY),
            settings: config.opinion_settings("BQ001")?,
        }))
    }
}

impl Opinion for MaximumBytesBilled {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        if !self.enabled {
            return Evaluation::Skip;
        }
        let Some(Value::Mapping(profiles)) = named_yaml(file, PROFILES_FILE) else {
            return Evaluation::Skip;
        };

        let mut bigquery_targets = 0;
        let mut missing = Vec::new();
        let mut exceeded = Vec::new();
        let outputs = profiles
            .values()
            .filter_map(|profile| profile.get("outputs").and_then(Value::as_mapping));
        for (name, target) in outputs.flat_map(|o| o.iter()) {
            if target.get("type").and_then(Value::as_str) != Some(BIGQUERY) {
                continue;
            }
            bigquery_targets += 1;
            let name = name.as_str().unwrap_or_default().to_string();
            if self.settings.ignore_targets.contains(&name) {
                continue;
            }

            let billed = target.get("maximum_bytes_billed");
            if !truthy(billed) {
                missing.push(name);
            } else if let (Some(limit), Some(billed)) = (self.settings.maximum_bytes_billed, bytes(billed)) {
                if billed > limit {
                    exceeded.push(name);
                }
            }
        }

        if bigquery_targets == 0 {
            return Evaluation::Skip;
        }

        let result = if missing.is_empty() && exceeded.is_empty() {
            self.meta.result(
                file,
                true,
                "Bigquery targets used for development and testing have maximum_bytes_billed.",
            )
        } else {
            let mut message = format!(
                "Bigquery targets used for development and testing {} have maximum_bytes_billed.",
                self.meta.verb()
            );
            if !exceeded.is_empty() {
                message.push_str(&format!(" Exceeded for targets: {}.", exceeded.join(", ")));
            }
            if !missing.is_empty() {
                message.push_str(&format!(" Missing for targets: {}.", missing.join(", ")));
            }
            self.meta.result(file, false, message)
        };
        result.into()
    }
}

/// BQ002 - tables and incremental models should be clustered
pub struct TablesClustered {
    meta: OpinionMeta,
    enabled: bool,
}

impl TablesClustered {
    pub fn build(config: &Config) -> Result<OpinionBox, ConfigError> {
        Ok(Box::new(Self {
            meta: OpinionMeta::new(
                "BQ002",
                Severity::Should,
                "Models materialized as tables should have clustering defined.",
            )
            .with_tags(&["models", "bigquery"]),
            enabled: config.is_dialect(BIGQUERY),
        }))
    }
}

impl Opinion for TablesClustered {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        if !self.enabled {
            return Evaluation::Skip;
        }
        let Some(node) = sql_model(file) else {
            return Evaluation::Skip;
        };
        if !matches!(node.config.materialized(), Some("table" | "incremental")) {
            return Evaluation::Skip;
        }

        let clustered = node.config.cluster_by().is_some_and(|value| match value {
            serde_json::Value::String(s) => !s.is_empty(),
            serde_json::Value::Array(a) => !a.is_empty(),
            serde_json::Value::Bool(b) => *b,
            _ => true,
        });
        let result = if clustered {
            self.meta.result(file, true, "Model has clustering defined.")
        } else {
            self.meta.result(
                file,
                false,
                format!("Model {} have clustering defined.", self.meta.verb()),
            )
        };
        result.into()
    }
}

/// BQ003 - view descriptions must document partitioning and clustering
pub struct ViewsDocumentLayout {
    meta: OpinionMeta,
    enabled: bool,
}

impl ViewsDocumentLayout {
    const KEYWORDS: [&'static str; 2] = ["partition", "cluster"];

    pub fn build(config: &Config) -> Result<OpinionBox, ConfigError> {
        Ok(Box::new(Self {
            meta: OpinionMeta::new(
                "BQ003",
                Severity::Must,
                "Views must have documented the partition and cluster of underlying tables.",
            )
            .with_tags(&["bigquery", "metadata", "models"]),
            enabled: config.is_dialect(BIGQUERY),
        }))
    }
}

impl Opinion for ViewsDocumentLayout {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        if !self.enabled {
            return Evaluation::Skip;
        }

        per_model(&self.meta, file, |node| {
            if node.config.materialized() != Some("view") {
                return None;
            }
            if !node.has_description() {
                tracing::debug!("Model {} has no description.", node.alias());
                return None;
            }

            let description = node.description.to_lowercase();
            let missing: Vec<&str> = Self::KEYWORDS
                .into_iter()
                .filter(|keyword| !description.contains(keyword))
                .collect();
            Some(if missing.is_empty() {
                (true, format!("View {} description has all required keywords.", node.alias()))
            } else {
                (
                    false,
                    format!(
                        "View {} description {} have keywords: {}",
                        node.alias(),
                        self.meta.verb(),
                        missing.join(", ")
                    ),
                )
            })
        })
    }
}

/// BQ004 - `persist_docs` must be enabled for models
pub struct PersistDocs {
    meta: OpinionMeta,
    enabled: bool,
}

impl PersistDocs {
    pub fn build(config: &Config) -> Result<OpinionBox, ConfigError> {
        Ok(Box::new(Self {
            meta: OpinionMeta::new(
                "BQ004",
                Severity::Must,
                "The persist_docs option for models must be enabled",
            )
            .with_tags(&["bigquery", "dbt_config"]),
            enabled: config.is_dialect(BIGQUERY),
        }))
    }
}

impl Opinion for PersistDocs {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        if !self.enabled {
            return Evaluation::Skip;
        }
        let Some(project) = named_yaml(file, DBT_PROJECT_FILE) else {
            return Evaluation::Skip;
        };

        let persist_docs = project
            .get("models")
            .and_then(|models| models.get("persist_docs").or_else(|| models.get("+persist_docs")));
        let enabled = truthy(persist_docs.and_then(|p| p.get("relation")))
            && truthy(persist_docs.and_then(|p| p.get("columns")));

        let result = if enabled {
            self.meta
                .result(file, true, "The persist_docs option for models is enabled")
        } else {
            self.meta.result(
                file,
                false,
                format!("The persist_docs option for models {} be enabled", self.meta.verb()),
            )
        };
        result.into()
    }
}
