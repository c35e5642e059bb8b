//! Lineage opinions: where sources may be read, which layers may select from which

use crate::opinion::{sql_model, Evaluation, Opinion, OpinionBox, OpinionMeta};
use opiner_core::{Config, ConfigError, Severity};
use opiner_dbt::{Node, ProjectFile};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct StagingSettings {
    #[serde(default = "default_staging_schema")]
    staging_schema: String,
    #[serde(default = "default_staging_prefix")]
    staging_prefix: String,
}

impl Default for StagingSettings {
    fn default() -> Self {
        Self {
            staging_schema: default_staging_schema(),
            staging_prefix: default_staging_prefix(),
        }
    }
}

fn default_staging_schema() -> String {
    "staging".to_string()
}

fn default_staging_prefix() -> String {
    "stg_".to_string()
}

/// L001 - the `source` macro may only be used in staging models
///
/// A model is staging when it lives in the staging schema or its alias has
/// the staging prefix; the prefix covers CI runs where every model lands in
/// one schema.
pub struct SourcesOnlyInStaging {
    meta: OpinionMeta,
    settings: StagingSettings,
}

impl SourcesOnlyInStaging {
    pub fn build(config: &Config) -> Result<OpinionBox, ConfigError> {
        Ok(Box::new(Self {
            meta: OpinionMeta::new("L001", Severity::Must, "Sources must only be used in staging.")
                .with_tags(&["lineage", "models"]),
            settings: config.opinion_settings("L001")?,
        }))
    }

    fn is_staging(&self, node: &Node) -> bool {
        node.alias().starts_with(&self.settings.staging_prefix)
            || node.schema() == self.settings.staging_schema
    }
}

impl Opinion for SourcesOnlyInStaging {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        let Some(node) = sql_model(file) else {
            return Evaluation::Skip;
        };
        if self.is_staging(node) {
            return Evaluation::Skip;
        }

        let compact: String = file.content().chars().filter(|c| !c.is_whitespace()).collect();
        let result = if compact.contains("{{source(") {
            self.meta.result(
                file,
                false,
                format!(
                    "The source macro {} only be used in staging layer.",
                    self.meta.verb()
                ),
            )
        } else {
            self.meta.result(
                file,
                true,
                format!("The source macro is not used in model {}.", node.alias()),
            )
        };
        result.into()
    }
}

/// One side of a layer pair: `schema,prefix`
#[derive(Debug, Clone, PartialEq, Eq)]
struct Layer {
    schema: String,
    prefix: String,
}

impl Layer {
    fn parse(text: &str) -> Option<Self> {
        let (schema, prefix) = text.split_once(',')?;
        if prefix.contains(',') {
            return None;
        }
        Some(Self {
            schema: schema.trim().to_string(),
            prefix: prefix.trim().to_string(),
        })
    }
}

/// Forbidden selections, indexed by the selecting layer
#[derive(Debug, Default, PartialEq)]
struct Restrictions {
    by_schema: BTreeMap<String, Vec<Layer>>,
    by_prefix: BTreeMap<String, Vec<Layer>>,
}

impl Restrictions {
    /// Parse `schema,prefix selects from schema,prefix` pairs
    ///
    /// Malformed pairs are reported and skipped.
    fn parse(pairs: &[String]) -> Self {
        let mut restrictions = Self::default();
        for pair in pairs {
            let parsed = pair
                .split_once(" selects from ")
                .and_then(|(selector, selected)| Some((Layer::parse(selector)?, Layer::parse(selected)?)));
            let Some((selector, selected)) = parsed else {
                tracing::warn!(
                    "Invalid layer pair configuration: {}. Layer pairs must be in the format \
                     'schema1,prefix1 selects from schema2,prefix2'.",
                    pair
                );
                continue;
            };

            restrictions
                .by_schema
                .entry(selector.schema)
                .or_default()
                .push(selected.clone());
            restrictions
                .by_prefix
                .entry(selector.prefix)
                .or_default()
                .push(selected);
        }
        restrictions
    }

    fn is_empty(&self) -> bool {
        self.by_schema.is_empty() && self.by_prefix.is_empty()
    }
}

fn alias_prefix(node: &Node) -> &str {
    node.alias().split('_').next().unwrap_or_default()
}

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct LayerSettings {
    #[serde(default)]
    layer_pairs: Vec<String>,
}

/// L002 - layer directionality must be respected
///
/// Schema restrictions take priority; prefix restrictions apply when the
/// model's schema has none (CI runs with a single schema).
pub struct LayerDirectionality {
    meta: OpinionMeta,
    restrictions: Restrictions,
}

impl LayerDirectionality {
    pub fn build(config: &Config) -> Result<OpinionBox, ConfigError> {
        let settings: LayerSettings = config.opinion_settings("L002")?;
        let restrictions = Restrictions::parse(&settings.layer_pairs);
        if restrictions.is_empty() {
            tracing::warn!("No layer pairs configured for L002. Skipping.");
        }
        Ok(Box::new(Self {
            meta: OpinionMeta::new("L002", Severity::Must, "Layer directionality must be respected.")
                .with_tags(&["lineage", "models"]),
            restrictions,
        }))
    }

    fn forbidden<'a>(&self, node: &Node, selected: &'a [Arc<Node>]) -> Option<Vec<&'a str>> {
        if let Some(layers) = self.restrictions.by_schema.get(node.schema()) {
            return Some(
                selected
                    .iter()
                    .filter(|s| layers.iter().any(|l| l.schema == s.schema()))
                    .map(|s| s.alias())
                    .collect(),
            );
        }
        let layers = self.restrictions.by_prefix.get(alias_prefix(node))?;
        Some(
            selected
                .iter()
                .filter(|s| layers.iter().any(|l| l.prefix == alias_prefix(s)))
                .map(|s| s.alias())
                .collect(),
        )
    }
}

impl Opinion for LayerDirectionality {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        if self.restrictions.is_empty() {
            return Evaluation::Skip;
        }
        let Some(node) = sql_model(file) else {
            return Evaluation::Skip;
        };

        let manifest = &file.project().manifest;
        let selected: Vec<Arc<Node>> = node
            .depends_on
            .nodes
            .iter()
            .filter_map(|id| manifest.get(id).cloned())
            .collect();
        if selected.is_empty() {
            return Evaluation::Skip;
        }

        let Some(forbidden) = self.forbidden(node, &selected) else {
            return Evaluation::Skip;
        };
        let result = if forbidden.is_empty() {
            self.meta.result(file, true, "Layer directionality is respected.")
        } else {
            self.meta.result(
                file,
                false,
                format!(
                    "Layer directionality {} be respected. Model {} selects from {}.",
                    self.meta.verb(),
                    node.alias(),
                    forbidden.join(", ")
                ),
            )
        };
        result.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{model, project, sql_file, sql_file_with};
    use opiner_core::Config;

    fn outcome(evaluation: Evaluation) -> Option<(bool, String)> {
        match evaluation {
            Evaluation::Single(result) => Some((result.passed, result.message)),
            Evaluation::Skip => None,
            other => panic!("unexpected {:?}", other),
        }
    }

    fn in_schema(name: &str, schema: &str) -> Node {
        let mut node = model(name);
        node.schema = Some(schema.to_string());
        node
    }

    #[test]
    fn l001_source_outside_staging() {
        let opinion = SourcesOnlyInStaging::build(&Config::default()).unwrap();
        let ctx = project(vec![
            in_schema("fct_orders", "marts"),
            in_schema("stg_orders", "marts"),
            in_schema("orders", "staging"),
        ]);
        let sql = "select * from {{ source('raw', 'orders') }}";

        let (passed, message) =
            outcome(opinion.evaluate(&sql_file_with(&ctx, "fct_orders", sql))).unwrap();
        assert!(!passed);
        assert_eq!(message, "The source macro must only be used in staging layer.");

        assert!(outcome(opinion.evaluate(&sql_file_with(&ctx, "stg_orders", sql))).is_none());
        assert!(outcome(opinion.evaluate(&sql_file_with(&ctx, "orders", sql))).is_none());

        let clean = "select * from {{ ref('stg_orders') }}";
        assert!(outcome(opinion.evaluate(&sql_file_with(&ctx, "fct_orders", clean))).unwrap().0);
    }

    #[test]
    fn l001_custom_staging_layer() {
        let config = Config::from_str(
            "opinions_config:\n  extra_opinions_config:\n    L001:\n      staging_schema: raw_layer\n      staging_prefix: base_\n",
        )
        .unwrap();
        let opinion = SourcesOnlyInStaging::build(&config).unwrap();
        let ctx = project(vec![in_schema("stg_orders", "analytics")]);
        let sql = "select 1 from {{source('raw','orders')}}";
        assert!(!outcome(opinion.evaluate(&sql_file_with(&ctx, "stg_orders", sql))).unwrap().0);
    }

    #[test]
    fn layer_pairs_parsing_skips_invalid_entries() {
        let restrictions = Restrictions::parse(&[
            "staging,stg selects from marts,mrt".to_string(),
            "staging selects from marts".to_string(),
            "facts,fct,x selects from marts,mrt".to_string(),
            "no separator".to_string(),
        ]);
        assert_eq!(restrictions.by_schema.len(), 1);
        assert_eq!(
            restrictions.by_prefix.get("stg"),
            Some(&vec![Layer {
                schema: "marts".to_string(),
                prefix: "mrt".to_string()
            }])
        );
    }

    fn l002_config() -> Config {
        Config::from_str(
            "opinions_config:\n  extra_opinions_config:\n    L002:\n      layer_pairs:\n        - \"staging,stg selects from marts,mrt\"\n        - \"facts,fct selects from marts,mrt\"\n",
        )
        .unwrap()
    }

    fn depends(mut node: Node, ids: &[&str]) -> Node {
        node.depends_on.nodes = ids.iter().map(|id| id.to_string()).collect();
        node
    }

    #[test]
    fn l002_schema_restriction() {
        let opinion = LayerDirectionality::build(&l002_config()).unwrap();
        let ctx = project(vec![
            depends(in_schema("stg_orders", "staging"), &["model.shop.mrt_sales", "model.shop.stg_raw"]),
            in_schema("mrt_sales", "marts"),
            in_schema("stg_raw", "staging"),
        ]);

        let (passed, message) = outcome(opinion.evaluate(&sql_file(&ctx, "stg_orders"))).unwrap();
        assert!(!passed);
        assert_eq!(
            message,
            "Layer directionality must be respected. Model stg_orders selects from mrt_sales."
        );
    }

    #[test]
    fn l002_prefix_restriction_in_single_schema() {
        let opinion = LayerDirectionality::build(&l002_config()).unwrap();
        let ctx = project(vec![
            depends(in_schema("fct_orders", "ci"), &["model.shop.mrt_sales"]),
            depends(in_schema("fct_fees", "ci"), &["model.shop.stg_fees"]),
            depends(in_schema("dim_dates", "ci"), &["model.shop.mrt_sales"]),
            in_schema("mrt_sales", "ci"),
            in_schema("stg_fees", "ci"),
        ]);

        assert!(!outcome(opinion.evaluate(&sql_file(&ctx, "fct_orders"))).unwrap().0);
        assert!(outcome(opinion.evaluate(&sql_file(&ctx, "fct_fees"))).unwrap().0);
        // no restriction for `dim`
        assert!(outcome(opinion.evaluate(&sql_file(&ctx, "dim_dates"))).is_none());
    }

    #[test]
    fn l002_without_pairs_or_parents_skips() {
        let ctx = project(vec![in_schema("stg_orders", "staging")]);
        let unconfigured = LayerDirectionality::build(&Config::default()).unwrap();
        assert!(outcome(unconfigured.evaluate(&sql_file(&ctx, "stg_orders"))).is_none());

        let configured = LayerDirectionality::build(&l002_config()).unwrap();
        assert!(outcome(configured.evaluate(&sql_file(&ctx, "stg_orders"))).is_none());
    }
}
