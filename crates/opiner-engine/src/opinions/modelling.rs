//! Modelling opinions: explicit columns, incremental keys, naming layers

use crate::opinion::{sql_model, Evaluation, Opinion, OpinionBox, OpinionMeta};
use opiner_core::{Config, ConfigError, Severity};
use opiner_dbt::ProjectFile;
use serde::Deserialize;

/// O004 - final columns must be named at least once, no dangling `select *`
pub struct ExplicitFinalColumns {
    meta: OpinionMeta,
}

impl ExplicitFinalColumns {
    pub fn build(_config: &Config) -> Result<OpinionBox, ConfigError> {
        Ok(Box::new(Self {
            meta: OpinionMeta::new(
                "O004",
                Severity::Must,
                "Final columns must be explicitly named at least once.",
            )
            .with_tags(&["models", "sql style"]),
        }))
    }
}

impl Opinion for ExplicitFinalColumns {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        let Some(node) = sql_model(file) else {
            return Evaluation::Skip;
        };
        let columns = node.output_columns();
        if columns.is_empty() {
            return Evaluation::Skip;
        }

        let unresolved: Vec<&str> = columns
            .iter()
            .filter(|c| c.contains('*'))
            .map(String::as_str)
            .collect();

        let result = if unresolved.is_empty() {
            self.meta.result(
                file,
                true,
                format!("All final columns of model {} are explicitly named.", node.alias()),
            )
        } else {
            self.meta.result(
                file,
                false,
                format!(
                    "The final columns in model {} {} be explicitly named at least once. \
                     Unresolved select * statement(s): {}",
                    node.alias(),
                    self.meta.verb(),
                    unresolved.join(", ")
                ),
            )
        };
        result.into()
    }
}

/// O005 - incremental models should declare a unique key
pub struct UniqueKeyDefined {
    meta: OpinionMeta,
}

impl UniqueKeyDefined {
    pub fn build(_config: &Config) -> Result<OpinionBox, ConfigError> {
        Ok(Box::new(Self {
            meta: OpinionMeta::new(
                "O005",
                Severity::Should,
                "Models should have a unique key defined.",
            )
            .with_tags(&["dbt config", "models"]),
        }))
    }
}

impl Opinion for UniqueKeyDefined {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        let Some(node) = sql_model(file) else {
            return Evaluation::Skip;
        };

        let result = if node.config.unique_key().is_some() {
            self.meta
                .result(file, true, format!("Model {} has a unique key.", node.alias()))
        } else {
            self.meta.result(
                file,
                false,
                format!(
                    "Model {} {} have a unique key defined in its config.",
                    node.alias(),
                    self.meta.verb()
                ),
            )
        };
        result.into()
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct PrefixSettings {
    #[serde(default = "default_prefixes")]
    accepted_prefixes: Vec<String>,
}

impl Default for PrefixSettings {
    fn default() -> Self {
        Self {
            accepted_prefixes: default_prefixes(),
        }
    }
}

fn default_prefixes() -> Vec<String> {
    ["base", "stg", "int", "fct", "dim", "mrt", "agg"]
        .iter()
        .map(|p| p.to_string())
        .collect()
}

/// O006 - model names must start with a layer prefix
pub struct LayerPrefix {
    meta: OpinionMeta,
    prefixes: Vec<String>,
}

impl LayerPrefix {
    pub fn build(config: &Config) -> Result<OpinionBox, ConfigError> {
        let settings: PrefixSettings = config.opinion_settings("O006")?;
        Ok(Box::new(Self {
            meta: OpinionMeta::new(
                "O006",
                Severity::Must,
                "Model names must start with an accepted layer prefix.",
            )
            .with_tags(&["naming conventions", "models"]),
            prefixes: settings.accepted_prefixes,
        }))
    }
}

impl Opinion for LayerPrefix {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        let Some(node) = sql_model(file) else {
            return Evaluation::Skip;
        };

        let prefix = node.alias().split('_').next().unwrap_or_default();
        let result = if self.prefixes.iter().any(|p| p == prefix) {
            self.meta.result(
                file,
                true,
                format!("Model {} has an accepted prefix.", node.alias()),
            )
        } else {
            self.meta.result(
                file,
                false,
                format!(
                    "Model {} {} start with one of the prefixes: {}.",
                    node.alias(),
                    self.meta.verb(),
                    self.prefixes.join(", ")
                ),
            )
        };
        result.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{docs_file, model, project, sql_file};
    use opiner_core::Config;
    use serde_json::json;

    fn outcome(evaluation: Evaluation) -> Option<(bool, String)> {
        match evaluation {
            Evaluation::Single(result) => Some((result.passed, result.message)),
            Evaluation::Skip => None,
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn o004_reports_unresolved_wildcards() {
        let opinion = ExplicitFinalColumns::build(&Config::default()).unwrap();
        let ctx = project(vec![
            model("fct_orders").with_compiled_code("select o.*, c.name from orders o join customers c on o.cid = c.id"),
            model("fct_fees").with_compiled_code("with f as (select id, fee from raw_fees) select * from f"),
            model("fct_empty"),
        ]);

        let (passed, message) = outcome(opinion.evaluate(&sql_file(&ctx, "fct_orders"))).unwrap();
        assert!(!passed);
        assert_eq!(
            message,
            "The final columns in model fct_orders must be explicitly named at least once. \
             Unresolved select * statement(s): * from orders"
        );

        assert!(outcome(opinion.evaluate(&sql_file(&ctx, "fct_fees"))).unwrap().0);
        assert!(outcome(opinion.evaluate(&sql_file(&ctx, "fct_empty"))).is_none());
        assert!(outcome(opinion.evaluate(&docs_file(&ctx))).is_none());
    }

    #[test]
    fn o005_unique_key() {
        let opinion = UniqueKeyDefined::build(&Config::default()).unwrap();
        let ctx = project(vec![
            model("fct_orders").with_config("unique_key", json!("order_id")),
            model("fct_fees").with_config("unique_key", json!(null)),
        ]);

        assert!(outcome(opinion.evaluate(&sql_file(&ctx, "fct_orders"))).unwrap().0);
        let (passed, message) = outcome(opinion.evaluate(&sql_file(&ctx, "fct_fees"))).unwrap();
        assert!(!passed);
        assert_eq!(message, "Model fct_fees should have a unique key defined in its config.");
    }

    #[test]
    fn o006_default_and_configured_prefixes() {
        let ctx = project(vec![model("fct_orders"), model("orders_v2")]);

        let opinion = LayerPrefix::build(&Config::default()).unwrap();
        assert!(outcome(opinion.evaluate(&sql_file(&ctx, "fct_orders"))).unwrap().0);
        assert!(!outcome(opinion.evaluate(&sql_file(&ctx, "orders_v2"))).unwrap().0);

        let config = Config::from_str(
            "opinions_config:\n  extra_opinions_config:\n    O006:\n      accepted_prefixes: [orders]\n",
        )
        .unwrap();
        let opinion = LayerPrefix::build(&config).unwrap();
        assert!(outcome(opinion.evaluate(&sql_file(&ctx, "orders_v2"))).unwrap().0);
        assert!(!outcome(opinion.evaluate(&sql_file(&ctx, "fct_orders"))).unwrap().0);
    }

    #[test]
    fn o006_invalid_settings() {
        let config = Config::from_str(
            "opinions_config:\n  extra_opinions_config:\n    O006:\n      prefixes: [x]\n",
        )
        .unwrap();
        assert!(matches!(
            LayerPrefix::build(&config),
            Err(ConfigError::OpinionSettings(code, _)) if code == "O006"
        ));
    }
}
