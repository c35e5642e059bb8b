//! Privacy opinions: PII tagging, anonymous usage statistics

use crate::opinion::{per_model, Evaluation, Opinion, OpinionBox, OpinionMeta};
use opiner_core::{Config, ConfigError, Severity};
use opiner_dbt::{ColumnDefinition, ProjectFile, DBT_PROJECT_FILE, PROFILES_FILE};
use serde::Deserialize;
use serde_yaml::Value;
use std::collections::BTreeMap;

#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
struct PiiSettings {
    /// Column name to the tags it must carry
    #[serde(default)]
    pii_columns: BTreeMap<String, Vec<String>>,

    /// Check BigQuery policy tags instead of dbt tags
    #[serde(default)]
    policy_tag: bool,
}

/// P001 - PII columns must be tagged in the YAML file
pub struct PiiColumnsTagged {
    meta: OpinionMeta,
    settings: PiiSettings,
}

impl PiiColumnsTagged {
    pub fn build(config: &Config) -> Result<OpinionBox, ConfigError> {
        let settings: PiiSettings = config.opinion_settings("P001")?;
        if settings.pii_columns.is_empty() {
            tracing::warn!("No pii_columns configured for P001. Skipping.");
        }
        Ok(Box::new(Self {
            meta: OpinionMeta::new(
                "P001",
                Severity::Must,
                "Columns that contain Personal Identifiable Information (PII) must be tagged in the yaml file.",
            )
            .with_tags(&["privacy", "models"]),
            settings,
        }))
    }

    fn tag_kind(&self) -> &'static str {
        if self.settings.policy_tag {
            "policy_tags"
        } else {
            "tags"
        }
    }

    fn column_tags<'a>(&self, column: &'a ColumnDefinition) -> &'a [String] {
        if self.settings.policy_tag {
            column.policy_tags.as_deref().unwrap_or_default()
        } else {
            &column.tags
        }
    }
}

impl Opinion for PiiColumnsTagged {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        let pii = &self.settings.pii_columns;
        if pii.is_empty() {
            return Evaluation::Skip;
        }

        per_model(&self.meta, file, |node| {
            if node.columns.is_empty() {
                tracing::debug!("Model {} has no columns defined.", node.alias());
                return None;
            }

            let mut untagged: Vec<&str> = node
                .columns
                .iter()
                .filter(|(name, column)| {
                    let required = pii.get(name.as_str()).map(Vec::as_slice).unwrap_or_default();
                    let present = self.column_tags(column);
                    !required.iter().all(|tag| present.contains(tag))
                })
                .map(|(name, _)| name.as_str())
                .collect();

            // Selected but undocumented PII columns cannot carry tags at all
            untagged.extend(
                node.output_columns()
                    .iter()
                    .filter(|c| !c.contains('*') && !node.columns.contains_key(c.as_str()))
                    .filter(|c| pii.get(c.as_str()).is_some_and(|tags| !tags.is_empty()))
                    .map(String::as_str),
            );

            Some(if untagged.is_empty() {
                (
                    true,
                    format!("All columns in model {} have PII {}.", node.alias(), self.tag_kind()),
                )
            } else {
                (
                    false,
                    format!(
                        "Column(s): {} in model {} {} have a PII {}.",
                        untagged.join(", "),
                        node.alias(),
                        self.meta.verb(),
                        self.tag_kind()
                    ),
                )
            })
        })
    }
}

/// `send_anonymous_usage_stats` explicitly set to `false` under `section`
fn stats_disabled(document: Option<&Value>, section: &str) -> bool {
    document
        .and_then(|doc| doc.get(section))
        .and_then(|s| s.get("send_anonymous_usage_stats"))
        .and_then(Value::as_bool)
        == Some(false)
}

/// P002 - the project must not send anonymous usage statistics
pub struct NoAnonymousStats {
    meta: OpinionMeta,
}

impl NoAnonymousStats {
    pub fn build(_config: &Config) -> Result<OpinionBox, ConfigError> {
        Ok(Box::new(Self {
            meta: OpinionMeta::new(
                "P002",
                Severity::Must,
                "Dbt project must not send anonymous statistics.",
            )
            .with_tags(&["privacy", "dbt_config"]),
        }))
    }
}

impl Opinion for NoAnonymousStats {
    fn meta(&self) -> &OpinionMeta {
        &self.meta
    }

    fn evaluate(&self, file: &ProjectFile) -> Evaluation {
        if !matches!(file, ProjectFile::Yaml(_))
            || ![PROFILES_FILE, DBT_PROJECT_FILE].contains(&file.file_name())
        {
            return Evaluation::Skip;
        }

        let project = file.project();
        let result = if stats_disabled(project.profile.as_ref(), "config") {
            self.meta.result(
                file,
                true,
                "Anonymous statistics are disabled in profiles.yml file.",
            )
        } else if stats_disabled(Some(&project.project_config), "flags") {
            self.meta.result(
                file,
                true,
                "Anonymous statistics are disabled in dbt_project.yml file.",
            )
        } else {
            self.meta.result(
                file,
                false,
                format!("Dbt project {} not send anonymous statistics.", self.meta.verb()),
            )
        };
        result.into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{docs_file, model, project, project_with, sql_file, yaml_file};
    use opiner_core::Config;

    const PII_CONFIG: &str = "opinions_config:\n  extra_opinions_config:\n    P001:\n      pii_columns:\n        email: [pii]\n        phone: [pii, contact]\n";

    fn customers() -> opiner_dbt::Node {
        model("dim_customers")
            .with_compiled_code("select id, email, phone, birth_date from stg_customers")
            .with_column(ColumnDefinition::new("id"))
            .with_column(ColumnDefinition::new("email").with_tags(["pii"]))
            .with_column(ColumnDefinition::new("phone").with_tags(["pii"]))
    }

    #[test]
    fn p001_missing_tags_and_undocumented_columns() {
        let config = Config::from_str(&format!("{}        birth_date: [pii]\n", PII_CONFIG)).unwrap();
        let opinion = PiiColumnsTagged::build(&config).unwrap();
        let ctx = project(vec![customers()]);

        let Evaluation::Single(result) = opinion.evaluate(&sql_file(&ctx, "dim_customers")) else {
            panic!("expected a single result");
        };
        assert!(!result.passed);
        assert_eq!(
            result.message,
            "Column(s): phone, birth_date in model dim_customers must have a PII tags."
        );
    }

    #[test]
    fn p001_passes_when_tagged() {
        let opinion = PiiColumnsTagged::build(&Config::from_str(PII_CONFIG).unwrap()).unwrap();
        let ctx = project(vec![model("dim_customers")
            .with_column(ColumnDefinition::new("email").with_tags(["pii", "gdpr"]))
            .with_column(ColumnDefinition::new("phone").with_tags(["contact", "pii"]))]);

        let Evaluation::Many(results) = opinion.evaluate(&docs_file(&ctx)) else {
            panic!("expected per-model results");
        };
        assert_eq!(results.len(), 1);
        assert!(results[0].passed);
    }

    #[test]
    fn p001_policy_tags() {
        let config = Config::from_str(&format!("{}      policy_tag: true\n", PII_CONFIG)).unwrap();
        let opinion = PiiColumnsTagged::build(&config).unwrap();
        let mut email = ColumnDefinition::new("email").with_tags(["pii"]);
        email.policy_tags = Some(vec!["pii".to_string()]);
        let ctx = project(vec![model("dim_customers").with_column(email)]);

        let Evaluation::Single(result) = opinion.evaluate(&sql_file(&ctx, "dim_customers")) else {
            panic!("expected a single result");
        };
        assert!(result.passed);
        assert!(result.message.ends_with("have PII policy_tags."));
    }

    #[test]
    fn p001_skips_without_configuration_or_columns() {
        let ctx = project(vec![customers(), model("dim_dates")]);
        let unconfigured = PiiColumnsTagged::build(&Config::default()).unwrap();
        assert_eq!(unconfigured.evaluate(&sql_file(&ctx, "dim_customers")), Evaluation::Skip);

        let configured = PiiColumnsTagged::build(&Config::from_str(PII_CONFIG).unwrap()).unwrap();
        assert_eq!(configured.evaluate(&sql_file(&ctx, "dim_dates")), Evaluation::Skip);
    }

    fn stats_outcome(ctx: &std::sync::Arc<opiner_dbt::ProjectContext>, relative: &str) -> Option<bool> {
        let opinion = NoAnonymousStats::build(&Config::default()).unwrap();
        match opinion.evaluate(&yaml_file(ctx, relative, "name: shop\n")) {
            Evaluation::Single(result) => Some(result.passed),
            _ => None,
        }
    }

    #[test]
    fn p002_profile_or_project_flag() {
        let from_profile = project_with(Vec::new(), |c| {
            c.with_profile(serde_yaml::from_str("config:\n  send_anonymous_usage_stats: false\n").unwrap())
        });
        assert_eq!(stats_outcome(&from_profile, "profiles.yml"), Some(true));

        let from_project = project_with(Vec::new(), |c| {
            c.with_project_config(
                serde_yaml::from_str("flags:\n  send_anonymous_usage_stats: false\n").unwrap(),
            )
        });
        assert_eq!(stats_outcome(&from_project, "dbt_project.yml"), Some(true));

        let enabled = project_with(Vec::new(), |c| {
            c.with_project_config(
                serde_yaml::from_str("flags:\n  send_anonymous_usage_stats: true\n").unwrap(),
            )
        });
        assert_eq!(stats_outcome(&enabled, "dbt_project.yml"), Some(false));
    }

    #[test]
    fn p002_ignores_other_files() {
        let ctx = project(Vec::new());
        assert_eq!(stats_outcome(&ctx, "models/_models.yml"), None);
    }
}
