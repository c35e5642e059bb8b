//! dbt manifest.json parsing
//!
//! Parses the dbt-generated manifest.json into read-only `Node` snapshots.
//! Nodes are shared (`Arc`) between the manifest and the file handlers.

use opiner_sql::extract_output_columns;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, OnceLock};

/// dbt manifest.json structure (subset of fields we care about)
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Manifest {
    /// Metadata about the manifest
    pub metadata: ManifestMetadata,

    /// Models, seeds, tests, snapshots, analyses
    pub nodes: BTreeMap<String, Arc<Node>>,

    /// Source tables
    pub sources: BTreeMap<String, Arc<Node>>,

    /// Macros
    pub macros: BTreeMap<String, Arc<Node>>,

    /// Exposures
    pub exposures: BTreeMap<String, Arc<Node>>,
}

#[derive(Deserialize)]
struct RawManifest {
    #[serde(default)]
    metadata: ManifestMetadata,
    #[serde(default)]
    nodes: BTreeMap<String, Node>,
    #[serde(default)]
    sources: BTreeMap<String, Node>,
    #[serde(default)]
    macros: BTreeMap<String, Node>,
    #[serde(default)]
    exposures: BTreeMap<String, Node>,
}

impl Manifest {
    /// Load manifest from file
    ///
    /// `dialect` is used when model lineage is computed.
    pub fn from_file(path: &Path, dialect: Option<&str>) -> Result<Self, ManifestError> {
        let contents = std::fs::read_to_string(path)
            .map_err(|e| ManifestError::IoError(path.display().to_string(), e.to_string()))?;

        Self::from_str(&contents, dialect)
    }

    /// Parse manifest from JSON string
    pub fn from_str(json: &str, dialect: Option<&str>) -> Result<Self, ManifestError> {
        let raw: RawManifest =
            serde_json::from_str(json).map_err(|e| ManifestError::ParseError(e.to_string()))?;

        let share = |nodes: BTreeMap<String, Node>| {
            nodes
                .into_iter()
                .map(|(id, node)| (id, Arc::new(node.with_dialect(dialect))))
                .collect()
        };

        Ok(Self {
            metadata: raw.metadata,
            nodes: share(raw.nodes),
            sources: share(raw.sources),
            macros: share(raw.macros),
            exposures: share(raw.exposures),
        })
    }

    /// Look a node up by unique_id across every section
    pub fn get(&self, unique_id: &str) -> Option<&Arc<Node>> {
        self.nodes
            .get(unique_id)
            .or_else(|| self.sources.get(unique_id))
            .or_else(|| self.macros.get(unique_id))
            .or_else(|| self.exposures.get(unique_id))
    }

    /// Get all model nodes
    pub fn models(&self) -> impl Iterator<Item = &Arc<Node>> {
        self.nodes.values().filter(|node| node.is_model())
    }

    /// Node defined by the SQL file at `relative_path`
    ///
    /// Macro files are looked up among macros, everything else among nodes.
    pub fn node_for_sql(&self, relative_path: &str, is_macro: bool) -> Option<&Arc<Node>> {
        let section = if is_macro { &self.macros } else { &self.nodes };
        section
            .values()
            .find(|node| same_path(&node.original_file_path, relative_path))
    }

    /// Nodes documented by the YAML file at `relative_path`
    pub fn nodes_documented_in(&self, relative_path: &str) -> Vec<Arc<Node>> {
        let patched = self
            .nodes
            .values()
            .chain(self.macros.values())
            .filter(|node| node.docs_file().is_some_and(|f| same_path(f, relative_path)));

        let declared = self
            .sources
            .values()
            .chain(self.exposures.values())
            .filter(|node| same_path(&node.original_file_path, relative_path));

        patched.chain(declared).cloned().collect()
    }
}

fn same_path(a: &str, b: &str) -> bool {
    a.replace('\\', "/") == b.replace('\\', "/")
}

/// Manifest metadata
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ManifestMetadata {
    #[serde(default)]
    pub dbt_schema_version: Option<String>,
    #[serde(default)]
    pub dbt_version: Option<String>,
    #[serde(default)]
    pub project_name: Option<String>,
}

/// Resource type of a manifest node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceType {
    Model,
    Macro,
    Source,
    Exposure,
    Seed,
    Snapshot,
    Test,
    Analysis,
    #[serde(other)]
    Other,
}

impl std::fmt::Display for ResourceType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Model => "model",
            Self::Macro => "macro",
            Self::Source => "source",
            Self::Exposure => "exposure",
            Self::Seed => "seed",
            Self::Snapshot => "snapshot",
            Self::Test => "test",
            Self::Analysis => "analysis",
            Self::Other => "other",
        };
        write!(f, "{}", name)
    }
}

/// A model, macro, source or exposure from the manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier (e.g., "model.shop.fct_orders")
    pub unique_id: String,

    /// Node name (e.g., "fct_orders")
    pub name: String,

    /// Resource type
    pub resource_type: ResourceType,

    #[serde(default)]
    pub package_name: String,

    /// Path relative to the project root
    #[serde(default)]
    pub original_file_path: String,

    #[serde(default)]
    pub database: Option<String>,

    #[serde(default)]
    pub schema: Option<String>,

    /// Relation name; falls back to `name`
    #[serde(default)]
    pub alias: Option<String>,

    #[serde(default)]
    pub description: String,

    /// Documented columns
    #[serde(default)]
    pub columns: BTreeMap<String, ColumnDefinition>,

    #[serde(default)]
    pub config: NodeConfig,

    #[serde(default)]
    pub depends_on: DependsOn,

    /// YAML file documenting the node (`<project>://<path>`)
    #[serde(default)]
    pub patch_path: Option<String>,

    /// Compiled SQL (models, after `dbt compile`)
    #[serde(default)]
    pub compiled_code: Option<String>,

    #[serde(skip)]
    dialect: Option<String>,

    #[serde(skip)]
    output_columns: OnceLock<Vec<String>>,
}

impl Node {
    fn with_dialect(mut self, dialect: Option<&str>) -> Self {
        self.dialect = dialect.map(str::to_string);
        self
    }

    /// Build a node programmatically (fixtures and custom tooling)
    pub fn new(unique_id: impl Into<String>, name: impl Into<String>, resource_type: ResourceType) -> Self {
        Self {
            unique_id: unique_id.into(),
            name: name.into(),
            resource_type,
            package_name: String::new(),
            original_file_path: String::new(),
            database: None,
            schema: None,
            alias: None,
            description: String::new(),
            columns: BTreeMap::new(),
            config: NodeConfig::default(),
            depends_on: DependsOn::default(),
            patch_path: None,
            compiled_code: None,
            dialect: None,
            output_columns: OnceLock::new(),
        }
    }

    /// Relation name
    pub fn alias(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.name)
    }

    /// Schema, or an empty string when unknown
    pub fn schema(&self) -> &str {
        self.schema.as_deref().unwrap_or("")
    }

    pub fn is_model(&self) -> bool {
        self.resource_type == ResourceType::Model
    }

    /// Whether a non-blank description is set
    pub fn has_description(&self) -> bool {
        !self.description.trim().is_empty()
    }

    /// Project-relative path of the YAML docs file, from `patch_path`
    pub fn docs_file(&self) -> Option<&str> {
        let patch_path = self.patch_path.as_deref()?;
        let relative = patch_path
            .split_once("://")
            .map(|(_, path)| path)
            .unwrap_or(patch_path);
        (!relative.is_empty()).then_some(relative)
    }

    /// Final output columns of the compiled SQL
    ///
    /// Computed on first use and cached. Empty for non-models and for
    /// models whose compiled code is missing or cannot be parsed.
    pub fn output_columns(&self) -> &[String] {
        self.output_columns.get_or_init(|| match (&self.compiled_code, self.is_model()) {
            (Some(sql), true) => extract_output_columns(sql, self.dialect.as_deref()),
            _ => Vec::new(),
        })
    }

    /// Builder helpers used by fixtures
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_compiled_code(mut self, sql: impl Into<String>) -> Self {
        self.compiled_code = Some(sql.into());
        self.output_columns = OnceLock::new();
        self
    }

    pub fn with_column(mut self, column: ColumnDefinition) -> Self {
        self.columns.insert(column.name.clone(), column);
        self
    }

    pub fn with_config(mut self, key: &str, value: Value) -> Self {
        self.config.0.insert(key.to_string(), value);
        self
    }
}

/// Node configuration map
///
/// Kept verbatim; well-known keys have typed accessors. `null` is absent.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeConfig(pub Map<String, Value>);

impl NodeConfig {
    /// Raw value of a key, ignoring nulls
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|value| !value.is_null())
    }

    pub fn materialized(&self) -> Option<&str> {
        self.get("materialized").and_then(Value::as_str)
    }

    pub fn unique_key(&self) -> Option<&Value> {
        self.get("unique_key")
    }

    pub fn cluster_by(&self) -> Option<&Value> {
        self.get("cluster_by")
    }
}

/// Column definition from manifest
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ColumnDefinition {
    pub name: String,

    #[serde(default)]
    pub description: String,

    #[serde(default)]
    pub data_type: Option<String>,

    #[serde(default)]
    pub tags: Vec<String>,

    /// BigQuery policy tags
    #[serde(default)]
    pub policy_tags: Option<Vec<String>>,
}

impl ColumnDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_tags<I: IntoIterator<Item = S>, S: Into<String>>(mut self, tags: I) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }
}

/// Dependencies structure
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DependsOn {
    /// unique_ids of nodes this node selects from
    #[serde(default)]
    pub nodes: Vec<String>,

    #[serde(default)]
    pub macros: Vec<String>,
}

/// Manifest parsing errors
#[derive(Debug, thiserror::Error)]
pub enum ManifestError {
    #[error("Failed to read manifest file {0}: {1}")]
    IoError(String, String),

    #[error("Failed to parse manifest JSON: {0}")]
    ParseError(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const MANIFEST: &str = r#"{
      "metadata": {"dbt_version": "1.8.0", "project_name": "shop"},
      "nodes": {
        "model.shop.fct_orders": {
          "unique_id": "model.shop.fct_orders",
          "name": "fct_orders",
          "resource_type": "model",
          "original_file_path": "models/marts/fct_orders.sql",
          "schema": "marts",
          "description": "Orders. One row per order.",
          "columns": {
            "order_id": {"name": "order_id", "description": "Primary key", "policy_tags": null}
          },
          "config": {"materialized": "table", "unique_key": null, "cluster_by": ["order_id"]},
          "depends_on": {"nodes": ["model.shop.stg_orders"], "macros": []},
          "patch_path": "shop://models/marts/_marts.yml",
          "compiled_code": "select order_id from stg_orders"
        },
        "test.shop.not_null": {
          "unique_id": "test.shop.not_null",
          "name": "not_null",
          "resource_type": "test"
        }
      },
      "sources": {
        "source.shop.raw.orders": {
          "unique_id": "source.shop.raw.orders",
          "name": "orders",
          "resource_type": "source",
          "original_file_path": "models/staging/_sources.yml",
          "database": "raw-db",
          "schema": "raw"
        }
      },
      "macros": {
        "macro.shop.cents": {
          "unique_id": "macro.shop.cents",
          "name": "cents",
          "resource_type": "macro",
          "original_file_path": "macros/cents.sql",
          "depends_on": {"macros": []}
        }
      },
      "exposures": {}
    }"#;

    #[test]
    fn parse_manifest() {
        let manifest = Manifest::from_str(MANIFEST, Some("bigquery")).unwrap();
        assert_eq!(manifest.metadata.dbt_version.as_deref(), Some("1.8.0"));
        assert_eq!(manifest.models().count(), 1);

        let model = manifest.get("model.shop.fct_orders").unwrap();
        assert_eq!(model.alias(), "fct_orders");
        assert_eq!(model.schema(), "marts");
        assert_eq!(model.config.materialized(), Some("table"));
        assert!(model.config.unique_key().is_none());
        assert!(model.config.cluster_by().is_some());
        assert_eq!(model.depends_on.nodes, vec!["model.shop.stg_orders".to_string()]);
        assert_eq!(model.output_columns(), ["order_id".to_string()]);

        let source = manifest.get("source.shop.raw.orders").unwrap();
        assert_eq!(source.database.as_deref(), Some("raw-db"));
        assert!(source.output_columns().is_empty());
    }

    #[test]
    fn docs_file_from_patch_path() {
        let manifest = Manifest::from_str(MANIFEST, None).unwrap();
        let model = manifest.get("model.shop.fct_orders").unwrap();
        assert_eq!(model.docs_file(), Some("models/marts/_marts.yml"));

        let source = manifest.get("source.shop.raw.orders").unwrap();
        assert_eq!(source.docs_file(), None);
    }

    #[test]
    fn lookup_by_file() {
        let manifest = Manifest::from_str(MANIFEST, None).unwrap();

        let model = manifest.node_for_sql("models/marts/fct_orders.sql", false).unwrap();
        assert_eq!(model.name, "fct_orders");
        assert!(manifest.node_for_sql("macros/cents.sql", false).is_none());
        assert!(manifest.node_for_sql("macros/cents.sql", true).is_some());

        let documented = manifest.nodes_documented_in("models/marts/_marts.yml");
        assert_eq!(documented.len(), 1);
        let sources = manifest.nodes_documented_in("models/staging/_sources.yml");
        assert_eq!(sources[0].unique_id, "source.shop.raw.orders");
        assert!(manifest.nodes_documented_in("models/other.yml").is_empty());
    }

    #[test]
    fn unknown_resource_types_are_kept() {
        let json = r#"{"nodes": {"unit_test.shop.x": {"unique_id": "unit_test.shop.x", "name": "x", "resource_type": "unit_test"}}}"#;
        let manifest = Manifest::from_str(json, None).unwrap();
        assert_eq!(
            manifest.get("unit_test.shop.x").unwrap().resource_type,
            ResourceType::Other
        );
    }

    #[test]
    fn invalid_json_is_an_error() {
        assert!(matches!(
            Manifest::from_str("{", None),
            Err(ManifestError::ParseError(_))
        ));
    }
}
