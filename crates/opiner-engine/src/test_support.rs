//! Fixtures for unit tests

use opiner_dbt::{Manifest, Node, ProjectContext, ProjectFile, ResourceType};
use std::path::Path;
use std::sync::Arc;

pub const ROOT: &str = "/repo/shop";

/// Model `name` defined in `models/<name>.sql`, documented in `models/_models.yml`
pub fn model(name: &str) -> Node {
    let mut node = Node::new(format!("model.shop.{}", name), name, ResourceType::Model);
    node.original_file_path = format!("models/{}.sql", name);
    node.patch_path = Some("shop://models/_models.yml".to_string());
    node.schema = Some("analytics".to_string());
    node
}

pub fn project(nodes: Vec<Node>) -> Arc<ProjectContext> {
    project_with(nodes, |context| context)
}

pub fn project_with<F>(nodes: Vec<Node>, customize: F) -> Arc<ProjectContext>
where
    F: FnOnce(ProjectContext) -> ProjectContext,
{
    let mut manifest = Manifest::default();
    for node in nodes {
        let section = match node.resource_type {
            ResourceType::Macro => &mut manifest.macros,
            ResourceType::Source => &mut manifest.sources,
            _ => &mut manifest.nodes,
        };
        section.insert(node.unique_id.clone(), Arc::new(node));
    }
    Arc::new(customize(ProjectContext::new("shop", ROOT, manifest)))
}

pub fn sql_file(project: &Arc<ProjectContext>, name: &str) -> ProjectFile {
    sql_file_with(project, name, "select 1")
}

pub fn sql_file_with(project: &Arc<ProjectContext>, name: &str, content: &str) -> ProjectFile {
    let path = Path::new(ROOT).join(format!("models/{}.sql", name));
    ProjectFile::from_content(&path, content.to_string(), project).unwrap()
}

pub fn yaml_file(project: &Arc<ProjectContext>, relative: &str, content: &str) -> ProjectFile {
    let path = Path::new(ROOT).join(relative);
    ProjectFile::from_content(&path, content.to_string(), project).unwrap()
}

pub fn docs_file(project: &Arc<ProjectContext>) -> ProjectFile {
    yaml_file(project, "models/_models.yml", "version: 2\n")
}
