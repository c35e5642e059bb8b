//! Locating dbt projects inside a repository

use crate::project::DBT_PROJECT_FILE;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

const SKIPPED_DIRS: &[&str] = &[".git", ".venv", "node_modules", "dbt_packages", "target"];

/// Closest ancestor of `start` (inclusive) containing a `.git` entry
pub fn find_git_root(start: &Path) -> Option<PathBuf> {
    start
        .ancestors()
        .find(|dir| dir.join(".git").exists())
        .map(Path::to_path_buf)
}

/// Every `dbt_project.yml` under `root`
///
/// Projects nested inside another project (installed packages, fixtures)
/// are not reported.
pub fn find_dbt_projects(root: &Path) -> Vec<PathBuf> {
    let mut found: Vec<PathBuf> = walkdir::WalkDir::new(root)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|entry| {
            entry.depth() == 0
                || !(entry.file_type().is_dir()
                    && SKIPPED_DIRS.contains(&entry.file_name().to_string_lossy().as_ref()))
        })
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_file() && entry.file_name() == DBT_PROJECT_FILE)
        .map(|entry| entry.into_path())
        .collect();

    found.sort_by_key(|path| path.components().count());
    let mut projects: Vec<PathBuf> = Vec::new();
    for candidate in found {
        let nested = candidate.parent().is_some_and(|dir| {
            projects
                .iter()
                .filter_map(|p| p.parent())
                .any(|outer| dir != outer && dir.starts_with(outer))
        });
        if !nested {
            projects.push(candidate);
        }
    }
    projects.sort();
    projects
}

/// `dbt_project.yml` of the closest project containing `file`, up to `root`
pub fn project_for_file(file: &Path, root: &Path) -> Option<PathBuf> {
    file.ancestors()
        .skip(1)
        .take_while(|dir| dir.starts_with(root))
        .map(|dir| dir.join(DBT_PROJECT_FILE))
        .find(|candidate| candidate.is_file())
}

/// Group files by the project owning them; files outside any project are dropped
pub fn group_by_project(files: &[PathBuf], root: &Path) -> BTreeMap<PathBuf, Vec<PathBuf>> {
    let mut groups: BTreeMap<PathBuf, Vec<PathBuf>> = BTreeMap::new();
    for file in files {
        match project_for_file(file, root) {
            Some(project) => groups.entry(project).or_default().push(file.clone()),
            None => tracing::debug!("{} is not part of a dbt project", file.display()),
        }
    }
    groups
}
