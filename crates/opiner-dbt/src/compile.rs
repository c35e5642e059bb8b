//! `dbt compile` invocation
//!
//! The manifest is produced by dbt itself. When a plain compile fails (for
//! instance on a fresh checkout) dependencies and seeds are installed first.

use crate::project::{ProjectError, PROFILES_FILE};
use std::path::Path;
use std::process::Command;

/// Compile the project at `root`, producing `target/manifest.json`
pub fn compile_project(root: &Path, target: Option<&str>) -> Result<(), ProjectError> {
    tracing::info!("Compiling dbt project at {}", root.display());

    if let Err(first) = run_dbt("compile", root, target) {
        tracing::warn!("dbt compile failed ({}). Installing deps and seeds before retrying.", first);
        run_dbt("deps", root, target)?;
        run_dbt("seed", root, target)?;
        run_dbt("compile", root, target)?;
    }
    Ok(())
}

fn run_dbt(subcommand: &str, root: &Path, target: Option<&str>) -> Result<(), ProjectError> {
    let mut cmd = Command::new("dbt");
    cmd.arg(subcommand).arg("--project-dir").arg(root);
    if root.join(PROFILES_FILE).is_file() {
        cmd.arg("--profiles-dir").arg(root);
    }
    if let Some(target) = target {
        cmd.arg("--target").arg(target);
    }

    tracing::debug!("Running {:?}", cmd);
    let output = cmd
        .output()
        .map_err(|e| ProjectError::Compile(format!("could not run dbt {}: {}", subcommand, e)))?;

    if output.status.success() {
        Ok(())
    } else {
        let stdout = String::from_utf8_lossy(&output.stdout);
        let stderr = String::from_utf8_lossy(&output.stderr);
        Err(ProjectError::Compile(format!(
            "dbt {} exited with {}: {}{}",
            subcommand,
            output.status,
            stdout.trim(),
            stderr.trim()
        )))
    }
}
