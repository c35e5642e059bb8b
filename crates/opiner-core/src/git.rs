//! Scoped git checkouts
//!
//! Clones a repository into a temporary directory that is removed when the
//! returned `Checkout` is dropped. Every git invocation runs with a bounded
//! wait and is killed on timeout.

use std::io::Read;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};
use tempfile::TempDir;

/// Default upper bound for a single git command
pub const DEFAULT_GIT_TIMEOUT: Duration = Duration::from_secs(120);

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A repository checked out into a temporary directory
#[derive(Debug)]
pub struct Checkout {
    dir: TempDir,
    repository: String,
}

impl Checkout {
    /// Root of the working tree
    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Repository URL the checkout was cloned from
    pub fn repository(&self) -> &str {
        &self.repository
    }
}

/// Clone `repository` and pin it to `rev` when given
pub fn clone_repository(repository: &str, rev: Option<&str>) -> Result<Checkout, GitError> {
    clone_repository_with_timeout(repository, rev, DEFAULT_GIT_TIMEOUT)
}

/// Clone with an explicit per-command timeout
pub fn clone_repository_with_timeout(
    repository: &str,
    rev: Option<&str>,
    timeout: Duration,
) -> Result<Checkout, GitError> {
    if let Some(rev) = rev.filter(|rev| rev.starts_with('-')) {
        return Err(GitError::InvalidRevision(rev.to_string()));
    }

    let dir = tempfile::Builder::new()
        .prefix("dbt-opiner-")
        .tempdir()
        .map_err(|e| GitError::TempDir(e.to_string()))?;

    let target = dir.path().to_string_lossy().into_owned();
    tracing::info!("Cloning {} into {}", repository, target);
    run_git(&["clone", "--quiet", "--", repository, &target], None, timeout)?;

    match rev {
        Some(rev) => {
            run_git(&["reset", "--quiet", "--hard", rev], Some(dir.path()), timeout)?;
        }
        None => {
            tracing::warn!(
                "Revision not defined for {}. Using the default branch head; pin a revision for reproducible runs.",
                repository
            );
        }
    }

    Ok(Checkout {
        dir,
        repository: repository.to_string(),
    })
}

fn run_git(args: &[&str], cwd: Option<&Path>, timeout: Duration) -> Result<(), GitError> {
    let command = format!("git {}", args.join(" "));
    tracing::debug!("Running {}", command);

    let mut cmd = Command::new("git");
    cmd.args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .env("GIT_TERMINAL_PROMPT", "0");
    if let Some(cwd) = cwd {
        cmd.current_dir(cwd);
    }

    let mut child = cmd
        .spawn()
        .map_err(|e| GitError::Spawn(command.clone(), e.to_string()))?;

    // Drained concurrently so a verbose git cannot block on a full pipe
    let stderr = child.stderr.take().map(|mut pipe| {
        thread::spawn(move || {
            let mut output = String::new();
            let _ = pipe.read_to_string(&mut output);
            output
        })
    });

    let started = Instant::now();
    let status = loop {
        match child.try_wait() {
            Ok(Some(status)) => break status,
            Ok(None) if started.elapsed() >= timeout => {
                let _ = child.kill();
                let _ = child.wait();
                return Err(GitError::Timeout(command, timeout.as_secs()));
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(GitError::Spawn(command, e.to_string())),
        }
    };

    if status.success() {
        return Ok(());
    }

    let stderr = stderr
        .and_then(|reader| reader.join().ok())
        .unwrap_or_default();
    Err(GitError::CommandFailed(command, stderr.trim().to_string()))
}

/// Git checkout errors
#[derive(Debug, thiserror::Error)]
pub enum GitError {
    #[error("Failed to create temporary directory: {0}")]
    TempDir(String),

    #[error("Failed to run `{0}`: {1}")]
    Spawn(String, String),

    #[error("`{0}` failed: {1}")]
    CommandFailed(String, String),

    #[error("`{0}` did not finish within {1}s")]
    Timeout(String, u64),

    #[error("Invalid revision '{0}'")]
    InvalidRevision(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn clone_of_missing_repository_fails() {
        let missing = std::env::temp_dir().join("dbt-opiner-no-such-repository");
        let result = clone_repository_with_timeout(
            &missing.to_string_lossy(),
            None,
            Duration::from_secs(30),
        );

        // Either git is unavailable (Spawn) or the clone itself fails.
        assert!(matches!(
            result,
            Err(GitError::Spawn(..)) | Err(GitError::CommandFailed(..))
        ));
    }

    #[test]
    fn repository_is_never_read_as_an_option() {
        let marker = tempfile::tempdir().unwrap();
        let touched = marker.path().join("touched");
        let repository = format!("--upload-pack=touch {}", touched.display());

        let result = clone_repository_with_timeout(&repository, None, Duration::from_secs(30));
        assert!(matches!(
            result,
            Err(GitError::Spawn(..)) | Err(GitError::CommandFailed(..))
        ));
        assert!(!touched.exists());
    }

    #[test]
    fn option_like_revision_is_rejected() {
        let result = clone_repository_with_timeout("unused", Some("--hard"), Duration::from_secs(30));
        assert!(matches!(result, Err(GitError::InvalidRevision(rev)) if rev == "--hard"));
    }
}
