//! Clone stage and the `Cloner` capability
//!
//! Raw git mechanics stay behind the `Cloner` trait. The stage clones into a
//! scratch directory next to the final location, enforces the size limit,
//! then swaps the new tree into place.

mod git;
mod remote;

pub use git::GitCloner;
pub use remote::{parse_repo_url, RepoUrl};

use crate::error::{Error, Result};
use crate::jobs::{JobProgress, StageContext};
use crate::meta::Job;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

/// Fetches a repository working tree
///
/// Errors: `RemoteNotFound`, `AuthRequired`, `Network`.
#[async_trait]
pub trait Cloner: Send + Sync {
    /// Materialize `url` at `git_ref` (default branch when `None`) into
    /// `dest`, returning the checked-out commit hash
    async fn clone_repo(&self, url: &str, git_ref: Option<&str>, dest: &Path) -> Result<String>;
}

/// A committed clone, ready to be recorded on the repository
#[derive(Debug, Clone)]
pub struct ClonedTree {
    pub path: PathBuf,
    pub commit_hash: String,
}

/// Working tree size in bytes, excluding VCS metadata
pub fn tree_size(root: &Path) -> u64 {
    WalkDir::new(root)
        .into_iter()
        .filter_entry(|e| e.file_name() != ".git")
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .filter_map(|e| e.metadata().ok())
        .map(|m| m.len())
        .sum()
}

fn remove_dir_quietly(path: &Path) {
    if path.exists() {
        if let Err(e) = std::fs::remove_dir_all(path) {
            warn!(path = %path.display(), error = %e, "Failed to remove directory");
        }
    }
}

/// CLONE stage: fetch into scratch space, check the size limit, swap into place
pub async fn run_stage(ctx: &StageContext, job: &Job, progress: &JobProgress) -> Result<ClonedTree> {
    let repo = ctx.db.require_repository(&job.repository_id).await?;
    let repos_dir = &ctx.config.paths.repos_dir;
    tokio::fs::create_dir_all(repos_dir).await?;

    let scratch = repos_dir.join(format!(".clone-{}-{}", repo.id, Uuid::new_v4()));
    let dest = repos_dir.join(&repo.id);

    debug!(repo_id = %repo.id, url = %repo.url, scratch = %scratch.display(), "Cloning");
    let commit_hash = match ctx
        .caps
        .cloner
        .clone_repo(&repo.url, repo.git_ref.as_deref(), &scratch)
        .await
    {
        Ok(hash) => hash,
        Err(e) => {
            remove_dir_quietly(&scratch);
            return Err(e);
        }
    };
    progress.report(60).await;

    let limit_mb = ctx.config.clone.max_repo_size_mb;
    let scratch_for_size = scratch.clone();
    let size = tokio::task::spawn_blocking(move || tree_size(&scratch_for_size))
        .await
        .map_err(|e| Error::Other(format!("Size check failed: {}", e)))?;
    if size > limit_mb * 1024 * 1024 {
        remove_dir_quietly(&scratch);
        return Err(Error::RepoTooLarge(format!(
            "working tree is {} MB, limit is {} MB",
            size / (1024 * 1024),
            limit_mb
        )));
    }

    remove_dir_quietly(&dest);
    tokio::fs::rename(&scratch, &dest).await?;
    progress.report(90).await;

    info!(
        repo_id = %repo.id,
        job_id = %job.id,
        commit = %commit_hash,
        size_bytes = size,
        "Cloned repository"
    );
    Ok(ClonedTree {
        path: dest,
        commit_hash,
    })
}
