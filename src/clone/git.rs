//! libgit2-backed cloner

use super::Cloner;
use crate::error::{Error, Result};
use async_trait::async_trait;
use git2::{build::RepoBuilder, ErrorClass, ErrorCode, FetchOptions, ObjectType, Repository};
use std::path::{Path, PathBuf};
use tracing::debug;

/// Clones with libgit2: shallow first, full clone as fallback
#[derive(Debug, Clone, Default)]
pub struct GitCloner;

impl GitCloner {
    pub fn new() -> Self {
        Self
    }
}

fn shallow_clone(url: &str, dest: &Path, branch: Option<&str>) -> std::result::Result<Repository, git2::Error> {
    let mut fo = FetchOptions::new();
    fo.depth(1);

    let mut builder = RepoBuilder::new();
    builder.fetch_options(fo);
    if let Some(branch) = branch {
        builder.branch(branch);
    }
    builder.clone(url, dest)
}

fn checkout_ref(repo: &Repository, reference: &str) -> std::result::Result<(), git2::Error> {
    let object = repo.revparse_single(reference)?;
    repo.checkout_tree(&object, None)?;
    match object.kind() {
        Some(ObjectType::Commit) => repo.set_head_detached(object.id()),
        _ => {
            let commit = object.peel_to_commit()?;
            repo.set_head_detached(commit.id())
        }
    }
}

/// Map libgit2 failures onto the capability's error contract
fn classify(url: &str, err: git2::Error) -> Error {
    let message = err.message().to_lowercase();
    if err.code() == ErrorCode::Auth
        || message.contains("authentication")
        || message.contains("401")
        || message.contains("403")
    {
        return Error::AuthRequired(format!("{}: {}", url, err.message()));
    }
    if err.code() == ErrorCode::NotFound
        || message.contains("404")
        || message.contains("not found")
        || message.contains("does not exist")
    {
        return Error::RemoteNotFound(format!("{}: {}", url, err.message()));
    }
    match err.class() {
        ErrorClass::Net | ErrorClass::Http | ErrorClass::Ssh | ErrorClass::Ssl => {
            Error::Network(format!("{}: {}", url, err.message()))
        }
        _ => Error::Git(err),
    }
}

fn clone_blocking(url: &str, git_ref: Option<&str>, dest: &Path) -> Result<String> {
    let repo = match shallow_clone(url, dest, git_ref) {
        Ok(repo) => repo,
        Err(shallow_err) => {
            debug!(url, error = %shallow_err, "Shallow clone failed, retrying with full clone");
            if dest.exists() {
                std::fs::remove_dir_all(dest)?;
            }
            let repo = Repository::clone(url, dest).map_err(|e| classify(url, e))?;
            if let Some(reference) = git_ref {
                checkout_ref(&repo, reference).map_err(|e| {
                    Error::Validation(format!("Cannot check out '{}': {}", reference, e.message()))
                })?;
            }
            repo
        }
    };

    let commit = repo
        .head()
        .and_then(|head| head.peel_to_commit())
        .map_err(|e| classify(url, e))?;
    Ok(commit.id().to_string())
}

#[async_trait]
impl Cloner for GitCloner {
    async fn clone_repo(&self, url: &str, git_ref: Option<&str>, dest: &Path) -> Result<String> {
        let url = url.to_string();
        let git_ref = git_ref.map(str::to_string);
        let dest: PathBuf = dest.to_path_buf();
        tokio::task::spawn_blocking(move || clone_blocking(&url, git_ref.as_deref(), &dest))
            .await
            .map_err(|e| Error::Other(format!("Clone task failed: {}", e)))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use git2::Signature;
    use tempfile::TempDir;

    /// A local repository with one commit; returns (dir, commit id)
    fn origin() -> (TempDir, String) {
        let tmp = TempDir::new().unwrap();
        let repo = Repository::init(tmp.path()).unwrap();
        std::fs::write(tmp.path().join("main.py"), "print('widget')\n").unwrap();

        let mut index = repo.index().unwrap();
        index.add_path(Path::new("main.py")).unwrap();
        index.write().unwrap();
        let tree_id = index.write_tree().unwrap();
        let tree = repo.find_tree(tree_id).unwrap();
        let sig = Signature::now("tester", "tester@example.com").unwrap();
        let commit = repo
            .commit(Some("HEAD"), &sig, &sig, "initial", &tree, &[])
            .unwrap();
        (tmp, commit.to_string())
    }

    #[tokio::test]
    async fn test_clone_local_repository() {
        let (origin_dir, commit) = origin();
        let url = url::Url::from_file_path(origin_dir.path()).unwrap().to_string();
        let dest = TempDir::new().unwrap();
        let target = dest.path().join("clone");

        let hash = GitCloner::new().clone_repo(&url, None, &target).await.unwrap();
        assert_eq!(hash, commit);
        assert!(target.join("main.py").exists());
    }

    #[tokio::test]
    async fn test_missing_remote_is_not_found() {
        let dest = TempDir::new().unwrap();
        let missing = dest.path().join("does-not-exist");
        let url = url::Url::from_file_path(&missing).unwrap().to_string();

        let err = GitCloner::new()
            .clone_repo(&url, None, &dest.path().join("clone"))
            .await
            .unwrap_err();
        assert!(
            matches!(err, Error::RemoteNotFound(_) | Error::Git(_)),
            "unexpected error: {:?}",
            err
        );
        assert!(!err.is_retryable());
    }
}
