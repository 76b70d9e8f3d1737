//! Repository records, lifecycle transitions and the event log

use super::{timestamp, MetaDb};
use crate::error::{Error, Result};
use crate::lifecycle::{effective_status, RepoStatus};
use crate::structure::{EntryPoint, LanguageStats, StructureSnapshot, TreeEntry};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};
use std::collections::BTreeMap;
use uuid::Uuid;

/// A registered repository
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct Repository {
    pub id: String,
    pub owner: String,
    pub name: String,
    pub url: String,
    pub git_ref: Option<String>,
    pub status: String,
    pub last_good_status: Option<String>,
    pub generation: i64,
    pub commit_hash: Option<String>,
    pub indexed_commit: Option<String>,
    pub structure_commit: Option<String>,
    pub local_path: Option<String>,
    pub total_files: i64,
    pub total_size_bytes: i64,
    pub total_chunks: i64,
    pub primary_language: Option<String>,
    pub language_breakdown_json: Option<String>,
    pub file_tree_json: Option<String>,
    pub entry_points_json: Option<String>,
    pub force_reingest: bool,
    pub last_error: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Repository {
    pub fn new(owner: String, name: String, url: String, git_ref: Option<String>) -> Self {
        let now = timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            owner,
            name,
            url,
            git_ref,
            status: RepoStatus::Created.to_string(),
            last_good_status: None,
            generation: 0,
            commit_hash: None,
            indexed_commit: None,
            structure_commit: None,
            local_path: None,
            total_files: 0,
            total_size_bytes: 0,
            total_chunks: 0,
            primary_language: None,
            language_breakdown_json: None,
            file_tree_json: None,
            entry_points_json: None,
            force_reingest: false,
            last_error: None,
            created_at: now.clone(),
            updated_at: now,
        }
    }

    pub fn get_status(&self) -> Result<RepoStatus> {
        self.status.parse()
    }

    pub fn last_good(&self) -> Option<RepoStatus> {
        self.last_good_status.as_deref().and_then(|s| s.parse().ok())
    }

    /// Status used for gating, resolving FAILED to its last good status
    pub fn effective_status(&self) -> Result<RepoStatus> {
        Ok(effective_status(self.get_status()?, self.last_good()))
    }

    /// `owner/name`
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    pub fn language_breakdown(&self) -> BTreeMap<String, LanguageStats> {
        self.language_breakdown_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }

    pub fn file_tree(&self) -> Vec<TreeEntry> {
        self.file_tree_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }

    pub fn entry_points(&self) -> Vec<EntryPoint> {
        self.entry_points_json
            .as_ref()
            .and_then(|j| serde_json::from_str(j).ok())
            .unwrap_or_default()
    }
}

/// One entry of the append-only event log
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct RepoEvent {
    pub seq: i64,
    pub repository_id: String,
    pub job_id: Option<String>,
    pub event: String,
    pub from_status: Option<String>,
    pub to_status: Option<String>,
    pub detail: Option<String>,
    pub created_at: String,
}

/// Append an event row
pub async fn append_event(
    conn: &mut SqliteConnection,
    repository_id: &str,
    job_id: Option<&str>,
    event: &str,
    transition: Option<(RepoStatus, RepoStatus)>,
    detail: Option<&str>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO events (repository_id, job_id, event, from_status, to_status, detail, created_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(repository_id)
    .bind(job_id)
    .bind(event)
    .bind(transition.map(|(from, _)| from.to_string()))
    .bind(transition.map(|(_, to)| to.to_string()))
    .bind(detail)
    .bind(timestamp())
    .execute(conn)
    .await?;
    Ok(())
}

/// Load a repository inside a transaction
pub async fn fetch_repository(conn: &mut SqliteConnection, id: &str) -> Result<Repository> {
    sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE id = ?")
        .bind(id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| Error::RepoNotFound(id.to_string()))
}

/// Move a repository to `to` and log the edge
///
/// Entering FAILED remembers the status held before; leaving FAILED clears
/// it along with `last_error`.
pub async fn record_transition(
    conn: &mut SqliteConnection,
    repository_id: &str,
    from: RepoStatus,
    to: RepoStatus,
    job_id: Option<&str>,
    error: Option<&str>,
) -> Result<()> {
    if to == RepoStatus::Failed {
        sqlx::query(
            r#"
            UPDATE repositories SET
                status = ?,
                last_good_status = CASE WHEN status = 'FAILED' THEN last_good_status ELSE status END,
                last_error = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(to.to_string())
        .bind(error)
        .bind(timestamp())
        .bind(repository_id)
        .execute(&mut *conn)
        .await?;
    } else {
        sqlx::query(
            r#"
            UPDATE repositories SET
                status = ?,
                last_good_status = NULL,
                last_error = NULL,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(to.to_string())
        .bind(timestamp())
        .bind(repository_id)
        .execute(&mut *conn)
        .await?;
    }

    append_event(
        conn,
        repository_id,
        job_id,
        "status_changed",
        Some((from, to)),
        error,
    )
    .await
}

/// Record a failure on a repository already in FAILED (no new edge)
pub async fn update_last_error(
    conn: &mut SqliteConnection,
    repository_id: &str,
    error: &str,
) -> Result<()> {
    sqlx::query("UPDATE repositories SET last_error = ?, updated_at = ? WHERE id = ?")
        .bind(error)
        .bind(timestamp())
        .bind(repository_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Commit a finished clone: new generation, new commit, prior artifacts dropped
pub async fn apply_clone_result(
    conn: &mut SqliteConnection,
    repository_id: &str,
    commit_hash: &str,
    local_path: &str,
) -> Result<()> {
    super::invalidate_artifacts(&mut *conn, repository_id).await?;

    sqlx::query(
        r#"
        UPDATE repositories SET
            generation = generation + 1,
            commit_hash = ?,
            local_path = ?,
            indexed_commit = NULL,
            structure_commit = NULL,
            total_files = 0,
            total_size_bytes = 0,
            total_chunks = 0,
            primary_language = NULL,
            language_breakdown_json = NULL,
            file_tree_json = NULL,
            entry_points_json = NULL,
            force_reingest = 0,
            updated_at = ?
        WHERE id = ?
        "#,
    )
    .bind(commit_hash)
    .bind(local_path)
    .bind(timestamp())
    .bind(repository_id)
    .execute(conn)
    .await?;
    Ok(())
}

/// Take the database write lock before reading anything in this transaction
///
/// A WAL reader that later tries to write fails with a stale snapshot when
/// another writer committed in between; writing first makes racing
/// transactions queue on the busy timeout instead.
pub async fn lock_repository(conn: &mut SqliteConnection, repository_id: &str) -> Result<()> {
    sqlx::query("UPDATE repositories SET updated_at = updated_at WHERE id = ?")
        .bind(repository_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Flag a repository for forced re-ingestion inside a transaction
pub async fn mark_force_reingest(conn: &mut SqliteConnection, repository_id: &str) -> Result<()> {
    sqlx::query("UPDATE repositories SET force_reingest = 1, updated_at = ? WHERE id = ?")
        .bind(timestamp())
        .bind(repository_id)
        .execute(conn)
        .await?;
    Ok(())
}

/// Mark the current commit as fully indexed
pub async fn set_indexed_commit(
    conn: &mut SqliteConnection,
    repository_id: &str,
    commit_hash: Option<&str>,
) -> Result<()> {
    sqlx::query("UPDATE repositories SET indexed_commit = ?, updated_at = ? WHERE id = ?")
        .bind(commit_hash)
        .bind(timestamp())
        .bind(repository_id)
        .execute(conn)
        .await?;
    Ok(())
}

impl MetaDb {
    // ===== Repository Operations =====

    /// Insert a new repository and log its registration
    pub async fn insert_repository(&self, repo: &Repository) -> Result<()> {
        let mut tx = self.begin().await?;
        let inserted = sqlx::query(
            r#"
            INSERT INTO repositories (id, owner, name, url, git_ref, status, generation, force_reingest, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&repo.id)
        .bind(&repo.owner)
        .bind(&repo.name)
        .bind(&repo.url)
        .bind(&repo.git_ref)
        .bind(&repo.status)
        .bind(repo.generation)
        .bind(repo.force_reingest)
        .bind(&repo.created_at)
        .bind(&repo.updated_at)
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(_) => {}
            Err(sqlx::Error::Database(e)) if e.is_unique_violation() => {
                return Err(Error::Conflict(format!(
                    "Repository already registered: {}",
                    repo.url
                )));
            }
            Err(e) => return Err(e.into()),
        }

        append_event(&mut tx, &repo.id, None, "registered", None, Some(&repo.url)).await?;
        tx.commit().await?;
        Ok(())
    }

    /// Get repository by ID
    pub async fn get_repository(&self, id: &str) -> Result<Option<Repository>> {
        let repo = sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE id = ?")
            .bind(id)
            .fetch_optional(self.pool())
            .await?;
        Ok(repo)
    }

    /// Get repository by ID or fail with `RepoNotFound`
    pub async fn require_repository(&self, id: &str) -> Result<Repository> {
        self.get_repository(id)
            .await?
            .ok_or_else(|| Error::RepoNotFound(id.to_string()))
    }

    /// Get repository by canonical URL
    pub async fn get_repository_by_url(&self, url: &str) -> Result<Option<Repository>> {
        let repo = sqlx::query_as::<_, Repository>("SELECT * FROM repositories WHERE url = ?")
            .bind(url)
            .fetch_optional(self.pool())
            .await?;
        Ok(repo)
    }

    /// Resolve an ID, canonical URL or `owner/name`
    pub async fn find_repository(&self, key: &str) -> Result<Repository> {
        if let Some(repo) = self.get_repository(key).await? {
            return Ok(repo);
        }
        if let Some(repo) = self.get_repository_by_url(key).await? {
            return Ok(repo);
        }
        if let Some((owner, name)) = key.split_once('/') {
            let matches = sqlx::query_as::<_, Repository>(
                "SELECT * FROM repositories WHERE owner = ? AND name = ? ORDER BY created_at",
            )
            .bind(owner)
            .bind(name)
            .fetch_all(self.pool())
            .await?;
            if matches.len() > 1 {
                return Err(Error::Validation(format!(
                    "'{}' matches {} repositories; use the repository ID",
                    key,
                    matches.len()
                )));
            }
            if let Some(repo) = matches.into_iter().next() {
                return Ok(repo);
            }
        }
        Err(Error::RepoNotFound(key.to_string()))
    }

    /// List all repositories
    pub async fn list_repositories(&self) -> Result<Vec<Repository>> {
        let repos =
            sqlx::query_as::<_, Repository>("SELECT * FROM repositories ORDER BY created_at DESC")
                .fetch_all(self.pool())
                .await?;
        Ok(repos)
    }

    /// Store the structure snapshot produced for `commit_hash`
    pub async fn save_structure_snapshot(
        &self,
        repository_id: &str,
        commit_hash: &str,
        snapshot: &StructureSnapshot,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE repositories SET
                structure_commit = ?,
                total_files = ?,
                total_size_bytes = ?,
                total_chunks = ?,
                primary_language = ?,
                language_breakdown_json = ?,
                file_tree_json = ?,
                entry_points_json = ?,
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(commit_hash)
        .bind(snapshot.total_files as i64)
        .bind(snapshot.total_size_bytes as i64)
        .bind(snapshot.total_chunks as i64)
        .bind(&snapshot.primary_language)
        .bind(serde_json::to_string(&snapshot.language_breakdown)?)
        .bind(serde_json::to_string(&snapshot.file_tree)?)
        .bind(serde_json::to_string(&snapshot.entry_points)?)
        .bind(timestamp())
        .bind(repository_id)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    // ===== Event Operations =====

    /// Events for a repository, oldest first
    pub async fn list_events(&self, repository_id: &str, limit: usize) -> Result<Vec<RepoEvent>> {
        let events = sqlx::query_as::<_, RepoEvent>(
            r#"
            SELECT * FROM (
                SELECT * FROM events WHERE repository_id = ? ORDER BY seq DESC LIMIT ?
            ) ORDER BY seq ASC
            "#,
        )
        .bind(repository_id)
        .bind(limit as i64)
        .fetch_all(self.pool())
        .await?;
        Ok(events)
    }
}
