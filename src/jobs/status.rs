//! Read-only status projection polled by clients

use crate::error::Result;
use crate::meta::{Job, MetaDb};
use serde::Serialize;

/// Latest job of one kind
#[derive(Debug, Clone, Serialize)]
pub struct JobSummary {
    pub job_id: String,
    pub kind: String,
    pub status: String,
    pub progress: i64,
    pub attempt_count: i64,
    pub max_attempts: i64,
    pub error_kind: Option<String>,
    pub error_message: Option<String>,
    pub run_after: String,
    pub started_at: Option<String>,
    pub finished_at: Option<String>,
}

impl From<&Job> for JobSummary {
    fn from(job: &Job) -> Self {
        Self {
            job_id: job.id.clone(),
            kind: job.kind.clone(),
            status: job.status.clone(),
            progress: job.progress,
            attempt_count: job.attempt_count,
            max_attempts: job.max_attempts,
            error_kind: job.error_kind.clone(),
            error_message: job.error_message.clone(),
            run_after: job.run_after.clone(),
            started_at: job.started_at.clone(),
            finished_at: job.finished_at.clone(),
        }
    }
}

/// Status of a repository and its pipeline
#[derive(Debug, Clone, Serialize)]
pub struct StatusView {
    pub repository_id: String,
    pub full_name: String,
    pub url: String,
    pub status: String,
    pub last_good_status: Option<String>,
    pub commit_hash: Option<String>,
    pub indexed_commit: Option<String>,
    pub last_error: Option<String>,
    pub total_files: i64,
    pub total_chunks: i64,
    pub embedded_chunks: usize,
    pub stages: Vec<JobSummary>,
    pub active_job: Option<JobSummary>,
    pub updated_at: String,
}

/// Build the status projection; reads only
pub async fn status(db: &MetaDb, embedding_model: &str, repository_id: &str) -> Result<StatusView> {
    let repo = db.require_repository(repository_id).await?;
    let latest = db.latest_jobs(&repo.id).await?;
    let (embedded_chunks, _) = db.get_embedding_coverage(&repo.id, embedding_model).await?;

    let active_job = latest
        .iter()
        .filter(|j| j.status == "running" || j.status == "pending")
        .min_by(|a, b| {
            // a running job is more interesting than a queued one
            (a.status != "running", &a.created_at).cmp(&(b.status != "running", &b.created_at))
        })
        .map(JobSummary::from);

    Ok(StatusView {
        full_name: repo.full_name(),
        repository_id: repo.id,
        url: repo.url,
        status: repo.status,
        last_good_status: repo.last_good_status,
        commit_hash: repo.commit_hash,
        indexed_commit: repo.indexed_commit,
        last_error: repo.last_error,
        total_files: repo.total_files,
        total_chunks: repo.total_chunks,
        embedded_chunks,
        stages: latest.iter().map(JobSummary::from).collect(),
        active_job,
        updated_at: repo.updated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::JobKind;
    use crate::meta::test_support::setup_test_db;
    use crate::meta::{insert_job, Repository};

    #[tokio::test]
    async fn test_status_reports_active_job() {
        let (db, _tmp) = setup_test_db().await;
        let repo = Repository::new(
            "acme".into(),
            "widget".into(),
            "https://github.com/acme/widget".into(),
            None,
        );
        db.insert_repository(&repo).await.unwrap();

        let job = Job::new(repo.id.clone(), JobKind::Clone, 0, false, 3);
        let mut tx = db.begin().await.unwrap();
        insert_job(&mut tx, &job).await.unwrap();
        tx.commit().await.unwrap();

        let view = status(&db, "hashing-256", &repo.id).await.unwrap();
        assert_eq!(view.status, "CREATED");
        assert_eq!(view.full_name, "acme/widget");
        assert_eq!(view.stages.len(), 1);
        assert_eq!(view.active_job.unwrap().job_id, job.id);
        assert!(view.last_error.is_none());
    }

    #[tokio::test]
    async fn test_status_unknown_repository() {
        let (db, _tmp) = setup_test_db().await;
        assert!(status(&db, "hashing-256", "missing").await.is_err());
    }
}
