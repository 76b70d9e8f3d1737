//! Durable job queue execution

use super::{run_handler, JobKind, JobProgress, JobStatus, StageContext, StageOutcome};
use crate::clone::parse_repo_url;
use crate::error::{Error, ErrorKind, Result};
use crate::lifecycle::{self, RepoStatus};
use crate::meta::{
    active_jobs, apply_clone_result, count_documents, embedding_coverage, fetch_job,
    fetch_repository, insert_job, lock_repository, mark_force_reingest, mark_job_failed, mark_job_succeeded,
    parse_timestamp, record_transition, requeue_job, set_indexed_commit, timestamp_after,
    update_last_error, Job, MetaDb, Repository,
};
use crate::retry::Backoff;
use chrono::Utc;
use sqlx::SqliteConnection;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Mutex};
use tokio::task::{AbortHandle, JoinHandle};
use tracing::{debug, error, info, warn};

/// Grace period past a stage timeout before a RUNNING job counts as abandoned
const REAP_GRACE: Duration = Duration::from_secs(30);

/// Submits, claims, executes and finishes pipeline jobs
pub struct JobEngine {
    ctx: StageContext,
    backoff: Backoff,
    running: Mutex<HashMap<String, AbortHandle>>,
}

impl JobEngine {
    pub fn new(ctx: StageContext) -> Self {
        let backoff = Backoff::new(
            Duration::from_millis(ctx.config.jobs.backoff_base_ms),
            Duration::from_millis(ctx.config.jobs.backoff_max_ms),
        );
        Self {
            ctx,
            backoff,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn context(&self) -> &StageContext {
        &self.ctx
    }

    fn db(&self) -> &MetaDb {
        &self.ctx.db
    }

    // ===== Submission =====

    /// Register a repository by URL and submit its CLONE job
    pub async fn register(&self, url: &str, git_ref: Option<&str>) -> Result<(Repository, Job)> {
        let parsed = parse_repo_url(url)?;
        let repo = Repository::new(
            parsed.owner,
            parsed.name,
            parsed.canonical,
            git_ref.map(str::to_string),
        );
        self.db().insert_repository(&repo).await?;
        info!(repo_id = %repo.id, url = %repo.url, "Registered repository");

        let job = self.submit(&repo.id, JobKind::Clone).await?;
        Ok((repo, job))
    }

    /// Submit a job; `Conflict` if one of the same kind is still active
    pub async fn submit(&self, repository_id: &str, kind: JobKind) -> Result<Job> {
        self.submit_with(repository_id, kind, false).await
    }

    /// Force a fresh CLONE, invalidating every artifact of the current commit
    pub async fn reingest(&self, repository_id: &str) -> Result<Job> {
        self.submit_with(repository_id, JobKind::Clone, true).await
    }

    pub async fn submit_with(&self, repository_id: &str, kind: JobKind, force: bool) -> Result<Job> {
        let mut tx = self.db().begin().await?;
        lock_repository(&mut tx, repository_id).await?;
        let repo = fetch_repository(&mut tx, repository_id).await?;
        let status = repo.get_status()?;

        lifecycle::accepts(status, repo.last_good(), kind, force)?;

        if kind == JobKind::Clone {
            let others: Vec<Job> = active_jobs(&mut tx, &repo.id)
                .await?
                .into_iter()
                .filter(|j| j.kind != JobKind::Clone.to_string())
                .collect();
            if let Some(other) = others.first() {
                return Err(Error::Conflict(format!(
                    "Cannot re-clone while {} job {} is {}",
                    other.kind, other.id, other.status
                )));
            }
        }

        let job = Job::new(
            repo.id.clone(),
            kind,
            repo.generation,
            force,
            self.ctx.config.jobs.max_attempts,
        );
        insert_job(&mut tx, &job).await?;
        if force {
            mark_force_reingest(&mut tx, &repo.id).await?;
        }
        tx.commit().await?;

        info!(repo_id = %repo.id, job_id = %job.id, %kind, force, "Submitted job");
        Ok(job)
    }

    // ===== Cancellation =====

    /// Fail a pending or running job as cancelled and abort it if it runs here
    pub async fn cancel(&self, job_id: &str) -> Result<Job> {
        let job = self.db().require_job(job_id).await?;
        if job.get_status()?.is_terminal() {
            return Err(Error::Conflict(format!(
                "Job {} already finished ({})",
                job.id, job.status
            )));
        }

        let reason = Error::Cancelled("Cancelled by user".to_string());
        let mut tx = self.db().begin().await?;
        lock_repository(&mut tx, &job.repository_id).await?;
        if !mark_job_failed(&mut tx, &job, ErrorKind::Cancelled, &reason.to_string()).await? {
            return Err(Error::Conflict(format!("Job {} already finished", job.id)));
        }
        fail_repository(&mut tx, &job, &reason).await?;
        tx.commit().await?;

        if let Some(handle) = self.running.lock().await.remove(job_id) {
            handle.abort();
        }
        info!(job_id = %job.id, repo_id = %job.repository_id, "Cancelled job");
        self.db().require_job(job_id).await
    }

    // ===== Execution =====

    /// Claim and run one job; false when nothing is runnable
    pub async fn run_once(&self) -> Result<bool> {
        self.reap_stale().await?;

        let Some(job) = self.db().claim_next_job().await? else {
            return Ok(false);
        };
        self.execute(job).await?;
        Ok(true)
    }

    /// Process jobs until the queue is empty, waiting out retry backoff
    ///
    /// Returns the number of job attempts executed.
    pub async fn run_until_idle(&self) -> Result<usize> {
        let poll = Duration::from_millis(self.ctx.config.jobs.poll_interval_ms);
        let mut executed = 0;

        loop {
            if self.run_once().await? {
                executed += 1;
                continue;
            }

            if self.db().count_active_jobs().await? == 0 {
                break;
            }

            let wait = match self.db().next_pending_run_after().await? {
                Some(next) => parse_timestamp(&next)
                    .and_then(|at| (at - Utc::now()).to_std().ok())
                    .map(|until| until.min(poll))
                    .unwrap_or(Duration::from_millis(10)),
                None => poll,
            };
            tokio::time::sleep(wait).await;
        }

        Ok(executed)
    }

    /// Start `jobs.workers` polling tasks; they stop when `shutdown` flips to true
    pub fn spawn_workers(self: &Arc<Self>, shutdown: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let poll = Duration::from_millis(self.ctx.config.jobs.poll_interval_ms);

        (0..self.ctx.config.jobs.workers)
            .map(|worker| {
                let engine = Arc::clone(self);
                let mut shutdown = shutdown.clone();
                tokio::spawn(async move {
                    debug!(worker, "Worker started");
                    loop {
                        if *shutdown.borrow() {
                            break;
                        }
                        match engine.run_once().await {
                            Ok(true) => continue,
                            Ok(false) => {}
                            Err(e) => error!(worker, error = %e, "Worker iteration failed"),
                        }
                        tokio::select! {
                            changed = shutdown.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                            _ = tokio::time::sleep(poll) => {}
                        }
                    }
                    debug!(worker, "Worker stopped");
                })
            })
            .collect()
    }

    async fn execute(&self, job: Job) -> Result<()> {
        let kind = job.get_kind()?;
        let limit = self.ctx.config.jobs.timeout_for(kind);
        info!(
            job_id = %job.id,
            repo_id = %job.repository_id,
            %kind,
            attempt = job.attempt_count,
            "Running job"
        );

        let ctx = self.ctx.clone();
        let task_job = job.clone();
        let progress = JobProgress::new(self.db().clone(), job.id.clone());
        let handle = tokio::spawn(async move { run_handler(&ctx, &task_job, &progress).await });
        let abort = handle.abort_handle();
        self.running.lock().await.insert(job.id.clone(), abort.clone());

        let result = match tokio::time::timeout(limit, handle).await {
            Ok(Ok(result)) => result,
            Ok(Err(join_err)) if join_err.is_cancelled() => {
                Err(Error::Cancelled("Cancelled by user".to_string()))
            }
            Ok(Err(join_err)) => Err(Error::Other(format!("{} handler panicked: {}", kind, join_err))),
            Err(_) => {
                abort.abort();
                Err(Error::Timeout(format!(
                    "{} did not finish within {}s",
                    kind,
                    limit.as_secs()
                )))
            }
        };
        self.running.lock().await.remove(&job.id);

        match result {
            Ok(outcome) => match self.commit_success(&job, kind, outcome).await {
                Ok(committed) => {
                    if committed {
                        self.advance(&job, kind).await;
                    }
                    Ok(())
                }
                Err(e) => {
                    warn!(job_id = %job.id, error = %e, "Stage output rejected");
                    self.commit_failure(&job, &e).await
                }
            },
            Err(e) => self.commit_failure(&job, &e).await,
        }
    }

    /// Finish a successful job and walk the repository forward
    ///
    /// Returns false when the job was cancelled, reaped or superseded meanwhile.
    async fn commit_success(&self, job: &Job, kind: JobKind, outcome: StageOutcome) -> Result<bool> {
        let mut tx = self.db().begin().await?;
        lock_repository(&mut tx, &job.repository_id).await?;

        if fetch_job(&mut tx, &job.id).await?.get_status()? != JobStatus::Running {
            debug!(job_id = %job.id, "Job finished elsewhere; discarding result");
            return Ok(false);
        }

        let repo = fetch_repository(&mut tx, &job.repository_id).await?;
        if repo.generation != job.generation {
            mark_job_failed(
                &mut tx,
                job,
                ErrorKind::Conflict,
                "Superseded by a newer clone of the repository",
            )
            .await?;
            tx.commit().await?;
            info!(job_id = %job.id, "Job superseded");
            return Ok(false);
        }

        let status = repo.get_status()?;
        let last_good = repo.last_good();
        let path = lifecycle::success_path(status, last_good, kind)?;

        match (kind, outcome) {
            (JobKind::Clone, StageOutcome::Cloned(tree)) => {
                let local_path = tree.path.to_string_lossy().into_owned();
                apply_clone_result(&mut tx, &repo.id, &tree.commit_hash, &local_path).await?;
            }
            (JobKind::Clone, StageOutcome::Completed) => {
                return Err(Error::Other("CLONE finished without a working tree".into()));
            }
            (JobKind::Structure, _) => {
                if repo.structure_commit.is_none() || repo.structure_commit != repo.commit_hash {
                    return Err(Error::Validation(
                        "No structure snapshot for the current commit".into(),
                    ));
                }
            }
            (JobKind::Index, _) => {
                let model = self.ctx.caps.embedder.model_name();
                let (embedded, total) = embedding_coverage(&mut tx, &repo.id, model).await?;
                if embedded < total {
                    return Err(Error::Network(format!(
                        "Only {} of {} chunks have current embeddings",
                        embedded, total
                    )));
                }
                set_indexed_commit(&mut tx, &repo.id, repo.commit_hash.as_deref()).await?;
            }
            (JobKind::GenerateDocs, _) => {
                if count_documents(&mut tx, &repo.id).await? < 2 {
                    return Err(Error::Validation("Generated documents are missing".into()));
                }
            }
        }

        let mut from = status;
        for to in path {
            record_transition(&mut tx, &repo.id, from, to, Some(&job.id), None).await?;
            from = to;
        }
        mark_job_succeeded(&mut tx, job).await?;
        tx.commit().await?;

        info!(job_id = %job.id, repo_id = %repo.id, %kind, status = %from, "Job succeeded");
        Ok(true)
    }

    /// Requeue a retryable failure, or fail the job and its repository
    async fn commit_failure(&self, job: &Job, err: &Error) -> Result<()> {
        let kind = err.kind();
        let message = err.to_string();
        let mut tx = self.db().begin().await?;
        lock_repository(&mut tx, &job.repository_id).await?;

        if fetch_job(&mut tx, &job.id).await?.get_status()? != JobStatus::Running {
            debug!(job_id = %job.id, "Job finished elsewhere; discarding failure");
            return Ok(());
        }

        if kind.is_retryable() && job.attempts_remaining() {
            let delay = self.backoff.delay(job.attempt_count.max(1) as u32);
            let run_after = timestamp_after(delay);
            requeue_job(&mut tx, job, &run_after, kind, &message).await?;
            tx.commit().await?;
            warn!(
                job_id = %job.id,
                attempt = job.attempt_count,
                max_attempts = job.max_attempts,
                delay_ms = delay.as_millis() as u64,
                error = %message,
                "Job attempt failed; retrying"
            );
            return Ok(());
        }

        mark_job_failed(&mut tx, job, kind, &message).await?;
        fail_repository(&mut tx, job, err).await?;
        tx.commit().await?;

        error!(job_id = %job.id, repo_id = %job.repository_id, error = %err.describe(), "Job failed");
        Ok(())
    }

    /// Submit the next stage after a success
    async fn advance(&self, job: &Job, kind: JobKind) {
        if !self.ctx.config.jobs.auto_advance {
            return;
        }
        let Some(next) = kind.next() else {
            return;
        };
        if let Err(e) = self.submit(&job.repository_id, next).await {
            warn!(repo_id = %job.repository_id, %next, error = %e, "Could not auto-advance");
        }
    }

    // ===== Recovery =====

    /// Fail or requeue RUNNING jobs abandoned past their stage timeout
    pub async fn reap_stale(&self) -> Result<usize> {
        let mut reaped = 0;
        for job in self.db().running_jobs().await? {
            if self.running.lock().await.contains_key(&job.id) {
                continue;
            }
            let kind = job.get_kind()?;
            let limit = self.ctx.config.jobs.timeout_for(kind) + REAP_GRACE;
            let Some(started) = job.started_at.as_deref().and_then(parse_timestamp) else {
                continue;
            };
            let elapsed = (Utc::now() - started).to_std().unwrap_or_default();
            if elapsed <= limit {
                continue;
            }

            warn!(job_id = %job.id, %kind, elapsed_secs = elapsed.as_secs(), "Reaping abandoned job");
            let err = Error::Timeout(format!("{} abandoned by its worker", kind));
            self.commit_failure(&job, &err).await?;
            reaped += 1;
        }
        Ok(reaped)
    }
}

/// Move the job's repository to FAILED, unless the job was superseded
async fn fail_repository(conn: &mut SqliteConnection, job: &Job, err: &Error) -> Result<()> {
    let repo = fetch_repository(&mut *conn, &job.repository_id).await?;
    if repo.generation != job.generation {
        return Ok(());
    }
    let described = err.describe();
    match repo.get_status()? {
        RepoStatus::Failed => update_last_error(conn, &repo.id, &described).await,
        status => {
            record_transition(
                conn,
                &repo.id,
                status,
                RepoStatus::Failed,
                Some(&job.id),
                Some(&described),
            )
            .await
        }
    }
}
