//! Stage handlers and the context they run in

use super::JobKind;
use crate::clone::{self, ClonedTree, Cloner, GitCloner};
use crate::config::Config;
use crate::embed::{create_embedder, EmbedPolicy, Embedder, ResilientEmbedder};
use crate::error::{Error, Result};
use crate::llm::{HttpLlm, LanguageModel};
use crate::meta::{Job, MetaDb};
use crate::rate_limit::RateLimiter;
use crate::retry::Backoff;
use crate::{docs, index, structure};
use std::sync::Arc;
use std::time::Duration;
use tracing::{trace, warn};

/// External capabilities used by the stages
#[derive(Clone)]
pub struct Capabilities {
    pub cloner: Arc<dyn Cloner>,
    pub embedder: Arc<dyn Embedder>,
    pub llm: Arc<dyn LanguageModel>,
}

impl Capabilities {
    /// Production capabilities from configuration
    pub fn from_config(config: &Config) -> Result<Self> {
        Ok(Self {
            cloner: Arc::new(GitCloner::new()),
            embedder: create_embedder(&config.embedding)?,
            llm: Arc::new(HttpLlm::new(&config.llm)?),
        })
    }
}

/// Everything a stage handler needs; cheap to clone
#[derive(Clone)]
pub struct StageContext {
    pub config: Arc<Config>,
    pub db: MetaDb,
    pub caps: Capabilities,
    /// Shared by every embedding call in this process
    pub embed_limiter: RateLimiter,
}

impl StageContext {
    pub fn new(config: Config, db: MetaDb, caps: Capabilities) -> Self {
        let embed_limiter = RateLimiter::new(config.embedding.requests_per_second);
        Self {
            config: Arc::new(config),
            db,
            caps,
            embed_limiter,
        }
    }

    /// Backoff between retries of capability calls
    pub fn backoff(&self) -> Backoff {
        Backoff::new(
            Duration::from_millis(self.config.jobs.backoff_base_ms),
            Duration::from_millis(self.config.jobs.backoff_max_ms),
        )
    }

    /// Limiter, timeout and retry budget for embedding calls
    pub fn embed_policy(&self) -> EmbedPolicy {
        EmbedPolicy {
            backoff: self.backoff(),
            retries: self.config.embedding.max_retries,
            timeout: Duration::from_secs(self.config.embedding.timeout_secs),
            limiter: self.embed_limiter.clone(),
        }
    }

    /// The configured embedder wrapped in [`Self::embed_policy`], for queries
    pub fn query_embedder(&self) -> Arc<dyn Embedder> {
        Arc::new(ResilientEmbedder::new(
            self.caps.embedder.clone(),
            self.embed_policy(),
        ))
    }
}

/// Progress reporting for one running job
#[derive(Clone)]
pub struct JobProgress {
    db: MetaDb,
    job_id: String,
}

impl JobProgress {
    pub fn new(db: MetaDb, job_id: String) -> Self {
        Self { db, job_id }
    }

    /// Raise the job's progress; failures are logged, never fatal
    pub async fn report(&self, percent: u8) {
        trace!(job_id = %self.job_id, percent, "Progress");
        if let Err(e) = self.db.update_job_progress(&self.job_id, percent).await {
            warn!(job_id = %self.job_id, error = %e, "Failed to record progress");
        }
    }

    /// Fail fast when the job was cancelled or reaped by another process
    pub async fn ensure_active(&self) -> Result<()> {
        let job = self.db.require_job(&self.job_id).await?;
        if job.status != "running" {
            return Err(Error::Cancelled(format!(
                "Job {} is no longer running",
                self.job_id
            )));
        }
        Ok(())
    }
}

/// What a successful stage hands back to the engine
#[derive(Debug)]
pub enum StageOutcome {
    Cloned(ClonedTree),
    Completed,
}

/// Dispatch a claimed job to its stage
pub async fn run_handler(ctx: &StageContext, job: &Job, progress: &JobProgress) -> Result<StageOutcome> {
    let kind = job.get_kind()?;
    if kind != JobKind::Clone {
        let repo = ctx.db.require_repository(&job.repository_id).await?;
        if repo.generation != job.generation {
            return Err(Error::Conflict(format!(
                "Superseded by a newer clone of {}",
                repo.full_name()
            )));
        }
    }

    match kind {
        JobKind::Clone => clone::run_stage(ctx, job, progress)
            .await
            .map(StageOutcome::Cloned),
        JobKind::Structure => structure::run_stage(ctx, job, progress)
            .await
            .map(|_| StageOutcome::Completed),
        JobKind::Index => index::run_stage(ctx, job, progress)
            .await
            .map(|_| StageOutcome::Completed),
        JobKind::GenerateDocs => docs::run_stage(ctx, job, progress)
            .await
            .map(|_| StageOutcome::Completed),
    }
}
