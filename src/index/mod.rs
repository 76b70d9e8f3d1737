//! Indexing stage
//!
//! Embeds every live chunk that lacks a vector from the current model.
//! Batches commit independently, so a failed batch never discards the work
//! of earlier ones and a retried job only embeds what is still missing.

use crate::embed::{embed_with_retry, validate_embeddings};
use crate::error::Result;
use crate::jobs::{JobProgress, StageContext};
use crate::meta::{ChunkRecord, Job};
use crate::vector;
use tracing::{debug, info};

/// Text sent to the embedder for one chunk
///
/// The location header lets path and symbol names take part in similarity.
pub fn embedding_text(chunk: &ChunkRecord) -> String {
    let mut header = format!(
        "path: {}\nlines: {}-{}\nlanguage: {}\n",
        chunk.file_path, chunk.start_line, chunk.end_line, chunk.language
    );
    if let Some(symbol) = &chunk.symbol {
        header.push_str(&format!("symbol: {}\n", symbol));
    }
    header.push('\n');
    header.push_str(&chunk.content);
    header
}

/// Embedding counts for one stage run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IndexStats {
    pub embedded: usize,
    pub batches: usize,
    pub removed_foreign: u64,
}

/// INDEX stage
pub async fn run_stage(ctx: &StageContext, job: &Job, progress: &JobProgress) -> Result<IndexStats> {
    let embedder = &ctx.caps.embedder;
    let model = embedder.model_name().to_string();
    let dimension = embedder.dimension();
    let settings = &ctx.config.embedding;

    let removed_foreign = ctx
        .db
        .delete_foreign_embeddings(&job.repository_id, &model)
        .await?;
    if removed_foreign > 0 {
        debug!(repo_id = %job.repository_id, removed_foreign, "Dropped embeddings from other models");
    }

    let pending = ctx
        .db
        .chunks_missing_embedding(&job.repository_id, &model)
        .await?;
    let total = pending.len();
    info!(
        repo_id = %job.repository_id,
        job_id = %job.id,
        chunks = total,
        model = %model,
        "Embedding chunks"
    );

    let policy = ctx.embed_policy();
    let mut stats = IndexStats {
        removed_foreign,
        ..IndexStats::default()
    };

    for batch in pending.chunks(settings.batch_size.max(1)) {
        progress.ensure_active().await?;

        let texts: Vec<String> = batch.iter().map(embedding_text).collect();
        let vectors = embed_with_retry(embedder.as_ref(), &policy, texts).await?;
        validate_embeddings(&model, batch.len(), dimension, &vectors)?;

        let rows: Vec<(String, Vec<u8>)> = batch
            .iter()
            .zip(&vectors)
            .map(|(chunk, v)| (chunk.fingerprint.clone(), vector::encode(v)))
            .collect();
        ctx.db
            .upsert_embeddings(&job.repository_id, &model, dimension, &rows)
            .await?;

        stats.embedded += rows.len();
        stats.batches += 1;
        progress
            .report((stats.embedded * 100 / total.max(1)).min(99) as u8)
            .await;
    }

    info!(
        repo_id = %job.repository_id,
        job_id = %job.id,
        embedded = stats.embedded,
        batches = stats.batches,
        "Indexing finished"
    );
    Ok(stats)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::fakes::{test_env, test_env_with, FlakyEmbedder, ScriptedLlm};
    use crate::jobs::{JobKind, JobProgress};
    use crate::meta::insert_job;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    fn chunk(symbol: Option<&str>) -> ChunkRecord {
        ChunkRecord {
            fingerprint: "f".to_string(),
            repository_id: "r".to_string(),
            commit_hash: "c".to_string(),
            file_path: "config/parser.py".to_string(),
            start_line: 4,
            end_line: 7,
            start_byte: 0,
            end_byte: 10,
            language: "python".to_string(),
            symbol: symbol.map(str::to_string),
            content: "def parse_config(path):".to_string(),
            live: true,
            structure_pass: "p".to_string(),
            created_at: String::new(),
        }
    }

    #[test]
    fn test_embedding_text_header() {
        let text = embedding_text(&chunk(Some("parse_config")));
        assert!(text.starts_with("path: config/parser.py\nlines: 4-7\nlanguage: python\n"));
        assert!(text.contains("symbol: parse_config"));
        assert!(text.ends_with("def parse_config(path):"));
        assert!(!embedding_text(&chunk(None)).contains("symbol:"));
    }

    /// Seed a structured repository and a running INDEX job
    async fn structured(ctx: &StageContext) -> Job {
        let repo = crate::meta::Repository::new(
            "acme".into(),
            "widget".into(),
            "https://github.com/acme/widget".into(),
            None,
        );
        ctx.db.insert_repository(&repo).await.unwrap();
        let records: Vec<ChunkRecord> = (0..5)
            .map(|i| ChunkRecord {
                fingerprint: format!("fp{}", i),
                repository_id: repo.id.clone(),
                start_line: i * 10 + 1,
                end_line: i * 10 + 9,
                content: format!("def handler_{}():\n    return {}\n", i, i),
                ..chunk(None)
            })
            .collect();
        ctx.db.upsert_chunks(&records, "pass-1").await.unwrap();

        let job = Job::new(repo.id.clone(), JobKind::Index, 0, false, 3);
        let mut tx = ctx.db.begin().await.unwrap();
        insert_job(&mut tx, &job).await.unwrap();
        tx.commit().await.unwrap();
        ctx.db.claim_next_job().await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_index_embeds_every_live_chunk_once() {
        let env = test_env(ScriptedLlm::fixed("")).await;
        let job = structured(&env.ctx).await;
        let progress = JobProgress::new(env.ctx.db.clone(), job.id.clone());

        let stats = run_stage(&env.ctx, &job, &progress).await.unwrap();
        assert_eq!(stats.embedded, 5);
        assert_eq!(stats.batches, 3);

        let coverage = env
            .ctx
            .db
            .get_embedding_coverage(&job.repository_id, "test-hashing")
            .await
            .unwrap();
        assert_eq!(coverage, (5, 5));

        // A second run finds nothing left to embed
        let again = run_stage(&env.ctx, &job, &progress).await.unwrap();
        assert_eq!(again.embedded, 0);
    }

    #[tokio::test]
    async fn test_rate_limited_batch_is_retried() {
        let embedder = Arc::new(FlakyEmbedder::new(2));
        let env = test_env_with(ScriptedLlm::fixed(""), embedder.clone(), |c| {
            c.embedding.max_retries = 3;
        })
        .await;
        let job = structured(&env.ctx).await;
        let progress = JobProgress::new(env.ctx.db.clone(), job.id.clone());

        let stats = run_stage(&env.ctx, &job, &progress).await.unwrap();
        assert_eq!(stats.embedded, 5);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), 5);
    }

    #[tokio::test]
    async fn test_exhausted_retries_keep_finished_batches() {
        let embedder = Arc::new(FlakyEmbedder::new(10));
        let env = test_env_with(ScriptedLlm::fixed(""), embedder, |c| {
            c.embedding.max_retries = 1;
        })
        .await;
        let job = structured(&env.ctx).await;
        let progress = JobProgress::new(env.ctx.db.clone(), job.id.clone());

        let err = run_stage(&env.ctx, &job, &progress).await.unwrap_err();
        assert!(err.is_retryable());
        let (embedded, total) = env
            .ctx
            .db
            .get_embedding_coverage(&job.repository_id, "test-hashing")
            .await
            .unwrap();
        assert_eq!((embedded, total), (0, 5));
    }
}
