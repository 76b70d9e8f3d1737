//! Structuring stage
//!
//! Walks a cloned working tree, classifies languages, builds the file tree
//! and entry point list, and splits every text file into fingerprinted
//! chunks. The chunk set of a pass replaces the previous one: chunks the pass
//! no longer produces are retired along with their embeddings.

mod chunker;
mod entry_points;
mod language;
mod walker;

pub use chunker::{BreakPriority, ChunkSpan, LineChunker, SymbolMatcher};
pub use entry_points::detect_entry_points;
pub use language::{detect_language, is_markup_or_data};
pub use walker::{walk_tree, SourceFile, WalkOutcome};

use crate::config::ChunkConfig;
use crate::error::{Error, Result};
use crate::jobs::{JobProgress, StageContext};
use crate::lifecycle::{require_reached, RepoStatus};
use crate::meta::{timestamp, ChunkRecord, Job, MetaDb, Repository};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Per-language file and byte counts
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LanguageStats {
    pub files: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TreeEntryKind {
    File,
    Directory,
}

/// One node of the flattened file tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeEntry {
    pub path: String,
    pub kind: TreeEntryKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub language: Option<String>,
    #[serde(default)]
    pub size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntryPoint {
    pub path: String,
    pub kind: String,
    pub confidence: f32,
    pub reason: String,
}

/// Everything the structure query exposes about one commit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StructureSnapshot {
    pub total_files: u64,
    pub total_size_bytes: u64,
    pub total_chunks: u64,
    pub primary_language: Option<String>,
    pub language_breakdown: BTreeMap<String, LanguageStats>,
    pub file_tree: Vec<TreeEntry>,
    pub entry_points: Vec<EntryPoint>,
}

/// Result of structuring one working tree
#[derive(Debug)]
pub struct StructurePass {
    pub snapshot: StructureSnapshot,
    pub chunks: Vec<ChunkRecord>,
    pub skipped_files: usize,
    pub truncated_files: usize,
}

/// Stable chunk key over repository, path, byte range and content
pub fn fingerprint(
    repository_id: &str,
    file_path: &str,
    start_byte: usize,
    end_byte: usize,
    content: &str,
) -> String {
    let mut hasher = blake3::Hasher::new();
    hasher.update(repository_id.as_bytes());
    hasher.update(&[0]);
    hasher.update(file_path.as_bytes());
    hasher.update(&[0]);
    hasher.update(format!("{}:{}", start_byte, end_byte).as_bytes());
    hasher.update(&[0]);
    hasher.update(content.as_bytes());
    hasher.finalize().to_hex().to_string()
}

/// Most common programming language by file count, falling back to markup
fn primary_language(breakdown: &BTreeMap<String, LanguageStats>) -> Option<String> {
    let pick = |code_only: bool| {
        breakdown
            .iter()
            .filter(|(lang, _)| !code_only || !is_markup_or_data(lang))
            .max_by(|(la, a), (lb, b)| {
                a.files
                    .cmp(&b.files)
                    .then(a.bytes.cmp(&b.bytes))
                    .then_with(|| lb.cmp(la))
            })
            .map(|(lang, _)| lang.clone())
    };
    pick(true).or_else(|| pick(false))
}

fn build_tree(files: &[SourceFile]) -> Vec<TreeEntry> {
    let mut dirs: BTreeSet<String> = BTreeSet::new();
    for file in files {
        let mut parts: Vec<&str> = file.relative_path.split('/').collect();
        parts.pop();
        let mut prefix = String::new();
        for part in parts {
            if !prefix.is_empty() {
                prefix.push('/');
            }
            prefix.push_str(part);
            dirs.insert(prefix.clone());
        }
    }

    let mut entries: Vec<TreeEntry> = dirs
        .into_iter()
        .map(|path| TreeEntry {
            path,
            kind: TreeEntryKind::Directory,
            language: None,
            size_bytes: 0,
        })
        .collect();
    entries.extend(files.iter().map(|f| TreeEntry {
        path: f.relative_path.clone(),
        kind: TreeEntryKind::File,
        language: f.language.map(str::to_string),
        size_bytes: f.size_bytes,
    }));
    entries.sort_by(|a, b| a.path.cmp(&b.path));
    entries
}

/// Structure the tree at `root` for `commit_hash`
///
/// Blocking; run it on the blocking pool.
pub fn analyze(
    root: &Path,
    repository_id: &str,
    commit_hash: &str,
    config: &ChunkConfig,
) -> Result<StructurePass> {
    let walk = walk_tree(root, config)?;
    let chunker = LineChunker::new(config)?;
    let created_at = timestamp();

    let mut breakdown: BTreeMap<String, LanguageStats> = BTreeMap::new();
    let mut total_size = 0u64;
    let mut chunks = Vec::new();

    for file in &walk.files {
        total_size += file.size_bytes;
        let language = file.language.unwrap_or("text");
        if let Some(lang) = file.language {
            let stats = breakdown.entry(lang.to_string()).or_default();
            stats.files += 1;
            stats.bytes += file.size_bytes;
        }

        let meaningful = file.content.chars().filter(|c| !c.is_whitespace()).count();
        if meaningful < config.min_file_chars {
            debug!(path = %file.relative_path, "Too little content to chunk");
            continue;
        }

        for span in chunker.chunk(&file.content) {
            if chunks.len() >= config.max_chunks {
                return Err(Error::RepoTooLarge(format!(
                    "more than {} chunks (chunk.max_chunks)",
                    config.max_chunks
                )));
            }
            chunks.push(ChunkRecord {
                fingerprint: fingerprint(
                    repository_id,
                    &file.relative_path,
                    span.start_byte,
                    span.end_byte,
                    &span.content,
                ),
                repository_id: repository_id.to_string(),
                commit_hash: commit_hash.to_string(),
                file_path: file.relative_path.clone(),
                start_line: span.start_line as i64,
                end_line: span.end_line as i64,
                start_byte: span.start_byte as i64,
                end_byte: span.end_byte as i64,
                language: language.to_string(),
                symbol: span.symbol,
                content: span.content,
                live: true,
                structure_pass: String::new(),
                created_at: created_at.clone(),
            });
        }
    }

    let primary = primary_language(&breakdown);
    let snapshot = StructureSnapshot {
        total_files: walk.files.len() as u64,
        total_size_bytes: total_size,
        total_chunks: chunks.len() as u64,
        entry_points: detect_entry_points(&walk.files, primary.as_deref()),
        primary_language: primary,
        language_breakdown: breakdown,
        file_tree: build_tree(&walk.files),
    };

    Ok(StructurePass {
        snapshot,
        chunks,
        skipped_files: walk.skipped,
        truncated_files: walk.truncated,
    })
}

/// STRUCTURE stage: analyze the working tree, upsert chunks, retire stale ones
pub async fn run_stage(ctx: &StageContext, job: &Job, progress: &JobProgress) -> Result<()> {
    let repo = ctx.db.require_repository(&job.repository_id).await?;
    let commit = repo.commit_hash.clone().ok_or_else(|| {
        Error::Validation(format!("Repository {} has no cloned commit", repo.id))
    })?;
    let root: PathBuf = repo
        .local_path
        .as_ref()
        .map(PathBuf::from)
        .ok_or_else(|| Error::Validation(format!("Repository {} has no working tree", repo.id)))?;
    if !root.is_dir() {
        return Err(Error::Validation(format!(
            "Working tree missing at {}; re-ingest with force",
            root.display()
        )));
    }

    let chunk_config = ctx.config.chunk.clone();
    let repo_id = repo.id.clone();
    let commit_for_pass = commit.clone();
    let pass = tokio::task::spawn_blocking(move || {
        analyze(&root, &repo_id, &commit_for_pass, &chunk_config)
    })
    .await
    .map_err(|e| Error::Other(format!("Structuring task failed: {}", e)))??;
    progress.report(50).await;

    for batch in pass.chunks.chunks(500) {
        ctx.db.upsert_chunks(batch, &job.id).await?;
    }
    progress.report(80).await;

    let retired = ctx.db.retire_stale_chunks(&repo.id, &job.id).await?;
    ctx.db
        .save_structure_snapshot(&repo.id, &commit, &pass.snapshot)
        .await?;

    info!(
        repo_id = %repo.id,
        job_id = %job.id,
        files = pass.snapshot.total_files,
        chunks = pass.snapshot.total_chunks,
        retired,
        skipped = pass.skipped_files,
        truncated = pass.truncated_files,
        "Structured repository"
    );
    Ok(())
}

/// Structure query result for the repository's current commit
#[derive(Debug, Clone, Serialize)]
pub struct RepositoryStructure {
    pub repository_id: String,
    pub commit_hash: Option<String>,
    #[serde(flatten)]
    pub snapshot: StructureSnapshot,
}

impl RepositoryStructure {
    fn from_repository(repo: &Repository) -> Self {
        Self {
            repository_id: repo.id.clone(),
            commit_hash: repo.structure_commit.clone(),
            snapshot: StructureSnapshot {
                total_files: repo.total_files as u64,
                total_size_bytes: repo.total_size_bytes as u64,
                total_chunks: repo.total_chunks as u64,
                primary_language: repo.primary_language.clone(),
                language_breakdown: repo.language_breakdown(),
                file_tree: repo.file_tree(),
                entry_points: repo.entry_points(),
            },
        }
    }
}

/// File tree and language breakdown; requires STRUCTURED
pub async fn structure(db: &MetaDb, repository_id: &str) -> Result<RepositoryStructure> {
    let repo = db.require_repository(repository_id).await?;
    require_reached(
        &repo.id,
        repo.get_status()?,
        repo.last_good(),
        RepoStatus::Structured,
    )?;
    Ok(RepositoryStructure::from_repository(&repo))
}
