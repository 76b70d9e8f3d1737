//! Semantic search over a repository's indexed chunks

use crate::config::SearchConfig;
use crate::embed::Embedder;
use crate::error::{Error, Result};
use crate::lifecycle::RepoStatus;
use crate::meta::{ChunkRecord, MetaDb, Repository};
use crate::vector::{self, Neighbor};
use globset::{Glob, GlobMatcher};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

/// Search parameters; unset fields fall back to configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SearchOptions {
    pub limit: Option<usize>,
    pub offset: usize,
    pub min_score: Option<f32>,
    pub file_pattern: Option<String>,
}

impl SearchOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_min_score(mut self, min_score: f32) -> Self {
        self.min_score = Some(min_score);
        self
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn with_file_pattern(mut self, pattern: impl Into<String>) -> Self {
        self.file_pattern = Some(pattern.into());
        self
    }
}

/// A ranked, citable hit
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResult {
    pub chunk_fingerprint: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub language: String,
    pub symbol: Option<String>,
    pub score: f32,
    pub snippet: String,
}

/// A file/line range backing a generated claim
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Citation {
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_fingerprint: Option<String>,
}

impl From<&ChunkRecord> for Citation {
    fn from(chunk: &ChunkRecord) -> Self {
        Self {
            file_path: chunk.file_path.clone(),
            start_line: chunk.start_line,
            end_line: chunk.end_line,
            chunk_fingerprint: Some(chunk.fingerprint.clone()),
        }
    }
}

impl std::fmt::Display for Citation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}-{}", self.file_path, self.start_line, self.end_line)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub query: String,
    pub commit_hash: Option<String>,
    /// Matches before offset and limit were applied
    pub total: usize,
    pub results: Vec<SearchResult>,
}

/// Matches file paths by glob when the pattern has metacharacters, else by substring
pub enum PathFilter {
    Glob(GlobMatcher),
    Substring(String),
}

impl PathFilter {
    pub fn new(pattern: &str) -> Result<Self> {
        if pattern.contains(['*', '?', '[', '{']) {
            Ok(PathFilter::Glob(Glob::new(pattern)?.compile_matcher()))
        } else {
            Ok(PathFilter::Substring(pattern.to_string()))
        }
    }

    pub fn matches(&self, path: &str) -> bool {
        match self {
            PathFilter::Glob(glob) => glob.is_match(path),
            PathFilter::Substring(s) => path.contains(s.as_str()),
        }
    }
}

/// The first `lines` lines of a chunk
pub fn snippet(content: &str, lines: usize) -> String {
    content.lines().take(lines.max(1)).collect::<Vec<_>>().join("\n")
}

/// Fail with `NotIndexed` unless the current commit has a complete index
pub fn require_indexed(repo: &Repository) -> Result<()> {
    if repo.indexed_commit.is_some() && repo.indexed_commit == repo.commit_hash {
        return Ok(());
    }
    Err(Error::NotReady {
        repository: repo.full_name(),
        current: repo.status.clone(),
        required: RepoStatus::Indexed.to_string(),
    })
}

/// Ranked neighbours of `query` among the repository's live chunks
///
/// Shared by search and the tutor so both rank identically.
pub async fn retrieve(
    db: &MetaDb,
    embedder: &dyn Embedder,
    repo: &Repository,
    query: &str,
    min_score: f32,
    filter: Option<&PathFilter>,
) -> Result<Vec<Neighbor>> {
    let query = query.trim();
    if query.is_empty() {
        return Err(Error::Validation("Query must not be empty".to_string()));
    }
    if !(0.0..=1.0).contains(&min_score) {
        return Err(Error::Validation(format!(
            "min_score must be between 0.0 and 1.0, got {}",
            min_score
        )));
    }
    require_indexed(repo)?;

    let mut vectors = embedder.embed(vec![query.to_string()]).await?;
    let query_vector = vectors
        .pop()
        .ok_or_else(|| Error::InvalidInput("Embedder returned no vector for the query".into()))?;

    let candidates = db
        .load_embedded_chunks(&repo.id, embedder.model_name())
        .await?;
    debug!(repo_id = %repo.id, candidates = candidates.len(), "Scoring chunks");

    let mut ranked = vector::nearest(&query_vector, candidates, min_score)?;
    if let Some(filter) = filter {
        ranked.retain(|n| filter.matches(&n.chunk.file_path));
    }
    Ok(ranked)
}

/// Semantic search; read-only
pub async fn search(
    db: &MetaDb,
    embedder: &dyn Embedder,
    config: &SearchConfig,
    repository_id: &str,
    query: &str,
    options: &SearchOptions,
) -> Result<SearchResponse> {
    let repo = db.require_repository(repository_id).await?;
    let min_score = options.min_score.unwrap_or(config.min_score);
    let limit = options
        .limit
        .unwrap_or(config.default_limit)
        .clamp(1, config.max_results);
    let filter = options
        .file_pattern
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(PathFilter::new)
        .transpose()?;

    let ranked = retrieve(db, embedder, &repo, query, min_score, filter.as_ref()).await?;
    let total = ranked.len();
    let results: Vec<SearchResult> = ranked
        .into_iter()
        .skip(options.offset)
        .take(limit)
        .map(|n| SearchResult {
            snippet: snippet(&n.chunk.content, config.snippet_lines),
            chunk_fingerprint: n.chunk.fingerprint,
            file_path: n.chunk.file_path,
            start_line: n.chunk.start_line,
            end_line: n.chunk.end_line,
            language: n.chunk.language,
            symbol: n.chunk.symbol,
            score: n.score,
        })
        .collect();

    info!(
        repo_id = %repo.id,
        query = %query.chars().take(50).collect::<String>(),
        results = results.len(),
        total,
        "Search completed"
    );

    Ok(SearchResponse {
        query: query.to_string(),
        commit_hash: repo.indexed_commit,
        total,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embed::HashingEmbedder;
    use crate::meta::test_support::setup_test_db;
    use crate::error::ErrorKind;
    use crate::meta::{apply_clone_result, set_indexed_commit};
    use crate::vector::encode;

    #[test]
    fn test_path_filter() {
        let glob = PathFilter::new("config/*.py").unwrap();
        assert!(glob.matches("config/parser.py"));
        assert!(!glob.matches("src/main.rs"));

        let sub = PathFilter::new("parser").unwrap();
        assert!(sub.matches("config/parser.py"));
        assert!(!sub.matches("web/app.ts"));
    }

    #[test]
    fn test_snippet_takes_leading_lines() {
        assert_eq!(snippet("a\nb\nc\n", 2), "a\nb");
        assert_eq!(snippet("only", 8), "only");
    }

    const WIDGET: [(&str, &str); 3] = [
        ("config/parser.py", "def parse_config(path):\n    return json.load(open(path))\n"),
        ("src/main.rs", "fn main() {\n    start_server();\n}\n"),
        ("web/app.ts", "export function render() {}\n"),
    ];

    /// A repository cloned at `c1` with every chunk embedded
    async fn indexed_repo(db: &MetaDb, embedder: &HashingEmbedder) -> Repository {
        let repo = Repository::new(
            "acme".into(),
            "widget".into(),
            "https://github.com/acme/widget".into(),
            None,
        );
        db.insert_repository(&repo).await.unwrap();
        let mut tx = db.begin().await.unwrap();
        apply_clone_result(&mut tx, &repo.id, "c1", "/tmp/widget").await.unwrap();
        tx.commit().await.unwrap();

        let chunks: Vec<ChunkRecord> = WIDGET
            .iter()
            .enumerate()
            .map(|(i, (path, content))| ChunkRecord {
                fingerprint: format!("fp{}", i),
                repository_id: repo.id.clone(),
                commit_hash: "c1".to_string(),
                file_path: path.to_string(),
                start_line: 1,
                end_line: 3,
                start_byte: 0,
                end_byte: content.len() as i64,
                language: "text".to_string(),
                symbol: None,
                content: content.to_string(),
                live: true,
                structure_pass: "p".to_string(),
                created_at: String::new(),
            })
            .collect();
        db.upsert_chunks(&chunks, "p").await.unwrap();

        let rows: Vec<(String, Vec<u8>)> = chunks
            .iter()
            .map(|c| (c.fingerprint.clone(), encode(&embedder.embed_text(&c.content))))
            .collect();
        db.upsert_embeddings(&repo.id, embedder.model_name(), embedder.dimension(), &rows)
            .await
            .unwrap();

        let mut tx = db.begin().await.unwrap();
        set_indexed_commit(&mut tx, &repo.id, Some("c1")).await.unwrap();
        tx.commit().await.unwrap();
        db.require_repository(&repo.id).await.unwrap()
    }

    #[tokio::test]
    async fn test_search_requires_index() {
        let (db, _tmp) = setup_test_db().await;
        let embedder = HashingEmbedder::new("h".into(), 128);
        let repo = Repository::new("acme".into(), "w".into(), "https://github.com/acme/w".into(), None);
        db.insert_repository(&repo).await.unwrap();

        let err = search(&db, &embedder, &SearchConfig::default(), &repo.id, "config", &SearchOptions::new())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotIndexed);
    }

    #[tokio::test]
    async fn test_search_ranks_and_filters() {
        let (db, _tmp) = setup_test_db().await;
        let embedder = HashingEmbedder::new("h".into(), 128);
        let repo = indexed_repo(&db, &embedder).await;
        let config = SearchConfig::default();

        let response = search(
            &db,
            &embedder,
            &config,
            &repo.id,
            "parse config",
            &SearchOptions::new().with_min_score(0.0),
        )
        .await
        .unwrap();
        assert_eq!(response.commit_hash.as_deref(), Some("c1"));
        assert!(!response.results.is_empty());
        assert_eq!(response.results[0].file_path, "config/parser.py");
        for pair in response.results.windows(2) {
            assert!(pair[0].score >= pair[1].score);
        }

        let filtered = search(
            &db,
            &embedder,
            &config,
            &repo.id,
            "parse config",
            &SearchOptions::new().with_min_score(0.0).with_file_pattern("*.rs"),
        )
        .await
        .unwrap();
        assert!(filtered.results.iter().all(|r| r.file_path.ends_with(".rs")));

        let strict = search(
            &db,
            &embedder,
            &config,
            &repo.id,
            "parse config",
            &SearchOptions::new().with_min_score(0.65),
        )
        .await
        .unwrap();
        assert!(strict.results.iter().all(|r| r.score >= 0.65));

        let err = search(&db, &embedder, &config, &repo.id, "   ", &SearchOptions::new())
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
    }
}
