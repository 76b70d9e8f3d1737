//! Chunk store and embedding rows

use super::{timestamp, MetaDb};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

/// A stored code span, keyed by its content fingerprint
#[derive(Debug, Clone, PartialEq, FromRow, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub fingerprint: String,
    pub repository_id: String,
    pub commit_hash: String,
    pub file_path: String,
    pub start_line: i64,
    pub end_line: i64,
    pub start_byte: i64,
    pub end_byte: i64,
    pub language: String,
    pub symbol: Option<String>,
    pub content: String,
    pub live: bool,
    pub structure_pass: String,
    pub created_at: String,
}

impl ChunkRecord {
    /// Whether `[start, end]` lies inside this chunk's line span
    pub fn contains_lines(&self, start: i64, end: i64) -> bool {
        start <= end && start >= self.start_line && end <= self.end_line
    }
}

/// A live chunk together with its stored vector
#[derive(Debug, Clone, FromRow)]
pub struct EmbeddedChunk {
    #[sqlx(flatten)]
    pub chunk: ChunkRecord,
    pub vector: Vec<u8>,
}

/// Drop every chunk, embedding and document of a repository
pub async fn invalidate_artifacts(conn: &mut SqliteConnection, repository_id: &str) -> Result<()> {
    sqlx::query("DELETE FROM embeddings WHERE repository_id = ?")
        .bind(repository_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM chunks WHERE repository_id = ?")
        .bind(repository_id)
        .execute(&mut *conn)
        .await?;
    sqlx::query("DELETE FROM documents WHERE repository_id = ?")
        .bind(repository_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

/// Live chunks with a current-model embedding vs. all live chunks
pub async fn embedding_coverage(
    conn: &mut SqliteConnection,
    repository_id: &str,
    model_id: &str,
) -> Result<(usize, usize)> {
    let (embedded, total): (i64, i64) = sqlx::query_as(
        r#"
        SELECT
            COUNT(e.chunk_fingerprint),
            COUNT(*)
        FROM chunks c
        LEFT JOIN embeddings e ON e.chunk_fingerprint = c.fingerprint AND e.model_id = ?
        WHERE c.repository_id = ? AND c.live = 1
        "#,
    )
    .bind(model_id)
    .bind(repository_id)
    .fetch_one(conn)
    .await?;
    Ok((embedded as usize, total as usize))
}

impl MetaDb {
    // ===== Chunk Operations =====

    /// Upsert chunks produced by structuring pass `pass_id`
    ///
    /// An existing fingerprint is only re-marked live and tagged with the pass.
    pub async fn upsert_chunks(&self, chunks: &[ChunkRecord], pass_id: &str) -> Result<()> {
        let mut tx = self.begin().await?;
        for chunk in chunks {
            sqlx::query(
                r#"
                INSERT INTO chunks (fingerprint, repository_id, commit_hash, file_path, start_line, end_line, start_byte, end_byte, language, symbol, content, live, structure_pass, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, 1, ?, ?)
                ON CONFLICT(fingerprint) DO UPDATE SET
                    live = 1,
                    commit_hash = excluded.commit_hash,
                    structure_pass = excluded.structure_pass
                "#,
            )
            .bind(&chunk.fingerprint)
            .bind(&chunk.repository_id)
            .bind(&chunk.commit_hash)
            .bind(&chunk.file_path)
            .bind(chunk.start_line)
            .bind(chunk.end_line)
            .bind(chunk.start_byte)
            .bind(chunk.end_byte)
            .bind(&chunk.language)
            .bind(&chunk.symbol)
            .bind(&chunk.content)
            .bind(pass_id)
            .bind(&chunk.created_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Retire chunks not produced by `pass_id`
    ///
    /// They are marked stale, their embeddings deleted, then the rows removed.
    /// Returns the number of chunks retired.
    pub async fn retire_stale_chunks(&self, repository_id: &str, pass_id: &str) -> Result<u64> {
        let mut tx = self.begin().await?;
        let stale = sqlx::query(
            "UPDATE chunks SET live = 0 WHERE repository_id = ? AND structure_pass <> ?",
        )
        .bind(repository_id)
        .bind(pass_id)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            r#"
            DELETE FROM embeddings WHERE chunk_fingerprint IN (
                SELECT fingerprint FROM chunks WHERE repository_id = ? AND live = 0
            )
            "#,
        )
        .bind(repository_id)
        .execute(&mut *tx)
        .await?;

        sqlx::query("DELETE FROM chunks WHERE repository_id = ? AND live = 0")
            .bind(repository_id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(stale)
    }

    /// Get a chunk by fingerprint
    pub async fn get_chunk(&self, fingerprint: &str) -> Result<Option<ChunkRecord>> {
        let chunk = sqlx::query_as::<_, ChunkRecord>("SELECT * FROM chunks WHERE fingerprint = ?")
            .bind(fingerprint)
            .fetch_optional(self.pool())
            .await?;
        Ok(chunk)
    }

    /// Live chunks of a repository in file order
    pub async fn list_live_chunks(&self, repository_id: &str) -> Result<Vec<ChunkRecord>> {
        let chunks = sqlx::query_as::<_, ChunkRecord>(
            "SELECT * FROM chunks WHERE repository_id = ? AND live = 1 ORDER BY file_path, start_line",
        )
        .bind(repository_id)
        .fetch_all(self.pool())
        .await?;
        Ok(chunks)
    }

    /// Live chunks of one file whose span contains `[start, end]`
    pub async fn live_chunks_covering(
        &self,
        repository_id: &str,
        file_path: &str,
        start_line: i64,
        end_line: i64,
    ) -> Result<Vec<ChunkRecord>> {
        let chunks = sqlx::query_as::<_, ChunkRecord>(
            r#"
            SELECT * FROM chunks
            WHERE repository_id = ? AND file_path = ? AND live = 1
              AND start_line <= ? AND end_line >= ?
            ORDER BY start_line
            "#,
        )
        .bind(repository_id)
        .bind(file_path)
        .bind(start_line)
        .bind(end_line)
        .fetch_all(self.pool())
        .await?;
        Ok(chunks)
    }

    /// Count live chunks
    pub async fn count_live_chunks(&self, repository_id: &str) -> Result<usize> {
        let count: i64 =
            sqlx::query_scalar("SELECT COUNT(*) FROM chunks WHERE repository_id = ? AND live = 1")
                .bind(repository_id)
                .fetch_one(self.pool())
                .await?;
        Ok(count as usize)
    }

    // ===== Embedding Operations =====

    /// Live chunks with no embedding from `model_id`
    pub async fn chunks_missing_embedding(
        &self,
        repository_id: &str,
        model_id: &str,
    ) -> Result<Vec<ChunkRecord>> {
        let chunks = sqlx::query_as::<_, ChunkRecord>(
            r#"
            SELECT c.* FROM chunks c
            LEFT JOIN embeddings e ON e.chunk_fingerprint = c.fingerprint AND e.model_id = ?
            WHERE c.repository_id = ? AND c.live = 1 AND e.chunk_fingerprint IS NULL
            ORDER BY c.file_path, c.start_line
            "#,
        )
        .bind(model_id)
        .bind(repository_id)
        .fetch_all(self.pool())
        .await?;
        Ok(chunks)
    }

    /// Remove embeddings produced by any model other than `model_id`
    pub async fn delete_foreign_embeddings(&self, repository_id: &str, model_id: &str) -> Result<u64> {
        let deleted =
            sqlx::query("DELETE FROM embeddings WHERE repository_id = ? AND model_id <> ?")
                .bind(repository_id)
                .bind(model_id)
                .execute(self.pool())
                .await?
                .rows_affected();
        Ok(deleted)
    }

    /// Upsert one batch of vectors atomically
    pub async fn upsert_embeddings(
        &self,
        repository_id: &str,
        model_id: &str,
        dimension: usize,
        batch: &[(String, Vec<u8>)],
    ) -> Result<()> {
        let now = timestamp();
        let mut tx = self.begin().await?;
        for (fingerprint, vector) in batch {
            sqlx::query(
                r#"
                INSERT INTO embeddings (chunk_fingerprint, repository_id, model_id, dimension, vector, created_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(chunk_fingerprint) DO UPDATE SET
                    model_id = excluded.model_id,
                    dimension = excluded.dimension,
                    vector = excluded.vector,
                    created_at = excluded.created_at
                "#,
            )
            .bind(fingerprint)
            .bind(repository_id)
            .bind(model_id)
            .bind(dimension as i64)
            .bind(vector)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Live chunks with current-model vectors
    pub async fn load_embedded_chunks(
        &self,
        repository_id: &str,
        model_id: &str,
    ) -> Result<Vec<EmbeddedChunk>> {
        let rows = sqlx::query_as::<_, EmbeddedChunk>(
            r#"
            SELECT c.*, e.vector FROM chunks c
            JOIN embeddings e ON e.chunk_fingerprint = c.fingerprint
            WHERE c.repository_id = ? AND c.live = 1 AND e.model_id = ?
            "#,
        )
        .bind(repository_id)
        .bind(model_id)
        .fetch_all(self.pool())
        .await?;
        Ok(rows)
    }

    /// `(embedded, total)` live chunk counts for the current model
    pub async fn get_embedding_coverage(
        &self,
        repository_id: &str,
        model_id: &str,
    ) -> Result<(usize, usize)> {
        let mut conn = self.pool().acquire().await?;
        embedding_coverage(&mut conn, repository_id, model_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::test_support::setup_test_db;
    use crate::meta::Repository;

    fn chunk(repo: &str, fingerprint: &str, path: &str, start: i64, end: i64) -> ChunkRecord {
        ChunkRecord {
            fingerprint: fingerprint.to_string(),
            repository_id: repo.to_string(),
            commit_hash: "abc123".to_string(),
            file_path: path.to_string(),
            start_line: start,
            end_line: end,
            start_byte: 0,
            end_byte: 10,
            language: "rust".to_string(),
            symbol: None,
            content: "fn main() {}".to_string(),
            live: true,
            structure_pass: String::new(),
            created_at: timestamp(),
        }
    }

    async fn setup() -> (MetaDb, tempfile::TempDir, String) {
        let (db, tmp) = setup_test_db().await;
        let repo = Repository::new("a".into(), "b".into(), "https://github.com/a/b".into(), None);
        db.insert_repository(&repo).await.unwrap();
        (db, tmp, repo.id)
    }

    #[tokio::test]
    async fn test_upsert_is_idempotent_and_retires_stale() {
        let (db, _tmp, repo) = setup().await;

        let first = vec![
            chunk(&repo, "f1", "src/main.rs", 1, 10),
            chunk(&repo, "f2", "src/lib.rs", 1, 20),
        ];
        db.upsert_chunks(&first, "pass-1").await.unwrap();
        db.upsert_chunks(&first, "pass-1").await.unwrap();
        assert_eq!(db.count_live_chunks(&repo).await.unwrap(), 2);

        db.upsert_embeddings(&repo, "m", 2, &[("f2".to_string(), vec![0u8; 8])])
            .await
            .unwrap();

        // Second pass no longer produces f2
        db.upsert_chunks(&first[..1], "pass-2").await.unwrap();
        let retired = db.retire_stale_chunks(&repo, "pass-2").await.unwrap();
        assert_eq!(retired, 1);
        assert!(db.get_chunk("f2").await.unwrap().is_none());
        assert_eq!(db.get_embedding_coverage(&repo, "m").await.unwrap(), (0, 1));
    }

    #[tokio::test]
    async fn test_missing_embeddings_and_coverage() {
        let (db, _tmp, repo) = setup().await;
        let chunks = vec![
            chunk(&repo, "f1", "a.rs", 1, 5),
            chunk(&repo, "f2", "b.rs", 1, 5),
            chunk(&repo, "f3", "c.rs", 1, 5),
        ];
        db.upsert_chunks(&chunks, "p").await.unwrap();
        db.upsert_embeddings(&repo, "m1", 2, &[("f1".to_string(), vec![0u8; 8])])
            .await
            .unwrap();

        let missing = db.chunks_missing_embedding(&repo, "m1").await.unwrap();
        assert_eq!(missing.len(), 2);
        assert_eq!(db.get_embedding_coverage(&repo, "m1").await.unwrap(), (1, 3));

        // Embeddings from another model do not count
        assert_eq!(db.get_embedding_coverage(&repo, "m2").await.unwrap(), (0, 3));
        assert_eq!(db.delete_foreign_embeddings(&repo, "m2").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_covering_lookup() {
        let (db, _tmp, repo) = setup().await;
        db.upsert_chunks(&[chunk(&repo, "f1", "config/parser.rs", 10, 40)], "p")
            .await
            .unwrap();

        let hits = db
            .live_chunks_covering(&repo, "config/parser.rs", 12, 20)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert!(hits[0].contains_lines(12, 20));
        assert!(!hits[0].contains_lines(5, 20));
        assert!(db
            .live_chunks_covering(&repo, "config/other.rs", 12, 20)
            .await
            .unwrap()
            .is_empty());
    }
}
