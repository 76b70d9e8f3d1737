//! Generated documentation rows

use super::{timestamp, MetaDb};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, SqliteConnection};

/// A generated document; at most one per (repository, type)
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct GeneratedDocument {
    pub repository_id: String,
    pub doc_type: String,
    pub markdown: String,
    pub citations_json: String,
    pub commit_hash: Option<String>,
    pub generated_at: String,
}

impl GeneratedDocument {
    pub fn new(
        repository_id: String,
        doc_type: String,
        markdown: String,
        citations_json: String,
        commit_hash: Option<String>,
    ) -> Self {
        Self {
            repository_id,
            doc_type,
            markdown,
            citations_json,
            commit_hash,
            generated_at: timestamp(),
        }
    }
}

/// Number of stored document types for a repository
pub async fn count_documents(conn: &mut SqliteConnection, repository_id: &str) -> Result<usize> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM documents WHERE repository_id = ?")
        .bind(repository_id)
        .fetch_one(conn)
        .await?;
    Ok(count as usize)
}

impl MetaDb {
    // ===== Document Operations =====

    /// Replace a set of documents in one transaction; all or none are written
    pub async fn upsert_documents(&self, docs: &[GeneratedDocument]) -> Result<()> {
        let mut tx = self.begin().await?;
        for doc in docs {
            sqlx::query(
                r#"
                INSERT INTO documents (repository_id, doc_type, markdown, citations_json, commit_hash, generated_at)
                VALUES (?, ?, ?, ?, ?, ?)
                ON CONFLICT(repository_id, doc_type) DO UPDATE SET
                    markdown = excluded.markdown,
                    citations_json = excluded.citations_json,
                    commit_hash = excluded.commit_hash,
                    generated_at = excluded.generated_at
                "#,
            )
            .bind(&doc.repository_id)
            .bind(&doc.doc_type)
            .bind(&doc.markdown)
            .bind(&doc.citations_json)
            .bind(&doc.commit_hash)
            .bind(&doc.generated_at)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Get a document by type
    pub async fn get_document(
        &self,
        repository_id: &str,
        doc_type: &str,
    ) -> Result<Option<GeneratedDocument>> {
        let doc = sqlx::query_as::<_, GeneratedDocument>(
            "SELECT * FROM documents WHERE repository_id = ? AND doc_type = ?",
        )
        .bind(repository_id)
        .bind(doc_type)
        .fetch_optional(self.pool())
        .await?;
        Ok(doc)
    }

    /// All documents of a repository
    pub async fn list_documents(&self, repository_id: &str) -> Result<Vec<GeneratedDocument>> {
        let docs = sqlx::query_as::<_, GeneratedDocument>(
            "SELECT * FROM documents WHERE repository_id = ? ORDER BY doc_type",
        )
        .bind(repository_id)
        .fetch_all(self.pool())
        .await?;
        Ok(docs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::meta::test_support::setup_test_db;
    use crate::meta::Repository;

    #[tokio::test]
    async fn test_document_replace() {
        let (db, _tmp) = setup_test_db().await;
        let repo = Repository::new("a".into(), "b".into(), "https://github.com/a/b".into(), None);
        db.insert_repository(&repo).await.unwrap();

        let doc = GeneratedDocument::new(
            repo.id.clone(),
            "README".into(),
            "# v1".into(),
            "[]".into(),
            Some("c1".into()),
        );
        db.upsert_documents(&[doc]).await.unwrap();

        let doc = GeneratedDocument::new(
            repo.id.clone(),
            "README".into(),
            "# v2".into(),
            "[]".into(),
            Some("c2".into()),
        );
        db.upsert_documents(&[doc]).await.unwrap();

        let docs = db.list_documents(&repo.id).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].markdown, "# v2");
        assert_eq!(docs[0].commit_hash.as_deref(), Some("c2"));
    }

    #[tokio::test]
    async fn test_document_set_is_all_or_nothing() {
        let (db, _tmp) = setup_test_db().await;
        let repo = Repository::new("a".into(), "b".into(), "https://github.com/a/b".into(), None);
        db.insert_repository(&repo).await.unwrap();
        let readme = |markdown: &str| {
            GeneratedDocument::new(
                repo.id.clone(),
                "README".into(),
                markdown.into(),
                "[]".into(),
                Some("c1".into()),
            )
        };
        db.upsert_documents(&[readme("# v1")]).await.unwrap();

        // The second row names no repository and fails its foreign key
        let orphan = GeneratedDocument::new(
            "no-such-repo".into(),
            "ARCHITECTURE".into(),
            "# arch".into(),
            "[]".into(),
            None,
        );
        assert!(db.upsert_documents(&[readme("# v2"), orphan]).await.is_err());

        let docs = db.list_documents(&repo.id).await.unwrap();
        assert_eq!(docs.len(), 1);
        assert_eq!(docs[0].markdown, "# v1");
    }
}
