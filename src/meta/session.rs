//! Tutor sessions and conversation turns

use super::{timestamp, MetaDb};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Open,
    Closed,
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionStatus::Open => write!(f, "open"),
            SessionStatus::Closed => write!(f, "closed"),
        }
    }
}

impl std::str::FromStr for SessionStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "open" => Ok(SessionStatus::Open),
            "closed" => Ok(SessionStatus::Closed),
            _ => Err(Error::Config(format!("Unknown session status: {}", s))),
        }
    }
}

/// A tutor conversation bound to one repository
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TutorSession {
    pub id: String,
    pub repository_id: String,
    pub status: String,
    pub commit_hash: Option<String>,
    pub focus: Option<String>,
    pub created_at: String,
    pub last_activity_at: String,
    pub closed_at: Option<String>,
    /// Digest of turns that no longer fit the replay window
    pub rolling_summary: Option<String>,
}

impl TutorSession {
    pub fn new(repository_id: String, commit_hash: Option<String>, focus: Option<String>) -> Self {
        let now = timestamp();
        Self {
            id: Uuid::new_v4().to_string(),
            repository_id,
            status: SessionStatus::Open.to_string(),
            commit_hash,
            focus,
            created_at: now.clone(),
            last_activity_at: now,
            closed_at: None,
            rolling_summary: None,
        }
    }

    pub fn get_status(&self) -> Result<SessionStatus> {
        self.status.parse()
    }
}

/// One message in a session
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct TutorTurn {
    pub id: i64,
    pub session_id: String,
    pub position: i64,
    pub role: String,
    pub content: String,
    pub citations_json: Option<String>,
    pub insufficient_evidence: bool,
    pub warning: Option<String>,
    pub created_at: String,
}

/// A turn waiting to be appended
#[derive(Debug, Clone)]
pub struct NewTurn {
    pub role: String,
    pub content: String,
    pub citations_json: Option<String>,
    pub insufficient_evidence: bool,
    pub warning: Option<String>,
}

impl MetaDb {
    // ===== Session Operations =====

    pub async fn insert_session(&self, session: &TutorSession) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO tutor_sessions (id, repository_id, status, commit_hash, focus, created_at, last_activity_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&session.id)
        .bind(&session.repository_id)
        .bind(&session.status)
        .bind(&session.commit_hash)
        .bind(&session.focus)
        .bind(&session.created_at)
        .bind(&session.last_activity_at)
        .execute(self.pool())
        .await?;
        Ok(())
    }

    pub async fn get_session(&self, id: &str) -> Result<Option<TutorSession>> {
        let session =
            sqlx::query_as::<_, TutorSession>("SELECT * FROM tutor_sessions WHERE id = ?")
                .bind(id)
                .fetch_optional(self.pool())
                .await?;
        Ok(session)
    }

    pub async fn require_session(&self, id: &str) -> Result<TutorSession> {
        self.get_session(id)
            .await?
            .ok_or_else(|| Error::SessionNotFound(id.to_string()))
    }

    /// Sessions of a repository, newest first
    pub async fn list_sessions(&self, repository_id: &str) -> Result<Vec<TutorSession>> {
        let sessions = sqlx::query_as::<_, TutorSession>(
            "SELECT * FROM tutor_sessions WHERE repository_id = ? ORDER BY created_at DESC",
        )
        .bind(repository_id)
        .fetch_all(self.pool())
        .await?;
        Ok(sessions)
    }

    /// Close a session; returns false if it was already closed
    pub async fn close_session(&self, id: &str) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE tutor_sessions SET status = 'closed', closed_at = ? WHERE id = ? AND status = 'open'",
        )
        .bind(timestamp())
        .bind(id)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Close open sessions idle since before `cutoff`
    pub async fn expire_sessions(&self, cutoff: &str) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE tutor_sessions SET status = 'closed', closed_at = ? WHERE status = 'open' AND last_activity_at < ?",
        )
        .bind(timestamp())
        .bind(cutoff)
        .execute(self.pool())
        .await?;
        Ok(result.rows_affected())
    }

    /// Turns of a session in order
    pub async fn list_turns(&self, session_id: &str) -> Result<Vec<TutorTurn>> {
        let turns = sqlx::query_as::<_, TutorTurn>(
            "SELECT * FROM tutor_turns WHERE session_id = ? ORDER BY position",
        )
        .bind(session_id)
        .fetch_all(self.pool())
        .await?;
        Ok(turns)
    }

    /// Append turns in order as one unit, touch the session and replace its
    /// rolling summary
    ///
    /// Fails with `Conflict` if the session was closed in the meantime.
    pub async fn append_turns(
        &self,
        session_id: &str,
        turns: &[NewTurn],
        rolling_summary: Option<&str>,
    ) -> Result<()> {
        let now = timestamp();
        let mut tx = self.begin().await?;

        let touched = sqlx::query(
            "UPDATE tutor_sessions SET last_activity_at = ?, rolling_summary = ? WHERE id = ? AND status = 'open'",
        )
        .bind(&now)
        .bind(rolling_summary)
        .bind(session_id)
        .execute(&mut *tx)
        .await?;
        if touched.rows_affected() == 0 {
            return Err(Error::Conflict(format!("Session {} is closed", session_id)));
        }

        let next: i64 = sqlx::query_scalar(
            "SELECT COALESCE(MAX(position), 0) + 1 FROM tutor_turns WHERE session_id = ?",
        )
        .bind(session_id)
        .fetch_one(&mut *tx)
        .await?;

        for (offset, turn) in turns.iter().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO tutor_turns (session_id, position, role, content, citations_json, insufficient_evidence, warning, created_at)
                VALUES (?, ?, ?, ?, ?, ?, ?, ?)
                "#,
            )
            .bind(session_id)
            .bind(next + offset as i64)
            .bind(&turn.role)
            .bind(&turn.content)
            .bind(&turn.citations_json)
            .bind(turn.insufficient_evidence)
            .bind(&turn.warning)
            .bind(&now)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }
}
