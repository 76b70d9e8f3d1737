//! Tutor: question answering that only speaks from retrieved code
//!
//! Every answer either carries at least one citation that falls inside a
//! retrieved chunk and resolves to a live chunk, or it is the explicit
//! insufficient-evidence reply. Model output is parsed as untrusted JSON and
//! each citation is checked before it is shown.

use crate::config::TutorConfig;
use crate::embed::Embedder;
use crate::error::{Error, ErrorKind, Result};
use crate::jobs::StageContext;
use crate::llm::{complete_with_retry, LanguageModel};
use crate::meta::{
    format_timestamp, parse_timestamp, MetaDb, NewTurn, Repository, SessionStatus, TutorSession,
    TutorTurn,
};
use crate::retry::Backoff;
use crate::search::{require_indexed, retrieve, Citation};
use crate::vector::Neighbor;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// The reply given whenever the evidence cannot support an answer
pub const INSUFFICIENT_EVIDENCE: &str = "This could not be found in the repository.";

const INSTRUCTIONS: &str = r#"You are a code tutor helping a developer understand a repository.
Rules:
1. Answer ONLY from the numbered code excerpts in the context.
2. Every claim must cite the file and line range of an excerpt it comes from. Cite only files and lines that appear in the excerpts.
3. If the excerpts do not contain the answer, say so: "This could not be found in the repository."
4. Never invent files, symbols or behaviour.

Reply with JSON only, in this shape:
{"answer": "...", "citations": [{"file": "path/to/file.py", "start_line": 10, "end_line": 25}], "confidence": 0.8, "answered": true}
If you cannot answer:
{"answer": "This could not be found in the repository.", "citations": [], "confidence": 0.0, "answered": false}"#;

/// Result of one question
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Answer {
    pub session_id: String,
    pub question: String,
    pub answer: String,
    pub citations: Vec<Citation>,
    pub confidence: f32,
    pub insufficient_evidence: bool,
    pub warning: Option<String>,
}

/// A stored turn with parsed citations
#[derive(Debug, Clone, Serialize)]
pub struct TurnView {
    pub position: i64,
    pub role: String,
    pub content: String,
    pub citations: Vec<Citation>,
    pub insufficient_evidence: bool,
    pub warning: Option<String>,
    pub created_at: String,
}

impl TurnView {
    fn from_turn(turn: TutorTurn) -> Result<Self> {
        let citations = match turn.citations_json.as_deref() {
            Some(json) => serde_json::from_str(json)?,
            None => Vec::new(),
        };
        Ok(Self {
            position: turn.position,
            role: turn.role,
            content: turn.content,
            citations,
            insufficient_evidence: turn.insufficient_evidence,
            warning: turn.warning,
            created_at: turn.created_at,
        })
    }
}

/// What the model claims, before validation
#[derive(Debug, Clone, PartialEq)]
pub struct ModelAnswer {
    pub answer: String,
    pub citations: Vec<Citation>,
    pub confidence: Option<f32>,
    pub answered: bool,
}

#[derive(Deserialize)]
struct RawAnswer {
    answer: String,
    #[serde(default, alias = "references")]
    citations: Vec<serde_json::Value>,
    #[serde(default)]
    confidence: Option<f32>,
    #[serde(default = "answered_default")]
    answered: bool,
}

fn answered_default() -> bool {
    true
}

#[derive(Deserialize)]
struct RawCitation {
    #[serde(alias = "file_path", alias = "path")]
    file: String,
    #[serde(default)]
    lines: Option<String>,
    #[serde(default)]
    start_line: Option<i64>,
    #[serde(default)]
    end_line: Option<i64>,
}

impl RawCitation {
    fn into_citation(self) -> Option<Citation> {
        let (start, end) = match (self.start_line, self.end_line, self.lines.as_deref()) {
            (Some(s), Some(e), _) => (s, e),
            (Some(s), None, _) => (s, s),
            (None, _, Some(lines)) => parse_line_range(lines)?,
            _ => return None,
        };
        Some(Citation {
            file_path: self.file.trim().trim_start_matches("./").to_string(),
            start_line: start,
            end_line: end,
            chunk_fingerprint: None,
        })
    }
}

/// `"10-25"`, `"L10-L25"` or `"42"`
fn parse_line_range(lines: &str) -> Option<(i64, i64)> {
    let clean = |s: &str| s.trim().trim_start_matches(['L', 'l']).parse::<i64>().ok();
    match lines.split_once('-') {
        Some((a, b)) => Some((clean(a)?, clean(b)?)),
        None => clean(lines).map(|n| (n, n)),
    }
}

/// Parse the model's JSON reply; `None` when it is not the expected shape
///
/// Tolerates code fences and prose around the JSON object.
pub fn parse_model_answer(raw: &str) -> Option<ModelAnswer> {
    let start = raw.find('{')?;
    let end = raw.rfind('}')?;
    if end < start {
        return None;
    }
    let parsed: RawAnswer = serde_json::from_str(&raw[start..=end]).ok()?;
    let citations = parsed
        .citations
        .into_iter()
        .filter_map(|v| serde_json::from_value::<RawCitation>(v).ok())
        .filter_map(RawCitation::into_citation)
        .collect();
    Some(ModelAnswer {
        answer: parsed.answer.trim().to_string(),
        citations,
        confidence: parsed.confidence,
        answered: parsed.answered,
    })
}

/// Rough token count used for history budgeting
fn estimate_tokens(text: &str) -> usize {
    (text.split_whitespace().count() as f64 * 1.3).ceil() as usize
}

/// Most recent turns that fit both limits, oldest first; turns are never split
pub fn history_window(turns: &[TutorTurn], max_turns: usize, token_budget: usize) -> Vec<&TutorTurn> {
    let mut kept = Vec::new();
    let mut used = 0;
    for turn in turns.iter().rev().take(max_turns) {
        let cost = estimate_tokens(&turn.content);
        if used + cost > token_budget {
            break;
        }
        used += cost;
        kept.push(turn);
    }
    kept.reverse();
    kept
}

/// Turns the rolling summary draws from, newest kept
const SUMMARY_MAX_TURNS: usize = 6;
/// Characters of one turn kept in the rolling summary
const SUMMARY_TURN_CHARS: usize = 100;

/// Digest of the turns that no longer fit [`history_window`]
///
/// `None` while every turn is still replayed. Oldest parts are dropped first
/// to stay within `summary_budget`.
pub fn rolling_summary(
    turns: &[TutorTurn],
    max_turns: usize,
    history_budget: usize,
    summary_budget: usize,
) -> Option<String> {
    let replayed = history_window(turns, max_turns, history_budget).len();
    let aged_out = &turns[..turns.len() - replayed];

    let skip = aged_out.len().saturating_sub(SUMMARY_MAX_TURNS);
    let mut parts: Vec<String> = aged_out[skip..]
        .iter()
        .map(|turn| {
            let label = if turn.role == "user" { "Q" } else { "A" };
            let text: String = turn
                .content
                .split_whitespace()
                .collect::<Vec<_>>()
                .join(" ")
                .chars()
                .take(SUMMARY_TURN_CHARS)
                .collect();
            format!("{}: {}", label, text)
        })
        .collect();

    while !parts.is_empty() && estimate_tokens(&parts.join(" | ")) > summary_budget {
        parts.remove(0);
    }
    if parts.is_empty() {
        None
    } else {
        Some(parts.join(" | "))
    }
}

/// A turn about to be appended, positioned after `existing`
fn pending_turn(session_id: &str, existing: usize, turn: &NewTurn) -> TutorTurn {
    TutorTurn {
        id: 0,
        session_id: session_id.to_string(),
        position: existing as i64 + 1,
        role: turn.role.clone(),
        content: turn.content.clone(),
        citations_json: turn.citations_json.clone(),
        insufficient_evidence: turn.insufficient_evidence,
        warning: turn.warning.clone(),
        created_at: String::new(),
    }
}

fn build_context(
    repo: &Repository,
    session: &TutorSession,
    history: &[&TutorTurn],
    hits: &[Neighbor],
    question: &str,
) -> String {
    let mut out = format!(
        "Repository: {}\nPrimary language: {}\n",
        repo.full_name(),
        repo.primary_language.as_deref().unwrap_or("unknown")
    );
    if let Some(focus) = &session.focus {
        out.push_str(&format!("Focus area: {}\n", focus));
    }
    if let Some(summary) = &session.rolling_summary {
        out.push_str(&format!("\nSummary of earlier conversation: {}\n", summary));
    }

    if !history.is_empty() {
        out.push_str("\nEarlier conversation:\n");
        for turn in history {
            out.push_str(&format!("{}: {}\n", turn.role, turn.content));
        }
    }

    out.push_str("\nCode excerpts:\n");
    for (i, hit) in hits.iter().enumerate() {
        let chunk = &hit.chunk;
        out.push_str(&format!(
            "\n[{}] File: {} (lines {}-{})\nSymbol: {}\n```{}\n{}\n```\n",
            i + 1,
            chunk.file_path,
            chunk.start_line,
            chunk.end_line,
            chunk.symbol.as_deref().unwrap_or("n/a"),
            chunk.language,
            chunk.content.trim_end()
        ));
    }

    out.push_str(&format!("\nQuestion: {}\n", question));
    out
}

/// Question answering over one repository at a time
pub struct Tutor {
    db: MetaDb,
    embedder: Arc<dyn Embedder>,
    llm: Arc<dyn LanguageModel>,
    config: TutorConfig,
    backoff: Backoff,
    llm_retries: u32,
}

impl Tutor {
    pub fn new(ctx: &StageContext) -> Self {
        Self {
            db: ctx.db.clone(),
            embedder: ctx.query_embedder(),
            llm: ctx.caps.llm.clone(),
            config: ctx.config.tutor.clone(),
            backoff: ctx.backoff(),
            llm_retries: ctx.config.llm.max_retries,
        }
    }

    /// Open a session; the repository must have a current index
    pub async fn create_session(&self, repository_id: &str, focus: Option<String>) -> Result<TutorSession> {
        let repo = self.db.require_repository(repository_id).await?;
        require_indexed(&repo)?;

        let focus = focus.map(|f| f.trim().to_string()).filter(|f| !f.is_empty());
        let session = TutorSession::new(repo.id.clone(), repo.indexed_commit.clone(), focus);
        self.db.insert_session(&session).await?;
        info!(session_id = %session.id, repo_id = %repo.id, "Opened tutor session");
        Ok(session)
    }

    /// Close a session explicitly
    pub async fn close(&self, session_id: &str) -> Result<TutorSession> {
        let session = self.db.require_session(session_id).await?;
        if !self.db.close_session(&session.id).await? {
            return Err(Error::Conflict(format!("Session {} is already closed", session.id)));
        }
        info!(session_id = %session.id, "Closed tutor session");
        self.db.require_session(session_id).await
    }

    /// Close every session idle for longer than the configured TTL
    pub async fn expire_idle(&self) -> Result<u64> {
        let cutoff = Utc::now() - chrono::Duration::hours(self.config.session_ttl_hours);
        let expired = self.db.expire_sessions(&format_timestamp(cutoff)).await?;
        if expired > 0 {
            info!(expired, "Expired idle tutor sessions");
        }
        Ok(expired)
    }

    /// Ordered turns of a session
    pub async fn history(&self, session_id: &str) -> Result<Vec<TurnView>> {
        let session = self.db.require_session(session_id).await?;
        self.db
            .list_turns(&session.id)
            .await?
            .into_iter()
            .map(TurnView::from_turn)
            .collect()
    }

    /// Load a session that may still take questions
    async fn open_session(&self, session_id: &str) -> Result<TutorSession> {
        let session = self.db.require_session(session_id).await?;
        if session.get_status()? == SessionStatus::Closed {
            return Err(Error::Conflict(format!("Session {} is closed", session.id)));
        }

        let idle_limit = chrono::Duration::hours(self.config.session_ttl_hours);
        let expired = parse_timestamp(&session.last_activity_at)
            .map(|last| Utc::now() - last > idle_limit)
            .unwrap_or(false);
        if expired {
            self.db.close_session(&session.id).await?;
            return Err(Error::Conflict(format!("Session {} has expired", session.id)));
        }
        Ok(session)
    }

    /// Answer a question from retrieved evidence, or say it cannot
    pub async fn ask(&self, session_id: &str, question: &str) -> Result<Answer> {
        let question = question.trim();
        if question.is_empty() {
            return Err(Error::Validation("Question must not be empty".to_string()));
        }

        let session = self.open_session(session_id).await?;
        let repo = self.db.require_repository(&session.repository_id).await?;

        let warning = match (&session.commit_hash, &repo.indexed_commit) {
            (Some(opened), Some(current)) if opened != current => Some(format!(
                "The repository was re-ingested after this session opened ({} -> {}); answers cite the current commit",
                short(opened),
                short(current)
            )),
            _ => None,
        };

        let mut hits = retrieve(
            &self.db,
            self.embedder.as_ref(),
            &repo,
            question,
            self.config.min_score,
            None,
        )
        .await?;
        hits.truncate(self.config.top_k.max(1));

        let mut turns = self.db.list_turns(&session.id).await?;
        let grounded = if hits.is_empty() {
            Err(Error::Grounding("no evidence above the score threshold".to_string()))
        } else {
            self.grounded_answer(&repo, &session, &turns, &hits, question).await
        };
        let (answer, citations, confidence) = match grounded {
            Ok(grounded) => grounded,
            Err(e) if e.kind() == ErrorKind::GroundingFailure => {
                debug!(session_id = %session.id, reason = %e, "Answering with insufficient evidence");
                (INSUFFICIENT_EVIDENCE.to_string(), Vec::new(), 0.0)
            }
            Err(e) => return Err(e),
        };
        let insufficient = citations.is_empty();

        let user_turn = NewTurn {
            role: "user".to_string(),
            content: question.to_string(),
            citations_json: None,
            insufficient_evidence: false,
            warning: None,
        };
        let assistant_turn = NewTurn {
            role: "assistant".to_string(),
            content: answer.clone(),
            citations_json: Some(serde_json::to_string(&citations)?),
            insufficient_evidence: insufficient,
            warning: warning.clone(),
        };
        for turn in [&user_turn, &assistant_turn] {
            let pending = pending_turn(&session.id, turns.len(), turn);
            turns.push(pending);
        }
        let summary = rolling_summary(
            &turns,
            self.config.max_history_turns,
            self.config.history_token_budget,
            self.config.summary_token_budget,
        );
        self.db
            .append_turns(&session.id, &[user_turn, assistant_turn], summary.as_deref())
            .await?;

        info!(
            session_id = %session.id,
            repo_id = %repo.id,
            question = %question.chars().take(50).collect::<String>(),
            citations = citations.len(),
            insufficient,
            "Answered question"
        );

        Ok(Answer {
            session_id: session.id,
            question: question.to_string(),
            answer,
            citations,
            confidence,
            insufficient_evidence: insufficient,
            warning,
        })
    }

    /// Ask the model and keep only citations the evidence supports
    async fn grounded_answer(
        &self,
        repo: &Repository,
        session: &TutorSession,
        turns: &[TutorTurn],
        hits: &[Neighbor],
        question: &str,
    ) -> Result<(String, Vec<Citation>, f32)> {
        let history = history_window(
            turns,
            self.config.max_history_turns,
            self.config.history_token_budget,
        );
        let context = build_context(repo, session, &history, hits, question);

        let raw = complete_with_retry(
            self.llm.as_ref(),
            self.backoff,
            self.llm_retries,
            &context,
            INSTRUCTIONS,
        )
        .await?;

        let Some(parsed) = parse_model_answer(&raw) else {
            warn!(session_id = %session.id, "Model reply was not valid JSON; treating as uncited");
            return Err(Error::Grounding("model reply was not valid JSON".to_string()));
        };
        if !parsed.answered || parsed.answer.is_empty() {
            return Err(Error::Grounding("model declined to answer".to_string()));
        }

        let citations = self.verify_citations(repo, hits, &parsed.citations).await?;
        let dropped = parsed.citations.len() - citations.len();
        if dropped > 0 {
            warn!(session_id = %session.id, dropped, "Dropped unverifiable citations");
        }
        if citations.is_empty() {
            return Err(Error::Grounding("no citation survived verification".to_string()));
        }

        let support = citations
            .iter()
            .filter_map(|c| {
                hits.iter()
                    .find(|h| Some(&h.chunk.fingerprint) == c.chunk_fingerprint.as_ref())
                    .map(|h| h.score)
            })
            .fold(0.0f32, f32::max);
        let confidence = parsed.confidence.unwrap_or(support).clamp(0.0, 1.0);
        Ok((parsed.answer, citations, confidence))
    }

    /// Citations that lie inside a retrieved span and resolve to a live chunk
    async fn verify_citations(
        &self,
        repo: &Repository,
        hits: &[Neighbor],
        claimed: &[Citation],
    ) -> Result<Vec<Citation>> {
        let mut verified: Vec<Citation> = Vec::new();
        for citation in claimed {
            let Some(hit) = hits.iter().find(|h| {
                h.chunk.file_path == citation.file_path
                    && h.chunk.contains_lines(citation.start_line, citation.end_line)
            }) else {
                continue;
            };

            let live = self
                .db
                .live_chunks_covering(
                    &repo.id,
                    &citation.file_path,
                    citation.start_line,
                    citation.end_line,
                )
                .await?;
            if live.is_empty() {
                continue;
            }

            let checked = Citation {
                chunk_fingerprint: Some(hit.chunk.fingerprint.clone()),
                ..citation.clone()
            };
            if !verified.contains(&checked) {
                verified.push(checked);
            }
        }
        Ok(verified)
    }
}

fn short(commit: &str) -> &str {
    commit.get(..8).unwrap_or(commit)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::fakes::{test_env, test_env_with, FlakyEmbedder, ScriptedLlm};
    use crate::jobs::{JobEngine, JobKind};
    use std::sync::atomic::Ordering;

    fn turn(position: i64, content: &str) -> TutorTurn {
        TutorTurn {
            id: position,
            session_id: "s".to_string(),
            position,
            role: if position % 2 == 1 { "user" } else { "assistant" }.to_string(),
            content: content.to_string(),
            citations_json: None,
            insufficient_evidence: false,
            warning: None,
            created_at: String::new(),
        }
    }

    #[test]
    fn test_parse_model_answer_variants() {
        let parsed = parse_model_answer(
            "```json\n{\"answer\": \"parse_config reads JSON\", \"citations\": [{\"file\": \"config/parser.py\", \"lines\": \"4-7\"}, {\"file_path\": \"./src/main.rs\", \"start_line\": 1, \"end_line\": 3}, {\"oops\": 1}], \"confidence\": 0.9}\n```",
        )
        .unwrap();
        assert_eq!(parsed.answer, "parse_config reads JSON");
        assert!(parsed.answered);
        assert_eq!(parsed.citations.len(), 2);
        assert_eq!(parsed.citations[0].start_line, 4);
        assert_eq!(parsed.citations[0].end_line, 7);
        assert_eq!(parsed.citations[1].file_path, "src/main.rs");

        assert!(parse_model_answer("The config is parsed somewhere.").is_none());
        assert_eq!(parse_line_range("L10-L12"), Some((10, 12)));
        assert_eq!(parse_line_range("42"), Some((42, 42)));
        assert_eq!(parse_line_range("ten"), None);
    }

    #[test]
    fn test_history_window_drops_oldest_whole_turns() {
        let turns = vec![
            turn(1, "one two three four five six seven eight nine ten"),
            turn(2, "short answer"),
            turn(3, "another question"),
            turn(4, "final answer here"),
        ];
        let window = history_window(&turns, 10, 12);
        let positions: Vec<i64> = window.iter().map(|t| t.position).collect();
        assert_eq!(positions, vec![2, 3, 4]);

        let capped = history_window(&turns, 2, 1000);
        assert_eq!(capped.len(), 2);
        assert_eq!(capped[0].position, 3);
    }

    #[test]
    fn test_rolling_summary_covers_aged_out_turns() {
        let turns: Vec<TutorTurn> = (1..=6).map(|i| turn(i, &format!("t{}", i))).collect();

        assert_eq!(rolling_summary(&turns, 10, 1000, 500), None);
        assert_eq!(
            rolling_summary(&turns, 2, 1000, 500).as_deref(),
            Some("Q: t1 | A: t2 | Q: t3 | A: t4")
        );
        // a tight budget keeps only the newest aged-out turn
        assert_eq!(rolling_summary(&turns, 2, 1000, 3).as_deref(), Some("A: t4"));

        let long = vec![turn(1, &"word ".repeat(80)), turn(2, "ok")];
        let summary = rolling_summary(&long, 1, 1000, 500).unwrap();
        assert_eq!(summary.chars().count(), "Q: ".len() + SUMMARY_TURN_CHARS);
    }

    /// Run the widget repository through CLONE, STRUCTURE and INDEX
    async fn indexed(engine: &JobEngine) -> String {
        let (repo, _) = engine
            .register("https://github.com/acme/widget", None)
            .await
            .unwrap();
        engine.run_until_idle().await.unwrap();
        for kind in [JobKind::Structure, JobKind::Index] {
            engine.submit(&repo.id, kind).await.unwrap();
            engine.run_until_idle().await.unwrap();
        }
        repo.id
    }

    fn cite_parser(context: &str, _: &str) -> Result<String> {
        // cite the parser chunk exactly as presented
        let line = context
            .lines()
            .find(|l| l.contains("File: config/parser.py"))
            .unwrap_or("");
        let lines = line
            .split("(lines ")
            .nth(1)
            .and_then(|rest| rest.strip_suffix(')'))
            .unwrap_or("1-1");
        Ok(format!(
            r#"{{"answer": "parse_config in config/parser.py loads the file as JSON.", "citations": [{{"file": "config/parser.py", "lines": "{}"}}, {{"file": "config/loader.py", "lines": "1-5"}}], "confidence": 0.8, "answered": true}}"#,
            lines
        ))
    }

    #[tokio::test]
    async fn test_cited_answer_is_verified() {
        let env = test_env(ScriptedLlm::new(cite_parser)).await;
        let engine = JobEngine::new(env.ctx.clone());
        let repo_id = indexed(&engine).await;
        let tutor = Tutor::new(&env.ctx);

        let session = tutor.create_session(&repo_id, None).await.unwrap();
        let answer = tutor.ask(&session.id, "What parses the config file?").await.unwrap();

        assert!(!answer.insufficient_evidence);
        assert_eq!(answer.citations.len(), 1, "fabricated path must be dropped");
        assert_eq!(answer.citations[0].file_path, "config/parser.py");
        assert!(answer.citations[0].chunk_fingerprint.is_some());
        assert!(answer.warning.is_none());

        let history = tutor.history(&session.id).await.unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].role, "user");
        assert_eq!(history[1].citations, answer.citations);
    }

    #[tokio::test]
    async fn test_uncited_reply_becomes_insufficient_evidence() {
        let env = test_env(ScriptedLlm::fixed("Probably somewhere in utils.")).await;
        let engine = JobEngine::new(env.ctx.clone());
        let repo_id = indexed(&engine).await;
        let tutor = Tutor::new(&env.ctx);

        let session = tutor.create_session(&repo_id, Some("config".into())).await.unwrap();
        let answer = tutor.ask(&session.id, "What parses the config file?").await.unwrap();
        assert!(answer.insufficient_evidence);
        assert_eq!(answer.answer, INSUFFICIENT_EVIDENCE);
        assert!(answer.citations.is_empty());
    }

    #[tokio::test]
    async fn test_no_evidence_skips_the_model() {
        let calls = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let seen = calls.clone();
        let env = test_env_with(
            ScriptedLlm::new(move |c, i| {
                seen.fetch_add(1, Ordering::SeqCst);
                cite_parser(c, i)
            }),
            Arc::new(FlakyEmbedder::new(0)),
            |c| c.tutor.min_score = 0.99,
        )
        .await;
        let engine = JobEngine::new(env.ctx.clone());
        let repo_id = indexed(&engine).await;
        let tutor = Tutor::new(&env.ctx);

        let session = tutor.create_session(&repo_id, None).await.unwrap();
        let answer = tutor
            .ask(&session.id, "quantum chromodynamics lattice")
            .await
            .unwrap();
        assert!(answer.insufficient_evidence);
        assert_eq!(answer.answer, INSUFFICIENT_EVIDENCE);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_session_rules() {
        let llm = ScriptedLlm::new(cite_parser);
        let env = test_env(llm).await;
        let engine = JobEngine::new(env.ctx.clone());
        let tutor = Tutor::new(&env.ctx);

        let (repo, _) = engine
            .register("https://github.com/acme/widget", None)
            .await
            .unwrap();
        let err = tutor.create_session(&repo.id, None).await.unwrap_err();
        assert_eq!(err.kind(), crate::error::ErrorKind::NotIndexed);

        engine.run_until_idle().await.unwrap();
        for kind in [JobKind::Structure, JobKind::Index] {
            engine.submit(&repo.id, kind).await.unwrap();
            engine.run_until_idle().await.unwrap();
        }

        let session = tutor.create_session(&repo.id, None).await.unwrap();
        assert!(matches!(
            tutor.ask(&session.id, "  ").await.unwrap_err(),
            Error::Validation(_)
        ));

        tutor.close(&session.id).await.unwrap();
        assert!(matches!(
            tutor.ask(&session.id, "What parses the config file?").await.unwrap_err(),
            Error::Conflict(_)
        ));
        assert!(tutor.close(&session.id).await.is_err());
        assert_eq!(env.cloner.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_summary_of_aged_out_turns_reaches_the_model() {
        let contexts = Arc::new(std::sync::Mutex::new(Vec::<String>::new()));
        let seen = contexts.clone();
        let env = test_env_with(
            ScriptedLlm::new(move |c, i| {
                seen.lock().unwrap().push(c.to_string());
                cite_parser(c, i)
            }),
            Arc::new(FlakyEmbedder::new(0)),
            |c| c.tutor.max_history_turns = 2,
        )
        .await;
        let engine = JobEngine::new(env.ctx.clone());
        let repo_id = indexed(&engine).await;
        let tutor = Tutor::new(&env.ctx);
        let session = tutor.create_session(&repo_id, None).await.unwrap();

        tutor.ask(&session.id, "Which function parses the config?").await.unwrap();
        let stored = env.ctx.db.require_session(&session.id).await.unwrap();
        assert!(stored.rolling_summary.is_none());

        tutor.ask(&session.id, "What parses the config file?").await.unwrap();
        let stored = env.ctx.db.require_session(&session.id).await.unwrap();
        let summary = stored.rolling_summary.unwrap();
        assert!(summary.starts_with("Q: Which function parses the config? | A: "));

        tutor.ask(&session.id, "What parses the config file?").await.unwrap();
        let contexts = contexts.lock().unwrap();
        assert_eq!(contexts.len(), 3);
        assert!(!contexts[1].contains("Summary of earlier conversation"));
        assert!(contexts[2].contains(&format!("Summary of earlier conversation: {}", summary)));
    }

    #[tokio::test]
    async fn test_query_embedding_is_retried() {
        let embedder = Arc::new(FlakyEmbedder::new(0));
        let env = test_env_with(ScriptedLlm::new(cite_parser), embedder.clone(), |_| {}).await;
        let engine = JobEngine::new(env.ctx.clone());
        let repo_id = indexed(&engine).await;
        let tutor = Tutor::new(&env.ctx);
        let session = tutor.create_session(&repo_id, None).await.unwrap();

        let before = embedder.calls.load(Ordering::SeqCst);
        embedder.fail_next(1);
        let answer = tutor.ask(&session.id, "What parses the config file?").await.unwrap();
        assert!(!answer.insufficient_evidence);
        assert_eq!(embedder.calls.load(Ordering::SeqCst), before + 2);
    }

    #[tokio::test]
    async fn test_reingested_commit_warns_open_session() {
        let env = test_env(ScriptedLlm::new(cite_parser)).await;
        let engine = JobEngine::new(env.ctx.clone());
        let repo_id = indexed(&engine).await;
        let tutor = Tutor::new(&env.ctx);
        let session = tutor.create_session(&repo_id, None).await.unwrap();

        env.cloner.set_commit("c0ffee02");
        env.cloner.set_file(
            "config/parser.py",
            "import tomllib\n\n\ndef parse_config(path):\n    with open(path, 'rb') as fh:\n        return tomllib.load(fh)\n",
        );
        engine.reingest(&repo_id).await.unwrap();
        engine.run_until_idle().await.unwrap();

        // not indexed yet at the new commit
        let err = tutor.ask(&session.id, "What parses the config file?").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotIndexed);

        for kind in [JobKind::Structure, JobKind::Index] {
            engine.submit(&repo_id, kind).await.unwrap();
            engine.run_until_idle().await.unwrap();
        }
        let answer = tutor.ask(&session.id, "What parses the config file?").await.unwrap();
        let warning = answer.warning.unwrap();
        assert!(warning.contains("c0ffee01") && warning.contains("c0ffee02"));
        assert!(!answer.insufficient_evidence);
        assert_eq!(env.cloner.calls.load(Ordering::SeqCst), 2);
    }
}
