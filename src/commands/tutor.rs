//! Tutor session commands

use crate::error::Result;
use crate::jobs::StageContext;
use crate::meta::TutorSession;
use crate::tutor::{Answer, Tutor, TurnView};

pub async fn cmd_session_open(
    ctx: &StageContext,
    key: &str,
    focus: Option<String>,
) -> Result<TutorSession> {
    let repo = ctx.db.find_repository(key).await?;
    let tutor = Tutor::new(ctx);
    tutor.expire_idle().await?;
    tutor.create_session(&repo.id, focus).await
}

pub async fn cmd_session_list(ctx: &StageContext, key: &str) -> Result<Vec<TutorSession>> {
    let repo = ctx.db.find_repository(key).await?;
    ctx.db.list_sessions(&repo.id).await
}

pub async fn cmd_ask(ctx: &StageContext, session_id: &str, question: &str) -> Result<Answer> {
    Tutor::new(ctx).ask(session_id, question).await
}

pub fn print_session(session: &TutorSession) {
    println!("Session {} [{}]", session.id, session.status);
    if let Some(focus) = &session.focus {
        println!("  Focus: {}", focus);
    }
    println!(
        "  Commit: {}",
        session.commit_hash.as_deref().unwrap_or("-")
    );
    println!("  Last activity: {}", session.last_activity_at);
}

pub fn print_answer(answer: &Answer) {
    if let Some(warning) = &answer.warning {
        println!("⚠ {}\n", warning);
    }
    println!("{}", answer.answer);

    if answer.insufficient_evidence {
        println!("\n(no supporting code found)");
        return;
    }
    println!("\nSources (confidence {:.2}):", answer.confidence);
    for citation in &answer.citations {
        println!("  • {}", citation);
    }
}

pub fn print_history(turns: &[TurnView]) {
    for turn in turns {
        println!("[{}] {}: {}", turn.position, turn.role, turn.content);
        for citation in &turn.citations {
            println!("      ↳ {}", citation);
        }
        if let Some(warning) = &turn.warning {
            println!("      ⚠ {}", warning);
        }
    }
}
