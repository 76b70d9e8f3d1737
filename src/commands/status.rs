//! Repository listing, status and event log commands

use crate::error::Result;
use crate::jobs::{status, JobSummary, StatusView};
use crate::meta::{Job, MetaDb, RepoEvent, Repository};
use clap_complete::Shell;
use serde::Serialize;

/// One row of `repointel list`
#[derive(Debug, Clone, Serialize)]
pub struct RepoSummary {
    pub id: String,
    pub full_name: String,
    pub url: String,
    pub git_ref: Option<String>,
    pub status: String,
    pub effective_status: String,
    pub commit_hash: Option<String>,
    pub total_chunks: i64,
    pub updated_at: String,
}

impl RepoSummary {
    fn from_repository(repo: &Repository) -> Result<Self> {
        Ok(Self {
            id: repo.id.clone(),
            full_name: repo.full_name(),
            url: repo.url.clone(),
            git_ref: repo.git_ref.clone(),
            status: repo.status.clone(),
            effective_status: repo.effective_status()?.to_string(),
            commit_hash: repo.commit_hash.clone(),
            total_chunks: repo.total_chunks,
            updated_at: repo.updated_at.clone(),
        })
    }
}

pub async fn cmd_list(db: &MetaDb) -> Result<Vec<RepoSummary>> {
    db.list_repositories()
        .await?
        .iter()
        .map(RepoSummary::from_repository)
        .collect()
}

/// Status of one repository, or of every repository when `key` is `None`
pub async fn cmd_status(
    db: &MetaDb,
    embedding_model: &str,
    key: Option<&str>,
) -> Result<Vec<StatusView>> {
    let repos = match key {
        Some(key) => vec![db.find_repository(key).await?],
        None => db.list_repositories().await?,
    };

    let mut views = Vec::with_capacity(repos.len());
    for repo in repos {
        views.push(status(db, embedding_model, &repo.id).await?);
    }
    Ok(views)
}

pub async fn cmd_events(db: &MetaDb, key: &str, limit: usize) -> Result<Vec<RepoEvent>> {
    let repo = db.find_repository(key).await?;
    db.list_events(&repo.id, limit).await
}

fn short(commit: &Option<String>) -> &str {
    match commit {
        Some(c) => c.get(..8).unwrap_or(c),
        None => "-",
    }
}

pub fn print_repositories(repos: &[RepoSummary]) {
    println!("\n📚 Repositories\n");

    if repos.is_empty() {
        println!("No repositories registered. Use 'repointel add <url>' to register one.");
        return;
    }

    for repo in repos {
        let status = if repo.status == repo.effective_status {
            repo.status.clone()
        } else {
            format!("{} (last good: {})", repo.status, repo.effective_status)
        };
        println!("• {} [{}]", repo.full_name, status);
        println!("  ID: {}", repo.id);
        println!("  URL: {}", repo.url);
        if let Some(git_ref) = &repo.git_ref {
            println!("  Ref: {}", git_ref);
        }
        println!(
            "  Commit: {}, Chunks: {}",
            short(&repo.commit_hash),
            repo.total_chunks
        );
        println!();
    }
}

fn print_job_line(prefix: &str, job: &JobSummary) {
    print!(
        "  {}{:<14} {:<10} {:>3}%  attempt {}/{}",
        prefix, job.kind, job.status, job.progress, job.attempt_count, job.max_attempts
    );
    if let (Some(kind), Some(message)) = (&job.error_kind, &job.error_message) {
        print!("  ({}: {})", kind, message);
    }
    println!();
}

pub fn print_status(view: &StatusView) {
    println!("\n📊 {}\n", view.full_name);
    println!("ID: {}", view.repository_id);
    println!("URL: {}", view.url);
    match &view.last_good_status {
        Some(last_good) => println!("Status: {} (last good: {})", view.status, last_good),
        None => println!("Status: {}", view.status),
    }
    println!("Commit: {}", short(&view.commit_hash));
    println!("Indexed commit: {}", short(&view.indexed_commit));
    println!(
        "Files: {}, Chunks: {}, Embedded: {}",
        view.total_files, view.total_chunks, view.embedded_chunks
    );
    if let Some(error) = &view.last_error {
        println!("Last error: {}", error);
    }

    if let Some(active) = &view.active_job {
        println!("\nActive job:");
        print_job_line("▶ ", active);
    }
    if !view.stages.is_empty() {
        println!("\nStages:");
        for job in &view.stages {
            print_job_line("", job);
        }
    }
    println!("\nUpdated: {}", view.updated_at);
}

pub fn print_job(job: &Job) {
    println!("Job {} [{}] {}", job.id, job.kind, job.status);
    if let Some(message) = &job.error_message {
        println!(
            "  {}: {}",
            job.error_kind.as_deref().unwrap_or("Error"),
            message
        );
    }
}

pub fn print_events(events: &[RepoEvent]) {
    for event in events {
        let edge = match (&event.from_status, &event.to_status) {
            (Some(from), Some(to)) => format!(" {} -> {}", from, to),
            _ => String::new(),
        };
        let detail = event
            .detail
            .as_deref()
            .map(|d| format!(" ({})", d))
            .unwrap_or_default();
        println!(
            "{:>5}  {}  {}{}{}",
            event.seq, event.created_at, event.event, edge, detail
        );
    }
}

/// Repository IDs with descriptions for shell completions
pub fn print_repo_completions(repos: &[RepoSummary], shell: Shell) {
    for repo in repos {
        let description = format!("{} [{}]", repo.full_name, repo.status).replace('\n', " ");
        match shell {
            Shell::Zsh => println!("{}:{}", repo.id, description.replace(':', "\\:")),
            Shell::Fish => println!("{}\t{}", repo.id, description.replace('\t', " ")),
            _ => println!("{}", repo.id),
        }
    }
}
