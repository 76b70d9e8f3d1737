//! Read-side commands: search, structure and generated documents

use crate::docs::{self, DocType, DocumentView};
use crate::error::Result;
use crate::jobs::StageContext;
use crate::search::{search, SearchOptions, SearchResponse};
use crate::structure::{structure, RepositoryStructure, TreeEntryKind};

pub async fn cmd_search(
    ctx: &StageContext,
    key: &str,
    query: &str,
    options: SearchOptions,
) -> Result<SearchResponse> {
    let repo = ctx.db.find_repository(key).await?;
    search(
        &ctx.db,
        ctx.query_embedder().as_ref(),
        &ctx.config.search,
        &repo.id,
        query,
        &options,
    )
    .await
}

pub async fn cmd_structure(ctx: &StageContext, key: &str) -> Result<RepositoryStructure> {
    let repo = ctx.db.find_repository(key).await?;
    structure(&ctx.db, &repo.id).await
}

pub async fn cmd_docs(ctx: &StageContext, key: &str, doc_type: DocType) -> Result<DocumentView> {
    let repo = ctx.db.find_repository(key).await?;
    docs::read(&ctx.db, &repo.id, doc_type).await
}

pub fn print_search_results(response: &SearchResponse) {
    println!("\n🔍 Results for: \"{}\"\n", response.query);

    if response.results.is_empty() {
        println!("No matching code found.");
        return;
    }

    for (i, result) in response.results.iter().enumerate() {
        let symbol = result
            .symbol
            .as_deref()
            .map(|s| format!(" ({})", s))
            .unwrap_or_default();
        println!(
            "{}. {}:{}-{}{} [score: {:.3}, {}]",
            i + 1,
            result.file_path,
            result.start_line,
            result.end_line,
            symbol,
            result.score,
            result.language
        );
        for line in result.snippet.lines() {
            println!("   │ {}", line);
        }
        println!();
    }
    println!(
        "Showing {} of {} matches",
        response.results.len(),
        response.total
    );
}

pub fn print_structure(view: &RepositoryStructure, show_tree: bool) {
    let snapshot = &view.snapshot;
    println!("\n🗂  Structure at {}\n", view.commit_hash.as_deref().unwrap_or("-"));
    println!(
        "Files: {}, Size: {} bytes, Chunks: {}",
        snapshot.total_files, snapshot.total_size_bytes, snapshot.total_chunks
    );
    if let Some(language) = &snapshot.primary_language {
        println!("Primary language: {}", language);
    }

    println!("\nLanguages:");
    for (language, stats) in &snapshot.language_breakdown {
        println!("  {:<14} {:>5} files {:>10} bytes", language, stats.files, stats.bytes);
    }

    if !snapshot.entry_points.is_empty() {
        println!("\nEntry points:");
        for entry in &snapshot.entry_points {
            println!(
                "  {} [{}, {:.2}] {}",
                entry.path, entry.kind, entry.confidence, entry.reason
            );
        }
    }

    if show_tree {
        println!("\nTree:");
        for entry in &snapshot.file_tree {
            let depth = entry.path.matches('/').count();
            let name = entry.path.rsplit('/').next().unwrap_or(&entry.path);
            let marker = match entry.kind {
                TreeEntryKind::Directory => "/",
                TreeEntryKind::File => "",
            };
            println!("  {}{}{}", "  ".repeat(depth), name, marker);
        }
    }
}

pub fn print_document(view: &DocumentView) {
    println!("{}", view.markdown);
}
