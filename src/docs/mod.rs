//! Documentation generator
//!
//! Picks a representative slice of the repository, numbers each chunk as
//! `[n]` in a grounding context and asks the model to write from that
//! context only, citing `[n]`. Markers that do not name a supplied chunk
//! are stripped before the document is stored.

use crate::error::{Error, Result};
use crate::jobs::{JobProgress, StageContext};
use crate::lifecycle::{require_reached, RepoStatus};
use crate::llm::complete_with_retry;
use crate::meta::{ChunkRecord, GeneratedDocument, Job, MetaDb, Repository};
use crate::search::Citation;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::str::FromStr;
use tracing::{info, warn};

/// File names that describe a project as a whole
const OVERVIEW_FILES: &[&str] = &[
    "readme.md",
    "readme.rst",
    "readme.txt",
    "readme",
    "cargo.toml",
    "package.json",
    "pyproject.toml",
    "setup.py",
    "setup.cfg",
    "go.mod",
    "pom.xml",
    "build.gradle",
    "gemfile",
    "composer.json",
    "dockerfile",
    "makefile",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DocType {
    Readme,
    Architecture,
}

impl DocType {
    pub const ALL: [DocType; 2] = [DocType::Readme, DocType::Architecture];

    fn instructions(self) -> &'static str {
        match self {
            DocType::Readme => {
                "You are a technical writer. Write a README in Markdown for the repository \
                 described in the context: purpose, how to build or install it, how to use it, \
                 and its key features. Use only facts stated in the numbered source excerpts. \
                 After every factual sentence cite the excerpt it comes from as [n], using only \
                 the numbers given. If the excerpts do not cover a topic, leave the topic out."
            }
            DocType::Architecture => {
                "You are a software architect. Explain the architecture of the repository \
                 described in the context in Markdown: main components, how data flows between \
                 them, and the patterns they follow. Use only facts stated in the numbered \
                 source excerpts. After every factual sentence cite the excerpt it comes from as \
                 [n], using only the numbers given. Do not speculate about code you were not shown."
            }
        }
    }
}

impl std::fmt::Display for DocType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DocType::Readme => "README",
            DocType::Architecture => "ARCHITECTURE",
        })
    }
}

impl FromStr for DocType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "README" => Ok(DocType::Readme),
            "ARCHITECTURE" | "ARCH" => Ok(DocType::Architecture),
            _ => Err(Error::Validation(format!(
                "Unknown document type '{}'; expected README or ARCHITECTURE",
                s
            ))),
        }
    }
}

fn file_name(path: &str) -> String {
    path.rsplit('/').next().unwrap_or(path).to_lowercase()
}

/// Choose the chunks the model gets to see
///
/// Order of preference: entry points, overview files (readme and
/// manifests), other top-level files, then the leading chunk of files in
/// the dominant languages. Bounded by both chunk count and total characters.
pub fn select_context(
    repo: &Repository,
    chunks: &[ChunkRecord],
    max_chunks: usize,
    max_chars: usize,
) -> Vec<ChunkRecord> {
    // leading chunk of every file, in file order
    let mut leading: Vec<&ChunkRecord> = Vec::new();
    let mut seen_files = HashSet::new();
    for chunk in chunks {
        if seen_files.insert(chunk.file_path.as_str()) {
            leading.push(chunk);
        }
    }

    let mut ordered: Vec<&ChunkRecord> = Vec::new();
    for entry in repo.entry_points() {
        ordered.extend(leading.iter().copied().filter(|c| c.file_path == entry.path));
    }
    ordered.extend(
        leading
            .iter()
            .copied()
            .filter(|c| OVERVIEW_FILES.contains(&file_name(&c.file_path).as_str())),
    );
    ordered.extend(leading.iter().copied().filter(|c| !c.file_path.contains('/')));

    let mut languages: Vec<(String, u64)> = repo
        .language_breakdown()
        .into_iter()
        .map(|(lang, stats)| (lang, stats.files))
        .collect();
    languages.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    for (language, _) in &languages {
        ordered.extend(leading.iter().copied().filter(|c| &c.language == language));
    }
    // anything left, including later chunks of already chosen files
    ordered.extend(chunks.iter());

    let mut selected = Vec::new();
    let mut taken = HashSet::new();
    let mut chars = 0;
    for chunk in ordered {
        if selected.len() >= max_chunks {
            break;
        }
        if taken.contains(chunk.fingerprint.as_str()) || chars + chunk.content.len() > max_chars {
            continue;
        }
        taken.insert(chunk.fingerprint.as_str());
        chars += chunk.content.len();
        selected.push(chunk.clone());
    }
    selected
}

/// Grounding context with every chunk numbered from 1
pub fn build_context(repo: &Repository, selected: &[ChunkRecord]) -> String {
    let mut out = format!(
        "Repository: {}\nPrimary language: {}\nFiles: {}\n",
        repo.full_name(),
        repo.primary_language.as_deref().unwrap_or("unknown"),
        repo.total_files
    );

    let breakdown = repo.language_breakdown();
    if !breakdown.is_empty() {
        let langs: Vec<String> = breakdown
            .iter()
            .map(|(lang, stats)| format!("{} ({} files)", lang, stats.files))
            .collect();
        out.push_str(&format!("Languages: {}\n", langs.join(", ")));
    }
    let entry_points = repo.entry_points();
    if !entry_points.is_empty() {
        let paths: Vec<&str> = entry_points.iter().map(|e| e.path.as_str()).collect();
        out.push_str(&format!("Entry points: {}\n", paths.join(", ")));
    }

    out.push_str("\nSource excerpts:\n");
    for (i, chunk) in selected.iter().enumerate() {
        out.push_str(&format!(
            "\n[{}] {} lines {}-{} ({})\n```\n{}\n```\n",
            i + 1,
            chunk.file_path,
            chunk.start_line,
            chunk.end_line,
            chunk.language,
            chunk.content.trim_end()
        ));
    }
    out
}

/// Keep `[n]` markers naming a supplied chunk; strip the rest
///
/// Returns the cleaned text and the cited chunk indices (0-based) in order
/// of first appearance.
pub fn resolve_markers(text: &str, available: usize) -> Result<(String, Vec<usize>)> {
    let marker = Regex::new(r"\[(\d+)\]")?;
    let mut cited = Vec::new();
    let cleaned = marker.replace_all(text, |caps: &regex::Captures| {
        match caps[1].parse::<usize>() {
            Ok(n) if n >= 1 && n <= available => {
                if !cited.contains(&(n - 1)) {
                    cited.push(n - 1);
                }
                caps[0].to_string()
            }
            _ => String::new(),
        }
    });
    Ok((cleaned.into_owned(), cited))
}

/// Final markdown and citations for one generated document
pub fn render_document(raw: &str, selected: &[ChunkRecord]) -> Result<(String, Vec<Citation>)> {
    let (body, cited) = resolve_markers(raw.trim(), selected.len())?;
    let citations: Vec<Citation> = cited.iter().map(|&i| Citation::from(&selected[i])).collect();

    let mut markdown = String::new();
    if citations.is_empty() {
        markdown.push_str(
            "> **Note:** this document cites no source excerpts; treat it as unverified.\n\n",
        );
    }
    markdown.push_str(&body);
    markdown.push_str("\n\n## References\n\n");
    if citations.is_empty() {
        for (i, chunk) in selected.iter().enumerate() {
            markdown.push_str(&format!(
                "- [{}] `{}` lines {}-{} (provided, not cited)\n",
                i + 1,
                chunk.file_path,
                chunk.start_line,
                chunk.end_line
            ));
        }
    } else {
        for &i in &cited {
            let chunk = &selected[i];
            markdown.push_str(&format!(
                "- [{}] `{}` lines {}-{}\n",
                i + 1,
                chunk.file_path,
                chunk.start_line,
                chunk.end_line
            ));
        }
    }
    Ok((markdown, citations))
}

/// GENERATE_DOCS stage: write every document type
pub async fn run_stage(ctx: &StageContext, job: &Job, progress: &JobProgress) -> Result<()> {
    let repo = ctx.db.require_repository(&job.repository_id).await?;
    let chunks = ctx.db.list_live_chunks(&repo.id).await?;
    if chunks.is_empty() {
        return Err(Error::Validation(format!(
            "{} has no chunks to document",
            repo.full_name()
        )));
    }

    let selected = select_context(
        &repo,
        &chunks,
        ctx.config.docs.max_context_chunks,
        ctx.config.docs.max_context_chars,
    );
    let context = build_context(&repo, &selected);
    let backoff = ctx.backoff();

    let mut generated = Vec::new();
    for (i, doc_type) in DocType::ALL.into_iter().enumerate() {
        progress.ensure_active().await?;
        let raw = complete_with_retry(
            ctx.caps.llm.as_ref(),
            backoff,
            ctx.config.llm.max_retries,
            &context,
            doc_type.instructions(),
        )
        .await?;

        let (markdown, citations) = render_document(&raw, &selected)?;
        if citations.is_empty() {
            warn!(repo_id = %repo.id, %doc_type, "Generated document has no citations");
        }
        generated.push(GeneratedDocument::new(
            repo.id.clone(),
            doc_type.to_string(),
            markdown,
            serde_json::to_string(&citations)?,
            repo.commit_hash.clone(),
        ));
        progress.report((40 * (i + 1)) as u8).await;
    }

    // Both documents are written only once both exist
    progress.ensure_active().await?;
    ctx.db.upsert_documents(&generated).await?;
    progress.report(95).await;

    info!(
        repo_id = %repo.id,
        job_id = %job.id,
        context_chunks = selected.len(),
        "Generated documentation"
    );
    Ok(())
}

/// A stored document with parsed citations
#[derive(Debug, Clone, Serialize)]
pub struct DocumentView {
    pub doc_type: String,
    pub markdown: String,
    pub citations: Vec<Citation>,
    pub commit_hash: Option<String>,
    pub generated_at: String,
}

/// Read a generated document; requires DOCS_GENERATED
pub async fn read(db: &MetaDb, repository_id: &str, doc_type: DocType) -> Result<DocumentView> {
    let repo = db.require_repository(repository_id).await?;
    require_reached(
        &repo.full_name(),
        repo.get_status()?,
        repo.last_good(),
        RepoStatus::DocsGenerated,
    )?;

    let doc = db
        .get_document(&repo.id, &doc_type.to_string())
        .await?
        .ok_or_else(|| Error::DocumentNotFound(format!("{} for {}", doc_type, repo.full_name())))?;
    Ok(DocumentView {
        citations: serde_json::from_str(&doc.citations_json)?,
        doc_type: doc.doc_type,
        markdown: doc.markdown,
        commit_hash: doc.commit_hash,
        generated_at: doc.generated_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::structure::{EntryPoint, LanguageStats};
    use std::collections::BTreeMap;

    fn chunk(path: &str, start: i64, language: &str, content: &str) -> ChunkRecord {
        ChunkRecord {
            fingerprint: format!("{}#{}", path, start),
            repository_id: "r".to_string(),
            commit_hash: "c".to_string(),
            file_path: path.to_string(),
            start_line: start,
            end_line: start + 9,
            start_byte: 0,
            end_byte: content.len() as i64,
            language: language.to_string(),
            symbol: None,
            content: content.to_string(),
            live: true,
            structure_pass: "p".to_string(),
            created_at: String::new(),
        }
    }

    fn repo() -> Repository {
        let mut repo = Repository::new(
            "acme".into(),
            "widget".into(),
            "https://github.com/acme/widget".into(),
            None,
        );
        let mut breakdown = BTreeMap::new();
        breakdown.insert("python".to_string(), LanguageStats { files: 3, bytes: 900 });
        breakdown.insert("rust".to_string(), LanguageStats { files: 1, bytes: 200 });
        repo.language_breakdown_json = Some(serde_json::to_string(&breakdown).unwrap());
        let entry = vec![EntryPoint {
            path: "src/main.rs".to_string(),
            kind: "main".to_string(),
            confidence: 0.9,
            reason: "main function".to_string(),
        }];
        repo.entry_points_json = Some(serde_json::to_string(&entry).unwrap());
        repo
    }

    #[test]
    fn test_doc_type_names() {
        assert_eq!("readme".parse::<DocType>().unwrap(), DocType::Readme);
        assert_eq!(DocType::Architecture.to_string(), "ARCHITECTURE");
        assert!("changelog".parse::<DocType>().is_err());
    }

    #[test]
    fn test_select_context_prefers_entry_points_and_overview() {
        let chunks = vec![
            chunk("README.md", 1, "markdown", "# widget"),
            chunk("config/parser.py", 1, "python", "def parse_config(): pass"),
            chunk("config/parser.py", 11, "python", "def helper(): pass"),
            chunk("lib/util.py", 1, "python", "def util(): pass"),
            chunk("src/main.rs", 1, "rust", "fn main() {}"),
        ];

        let selected = select_context(&repo(), &chunks, 3, 10_000);
        let paths: Vec<&str> = selected.iter().map(|c| c.file_path.as_str()).collect();
        assert_eq!(paths, vec!["src/main.rs", "README.md", "config/parser.py"]);
        assert_eq!(selected[2].start_line, 1);

        let tight = select_context(&repo(), &chunks, 10, 15);
        assert!(tight.iter().map(|c| c.content.len()).sum::<usize>() <= 15);
    }

    #[test]
    fn test_markers_are_validated() {
        let (text, cited) = resolve_markers("Parses config [2]. Starts [9]. Again [2][1].", 2).unwrap();
        assert_eq!(text, "Parses config [2]. Starts . Again [2][1].");
        assert_eq!(cited, vec![1, 0]);
    }

    #[test]
    fn test_render_lists_references() {
        let selected = vec![
            chunk("src/main.rs", 1, "rust", "fn main() {}"),
            chunk("config/parser.py", 1, "python", "def parse_config(): pass"),
        ];
        let (markdown, citations) = render_document("Config is parsed in Python [2].", &selected).unwrap();
        assert_eq!(citations.len(), 1);
        assert_eq!(citations[0].file_path, "config/parser.py");
        assert!(markdown.contains("## References"));
        assert!(markdown.contains("- [2] `config/parser.py` lines 1-10"));
        assert!(!markdown.contains("unverified"));

        let (uncited, none) = render_document("A widget.", &selected).unwrap();
        assert!(none.is_empty());
        assert!(uncited.starts_with("> **Note:**"));
        assert!(uncited.contains("(provided, not cited)"));
    }
}
