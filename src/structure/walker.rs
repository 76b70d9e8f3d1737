//! Working tree discovery honouring gitignore and configured patterns

use super::language::{detect_language, is_skipped_dir, is_skipped_file, looks_binary};
use crate::config::ChunkConfig;
use crate::error::Result;
use globset::{Glob, GlobSet, GlobSetBuilder};
use ignore::WalkBuilder;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// A text file selected for structuring
#[derive(Debug, Clone)]
pub struct SourceFile {
    /// Forward-slash path relative to the tree root
    pub relative_path: String,
    pub language: Option<&'static str>,
    pub size_bytes: u64,
    pub content: String,
}

#[derive(Debug, Default)]
pub struct WalkOutcome {
    /// Sorted by relative path
    pub files: Vec<SourceFile>,
    /// Oversized, binary or undecodable files
    pub skipped: usize,
    /// Files dropped beyond `chunk.max_files`
    pub truncated: usize,
}

fn build_ignore_set(patterns: &[String]) -> Result<GlobSet> {
    let mut builder = GlobSetBuilder::new();
    for pattern in patterns {
        builder.add(Glob::new(pattern)?);
    }
    Ok(builder.build()?)
}

fn relative(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = rel
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Collect candidate files under `root`
pub fn walk_tree(root: &Path, config: &ChunkConfig) -> Result<WalkOutcome> {
    let ignore_set = build_ignore_set(&config.ignore_patterns)?;
    let filter_set = ignore_set.clone();
    let filter_root: PathBuf = root.to_path_buf();

    let mut builder = WalkBuilder::new(root);
    builder
        .hidden(false)
        .git_ignore(true)
        .git_exclude(true)
        .git_global(false)
        .require_git(false)
        .parents(false)
        .follow_links(false)
        .filter_entry(move |entry| {
            let is_dir = entry.file_type().map(|t| t.is_dir()).unwrap_or(false);
            if is_dir {
                let name = entry.file_name().to_string_lossy();
                if is_skipped_dir(&name) {
                    return false;
                }
            }
            match relative(&filter_root, entry.path()) {
                Some(rel) => !filter_set.is_match(&rel),
                None => true,
            }
        });

    let mut candidates: Vec<(String, PathBuf, u64)> = Vec::new();
    let mut skipped = 0usize;

    for entry in builder.build() {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                debug!(error = %e, "Skipping unreadable entry");
                continue;
            }
        };
        if !entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
            continue;
        }

        let path = entry.path();
        let Some(rel) = relative(root, path) else {
            continue;
        };
        if is_skipped_file(path) || ignore_set.is_match(&rel) {
            continue;
        }

        let size = entry.metadata().map(|m| m.len()).unwrap_or(0);
        if size > config.max_file_bytes {
            debug!(path = %rel, size, "Skipping oversized file");
            skipped += 1;
            continue;
        }
        candidates.push((rel, path.to_path_buf(), size));
    }

    candidates.sort_by(|a, b| a.0.cmp(&b.0));

    let truncated = candidates.len().saturating_sub(config.max_files);
    if truncated > 0 {
        warn!(
            limit = config.max_files,
            dropped = truncated,
            "File limit reached; remaining files are not structured"
        );
        candidates.truncate(config.max_files);
    }

    let mut files = Vec::with_capacity(candidates.len());
    for (rel, path, size) in candidates {
        let bytes = match std::fs::read(&path) {
            Ok(b) => b,
            Err(e) => {
                debug!(path = %rel, error = %e, "Skipping unreadable file");
                skipped += 1;
                continue;
            }
        };
        if looks_binary(&bytes) {
            skipped += 1;
            continue;
        }
        let content = match String::from_utf8(bytes) {
            Ok(s) => s,
            Err(_) => {
                debug!(path = %rel, "Skipping non UTF-8 file");
                skipped += 1;
                continue;
            }
        };

        files.push(SourceFile {
            language: detect_language(&path),
            relative_path: rel,
            size_bytes: size,
            content,
        });
    }

    Ok(WalkOutcome {
        files,
        skipped,
        truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write(root: &Path, rel: &str, content: &[u8]) {
        let path = root.join(rel);
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(path, content).unwrap();
    }

    #[test]
    fn test_walk_honours_ignores() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, ".gitignore", b"generated/\n");
        write(root, "src/main.rs", b"fn main() {}\n");
        write(root, "generated/out.rs", b"fn x() {}\n");
        write(root, "node_modules/pkg/index.js", b"module.exports = 1;\n");
        write(root, "docs/notes.tmp", b"scratch\n");
        write(root, "Cargo.lock", b"# lock\n");
        write(root, "logo.bin", b"\x00\x01\x02");

        let config = ChunkConfig {
            ignore_patterns: vec!["*.tmp".to_string()],
            ..ChunkConfig::default()
        };
        let outcome = walk_tree(root, &config).unwrap();
        let paths: Vec<&str> = outcome.files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec![".gitignore", "src/main.rs"]);
        assert_eq!(outcome.files[1].language, Some("rust"));
    }

    #[test]
    fn test_binary_and_oversized_are_skipped() {
        let tmp = TempDir::new().unwrap();
        let root = tmp.path();
        write(root, "data.txt", b"abc\x00def");
        write(root, "big.py", &vec![b'a'; 2048]);
        write(root, "ok.py", b"print('hi')\n");

        let config = ChunkConfig {
            max_file_bytes: 1024,
            ..ChunkConfig::default()
        };
        let outcome = walk_tree(root, &config).unwrap();
        assert_eq!(outcome.files.len(), 1);
        assert_eq!(outcome.files[0].relative_path, "ok.py");
        assert_eq!(outcome.skipped, 2);
    }

    #[test]
    fn test_max_files_truncates_in_path_order() {
        let tmp = TempDir::new().unwrap();
        for name in ["c.rs", "a.rs", "b.rs"] {
            write(tmp.path(), name, b"fn f() {}\n");
        }
        let config = ChunkConfig {
            max_files: 2,
            ..ChunkConfig::default()
        };
        let outcome = walk_tree(tmp.path(), &config).unwrap();
        let paths: Vec<&str> = outcome.files.iter().map(|f| f.relative_path.as_str()).collect();
        assert_eq!(paths, vec!["a.rs", "b.rs"]);
        assert_eq!(outcome.truncated, 1);
    }
}
