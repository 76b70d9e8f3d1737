//! Entry point detection

use super::walker::SourceFile;
use super::EntryPoint;
use std::collections::HashSet;

const MAX_ENTRY_POINTS: usize = 10;

/// (path, kind, confidence, reason); a path without `/` matches at the root only
fn patterns_for(language: &str) -> &'static [(&'static str, &'static str, f32, &'static str)] {
    match language {
        "python" => &[
            ("__main__.py", "main", 0.95, "Python package entry point"),
            ("main.py", "main", 0.9, "Common Python entry point"),
            ("app.py", "app", 0.85, "Web application module"),
            ("manage.py", "cli", 0.8, "Django management script"),
            ("cli.py", "cli", 0.8, "CLI entry point"),
            ("run.py", "main", 0.75, "Run script"),
            ("setup.py", "setup", 0.7, "Package setup script"),
        ],
        "javascript" => &[
            ("src/index.js", "main", 0.9, "Source entry point"),
            ("index.js", "main", 0.85, "Node.js entry point"),
            ("app.js", "app", 0.85, "Express application"),
            ("server.js", "server", 0.85, "Server entry point"),
            ("main.js", "main", 0.8, "Main entry point"),
        ],
        "typescript" => &[
            ("src/index.ts", "main", 0.9, "Source entry point"),
            ("index.ts", "main", 0.85, "TypeScript entry point"),
            ("app.ts", "app", 0.85, "Application entry point"),
            ("main.ts", "main", 0.8, "Main entry point"),
        ],
        "go" => &[
            ("main.go", "main", 0.95, "Go main package"),
            ("cmd/main.go", "main", 0.9, "Command entry point"),
        ],
        "rust" => &[
            ("src/main.rs", "main", 0.95, "Rust binary entry point"),
            ("src/lib.rs", "lib", 0.85, "Rust library root"),
        ],
        "java" => &[
            ("Application.java", "app", 0.85, "Spring application"),
            ("Main.java", "main", 0.8, "Java main class"),
            ("App.java", "main", 0.8, "Application class"),
        ],
        _ => &[],
    }
}

const COMMON: &[(&str, &str, f32, &str)] = &[
    ("Makefile", "build", 0.6, "Build entry point"),
    ("Dockerfile", "container", 0.6, "Container entry point"),
    ("README.md", "readme", 0.5, "Documentation entry point"),
];

/// Main guards found in file content, for files not matched by name
fn main_guard(file: &SourceFile) -> Option<(&'static str, f32, &'static str)> {
    match file.language? {
        "python"
            if file.content.contains("if __name__ == \"__main__\"")
                || file.content.contains("if __name__ == '__main__'") =>
        {
            Some(("main", 0.85, "Contains a __main__ guard"))
        }
        "rust" if file.content.contains("fn main()") => {
            Some(("main", 0.8, "Defines fn main"))
        }
        "go" if file.content.contains("package main") && file.content.contains("func main()") => {
            Some(("main", 0.8, "Defines func main in package main"))
        }
        _ => None,
    }
}

/// Probable entry points, highest confidence first
pub fn detect_entry_points(files: &[SourceFile], primary_language: Option<&str>) -> Vec<EntryPoint> {
    let paths: HashSet<&str> = files.iter().map(|f| f.relative_path.as_str()).collect();
    let mut found: Vec<EntryPoint> = Vec::new();

    let language_patterns = primary_language.map(patterns_for).unwrap_or(&[]);
    for (path, kind, confidence, reason) in language_patterns.iter().chain(COMMON) {
        if paths.contains(path) {
            found.push(EntryPoint {
                path: path.to_string(),
                kind: kind.to_string(),
                confidence: *confidence,
                reason: reason.to_string(),
            });
        }
    }

    for file in files {
        if let Some((kind, confidence, reason)) = main_guard(file) {
            found.push(EntryPoint {
                path: file.relative_path.clone(),
                kind: kind.to_string(),
                confidence,
                reason: reason.to_string(),
            });
        }
    }

    found.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.path.cmp(&b.path))
    });

    let mut seen = HashSet::new();
    found.retain(|ep| seen.insert(ep.path.clone()));
    found.truncate(MAX_ENTRY_POINTS);
    found
}

#[cfg(test)]
mod tests {
    use super::*;

    fn file(path: &str, language: Option<&'static str>, content: &str) -> SourceFile {
        SourceFile {
            relative_path: path.to_string(),
            language,
            size_bytes: content.len() as u64,
            content: content.to_string(),
        }
    }

    #[test]
    fn test_detects_by_name_and_guard() {
        let files = vec![
            file("README.md", Some("markdown"), "# widget"),
            file("main.py", Some("python"), "print('x')"),
            file(
                "tools/gen.py",
                Some("python"),
                "if __name__ == \"__main__\":\n    run()\n",
            ),
        ];
        let eps = detect_entry_points(&files, Some("python"));
        let paths: Vec<&str> = eps.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(paths, vec!["main.py", "tools/gen.py", "README.md"]);
    }

    #[test]
    fn test_duplicates_keep_highest_confidence() {
        let files = vec![file("src/main.rs", Some("rust"), "fn main() {}")];
        let eps = detect_entry_points(&files, Some("rust"));
        assert_eq!(eps.len(), 1);
        assert_eq!(eps[0].confidence, 0.95);
    }
}
