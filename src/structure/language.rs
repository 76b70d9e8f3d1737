//! Language classification and built-in skip rules

use std::path::Path;

/// Language of a file, by well-known file name first and extension second
pub fn detect_language(path: &Path) -> Option<&'static str> {
    let name = path.file_name().and_then(|n| n.to_str())?;

    let by_name = match name {
        "Makefile" | "makefile" | "GNUmakefile" => Some("make"),
        "Dockerfile" | "Containerfile" => Some("dockerfile"),
        "CMakeLists.txt" => Some("cmake"),
        "Gemfile" | "Rakefile" | "Vagrantfile" => Some("ruby"),
        "Jenkinsfile" => Some("groovy"),
        "Procfile" => Some("text"),
        _ => None,
    };
    if by_name.is_some() {
        return by_name;
    }

    let ext = path.extension().and_then(|e| e.to_str())?.to_lowercase();
    let lang = match ext.as_str() {
        "rs" => "rust",
        "py" | "pyi" => "python",
        "js" | "jsx" | "mjs" | "cjs" => "javascript",
        "ts" | "tsx" | "mts" | "cts" => "typescript",
        "go" => "go",
        "java" => "java",
        "kt" | "kts" => "kotlin",
        "scala" => "scala",
        "rb" => "ruby",
        "php" => "php",
        "c" | "h" => "c",
        "cc" | "cpp" | "cxx" | "hpp" | "hh" | "hxx" => "cpp",
        "cs" => "csharp",
        "swift" => "swift",
        "m" | "mm" => "objective-c",
        "r" => "r",
        "lua" => "lua",
        "ex" | "exs" => "elixir",
        "erl" | "hrl" => "erlang",
        "hs" => "haskell",
        "ml" | "mli" => "ocaml",
        "clj" | "cljs" => "clojure",
        "dart" => "dart",
        "zig" => "zig",
        "sql" => "sql",
        "sh" | "bash" => "bash",
        "zsh" => "zsh",
        "ps1" => "powershell",
        "proto" => "protobuf",
        "graphql" | "gql" => "graphql",
        "html" | "htm" => "html",
        "css" | "scss" | "sass" | "less" => "css",
        "vue" => "vue",
        "svelte" => "svelte",
        "md" | "markdown" => "markdown",
        "rst" => "rst",
        "txt" => "text",
        "json" => "json",
        "yaml" | "yml" => "yaml",
        "toml" => "toml",
        "xml" => "xml",
        "ini" | "cfg" => "ini",
        "gradle" => "groovy",
        "tf" => "terraform",
        _ => return None,
    };
    Some(lang)
}

/// Languages that describe data or prose rather than program logic
pub fn is_markup_or_data(language: &str) -> bool {
    matches!(
        language,
        "markdown" | "rst" | "text" | "json" | "yaml" | "toml" | "xml" | "ini" | "html" | "css"
    )
}

/// Directories never descended into
pub fn is_skipped_dir(name: &str) -> bool {
    matches!(
        name,
        ".git"
            | ".hg"
            | ".svn"
            | "node_modules"
            | "bower_components"
            | "__pycache__"
            | ".venv"
            | "venv"
            | ".tox"
            | ".mypy_cache"
            | ".pytest_cache"
            | ".gradle"
            | ".idea"
            | ".vscode"
            | "target"
            | "dist"
            | "vendor"
    )
}

const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "bmp", "ico", "webp", "svg", "pdf", "zip", "gz", "tgz", "bz2",
    "xz", "7z", "tar", "jar", "war", "whl", "egg", "so", "dll", "dylib", "exe", "bin", "o", "a",
    "lib", "class", "pyc", "pyo", "wasm", "woff", "woff2", "ttf", "otf", "eot", "mp3", "mp4",
    "mov", "avi", "wav", "ogg", "sqlite", "db", "parquet",
];

const LOCK_FILES: &[&str] = &[
    "package-lock.json",
    "yarn.lock",
    "pnpm-lock.yaml",
    "Cargo.lock",
    "poetry.lock",
    "Pipfile.lock",
    "composer.lock",
    "Gemfile.lock",
    "go.sum",
];

/// Lock files, minified bundles, source maps and binaries
pub fn is_skipped_file(path: &Path) -> bool {
    let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
    if LOCK_FILES.contains(&name) || name.ends_with(".lock") {
        return true;
    }

    let lowered = name.to_lowercase();
    if lowered.contains(".min.") || lowered.ends_with(".map") || lowered.contains(".bundle.") {
        return true;
    }

    path.extension()
        .and_then(|e| e.to_str())
        .map(|e| BINARY_EXTENSIONS.contains(&e.to_lowercase().as_str()))
        .unwrap_or(false)
}

/// NUL bytes in the leading sample mark a file as binary
pub fn looks_binary(bytes: &[u8]) -> bool {
    bytes.iter().take(8192).any(|&b| b == 0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_by_extension_and_name() {
        assert_eq!(detect_language(Path::new("src/main.rs")), Some("rust"));
        assert_eq!(detect_language(Path::new("config/parser.py")), Some("python"));
        assert_eq!(detect_language(Path::new("web/App.TSX")), Some("typescript"));
        assert_eq!(detect_language(Path::new("Makefile")), Some("make"));
        assert_eq!(detect_language(Path::new("docker/Dockerfile")), Some("dockerfile"));
        assert_eq!(detect_language(Path::new("LICENSE")), None);
    }

    #[test]
    fn test_skip_rules() {
        assert!(is_skipped_file(Path::new("Cargo.lock")));
        assert!(is_skipped_file(Path::new("static/app.min.js")));
        assert!(is_skipped_file(Path::new("img/logo.PNG")));
        assert!(!is_skipped_file(Path::new("src/lib.rs")));
        assert!(is_skipped_dir("node_modules"));
        assert!(!is_skipped_dir("src"));
    }

    #[test]
    fn test_binary_sniff() {
        assert!(looks_binary(b"\x7fELF\x00\x01"));
        assert!(!looks_binary(b"fn main() {}\n"));
    }
}
