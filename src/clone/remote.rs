//! Repository URL parsing and canonicalization

use crate::error::{Error, Result};
use std::path::Path;
use url::Url;

/// A parsed repository location
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoUrl {
    pub owner: String,
    pub name: String,
    /// Canonical form used as the repository's identity
    pub canonical: String,
}

fn strip_git_suffix(name: &str) -> &str {
    name.strip_suffix(".git").unwrap_or(name)
}

fn hosted(host: &str, path: &str, input: &str) -> Result<RepoUrl> {
    let segments: Vec<&str> = path
        .trim_matches('/')
        .split('/')
        .filter(|s| !s.is_empty())
        .collect();
    if segments.len() < 2 {
        return Err(Error::InvalidRepoUrl(format!(
            "{} (expected <host>/<owner>/<name>)",
            input
        )));
    }

    let name = strip_git_suffix(segments[segments.len() - 1]);
    let owner_path = segments[..segments.len() - 1].join("/");
    if name.is_empty() {
        return Err(Error::InvalidRepoUrl(input.to_string()));
    }

    Ok(RepoUrl {
        canonical: format!("https://{}/{}/{}", host.to_lowercase(), owner_path, name),
        owner: owner_path,
        name: name.to_string(),
    })
}

/// Parse `https://host/owner/name[.git]`, `git@host:owner/name.git`,
/// `ssh://git@host/owner/name.git`, `file:///path/to/name` or an absolute
/// local path
pub fn parse_repo_url(input: &str) -> Result<RepoUrl> {
    let trimmed = input.trim().trim_end_matches('/');
    if trimmed.is_empty() {
        return Err(Error::InvalidRepoUrl("empty URL".to_string()));
    }

    if let Some(rest) = trimmed.strip_prefix("git@") {
        let (host, path) = rest
            .split_once(':')
            .ok_or_else(|| Error::InvalidRepoUrl(input.to_string()))?;
        return hosted(host, path, input);
    }

    if Path::new(trimmed).is_absolute() && !trimmed.contains("://") {
        let url = Url::from_file_path(trimmed)
            .map_err(|_| Error::InvalidRepoUrl(input.to_string()))?;
        return parse_repo_url(url.as_str());
    }

    let url = Url::parse(trimmed).map_err(|e| Error::InvalidRepoUrl(format!("{}: {}", input, e)))?;
    match url.scheme() {
        "https" | "http" | "ssh" | "git" => {
            let host = url
                .host_str()
                .ok_or_else(|| Error::InvalidRepoUrl(input.to_string()))?;
            hosted(host, url.path(), input)
        }
        "file" => {
            let path = url
                .to_file_path()
                .map_err(|_| Error::InvalidRepoUrl(input.to_string()))?;
            let name = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(strip_git_suffix)
                .filter(|n| !n.is_empty())
                .ok_or_else(|| Error::InvalidRepoUrl(input.to_string()))?;
            let owner = path
                .parent()
                .and_then(|p| p.file_name())
                .and_then(|n| n.to_str())
                .unwrap_or("local");
            Ok(RepoUrl {
                owner: owner.to_string(),
                name: name.to_string(),
                canonical: url.as_str().trim_end_matches('/').to_string(),
            })
        }
        other => Err(Error::InvalidRepoUrl(format!(
            "{} (unsupported scheme '{}')",
            input, other
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_forms_share_canonical_url() {
        for input in [
            "https://github.com/acme/widget",
            "https://github.com/acme/widget/",
            "https://github.com/acme/widget.git",
            "https://GitHub.com/acme/widget",
            "git@github.com:acme/widget.git",
            "ssh://git@github.com/acme/widget.git",
        ] {
            let parsed = parse_repo_url(input).unwrap();
            assert_eq!(parsed.canonical, "https://github.com/acme/widget", "{}", input);
            assert_eq!(parsed.owner, "acme");
            assert_eq!(parsed.name, "widget");
        }
    }

    #[test]
    fn test_nested_owner_path() {
        let parsed = parse_repo_url("https://gitlab.com/group/sub/project").unwrap();
        assert_eq!(parsed.owner, "group/sub");
        assert_eq!(parsed.name, "project");
    }

    #[test]
    fn test_local_paths() {
        let parsed = parse_repo_url("file:///srv/git/acme/widget.git").unwrap();
        assert_eq!(parsed.owner, "acme");
        assert_eq!(parsed.name, "widget");
        assert_eq!(parsed.canonical, "file:///srv/git/acme/widget.git");

        let bare = parse_repo_url("/srv/git/acme/widget").unwrap();
        assert_eq!(bare.canonical, "file:///srv/git/acme/widget");
    }

    #[test]
    fn test_rejects_invalid() {
        assert!(parse_repo_url("").is_err());
        assert!(parse_repo_url("https://github.com/acme").is_err());
        assert!(parse_repo_url("ftp://example.com/a/b").is_err());
        assert!(parse_repo_url("not a url").is_err());
    }
}
