//! Error types for repointel

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Main error type for pipeline operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] url::ParseError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Git error: {0}")]
    Git(#[from] git2::Error),

    #[error("Invalid file pattern: {0}")]
    Glob(#[from] globset::Error),

    #[error("Invalid regular expression: {0}")]
    Regex(#[from] regex::Error),

    #[error("Invalid repository URL: {0}")]
    InvalidRepoUrl(String),

    #[error("{0}")]
    Validation(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Repository not found: {0}")]
    RepoNotFound(String),

    #[error("Job not found: {0}")]
    JobNotFound(String),

    #[error("Session not found: {0}")]
    SessionNotFound(String),

    #[error("Document not found: {0}")]
    DocumentNotFound(String),

    #[error("Repository {repository} is {current}; this operation requires {required}")]
    NotReady {
        repository: String,
        current: String,
        required: String,
    },

    #[error("Repository too large: {0}")]
    RepoTooLarge(String),

    #[error("Remote repository not found: {0}")]
    RemoteNotFound(String),

    #[error("Authentication required: {0}")]
    AuthRequired(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Content policy violation: {0}")]
    ContentPolicy(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("{0}")]
    Cancelled(String),

    #[error("{0}")]
    Grounding(String),

    #[error("{0}")]
    Other(String),
}

/// Classified error kinds recorded on jobs and repositories
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Validation,
    Conflict,
    TransientInfra,
    NotIndexed,
    NotFound,
    GroundingFailure,
    Cancelled,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// Whether a job failing with this kind may be attempted again
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::TransientInfra | ErrorKind::Timeout)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ErrorKind::Validation => "Validation",
            ErrorKind::Conflict => "Conflict",
            ErrorKind::TransientInfra => "TransientInfra",
            ErrorKind::NotIndexed => "NotIndexed",
            ErrorKind::NotFound => "NotFound",
            ErrorKind::GroundingFailure => "GroundingFailure",
            ErrorKind::Cancelled => "Cancelled",
            ErrorKind::Timeout => "Timeout",
            ErrorKind::Internal => "Internal",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ErrorKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "Validation" => Ok(ErrorKind::Validation),
            "Conflict" => Ok(ErrorKind::Conflict),
            "TransientInfra" => Ok(ErrorKind::TransientInfra),
            "NotIndexed" => Ok(ErrorKind::NotIndexed),
            "NotFound" => Ok(ErrorKind::NotFound),
            "GroundingFailure" => Ok(ErrorKind::GroundingFailure),
            "Cancelled" => Ok(ErrorKind::Cancelled),
            "Timeout" => Ok(ErrorKind::Timeout),
            "Internal" => Ok(ErrorKind::Internal),
            _ => Err(Error::Config(format!("Unknown error kind: {}", s))),
        }
    }
}

impl Error {
    /// Classify this error into the pipeline taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Config(_)
            | Error::InvalidRepoUrl(_)
            | Error::UrlParse(_)
            | Error::Glob(_)
            | Error::Validation(_)
            | Error::RepoTooLarge(_)
            | Error::AuthRequired(_)
            | Error::InvalidInput(_)
            | Error::ContentPolicy(_) => ErrorKind::Validation,
            Error::Conflict(_) => ErrorKind::Conflict,
            Error::RepoNotFound(_)
            | Error::JobNotFound(_)
            | Error::SessionNotFound(_)
            | Error::DocumentNotFound(_)
            | Error::RemoteNotFound(_) => ErrorKind::NotFound,
            Error::NotReady { .. } => ErrorKind::NotIndexed,
            Error::Network(_) | Error::RateLimited(_) => ErrorKind::TransientInfra,
            Error::Timeout(_) => ErrorKind::Timeout,
            Error::Cancelled(_) => ErrorKind::Cancelled,
            Error::Grounding(_) => ErrorKind::GroundingFailure,
            Error::Http(e) => {
                if e.is_timeout() {
                    ErrorKind::Timeout
                } else if e.is_connect() || e.is_request() {
                    ErrorKind::TransientInfra
                } else {
                    match e.status() {
                        Some(s) if s.as_u16() == 429 || s.is_server_error() => {
                            ErrorKind::TransientInfra
                        }
                        Some(_) => ErrorKind::Validation,
                        None => ErrorKind::TransientInfra,
                    }
                }
            }
            Error::Database(e) => match e {
                sqlx::Error::PoolTimedOut | sqlx::Error::Io(_) => ErrorKind::TransientInfra,
                _ => ErrorKind::Internal,
            },
            Error::Io(_)
            | Error::Json(_)
            | Error::TomlParse(_)
            | Error::TomlSerialize(_)
            | Error::Git(_)
            | Error::Regex(_)
            | Error::Other(_) => ErrorKind::Internal,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Human readable form stored in `last_error`
    pub fn describe(&self) -> String {
        format!("{}: {}", self.kind(), self)
    }

    /// Map a non-success HTTP status from a model backend onto a capability error
    pub fn from_status(service: &str, status: reqwest::StatusCode, body: &str) -> Self {
        let detail = format!("{} returned {}: {}", service, status, truncate(body, 300));
        match status.as_u16() {
            429 => Error::RateLimited(detail),
            401 | 403 => Error::AuthRequired(detail),
            400 | 413 | 422 => {
                let lowered = body.to_lowercase();
                if lowered.contains("content_filter") || lowered.contains("content policy") {
                    Error::ContentPolicy(detail)
                } else {
                    Error::InvalidInput(detail)
                }
            }
            404 => Error::Config(detail),
            s if s >= 500 => Error::Network(detail),
            _ => Error::Other(detail),
        }
    }
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

/// Result type alias for repointel
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_kinds() {
        assert!(Error::RateLimited("slow down".into()).is_retryable());
        assert!(Error::Network("reset".into()).is_retryable());
        assert!(Error::Timeout("index".into()).is_retryable());
        assert!(!Error::InvalidInput("bad".into()).is_retryable());
        assert!(!Error::Conflict("dup".into()).is_retryable());
        assert!(!Error::Cancelled("Cancelled by user".into()).is_retryable());
    }

    #[test]
    fn test_status_mapping() {
        let err = Error::from_status("embeddings", reqwest::StatusCode::TOO_MANY_REQUESTS, "");
        assert_eq!(err.kind(), ErrorKind::TransientInfra);

        let err = Error::from_status(
            "llm",
            reqwest::StatusCode::BAD_REQUEST,
            r#"{"error":{"code":"content_filter"}}"#,
        );
        assert!(matches!(err, Error::ContentPolicy(_)));

        let err = Error::from_status("llm", reqwest::StatusCode::BAD_GATEWAY, "upstream");
        assert!(err.is_retryable());
    }

    #[test]
    fn test_describe_prefixes_kind() {
        let err = Error::RemoteNotFound("https://github.com/acme/missing".into());
        assert!(err.describe().starts_with("NotFound: "));
    }

    #[test]
    fn test_kind_round_trip_names() {
        for kind in [ErrorKind::Validation, ErrorKind::GroundingFailure, ErrorKind::Timeout] {
            assert_eq!(kind.as_str().parse::<ErrorKind>().unwrap(), kind);
        }
    }
}
