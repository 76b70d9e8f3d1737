//! Job engine
//!
//! Pipeline stages run as durable jobs. A job is claimed by one worker,
//! executed with a per-kind timeout, and finished in a single transaction
//! that also advances (or fails) the repository and appends events.

mod engine;
mod handlers;
mod status;

#[cfg(test)]
pub(crate) mod fakes;

pub use engine::*;
pub use handlers::*;
pub use status::*;

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Pipeline stage a job executes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobKind {
    Clone,
    Structure,
    Index,
    GenerateDocs,
}

impl JobKind {
    pub const ALL: [JobKind; 4] = [
        JobKind::Clone,
        JobKind::Structure,
        JobKind::Index,
        JobKind::GenerateDocs,
    ];

    /// Stage submitted after this one when auto-advance is on
    pub fn next(self) -> Option<JobKind> {
        match self {
            JobKind::Clone => Some(JobKind::Structure),
            JobKind::Structure => Some(JobKind::Index),
            JobKind::Index => Some(JobKind::GenerateDocs),
            JobKind::GenerateDocs => None,
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobKind::Clone => "CLONE",
            JobKind::Structure => "STRUCTURE",
            JobKind::Index => "INDEX",
            JobKind::GenerateDocs => "GENERATE_DOCS",
        };
        f.write_str(s)
    }
}

impl FromStr for JobKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().replace('-', "_").as_str() {
            "CLONE" => Ok(JobKind::Clone),
            "STRUCTURE" => Ok(JobKind::Structure),
            "INDEX" => Ok(JobKind::Index),
            "GENERATE_DOCS" | "DOCS" => Ok(JobKind::GenerateDocs),
            _ => Err(Error::Validation(format!("Unknown job kind: {}", s))),
        }
    }
}

/// Job execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
}

impl JobStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, JobStatus::Succeeded | JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JobStatus::Pending => "pending",
            JobStatus::Running => "running",
            JobStatus::Succeeded => "succeeded",
            JobStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

impl FromStr for JobStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_lowercase().as_str() {
            "pending" => Ok(JobStatus::Pending),
            "running" => Ok(JobStatus::Running),
            "succeeded" => Ok(JobStatus::Succeeded),
            "failed" => Ok(JobStatus::Failed),
            _ => Err(Error::Validation(format!("Unknown job status: {}", s))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_names() {
        for kind in JobKind::ALL {
            assert_eq!(kind.to_string().parse::<JobKind>().unwrap(), kind);
        }
        assert_eq!("docs".parse::<JobKind>().unwrap(), JobKind::GenerateDocs);
        assert_eq!("generate-docs".parse::<JobKind>().unwrap(), JobKind::GenerateDocs);
        assert!("DEPLOY".parse::<JobKind>().is_err());
    }

    #[test]
    fn test_stage_order() {
        assert_eq!(JobKind::Clone.next(), Some(JobKind::Structure));
        assert_eq!(JobKind::Index.next(), Some(JobKind::GenerateDocs));
        assert_eq!(JobKind::GenerateDocs.next(), None);
    }

    #[test]
    fn test_status_terminality() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::Running.is_terminal());
        assert!(JobStatus::Failed.is_terminal());
        assert_eq!("running".parse::<JobStatus>().unwrap(), JobStatus::Running);
    }
}
