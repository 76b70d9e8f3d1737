//! Repository lifecycle state machine
//!
//! A repository moves forward one stage at a time:
//!
//! `CREATED -> CLONED -> STRUCTURED -> INDEXED -> DOCS_GENERATED -> READY`
//!
//! `FAILED` is reachable from every other state. A forced re-ingestion may
//! re-enter `CLONED` from anywhere. Retrying a failed repository resumes from
//! the last status it held before failing.

use crate::error::{Error, Result};
use crate::jobs::JobKind;
use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// Repository lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepoStatus {
    Created,
    Cloned,
    Structured,
    Indexed,
    DocsGenerated,
    Ready,
    Failed,
}

impl std::fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RepoStatus::Created => "CREATED",
            RepoStatus::Cloned => "CLONED",
            RepoStatus::Structured => "STRUCTURED",
            RepoStatus::Indexed => "INDEXED",
            RepoStatus::DocsGenerated => "DOCS_GENERATED",
            RepoStatus::Ready => "READY",
            RepoStatus::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

impl FromStr for RepoStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_uppercase().as_str() {
            "CREATED" => Ok(RepoStatus::Created),
            "CLONED" => Ok(RepoStatus::Cloned),
            "STRUCTURED" => Ok(RepoStatus::Structured),
            "INDEXED" => Ok(RepoStatus::Indexed),
            "DOCS_GENERATED" => Ok(RepoStatus::DocsGenerated),
            "READY" => Ok(RepoStatus::Ready),
            "FAILED" => Ok(RepoStatus::Failed),
            _ => Err(Error::Config(format!("Unknown repository status: {}", s))),
        }
    }
}

impl RepoStatus {
    /// Position along the forward path; `None` for FAILED
    fn rank(self) -> Option<u8> {
        match self {
            RepoStatus::Created => Some(0),
            RepoStatus::Cloned => Some(1),
            RepoStatus::Structured => Some(2),
            RepoStatus::Indexed => Some(3),
            RepoStatus::DocsGenerated => Some(4),
            RepoStatus::Ready => Some(5),
            RepoStatus::Failed => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self == RepoStatus::Failed
    }

    /// The status that directly follows this one on the forward path
    pub fn next(self) -> Option<RepoStatus> {
        match self {
            RepoStatus::Created => Some(RepoStatus::Cloned),
            RepoStatus::Cloned => Some(RepoStatus::Structured),
            RepoStatus::Structured => Some(RepoStatus::Indexed),
            RepoStatus::Indexed => Some(RepoStatus::DocsGenerated),
            RepoStatus::DocsGenerated => Some(RepoStatus::Ready),
            RepoStatus::Ready | RepoStatus::Failed => None,
        }
    }

    /// True when this status is at or past `required` on the forward path
    pub fn has_reached(self, required: RepoStatus) -> bool {
        match (self.rank(), required.rank()) {
            (Some(have), Some(need)) => have >= need,
            _ => false,
        }
    }

    /// Whether the edge `self -> to` exists
    ///
    /// FAILED only leaves through a forced re-clone; resuming a failed
    /// repository validates against its effective status instead.
    pub fn can_transition(self, to: RepoStatus) -> bool {
        if to == RepoStatus::Failed {
            return self != RepoStatus::Failed;
        }
        if to == RepoStatus::Cloned {
            return true;
        }
        self.next() == Some(to)
    }
}

/// Status used to decide what may run: the pre-failure status when FAILED
pub fn effective_status(status: RepoStatus, last_good: Option<RepoStatus>) -> RepoStatus {
    match status {
        RepoStatus::Failed => last_good.unwrap_or(RepoStatus::Created),
        other => other,
    }
}

/// Status a stage must start from
pub fn stage_prerequisite(kind: JobKind) -> Option<RepoStatus> {
    match kind {
        JobKind::Clone => None,
        JobKind::Structure => Some(RepoStatus::Cloned),
        JobKind::Index => Some(RepoStatus::Structured),
        JobKind::GenerateDocs => Some(RepoStatus::Indexed),
    }
}

/// Status a stage produces on success
pub fn stage_target(kind: JobKind) -> RepoStatus {
    match kind {
        JobKind::Clone => RepoStatus::Cloned,
        JobKind::Structure => RepoStatus::Structured,
        JobKind::Index => RepoStatus::Indexed,
        JobKind::GenerateDocs => RepoStatus::DocsGenerated,
    }
}

/// Check whether a job of `kind` may be submitted for a repository
pub fn accepts(
    status: RepoStatus,
    last_good: Option<RepoStatus>,
    kind: JobKind,
    force: bool,
) -> Result<()> {
    let effective = effective_status(status, last_good);

    let allowed = match kind {
        JobKind::Clone => force || status == RepoStatus::Created || status == RepoStatus::Failed,
        // Regenerating docs keeps a finished repository READY
        JobKind::GenerateDocs => matches!(
            effective,
            RepoStatus::Indexed | RepoStatus::DocsGenerated | RepoStatus::Ready
        ),
        other => stage_prerequisite(other) == Some(effective),
    };

    if allowed {
        return Ok(());
    }

    let reason = match (kind, stage_prerequisite(kind)) {
        (JobKind::Clone, _) => {
            "repository is already cloned; submit with force to re-ingest".to_string()
        }
        (_, Some(required)) => format!("requires status {}", required),
        (_, None) => "not allowed".to_string(),
    };
    Err(Error::Validation(format!(
        "Cannot run {} while repository is {}: {}",
        kind, status, reason
    )))
}

/// Ordered statuses a successful stage walks through
///
/// Most stages produce a single edge. Documentation generation moves
/// `INDEXED -> DOCS_GENERATED -> READY`, and a regeneration on a READY
/// repository produces no edge at all.
pub fn success_path(
    status: RepoStatus,
    last_good: Option<RepoStatus>,
    kind: JobKind,
) -> Result<Vec<RepoStatus>> {
    let effective = effective_status(status, last_good);

    let path = match kind {
        JobKind::Clone => vec![RepoStatus::Cloned],
        JobKind::GenerateDocs => match effective {
            RepoStatus::Indexed => vec![RepoStatus::DocsGenerated, RepoStatus::Ready],
            RepoStatus::DocsGenerated => vec![RepoStatus::Ready],
            RepoStatus::Ready if status == RepoStatus::Failed => vec![RepoStatus::Ready],
            RepoStatus::Ready => Vec::new(),
            _ => return Err(invalid_edge(status, RepoStatus::DocsGenerated)),
        },
        other => {
            let target = stage_target(other);
            if !effective.can_transition(target) {
                return Err(invalid_edge(status, target));
            }
            vec![target]
        }
    };

    Ok(path)
}

fn invalid_edge(from: RepoStatus, to: RepoStatus) -> Error {
    Error::Conflict(format!("Invalid transition {} -> {}", from, to))
}

/// Read gate: the repository must have reached `required`
pub fn require_reached(
    repository: &str,
    status: RepoStatus,
    last_good: Option<RepoStatus>,
    required: RepoStatus,
) -> Result<()> {
    if effective_status(status, last_good).has_reached(required) {
        Ok(())
    } else {
        Err(Error::NotReady {
            repository: repository.to_string(),
            current: status.to_string(),
            required: required.to_string(),
        })
    }
}
