use ulid::Ulid;

use crate::model::EligibilityReport;

/// Which entity table an error refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityKind {
    Qualification,
    Subject,
    Lecturer,
    Session,
}

impl std::fmt::Display for EntityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityKind::Qualification => "qualification",
            EntityKind::Subject => "subject",
            EntityKind::Lecturer => "lecturer",
            EntityKind::Session => "session",
        };
        f.write_str(s)
    }
}

#[derive(Debug)]
pub enum EngineError {
    NotFound(EntityKind, Ulid),
    Validation(String),
    AlreadyExists(EntityKind, String),
    /// Qualification still required by a subject or held by a lecturer.
    HasReferences(Ulid),
    /// Assignment rejected by the eligibility rules. Expected outcome, not a
    /// fault; carries the full breakdown so callers can explain it.
    NotEligible(EligibilityReport),
    /// Re-validation at commit time failed where a substitute was already in
    /// place; the caller should refresh its preview.
    Conflict(EligibilityReport),
    Wal(String),
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::NotFound(kind, id) => write!(f, "no such {kind}: {id}"),
            EngineError::Validation(msg) => write!(f, "validation failed: {msg}"),
            EngineError::AlreadyExists(kind, code) => {
                write!(f, "{kind} already exists: {code}")
            }
            EngineError::HasReferences(id) => {
                write!(f, "cannot delete qualification {id}: still referenced")
            }
            EngineError::NotEligible(report) => {
                write!(f, "not eligible: {:?}", report.reasons)
            }
            EngineError::Conflict(report) => {
                write!(f, "assignment conflict: {:?}, refresh and retry", report.reasons)
            }
            EngineError::Wal(e) => write!(f, "WAL error: {e}"),
        }
    }
}

impl std::error::Error for EngineError {}
