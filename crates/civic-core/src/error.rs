use crate::lock::LockError;
use crate::model::{InvalidTransition, IssueId};
use std::fmt;

/// Machine-readable error codes surfaced to callers and the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    NotInitialized,
    ConfigParseError,
    ConfigInvalid,
    IssueNotFound,
    InvalidSubmission,
    InvalidStateTransition,
    InvalidEnumValue,
    MissingActor,
    DuplicateCommitConflict,
    SubmissionCancelled,
    CorruptStore,
    StoreWriteFailed,
    LockContention,
    CollaboratorUnavailable,
    InternalUnexpected,
}

impl ErrorCode {
    /// Stable code identifier (`E####`) for machine parsing.
    #[must_use]
    pub const fn code(self) -> &'static str {
        match self {
            Self::NotInitialized => "E1001",
            Self::ConfigParseError => "E1002",
            Self::ConfigInvalid => "E1003",
            Self::IssueNotFound => "E2001",
            Self::InvalidSubmission => "E2002",
            Self::InvalidStateTransition => "E2003",
            Self::InvalidEnumValue => "E2004",
            Self::MissingActor => "E2005",
            Self::DuplicateCommitConflict => "E3001",
            Self::SubmissionCancelled => "E3002",
            Self::CorruptStore => "E4001",
            Self::StoreWriteFailed => "E5001",
            Self::LockContention => "E5002",
            Self::CollaboratorUnavailable => "E6001",
            Self::InternalUnexpected => "E9001",
        }
    }

    /// Short human-facing summary for logs and terminal output.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::NotInitialized => "Project not initialized",
            Self::ConfigParseError => "Config file parse error",
            Self::ConfigInvalid => "Config value out of range",
            Self::IssueNotFound => "Issue not found",
            Self::InvalidSubmission => "Invalid submission",
            Self::InvalidStateTransition => "Invalid state transition",
            Self::InvalidEnumValue => "Invalid status/category/priority value",
            Self::MissingActor => "No acting user",
            Self::DuplicateCommitConflict => "Concurrent submission conflict",
            Self::SubmissionCancelled => "Submission cancelled",
            Self::CorruptStore => "Corrupt issue store",
            Self::StoreWriteFailed => "Issue store write failed",
            Self::LockContention => "Lock contention",
            Self::CollaboratorUnavailable => "Collaborator unavailable",
            Self::InternalUnexpected => "Internal unexpected error",
        }
    }

    /// Optional remediation hint that can be surfaced to operators.
    #[must_use]
    pub const fn hint(self) -> Option<&'static str> {
        match self {
            Self::NotInitialized => Some("Run `civic init` to initialize this directory."),
            Self::ConfigParseError => Some("Fix syntax in .civic/config.toml and retry."),
            Self::ConfigInvalid => Some("Check weights, thresholds and point amounts in .civic/config.toml."),
            Self::IssueNotFound | Self::SubmissionCancelled => None,
            Self::InvalidSubmission => Some("Provide a non-empty title and a valid latitude/longitude."),
            Self::InvalidStateTransition => Some(
                "Follow valid transitions: submitted -> under_review -> in_progress -> resolved -> closed (or submitted -> closed).",
            ),
            Self::InvalidEnumValue => Some("Use one of the documented status/category/priority values."),
            Self::MissingActor => Some("Pass --user <id> or set CIVIC_USER."),
            Self::DuplicateCommitConflict => Some("Retry the submission; nearby reports were being processed."),
            Self::CorruptStore => Some("Restore .civic/civic.sqlite3 from a backup."),
            Self::StoreWriteFailed => Some("Check disk space and write permissions."),
            Self::LockContention => Some("Retry after the other `civic` process releases its lock."),
            Self::CollaboratorUnavailable => Some("Defaults were applied; re-run classification later."),
            Self::InternalUnexpected => Some("Retry once. If persistent, report a bug with logs."),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

/// A submission, comment, or override rejected before reaching the engine core.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {field}: {reason}")]
pub struct ValidationError {
    pub field: &'static str,
    pub reason: String,
}

impl ValidationError {
    pub fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

/// Errors raised by [`IssueStore`](crate::store::IssueStore) and
/// [`AwardStore`](crate::store::AwardStore) implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("lock error: {0}")]
    Lock(#[from] LockError),

    #[error("store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("issue {0} does not exist")]
    MissingIssue(IssueId),

    /// A persisted row could not be mapped back into the model.
    #[error("corrupt store row: {0}")]
    Corrupt(String),

    #[error("store mutex poisoned by a panicking writer")]
    Poisoned,
}

impl StoreError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Sqlite(_) | Self::Io(_) => ErrorCode::StoreWriteFailed,
            Self::Lock(err) => err.code(),
            Self::MissingIssue(_) => ErrorCode::IssueNotFound,
            Self::Corrupt(_) => ErrorCode::CorruptStore,
            Self::Poisoned => ErrorCode::InternalUnexpected,
        }
    }
}

/// The engine's error taxonomy.
///
/// Validation and transition errors are terminal and reported verbatim.
/// `Conflict` is only returned after the resolver's bounded retries are
/// exhausted and is safe to retry from the outside.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error(transparent)]
    InvalidTransition(#[from] InvalidTransition),

    #[error("issue {0} not found")]
    NotFound(IssueId),

    #[error("concurrent submissions kept conflicting after {attempts} attempts")]
    Conflict { attempts: u32 },

    #[error("submission cancelled before commit")]
    Cancelled,

    #[error(transparent)]
    Store(StoreError),
}

impl From<StoreError> for EngineError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MissingIssue(id) => Self::NotFound(id),
            other => Self::Store(other),
        }
    }
}

impl EngineError {
    #[must_use]
    pub const fn code(&self) -> ErrorCode {
        match self {
            Self::Validation(_) => ErrorCode::InvalidSubmission,
            Self::InvalidTransition(_) => ErrorCode::InvalidStateTransition,
            Self::NotFound(_) => ErrorCode::IssueNotFound,
            Self::Conflict { .. } => ErrorCode::DuplicateCommitConflict,
            Self::Cancelled => ErrorCode::SubmissionCancelled,
            Self::Store(err) => err.code(),
        }
    }

    /// True when the caller may retry the same request unchanged.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Conflict { .. })
            || matches!(self, Self::Store(StoreError::Lock(_)))
    }
}

#[cfg(test)]
mod tests {
    use super::{EngineError, ErrorCode, StoreError, ValidationError};
    use crate::model::IssueId;
    use std::collections::HashSet;

    #[test]
    fn all_codes_are_unique() {
        let all = [
            ErrorCode::NotInitialized,
            ErrorCode::ConfigParseError,
            ErrorCode::ConfigInvalid,
            ErrorCode::IssueNotFound,
            ErrorCode::InvalidSubmission,
            ErrorCode::InvalidStateTransition,
            ErrorCode::InvalidEnumValue,
            ErrorCode::MissingActor,
            ErrorCode::DuplicateCommitConflict,
            ErrorCode::SubmissionCancelled,
            ErrorCode::CorruptStore,
            ErrorCode::StoreWriteFailed,
            ErrorCode::LockContention,
            ErrorCode::CollaboratorUnavailable,
            ErrorCode::InternalUnexpected,
        ];

        let mut seen = HashSet::new();
        for code in all {
            assert!(seen.insert(code.code()), "duplicate code {}", code.code());
        }
    }

    #[test]
    fn code_format_is_machine_friendly() {
        let code = ErrorCode::InvalidStateTransition.code();
        assert_eq!(code.len(), 5);
        assert!(code.starts_with('E'));
        assert!(code.chars().skip(1).all(|c| c.is_ascii_digit()));
    }

    #[test]
    fn conflict_is_transient_but_validation_is_not() {
        assert!(EngineError::Conflict { attempts: 3 }.is_transient());
        let validation = EngineError::from(ValidationError::new("title", "must not be empty"));
        assert!(!validation.is_transient());
        assert_eq!(validation.code(), ErrorCode::InvalidSubmission);
        assert_eq!(validation.to_string(), "invalid title: must not be empty");
    }

    #[test]
    fn missing_issue_surfaces_as_not_found() {
        let err = EngineError::from(StoreError::MissingIssue(IssueId(9)));
        assert!(matches!(err, EngineError::NotFound(IssueId(9))));
        assert_eq!(err.code(), ErrorCode::IssueNotFound);
    }
}
