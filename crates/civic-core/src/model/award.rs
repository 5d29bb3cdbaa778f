use super::issue::{IssueId, ParseEnumError, UserId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// The actions that earn gamification points.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// The user filed a report that became a new issue.
    Submit,
    /// The user confirmed someone else's open issue.
    Confirm,
    /// An issue the user reported was resolved.
    Resolved,
}

impl EventKind {
    pub const ALL: [Self; 3] = [Self::Submit, Self::Confirm, Self::Resolved];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submit => "submit",
            Self::Confirm => "confirm",
            Self::Resolved => "resolved",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventKind {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "submit" | "new_report" => Ok(Self::Submit),
            "confirm" | "confirm_issue" => Ok(Self::Confirm),
            "resolved" | "report_resolved" => Ok(Self::Resolved),
            _ => Err(ParseEnumError {
                expected: "event kind",
                got: s.to_string(),
            }),
        }
    }
}

/// One recorded point award. `(user_id, issue_id, event_kind)` is unique.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PointAward {
    pub user_id: UserId,
    pub issue_id: IssueId,
    pub event_kind: EventKind,
    pub amount: i64,
    pub created_at: DateTime<Utc>,
}

impl PointAward {
    #[must_use]
    pub fn key(&self) -> (&UserId, IssueId, EventKind) {
        (&self.user_id, self.issue_id, self.event_kind)
    }
}

/// Result of asking the ledger for an award.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum AwardOutcome {
    Recorded(PointAward),
    AlreadyAwarded,
}

impl AwardOutcome {
    #[must_use]
    pub const fn is_recorded(&self) -> bool {
        matches!(self, Self::Recorded(_))
    }
}
