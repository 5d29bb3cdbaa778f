use crate::geo::Point;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// Repository-assigned issue identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssueId(pub i64);

/// Repository-assigned comment identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommentId(pub i64);

/// Opaque user reference handed to the engine by the identity collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

impl UserId {
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// The resolved identity and role of whoever is acting on the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Actor {
    pub user_id: UserId,
    pub is_employee: bool,
}

impl Actor {
    pub fn citizen(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            is_employee: false,
        }
    }

    pub fn employee(user_id: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            is_employee: true,
        }
    }
}

/// The six lifecycle states of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    Submitted,
    UnderReview,
    InProgress,
    Resolved,
    Closed,
    Merged,
}

impl Status {
    /// States whose issues may still be confirmed or matched as duplicates.
    pub const OPEN: [Self; 3] = [Self::Submitted, Self::UnderReview, Self::InProgress];

    pub const ALL: [Self; 6] = [
        Self::Submitted,
        Self::UnderReview,
        Self::InProgress,
        Self::Resolved,
        Self::Closed,
        Self::Merged,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Submitted => "submitted",
            Self::UnderReview => "under_review",
            Self::InProgress => "in_progress",
            Self::Resolved => "resolved",
            Self::Closed => "closed",
            Self::Merged => "merged",
        }
    }

    #[must_use]
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Submitted | Self::UnderReview | Self::InProgress)
    }

    /// `Closed` and `Merged` accept no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Closed | Self::Merged)
    }

    /// Validate whether the lifecycle table allows `self -> target`.
    ///
    /// Valid transitions:
    /// - `submitted -> under_review`
    /// - `submitted -> closed` (rejected/invalid shortcut)
    /// - `under_review -> in_progress`
    /// - `in_progress -> resolved`
    /// - `resolved -> closed`
    /// - any open state `-> merged` (duplicate resolver only)
    ///
    /// Who may request a transition is checked by
    /// [`Lifecycle`](crate::lifecycle::Lifecycle), not here.
    pub fn can_transition_to(self, target: Self) -> Result<(), InvalidTransition> {
        if self.is_terminal() {
            return Err(InvalidTransition {
                from: self,
                to: target,
                reason: "issue is in a terminal state",
            });
        }

        if self == target {
            return Err(InvalidTransition {
                from: self,
                to: target,
                reason: "no-op transition is not allowed",
            });
        }

        let allowed = matches!(
            (self, target),
            (Self::Submitted, Self::UnderReview)
                | (Self::Submitted, Self::Closed)
                | (Self::UnderReview, Self::InProgress)
                | (Self::InProgress, Self::Resolved)
                | (Self::Resolved, Self::Closed)
        ) || (self.is_open() && target == Self::Merged);

        if allowed {
            Ok(())
        } else {
            Err(InvalidTransition {
                from: self,
                to: target,
                reason: "transition not allowed by lifecycle rules",
            })
        }
    }
}

/// Issue category as assigned by the categorization collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    Roads,
    Lighting,
    Sanitation,
    Water,
    Graffiti,
    Parks,
    Traffic,
    Other,
    /// Not yet categorized (or the collaborator was unavailable).
    #[default]
    Unknown,
}

impl Category {
    pub const ALL: [Self; 9] = [
        Self::Roads,
        Self::Lighting,
        Self::Sanitation,
        Self::Water,
        Self::Graffiti,
        Self::Parks,
        Self::Traffic,
        Self::Other,
        Self::Unknown,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Roads => "roads",
            Self::Lighting => "lighting",
            Self::Sanitation => "sanitation",
            Self::Water => "water",
            Self::Graffiti => "graffiti",
            Self::Parks => "parks",
            Self::Traffic => "traffic",
            Self::Other => "other",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub const fn is_known(self) -> bool {
        !matches!(self, Self::Unknown)
    }
}

/// Handling priority; ordered from least to most urgent.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
    Critical,
}

impl Priority {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        }
    }

    /// One tier up, saturating at `cap`.
    #[must_use]
    pub fn escalated(self, cap: Self) -> Self {
        let next = match self {
            Self::Low => Self::Medium,
            Self::Medium => Self::High,
            Self::High | Self::Critical => Self::Critical,
        };
        if self >= cap { self } else { next.min(cap) }
    }
}

/// A civic issue as persisted by the repository.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub id: IssueId,
    pub title: String,
    pub description: String,
    pub location: Point,
    pub geohash: String,
    pub image_ref: Option<String>,
    pub category: Category,
    pub priority: Priority,
    pub status: Status,
    pub reporter_id: UserId,
    /// Confirming users in confirmation order; never contains the reporter.
    pub confirmer_ids: Vec<UserId>,
    pub merged_into_id: Option<IssueId>,
    /// Soft link to the closest open issue when the submission was ambiguous.
    pub possible_duplicate_of: Option<IssueId>,
    pub comment_ids: Vec<CommentId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Issue {
    /// The reporter counts as the first confirmation.
    #[must_use]
    pub fn confirmation_count(&self) -> usize {
        1 + self.confirmer_ids.len()
    }

    #[must_use]
    pub fn has_confirmed(&self, user: &UserId) -> bool {
        self.reporter_id == *user || self.confirmer_ids.contains(user)
    }

    /// Text used for similarity scoring: title followed by description.
    #[must_use]
    pub fn match_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// Everything needed to create an issue; the store assigns id, geohash and timestamps.
#[derive(Debug, Clone, PartialEq)]
pub struct NewIssue {
    pub title: String,
    pub description: String,
    pub location: Point,
    pub image_ref: Option<String>,
    pub category: Category,
    pub priority: Priority,
    pub reporter_id: UserId,
    pub possible_duplicate_of: Option<IssueId>,
}

/// A citizen report as it arrives at the duplicate resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Submission {
    pub title: String,
    #[serde(default)]
    pub description: String,
    pub location: Point,
    #[serde(default)]
    pub image_ref: Option<String>,
}

impl Submission {
    pub fn new(title: impl Into<String>, description: impl Into<String>, location: Point) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            location,
            image_ref: None,
        }
    }

    /// Text used for similarity scoring: title followed by description.
    #[must_use]
    pub fn match_text(&self) -> String {
        format!("{} {}", self.title, self.description)
    }
}

/// An append-only comment on an issue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Comment {
    pub id: CommentId,
    pub issue_id: IssueId,
    pub author_id: UserId,
    pub text: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewComment {
    pub issue_id: IssueId,
    pub author_id: UserId,
    pub text: String,
}

/// Error returned when a state transition is invalid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("cannot move issue from {from} to {to}: {reason}")]
pub struct InvalidTransition {
    pub from: Status,
    pub to: Status,
    pub reason: &'static str,
}

/// Error returned when parsing an enum value from text.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid {expected}: '{got}'")]
pub struct ParseEnumError {
    pub expected: &'static str,
    pub got: String,
}

impl fmt::Display for IssueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

impl fmt::Display for CommentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl fmt::Display for Priority {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

fn normalize(input: &str) -> String {
    input.trim().to_ascii_lowercase().replace(['-', ' '], "_")
}

impl FromStr for IssueId {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        trimmed
            .strip_prefix('#')
            .unwrap_or(trimmed)
            .parse::<i64>()
            .ok()
            .filter(|id| *id > 0)
            .map(Self)
            .ok_or_else(|| ParseEnumError {
                expected: "issue id",
                got: s.to_string(),
            })
    }
}

impl FromStr for Status {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        match normalized.as_str() {
            "submitted" => Ok(Self::Submitted),
            "under_review" | "review" => Ok(Self::UnderReview),
            "in_progress" => Ok(Self::InProgress),
            "resolved" => Ok(Self::Resolved),
            "closed" | "rejected" => Ok(Self::Closed),
            "merged" => Ok(Self::Merged),
            _ => Err(ParseEnumError {
                expected: "status",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for Category {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        match normalized.as_str() {
            "roads" | "road" => Ok(Self::Roads),
            "lighting" => Ok(Self::Lighting),
            "sanitation" => Ok(Self::Sanitation),
            "water" => Ok(Self::Water),
            "graffiti" => Ok(Self::Graffiti),
            "parks" | "park" => Ok(Self::Parks),
            "traffic" => Ok(Self::Traffic),
            "other" => Ok(Self::Other),
            "unknown" | "uncategorized" => Ok(Self::Unknown),
            _ => Err(ParseEnumError {
                expected: "category",
                got: s.to_string(),
            }),
        }
    }
}

impl FromStr for Priority {
    type Err = ParseEnumError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let normalized = normalize(s);
        match normalized.as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(ParseEnumError {
                expected: "priority",
                got: s.to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Category, InvalidTransition, IssueId, Priority, Status};
    use std::str::FromStr;

    #[test]
    fn enum_json_uses_snake_case() {
        assert_eq!(
            serde_json::to_string(&Status::UnderReview).unwrap(),
            "\"under_review\""
        );
        assert_eq!(serde_json::to_string(&Category::Roads).unwrap(), "\"roads\"");
        assert_eq!(serde_json::to_string(&Priority::High).unwrap(), "\"high\"");
        assert_eq!(
            serde_json::from_str::<Status>("\"in_progress\"").unwrap(),
            Status::InProgress
        );
    }

    #[test]
    fn display_parse_roundtrips() {
        for value in Status::ALL {
            assert_eq!(Status::from_str(&value.to_string()).unwrap(), value);
        }
        for value in Category::ALL {
            assert_eq!(Category::from_str(&value.to_string()).unwrap(), value);
        }
        for value in [Priority::Low, Priority::Medium, Priority::High, Priority::Critical] {
            assert_eq!(Priority::from_str(&value.to_string()).unwrap(), value);
        }
    }

    #[test]
    fn parse_accepts_loose_spellings() {
        assert_eq!(Status::from_str("Under Review").unwrap(), Status::UnderReview);
        assert_eq!(Status::from_str("in-progress").unwrap(), Status::InProgress);
        assert_eq!(Category::from_str("Uncategorized").unwrap(), Category::Unknown);
        assert_eq!(IssueId::from_str("#42").unwrap(), IssueId(42));
        assert_eq!(IssueId::from_str("7").unwrap(), IssueId(7));
    }

    #[test]
    fn parse_rejects_unknown_values() {
        assert!(Status::from_str("open").is_err());
        assert!(Category::from_str("potholes-and-more").is_err());
        assert!(Priority::from_str("urgent").is_err());
        assert!(IssueId::from_str("#0").is_err());
        assert!(IssueId::from_str("abc").is_err());
    }

    #[test]
    fn forward_single_steps_are_allowed() {
        assert!(Status::Submitted.can_transition_to(Status::UnderReview).is_ok());
        assert!(Status::UnderReview.can_transition_to(Status::InProgress).is_ok());
        assert!(Status::InProgress.can_transition_to(Status::Resolved).is_ok());
        assert!(Status::Resolved.can_transition_to(Status::Closed).is_ok());
        assert!(Status::Submitted.can_transition_to(Status::Closed).is_ok());
    }

    #[test]
    fn skipping_and_backward_moves_are_rejected() {
        assert!(Status::Submitted.can_transition_to(Status::InProgress).is_err());
        assert!(Status::UnderReview.can_transition_to(Status::Resolved).is_err());
        assert!(Status::UnderReview.can_transition_to(Status::Closed).is_err());
        assert!(matches!(
            Status::Resolved.can_transition_to(Status::UnderReview),
            Err(InvalidTransition {
                from: Status::Resolved,
                to: Status::UnderReview,
                ..
            })
        ));
        assert!(Status::InProgress.can_transition_to(Status::Submitted).is_err());
    }

    #[test]
    fn merged_only_from_open_states() {
        for status in Status::OPEN {
            assert!(status.can_transition_to(Status::Merged).is_ok());
        }
        assert!(Status::Resolved.can_transition_to(Status::Merged).is_err());
        assert!(Status::Closed.can_transition_to(Status::Merged).is_err());
    }

    #[test]
    fn terminal_states_have_no_successors() {
        for from in [Status::Closed, Status::Merged] {
            for to in Status::ALL {
                assert!(from.can_transition_to(to).is_err(), "{from} -> {to}");
            }
        }
    }

    #[test]
    fn priority_escalation_saturates_at_cap() {
        assert_eq!(Priority::Low.escalated(Priority::Critical), Priority::Medium);
        assert_eq!(Priority::High.escalated(Priority::Critical), Priority::Critical);
        assert_eq!(Priority::Critical.escalated(Priority::Critical), Priority::Critical);
        assert_eq!(Priority::Medium.escalated(Priority::Medium), Priority::Medium);
        assert_eq!(Priority::Medium.escalated(Priority::High), Priority::High);
        // Never lowers an issue that already sits above the cap.
        assert_eq!(Priority::Critical.escalated(Priority::High), Priority::Critical);
    }
}
