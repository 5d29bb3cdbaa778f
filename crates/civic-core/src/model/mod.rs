pub mod award;
pub mod issue;

pub use award::{AwardOutcome, EventKind, PointAward};
pub use issue::{
    Actor, Category, Comment, CommentId, InvalidTransition, Issue, IssueId, NewComment, NewIssue,
    ParseEnumError, Priority, Status, Submission, UserId,
};
