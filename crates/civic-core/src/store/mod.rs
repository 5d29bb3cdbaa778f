//! Repository contracts the engine depends on.
//!
//! Every mutating method is atomic on its own. Multi-step decisions (the
//! duplicate resolver's lookup, score and commit) run inside
//! [`IssueStore::enter_section`].

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::StoreError;
use crate::geo::Point;
use crate::lock::SectionGuard;
use crate::model::{
    Category, Comment, Issue, IssueId, NewComment, NewIssue, PointAward, Priority, Status, UserId,
};
use std::time::Duration;

/// Result of adding a confirmer to an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfirmWrite {
    Added,
    AlreadyPresent,
    /// The user filed the issue; reporters never confirm their own report.
    IsReporter,
    /// The issue left the open states before the write.
    NotOpen,
}

/// Filter for [`IssueStore::list_issues`]. Results are ordered by id.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssueFilter {
    pub status: Option<Status>,
    pub category: Option<Category>,
    pub reporter: Option<UserId>,
    pub open_only: bool,
    pub limit: Option<usize>,
}

impl IssueFilter {
    #[must_use]
    pub fn matches(&self, issue: &Issue) -> bool {
        self.status.is_none_or(|s| issue.status == s)
            && self.category.is_none_or(|c| issue.category == c)
            && self.reporter.as_ref().is_none_or(|r| issue.reporter_id == *r)
            && (!self.open_only || issue.status.is_open())
    }
}

pub trait IssueStore: Send + Sync {
    /// Persist a new issue in `Submitted` state and return it with its assigned id.
    fn create_issue(&self, new: &NewIssue) -> Result<Issue, StoreError>;

    fn get_issue(&self, id: IssueId) -> Result<Option<Issue>, StoreError>;

    fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>, StoreError>;

    /// Open issues within `radius_m` of `point`, optionally of one category.
    fn open_near(
        &self,
        point: Point,
        radius_m: f64,
        category: Option<Category>,
    ) -> Result<Vec<Issue>, StoreError>;

    fn add_confirmer(&self, id: IssueId, user: &UserId) -> Result<ConfirmWrite, StoreError>;

    /// Set priority to `max(current, at_least)` and return the stored value.
    fn raise_priority(&self, id: IssueId, at_least: Priority) -> Result<Priority, StoreError>;

    fn set_category(&self, id: IssueId, category: Category) -> Result<(), StoreError>;

    /// Compare-and-set the status. Returns `false` when the current status is not `from`.
    fn set_status(&self, id: IssueId, from: Status, to: Status) -> Result<bool, StoreError>;

    /// Move an open issue to `Merged` pointing at `into`. Returns `false` when it is not open.
    fn mark_merged(&self, id: IssueId, into: IssueId) -> Result<bool, StoreError>;

    fn append_comment(&self, new: &NewComment) -> Result<Comment, StoreError>;

    /// Comments in posting order.
    fn comments_for(&self, id: IssueId) -> Result<Vec<Comment>, StoreError>;

    /// Hold an exclusive section over `keys` until the guard drops.
    fn enter_section(&self, keys: &[String], timeout: Duration)
    -> Result<SectionGuard, StoreError>;
}

pub trait AwardStore: Send + Sync {
    /// Insert unless `(user_id, issue_id, event_kind)` already exists. Returns whether it was inserted.
    fn insert_award_if_absent(&self, award: &PointAward) -> Result<bool, StoreError>;

    fn total_for(&self, user: &UserId) -> Result<i64, StoreError>;

    /// Awards for `user`, oldest first.
    fn awards_for(&self, user: &UserId) -> Result<Vec<PointAward>, StoreError>;

    /// Users with the highest totals, descending, ties by user id.
    fn leaderboard(&self, limit: usize) -> Result<Vec<(UserId, i64)>, StoreError>;
}

/// Longest merge chain followed before the store is considered corrupt.
const MAX_MERGE_HOPS: usize = 32;

/// Load `id`, following `merged_into_id` links to the surviving issue.
pub fn follow_merges(store: &dyn IssueStore, id: IssueId) -> Result<Issue, StoreError> {
    let mut current = id;
    for _ in 0..MAX_MERGE_HOPS {
        let issue = store
            .get_issue(current)?
            .ok_or(StoreError::MissingIssue(current))?;
        match (issue.status, issue.merged_into_id) {
            (Status::Merged, Some(next)) => current = next,
            _ => return Ok(issue),
        }
    }
    Err(StoreError::Corrupt(format!(
        "merge chain from {id} exceeds {MAX_MERGE_HOPS} hops"
    )))
}

#[cfg(test)]
mod tests {
    use super::{IssueFilter, IssueStore, MemoryStore, follow_merges};
    use crate::geo::Point;
    use crate::model::{Category, Issue, IssueId, Priority, Status, UserId};
    use chrono::Utc;

    fn issue(status: Status, category: Category) -> Issue {
        Issue {
            id: IssueId(1),
            title: "Pothole".into(),
            description: String::new(),
            location: Point::new(40.0, -75.0),
            geohash: "dr4e3m2q0".into(),
            image_ref: None,
            category,
            priority: Priority::Medium,
            status,
            reporter_id: UserId::new("ana"),
            confirmer_ids: vec![],
            merged_into_id: None,
            possible_duplicate_of: None,
            comment_ids: vec![],
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn filter_combines_conditions() {
        let roads = issue(Status::Submitted, Category::Roads);
        assert!(IssueFilter::default().matches(&roads));
        assert!(
            IssueFilter {
                category: Some(Category::Roads),
                reporter: Some(UserId::new("ana")),
                open_only: true,
                ..IssueFilter::default()
            }
            .matches(&roads)
        );
        assert!(
            !IssueFilter {
                status: Some(Status::Closed),
                ..IssueFilter::default()
            }
            .matches(&roads)
        );
        assert!(
            !IssueFilter {
                open_only: true,
                ..IssueFilter::default()
            }
            .matches(&issue(Status::Resolved, Category::Roads))
        );
    }

    #[test]
    fn follow_merges_reaches_the_surviving_issue() {
        let store = MemoryStore::new();
        let mut ids = Vec::new();
        for reporter in ["ana", "ben", "cy"] {
            let new = crate::model::NewIssue {
                title: "Pothole".into(),
                description: String::new(),
                location: Point::new(40.0, -75.0),
                image_ref: None,
                category: Category::Roads,
                priority: Priority::Medium,
                reporter_id: UserId::new(reporter),
                possible_duplicate_of: None,
            };
            ids.push(store.create_issue(&new).unwrap().id);
        }
        assert!(store.mark_merged(ids[2], ids[1]).unwrap());
        assert!(store.mark_merged(ids[1], ids[0]).unwrap());

        assert_eq!(follow_merges(&store, ids[2]).unwrap().id, ids[0]);
        assert_eq!(follow_merges(&store, ids[0]).unwrap().id, ids[0]);
        assert!(follow_merges(&store, IssueId(77)).is_err());
    }
}
