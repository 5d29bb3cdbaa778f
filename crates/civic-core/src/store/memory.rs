//! In-process repository for tests and embedding.
//!
//! One mutex guards all issue state; the exclusive sections live in a
//! separate [`KeyedSections`] table so holding a section never blocks reads.

use super::{AwardStore, ConfirmWrite, IssueFilter, IssueStore};
use crate::error::StoreError;
use crate::geo::{GeoIndex, Point, STORED_PRECISION};
use crate::lock::{KeyedSections, SectionGuard};
use crate::model::{
    Category, Comment, CommentId, EventKind, Issue, IssueId, NewComment, NewIssue, PointAward,
    Priority, Status, UserId,
};
use chrono::Utc;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

#[derive(Debug, Default)]
struct State {
    issues: BTreeMap<IssueId, Issue>,
    /// Only open issues are indexed.
    open_index: GeoIndex<IssueId>,
    comments: BTreeMap<IssueId, Vec<Comment>>,
    awards: BTreeMap<(UserId, IssueId, EventKind), PointAward>,
    next_issue: i64,
    next_comment: i64,
}

impl State {
    fn issue_mut(&mut self, id: IssueId) -> Result<&mut Issue, StoreError> {
        self.issues.get_mut(&id).ok_or(StoreError::MissingIssue(id))
    }
}

#[derive(Debug)]
pub struct MemoryStore {
    state: Mutex<State>,
    sections: Arc<KeyedSections>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Mutex::new(State::default()),
            sections: KeyedSections::new(),
        }
    }

    fn state(&self) -> Result<MutexGuard<'_, State>, StoreError> {
        self.state.lock().map_err(|_| StoreError::Poisoned)
    }
}

impl IssueStore for MemoryStore {
    fn create_issue(&self, new: &NewIssue) -> Result<Issue, StoreError> {
        let geohash = new
            .location
            .geohash(STORED_PRECISION)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        let mut state = self.state()?;
        state.next_issue += 1;
        let id = IssueId(state.next_issue);
        let now = Utc::now();

        let issue = Issue {
            id,
            title: new.title.clone(),
            description: new.description.clone(),
            location: new.location,
            geohash,
            image_ref: new.image_ref.clone(),
            category: new.category,
            priority: new.priority,
            status: Status::Submitted,
            reporter_id: new.reporter_id.clone(),
            confirmer_ids: Vec::new(),
            merged_into_id: None,
            possible_duplicate_of: new.possible_duplicate_of,
            comment_ids: Vec::new(),
            created_at: now,
            updated_at: now,
        };

        state
            .open_index
            .insert(id, new.location)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;
        state.issues.insert(id, issue.clone());
        Ok(issue)
    }

    fn get_issue(&self, id: IssueId) -> Result<Option<Issue>, StoreError> {
        Ok(self.state()?.issues.get(&id).cloned())
    }

    fn list_issues(&self, filter: &IssueFilter) -> Result<Vec<Issue>, StoreError> {
        let state = self.state()?;
        Ok(state
            .issues
            .values()
            .filter(|issue| filter.matches(issue))
            .take(filter.limit.unwrap_or(usize::MAX))
            .cloned()
            .collect())
    }

    fn open_near(
        &self,
        point: Point,
        radius_m: f64,
        category: Option<Category>,
    ) -> Result<Vec<Issue>, StoreError> {
        let state = self.state()?;
        let ids = state
            .open_index
            .query(point, radius_m)
            .map_err(|e| StoreError::Corrupt(e.to_string()))?;

        let mut found: Vec<Issue> = ids
            .filter_map(|id| state.issues.get(&id))
            .filter(|issue| issue.status.is_open())
            .filter(|issue| category.is_none_or(|c| issue.category == c))
            .cloned()
            .collect();
        found.sort_by_key(|issue| issue.id);
        Ok(found)
    }

    fn add_confirmer(&self, id: IssueId, user: &UserId) -> Result<ConfirmWrite, StoreError> {
        let mut state = self.state()?;
        let issue = state.issue_mut(id)?;
        if !issue.status.is_open() {
            return Ok(ConfirmWrite::NotOpen);
        }
        if issue.reporter_id == *user {
            return Ok(ConfirmWrite::IsReporter);
        }
        if issue.confirmer_ids.contains(user) {
            return Ok(ConfirmWrite::AlreadyPresent);
        }
        issue.confirmer_ids.push(user.clone());
        issue.updated_at = Utc::now();
        Ok(ConfirmWrite::Added)
    }

    fn raise_priority(&self, id: IssueId, at_least: Priority) -> Result<Priority, StoreError> {
        let mut state = self.state()?;
        let issue = state.issue_mut(id)?;
        if at_least > issue.priority {
            issue.priority = at_least;
            issue.updated_at = Utc::now();
        }
        Ok(issue.priority)
    }

    fn set_category(&self, id: IssueId, category: Category) -> Result<(), StoreError> {
        let mut state = self.state()?;
        let issue = state.issue_mut(id)?;
        issue.category = category;
        issue.updated_at = Utc::now();
        Ok(())
    }

    fn set_status(&self, id: IssueId, from: Status, to: Status) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let issue = state.issue_mut(id)?;
        if issue.status != from {
            return Ok(false);
        }
        issue.status = to;
        issue.updated_at = Utc::now();
        if !to.is_open() {
            state.open_index.remove(id);
        }
        Ok(true)
    }

    fn mark_merged(&self, id: IssueId, into: IssueId) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        if !state.issues.contains_key(&into) {
            return Err(StoreError::MissingIssue(into));
        }
        let issue = state.issue_mut(id)?;
        if !issue.status.is_open() || id == into {
            return Ok(false);
        }
        issue.status = Status::Merged;
        issue.merged_into_id = Some(into);
        issue.updated_at = Utc::now();
        state.open_index.remove(id);
        Ok(true)
    }

    fn append_comment(&self, new: &NewComment) -> Result<Comment, StoreError> {
        let mut state = self.state()?;
        state.next_comment += 1;
        let comment = Comment {
            id: CommentId(state.next_comment),
            issue_id: new.issue_id,
            author_id: new.author_id.clone(),
            text: new.text.clone(),
            created_at: Utc::now(),
        };
        let issue = state.issue_mut(new.issue_id)?;
        issue.comment_ids.push(comment.id);
        state
            .comments
            .entry(new.issue_id)
            .or_default()
            .push(comment.clone());
        Ok(comment)
    }

    fn comments_for(&self, id: IssueId) -> Result<Vec<Comment>, StoreError> {
        Ok(self
            .state()?
            .comments
            .get(&id)
            .cloned()
            .unwrap_or_default())
    }

    fn enter_section(
        &self,
        keys: &[String],
        timeout: Duration,
    ) -> Result<SectionGuard, StoreError> {
        Ok(self.sections.enter(keys, timeout)?)
    }
}

impl AwardStore for MemoryStore {
    fn insert_award_if_absent(&self, award: &PointAward) -> Result<bool, StoreError> {
        let mut state = self.state()?;
        let key = (award.user_id.clone(), award.issue_id, award.event_kind);
        if state.awards.contains_key(&key) {
            return Ok(false);
        }
        state.awards.insert(key, award.clone());
        Ok(true)
    }

    fn total_for(&self, user: &UserId) -> Result<i64, StoreError> {
        Ok(self
            .state()?
            .awards
            .values()
            .filter(|a| a.user_id == *user)
            .map(|a| a.amount)
            .sum())
    }

    fn awards_for(&self, user: &UserId) -> Result<Vec<PointAward>, StoreError> {
        let mut awards: Vec<PointAward> = self
            .state()?
            .awards
            .values()
            .filter(|a| a.user_id == *user)
            .cloned()
            .collect();
        awards.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then(a.issue_id.cmp(&b.issue_id))
        });
        Ok(awards)
    }

    fn leaderboard(&self, limit: usize) -> Result<Vec<(UserId, i64)>, StoreError> {
        let state = self.state()?;
        let mut totals: HashMap<&UserId, i64> = HashMap::new();
        for award in state.awards.values() {
            *totals.entry(&award.user_id).or_default() += award.amount;
        }
        let mut board: Vec<(UserId, i64)> = totals
            .into_iter()
            .map(|(user, total)| (user.clone(), total))
            .collect();
        board.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        board.truncate(limit);
        Ok(board)
    }
}
