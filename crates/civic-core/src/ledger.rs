//! Gamification ledger: one award per `(user, issue, event)`.

use crate::config::PointsConfig;
use crate::error::StoreError;
use crate::model::{AwardOutcome, EventKind, IssueId, PointAward, UserId};
use crate::store::AwardStore;
use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Clone)]
pub struct Ledger {
    awards: Arc<dyn AwardStore>,
    points: PointsConfig,
}

impl std::fmt::Debug for Ledger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ledger")
            .field("points", &self.points)
            .finish_non_exhaustive()
    }
}

impl Ledger {
    pub fn new(awards: Arc<dyn AwardStore>, points: PointsConfig) -> Self {
        Self { awards, points }
    }

    #[must_use]
    pub const fn amount_for(&self, kind: EventKind) -> i64 {
        match kind {
            EventKind::Submit => self.points.submit,
            EventKind::Confirm => self.points.confirm,
            EventKind::Resolved => self.points.resolved,
        }
    }

    /// Record an award unless this user already earned it for this issue.
    ///
    /// A repeated request is `AlreadyAwarded`, never an error.
    pub fn award(
        &self,
        user: &UserId,
        issue: IssueId,
        kind: EventKind,
    ) -> Result<AwardOutcome, StoreError> {
        let award = PointAward {
            user_id: user.clone(),
            issue_id: issue,
            event_kind: kind,
            amount: self.amount_for(kind),
            created_at: Utc::now(),
        };

        if self.awards.insert_award_if_absent(&award)? {
            info!(user = %user, issue = %issue, kind = %kind, amount = award.amount, "points awarded");
            Ok(AwardOutcome::Recorded(award))
        } else {
            debug!(user = %user, issue = %issue, kind = %kind, "award already recorded");
            Ok(AwardOutcome::AlreadyAwarded)
        }
    }

    pub fn total_for(&self, user: &UserId) -> Result<i64, StoreError> {
        self.awards.total_for(user)
    }

    pub fn awards_for(&self, user: &UserId) -> Result<Vec<PointAward>, StoreError> {
        self.awards.awards_for(user)
    }

    pub fn leaderboard(&self, limit: usize) -> Result<Vec<(UserId, i64)>, StoreError> {
        self.awards.leaderboard(limit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    fn ledger() -> Ledger {
        Ledger::new(Arc::new(MemoryStore::new()), PointsConfig::default())
    }

    #[test]
    fn repeated_award_is_recorded_once() {
        let ledger = ledger();
        let ben = UserId::new("ben");
        let first = ledger.award(&ben, IssueId(1), EventKind::Confirm).unwrap();
        let second = ledger.award(&ben, IssueId(1), EventKind::Confirm).unwrap();
        assert!(first.is_recorded());
        assert_eq!(second, AwardOutcome::AlreadyAwarded);
        assert_eq!(ledger.total_for(&ben).unwrap(), 5);
        assert_eq!(ledger.awards_for(&ben).unwrap().len(), 1);
    }

    #[test]
    fn different_events_and_issues_accumulate() {
        let ledger = ledger();
        let ana = UserId::new("ana");
        ledger.award(&ana, IssueId(1), EventKind::Submit).unwrap();
        ledger.award(&ana, IssueId(1), EventKind::Resolved).unwrap();
        ledger.award(&ana, IssueId(2), EventKind::Submit).unwrap();
        assert_eq!(ledger.total_for(&ana).unwrap(), 10 + 25 + 10);
    }
}
