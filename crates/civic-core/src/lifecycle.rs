//! Employee-driven status transitions and classification overrides.
//!
//! The transition table itself lives on [`Status::can_transition_to`]; this
//! module adds the actor rules, the compare-and-set write and the Resolved
//! award. `Merged` is never a valid target here: only the duplicate resolver
//! merges.

use crate::error::EngineError;
use crate::ledger::Ledger;
use crate::model::{
    Actor, AwardOutcome, Category, EventKind, InvalidTransition, Issue, IssueId, Priority, Status,
};
use crate::store::IssueStore;
use std::sync::Arc;
use tracing::{info, instrument, warn};

/// Re-reads allowed when a concurrent status write wins the compare-and-set.
const MAX_CAS_ATTEMPTS: u32 = 3;

/// Result of a successful transition.
#[derive(Debug, Clone)]
pub struct TransitionOutcome {
    pub issue: Issue,
    pub from: Status,
    /// Present when the move to `Resolved` paid the reporter.
    pub award: Option<AwardOutcome>,
}

#[derive(Clone)]
pub struct Lifecycle {
    store: Arc<dyn IssueStore>,
    ledger: Ledger,
}

impl std::fmt::Debug for Lifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Lifecycle").finish_non_exhaustive()
    }
}

impl Lifecycle {
    pub fn new(store: Arc<dyn IssueStore>, ledger: Ledger) -> Self {
        Self { store, ledger }
    }

    fn load(&self, id: IssueId) -> Result<Issue, EngineError> {
        self.store.get_issue(id)?.ok_or(EngineError::NotFound(id))
    }

    /// Move `issue_id` to `target` on behalf of `actor`.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` when the actor is not an employee, the target is
    /// `Merged`, or the lifecycle table forbids the move. `Conflict` when
    /// concurrent writers keep winning the compare-and-set.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub fn transition(
        &self,
        issue_id: IssueId,
        target: Status,
        actor: &Actor,
    ) -> Result<TransitionOutcome, EngineError> {
        for _ in 0..MAX_CAS_ATTEMPTS {
            let issue = self.load(issue_id)?;
            let from = issue.status;

            if !actor.is_employee {
                return Err(InvalidTransition {
                    from,
                    to: target,
                    reason: "only employees may change issue status",
                }
                .into());
            }
            if target == Status::Merged {
                return Err(InvalidTransition {
                    from,
                    to: target,
                    reason: "merging is performed by the duplicate resolver",
                }
                .into());
            }
            from.can_transition_to(target)?;

            if !self.store.set_status(issue_id, from, target)? {
                warn!(issue = %issue_id, %from, %target, "status changed concurrently; re-reading");
                continue;
            }

            info!(issue = %issue_id, %from, %target, "issue status changed");
            let award = if target == Status::Resolved {
                Some(
                    self.ledger
                        .award(&issue.reporter_id, issue_id, EventKind::Resolved)?,
                )
            } else {
                None
            };

            return Ok(TransitionOutcome {
                issue: self.load(issue_id)?,
                from,
                award,
            });
        }

        Err(EngineError::Conflict {
            attempts: MAX_CAS_ATTEMPTS,
        })
    }

    /// Pay the reporter's Resolved award for an issue already in `Resolved`.
    ///
    /// A repeated `transition(id, Resolved)` is rejected by the table, so a
    /// caller whose first attempt failed after the status write settles the
    /// award here. The ledger pays it at most once.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` for citizens or when the issue is not `Resolved`.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub fn settle_resolved(
        &self,
        issue_id: IssueId,
        actor: &Actor,
    ) -> Result<TransitionOutcome, EngineError> {
        let issue = self.load(issue_id)?;
        let reject = |reason: &'static str| {
            EngineError::from(InvalidTransition {
                from: issue.status,
                to: Status::Resolved,
                reason,
            })
        };
        if !actor.is_employee {
            return Err(reject("only employees may change issue status"));
        }
        if issue.status != Status::Resolved {
            return Err(reject("issue is not resolved"));
        }

        let award = self
            .ledger
            .award(&issue.reporter_id, issue_id, EventKind::Resolved)?;
        Ok(TransitionOutcome {
            issue,
            from: Status::Resolved,
            award: Some(award),
        })
    }

    /// Employee override of category and/or priority. Priority may only rise.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` for citizens, terminal issues, or a lower priority.
    #[instrument(skip(self, actor), fields(actor = %actor.user_id))]
    pub fn override_classification(
        &self,
        issue_id: IssueId,
        actor: &Actor,
        category: Option<Category>,
        priority: Option<Priority>,
    ) -> Result<Issue, EngineError> {
        let issue = self.load(issue_id)?;
        let reject = |reason: &'static str| {
            EngineError::from(InvalidTransition {
                from: issue.status,
                to: issue.status,
                reason,
            })
        };

        if !actor.is_employee {
            return Err(reject("only employees may override classification"));
        }
        if issue.status.is_terminal() {
            return Err(reject("issue is in a terminal state"));
        }
        if priority.is_some_and(|p| p < issue.priority) {
            return Err(reject("priority de-escalation is not allowed"));
        }

        if let Some(category) = category {
            self.store.set_category(issue_id, category)?;
        }
        if let Some(priority) = priority {
            self.store.raise_priority(issue_id, priority)?;
        }
        info!(issue = %issue_id, ?category, ?priority, "classification overridden");
        self.load(issue_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PointsConfig;
    use crate::geo::Point;
    use crate::error::StoreError;
    use crate::model::{NewIssue, PointAward, UserId};
    use crate::store::{AwardStore, MemoryStore};
    use std::sync::atomic::{AtomicBool, Ordering};

    fn streetlight() -> NewIssue {
        NewIssue {
            title: "Broken streetlight".into(),
            description: String::new(),
            location: Point::new(40.0, -75.0),
            image_ref: None,
            category: Category::Lighting,
            priority: Priority::Medium,
            reporter_id: UserId::new("ana"),
            possible_duplicate_of: None,
        }
    }

    fn setup() -> (Arc<MemoryStore>, Lifecycle, IssueId) {
        let store = Arc::new(MemoryStore::new());
        let ledger = Ledger::new(store.clone(), PointsConfig::default());
        let lifecycle = Lifecycle::new(store.clone(), ledger);
        let issue = store.create_issue(&streetlight()).unwrap();
        (store, lifecycle, issue.id)
    }

    /// Award store whose next insert fails once when armed.
    struct FailingAwards {
        inner: Arc<MemoryStore>,
        armed: AtomicBool,
    }

    impl FailingAwards {
        fn new(inner: Arc<MemoryStore>) -> Self {
            Self {
                inner,
                armed: AtomicBool::new(false),
            }
        }

        fn fail_next(&self) {
            self.armed.store(true, Ordering::SeqCst);
        }
    }

    impl AwardStore for FailingAwards {
        fn insert_award_if_absent(&self, award: &PointAward) -> Result<bool, StoreError> {
            if self.armed.swap(false, Ordering::SeqCst) {
                return Err(StoreError::Poisoned);
            }
            self.inner.insert_award_if_absent(award)
        }

        fn total_for(&self, user: &UserId) -> Result<i64, StoreError> {
            self.inner.total_for(user)
        }

        fn awards_for(&self, user: &UserId) -> Result<Vec<PointAward>, StoreError> {
            self.inner.awards_for(user)
        }

        fn leaderboard(&self, limit: usize) -> Result<Vec<(UserId, i64)>, StoreError> {
            self.inner.leaderboard(limit)
        }
    }

    #[test]
    fn employee_walks_the_happy_path_and_reporter_is_paid_once() {
        let (store, lifecycle, id) = setup();
        let clerk = Actor::employee("clerk");
        for target in [Status::UnderReview, Status::InProgress, Status::Resolved] {
            lifecycle.transition(id, target, &clerk).unwrap();
        }
        let closed = lifecycle.transition(id, Status::Closed, &clerk).unwrap();
        assert_eq!(closed.issue.status, Status::Closed);
        assert_eq!(closed.from, Status::Resolved);
        assert_eq!(store.total_for(&UserId::new("ana")).unwrap(), 25);
    }

    #[test]
    fn citizens_cannot_transition() {
        let (store, lifecycle, id) = setup();
        let err = lifecycle
            .transition(id, Status::UnderReview, &Actor::citizen("ben"))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));
        assert_eq!(store.get_issue(id).unwrap().unwrap().status, Status::Submitted);
    }

    #[test]
    fn backward_move_is_rejected_and_status_unchanged() {
        let (store, lifecycle, id) = setup();
        let clerk = Actor::employee("clerk");
        for target in [Status::UnderReview, Status::InProgress, Status::Resolved] {
            lifecycle.transition(id, target, &clerk).unwrap();
        }
        let err = lifecycle
            .transition(id, Status::UnderReview, &clerk)
            .unwrap_err();
        assert!(matches!(
            err,
            EngineError::InvalidTransition(InvalidTransition {
                from: Status::Resolved,
                to: Status::UnderReview,
                ..
            })
        ));
        assert_eq!(store.get_issue(id).unwrap().unwrap().status, Status::Resolved);
    }

    #[test]
    fn resolved_award_is_settled_after_a_failed_ledger_write() {
        let store = Arc::new(MemoryStore::new());
        let awards = Arc::new(FailingAwards::new(store.clone()));
        let lifecycle = Lifecycle::new(
            store.clone(),
            Ledger::new(awards.clone(), PointsConfig::default()),
        );
        let issue = store.create_issue(&streetlight()).unwrap();
        let clerk = Actor::employee("clerk");
        for target in [Status::UnderReview, Status::InProgress] {
            lifecycle.transition(issue.id, target, &clerk).unwrap();
        }

        awards.fail_next();
        assert!(lifecycle.transition(issue.id, Status::Resolved, &clerk).is_err());
        assert_eq!(store.get_issue(issue.id).unwrap().unwrap().status, Status::Resolved);
        assert_eq!(store.total_for(&UserId::new("ana")).unwrap(), 0);

        // Repeating the move is still illegal; settling pays exactly once.
        assert!(lifecycle.transition(issue.id, Status::Resolved, &clerk).is_err());
        let settled = lifecycle.settle_resolved(issue.id, &clerk).unwrap();
        assert!(matches!(settled.award, Some(AwardOutcome::Recorded(_))));
        let again = lifecycle.settle_resolved(issue.id, &clerk).unwrap();
        assert!(matches!(again.award, Some(AwardOutcome::AlreadyAwarded)));
        assert_eq!(store.total_for(&UserId::new("ana")).unwrap(), 25);

        assert!(lifecycle.settle_resolved(issue.id, &Actor::citizen("ben")).is_err());
    }

    #[test]
    fn settling_requires_a_resolved_issue() {
        let (_store, lifecycle, id) = setup();
        let err = lifecycle
            .settle_resolved(id, &Actor::employee("clerk"))
            .unwrap_err();
        assert!(err.to_string().contains("not resolved"));
    }

    #[test]
    fn merged_is_not_a_lifecycle_target() {
        let (_store, lifecycle, id) = setup();
        let err = lifecycle
            .transition(id, Status::Merged, &Actor::employee("clerk"))
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition(_)));
    }

    #[test]
    fn unknown_issue_is_not_found() {
        let (_store, lifecycle, _) = setup();
        assert!(matches!(
            lifecycle.transition(IssueId(404), Status::Closed, &Actor::employee("clerk")),
            Err(EngineError::NotFound(IssueId(404)))
        ));
    }

    #[test]
    fn override_only_raises_priority() {
        let (_store, lifecycle, id) = setup();
        let clerk = Actor::employee("clerk");
        let issue = lifecycle
            .override_classification(id, &clerk, Some(Category::Traffic), Some(Priority::High))
            .unwrap();
        assert_eq!(issue.category, Category::Traffic);
        assert_eq!(issue.priority, Priority::High);

        let err = lifecycle
            .override_classification(id, &clerk, None, Some(Priority::Low))
            .unwrap_err();
        assert!(err.to_string().contains("de-escalation"));

        assert!(
            lifecycle
                .override_classification(id, &Actor::citizen("ben"), Some(Category::Water), None)
                .is_err()
        );
    }
}
